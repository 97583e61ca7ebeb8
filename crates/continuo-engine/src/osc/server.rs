//! The OSC dispatcher thread.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use rosc::{OscMessage, OscMidiMessage, OscPacket, OscType};
use tracing::{debug, info, warn};

use crate::engine::EngineShared;
use crate::error::Result;
use crate::instance::{Instance, UiTarget};
use crate::midi_in::event_from_bytes;
use crate::osc::{parse_osc_url, send_message};
use crate::ring::{EventProducer, IngressEvent};
use crate::shutdown;

/// UDP endpoint receiving front-end messages under `/dssi/...`.
pub struct OscServer {
    socket: UdpSocket,
    url: String,
    shared: Arc<EngineShared>,
    producer: EventProducer,
}

impl OscServer {
    /// Bind the control endpoint; an unset port picks an ephemeral one.
    pub fn bind(
        shared: Arc<EngineShared>,
        producer: EventProducer,
        port: Option<u16>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port.unwrap_or(0)))?;
        socket.set_read_timeout(Some(Duration::from_millis(100)))?;
        let url = format!("osc.udp://127.0.0.1:{}/dssi", socket.local_addr()?.port());
        Ok(Self {
            socket,
            url,
            shared,
            producer,
        })
    }

    /// The host's OSC URL, handed to front-ends at launch.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn socket(&self) -> &UdpSocket {
        &self.socket
    }

    /// Run the dispatcher until the host begins exiting.
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("continuo-osc".into())
            .spawn(move || self.run())
    }

    fn run(self) {
        let mut buf = [0u8; rosc::decoder::MTU];
        while !shutdown::is_exiting() {
            match self.socket.recv_from(&mut buf) {
                Ok((len, _from)) => match rosc::decoder::decode_udp(&buf[..len]) {
                    Ok((_, packet)) => self.handle_packet(packet),
                    Err(e) => warn!("undecodable OSC datagram: {e}"),
                },
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(e) => warn!("OSC receive error: {e}"),
            }
        }
    }

    pub fn handle_packet(&self, packet: OscPacket) {
        match packet {
            OscPacket::Message(msg) => self.handle_message(&msg),
            OscPacket::Bundle(bundle) => {
                for inner in bundle.content {
                    self.handle_packet(inner);
                }
            }
        }
    }

    /// Route one message by `/dssi/<instance_friendly_name>/<method>`.
    pub fn handle_message(&self, msg: &OscMessage) {
        let Some(rest) = msg.addr.strip_prefix("/dssi/") else {
            return debug_handler(msg);
        };
        let Some(instance) = self
            .shared
            .instances
            .iter()
            .find(|i| rest.starts_with(&i.friendly_name))
        else {
            return debug_handler(msg);
        };
        if instance.inactive.get() {
            return;
        }
        let method = &rest[instance.friendly_name.len()..];
        let Some(method) = method.strip_prefix('/') else {
            return debug_handler(msg);
        };

        match (method, msg.args.as_slice()) {
            ("control", [OscType::Int(port), OscType::Float(value)]) => {
                self.control_handler(instance, *port, *value)
            }
            ("midi", [OscType::Midi(midi)]) => self.midi_handler(instance, midi),
            ("program", [OscType::Int(bank), OscType::Int(program)]) => {
                self.program_handler(instance, *bank, *program)
            }
            ("configure", [OscType::String(key), OscType::String(value)]) => {
                self.configure_handler(instance, key, value)
            }
            ("update", [OscType::String(url)]) => self.update_handler(instance, url),
            ("exiting", []) => self.exiting_handler(instance),
            _ => debug_handler(msg),
        }
    }

    /// Set a control-input slot directly, bypassing MIDI mapping.
    fn control_handler(&self, instance: &Instance, port: i32, value: f32) {
        if port < 0 || port as u32 >= instance.plugin.descriptor.port_count() {
            warn!(
                "OSC: {} port number ({port}) is out of range",
                instance.friendly_name
            );
            return;
        }
        let control_in = instance.port_control_ins[port as usize];
        if control_in < 0 {
            warn!(
                "OSC: {} port {port} is not a control input",
                instance.friendly_name
            );
            return;
        }
        self.shared.control_ins[control_in as usize].set(value);
        debug!("OSC: {} port {port} = {value}", instance.friendly_name);
    }

    /// Inject a raw MIDI event from the front-end into the ingress ring.
    ///
    /// The leading OSC port-id byte is ignored; the event's channel is
    /// overridden with the instance's channel. Bank select and program
    /// changes are rejected; the UI should use `/program`.
    fn midi_handler(&self, instance: &Instance, midi: &OscMidiMessage) {
        debug!(
            "OSC: got midi request for {} ({:02x} {:02x} {:02x} {:02x})",
            instance.friendly_name, midi.port, midi.status, midi.data1, midi.data2
        );
        let Some(mut ev) = event_from_bytes(&[midi.status, midi.data1, midi.data2]) else {
            return;
        };
        ev.channel = instance.channel;

        use continuo_plugin::EventKind;
        match ev.kind {
            EventKind::Controller if ev.data1 == 0 || ev.data1 == 32 => {
                warn!(
                    "{} UI sent bank select controller (should use /program), ignoring",
                    instance.friendly_name
                );
            }
            EventKind::ProgramChange => {
                warn!(
                    "{} UI sent program change (should use /program), ignoring",
                    instance.friendly_name
                );
            }
            _ => {
                self.producer.push(IngressEvent {
                    at: Instant::now(),
                    ev,
                });
            }
        }
    }

    /// Queue a bank/program change for the next block boundary.
    fn program_handler(&self, instance: &Instance, bank: i32, program: i32) {
        let known = instance
            .programs
            .lock()
            .iter()
            .find(|p| p.bank as i32 == bank && p.program as i32 == program)
            .map(|p| p.name.clone());
        match known {
            Some(name) => info!(
                "OSC: {} setting bank {bank}, program {program}, name {name}",
                instance.friendly_name
            ),
            None => info!(
                "OSC: {} UI requested unknown program: bank {bank}, program {program}: \
                 sending to plugin anyway (plugin should ignore it)",
                instance.friendly_name
            ),
        }

        use std::sync::atomic::Ordering;
        instance
            .program
            .pending_bank_msb
            .store(bank / 128, Ordering::Release);
        instance
            .program
            .pending_bank_lsb
            .store(bank % 128, Ordering::Release);
        instance
            .program
            .pending_program
            .store(program, Ordering::Release);
    }

    /// Pass a configure pair to the plugin and rebuild its program list,
    /// which configure invalidates.
    fn configure_handler(&self, instance: &Instance, key: &str, value: &str) {
        if !instance.plugin.descriptor.supports_configure() {
            return;
        }
        if let Some(message) = instance
            .plugin
            .descriptor
            .configure(instance.handle, key, value)
        {
            info!(
                "on configure '{key}' '{value}', plugin '{}' returned '{message}'",
                instance.friendly_name
            );
        }
        instance.query_programs();
    }

    /// Register (or replace) the front-end return address, echo every
    /// current control value, and send the one-time show directive.
    fn update_handler(&self, instance: &Instance, url: &str) {
        debug!("OSC: got update request from <{url}>");
        let Some((addr, path)) = parse_osc_url(url) else {
            warn!(
                "OSC: {} sent unparseable update URL <{url}>",
                instance.friendly_name
            );
            return;
        };
        let target = UiTarget::new(addr, &path);
        *instance.ui.lock() = Some(target.clone());

        for i in 0..instance.plugin.descriptor.control_ins() {
            let control_in = instance.first_control_in + i;
            let port = self.shared.control_in_ports[control_in] as i32;
            let value = self.shared.control_ins[control_in].get();
            send_message(
                &self.socket,
                target.addr,
                &target.control_path,
                vec![OscType::Int(port), OscType::Float(value)],
            );
        }

        if !instance.ui_initial_show_sent.swap(true) {
            send_message(&self.socket, target.addr, &target.show_path, Vec::new());
        }
    }

    /// The front-end is going away: deactivate this instance, and shut the
    /// host down once the last one is gone.
    fn exiting_handler(&self, instance: &Instance) {
        info!(
            "OSC: got exiting notification for instance {}",
            instance.index
        );
        instance.inactive.set(true);
        instance.plugin.descriptor.deactivate(instance.handle);

        if self.shared.all_inactive() {
            info!("that was the last remaining plugin, exiting");
            shutdown::request_exit();
        }
    }
}

fn debug_handler(msg: &OscMessage) {
    info!("got unhandled OSC message: path <{}>", msg.addr);
    for (i, arg) in msg.args.iter().enumerate() {
        info!("  arg {i}: {arg:?}");
    }
}
