//! MIDI ingress.
//!
//! A dedicated thread owns the midir connection; its input callback is the
//! ring's steady-state producer, stamping each event with its arrival time.
//! On unix the host opens a virtual input port (sequencers connect to us);
//! `port` connects to a named hardware port instead.

use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use midir::{MidiInput, MidiInputConnection};
use tracing::debug;

use continuo_plugin::{EventKind, SynthEvent};

use crate::error::{Error, Result};
use crate::ring::{EventProducer, IngressEvent};

enum Command {
    Shutdown,
}

/// Handle to the MIDI reader thread; dropping it disconnects.
pub struct MidiIngress {
    commands: Sender<Command>,
}

impl MidiIngress {
    /// Spawn the reader thread and wait for the connection to come up.
    pub fn spawn(
        client_name: &str,
        port: Option<String>,
        producer: EventProducer,
    ) -> Result<Self> {
        let (commands, command_rx) = bounded(4);
        let (ready_tx, ready_rx) = bounded(1);
        let client = client_name.to_string();
        std::thread::Builder::new()
            .name("continuo-midi".into())
            .spawn(move || midi_thread(client, port, producer, command_rx, ready_tx))?;

        ready_rx
            .recv()
            .map_err(|_| Error::MidiConnect("MIDI thread exited before connecting".into()))??;
        Ok(Self { commands })
    }
}

impl Drop for MidiIngress {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

fn midi_thread(
    client: String,
    port: Option<String>,
    producer: EventProducer,
    commands: Receiver<Command>,
    ready: Sender<Result<()>>,
) {
    let connection = match open_input(&client, port.as_deref(), producer) {
        Ok(connection) => {
            let _ = ready.send(Ok(()));
            connection
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    loop {
        match commands.recv_timeout(Duration::from_millis(100)) {
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
    drop(connection);
}

fn open_input(
    client: &str,
    port: Option<&str>,
    producer: EventProducer,
) -> Result<MidiInputConnection<()>> {
    let input = MidiInput::new(client)?;
    let callback = move |_timestamp: u64, bytes: &[u8], _: &mut ()| {
        if let Some(ev) = event_from_bytes(bytes) {
            producer.push(IngressEvent {
                at: Instant::now(),
                ev,
            });
        } else {
            debug!("ignoring non-channel MIDI input ({} bytes)", bytes.len());
        }
    };

    match port {
        Some(wanted) => {
            let ports = input.ports();
            let port = ports
                .iter()
                .find(|p| {
                    input
                        .port_name(p)
                        .map(|name| name.contains(wanted))
                        .unwrap_or(false)
                })
                .ok_or_else(|| Error::MidiPortNotFound(wanted.to_string()))?;
            input
                .connect(port, "ingress", callback, ())
                .map_err(|e| Error::MidiConnect(e.to_string()))
        }
        None => {
            #[cfg(unix)]
            {
                use midir::os::unix::VirtualInput;
                input
                    .create_virtual(client, callback, ())
                    .map_err(|e| Error::MidiConnect(e.to_string()))
            }
            #[cfg(not(unix))]
            {
                let _ = callback;
                Err(Error::MidiConnect(
                    "no MIDI port named and virtual ports are unsupported here".into(),
                ))
            }
        }
    }
}

/// Decode raw MIDI bytes into a channel event.
///
/// Non-channel messages (system, realtime, sysex) yield `None`; the ring
/// only ever carries channel-scoped events. A note-on with velocity 0 is
/// normalized to note-off at ingress.
pub fn event_from_bytes(bytes: &[u8]) -> Option<SynthEvent> {
    use midly::{live::LiveEvent, MidiMessage};

    let event = LiveEvent::parse(bytes).ok()?;
    let LiveEvent::Midi { channel, message } = event else {
        return None;
    };
    let channel = channel.as_int();

    let ev = match message {
        MidiMessage::NoteOff { key, vel } => SynthEvent {
            kind: EventKind::NoteOff,
            channel,
            data1: key.as_int(),
            data2: vel.as_int(),
            tick: 0,
        },
        MidiMessage::NoteOn { key, vel } if vel.as_int() == 0 => {
            SynthEvent::note_off(channel, key.as_int())
        }
        MidiMessage::NoteOn { key, vel } => {
            SynthEvent::note_on(channel, key.as_int(), vel.as_int())
        }
        MidiMessage::Aftertouch { key, vel } => SynthEvent {
            kind: EventKind::KeyPressure,
            channel,
            data1: key.as_int(),
            data2: vel.as_int(),
            tick: 0,
        },
        MidiMessage::Controller { controller, value } => {
            SynthEvent::controller(channel, controller.as_int(), value.as_int())
        }
        MidiMessage::ProgramChange { program } => {
            SynthEvent::program_change(channel, program.as_int())
        }
        MidiMessage::ChannelAftertouch { vel } => SynthEvent {
            kind: EventKind::ChannelPressure,
            channel,
            data1: vel.as_int(),
            data2: 0,
            tick: 0,
        },
        MidiMessage::PitchBend { bend } => SynthEvent::pitch_bend(channel, bend.0.as_int()),
    };
    Some(ev)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_note_on() {
        let ev = event_from_bytes(&[0x91, 60, 100]).unwrap();
        assert_eq!(ev.kind, EventKind::NoteOn);
        assert_eq!(ev.channel, 1);
        assert_eq!(ev.data1, 60);
        assert_eq!(ev.data2, 100);
    }

    #[test]
    fn note_on_velocity_zero_becomes_note_off() {
        let ev = event_from_bytes(&[0x90, 60, 0]).unwrap();
        assert_eq!(ev.kind, EventKind::NoteOff);
        assert_eq!(ev.data1, 60);
    }

    #[test]
    fn parses_controller_and_program_change() {
        let cc = event_from_bytes(&[0xB0, 74, 64]).unwrap();
        assert_eq!(cc.kind, EventKind::Controller);
        assert_eq!((cc.data1, cc.data2), (74, 64));

        let pc = event_from_bytes(&[0xC2, 5]).unwrap();
        assert_eq!(pc.kind, EventKind::ProgramChange);
        assert_eq!(pc.channel, 2);
        assert_eq!(pc.data1, 5);
    }

    #[test]
    fn parses_pitch_bend_center() {
        let ev = event_from_bytes(&[0xE0, 0x00, 0x40]).unwrap();
        assert_eq!(ev.kind, EventKind::PitchBend);
        assert_eq!(ev.bend_value(), 8192);
    }

    #[test]
    fn rejects_non_channel_messages() {
        // System realtime and sysex never reach the ring.
        assert!(event_from_bytes(&[0xF8]).is_none());
        assert!(event_from_bytes(&[0xF0, 0x01, 0xF7]).is_none());
        assert!(event_from_bytes(&[]).is_none());
    }
}
