//! The front-end liaison loop.
//!
//! Runs off the audio path, forwarding observed program and port updates to
//! each instance's registered front-end. A flag is cleared only after its
//! message is sent; the race with the audio callback is tolerated: the worst
//! case is one extra or one missed notification, never corrupted plugin
//! state.

use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;

use rosc::OscType;

use crate::engine::EngineShared;
use crate::osc::send_message;
use crate::shutdown;

const POLL_INTERVAL: Duration = Duration::from_millis(30);

pub struct Liaison {
    shared: Arc<EngineShared>,
    socket: UdpSocket,
}

impl Liaison {
    pub fn new(shared: Arc<EngineShared>, socket: UdpSocket) -> Self {
        Self { shared, socket }
    }

    /// One pass over the update flags.
    pub fn poll(&self) {
        for instance in &self.shared.instances {
            if instance.ui_needs_program_update.get() && !instance.program.has_pending() {
                let (bank, program) = self.shared.current_program(instance);
                if let Some(ui) = instance.ui.lock().clone() {
                    send_message(
                        &self.socket,
                        ui.addr,
                        &ui.program_path,
                        vec![OscType::Int(bank), OscType::Int(program)],
                    );
                }
                // Cleared only once the message is out.
                instance.ui_needs_program_update.set(false);
            }
        }

        for i in 0..self.shared.control_ins.len() {
            if self.shared.port_updated[i].get() {
                let instance = &self.shared.instances[self.shared.control_in_instances[i]];
                let port = self.shared.control_in_ports[i] as i32;
                let value = self.shared.control_ins[i].get();
                if let Some(ui) = instance.ui.lock().clone() {
                    send_message(
                        &self.socket,
                        ui.addr,
                        &ui.control_path,
                        vec![OscType::Int(port), OscType::Float(value)],
                    );
                }
                self.shared.port_updated[i].set(false);
            }
        }
    }

    /// Poll until the host begins exiting.
    pub fn run(&self) {
        while !shutdown::is_exiting() {
            self.poll();
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}
