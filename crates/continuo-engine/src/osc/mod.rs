//! The UDP control plane shared with external front-ends.
//!
//! A dispatcher thread routes incoming messages under `/dssi/<instance>/` to
//! the shared engine state; the liaison forwards observed port and program
//! updates back to each instance's registered front-end.

mod liaison;
mod server;

pub use liaison::Liaison;
pub use server::OscServer;

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use rosc::{OscMessage, OscPacket, OscType};
use tracing::warn;

/// Encode and send one OSC message; failures are logged, never fatal.
pub(crate) fn send_message(socket: &UdpSocket, addr: SocketAddr, path: &str, args: Vec<OscType>) {
    let packet = OscPacket::Message(OscMessage {
        addr: path.to_string(),
        args,
    });
    match rosc::encoder::encode(&packet) {
        Ok(buf) => {
            if let Err(e) = socket.send_to(&buf, addr) {
                warn!("failed to send OSC to {addr}: {e}");
            }
        }
        Err(e) => warn!("failed to encode OSC message for {path}: {e}"),
    }
}

/// Split an `osc.udp://host:port/path` URL into a socket address and path.
pub(crate) fn parse_osc_url(url: &str) -> Option<(SocketAddr, String)> {
    let rest = url.strip_prefix("osc.udp://")?;
    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, "/"),
    };
    let addr = authority.to_socket_addrs().ok()?.next()?;
    Some((addr, path.trim_end_matches('/').to_string()))
}
