use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};

use crate::journal::Journal;
use crate::logging::Logger;
use crate::shutdown::ShutdownFlag;
use crate::wire::PacketFramer;

const RECV_BUFFER_SIZE: usize = 1024;

/// Terminal state of one client session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    PeerClosed,
    Error,
    Shutdown,
}

/// Drives one accepted connection end-to-end: blocking receive loop, newline
/// framing, journal append, full-journal echo. Returns when the peer closes,
/// an unrecoverable error occurs, or shutdown is requested. The stream is
/// closed on return; the caller owns completion marking.
pub fn run_session(
    mut stream: TcpStream,
    peer: SocketAddr,
    journal: &Journal,
    shutdown: &ShutdownFlag,
    logger: &Logger,
) -> SessionEnd {
    let mut framer = PacketFramer::new();
    let mut buffer = [0_u8; RECV_BUFFER_SIZE];

    loop {
        if shutdown.is_set() {
            return SessionEnd::Shutdown;
        }

        let received = match stream.read(&mut buffer) {
            Ok(0) => {
                // Zero also surfaces when shutdown force-closed our socket.
                return if shutdown.is_set() {
                    SessionEnd::Shutdown
                } else {
                    SessionEnd::PeerClosed
                };
            }
            Ok(size) => size,
            Err(error) if error.kind() == io::ErrorKind::Interrupted && !shutdown.is_set() => {
                continue;
            }
            Err(_) if shutdown.is_set() => return SessionEnd::Shutdown,
            Err(error) => {
                logger.error(
                    Some("session"),
                    &format!("read from {peer} failed: {error}"),
                );
                return SessionEnd::Error;
            }
        };

        let packets = match framer.feed(&buffer[..received]) {
            Ok(packets) => packets,
            Err(error) => {
                logger.error(
                    Some("session"),
                    &format!("packet buffer for {peer} could not grow: {error}"),
                );
                return SessionEnd::Error;
            }
        };

        for packet in packets {
            // Append and read-back happen under one journal lock span, so
            // the echo is exactly the journal up to this packet.
            let snapshot = match journal.append_and_snapshot(&packet) {
                Ok(snapshot) => snapshot,
                Err(error) => {
                    // This packet is lost; the session stays open for the
                    // next one.
                    logger.error(
                        Some("session"),
                        &format!("journal append for {peer} failed: {error}"),
                    );
                    continue;
                }
            };

            if let Err(error) = send_all(&mut stream, &snapshot) {
                if shutdown.is_set() {
                    return SessionEnd::Shutdown;
                }
                logger.error(
                    Some("session"),
                    &format!("echo to {peer} failed: {error}"),
                );
                return SessionEnd::Error;
            }
        }
    }
}

/// Writes every byte, retrying interrupted writes. A zero-length write means
/// the peer stopped accepting bytes and fails the transmission.
fn send_all(stream: &mut TcpStream, bytes: &[u8]) -> io::Result<()> {
    let mut sent = 0;
    while sent < bytes.len() {
        match stream.write(&bytes[sent..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "connection no longer accepts bytes",
                ));
            }
            Ok(written) => sent += written,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        }
    }
    Ok(())
}
