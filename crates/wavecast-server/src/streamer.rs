//! Audio fan-out loop.
//!
//! A dedicated thread pulls chunks from the queue head and writes each one
//! to every listener's audio socket. It is the sole writer of audio bytes,
//! so all listeners see the same chunk sequence in the same order.

use std::io::{self, Write};
use std::net::TcpStream;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::config;
use crate::server::Server;

pub fn spawn(server: Arc<Server>, shutdown: Arc<AtomicBool>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("wavecast-streamer".into())
        .spawn(move || stream_loop(&server, &shutdown))
}

fn stream_loop(server: &Server, shutdown: &AtomicBool) {
    info!("broadcast streamer running");

    while !shutdown.load(Ordering::Relaxed) {
        if server.queue.is_empty() {
            thread::sleep(config::IDLE_POLL);
            continue;
        }

        let chunk = match server.queue.pull_chunk() {
            Ok(Some(chunk)) => chunk,
            // Lost a race with the final song popping; nothing to send.
            Ok(None) => continue,
            Err(e) => {
                // Skip this tick; the head may become readable again.
                warn!("chunk read failed: {e:#}");
                thread::sleep(config::IDLE_POLL);
                continue;
            }
        };

        for (fd, sock) in server.registry.audio_snapshot() {
            send_chunk(fd, &sock, &chunk);
        }

        thread::sleep(config::STREAM_TICK);
    }

    info!("broadcast streamer stopped");
}

/// One non-blocking send. Slow or dead listeners are never removed here;
/// their disconnection surfaces on the control channel instead.
fn send_chunk(fd: RawFd, sock: &TcpStream, chunk: &[u8]) {
    let mut sock = sock;
    match sock.write(chunk) {
        Ok(n) if n < chunk.len() => debug!(fd, sent = n, "short audio send"),
        Ok(_) => {}
        Err(e) => debug!(fd, "audio send failed: {e}"),
    }
}
