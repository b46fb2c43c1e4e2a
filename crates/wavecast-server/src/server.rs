//! Accept loop, readiness dispatch, and the control-channel handler.
//!
//! One dispatcher thread owns both listeners and the epoll set. Client
//! commands are handed to the worker pool one readiness event at a time;
//! the one-shot registration guarantees at most one in-flight handler per
//! client, so nothing else ever reads that client's control socket until
//! the handler re-arms it.

use std::io::{self, Read, Write};
use std::mem;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use wavecast_proto::{self as proto, Signature};

use crate::config;
use crate::library::LibraryStore;
use crate::pool::WorkerPool;
use crate::poller::{Poller, cvt};
use crate::queue::SongQueue;
use crate::registry::{Client, ClientRegistry};
use crate::state::StateDoc;

pub struct ServerOpts {
    pub control_port: u16,
    pub audio_port: u16,
    pub library_root: PathBuf,
}

pub struct Server {
    pub(crate) library: LibraryStore,
    pub(crate) queue: SongQueue,
    pub(crate) registry: ClientRegistry,
    poller: Poller,
    control_listener: TcpListener,
    audio_listener: TcpListener,
}

/// What a single readiness event amounted to.
enum Outcome {
    /// A command was parsed and applied.
    Handled,
    /// Readiness fired with nothing to read; just re-arm.
    Spurious,
    /// EOF or a dead control socket; the client goes away.
    Disconnected,
}

impl Server {
    /// Bind both listeners and set up the readiness mechanism.
    ///
    /// Every failure here is fatal to the process.
    pub fn bind(opts: &ServerOpts) -> Result<Self> {
        let control_listener = bind_reusable(opts.control_port)
            .with_context(|| format!("bind control port {}", opts.control_port))?;
        let audio_listener = bind_reusable(opts.audio_port)
            .with_context(|| format!("bind audio port {}", opts.audio_port))?;
        let poller = Poller::new().context("create epoll instance")?;
        poller
            .add_listener(control_listener.as_raw_fd())
            .context("register control listener")?;

        Ok(Self {
            library: LibraryStore::new(&opts.library_root)?,
            queue: SongQueue::new(&opts.library_root),
            registry: ClientRegistry::new(),
            poller,
            control_listener,
            audio_listener,
        })
    }

    pub fn control_addr(&self) -> io::Result<SocketAddr> {
        self.control_listener.local_addr()
    }

    pub fn audio_addr(&self) -> io::Result<SocketAddr> {
        self.audio_listener.local_addr()
    }

    /// Dispatch readiness events until `shutdown` flips.
    pub fn run(self: Arc<Self>, pool: &WorkerPool, shutdown: &AtomicBool) -> Result<()> {
        let listen_fd = self.control_listener.as_raw_fd();
        let mut events = Vec::new();

        while !shutdown.load(Ordering::Relaxed) {
            self.poller
                .wait(&mut events, Some(config::POLL_TIMEOUT))
                .context("wait for readiness")?;

            for event in &events {
                if event.fd == listen_fd {
                    if let Err(e) = self.accept_pair() {
                        warn!("accept failed: {e:#}");
                    }
                } else {
                    let fd = event.fd;
                    let server = Arc::clone(&self);
                    if pool.submit(move || server.handle_ready(fd)).is_err() {
                        warn!(fd, "worker pool rejected readiness event");
                    }
                }
            }
        }

        info!("dispatcher stopped");
        Ok(())
    }

    /// Accept the control connection and its paired audio connection.
    ///
    /// Clients connect control first, then audio, so the next connection on
    /// the audio listener belongs to the control connection just accepted.
    fn accept_pair(&self) -> Result<()> {
        let (control, peer) = self
            .control_listener
            .accept()
            .context("accept control connection")?;
        let (audio, _) = self
            .audio_listener
            .accept()
            .context("accept audio connection")?;
        control
            .set_nonblocking(true)
            .context("set control socket non-blocking")?;
        audio
            .set_nonblocking(true)
            .context("set audio socket non-blocking")?;

        let client = Client::new(control, audio, peer);
        let fd = self.registry.insert(client);
        if let Err(e) = self.poller.add_client(fd) {
            self.registry.remove(fd);
            return Err(e).context("register control socket");
        }

        info!(%peer, fd, "client connected");
        self.broadcast_state();
        Ok(())
    }

    /// Handle one readiness event for a client control socket.
    pub(crate) fn handle_ready(&self, fd: RawFd) {
        let Some(control) = self.registry.control_socket(fd) else {
            return;
        };

        match self.read_one_command(fd, &control) {
            Ok(Outcome::Handled) => {
                self.broadcast_state();
                self.rearm(fd);
            }
            Ok(Outcome::Spurious) => self.rearm(fd),
            Ok(Outcome::Disconnected) => self.drop_client(fd),
            Err(e) => {
                // Command-level failure (bad file, unreadable song); the
                // client stays connected.
                warn!(fd, "command aborted: {e:#}");
                self.rearm(fd);
            }
        }
    }

    fn read_one_command(&self, fd: RawFd, control: &TcpStream) -> Result<Outcome> {
        let mut sig = [0u8; 1];
        let mut sock = control;
        loop {
            match sock.read(&mut sig) {
                Ok(0) => return Ok(Outcome::Disconnected),
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Outcome::Spurious),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(fd, "control read failed: {e}");
                    return Ok(Outcome::Disconnected);
                }
            }
        }

        let signature = match Signature::from_u8(sig[0]) {
            Ok(signature) => signature,
            Err(e) => {
                // No way to resynchronize an unframed stream; cut the client.
                warn!(fd, "control stream desynced: {e}");
                return Ok(Outcome::Disconnected);
            }
        };

        let mut reader = FrameReader { sock: control };
        match signature {
            Signature::Upload => self.handle_upload(fd, &mut reader),
            Signature::Enqueue => self.handle_enqueue(fd, &mut reader),
        }
    }

    fn handle_upload(&self, fd: RawFd, reader: &mut FrameReader<'_>) -> Result<Outcome> {
        let Some(name) = read_field(fd, proto::read_name(&mut *reader)) else {
            return Ok(Outcome::Disconnected);
        };
        let Some(body_len) = read_field(fd, proto::read_body_len(&mut *reader)) else {
            return Ok(Outcome::Disconnected);
        };

        let mut file = match self.library.create(&name) {
            Ok(file) => file,
            Err(e) => {
                // The body is on the wire either way; drain it so the next
                // command starts on a signature byte.
                if drain(reader, body_len as u64).is_err() {
                    return Ok(Outcome::Disconnected);
                }
                return Err(e);
            }
        };

        let mut remaining = body_len as u64;
        let mut buf = [0u8; config::UPLOAD_CHUNK];
        while remaining > 0 {
            let take = remaining.min(config::UPLOAD_CHUNK as u64) as usize;
            if let Err(e) = reader.read_exact(&mut buf[..take]) {
                warn!(fd, "short read on control channel: {e}");
                return Ok(Outcome::Disconnected);
            }
            remaining -= take as u64;
            if let Err(e) = file.write_all(&buf[..take]) {
                if drain(reader, remaining).is_err() {
                    return Ok(Outcome::Disconnected);
                }
                return Err(e).with_context(|| format!("write upload body for {name}"));
            }
        }

        info!(name = %name, bytes = body_len, "upload stored");
        Ok(Outcome::Handled)
    }

    fn handle_enqueue(&self, fd: RawFd, reader: &mut FrameReader<'_>) -> Result<Outcome> {
        let Some(name) = read_field(fd, proto::read_name(&mut *reader)) else {
            return Ok(Outcome::Disconnected);
        };
        self.queue.enqueue(&name)?;
        info!(name = %name, "song enqueued");
        Ok(Outcome::Handled)
    }

    fn rearm(&self, fd: RawFd) {
        if let Err(e) = self.poller.rearm_client(fd) {
            warn!(fd, "re-arm failed: {e}");
        }
    }

    fn drop_client(&self, fd: RawFd) {
        // De-register before the registry closes the sockets.
        let _ = self.poller.delete(fd);
        if let Some(peer) = self.registry.remove(fd) {
            info!(%peer, fd, "client disconnected");
            self.broadcast_state();
        }
    }

    /// Send the current state document to every control socket. Best-effort:
    /// send failures are logged and otherwise ignored.
    pub(crate) fn broadcast_state(&self) {
        let doc = match self.build_state() {
            Ok(doc) => doc,
            Err(e) => {
                warn!("state snapshot failed: {e:#}");
                return;
            }
        };
        let payload = match serde_json::to_vec(&doc) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("state serialization failed: {e}");
                return;
            }
        };

        for sock in self.registry.control_snapshot() {
            let mut sock: &TcpStream = &sock;
            if let Err(e) = sock.write_all(&payload) {
                debug!(fd = sock.as_raw_fd(), "state send failed: {e}");
            }
        }
    }

    fn build_state(&self) -> Result<StateDoc> {
        Ok(StateDoc {
            active_listeners: self.registry.count(),
            song_library: self.library.list()?,
            song_queue: self.queue.snapshot_names(),
        })
    }
}

/// Reads a command frame off a non-blocking control socket.
///
/// Mid-command `WouldBlock` means the rest of the frame is still in flight,
/// not that the peer is gone, so it retries after a short pause. EOF is
/// surfaced as `UnexpectedEof` through `read_exact`.
struct FrameReader<'a> {
    sock: &'a TcpStream,
}

impl Read for FrameReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut sock = self.sock;
        loop {
            match sock.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(config::FRAME_RETRY_DELAY);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                other => return other,
            }
        }
    }
}

fn read_field<T>(fd: RawFd, field: io::Result<T>) -> Option<T> {
    match field {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(fd, "short read on control channel: {e}");
            None
        }
    }
}

/// Read and discard `n` bytes to keep the command stream in sync.
fn drain(r: &mut impl Read, n: u64) -> io::Result<u64> {
    io::copy(&mut r.by_ref().take(n), &mut io::sink())
}

/// Build a listener with `SO_REUSEADDR` and `SO_REUSEPORT` set before bind.
fn bind_reusable(port: u16) -> io::Result<TcpListener> {
    unsafe {
        let sock = OwnedFd::from_raw_fd(cvt(libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0))?);
        let one: libc::c_int = 1;
        for opt in [libc::SO_REUSEADDR, libc::SO_REUSEPORT] {
            cvt(libc::setsockopt(
                sock.as_raw_fd(),
                libc::SOL_SOCKET,
                opt,
                &one as *const libc::c_int as *const libc::c_void,
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            ))?;
        }

        let addr = libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: port.to_be(),
            sin_addr: libc::in_addr {
                s_addr: libc::INADDR_ANY,
            },
            sin_zero: [0; 8],
        };
        cvt(libc::bind(
            sock.as_raw_fd(),
            &addr as *const libc::sockaddr_in as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        ))?;
        cvt(libc::listen(sock.as_raw_fd(), config::ACCEPT_BACKLOG))?;

        Ok(TcpListener::from(sock))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reusable_listeners_share_a_port() {
        let first = bind_reusable(0).unwrap();
        let port = first.local_addr().unwrap().port();
        // SO_REUSEPORT lets a second listener bind the exact same port.
        let second = bind_reusable(port).unwrap();
        assert_eq!(second.local_addr().unwrap().port(), port);
    }
}
