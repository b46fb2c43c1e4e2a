//! Connected-client bookkeeping.
//!
//! A client is the pair of sockets accepted together: the control channel
//! (commands in, JSON state out) and the audio channel (chunk stream out).
//! The registry owns both; everything else refers to a client by its
//! control-socket fd, which is also the readiness token.

use std::collections::HashMap;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::{Arc, RwLock};

pub struct Client {
    control: Arc<TcpStream>,
    audio: Arc<TcpStream>,
    peer: SocketAddr,
}

impl Client {
    pub fn new(control: TcpStream, audio: TcpStream, peer: SocketAddr) -> Self {
        Self {
            control: Arc::new(control),
            audio: Arc::new(audio),
            peer,
        }
    }

    pub fn control_fd(&self) -> RawFd {
        self.control.as_raw_fd()
    }
}

#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<RawFd, Client>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a client, keyed by its control-socket fd.
    pub fn insert(&self, client: Client) -> RawFd {
        let fd = client.control_fd();
        self.clients.write().unwrap().insert(fd, client);
        fd
    }

    /// Remove a client and close both channels. A second removal is a no-op.
    pub fn remove(&self, fd: RawFd) -> Option<SocketAddr> {
        let client = self.clients.write().unwrap().remove(&fd)?;
        // Shut the sockets down eagerly; snapshots may still hold clones of
        // the Arcs, and the fds close for good once those drop.
        let _ = client.control.shutdown(Shutdown::Both);
        let _ = client.audio.shutdown(Shutdown::Both);
        Some(client.peer)
    }

    pub fn count(&self) -> usize {
        self.clients.read().unwrap().len()
    }

    /// The control socket for `fd`, if the client is still registered.
    pub fn control_socket(&self, fd: RawFd) -> Option<Arc<TcpStream>> {
        self.clients.read().unwrap().get(&fd).map(|c| c.control.clone())
    }

    /// Every control socket, for state broadcasts. Sends happen against the
    /// clones, never under the registry lock.
    pub fn control_snapshot(&self) -> Vec<Arc<TcpStream>> {
        self.clients
            .read()
            .unwrap()
            .values()
            .map(|c| c.control.clone())
            .collect()
    }

    /// Every audio socket plus its owning control fd, for the streamer.
    pub fn audio_snapshot(&self) -> Vec<(RawFd, Arc<TcpStream>)> {
        self.clients
            .read()
            .unwrap()
            .iter()
            .map(|(fd, c)| (*fd, c.audio.clone()))
            .collect()
    }
}
