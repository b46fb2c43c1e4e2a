//! Edge-triggered readiness over epoll.
//!
//! Client control sockets are registered `EPOLLIN | EPOLLET | EPOLLONESHOT`:
//! one readiness report per client, silenced until the handler re-arms it.
//! That one-shot discipline is what serializes command handling per client.
//! The listener is registered level-triggered so a pending connection keeps
//! reporting until it is accepted.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

const CLIENT_MASK: u32 = (libc::EPOLLIN | libc::EPOLLET | libc::EPOLLONESHOT) as u32;
const LISTENER_MASK: u32 = libc::EPOLLIN as u32;
const MAX_EVENTS: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub fd: RawFd,
}

pub struct Poller {
    epfd: RawFd,
}

impl Poller {
    pub fn new() -> io::Result<Self> {
        let epfd = cvt(unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) })?;
        Ok(Self { epfd })
    }

    /// Register a listening socket, level-triggered.
    pub fn add_listener(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, LISTENER_MASK)
    }

    /// Register a client control socket, edge-triggered and one-shot.
    pub fn add_client(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, CLIENT_MASK)
    }

    /// Re-arm a client socket after its handler finished.
    pub fn rearm_client(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, CLIENT_MASK)
    }

    pub fn delete(&self, fd: RawFd) -> io::Result<()> {
        cvt(unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut()) })?;
        Ok(())
    }

    /// Wait for readiness, filling `out`. `None` blocks indefinitely.
    pub fn wait(&self, out: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        let mut buf: [libc::epoll_event; MAX_EVENTS] = unsafe { std::mem::zeroed() };
        let timeout_ms = match timeout {
            Some(d) => i32::try_from(d.as_millis()).unwrap_or(i32::MAX),
            None => -1,
        };

        let n = loop {
            let rc = unsafe {
                libc::epoll_wait(self.epfd, buf.as_mut_ptr(), MAX_EVENTS as i32, timeout_ms)
            };
            match cvt(rc) {
                Ok(n) => break n as usize,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };

        out.clear();
        out.extend(buf[..n].iter().map(|ev| Event { fd: ev.u64 as RawFd }));
        Ok(())
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: u32) -> io::Result<()> {
        let mut ev = libc::epoll_event { events, u64: fd as u64 };
        cvt(unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) })?;
        Ok(())
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
        }
    }
}

pub(crate) fn cvt(rc: libc::c_int) -> io::Result<libc::c_int> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}
