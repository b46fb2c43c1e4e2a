//! wavecast broadcast server internals.
//!
//! The binary wires these together: a dispatcher thread multiplexes the
//! control plane with epoll, a worker pool applies client commands to the
//! library and song queue, and the streamer thread fans the queue head out
//! to every listener's audio socket.

/// Compile-time tuning knobs.
pub mod config;
/// On-disk song library.
pub mod library;
/// Worker pool consuming readiness events.
pub mod pool;
/// Edge-triggered readiness wrapper.
pub mod poller;
/// Shared song queue and chunk assembly.
pub mod queue;
/// Connected-client bookkeeping.
pub mod registry;
/// Listeners, dispatch, and the command protocol.
pub mod server;
/// JSON state document.
pub mod state;
/// Audio fan-out loop.
pub mod streamer;
