//! Compile-time tuning knobs.
//!
//! Only the two ports and the library root are runtime-configurable; the
//! rest of the server is sized here.

use std::time::Duration;

/// Bytes of audio broadcast per chunk.
pub const CHUNK_SIZE: usize = 4096;

/// Granule for streaming upload bodies from the control socket to disk.
pub const UPLOAD_CHUNK: usize = 4096;

/// Command-handling worker threads.
pub const WORKER_COUNT: usize = 4;

/// Capacity of the worker pool's job FIFO.
pub const JOB_QUEUE_DEPTH: usize = 64;

/// Where uploads land and enqueues resolve, unless `--library` says otherwise.
pub const DEFAULT_LIBRARY_ROOT: &str = "songs";

/// Listen backlog for both listeners.
pub const ACCEPT_BACKLOG: libc::c_int = 16;

/// Nominal broadcast rate: 48 kHz, 16-bit, stereo.
pub const BYTES_PER_SECOND: usize = 48_000 * 2 * 2;

/// Pacing interval between chunks so the stream tracks real time.
pub const STREAM_TICK: Duration =
    Duration::from_micros(CHUNK_SIZE as u64 * 1_000_000 / BYTES_PER_SECOND as u64);

/// Streamer poll interval while the queue is empty.
pub const IDLE_POLL: Duration = Duration::from_millis(25);

/// Dispatcher wakeup cadence for observing the shutdown flag.
pub const POLL_TIMEOUT: Duration = Duration::from_millis(250);

/// Pause before retrying a mid-command read that returned `WouldBlock`.
pub const FRAME_RETRY_DELAY: Duration = Duration::from_millis(1);
