//! wavecast — a shared-playlist internet radio broadcaster.
//!
//! Every connected listener hears the same stream: a server-side song queue
//! drained in fixed-size chunks and fanned out to all audio sockets in
//! lock-step. Listeners drive the playlist over a paired control socket
//! with a small binary protocol (upload a file into the library, enqueue a
//! library file) and receive JSON state documents after every change.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use wavecast_server::config;
use wavecast_server::pool::WorkerPool;
use wavecast_server::server::{Server, ServerOpts};
use wavecast_server::streamer;

#[derive(Parser, Debug)]
#[command(name = "wavecast-server")]
struct Args {
    /// TCP port for the control channel
    control_port: u16,

    /// TCP port for the audio broadcast channel
    audio_port: u16,

    /// Song library directory
    #[arg(long, default_value = config::DEFAULT_LIBRARY_ROOT)]
    library: PathBuf,
}

fn main() -> Result<()> {
    // Setup failures of any kind exit non-zero, bad arguments included.
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            std::process::exit(1);
        }
        Err(e) => e.exit(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let server = Arc::new(Server::bind(&ServerOpts {
        control_port: args.control_port,
        audio_port: args.audio_port,
        library_root: args.library,
    })?);

    let shutdown = Arc::new(AtomicBool::new(false));
    let signal_shutdown = shutdown.clone();
    let _ = ctrlc::set_handler(move || {
        signal_shutdown.store(true, Ordering::Relaxed);
    });

    let control_addr = server.control_addr().context("control listener address")?;
    let audio_addr = server.audio_addr().context("audio listener address")?;
    info!(control = %control_addr, audio = %audio_addr, "radio is up");

    let streamer = streamer::spawn(server.clone(), shutdown.clone()).context("spawn streamer")?;
    let mut pool = WorkerPool::new(config::WORKER_COUNT, config::JOB_QUEUE_DEPTH)?;

    let result = server.run(&pool, &shutdown);

    shutdown.store(true, Ordering::Relaxed);
    pool.shutdown();
    let _ = streamer.join();
    result
}
