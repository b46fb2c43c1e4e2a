//! End-to-end tests: a live server on ephemeral ports, driven over real
//! control and audio sockets with the wire protocol.

use std::fs;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use wavecast_proto as proto;
use wavecast_server::pool::WorkerPool;
use wavecast_server::server::{Server, ServerOpts};
use wavecast_server::state::StateDoc;
use wavecast_server::streamer;

const DEADLINE: Duration = Duration::from_secs(10);
const CHUNK: usize = wavecast_server::config::CHUNK_SIZE;

struct Radio {
    control_addr: SocketAddr,
    audio_addr: SocketAddr,
    library_root: PathBuf,
    shutdown: Arc<AtomicBool>,
    dispatcher: Option<JoinHandle<()>>,
    streamer: Option<JoinHandle<()>>,
    _dir: tempfile::TempDir,
}

fn start_radio() -> Radio {
    let dir = tempfile::tempdir().unwrap();
    let library_root = dir.path().join("songs");
    let server = Arc::new(
        Server::bind(&ServerOpts {
            control_port: 0,
            audio_port: 0,
            library_root: library_root.clone(),
        })
        .unwrap(),
    );
    let control_addr = server.control_addr().unwrap();
    let audio_addr = server.audio_addr().unwrap();
    let shutdown = Arc::new(AtomicBool::new(false));

    let streamer = streamer::spawn(server.clone(), shutdown.clone()).unwrap();
    let dispatcher = {
        let shutdown = shutdown.clone();
        std::thread::spawn(move || {
            let mut pool = WorkerPool::new(2, 16).unwrap();
            server.run(&pool, &shutdown).unwrap();
            pool.shutdown();
        })
    };

    Radio {
        control_addr,
        audio_addr,
        library_root,
        shutdown,
        dispatcher: Some(dispatcher),
        streamer: Some(streamer),
        _dir: dir,
    }
}

impl Drop for Radio {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.dispatcher.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.streamer.take() {
            let _ = handle.join();
        }
    }
}

struct Listener {
    control: TcpStream,
    audio: TcpStream,
    states: Box<dyn Iterator<Item = serde_json::Result<StateDoc>>>,
}

/// Connect a client: control first, then audio, the order the server pairs
/// them in.
fn connect(radio: &Radio) -> Listener {
    let control = TcpStream::connect(radio.control_addr).unwrap();
    let audio = TcpStream::connect(radio.audio_addr).unwrap();
    control.set_read_timeout(Some(DEADLINE)).unwrap();
    audio.set_read_timeout(Some(DEADLINE)).unwrap();

    let reader = control.try_clone().unwrap();
    let states = Box::new(serde_json::Deserializer::from_reader(reader).into_iter::<StateDoc>());
    Listener {
        control,
        audio,
        states,
    }
}

impl Listener {
    fn next_state(&mut self) -> StateDoc {
        self.states
            .next()
            .expect("state stream ended")
            .expect("state document parse")
    }

    /// Consume broadcasts until one matches; broadcasts from other clients'
    /// commands may arrive in between.
    fn wait_for_state(&mut self, pred: impl Fn(&StateDoc) -> bool) -> StateDoc {
        let deadline = Instant::now() + DEADLINE;
        loop {
            let state = self.next_state();
            if pred(&state) {
                return state;
            }
            assert!(
                Instant::now() < deadline,
                "no matching state before deadline, last: {state:?}"
            );
        }
    }

    fn read_audio_exact(&mut self, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        self.audio.read_exact(&mut buf).unwrap();
        buf
    }
}

fn patterned(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_add(seed)).collect()
}

#[test]
fn upload_lands_in_library_and_state() {
    let radio = start_radio();
    let mut listener = connect(&radio);

    let first = listener.next_state();
    assert_eq!(first.active_listeners, 1);
    assert!(first.song_library.is_empty());
    assert!(first.song_queue.is_empty());

    proto::write_upload(&mut listener.control, "a.wav", &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();

    let state = listener.wait_for_state(|s| s.song_library.iter().any(|n| n == "a.wav"));
    assert_eq!(state.active_listeners, 1);
    assert!(state.song_queue.is_empty());
    assert_eq!(
        fs::read(radio.library_root.join("a.wav")).unwrap(),
        [0xDE, 0xAD, 0xBE, 0xEF]
    );
}

#[test]
fn enqueued_song_streams_in_exact_chunks() {
    let radio = start_radio();
    let body = patterned(10_000, 0);
    fs::create_dir_all(&radio.library_root).unwrap();
    fs::write(radio.library_root.join("a.wav"), &body).unwrap();

    let mut listener = connect(&radio);
    listener.next_state();

    proto::write_enqueue(&mut listener.control, "a.wav").unwrap();
    let state = listener.wait_for_state(|s| !s.song_queue.is_empty());
    assert_eq!(state.song_queue, ["a.wav"]);

    // 10000 bytes fit in three chunks; the tail of the third is zero-filled.
    let heard = listener.read_audio_exact(3 * CHUNK);
    assert_eq!(&heard[..10_000], &body[..]);
    assert!(heard[10_000..].iter().all(|&b| b == 0));
}

#[test]
fn back_to_back_commands_on_one_socket() {
    let radio = start_radio();
    let mut listener = connect(&radio);
    listener.next_state();

    // Upload and enqueue in a single burst; the server must finish parsing
    // the upload body before it reads the enqueue signature.
    let body = patterned(10_000, 7);
    let mut burst = Vec::new();
    proto::write_upload(&mut burst, "burst.wav", &body).unwrap();
    proto::write_enqueue(&mut burst, "burst.wav").unwrap();
    listener.control.write_all(&burst).unwrap();

    let state = listener.wait_for_state(|s| s.song_queue.iter().any(|n| n == "burst.wav"));
    assert!(state.song_library.iter().any(|n| n == "burst.wav"));
    assert_eq!(fs::read(radio.library_root.join("burst.wav")).unwrap(), body);
}

#[test]
fn disconnect_updates_listener_count() {
    let radio = start_radio();
    let first = connect(&radio);
    let mut second = connect(&radio);

    second.wait_for_state(|s| s.active_listeners == 2);

    // Closing both sockets surfaces as EOF on the control channel.
    drop(first);

    let state = second.wait_for_state(|s| s.active_listeners == 1);
    assert_eq!(state.active_listeners, 1);
}

#[test]
fn concurrent_enqueues_all_land() {
    let radio = start_radio();
    let names = ["s1.wav", "s2.wav", "s3.wav", "s4.wav"];
    fs::create_dir_all(&radio.library_root).unwrap();
    for name in names {
        // Large enough that nothing finishes streaming during the test.
        fs::write(radio.library_root.join(name), vec![0u8; 1 << 20]).unwrap();
    }

    let mut listeners: Vec<Listener> = (0..names.len()).map(|_| connect(&radio)).collect();
    listeners[0].wait_for_state(|s| s.active_listeners == names.len());

    let writers: Vec<_> = listeners
        .iter()
        .zip(names)
        .map(|(listener, name)| {
            let mut control = listener.control.try_clone().unwrap();
            std::thread::spawn(move || proto::write_enqueue(&mut control, name).unwrap())
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let state = listeners[0].wait_for_state(|s| s.song_queue.len() == names.len());
    let mut queued = state.song_queue.clone();
    queued.sort_unstable();
    assert_eq!(queued, names);
}
