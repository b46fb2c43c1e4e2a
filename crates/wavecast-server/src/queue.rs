//! Shared song queue feeding the broadcast stream.
//!
//! Enqueued songs record their byte length once, at enqueue time, plus a
//! cursor of bytes already streamed. The streamer drains the front of the
//! deque one chunk at a time; enqueue also pushes to the front, so the most
//! recently enqueued song starts playing next.
//!
//! Files are opened fresh on every pull; the queue never holds a file
//! handle across calls.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result};

use crate::config::CHUNK_SIZE;

#[derive(Debug)]
struct QueuedSong {
    path: PathBuf,
    len: u64,
    /// Bytes already streamed; nondecreasing until the song is popped.
    cursor: u64,
}

pub struct SongQueue {
    root: PathBuf,
    chunk_size: usize,
    songs: RwLock<VecDeque<QueuedSong>>,
}

impl SongQueue {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_chunk_size(root, CHUNK_SIZE)
    }

    pub(crate) fn with_chunk_size(root: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self {
            root: root.into(),
            chunk_size,
            songs: RwLock::new(VecDeque::new()),
        }
    }

    /// Enqueue a library-relative name at the draining end.
    ///
    /// The file's length is captured here and never re-checked.
    pub fn enqueue(&self, name: &str) -> Result<()> {
        let path = self.root.join(name);
        let len = fs::metadata(&path)
            .with_context(|| format!("stat queued song {}", path.display()))?
            .len();
        let mut songs = self.songs.write().unwrap();
        songs.push_front(QueuedSong { path, len, cursor: 0 });
        Ok(())
    }

    /// Display names in drain order.
    pub fn snapshot_names(&self) -> Vec<String> {
        let songs = self.songs.read().unwrap();
        songs
            .iter()
            .map(|song| display_name(&self.root, &song.path))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.read().unwrap().is_empty()
    }

    /// Produce the next chunk of audio, or `None` when nothing is queued.
    ///
    /// The chunk is always exactly `chunk_size` bytes. When the front song
    /// runs out mid-chunk the read splices into the next song; the tail is
    /// zero-filled only when no successor exists. Songs are popped the
    /// moment their cursor reaches their recorded length.
    pub fn pull_chunk(&self) -> Result<Option<Vec<u8>>> {
        let mut songs = self.songs.write().unwrap();
        let mut chunk = vec![0u8; self.chunk_size];
        let mut filled = 0;

        while filled < self.chunk_size {
            let Some(front) = songs.front_mut() else {
                break;
            };
            let remaining = front.len - front.cursor;
            if remaining == 0 {
                songs.pop_front();
                continue;
            }

            let take = remaining.min((self.chunk_size - filled) as u64) as usize;
            let mut file = File::open(&front.path)
                .with_context(|| format!("open queued song {}", front.path.display()))?;
            file.seek(SeekFrom::Start(front.cursor))
                .with_context(|| format!("seek queued song {}", front.path.display()))?;
            file.read_exact(&mut chunk[filled..filled + take])
                .with_context(|| format!("read queued song {}", front.path.display()))?;

            front.cursor += take as u64;
            filled += take;
            if front.cursor == front.len {
                songs.pop_front();
            }
        }

        if filled == 0 {
            return Ok(None);
        }
        Ok(Some(chunk))
    }
}

fn display_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}
