use std::fs::{self, File, Metadata};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, warn};

use crate::accountant::MemoryAccountant;
use crate::error::{DhbError, Result};
use crate::platform;
use crate::space::SpaceManager;
use crate::stats::BackupStats;

/// Bytes read from the source per chunk.
pub const CHUNK_SIZE: usize = 256 * 1024;

/// Chunks buffered per channel, bounding per-file read-ahead to
/// `CHANNEL_CAPACITY * CHUNK_SIZE` bytes of underlying storage.
pub const CHANNEL_CAPACITY: usize = 32;

// ---------------------------------------------------------------------------
// Cancellation flag
// ---------------------------------------------------------------------------

/// Cooperative per-file cancellation state, observed by all three pipeline
/// tasks at chunk boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyState {
    /// Normal operation.
    Running,
    /// The source hash matched the previous set's record: stop writing,
    /// remove the partial destination, hard-link instead.
    CancelWrite,
    /// A task failed; everyone stops promptly.
    Abort,
}

#[derive(Debug, Default)]
pub struct CopyFlag(AtomicU8);

impl CopyFlag {
    pub fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    pub fn state(&self) -> CopyState {
        match self.0.load(Ordering::SeqCst) {
            0 => CopyState::Running,
            1 => CopyState::CancelWrite,
            _ => CopyState::Abort,
        }
    }

    pub fn cancel_write(&self) {
        self.0.store(1, Ordering::SeqCst);
    }

    pub fn abort(&self) {
        self.0.store(2, Ordering::SeqCst);
    }

    pub fn is_abort(&self) -> bool {
        self.state() == CopyState::Abort
    }
}

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// What the previous backup set knows about the same relative path:
/// the manifest hash plus a fresh stat of the previous copy.
#[derive(Debug, Clone, PartialEq)]
pub struct PrevFileRecord {
    /// Absolute path of the file inside the previous set.
    pub abs_path: PathBuf,
    pub size: u64,
    pub mtime_ns: i64,
    pub md5: [u8; 16],
}

/// One file to copy into the new set.
pub struct FileCopyJob<'a> {
    pub source: &'a Path,
    pub dest: &'a Path,
    /// Metadata captured by the walker before the copy started.
    pub metadata: &'a Metadata,
    pub prev: Option<&'a PrevFileRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyOutcome {
    pub hard_linked: bool,
    pub hash: [u8; 16],
}

// ---------------------------------------------------------------------------
// Per-file entry point
// ---------------------------------------------------------------------------

/// Copy one regular file into the new set.
///
/// Fast path first: when the source's (size, mtime) equals the previous
/// set's copy, the destination becomes a hard link without reading a byte.
/// Otherwise the file is streamed through the reader/hasher/writer
/// pipeline; if the digest turns out to match the previous record anyway,
/// the in-flight write is cancelled and the destination is linked instead.
pub fn copy_file(
    job: &FileCopyJob<'_>,
    flag: &CopyFlag,
    accountant: &MemoryAccountant,
    stats: &BackupStats,
    space: &mut SpaceManager,
) -> Result<CopyOutcome> {
    let size = job.metadata.len();

    if let Some(prev) = job.prev {
        if prev.size == size && prev.mtime_ns == platform::mtime_ns(job.metadata) {
            fs::hard_link(&prev.abs_path, job.dest).map_err(|source| DhbError::HardLink {
                path: job.dest.to_path_buf(),
                source,
            })?;
            stats.add_file_hard_linked(size);
            debug!(dest = %job.dest.display(), "unchanged (size+mtime), hard-linked");
            return Ok(CopyOutcome {
                hard_linked: true,
                hash: prev.md5,
            });
        }
    }

    space.ensure_room_for(size)?;
    stream_copy(job, flag, accountant, stats)
}

fn stream_copy(
    job: &FileCopyJob<'_>,
    flag: &CopyFlag,
    accountant: &MemoryAccountant,
    stats: &BackupStats,
) -> Result<CopyOutcome> {
    let (write_tx, write_rx) = bounded::<Arc<[u8]>>(CHANNEL_CAPACITY);
    let (hash_tx, hash_rx) = bounded::<Arc<[u8]>>(CHANNEL_CAPACITY);
    let (digest_tx, digest_rx) = bounded::<[u8; 16]>(1);

    let src = job.source;
    let dst = job.dest;

    thread::scope(|s| {
        let reader = s.spawn(move || read_source(src, write_tx, hash_tx, flag, accountant, stats));
        let hasher = s.spawn(move || hash_chunks(hash_rx, digest_tx, flag));
        let writer = s.spawn(move || write_dest(dst, write_rx, flag, accountant, stats));

        // The digest arrives once the reader hits end-of-stream; the writer
        // may still have queued chunks at that point.
        let digest = digest_rx.recv();

        let mut link_target = None;
        if let (Ok(digest), Some(prev)) = (&digest, job.prev) {
            if *digest == prev.md5 {
                link_target = Some(prev);
                flag.cancel_write();
            }
        }

        let reader_result = join_task(reader, "reader")?;
        let writer_result = join_task(writer, "writer")?;
        join_task(hasher, "hasher")?;

        match (digest, link_target) {
            (Ok(digest), Some(prev)) => {
                // The writer stopped at a chunk boundary and removed its
                // partial output, or finished before the cancel landed.
                if dst.exists() {
                    fs::remove_file(dst)?;
                }
                fs::hard_link(&prev.abs_path, dst).map_err(|source| DhbError::HardLink {
                    path: dst.to_path_buf(),
                    source,
                })?;
                stats.add_file_hard_linked(job.metadata.len());
                debug!(dest = %dst.display(), "content unchanged, write cancelled and hard-linked");
                Ok(CopyOutcome {
                    hard_linked: true,
                    hash: digest,
                })
            }
            (Ok(digest), None) => {
                writer_result?;
                reader_result?;
                platform::restore_metadata(job.metadata, dst)?;
                stats.add_file_copied(job.metadata.len());
                Ok(CopyOutcome {
                    hard_linked: false,
                    hash: digest,
                })
            }
            (Err(_), _) => {
                // Aborted before a digest was produced: surface whichever
                // task actually failed.
                Err(writer_result
                    .err()
                    .or(reader_result.err())
                    .unwrap_or_else(|| {
                        DhbError::Other("pipeline aborted without a task error".into())
                    }))
            }
        }
    })
}

fn join_task<T>(handle: thread::ScopedJoinHandle<'_, T>, name: &str) -> Result<T> {
    handle
        .join()
        .map_err(|_| DhbError::Other(format!("{name} task panicked")))
}

// ---------------------------------------------------------------------------
// Pipeline tasks
// ---------------------------------------------------------------------------

/// Reader: pull chunks off the source, reserve their bytes, and fan each
/// chunk out to the writer and the hasher. Both sends are bounded, so a
/// slow destination backpressures the reader through the write channel.
fn read_source(
    src: &Path,
    write_tx: Sender<Arc<[u8]>>,
    hash_tx: Sender<Arc<[u8]>>,
    flag: &CopyFlag,
    accountant: &MemoryAccountant,
    stats: &BackupStats,
) -> Result<()> {
    let mut file = match File::open(src) {
        Ok(file) => file,
        Err(source) => {
            flag.abort();
            return Err(DhbError::OpenSource {
                path: src.to_path_buf(),
                source,
            });
        }
    };

    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        if flag.is_abort() {
            return Ok(());
        }
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(source) => {
                flag.abort();
                return Err(DhbError::ReadIo {
                    path: src.to_path_buf(),
                    source,
                });
            }
        };
        stats.add_bytes_read(n as u64);

        if !accountant.reserve(n as u64, flag) {
            // Aborted while waiting for buffer room.
            return Ok(());
        }
        let chunk: Arc<[u8]> = Arc::from(&buf[..n]);

        if write_tx.send(Arc::clone(&chunk)).is_err() {
            // The writer is gone; it owns the failure and already set Abort.
            accountant.release(n as u64);
            return if flag.is_abort() {
                Ok(())
            } else {
                Err(DhbError::Other("writer stopped before end of stream".into()))
            };
        }
        if hash_tx.send(chunk).is_err() {
            return if flag.is_abort() {
                Ok(())
            } else {
                Err(DhbError::Other("hasher stopped before end of stream".into()))
            };
        }
    }
    // Dropping the senders closes both channels: end-of-stream.
    Ok(())
}

/// Hasher: fold chunks into an incremental MD5 and emit the digest when
/// the input closes. On Abort the digest is withheld so the orchestrator
/// sees the failure instead of a truncated hash.
fn hash_chunks(hash_rx: Receiver<Arc<[u8]>>, digest_tx: Sender<[u8; 16]>, flag: &CopyFlag) {
    let mut context = md5::Context::new();
    for chunk in hash_rx {
        context.consume(&chunk);
    }
    if flag.is_abort() {
        return;
    }
    let _ = digest_tx.send(context.compute().0);
}

/// Writer: stream chunks to the destination in arrival (= read) order,
/// re-checking the cancellation flag before every write. Releases each
/// chunk's reservation whether it was written or skipped, and never
/// leaves a partial destination behind on any cancelled or failed path.
fn write_dest(
    dst: &Path,
    write_rx: Receiver<Arc<[u8]>>,
    flag: &CopyFlag,
    accountant: &MemoryAccountant,
    stats: &BackupStats,
) -> Result<()> {
    let mut file = match File::create(dst) {
        Ok(file) => file,
        Err(source) => {
            flag.abort();
            drain(&write_rx, accountant);
            return Err(DhbError::CreateDestination {
                path: dst.to_path_buf(),
                source,
            });
        }
    };

    for chunk in &write_rx {
        if flag.state() != CopyState::Running {
            accountant.release(chunk.len() as u64);
            drop(file);
            remove_partial(dst);
            drain(&write_rx, accountant);
            return Ok(());
        }
        if let Err(source) = file.write_all(&chunk) {
            flag.abort();
            accountant.release(chunk.len() as u64);
            drop(file);
            remove_partial(dst);
            drain(&write_rx, accountant);
            return Err(DhbError::WriteIo {
                path: dst.to_path_buf(),
                source,
            });
        }
        stats.add_bytes_written(chunk.len() as u64);
        accountant.release(chunk.len() as u64);
    }

    // End of stream. If the file was cancelled or aborted right at the
    // boundary, the output is still not wanted.
    if flag.state() != CopyState::Running {
        drop(file);
        remove_partial(dst);
    }
    Ok(())
}

/// Receive and discard the rest of a channel, returning each chunk's bytes
/// to the accountant. Blocks until the sender side closes, which happens
/// promptly because the reader observes the flag between chunks.
fn drain(rx: &Receiver<Arc<[u8]>>, accountant: &MemoryAccountant) {
    for chunk in rx {
        accountant.release(chunk.len() as u64);
    }
}

fn remove_partial(dst: &Path) {
    if let Err(e) = fs::remove_file(dst) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(dest = %dst.display(), error = %e, "could not remove partial destination");
        }
    }
}
