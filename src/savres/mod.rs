//! Saving array records to disk and restoring them at startup.
//!
//! Each record's data is kept in a file named after the record, holding the
//! raw array contents with no header. Writes go through a [`SavResWriter`],
//! which does the file I/O on its own thread so record processing never
//! blocks on the disk.

use std::{
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    thread::{self, JoinHandle},
};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

mod devsup;

pub use devsup::{SavResArray, SavResDevSup, SavResPrivate};

/// Depth of the writer's queue
pub const QUEUE_DEPTH: usize = 10;

#[derive(Error, Debug)]
pub enum SavResError {
    #[error("Unable to {action} '{}': {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        source: io::Error,
    },
    #[error("Unable to start the data writer: {0}")]
    Spawn(io::Error),
    #[error("The data writer queue is full")]
    QueueFull,
    #[error("The data writer has stopped")]
    WriterStopped,
    #[error("Link must be of type VME_IO")]
    BadLinkType,
    #[error("Invalid array descriptor #{card}; only {count} are configured")]
    BadCard { card: u32, count: usize },
    #[error("Invalid instance #{instance}; the array has only {count}")]
    BadInstance { instance: u32, count: usize },
    #[error("Record is already connected to an array")]
    AlreadyConnected,
    #[error("Array storage holds {len} elements, {needed} are needed")]
    StorageTooSmall { len: usize, needed: usize },
    #[error("Record is not connected to an array")]
    NotConnected,
}

fn data_file(dir: Option<&Path>, name: &str) -> PathBuf {
    match dir {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

/// Write `data` to the file `name` in `dir` (or the current directory)
///
/// A file that could not be written completely is removed.
pub fn dump_data(dir: Option<&Path>, name: &str, data: &[u8]) -> Result<(), SavResError> {
    let path = data_file(dir, name);
    let result = File::create(&path)
        .map_err(|source| SavResError::Io {
            action: "create",
            path: path.clone(),
            source,
        })
        .and_then(|mut file| {
            file.write_all(data).map_err(|source| SavResError::Io {
                action: "write",
                path: path.clone(),
                source,
            })
        });
    if result.is_err()
        && path.exists()
        && let Err(e) = fs::remove_file(&path)
    {
        warn!("Unable to remove incomplete file '{}': {e}", path.display());
    }
    result
}

/// Fill `data` from the file `name` in `dir` (or the current directory)
///
/// Returns the number of bytes read, which is less than requested for a
/// short file.
pub fn restore_data(
    dir: Option<&Path>,
    name: &str,
    data: &mut [u8],
) -> Result<usize, SavResError> {
    let path = data_file(dir, name);
    let mut file = File::open(&path).map_err(|source| SavResError::Io {
        action: "open",
        path: path.clone(),
        source,
    })?;
    let mut filled = 0;
    while filled < data.len() {
        match file.read(&mut data[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(SavResError::Io {
                    action: "read",
                    path,
                    source,
                });
            }
        }
    }
    if filled < data.len() {
        debug!(
            "Partial restore of '{}': {filled} of {} bytes",
            path.display(),
            data.len()
        );
    }
    Ok(filled)
}

#[derive(Debug)]
enum WriterJob {
    Dump { name: String, data: Vec<u8> },
    Flush(oneshot::Sender<()>),
}

/// Background writer for [`dump_data`]
#[derive(Debug)]
pub struct SavResWriter {
    dir: Option<PathBuf>,
    sender: mpsc::Sender<WriterJob>,
    thread: Option<JoinHandle<()>>,
}

impl SavResWriter {
    /// Start the writer thread, saving files under `dir`
    pub fn start(dir: Option<PathBuf>) -> Result<Self, SavResError> {
        let (sender, mut receiver) = mpsc::channel(QUEUE_DEPTH);
        let thread_dir = dir.clone();
        let thread = thread::Builder::new()
            .name("savres-writer".to_string())
            .spawn(move || {
                while let Some(job) = receiver.blocking_recv() {
                    match job {
                        WriterJob::Dump { name, data } => {
                            if let Err(e) = dump_data(thread_dir.as_deref(), &name, &data) {
                                error!("{name}: {e}");
                            }
                        }
                        WriterJob::Flush(done) => {
                            let _ = done.send(());
                        }
                    }
                }
                debug!("Data writer shutting down");
            })
            .map_err(SavResError::Spawn)?;
        Ok(SavResWriter {
            dir,
            sender,
            thread: Some(thread),
        })
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Queue `data` to be written to the file `name`
    ///
    /// Never blocks; fails if the queue is full.
    pub fn dump(&self, name: &str, data: Vec<u8>) -> Result<(), SavResError> {
        self.sender
            .try_send(WriterJob::Dump {
                name: name.to_string(),
                data,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SavResError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => SavResError::WriterStopped,
            })
    }

    /// Wait until everything queued so far has been written
    ///
    /// Blocks the calling thread, so must not be called from async code.
    pub fn flush(&self) -> Result<(), SavResError> {
        let (done, wait) = oneshot::channel();
        self.sender
            .blocking_send(WriterJob::Flush(done))
            .map_err(|_| SavResError::WriterStopped)?;
        wait.blocking_recv().map_err(|_| SavResError::WriterStopped)
    }
}

impl Drop for SavResWriter {
    fn drop(&mut self) {
        let (sender, _) = mpsc::channel(1);
        drop(std::mem::replace(&mut self.sender, sender));
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("Data writer thread panicked");
        }
    }
}

/// Encode array elements in the on-disk format
pub fn encode(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
}

/// Decode whole array elements from the on-disk format
pub fn decode(data: &[u8]) -> impl Iterator<Item = f32> + '_ {
    data.chunks_exact(4)
        .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("savres-{name}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn dump_and_restore() {
        let dir = scratch_dir("dump");
        dump_data(Some(&dir), "REC:A", &[1, 2, 3, 4, 5]).unwrap();

        let mut exact = [0u8; 5];
        assert_eq!(restore_data(Some(&dir), "REC:A", &mut exact).unwrap(), 5);
        assert_eq!(exact, [1, 2, 3, 4, 5]);

        // A short file is a partial restore
        let mut larger = [0u8; 8];
        assert_eq!(restore_data(Some(&dir), "REC:A", &mut larger).unwrap(), 5);
        assert_eq!(larger, [1, 2, 3, 4, 5, 0, 0, 0]);

        assert!(matches!(
            restore_data(Some(&dir), "REC:MISSING", &mut larger),
            Err(SavResError::Io { action: "open", .. })
        ));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn failed_dump_leaves_no_file() {
        let dir = scratch_dir("missing").join("not-there");
        assert!(dump_data(Some(&dir), "REC", &[0]).is_err());
        assert!(!dir.join("REC").exists());
    }

    #[test]
    fn writer_writes_in_background() {
        let dir = scratch_dir("writer");
        let writer = SavResWriter::start(Some(dir.clone())).unwrap();
        writer.dump("REC:B", encode(&[1.5, -2.0])).unwrap();
        writer.flush().unwrap();
        let mut data = [0u8; 8];
        assert_eq!(restore_data(Some(&dir), "REC:B", &mut data).unwrap(), 8);
        assert_eq!(decode(&data).collect::<Vec<_>>(), vec![1.5, -2.0]);
        drop(writer);
        fs::remove_dir_all(&dir).unwrap();
    }
}
