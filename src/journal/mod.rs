use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

const JOURNAL_FILE_MODE: u32 = 0o644;

#[derive(Debug)]
pub enum JournalError {
    Open {
        path: PathBuf,
        source: io::Error,
    },
    Append {
        path: PathBuf,
        source: io::Error,
    },
    ReadBack {
        path: PathBuf,
        source: io::Error,
    },
    Remove {
        path: PathBuf,
        source: io::Error,
    },
}

impl fmt::Display for JournalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open { path, source } => {
                write!(f, "failed to open journal '{}': {source}", path.display())
            }
            Self::Append { path, source } => {
                write!(
                    f,
                    "failed to append to journal '{}': {source}",
                    path.display()
                )
            }
            Self::ReadBack { path, source } => {
                write!(
                    f,
                    "failed to read journal '{}' back: {source}",
                    path.display()
                )
            }
            Self::Remove { path, source } => {
                write!(f, "failed to remove journal '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for JournalError {}

/// The shared log store. A single mutex guards every file operation, so an
/// `append_and_snapshot` call is atomic with respect to all other appenders:
/// the snapshot always ends with the caller's own packet and never contains
/// a torn write from another session or the heartbeat.
pub struct Journal {
    path: PathBuf,
    file_lock: Mutex<()>,
}

impl Journal {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, bytes: &[u8]) -> Result<(), JournalError> {
        let _guard = self.lock();
        self.append_locked(bytes)
    }

    /// Appends the packet and reads the full journal back under one lock
    /// acquisition. The returned snapshot is exactly the journal as of this
    /// packet's append.
    pub fn append_and_snapshot(&self, bytes: &[u8]) -> Result<Vec<u8>, JournalError> {
        let _guard = self.lock();
        self.append_locked(bytes)?;

        let mut snapshot = Vec::new();
        let mut file = self.open_for_read()?;
        file.read_to_end(&mut snapshot)
            .map_err(|source| JournalError::ReadBack {
                path: self.path.clone(),
                source,
            })?;
        Ok(snapshot)
    }

    /// Streams the full current content to the sink, under the lock.
    pub fn read_all(&self, sink: &mut dyn Write) -> Result<u64, JournalError> {
        let _guard = self.lock();
        let mut file = self.open_for_read()?;
        io::copy(&mut file, sink).map_err(|source| JournalError::ReadBack {
            path: self.path.clone(),
            source,
        })
    }

    /// Deletes the journal file. A missing file is a benign no-op.
    pub fn remove(&self) -> Result<(), JournalError> {
        let _guard = self.lock();
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(JournalError::Remove {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn append_locked(&self, bytes: &[u8]) -> Result<(), JournalError> {
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        options.mode(JOURNAL_FILE_MODE);

        let mut file = options
            .open(&self.path)
            .map_err(|source| JournalError::Open {
                path: self.path.clone(),
                source,
            })?;

        file.write_all(bytes).map_err(|source| JournalError::Append {
            path: self.path.clone(),
            source,
        })
    }

    fn open_for_read(&self) -> Result<File, JournalError> {
        File::open(&self.path).map_err(|source| JournalError::Open {
            path: self.path.clone(),
            source,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.file_lock.lock().expect("journal file lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::Journal;

    fn unique_temp_journal(label: &str) -> Journal {
        let path = std::env::temp_dir().join(format!(
            "sockline-journal-test-{label}-{}-{}",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        Journal::at(path)
    }

    #[test]
    fn append_then_read_all_returns_written_bytes() {
        let journal = unique_temp_journal("roundtrip");

        journal.append(b"hello\n").expect("append should work");
        journal.append(b"world\n").expect("append should work");

        let mut content = Vec::new();
        journal
            .read_all(&mut content)
            .expect("read back should work");
        assert_eq!(content, b"hello\nworld\n");

        journal.remove().expect("cleanup should work");
    }

    #[test]
    fn snapshot_includes_the_just_appended_packet() {
        let journal = unique_temp_journal("snapshot");

        let first = journal
            .append_and_snapshot(b"alpha\n")
            .expect("first snapshot should work");
        assert_eq!(first, b"alpha\n");

        let second = journal
            .append_and_snapshot(b"beta\n")
            .expect("second snapshot should work");
        assert_eq!(second, b"alpha\nbeta\n");

        journal.remove().expect("cleanup should work");
    }

    #[test]
    fn remove_is_idempotent_when_file_is_absent() {
        let journal = unique_temp_journal("remove");

        journal.append(b"x\n").expect("append should work");
        journal.remove().expect("first remove should work");
        journal.remove().expect("second remove should be a no-op");
    }

    #[test]
    fn concurrent_appends_both_land_in_the_journal() {
        let journal = Arc::new(unique_temp_journal("concurrent"));

        let writers: Vec<_> = [b"from-a\n".as_slice(), b"from-b\n".as_slice()]
            .into_iter()
            .map(|packet| {
                let journal = Arc::clone(&journal);
                thread::spawn(move || {
                    let snapshot = journal
                        .append_and_snapshot(packet)
                        .expect("append should work");
                    (packet, snapshot)
                })
            })
            .collect();

        for handle in writers {
            let (packet, snapshot) = handle.join().expect("writer thread should finish");
            // A writer's snapshot always contains its own packet.
            assert!(
                snapshot
                    .windows(packet.len())
                    .any(|window| window == packet)
            );
        }

        let mut content = Vec::new();
        journal
            .read_all(&mut content)
            .expect("read back should work");
        assert_eq!(content.len(), b"from-a\nfrom-b\n".len());
        let text = String::from_utf8(content).expect("journal should be utf8 here");
        assert!(text.contains("from-a\n"));
        assert!(text.contains("from-b\n"));

        journal.remove().expect("cleanup should work");
    }
}
