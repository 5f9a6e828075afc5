//! One-file-per-pair answer store
//!
//! Layout under the store root:
//!
//! ```text
//! pairs/<model>/<question>.json   committed answers
//! pairs/<model>/.<name>.tmp       in-progress writes, swept on open
//! pairs/<model>/<name>.corrupt    unreadable records moved aside
//! ```
//!
//! A record is first written and synced to a temp file, then published with
//! a hard link. Linking never replaces an existing file, so publication is
//! atomic and the first writer for a key wins.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use tracing::{debug, warn};

use super::{safe_name, Answer, AnswerStore, CommitOutcome, PairKey, StoreError, StoreResult};

const PAIRS_DIR: &str = "pairs";
const RECORD_EXT: &str = "json";
const TEMP_EXT: &str = "tmp";
const CORRUPT_EXT: &str = "corrupt";

/// Answer store backed by a directory tree
pub struct FileAnswerStore {
    root: PathBuf,
    index: RwLock<HashSet<PairKey>>,
    temp_counter: AtomicU64,
}

impl FileAnswerStore {
    /// Open (or create) a store and index every committed record.
    ///
    /// Leftover temp files from an interrupted run are deleted and
    /// unreadable records are renamed aside, which makes their pairs
    /// pending again.
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        let pairs = root.join(PAIRS_DIR);
        fs::create_dir_all(&pairs)
            .map_err(|e| StoreError::io(format!("creating {}", pairs.display()), e))?;

        let mut index = HashSet::new();
        let mut swept = 0usize;

        for model_entry in read_dir(&pairs)? {
            let model_dir = model_entry.path();
            if !model_dir.is_dir() {
                continue;
            }

            for entry in read_dir(&model_dir)? {
                let path = entry.path();
                match path.extension().and_then(|e| e.to_str()) {
                    Some(TEMP_EXT) => {
                        fs::remove_file(&path).map_err(|e| {
                            StoreError::io(format!("removing {}", path.display()), e)
                        })?;
                        swept += 1;
                    }
                    Some(RECORD_EXT) => match read_record(&path) {
                        Ok(answer) => {
                            index.insert(answer.key());
                        }
                        Err(e) => {
                            warn!(path = %path.display(), "Quarantining unreadable record: {}", e);
                            let aside = path.with_extension(CORRUPT_EXT);
                            fs::rename(&path, &aside).map_err(|e| {
                                StoreError::io(format!("quarantining {}", path.display()), e)
                            })?;
                        }
                    },
                    _ => {}
                }
            }
        }

        if swept > 0 {
            warn!(count = swept, "Removed temp files left by an interrupted run");
        }
        debug!(root = %root.display(), answers = index.len(), "Answer store opened");

        Ok(Self {
            root,
            index: RwLock::new(index),
            temp_counter: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn model_dir(&self, model_id: &str) -> PathBuf {
        self.root.join(PAIRS_DIR).join(safe_name(model_id))
    }

    fn record_path(&self, key: &PairKey) -> PathBuf {
        self.model_dir(&key.model_id)
            .join(format!("{}.{}", safe_name(&key.question_id), RECORD_EXT))
    }

    fn temp_path(&self, key: &PairKey) -> PathBuf {
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        self.model_dir(&key.model_id).join(format!(
            ".{}.{}-{}.{}",
            safe_name(&key.question_id),
            std::process::id(),
            n,
            TEMP_EXT
        ))
    }

    fn mark_indexed(&self, key: PairKey) {
        self.index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key);
    }

    /// Number of committed answers for one model
    pub fn count_for(&self, model_id: &str) -> usize {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|k| k.model_id == model_id)
            .count()
    }
}

impl AnswerStore for FileAnswerStore {
    fn contains(&self, key: &PairKey) -> bool {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    fn commit(&self, answer: &Answer) -> StoreResult<CommitOutcome> {
        let key = answer.key();
        if self.contains(&key) {
            return Ok(CommitOutcome::Duplicate);
        }

        let dir = self.model_dir(&key.model_id);
        fs::create_dir_all(&dir)
            .map_err(|e| StoreError::io(format!("creating {}", dir.display()), e))?;

        let final_path = self.record_path(&key);
        let temp_path = self.temp_path(&key);
        let body = serde_json::to_vec_pretty(answer)?;

        write_synced(&temp_path, &body)?;

        let linked = fs::hard_link(&temp_path, &final_path);
        // The temp name is never needed again, published or not
        let _ = fs::remove_file(&temp_path);

        match linked {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let existing = read_record(&final_path)?.key();
                if existing != key {
                    warn!(pair = %key, holder = %existing, "Record path already taken by another pair");
                    return Err(StoreError::Collision {
                        path: final_path.display().to_string(),
                        existing,
                        wanted: key,
                    });
                }
                debug!(pair = %key, "Discarding duplicate answer");
                self.mark_indexed(key);
                return Ok(CommitOutcome::Duplicate);
            }
            Err(e) => {
                return Err(StoreError::io(
                    format!("publishing {}", final_path.display()),
                    e,
                ))
            }
        }

        sync_dir(&dir)?;
        self.mark_indexed(key);
        Ok(CommitOutcome::Committed)
    }

    fn get(&self, key: &PairKey) -> StoreResult<Option<Answer>> {
        let path = self.record_path(key);
        match read_record(&path) {
            Ok(answer) if answer.key() == *key => Ok(Some(answer)),
            Ok(_) => Ok(None),
            Err(StoreError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn answers_for(&self, model_id: &str) -> StoreResult<Vec<Answer>> {
        let dir = self.model_dir(model_id);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut answers = Vec::new();
        for entry in read_dir(&dir)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            let answer = read_record(&path)?;
            // Guard against a hash-suffix collision between two model ids
            if answer.model_id == model_id {
                answers.push(answer);
            }
        }
        Ok(answers)
    }

    fn len(&self) -> usize {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn read_dir(dir: &Path) -> StoreResult<Vec<fs::DirEntry>> {
    fs::read_dir(dir)
        .map_err(|e| StoreError::io(format!("listing {}", dir.display()), e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StoreError::io(format!("listing {}", dir.display()), e))
}

fn read_record(path: &Path) -> StoreResult<Answer> {
    let bytes =
        fs::read(path).map_err(|e| StoreError::io(format!("reading {}", path.display()), e))?;
    serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

fn write_synced(path: &Path, body: &[u8]) -> StoreResult<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| StoreError::io(format!("creating {}", path.display()), e))?;
    file.write_all(body)
        .and_then(|_| file.sync_all())
        .map_err(|e| {
            let _ = fs::remove_file(path);
            StoreError::io(format!("writing {}", path.display()), e)
        })
}

/// Make the new directory entry itself durable
#[cfg(unix)]
fn sync_dir(dir: &Path) -> StoreResult<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| StoreError::io(format!("syncing {}", dir.display()), e))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> StoreResult<()> {
    Ok(())
}
