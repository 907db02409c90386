use crate::raft::types::{NodeId, Term};
use crate::storage::log_storage::RaftLog;
use crate::util::errors::{RaftError, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Persistent state that must survive crashes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentState {
    /// Latest term server has seen (initialized to 0)
    pub current_term: Term,
    /// Candidate that received vote in current term (or None)
    pub voted_for: Option<NodeId>,
    /// The log, including its snapshot boundary
    pub log: RaftLog,
}

/// Borrowed view with the same encoding as `PersistentState`
#[derive(Serialize)]
struct PersistentStateRef<'a> {
    current_term: Term,
    voted_for: Option<NodeId>,
    log: &'a RaftLog,
}

impl PersistentState {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Self::encode_parts(self.current_term, self.voted_for, &self.log)
    }

    pub fn encode_parts(
        current_term: Term,
        voted_for: Option<NodeId>,
        log: &RaftLog,
    ) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&PersistentStateRef {
            current_term,
            voted_for,
            log,
        })?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Durable storage for the node's state blob and its latest snapshot.
///
/// `save` must be durable when it returns. When a snapshot is supplied, state
/// and snapshot are one unit: recovery observes both or neither.
pub trait Persister: Send + Sync {
    fn save(&self, raft_state: &[u8], snapshot: Option<&[u8]>) -> Result<()>;
    fn read_raft_state(&self) -> Result<Option<Vec<u8>>>;
    fn read_snapshot(&self) -> Result<Option<Vec<u8>>>;
    fn raft_state_size(&self) -> Result<u64>;

    fn save_state(&self, state: &PersistentState, snapshot: Option<&[u8]>) -> Result<()> {
        let encoded = state.encode()?;
        self.save(&encoded, snapshot)
    }

    fn load_state(&self) -> Result<PersistentState> {
        match self.read_raft_state()? {
            Some(bytes) if !bytes.is_empty() => PersistentState::decode(&bytes),
            _ => Ok(PersistentState::default()),
        }
    }
}

/// On-disk wrapper naming the snapshot generation the state belongs to
#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    snapshot_generation: u64,
    raft_state: Vec<u8>,
}

/// File-based persister.
///
/// Layout under `data_dir`:
/// - `raft_state.bin`: bincode `StateFile`
/// - `snapshot-<generation>.bin`: raw snapshot bytes
///
/// Every file is written to a temp file, fsynced and renamed into place. A
/// compaction writes the new snapshot generation first and then the state file
/// naming it, so the rename of the state file is the commit point.
pub struct FilePersister {
    data_dir: PathBuf,
    generation: Mutex<u64>,
}

impl FilePersister {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        // Create data directory if it doesn't exist
        fs::create_dir_all(&data_dir)?;

        let generation = match read_file(&Self::state_path(&data_dir))? {
            Some(bytes) => bincode::deserialize::<StateFile>(&bytes)?.snapshot_generation,
            None => 0,
        };

        let persister = Self {
            data_dir,
            generation: Mutex::new(generation),
        };
        persister.remove_stale_snapshots(generation)?;

        tracing::info!(
            "Opened persister at {} (snapshot generation {})",
            persister.data_dir.display(),
            generation
        );

        Ok(persister)
    }

    fn state_path(data_dir: &Path) -> PathBuf {
        data_dir.join("raft_state.bin")
    }

    fn snapshot_path(&self, generation: u64) -> PathBuf {
        self.data_dir.join(format!("snapshot-{}.bin", generation))
    }

    /// Snapshot files left behind by a crash before their state file was renamed,
    /// or superseded ones whose removal did not complete
    fn remove_stale_snapshots(&self, current: u64) -> Result<()> {
        for entry in fs::read_dir(&self.data_dir)? {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            let generation = name
                .strip_prefix("snapshot-")
                .and_then(|rest| rest.strip_suffix(".bin"))
                .and_then(|g| g.parse::<u64>().ok());
            if let Some(generation) = generation {
                if generation != current {
                    remove_if_exists(&self.snapshot_path(generation))?;
                }
            }
        }
        Ok(())
    }

    fn lock_generation(&self) -> Result<std::sync::MutexGuard<'_, u64>> {
        self.generation
            .lock()
            .map_err(|_| RaftError::StorageError("persister lock poisoned".to_string()))
    }
}

impl Persister for FilePersister {
    fn save(&self, raft_state: &[u8], snapshot: Option<&[u8]>) -> Result<()> {
        let mut generation = self.lock_generation()?;

        let previous = *generation;
        let next = match snapshot {
            Some(data) => {
                let next = previous + 1;
                write_atomic(&self.snapshot_path(next), data)?;
                next
            }
            None => previous,
        };

        let encoded = bincode::serialize(&StateFile {
            snapshot_generation: next,
            raft_state: raft_state.to_vec(),
        })?;
        write_atomic(&Self::state_path(&self.data_dir), &encoded)?;

        if next != previous {
            *generation = next;
            remove_if_exists(&self.snapshot_path(previous))?;
        }

        Ok(())
    }

    fn read_raft_state(&self) -> Result<Option<Vec<u8>>> {
        let _generation = self.lock_generation()?;
        match read_file(&Self::state_path(&self.data_dir))? {
            Some(bytes) => Ok(Some(
                bincode::deserialize::<StateFile>(&bytes)?.raft_state,
            )),
            None => Ok(None),
        }
    }

    fn read_snapshot(&self) -> Result<Option<Vec<u8>>> {
        let generation = self.lock_generation()?;
        if *generation == 0 {
            return Ok(None);
        }
        read_file(&self.snapshot_path(*generation))
    }

    fn raft_state_size(&self) -> Result<u64> {
        Ok(self.read_raft_state()?.map(|s| s.len() as u64).unwrap_or(0))
    }
}

fn read_file(path: &Path) -> Result<Option<Vec<u8>>> {
    if !path.exists() {
        return Ok(None);
    }

    let mut file = File::open(path)?;
    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer)?;
    Ok(Some(buffer))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)?;

    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&temp_path, path)?;

    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Default, Clone)]
struct MemImage {
    raft_state: Option<Vec<u8>>,
    snapshot: Option<Vec<u8>>,
}

/// In-memory persister shared between clones.
///
/// A restarted node should be given a `duplicate()` so the old instance can no
/// longer write into the new one's storage.
#[derive(Debug, Clone, Default)]
pub struct MemPersister {
    image: Arc<Mutex<MemImage>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemPersister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deep copy with independent storage
    pub fn duplicate(&self) -> Result<Self> {
        let image = self.lock()?.clone();
        Ok(Self {
            image: Arc::new(Mutex::new(image)),
            fail_writes: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Make every subsequent `save` fail, to exercise the fatal path
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemImage>> {
        self.image
            .lock()
            .map_err(|_| RaftError::StorageError("persister lock poisoned".to_string()))
    }
}

impl Persister for MemPersister {
    fn save(&self, raft_state: &[u8], snapshot: Option<&[u8]>) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RaftError::StorageError("write rejected".to_string()));
        }

        let mut image = self.lock()?;
        image.raft_state = Some(raft_state.to_vec());
        if let Some(data) = snapshot {
            image.snapshot = Some(data.to_vec());
        }
        Ok(())
    }

    fn read_raft_state(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.lock()?.raft_state.clone())
    }

    fn read_snapshot(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.lock()?.snapshot.clone())
    }

    fn raft_state_size(&self) -> Result<u64> {
        Ok(self
            .lock()?
            .raft_state
            .as_ref()
            .map(|s| s.len() as u64)
            .unwrap_or(0))
    }
}
