pub mod log_storage;
pub mod state_storage;

pub use log_storage::RaftLog;
pub use state_storage::{FilePersister, MemPersister, PersistentState, Persister};
