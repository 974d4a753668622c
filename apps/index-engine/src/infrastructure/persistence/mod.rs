//! Persistence Adapters
//!
//! Implementations of the `IndexRepository` port.
//!
//! - `InMemoryIndexRepository`: process-local, for tests and ephemeral runs
//! - `JsonFileIndexRepository`: single JSON document, replaced atomically

mod in_memory;
mod json_file;

pub use in_memory::InMemoryIndexRepository;
pub use json_file::{DEFAULT_HISTORY_CAP, JsonFileIndexRepository};
