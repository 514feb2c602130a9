pub mod run_store;

pub use run_store::{InMemoryRunStore, RunStore};
