//! Storage collaborator boundary for the `units` and `movement_entries`
//! collections.
//!
//! Every write that touches both collections is a single atomic command on the
//! store (movement commit, cascading delete, catalog edits carrying an
//! adjustment entry), so callers never observe one half without the other.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryInventoryStore;
pub use postgres::PostgresInventoryStore;
pub use r#trait::{InventoryStore, StoreError};
