//! Document store: per-entity CRDT replicas and their update metadata.

mod schema;
mod store;
mod types;

pub use schema::Schema;
pub use store::DocumentStore;
pub use types::{UpdateOrigin, UpdateRecord};
