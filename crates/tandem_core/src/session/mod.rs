//! Sessions: the top-level handle for collaborating on one entity.

mod manager;
mod session;

pub use manager::SessionManager;
pub use session::{Mutation, Session};
