//! The crash-consistent persistence layer (§4.C).
//!
//! [`Store`] owns every persisted entity from §3. The state engine never
//! talks to the database directly — the main loop (`service.rs`) loads a
//! [`Snapshot`], folds the reducer over it in memory, and hands the
//! resulting snapshot back to the store inside a single transaction per
//! tick (§4.H).

mod schema_version;
mod store;

pub use schema_version::SCHEMA_VERSION;
pub use store::{Snapshot, Store};
