//! The chain boundary (§4.A, §4.G): reading confirmed logs off a JSON-RPC
//! node and submitting signed transactions back to it.
//!
//! Both directions are narrow traits so that tests exercise `service.rs`
//! against an in-memory double instead of a live node (§8 "Ambient test
//! tooling").

mod provider;
mod reader;
mod writer;

pub use provider::{AlloyProvider, ChainProvider, ReceiptStatus};
pub use reader::ChainReader;
pub use writer::ChainWriter;
