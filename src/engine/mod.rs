//! The event-sourced state machine over channels (§4.D) and the
//! scheduled-action queue that drives timed on-chain reactions (§4.E).
//!
//! Both halves are pure: no I/O, parameterized only by the [`Snapshot`]
//! they're handed and (for the reducer) the current block number. The
//! main loop (`service.rs`) is the only place either one is actually
//! invoked against real state.

mod intents;
mod reducer;
mod scheduler;

pub use intents::ChainIntent;
pub use reducer::{apply, ReducerConfig};
pub use scheduler::due_actions;
