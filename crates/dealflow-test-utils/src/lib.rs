//! Stubs and fixtures shared by the Dealflow crates' tests.

pub mod backend;
pub mod fixtures;
pub mod sinks;
pub mod store;

pub use backend::{RecordedCall, Scripted, ScriptedBackend};
pub use sinks::{FailingSink, RecordingSink};
pub use store::FailingStore;
