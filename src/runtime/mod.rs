//! # Runtime
//!
//! Process start-up and the long-running watch loops.
//!
//! - `initialization.rs` - tracing, metrics server, backend session, start-up reconciliation
//! - `watch_loop.rs` - one controller per managed kind, restarted when its stream ends
//! - `error_policy.rs` - reconciliation error backoff and watch stream error handling

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;

pub use initialization::{initialize, InitializationResult};
pub use watch_loop::run_watch_loop;
