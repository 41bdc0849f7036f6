//! # Reconciler
//!
//! Core reconciliation logic for `ManagedStaticSecret` and
//! `ManagedLeasedCredential` resources.
//!
//! Both reconcilers:
//! - Skip namespaces listed in `EXCLUDE_NAMESPACES`
//! - Guard destination Secret cleanup with a finalizer
//! - Write one owned destination Secret per object
//! - Return errors to the error policy, which requeues with a jittered backoff
//!
//! ## Module Structure
//!
//! - `types.rs` - Shared [`Reconciler`] context and [`ReconcilerError`]
//! - `static_secret.rs` - Reference resolution, templates and database rotation
//! - `leased_credential.rs` - Lease issue, renewal, revocation and rollouts
//! - `utils.rs` - Finalizers, timestamps and Secret writes

pub mod leased_credential;
pub mod static_secret;
pub mod types;
pub mod utils;

pub use types::{Clock, Reconciler, ReconcilerError};
