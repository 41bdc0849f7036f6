//! # Controller
//!
//! Core controller modules.
//!
//! - `backoff`: Exponential token backoff and the jittered reconcile error delay
//! - `events`: Kubernetes Event recording
//! - `reconciler`: Reconciliation logic for both managed kinds
//! - `resolver`: Reference resolution (`ref+vault://`, `ref+k8s://`, ...)
//! - `store`: Kubernetes object access used by the reconcilers
//! - `template`: Output templates and template hashing
//!
//! The `crdgen` binary lives next to these modules but is not part of the library.

pub mod backoff;
pub mod events;
pub mod reconciler;
pub mod resolver;
pub mod store;
pub mod template;
