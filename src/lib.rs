//! Vals Secret Controller Library
//!
//! Kubernetes controller that keeps two kinds of Secrets in step with external
//! sources:
//!
//! - `ManagedStaticSecret` - values resolved from `ref+...` references, optionally
//!   templated and pushed to database users as passwords
//! - `ManagedLeasedCredential` - dynamic database credentials leased from
//!   Vault or OpenBao, renewed and reissued before they expire
//!
//! ## Quick Start
//!
//! ```rust
//! use vals_secret_controller::prelude::*;
//! ```

pub mod backend;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod database;
pub mod observability;
pub mod prelude;
pub mod runtime;
pub mod server;
