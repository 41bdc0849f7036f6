//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use vals_secret_controller::prelude::*;
//! ```

pub use crate::crd::*;

pub use crate::backend::{BackendError, BackendSession, DatabaseCredentials, LeaseOperations, SecretsClient};

pub use crate::controller::reconciler::{Clock, Reconciler, ReconcilerError};

pub use crate::config::ControllerConfig;

pub use crate::database::{DatabaseError, DatabaseRotator, PasswordChange};
