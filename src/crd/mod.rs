//! # Custom Resource Definitions
//!
//! CRD types for the controller.
//!
//! ## Module Structure
//!
//! - `static_secret.rs` - `ManagedStaticSecret`, values resolved from references
//! - `leased_credential.rs` - `ManagedLeasedCredential`, leased database credentials

mod leased_credential;
mod static_secret;

pub use leased_credential::{
    ManagedLeasedCredential, ManagedLeasedCredentialSpec, RolloutTarget, VaultRole,
};
pub use static_secret::{
    DataSource, Database, DatabaseLoginCredentials, ManagedStaticSecret, ManagedStaticSecretSpec,
};
