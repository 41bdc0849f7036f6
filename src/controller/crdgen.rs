//! # CRD Generator
//!
//! Generates Kubernetes CustomResourceDefinition (CRD) YAML for both managed
//! kinds from the Rust type definitions.
//!
//! ## Usage
//!
//! ```bash
//! # Generate CRD YAML
//! cargo run --bin crdgen > config/crd/crds.yaml
//!
//! # Generate and apply directly
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use kube::core::CustomResourceExt;
use vals_secret_controller::crd::{ManagedLeasedCredential, ManagedStaticSecret};

fn main() {
    let crds = [ManagedStaticSecret::crd(), ManagedLeasedCredential::crd()];

    println!("# This file is auto-generated by crdgen");
    println!("# DO NOT EDIT THIS FILE MANUALLY");
    println!("# Change the types in src/crd/ and regenerate instead");
    println!("#");
    for crd in &crds {
        match serde_yaml::to_string(crd) {
            Ok(yaml) => {
                println!("---");
                print!("{yaml}");
            }
            Err(e) => {
                eprintln!("Failed to serialize CRD to YAML: {e}");
                std::process::exit(1);
            }
        }
    }
}
