//! # CRD Generator
//!
//! Prints the CustomResourceDefinitions served by the controller as one
//! multi-document YAML stream.
//!
//! ## Usage
//!
//! ```bash
//! # Every CRD
//! cargo run --bin crdgen > config/crd/all.yaml
//!
//! # A single CRD
//! cargo run --bin crdgen -- --kind ExternalSecret | kubectl apply -f -
//! ```

use clap::Parser;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::core::CustomResourceExt;
use secret_sync_controller::crd::{
    ClusterGenerator, ClusterSecretStore, ExternalSecret, Fake, GeneratorState, Password,
    SecretStore, Uuid,
};

/// Print the controller's CRDs as YAML
#[derive(Parser)]
#[command(name = "crdgen", about = "Print the Secret Sync Controller CRDs", long_about = None)]
struct Cli {
    /// Only print the CRD for this kind (e.g. ExternalSecret)
    #[arg(short, long)]
    kind: Option<String>,
}

fn crds() -> Vec<CustomResourceDefinition> {
    vec![
        ExternalSecret::crd(),
        SecretStore::crd(),
        ClusterSecretStore::crd(),
        Password::crd(),
        Uuid::crd(),
        Fake::crd(),
        ClusterGenerator::crd(),
        GeneratorState::crd(),
    ]
}

fn main() {
    let cli = Cli::parse();
    let selected: Vec<CustomResourceDefinition> = crds()
        .into_iter()
        .filter(|crd| {
            cli.kind
                .as_deref()
                .is_none_or(|kind| crd.spec.names.kind.eq_ignore_ascii_case(kind))
        })
        .collect();
    if selected.is_empty() {
        eprintln!("No CRD matches kind {:?}", cli.kind.unwrap_or_default());
        std::process::exit(1);
    }

    println!("# This file is auto-generated by crdgen");
    println!("# DO NOT EDIT THIS FILE MANUALLY");
    println!("# Change the resource types under src/crd/ instead");
    for crd in selected {
        match serde_yaml::to_string(&crd) {
            Ok(yaml) => {
                println!("---");
                print!("{yaml}");
            }
            Err(e) => {
                eprintln!("Failed to serialize CRD {} to YAML: {e}", crd.spec.names.kind);
                std::process::exit(1);
            }
        }
    }
}
