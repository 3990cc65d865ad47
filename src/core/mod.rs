//! Core domain models
//!
//! Configuration, steps and their on-disk manifests, run state and the
//! error taxonomy shared by the rest of the crate.

pub mod config;
pub mod error;
pub mod manifest;
pub mod pipeline;
pub mod state;
pub mod step;

pub use error::PipelineError;
pub use manifest::{Artifact, OutputManifest};
pub use pipeline::*;
pub use state::*;
pub use step::*;
