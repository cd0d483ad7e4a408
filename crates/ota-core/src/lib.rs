//! Core types for the OTA update client: device context, provides
//! tracking, configuration and the artifact interface shared by the
//! deployment client and the update-module driver.

pub mod artifact;
pub mod config;
pub mod context;
mod error;
pub mod provides;

pub use artifact::{Artifact, ArtifactHeader, Payload};
pub use config::OtaConfig;
pub use context::DeviceContext;
pub use error::ContextError;
pub use provides::{ClearsProvides, ProvidesMap};
