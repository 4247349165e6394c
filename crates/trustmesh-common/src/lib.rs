//! Shared building blocks for the TrustMesh operator.
//!
//! This crate holds everything the reconcilers have in common: the CRD types
//! for the control plane and its four operands, the condition/status
//! machinery, the generic diff-and-apply helper, canonical config hashing,
//! event publishing and telemetry bootstrap.

pub mod conditions;
pub mod constants;
pub mod crd;
pub mod error;
pub mod events;
pub mod hash;
pub mod kube_utils;
pub mod status;
pub mod telemetry;

pub use error::Error;

/// Result alias used across the operator.
pub type Result<T, E = Error> = std::result::Result<T, E>;
