//! Custom resource definitions for the TrustMesh control plane.
//!
//! All five operator CRs are cluster-scoped singletons named `cluster`. The
//! `TrustMesh` CR owns the four operand CRs; each operand CR owns its derived
//! child objects, so deleting the top-level CR cascades through the whole
//! installation.

mod agent;
mod common;
mod csi;
mod oidc;
mod operator_condition;
mod route;
mod scc;
mod server;
mod spiffe;
mod trust_mesh;

pub use agent::{SpireAgent, SpireAgentSpec, SpireAgentStatus};
pub use common::{
    parse_duration, string_to_bool, CommonConfig, ConditionalStatus, HasConditionalStatus,
    OperandStatus,
};
pub use csi::{SpiffeCsiDriver, SpiffeCsiDriverSpec, SpiffeCsiDriverStatus};
pub use oidc::{
    ExternalSecretRef, SpireOidcDiscoveryProvider, SpireOidcDiscoveryProviderSpec,
    SpireOidcDiscoveryProviderStatus,
};
pub use operator_condition::{OperatorCondition, OperatorConditionSpec, OperatorConditionStatus};
pub use route::{
    Route, RoutePort, RouteSecretReference, RouteSpec, RouteStatus, RouteTargetReference,
    RouteTls, TLS_TERMINATION_PASSTHROUGH, TLS_TERMINATION_REENCRYPT,
};
pub use scc::{SccStrategy, SecurityContextConstraints};
pub use server::{
    AcmeConfig, BundleEndpointConfig, BundleEndpointProfile, CaSubject, DataStore, DatabaseType,
    FederatesWithConfig, FederationConfig, HttpsWebConfig, KeyManager, Persistence,
    PersistenceType, ServingCertConfig, SpireServer, SpireServerSpec, SpireServerStatus,
};
pub use spiffe::{ClusterSPIFFEID, ClusterSPIFFEIDSpec};
pub use trust_mesh::{TrustMesh, TrustMeshSpec, TrustMeshStatus};

/// API group of the operator's own CRDs.
pub const GROUP: &str = "trustmesh.io";

/// The one allowed name for every singleton CR.
pub const SINGLETON_NAME: &str = "cluster";

/// Kind strings, used in operand summaries and log messages.
pub mod kinds {
    pub const TRUST_MESH: &str = "TrustMesh";
    pub const SPIRE_SERVER: &str = "SpireServer";
    pub const SPIRE_AGENT: &str = "SpireAgent";
    pub const SPIFFE_CSI_DRIVER: &str = "SpiffeCsiDriver";
    pub const OIDC_DISCOVERY_PROVIDER: &str = "SpireOidcDiscoveryProvider";
}
