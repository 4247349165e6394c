//! SpireServer — configuration for the SPIRE server operand.
//!
//! Covers the CA, SVID TTLs, datastore, persistence and the optional
//! multi-cluster federation block.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{CommonConfig, ConditionalStatus, HasConditionalStatus};

/// Specification for the SPIRE server operand.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "trustmesh.io",
    version = "v1alpha1",
    kind = "SpireServer",
    plural = "spireservers",
    status = "SpireServerStatus",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"TrustDomain","type":"string","jsonPath":".spec.trustDomain"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SpireServerSpec {
    /// Trust domain used for SPIFFE identifiers
    #[serde(default)]
    pub trust_domain: String,

    /// Cluster name for node attestation
    #[serde(default)]
    pub cluster_name: String,

    /// Logging level for the operand: debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Logging format for the operand: text, json
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Name of the ConfigMap the SPIRE bundle notifier publishes into
    #[serde(default = "default_bundle_config_map")]
    pub bundle_config_map: String,

    /// JWT issuer URL. Must be scheme + host only — no path, query or
    /// fragment.
    #[serde(default)]
    pub jwt_issuer: String,

    /// Validity period (TTL) for the server's own CA certificate
    #[serde(default = "default_ca_validity")]
    pub ca_validity: String,

    /// Default TTL for X.509 SVIDs issued to workloads
    #[serde(default = "default_x509_validity")]
    pub default_x509_validity: String,

    /// Default TTL for JWT SVIDs issued to workloads
    #[serde(default = "default_jwt_validity")]
    pub default_jwt_validity: String,

    /// Key manager configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_manager: Option<KeyManager>,

    /// Subject information for the SPIRE CA
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_subject: Option<CaSubject>,

    /// Volume settings for the server's data directory
    #[serde(default)]
    pub persistence: Persistence,

    /// SQL datastore backend configuration
    #[serde(default)]
    pub datastore: DataStore,

    /// Federation bundle endpoint and federated trust domains
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub federation: Option<FederationConfig>,

    #[serde(flatten)]
    pub common: CommonConfig,
}

// Default mirrors the serde/API defaults so hand-built specs behave like
// deserialized ones.
impl Default for SpireServerSpec {
    fn default() -> Self {
        Self {
            trust_domain: String::new(),
            cluster_name: String::new(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            bundle_config_map: default_bundle_config_map(),
            jwt_issuer: String::new(),
            ca_validity: default_ca_validity(),
            default_x509_validity: default_x509_validity(),
            default_jwt_validity: default_jwt_validity(),
            key_manager: None,
            ca_subject: None,
            persistence: Persistence::default(),
            datastore: DataStore::default(),
            federation: None,
            common: CommonConfig::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_bundle_config_map() -> String {
    "spire-bundle".to_string()
}

fn default_ca_validity() -> String {
    "24h".to_string()
}

fn default_x509_validity() -> String {
    "1h".to_string()
}

fn default_jwt_validity() -> String {
    "5m".to_string()
}

/// Volume-related settings for the server's data directory.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Persistence {
    /// Kind of volume to use
    #[serde(default, rename = "type")]
    pub type_: PersistenceType,

    /// Size of the persistent volume (e.g. "1Gi")
    #[serde(default = "default_persistence_size")]
    pub size: String,

    /// Access mode for the volume
    #[serde(default = "default_access_mode")]
    pub access_mode: String,

    /// Storage class for the PVC; empty selects the cluster default
    #[serde(default)]
    pub storage_class: String,

    /// Host path, used when type is hostPath
    #[serde(default)]
    pub host_path: String,
}

impl Default for Persistence {
    fn default() -> Self {
        Self {
            type_: PersistenceType::default(),
            size: default_persistence_size(),
            access_mode: default_access_mode(),
            storage_class: String::new(),
            host_path: String::new(),
        }
    }
}

fn default_persistence_size() -> String {
    "1Gi".to_string()
}

fn default_access_mode() -> String {
    "ReadWriteOnce".to_string()
}

/// Volume kinds supported for server persistence.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum PersistenceType {
    #[default]
    #[serde(rename = "pvc")]
    Pvc,
    #[serde(rename = "hostPath")]
    HostPath,
    #[serde(rename = "emptyDir")]
    EmptyDir,
}

/// SQL datastore backend configuration.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataStore {
    /// Database backend
    #[serde(default)]
    pub database_type: DatabaseType,

    /// Connection string or file path for the datastore
    #[serde(default = "default_connection_string")]
    pub connection_string: String,

    /// Extra DB options passed through verbatim
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,

    /// Secret holding client TLS material for the database connection
    #[serde(default)]
    pub tls_secret_name: String,

    /// TLS file paths inside the mounted secret
    #[serde(default)]
    pub root_ca_path: String,
    #[serde(default)]
    pub client_cert_path: String,
    #[serde(default)]
    pub client_key_path: String,

    /// Maximum open connections in the DB pool
    #[serde(default = "default_max_open_conns")]
    pub max_open_conns: i32,

    /// Maximum idle connections in the DB pool
    #[serde(default = "default_max_idle_conns")]
    pub max_idle_conns: i32,

    /// Max time (in seconds) a connection may live; 0 means unlimited
    #[serde(default)]
    pub conn_max_lifetime: i32,

    /// String-encoded flag disabling DB auto-migration ("true"/"false")
    #[serde(default = "default_false_string")]
    pub disable_migration: String,
}

impl Default for DataStore {
    fn default() -> Self {
        Self {
            database_type: DatabaseType::default(),
            connection_string: default_connection_string(),
            options: Vec::new(),
            tls_secret_name: String::new(),
            root_ca_path: String::new(),
            client_cert_path: String::new(),
            client_key_path: String::new(),
            max_open_conns: default_max_open_conns(),
            max_idle_conns: default_max_idle_conns(),
            conn_max_lifetime: 0,
            disable_migration: default_false_string(),
        }
    }
}

fn default_connection_string() -> String {
    "/run/spire/data/datastore.sqlite3".to_string()
}

fn default_max_open_conns() -> i32 {
    100
}

fn default_max_idle_conns() -> i32 {
    2
}

fn default_false_string() -> String {
    "false".to_string()
}

/// Supported SQL datastore backends.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseType {
    #[default]
    Sqlite3,
    Postgres,
    Mysql,
    AwsPostgresql,
    AwsMysql,
}

impl DatabaseType {
    /// Wire name used in the rendered server configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite3 => "sqlite3",
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
            Self::AwsPostgresql => "aws_postgresql",
            Self::AwsMysql => "aws_mysql",
        }
    }
}

/// Key manager settings for the server.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeyManager {
    /// String-encoded flag enabling the on-disk key manager
    #[serde(default = "default_true_string")]
    pub disk_enabled: String,

    /// String-encoded flag enabling the in-memory key manager
    #[serde(default = "default_false_string")]
    pub memory_enabled: String,
}

fn default_true_string() -> String {
    "true".to_string()
}

/// Subject information for the SPIRE CA certificate.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaSubject {
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub common_name: String,
}

/// Federation bundle endpoint and federated trust domains.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FederationConfig {
    /// This cluster's federation bundle endpoint
    pub bundle_endpoint: BundleEndpointConfig,

    /// Trust domains this cluster federates with (at most 50)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub federates_with: Vec<FederatesWithConfig>,

    /// String-encoded flag enabling the managed federation Route
    #[serde(default = "default_true_string")]
    pub managed_route: String,
}

/// How this cluster exposes its federation bundle.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BundleEndpointConfig {
    /// Port for the bundle endpoint
    #[serde(default = "default_federation_port")]
    pub port: i32,

    /// Address to bind the bundle endpoint to
    #[serde(default = "default_bind_address")]
    pub address: String,

    /// Authentication profile of the endpoint
    #[serde(default)]
    pub profile: BundleEndpointProfile,

    /// Bundle refresh interval hint in seconds; 0 omits the hint
    #[serde(default = "default_refresh_hint")]
    pub refresh_hint: i32,

    /// Web-PKI settings, required when profile is https_web
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_web: Option<HttpsWebConfig>,
}

fn default_federation_port() -> i32 {
    8443
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_refresh_hint() -> i32 {
    300
}

/// Authentication profile for a bundle endpoint.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum BundleEndpointProfile {
    /// SPIFFE-authenticated (default, recommended)
    #[default]
    #[serde(rename = "https_spiffe")]
    HttpsSpiffe,
    /// Web PKI (X.509 certificates from a public CA)
    #[serde(rename = "https_web")]
    HttpsWeb,
}

/// Web-PKI settings: exactly one of ACME or serving cert.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpsWebConfig {
    /// Automatic certificate management via ACME
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acme: Option<AcmeConfig>,

    /// Certificate from a Kubernetes Secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serving_cert: Option<ServingCertConfig>,
}

/// ACME certificate provisioning settings.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AcmeConfig {
    /// ACME directory URL; must use https://
    pub directory_url: String,

    /// Domain name for the certificate
    pub domain_name: String,

    /// E-mail for ACME account registration
    pub email: String,

    /// String-encoded acceptance of the CA's Terms of Service
    #[serde(default = "default_false_string")]
    pub tos_accepted: String,
}

/// Serving-certificate settings for the bundle endpoint.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServingCertConfig {
    /// Secret containing tls.crt and tls.key
    pub secret_name: String,

    /// How often the server re-reads the certificate files (seconds)
    #[serde(default = "default_file_sync_interval")]
    pub file_sync_interval: i32,

    /// Secret the managed Route references as its external certificate
    #[serde(default)]
    pub external_certificate: String,
}

fn default_file_sync_interval() -> i32 {
    300
}

/// A remote trust domain to federate with.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FederatesWithConfig {
    /// Remote trust domain name
    pub trust_domain: String,

    /// URL of the remote federation bundle endpoint; must use https://
    pub bundle_endpoint_url: String,

    /// Authentication profile of the remote endpoint
    #[serde(default)]
    pub bundle_endpoint_profile: BundleEndpointProfile,

    /// SPIFFE ID of the remote endpoint, required for https_spiffe
    #[serde(default)]
    pub endpoint_spiffe_id: String,
}

/// Status of the SPIRE server operand.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpireServerStatus {
    #[serde(flatten)]
    pub conditional_status: ConditionalStatus,
}

impl HasConditionalStatus for SpireServer {
    fn conditional_status(&self) -> Option<&ConditionalStatus> {
        self.status.as_ref().map(|s| &s.conditional_status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_defaults_match_api_contract() {
        let spec: SpireServerSpec = serde_json::from_str("{}").unwrap();
        assert_eq!(spec.log_level, "info");
        assert_eq!(spec.log_format, "text");
        assert_eq!(spec.bundle_config_map, "spire-bundle");
        assert_eq!(spec.ca_validity, "24h");
        assert_eq!(spec.default_x509_validity, "1h");
        assert_eq!(spec.default_jwt_validity, "5m");
        assert_eq!(spec.persistence.size, "1Gi");
        assert_eq!(spec.persistence.access_mode, "ReadWriteOnce");
        assert_eq!(spec.datastore.database_type, DatabaseType::Sqlite3);
        assert_eq!(
            spec.datastore.connection_string,
            "/run/spire/data/datastore.sqlite3"
        );
        assert_eq!(spec.datastore.max_open_conns, 100);
        assert_eq!(spec.datastore.max_idle_conns, 2);
    }

    #[test]
    fn federation_config_round_trips_camel_case() {
        let json = serde_json::json!({
            "bundleEndpoint": {
                "port": 8443,
                "address": "0.0.0.0",
                "profile": "https_spiffe",
                "refreshHint": 300
            },
            "federatesWith": [{
                "trustDomain": "cluster2.example.com",
                "bundleEndpointUrl": "https://federation.cluster2.example.com",
                "bundleEndpointProfile": "https_spiffe",
                "endpointSpiffeId": "spiffe://cluster2.example.com/spire/server"
            }],
            "managedRoute": "true"
        });
        let federation: FederationConfig = serde_json::from_value(json).unwrap();
        assert_eq!(
            federation.bundle_endpoint.profile,
            BundleEndpointProfile::HttpsSpiffe
        );
        assert_eq!(federation.federates_with.len(), 1);
        assert_eq!(
            federation.federates_with[0].endpoint_spiffe_id,
            "spiffe://cluster2.example.com/spire/server"
        );
    }

    #[test]
    fn database_type_wire_names() {
        assert_eq!(DatabaseType::Sqlite3.as_str(), "sqlite3");
        assert_eq!(DatabaseType::AwsPostgresql.as_str(), "aws_postgresql");
        let parsed: DatabaseType = serde_json::from_str("\"aws_mysql\"").unwrap();
        assert_eq!(parsed, DatabaseType::AwsMysql);
    }
}
