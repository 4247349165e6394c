//! OIDC discovery provider configuration rendering.

use serde_json::{json, Value};
use url::Url;

use trustmesh_common::constants::{names, OPERATOR_NAMESPACE};
use trustmesh_common::crd::SpireOidcDiscoveryProviderSpec;
use trustmesh_common::{Error, Result};

/// Mount path of the provider's serving certificate.
pub const OIDC_TLS_MOUNT_PATH: &str = "/etc/oidc/tls";

/// Workload API socket path inside the provider container (CSI volume).
pub const WORKLOAD_API_SOCKET: &str = "/spiffe-workload-api/spire-agent.sock";

/// The externally routable host of the discovery document.
///
/// Prefers the configured issuer's host so the discovery endpoint serves the
/// URL tokens actually carry; falls back to a trust-domain-derived host.
pub fn oidc_host(spec: &SpireOidcDiscoveryProviderSpec) -> String {
    Url::parse(&spec.jwt_issuer)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| format!("oidc-discovery.{}", spec.trust_domain))
}

/// Render oidc-discovery-provider.conf as canonical indented JSON.
pub fn render_oidc_conf(spec: &SpireOidcDiscoveryProviderSpec) -> Result<String> {
    let conf = oidc_conf_value(spec)?;
    serde_json::to_string_pretty(&conf)
        .map_err(|e| Error::rendering_for("oidc-discovery-provider.conf", e.to_string()))
}

/// Build the provider's configuration document.
pub fn oidc_conf_value(spec: &SpireOidcDiscoveryProviderSpec) -> Result<Value> {
    if spec.trust_domain.is_empty() {
        return Err(Error::rendering_for(
            "oidc-discovery-provider.conf",
            "trust domain is empty",
        ));
    }

    let service = names::OIDC_DISCOVERY_PROVIDER;
    let domains = vec![
        service.to_string(),
        format!("{service}.{OPERATOR_NAMESPACE}"),
        format!("{service}.{OPERATOR_NAMESPACE}.svc.cluster.local"),
        oidc_host(spec),
    ];

    Ok(json!({
        "domains": domains,
        "health_checks": {
            "bind_port": "8008",
            "live_path": "/live",
            "ready_path": "/ready"
        },
        "log_level": spec.log_level.to_uppercase(),
        "serving_cert_file": {
            "addr": ":8443",
            "cert_file_path": format!("{OIDC_TLS_MOUNT_PATH}/tls.crt"),
            "key_file_path": format!("{OIDC_TLS_MOUNT_PATH}/tls.key")
        },
        "workload_api": {
            "socket_path": WORKLOAD_API_SOCKET,
            "trust_domain": spec.trust_domain
        }
    }))
}
