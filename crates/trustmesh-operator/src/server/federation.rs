//! Federation subsystem: validation plus the routable HTTPS endpoint.
//!
//! The bundle endpoint is exposed on `federation.<trust-domain>` with a TLS
//! termination strategy chosen by the endpoint profile:
//!
//! - SPIFFE-authenticated → passthrough, the server terminates TLS with its
//!   SVID and HTTP is redirected to HTTPS.
//! - Web-PKI with ACME → re-encrypt; the server obtains its own certificate.
//! - Web-PKI with a serving cert → re-encrypt with an external-certificate
//!   reference; the reader RBAC pair must exist before the route.

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use trustmesh_common::constants::{
    components, names, selector_labels, standard_labels, OPERATOR_NAMESPACE,
};
use trustmesh_common::crd::{
    string_to_bool, BundleEndpointConfig, BundleEndpointProfile, FederationConfig, Route,
    RoutePort, RouteSecretReference, RouteSpec, RouteTargetReference, RouteTls, SpireServerSpec,
    TLS_TERMINATION_PASSTHROUGH, TLS_TERMINATION_REENCRYPT,
};

use super::statefulset::SERVER_APP_NAME;

/// Most federates-with entries a single server accepts.
const MAX_FEDERATES_WITH: usize = 50;

/// Validate the whole federation block against the server's own trust
/// domain. Pure; all failures are user-input errors.
pub fn validate_federation_config(
    federation: &FederationConfig,
    trust_domain: &str,
) -> Result<(), String> {
    validate_bundle_endpoint(&federation.bundle_endpoint)?;

    if federation.federates_with.len() > MAX_FEDERATES_WITH {
        return Err(format!(
            "federatesWith cannot exceed {MAX_FEDERATES_WITH} entries, got {}",
            federation.federates_with.len()
        ));
    }
    for (index, remote) in federation.federates_with.iter().enumerate() {
        validate_federated_trust_domain(remote, index, trust_domain)?;
    }
    Ok(())
}

fn validate_bundle_endpoint(endpoint: &BundleEndpointConfig) -> Result<(), String> {
    if endpoint.profile == BundleEndpointProfile::HttpsWeb {
        let Some(https_web) = &endpoint.https_web else {
            return Err("httpsWeb configuration is required when profile is https_web".to_string());
        };

        let acme_set = https_web.acme.is_some();
        let cert_set = https_web.serving_cert.is_some();
        if acme_set && cert_set {
            return Err("acme and servingCert are mutually exclusive, only one can be set".to_string());
        }
        if !acme_set && !cert_set {
            return Err("either acme or servingCert must be set for https_web profile".to_string());
        }

        if let Some(acme) = &https_web.acme {
            if !acme.directory_url.starts_with("https://") {
                return Err(format!(
                    "acme directoryUrl must use https://, got {}",
                    acme.directory_url
                ));
            }
            if acme.domain_name.is_empty() {
                return Err("acme domainName is required".to_string());
            }
            if acme.email.is_empty() {
                return Err("acme email is required".to_string());
            }
            if !crate::validation::validate_email(&acme.email) {
                return Err(format!("acme email {:?} is not a valid address", acme.email));
            }
            if !string_to_bool(&acme.tos_accepted) {
                return Err("acme tosAccepted must be true to use ACME".to_string());
            }
        }

        if let Some(serving_cert) = &https_web.serving_cert {
            if serving_cert.secret_name.is_empty() {
                return Err("servingCert secretName is required".to_string());
            }
            if serving_cert.file_sync_interval != 0
                && !(30..=3600).contains(&serving_cert.file_sync_interval)
            {
                return Err(format!(
                    "servingCert fileSyncInterval must be between 30 and 3600 seconds, got {}",
                    serving_cert.file_sync_interval
                ));
            }
        }
    }

    if !(1..=65535).contains(&endpoint.port) {
        return Err(format!("port must be between 1 and 65535, got {}", endpoint.port));
    }
    if endpoint.refresh_hint != 0 && !(60..=3600).contains(&endpoint.refresh_hint) {
        return Err(format!(
            "refreshHint must be between 60 and 3600 seconds, got {}",
            endpoint.refresh_hint
        ));
    }
    Ok(())
}

fn validate_federated_trust_domain(
    remote: &trustmesh_common::crd::FederatesWithConfig,
    index: usize,
    trust_domain: &str,
) -> Result<(), String> {
    if remote.trust_domain.is_empty() {
        return Err(format!("federatesWith[{index}]: trustDomain is required"));
    }
    if !crate::validation::validate_trust_domain(&remote.trust_domain) {
        return Err(format!(
            "federatesWith[{index}]: trustDomain {:?} is not a valid trust domain name",
            remote.trust_domain
        ));
    }
    if remote.trust_domain == trust_domain {
        return Err(format!(
            "federatesWith[{index}]: cannot federate with own trust domain {trust_domain}"
        ));
    }
    if !remote.bundle_endpoint_url.starts_with("https://") {
        return Err(format!(
            "federatesWith[{index}]: bundleEndpointUrl must use https://, got {}",
            remote.bundle_endpoint_url
        ));
    }
    if remote.bundle_endpoint_profile == BundleEndpointProfile::HttpsSpiffe {
        if remote.endpoint_spiffe_id.is_empty() {
            return Err(format!(
                "federatesWith[{index}]: endpointSpiffeId is required for https_spiffe profile"
            ));
        }
        if !remote.endpoint_spiffe_id.starts_with("spiffe://") {
            return Err(format!(
                "federatesWith[{index}]: endpointSpiffeId must start with spiffe://, got {}",
                remote.endpoint_spiffe_id
            ));
        }
    }
    Ok(())
}

/// Build the federation Service in front of the bundle endpoint.
pub fn build_federation_service(spec: &SpireServerSpec, federation: &FederationConfig) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(names::FEDERATION_SERVICE.to_string()),
            namespace: Some(OPERATOR_NAMESPACE.to_string()),
            labels: Some(standard_labels(
                SERVER_APP_NAME,
                components::CONTROL_PLANE,
                spec.common.labels.as_ref(),
            )),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            ports: Some(vec![ServicePort {
                name: Some("federation".to_string()),
                port: federation.bundle_endpoint.port,
                target_port: Some(IntOrString::Int(federation.bundle_endpoint.port)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            selector: Some(selector_labels(SERVER_APP_NAME)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The routable host of the federation endpoint.
pub fn federation_host(trust_domain: &str) -> String {
    format!("federation.{trust_domain}")
}

/// Build the federation Route with profile-driven TLS termination.
pub fn build_federation_route(spec: &SpireServerSpec, federation: &FederationConfig) -> Route {
    let tls = match federation.bundle_endpoint.profile {
        BundleEndpointProfile::HttpsSpiffe => RouteTls {
            termination: TLS_TERMINATION_PASSTHROUGH.to_string(),
            insecure_edge_termination_policy: Some("Redirect".to_string()),
            external_certificate: None,
        },
        BundleEndpointProfile::HttpsWeb => {
            let external_certificate = federation
                .bundle_endpoint
                .https_web
                .as_ref()
                .and_then(|web| web.serving_cert.as_ref())
                .filter(|cert| !cert.external_certificate.is_empty())
                .map(|cert| RouteSecretReference {
                    name: cert.external_certificate.clone(),
                });
            RouteTls {
                termination: TLS_TERMINATION_REENCRYPT.to_string(),
                insecure_edge_termination_policy: Some("Redirect".to_string()),
                external_certificate,
            }
        }
    };

    let mut route = Route::new(
        names::FEDERATION_ROUTE,
        RouteSpec {
            host: federation_host(&spec.trust_domain),
            to: RouteTargetReference::service(names::SPIRE_SERVER),
            port: Some(RoutePort {
                target_port: IntOrString::String("federation".to_string()),
            }),
            tls: Some(tls),
            wildcard_policy: "None".to_string(),
        },
    );
    route.metadata.namespace = Some(OPERATOR_NAMESPACE.to_string());
    route.metadata.labels = Some(standard_labels(
        SERVER_APP_NAME,
        components::CONTROL_PLANE,
        spec.common.labels.as_ref(),
    ));
    route
}

/// True when the serving-cert branch references an external certificate and
/// therefore needs the reader RBAC pair applied before the route.
pub fn external_certificate_secret(federation: &FederationConfig) -> Option<&str> {
    federation
        .bundle_endpoint
        .https_web
        .as_ref()
        .and_then(|web| web.serving_cert.as_ref())
        .map(|cert| cert.external_certificate.as_str())
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use trustmesh_common::crd::{AcmeConfig, FederatesWithConfig, HttpsWebConfig, ServingCertConfig};

    fn spec() -> SpireServerSpec {
        SpireServerSpec {
            trust_domain: "cluster1.example.com".to_string(),
            cluster_name: "c1".to_string(),
            ..Default::default()
        }
    }

    fn spiffe_endpoint() -> BundleEndpointConfig {
        BundleEndpointConfig {
            port: 8443,
            address: "0.0.0.0".to_string(),
            profile: BundleEndpointProfile::HttpsSpiffe,
            refresh_hint: 300,
            https_web: None,
        }
    }

    fn web_endpoint(https_web: HttpsWebConfig) -> BundleEndpointConfig {
        BundleEndpointConfig {
            port: 8443,
            address: "0.0.0.0".to_string(),
            profile: BundleEndpointProfile::HttpsWeb,
            refresh_hint: 300,
            https_web: Some(https_web),
        }
    }

    fn acme() -> AcmeConfig {
        AcmeConfig {
            directory_url: "https://acme-v02.api.letsencrypt.org/directory".to_string(),
            domain_name: "federation.cluster1.example.com".to_string(),
            email: "admin@example.com".to_string(),
            tos_accepted: "true".to_string(),
        }
    }

    fn serving_cert() -> ServingCertConfig {
        ServingCertConfig {
            secret_name: "spire-server-federation-tls".to_string(),
            file_sync_interval: 86400,
            external_certificate: "spire-server-federation-tls".to_string(),
        }
    }

    fn federation(endpoint: BundleEndpointConfig) -> FederationConfig {
        FederationConfig {
            bundle_endpoint: endpoint,
            federates_with: Vec::new(),
            managed_route: "true".to_string(),
        }
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Story: a federates-with entry naming our own trust domain is rejected.
    #[test]
    fn story_self_federation_is_rejected() {
        let mut config = federation(spiffe_endpoint());
        config.federates_with.push(FederatesWithConfig {
            trust_domain: "cluster1.example.com".to_string(),
            bundle_endpoint_url: "https://federation.cluster1.example.com".to_string(),
            bundle_endpoint_profile: BundleEndpointProfile::HttpsSpiffe,
            endpoint_spiffe_id: "spiffe://cluster1.example.com/spire/server".to_string(),
        });
        let err = validate_federation_config(&config, "cluster1.example.com").unwrap_err();
        assert!(err.contains("own trust domain"));
    }

    #[test]
    fn web_profile_requires_exactly_one_of_acme_or_serving_cert() {
        let both = federation(web_endpoint(HttpsWebConfig {
            acme: Some(acme()),
            serving_cert: Some(serving_cert()),
        }));
        assert!(validate_federation_config(&both, "cluster1.example.com")
            .unwrap_err()
            .contains("mutually exclusive"));

        let neither = federation(web_endpoint(HttpsWebConfig::default()));
        assert!(validate_federation_config(&neither, "cluster1.example.com")
            .unwrap_err()
            .contains("either acme or servingCert"));

        let missing_block = federation(BundleEndpointConfig {
            https_web: None,
            ..web_endpoint(HttpsWebConfig::default())
        });
        assert!(validate_federation_config(&missing_block, "cluster1.example.com").is_err());
    }

    #[test]
    fn acme_requires_https_directory_and_accepted_tos() {
        let mut bad_acme = acme();
        bad_acme.directory_url = "http://acme.example.com".to_string();
        let config = federation(web_endpoint(HttpsWebConfig {
            acme: Some(bad_acme),
            serving_cert: None,
        }));
        assert!(validate_federation_config(&config, "cluster1.example.com").is_err());

        let mut unaccepted = acme();
        unaccepted.tos_accepted = "false".to_string();
        let config = federation(web_endpoint(HttpsWebConfig {
            acme: Some(unaccepted),
            serving_cert: None,
        }));
        assert!(validate_federation_config(&config, "cluster1.example.com")
            .unwrap_err()
            .contains("tosAccepted"));

        let mut bad_email = acme();
        bad_email.email = "not-an-email".to_string();
        let config = federation(web_endpoint(HttpsWebConfig {
            acme: Some(bad_email),
            serving_cert: None,
        }));
        assert!(validate_federation_config(&config, "cluster1.example.com").is_err());
    }

    #[test]
    fn refresh_hint_and_port_bounds() {
        let mut out_of_range = spiffe_endpoint();
        out_of_range.refresh_hint = 59;
        assert!(validate_federation_config(&federation(out_of_range), "td").is_err());

        let mut zero_hint = spiffe_endpoint();
        zero_hint.refresh_hint = 0;
        assert!(validate_federation_config(&federation(zero_hint), "td").is_ok());

        let mut bad_port = spiffe_endpoint();
        bad_port.port = 0;
        assert!(validate_federation_config(&federation(bad_port), "td").is_err());
    }

    #[test]
    fn file_sync_interval_bounds() {
        let mut cert = serving_cert();
        cert.file_sync_interval = 86400;
        let config = federation(web_endpoint(HttpsWebConfig {
            acme: None,
            serving_cert: Some(cert),
        }));
        // 86400 exceeds the one-hour ceiling.
        assert!(validate_federation_config(&config, "cluster1.example.com")
            .unwrap_err()
            .contains("fileSyncInterval"));

        let mut cert = serving_cert();
        cert.file_sync_interval = 300;
        let config = federation(web_endpoint(HttpsWebConfig {
            acme: None,
            serving_cert: Some(cert),
        }));
        assert!(validate_federation_config(&config, "cluster1.example.com").is_ok());
    }

    #[test]
    fn spiffe_remote_requires_spiffe_endpoint_id() {
        let mut config = federation(spiffe_endpoint());
        config.federates_with.push(FederatesWithConfig {
            trust_domain: "cluster2.example.com".to_string(),
            bundle_endpoint_url: "https://federation.cluster2.example.com".to_string(),
            bundle_endpoint_profile: BundleEndpointProfile::HttpsSpiffe,
            endpoint_spiffe_id: String::new(),
        });
        assert!(validate_federation_config(&config, "cluster1.example.com")
            .unwrap_err()
            .contains("endpointSpiffeId"));

        config.federates_with[0].endpoint_spiffe_id = "https://wrong-scheme".to_string();
        assert!(validate_federation_config(&config, "cluster1.example.com")
            .unwrap_err()
            .contains("spiffe://"));
    }

    #[test]
    fn federates_with_is_capped_at_fifty() {
        let mut config = federation(spiffe_endpoint());
        for i in 0..51 {
            config.federates_with.push(FederatesWithConfig {
                trust_domain: format!("cluster{i}.example.org"),
                bundle_endpoint_url: format!("https://federation.cluster{i}.example.org"),
                bundle_endpoint_profile: BundleEndpointProfile::HttpsWeb,
                endpoint_spiffe_id: String::new(),
            });
        }
        assert!(validate_federation_config(&config, "cluster1.example.com")
            .unwrap_err()
            .contains("50"));
    }

    // =========================================================================
    // Route and service
    // =========================================================================

    /// Story: SPIFFE profile terminates TLS as passthrough with an HTTP
    /// redirect — the server itself presents its SVID.
    #[test]
    fn story_spiffe_route_is_passthrough() {
        let route = build_federation_route(&spec(), &federation(spiffe_endpoint()));
        assert_eq!(route.spec.host, "federation.cluster1.example.com");
        let tls = route.spec.tls.unwrap();
        assert_eq!(tls.termination, TLS_TERMINATION_PASSTHROUGH);
        assert_eq!(tls.insecure_edge_termination_policy.as_deref(), Some("Redirect"));
        assert!(tls.external_certificate.is_none());
    }

    /// Story: web-PKI + ACME re-encrypts without an external certificate —
    /// the server obtains its own via ACME.
    #[test]
    fn story_acme_route_is_reencrypt_without_external_cert() {
        let config = federation(web_endpoint(HttpsWebConfig {
            acme: Some(acme()),
            serving_cert: None,
        }));
        let route = build_federation_route(&spec(), &config);
        let tls = route.spec.tls.unwrap();
        assert_eq!(tls.termination, TLS_TERMINATION_REENCRYPT);
        assert!(tls.external_certificate.is_none());
        assert!(external_certificate_secret(&config).is_none());
    }

    /// Story: the serving-cert branch re-encrypts and references the named
    /// secret as the route's external certificate.
    #[test]
    fn story_serving_cert_route_references_external_certificate() {
        let config = federation(web_endpoint(HttpsWebConfig {
            acme: None,
            serving_cert: Some(serving_cert()),
        }));
        let route = build_federation_route(&spec(), &config);
        let tls = route.spec.tls.unwrap();
        assert_eq!(tls.termination, TLS_TERMINATION_REENCRYPT);
        assert_eq!(
            tls.external_certificate.unwrap().name,
            "spire-server-federation-tls"
        );
        assert_eq!(
            external_certificate_secret(&config),
            Some("spire-server-federation-tls")
        );
    }

    #[test]
    fn federation_service_targets_the_bundle_endpoint_port() {
        let svc = build_federation_service(&spec(), &federation(spiffe_endpoint()));
        assert_eq!(svc.metadata.name.as_deref(), Some("spire-server-federation"));
        let port = &svc.spec.as_ref().unwrap().ports.as_ref().unwrap()[0];
        assert_eq!(port.port, 8443);
        assert_eq!(port.target_port, Some(IntOrString::Int(8443)));
    }

    #[test]
    fn route_targets_the_server_service_federation_port() {
        let route = build_federation_route(&spec(), &federation(spiffe_endpoint()));
        assert_eq!(route.spec.to.name, "spire-server");
        assert_eq!(
            route.spec.port.unwrap().target_port,
            IntOrString::String("federation".to_string())
        );
    }
}
