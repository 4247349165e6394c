//! Route exposing the OIDC discovery document.
//!
//! Re-encrypt termination against the provider's platform-issued serving
//! cert; an external certificate can be swapped in via the same
//! RBAC-then-route sequencing the federation endpoint uses.

use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use trustmesh_common::constants::{components, names, standard_labels, OPERATOR_NAMESPACE};
use trustmesh_common::crd::{
    Route, RoutePort, RouteSecretReference, RouteSpec, RouteTargetReference, RouteTls,
    SpireOidcDiscoveryProviderSpec, TLS_TERMINATION_REENCRYPT,
};

use super::config::oidc_host;
use super::deployment::OIDC_APP_NAME;

/// Build the discovery provider's Route.
pub fn build_route(spec: &SpireOidcDiscoveryProviderSpec) -> Route {
    let external_certificate = spec
        .external_secret_ref
        .as_ref()
        .filter(|r| !r.secret_name.is_empty())
        .map(|r| RouteSecretReference {
            name: r.secret_name.clone(),
        });

    let mut route = Route::new(
        names::OIDC_ROUTE,
        RouteSpec {
            host: oidc_host(spec),
            to: RouteTargetReference::service(names::OIDC_DISCOVERY_PROVIDER),
            port: Some(RoutePort {
                target_port: IntOrString::String("https".to_string()),
            }),
            tls: Some(RouteTls {
                termination: TLS_TERMINATION_REENCRYPT.to_string(),
                insecure_edge_termination_policy: Some("Redirect".to_string()),
                external_certificate,
            }),
            wildcard_policy: "None".to_string(),
        },
    );
    route.metadata.namespace = Some(OPERATOR_NAMESPACE.to_string());
    route.metadata.labels = Some(standard_labels(
        OIDC_APP_NAME,
        components::DISCOVERY,
        spec.common.labels.as_ref(),
    ));
    route
}

#[cfg(test)]
mod tests {
    use super::*;
    use trustmesh_common::crd::ExternalSecretRef;

    fn spec() -> SpireOidcDiscoveryProviderSpec {
        SpireOidcDiscoveryProviderSpec {
            trust_domain: "cluster1.example.com".to_string(),
            jwt_issuer: "https://oidc-discovery.cluster1.example.com".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn route_host_is_the_issuer_host() {
        let route = build_route(&spec());
        assert_eq!(route.spec.host, "oidc-discovery.cluster1.example.com");
        let tls = route.spec.tls.unwrap();
        assert_eq!(tls.termination, TLS_TERMINATION_REENCRYPT);
        assert!(tls.external_certificate.is_none());
    }

    #[test]
    fn external_secret_ref_becomes_the_external_certificate() {
        let mut s = spec();
        s.external_secret_ref = Some(ExternalSecretRef {
            secret_name: "oidc-custom-tls".to_string(),
        });
        let route = build_route(&s);
        assert_eq!(
            route.spec.tls.unwrap().external_certificate.unwrap().name,
            "oidc-custom-tls"
        );
    }
}
