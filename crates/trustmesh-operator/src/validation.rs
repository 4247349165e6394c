//! Spec validators shared by the operand reconcilers.
//!
//! Validation failures are user-input problems: they surface as a
//! `ConfigurationValid=False` condition and never requeue. TTL ratio
//! findings are warnings only — surfaced as events and a warning-reason
//! `True` condition without blocking reconciliation.

use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use crate::config::ProxySettings;
use trustmesh_common::crd::{parse_duration, SpireServerSpec};

/// Outcome of TTL validation: a hard error, or zero or more warnings.
#[derive(Clone, Debug, Default)]
pub struct TtlValidation {
    /// Fatal misconfiguration; reconciliation must not proceed
    pub error: Option<String>,
    /// Suspicious-but-legal ratios, surfaced as events
    pub warnings: Vec<String>,
    /// Message for the TTL condition
    pub status_message: String,
}

/// Validate the CA validity against the default SVID TTLs.
///
/// Hard requirements: all three durations parse, all are positive, and the
/// CA validity covers both SVID TTLs. Warnings fire when an SVID TTL
/// approaches the CA validity, since rotation then races CA expiry.
pub fn validate_ttl_durations(spec: &SpireServerSpec) -> TtlValidation {
    let mut result = TtlValidation::default();

    let ca = match parse_duration(&spec.ca_validity) {
        Ok(d) => d,
        Err(e) => return ttl_error(format!("invalid caValidity: {e}")),
    };
    let x509 = match parse_duration(&spec.default_x509_validity) {
        Ok(d) => d,
        Err(e) => return ttl_error(format!("invalid defaultX509Validity: {e}")),
    };
    let jwt = match parse_duration(&spec.default_jwt_validity) {
        Ok(d) => d,
        Err(e) => return ttl_error(format!("invalid defaultJWTValidity: {e}")),
    };

    if ca.is_zero() {
        return ttl_error("caValidity must be greater than zero".to_string());
    }
    if x509.is_zero() {
        return ttl_error("defaultX509Validity must be greater than zero".to_string());
    }
    if jwt.is_zero() {
        return ttl_error("defaultJWTValidity must be greater than zero".to_string());
    }
    if x509 > ca {
        return ttl_error(format!(
            "caValidity ({}) must be at least defaultX509Validity ({})",
            spec.ca_validity, spec.default_x509_validity
        ));
    }
    if jwt > ca {
        return ttl_error(format!(
            "caValidity ({}) must be at least defaultJWTValidity ({})",
            spec.ca_validity, spec.default_jwt_validity
        ));
    }

    // SPIRE rotates SVIDs at half their TTL; an SVID TTL above half the CA
    // validity leaves rotation racing CA expiry.
    if x509 * 2 > ca {
        result.warnings.push(format!(
            "defaultX509Validity ({}) is more than half of caValidity ({}); X.509 SVID rotation may race CA expiry",
            spec.default_x509_validity, spec.ca_validity
        ));
    }
    if jwt * 2 > ca {
        result.warnings.push(format!(
            "defaultJWTValidity ({}) is more than half of caValidity ({}); JWT SVID rotation may race CA expiry",
            spec.default_jwt_validity, spec.ca_validity
        ));
    }

    result.status_message = if result.warnings.is_empty() {
        "TTL configuration is valid".to_string()
    } else {
        result.warnings.join("; ")
    };
    result
}

fn ttl_error(message: String) -> TtlValidation {
    TtlValidation {
        status_message: message.clone(),
        error: Some(message),
        warnings: Vec::new(),
    }
}

/// Validate a JWT issuer URL: parseable, scheme + host only.
pub fn validate_jwt_issuer(issuer: &str) -> Result<(), String> {
    if issuer.trim().is_empty() {
        return Err("JWT issuer URL must not be empty".to_string());
    }
    let url = Url::parse(issuer).map_err(|e| format!("JWT issuer URL does not parse: {e}"))?;
    if url.host_str().unwrap_or("").is_empty() {
        return Err("JWT issuer URL must include a host".to_string());
    }
    if !matches!(url.path(), "" | "/") {
        return Err(format!(
            "JWT issuer URL must not include a path, got {:?}",
            url.path()
        ));
    }
    if url.query().is_some() {
        return Err("JWT issuer URL must not include a query".to_string());
    }
    if url.fragment().is_some() {
        return Err("JWT issuer URL must not include a fragment".to_string());
    }
    Ok(())
}

/// Validate proxy configuration: a configured proxy requires the trusted CA
/// bundle ConfigMap, otherwise operand TLS through the proxy cannot be
/// verified.
pub fn validate_proxy(proxy: &ProxySettings) -> Result<(), String> {
    if proxy.proxy_enabled() && proxy.trusted_ca_bundle_config_map.trim().is_empty() {
        return Err(
            "cluster proxy is configured but TRUSTED_CA_BUNDLE_CONFIGMAP is not set; \
             a trusted CA bundle ConfigMap is required when a proxy is in use"
                .to_string(),
        );
    }
    Ok(())
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("static regex")
    })
}

/// Validate an ACME registration e-mail address.
pub fn validate_email(email: &str) -> bool {
    email_regex().is_match(email)
}

fn trust_domain_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9._-]{1,255}$").expect("static regex"))
}

/// Validate a trust domain name.
pub fn validate_trust_domain(trust_domain: &str) -> bool {
    trust_domain_regex().is_match(trust_domain)
}
