//! SPIRE server configuration rendering.
//!
//! The server.conf document is built as a JSON value and serialized with
//! sorted keys and fixed indentation, so re-renders of unchanged input are
//! byte-stable and the derived hash only moves on real content changes.

use serde_json::{json, Map, Value};

use trustmesh_common::constants::{names, OPERATOR_NAMESPACE};
use trustmesh_common::crd::{
    string_to_bool, BundleEndpointConfig, BundleEndpointProfile, FederationConfig, SpireServerSpec,
};
use trustmesh_common::{Error, Result};

/// Mount path of the database TLS secret inside the server container.
pub const DB_TLS_MOUNT_PATH: &str = "/run/spire/db/certs";

/// Mount path of the federation serving-cert secret inside the server
/// container.
pub const FEDERATION_CERTS_MOUNT_PATH: &str = "/run/spire/federation-certs";

/// Audience the node attestor expects on agent tokens.
const NODE_ATTESTOR_AUDIENCE: &str = "spire-server";

/// Render server.conf as canonical indented JSON.
pub fn render_server_conf(spec: &SpireServerSpec) -> Result<String> {
    let conf = server_conf_value(spec)?;
    serde_json::to_string_pretty(&conf)
        .map_err(|e| Error::rendering_for("server.conf", e.to_string()))
}

/// Build the server.conf document.
///
/// `serde_json`'s map keeps keys sorted, which gives the deterministic
/// ordering the config hash depends on.
pub fn server_conf_value(spec: &SpireServerSpec) -> Result<Value> {
    if spec.trust_domain.is_empty() {
        return Err(Error::rendering_for("server.conf", "trust domain is empty"));
    }
    if spec.cluster_name.is_empty() {
        return Err(Error::rendering_for("server.conf", "cluster name is empty"));
    }
    if spec.bundle_config_map.is_empty() {
        return Err(Error::rendering_for("server.conf", "bundle config map name is empty"));
    }

    let ca_subject = spec.ca_subject.clone().unwrap_or_default();

    let mut conf = json!({
        "health_checks": {
            "bind_address": "0.0.0.0",
            "bind_port": "8080",
            "listener_enabled": true,
            "live_path": "/live",
            "ready_path": "/ready"
        },
        "plugins": {
            "DataStore": [{
                "sql": {
                    "plugin_data": datastore_plugin_data(spec)
                }
            }],
            "KeyManager": [key_manager_value(spec)],
            "NodeAttestor": [{
                "k8s_psat": {
                    "plugin_data": {
                        "clusters": [{
                            (spec.cluster_name.clone()): {
                                "allowed_node_label_keys": [],
                                "allowed_pod_label_keys": [],
                                "audience": [NODE_ATTESTOR_AUDIENCE],
                                "service_account_allow_list": [
                                    format!("{OPERATOR_NAMESPACE}:{}", names::SPIRE_AGENT)
                                ]
                            }
                        }]
                    }
                }
            }],
            "Notifier": [{
                "k8sbundle": {
                    "plugin_data": {
                        "config_map": spec.bundle_config_map,
                        "namespace": OPERATOR_NAMESPACE
                    }
                }
            }]
        },
        "server": {
            "audit_log_enabled": false,
            "bind_address": "0.0.0.0",
            "bind_port": "8081",
            "ca_key_type": "ec-p256",
            "ca_subject": [{
                "common_name": ca_subject.common_name,
                "country": [ca_subject.country],
                "organization": [ca_subject.organization]
            }],
            "ca_ttl": spec.ca_validity,
            "data_dir": "/run/spire/data",
            "default_jwt_svid_ttl": spec.default_jwt_validity,
            "default_x509_svid_ttl": spec.default_x509_validity,
            "jwt_issuer": spec.jwt_issuer,
            "log_format": spec.log_format,
            "log_level": spec.log_level.to_uppercase(),
            "trust_domain": spec.trust_domain
        },
        "telemetry": {
            "Prometheus": {
                "host": "0.0.0.0",
                "port": "9402"
            }
        }
    });

    if let Some(federation) = &spec.federation {
        conf.as_object_mut()
            .expect("server.conf is an object")
            .insert(
                "federation".to_string(),
                federation_value(federation, &spec.trust_domain),
            );
    }

    Ok(conf)
}

fn datastore_plugin_data(spec: &SpireServerSpec) -> Value {
    let ds = &spec.datastore;
    let mut data = Map::new();
    data.insert("connection_string".into(), json!(ds.connection_string));
    data.insert("database_type".into(), json!(ds.database_type.as_str()));
    data.insert(
        "disable_migration".into(),
        json!(string_to_bool(&ds.disable_migration)),
    );
    data.insert("max_idle_conns".into(), json!(ds.max_idle_conns));
    data.insert("max_open_conns".into(), json!(ds.max_open_conns));
    if ds.conn_max_lifetime > 0 {
        data.insert("conn_max_lifetime".into(), json!(ds.conn_max_lifetime));
    }
    if !ds.root_ca_path.is_empty() {
        data.insert("root_ca_path".into(), json!(ds.root_ca_path));
    }
    if !ds.client_cert_path.is_empty() {
        data.insert("client_cert_path".into(), json!(ds.client_cert_path));
    }
    if !ds.client_key_path.is_empty() {
        data.insert("client_key_path".into(), json!(ds.client_key_path));
    }
    Value::Object(data)
}

fn key_manager_value(spec: &SpireServerSpec) -> Value {
    let memory = spec
        .key_manager
        .as_ref()
        .map(|km| string_to_bool(&km.memory_enabled) && !string_to_bool(&km.disk_enabled))
        .unwrap_or(false);
    if memory {
        json!({ "memory": { "plugin_data": {} } })
    } else {
        json!({
            "disk": {
                "plugin_data": { "keys_path": "/run/spire/data/keys.json" }
            }
        })
    }
}

/// Build the `federation` block of server.conf.
pub fn federation_value(federation: &FederationConfig, trust_domain: &str) -> Value {
    let mut block = Map::new();
    block.insert(
        "bundle_endpoint".to_string(),
        bundle_endpoint_value(&federation.bundle_endpoint),
    );

    if !federation.federates_with.is_empty() {
        let mut federates_with = Map::new();
        for remote in &federation.federates_with {
            // Self-federation is rejected by validation; skip defensively on
            // the render path as well.
            if remote.trust_domain == trust_domain {
                continue;
            }
            let profile = match remote.bundle_endpoint_profile {
                BundleEndpointProfile::HttpsSpiffe => json!({
                    "https_spiffe": { "endpoint_spiffe_id": remote.endpoint_spiffe_id }
                }),
                BundleEndpointProfile::HttpsWeb => json!({ "https_web": {} }),
            };
            federates_with.insert(
                remote.trust_domain.clone(),
                json!({
                    "bundle_endpoint_url": remote.bundle_endpoint_url,
                    "bundle_endpoint_profile": profile
                }),
            );
        }
        block.insert("federates_with".to_string(), Value::Object(federates_with));
    }

    Value::Object(block)
}

/// Build the `bundle_endpoint` block.
pub fn bundle_endpoint_value(endpoint: &BundleEndpointConfig) -> Value {
    let mut conf = Map::new();
    conf.insert("address".to_string(), json!("0.0.0.0"));
    conf.insert("port".to_string(), json!(8443));

    if endpoint.refresh_hint > 0 {
        conf.insert(
            "refresh_hint".to_string(),
            json!(format!("{}s", endpoint.refresh_hint)),
        );
    }

    match endpoint.profile {
        BundleEndpointProfile::HttpsSpiffe => {
            conf.insert("acme".to_string(), Value::Null);
        }
        BundleEndpointProfile::HttpsWeb => {
            if let Some(https_web) = &endpoint.https_web {
                if let Some(acme) = &https_web.acme {
                    conf.insert(
                        "acme".to_string(),
                        json!({
                            "directory_url": acme.directory_url,
                            "domain_name": acme.domain_name,
                            "email": acme.email,
                            "tos_accepted": string_to_bool(&acme.tos_accepted)
                        }),
                    );
                } else if let Some(serving_cert) = &https_web.serving_cert {
                    let mut cert = Map::new();
                    cert.insert(
                        "cert_file_path".to_string(),
                        json!(format!("{FEDERATION_CERTS_MOUNT_PATH}/tls.crt")),
                    );
                    cert.insert(
                        "key_file_path".to_string(),
                        json!(format!("{FEDERATION_CERTS_MOUNT_PATH}/tls.key")),
                    );
                    if serving_cert.file_sync_interval > 0 {
                        cert.insert(
                            "file_sync_interval".to_string(),
                            json!(format!("{}s", serving_cert.file_sync_interval)),
                        );
                    }
                    conf.insert("serving_cert_file".to_string(), Value::Object(cert));
                }
            }
        }
    }

    Value::Object(conf)
}
