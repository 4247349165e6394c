//! Small helpers shared by the workload builders.

use k8s_openapi::api::core::v1::{EnvVar, PodSpec};

use crate::config::ProxySettings;

/// Propagate cluster proxy settings into every container of a pod.
///
/// The proxy validator guarantees a trusted CA bundle is configured whenever
/// a proxy is, so operands started with these variables can verify TLS
/// through the proxy.
pub fn add_proxy_env(pod: &mut PodSpec, proxy: &ProxySettings) {
    if !proxy.proxy_enabled() {
        return;
    }

    let mut proxy_env = Vec::new();
    if !proxy.http_proxy.is_empty() {
        proxy_env.push(EnvVar {
            name: "HTTP_PROXY".to_string(),
            value: Some(proxy.http_proxy.clone()),
            ..Default::default()
        });
    }
    if !proxy.https_proxy.is_empty() {
        proxy_env.push(EnvVar {
            name: "HTTPS_PROXY".to_string(),
            value: Some(proxy.https_proxy.clone()),
            ..Default::default()
        });
    }

    for container in pod.containers.iter_mut() {
        let env = container.env.get_or_insert_with(Vec::new);
        for var in &proxy_env {
            if !env.iter().any(|e| e.name == var.name) {
                env.push(var.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Container;

    #[test]
    fn proxy_env_is_added_to_every_container() {
        let mut pod = PodSpec {
            containers: vec![
                Container {
                    name: "a".to_string(),
                    ..Default::default()
                },
                Container {
                    name: "b".to_string(),
                    env: Some(vec![EnvVar {
                        name: "HTTP_PROXY".to_string(),
                        value: Some("http://preexisting:3128".to_string()),
                        ..Default::default()
                    }]),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let proxy = ProxySettings {
            http_proxy: "http://proxy:3128".to_string(),
            https_proxy: "http://proxy:3128".to_string(),
            trusted_ca_bundle_config_map: "trusted-ca".to_string(),
        };

        add_proxy_env(&mut pod, &proxy);

        let a_env = pod.containers[0].env.as_ref().unwrap();
        assert_eq!(a_env.len(), 2);
        // Pre-existing variables are not overwritten.
        let b_env = pod.containers[1].env.as_ref().unwrap();
        let http: Vec<_> = b_env.iter().filter(|e| e.name == "HTTP_PROXY").collect();
        assert_eq!(http.len(), 1);
        assert_eq!(http[0].value.as_deref(), Some("http://preexisting:3128"));
    }

    #[test]
    fn no_proxy_means_no_env() {
        let mut pod = PodSpec {
            containers: vec![Container::default()],
            ..Default::default()
        };
        add_proxy_env(&mut pod, &ProxySettings::default());
        assert!(pod.containers[0].env.is_none());
    }
}
