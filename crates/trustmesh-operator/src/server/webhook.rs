//! Validating webhook configuration for the co-located controller-manager.

use k8s_openapi::api::admissionregistration::v1::{
    RuleWithOperations, ServiceReference, ValidatingWebhook, ValidatingWebhookConfiguration,
    WebhookClientConfig,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use trustmesh_common::constants::{components, names, standard_labels, OPERATOR_NAMESPACE};
use trustmesh_common::crd::SpireServerSpec;

use super::statefulset::SERVER_APP_NAME;

/// Build the controller-manager's ValidatingWebhookConfiguration.
///
/// Failure policy stays Ignore until the webhook backend is serving;
/// post-install tooling flips it once the endpoints exist.
pub fn build_webhook_configuration(spec: &SpireServerSpec) -> ValidatingWebhookConfiguration {
    let labels = standard_labels(
        SERVER_APP_NAME,
        components::CONTROL_PLANE,
        spec.common.labels.as_ref(),
    );

    ValidatingWebhookConfiguration {
        metadata: ObjectMeta {
            name: Some(names::CONTROLLER_MANAGER_WEBHOOK.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        webhooks: Some(vec![
            validating_webhook(
                "vclusterfederatedtrustdomain.kb.io",
                "/validate-spire-spiffe-io-v1alpha1-clusterfederatedtrustdomain",
                "clusterfederatedtrustdomains",
            ),
            validating_webhook(
                "vclusterspiffeid.kb.io",
                "/validate-spire-spiffe-io-v1alpha1-clusterspiffeid",
                "clusterspiffeids",
            ),
        ]),
    }
}

fn validating_webhook(name: &str, path: &str, resource: &str) -> ValidatingWebhook {
    ValidatingWebhook {
        name: name.to_string(),
        admission_review_versions: vec!["v1".to_string()],
        side_effects: "None".to_string(),
        failure_policy: Some("Ignore".to_string()),
        client_config: WebhookClientConfig {
            service: Some(ServiceReference {
                name: names::CONTROLLER_MANAGER_WEBHOOK.to_string(),
                namespace: OPERATOR_NAMESPACE.to_string(),
                path: Some(path.to_string()),
                port: None,
            }),
            ..Default::default()
        },
        rules: Some(vec![RuleWithOperations {
            api_groups: Some(vec!["spire.spiffe.io".to_string()]),
            api_versions: Some(vec!["v1alpha1".to_string()]),
            operations: Some(vec!["CREATE".to_string(), "UPDATE".to_string()]),
            resources: Some(vec![resource.to_string()]),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_configuration_covers_both_validated_kinds() {
        let config = build_webhook_configuration(&SpireServerSpec::default());
        let webhooks = config.webhooks.unwrap();
        assert_eq!(webhooks.len(), 2);

        let resources: Vec<&str> = webhooks
            .iter()
            .flat_map(|w| w.rules.as_ref().unwrap())
            .flat_map(|r| r.resources.as_ref().unwrap())
            .map(String::as_str)
            .collect();
        assert!(resources.contains(&"clusterfederatedtrustdomains"));
        assert!(resources.contains(&"clusterspiffeids"));

        for webhook in &webhooks {
            assert_eq!(webhook.failure_policy.as_deref(), Some("Ignore"));
            let service = webhook.client_config.service.as_ref().unwrap();
            assert_eq!(service.name, "spire-controller-manager-webhook");
            assert_eq!(service.namespace, "trustmesh-system");
        }
    }
}
