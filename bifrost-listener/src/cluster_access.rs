use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Declares a reachable cluster the listener should distill into an
/// artifact. Cluster scoped; the artifact key defaults to the object name.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "gateway.bifrost.io",
    version = "v1alpha1",
    kind = "ClusterAccess",
    plural = "clusteraccesses"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAccessSpec {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<CaSpec>,
}

/// Credential source for a target cluster. Exactly one field may be set.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretKeyRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig_secret_ref: Option<SecretRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate_ref: Option<SecretRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
}

/// CA source for a target cluster. Exactly one field may be set.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CaSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretKeyRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_ref: Option<SecretKeyRef>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    pub name: String,
    pub namespace: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    pub name: String,
    pub namespace: String,
    pub key: String,
}

/// The artifact key a ClusterAccess maps to: its declared path, falling back
/// to the object name.
pub fn cluster_key(access: &ClusterAccess) -> String {
    access
        .spec
        .path
        .clone()
        .unwrap_or_else(|| access.name_any())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_key_prefers_declared_path() {
        let mut access = ClusterAccess::new(
            "staging",
            ClusterAccessSpec {
                host: "https://staging.example".to_string(),
                path: None,
                auth: None,
                ca: None,
            },
        );
        assert_eq!(cluster_key(&access), "staging");

        access.spec.path = Some("root:staging".to_string());
        assert_eq!(cluster_key(&access), "root:staging");
    }

    #[test]
    fn spec_round_trips_camel_case() {
        let spec: ClusterAccessSpec = serde_json::from_value(serde_json::json!({
            "host": "https://api.example",
            "auth": {
                "kubeconfigSecretRef": {"name": "creds", "namespace": "default"}
            },
            "ca": {
                "configMapRef": {"name": "ca", "namespace": "default", "key": "ca.crt"}
            }
        }))
        .expect("spec");

        let auth = spec.auth.expect("auth");
        assert_eq!(
            auth.kubeconfig_secret_ref,
            Some(SecretRef {
                name: "creds".to_string(),
                namespace: "default".to_string()
            })
        );
        let ca = spec.ca.expect("ca");
        assert_eq!(ca.config_map_ref.expect("config map ref").key, "ca.crt");
    }
}
