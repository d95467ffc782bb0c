use crate::errors::ErrorKind;
use crate::metadata::{decode_base64, AuthMaterial, ClusterMetadata};
use crate::prelude::*;
use crate::tls;

use kube::config::{
    Cluster, Context, Kubeconfig, KubeConfigOptions, NamedAuthInfo, NamedCluster, NamedContext,
};
use secrecy::SecretString;

const SYNTHETIC_CONTEXT: &str = "bifrost";

/// Builds a `kube::Config` for the cluster a metadata block describes.
///
/// Credential material is routed through a synthetic kubeconfig so kube's own
/// loader handles CA material and TLS the same way it does for files on disk.
/// Callers layer per-request identity (impersonation or token forwarding) on
/// top of the returned config.
pub async fn config_from_metadata(meta: &ClusterMetadata) -> Result<kube::Config> {
    meta.validate()?;
    tls::ensure_rustls_provider();

    let kubeconfig = match &meta.auth {
        Some(AuthMaterial::Kubeconfig { kubeconfig }) => {
            let bytes = decode_base64(kubeconfig)?;
            let text = String::from_utf8(bytes).map_err(|err| {
                ErrorKind::InvalidMetadataError(format!("kubeconfig is not UTF-8: {err}"))
            })?;
            let mut parsed = Kubeconfig::from_yaml(&text).map_err(|err| {
                ErrorKind::InvalidMetadataError(format!("embedded kubeconfig: {err}"))
            })?;
            override_clusters(&mut parsed, meta);
            parsed
        }
        _ => synthetic_kubeconfig(meta)?,
    };

    let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|err| ErrorKind::InvalidMetadataError(format!("cluster config: {err}")))?;
    Ok(config)
}

/// Rewrites every cluster entry of an embedded kubeconfig to point at the
/// artifact's host, applying the explicit CA when one was provided.
fn override_clusters(kubeconfig: &mut Kubeconfig, meta: &ClusterMetadata) {
    for named in &mut kubeconfig.clusters {
        if let Some(cluster) = named.cluster.as_mut() {
            cluster.server = Some(meta.host.clone());
            if let Some(ca) = &meta.ca {
                cluster.certificate_authority_data = Some(ca.data.clone());
                cluster.certificate_authority = None;
            }
        }
    }
}

fn synthetic_kubeconfig(meta: &ClusterMetadata) -> Result<Kubeconfig> {
    let mut auth_info = kube::config::AuthInfo::default();
    match &meta.auth {
        Some(AuthMaterial::Token { token }) => {
            let bytes = decode_base64(token)?;
            let token = String::from_utf8(bytes).map_err(|err| {
                ErrorKind::InvalidMetadataError(format!("token is not UTF-8: {err}"))
            })?;
            auth_info.token = Some(SecretString::from(token));
        }
        Some(AuthMaterial::ClientCert {
            cert_data,
            key_data,
        }) => {
            auth_info.client_certificate_data = Some(cert_data.clone());
            auth_info.client_key_data = Some(SecretString::from(key_data.clone()));
        }
        Some(AuthMaterial::Kubeconfig { .. }) => {
            // Handled by the caller; unreachable through config_from_metadata.
        }
        None => {}
    }

    Ok(Kubeconfig {
        clusters: vec![NamedCluster {
            name: SYNTHETIC_CONTEXT.to_string(),
            cluster: Some(Cluster {
                server: Some(meta.host.clone()),
                certificate_authority_data: meta.ca.as_ref().map(|ca| ca.data.clone()),
                ..Default::default()
            }),
        }],
        auth_infos: vec![NamedAuthInfo {
            name: SYNTHETIC_CONTEXT.to_string(),
            auth_info: Some(auth_info),
        }],
        contexts: vec![NamedContext {
            name: SYNTHETIC_CONTEXT.to_string(),
            context: Some(Context {
                cluster: SYNTHETIC_CONTEXT.to_string(),
                user: Some(SYNTHETIC_CONTEXT.to_string()),
                ..Default::default()
            }),
        }],
        current_context: Some(SYNTHETIC_CONTEXT.to_string()),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::CertificateAuthority;
    use secrecy::ExposeSecret;

    #[tokio::test]
    async fn token_metadata_yields_bearer_config() {
        let meta = ClusterMetadata::new("https://api.example:6443", "kubernetes")
            .with_auth(AuthMaterial::token(b"sometoken"));
        let config = config_from_metadata(&meta).await.expect("config");
        assert_eq!(
            config.cluster_url.to_string().trim_end_matches('/'),
            "https://api.example:6443"
        );
        assert_eq!(
            config
                .auth_info
                .token
                .as_ref()
                .map(|token| token.expose_secret().to_string()),
            Some("sometoken".to_string())
        );
    }

    #[tokio::test]
    async fn client_cert_metadata_carries_cert_material() {
        let meta = ClusterMetadata::new("https://api.example", "kubernetes")
            .with_auth(AuthMaterial::client_cert(b"certpem", b"keypem"));
        let config = config_from_metadata(&meta).await.expect("config");
        assert!(config.auth_info.client_certificate_data.is_some());
        assert!(config.auth_info.client_key_data.is_some());
    }

    #[tokio::test]
    async fn embedded_kubeconfig_is_rewritten_to_artifact_host() {
        let kubeconfig = r#"
apiVersion: v1
kind: Config
clusters:
  - name: upstream
    cluster:
      server: https://kcp.example/services/apiexport/root/core
contexts:
  - name: upstream
    context:
      cluster: upstream
      user: upstream
current-context: upstream
users:
  - name: upstream
    user:
      token: ambient
"#;
        let meta = ClusterMetadata::new("https://kcp.example/clusters/root:alpha", "root:alpha")
            .with_auth(AuthMaterial::kubeconfig(kubeconfig.as_bytes()));
        let config = config_from_metadata(&meta).await.expect("config");
        assert_eq!(
            config.cluster_url.to_string().trim_end_matches('/'),
            "https://kcp.example/clusters/root:alpha"
        );
    }

    #[tokio::test]
    async fn invalid_host_is_rejected() {
        let meta = ClusterMetadata::new("not a url", "x");
        assert!(config_from_metadata(&meta).await.is_err());

        let mut meta = ClusterMetadata::new("https://api.example", "x");
        meta.ca = Some(CertificateAuthority {
            data: "!!! not base64".to_string(),
        });
        // CA decoding failures surface when kube parses the synthetic
        // kubeconfig, not before.
        assert!(config_from_metadata(&meta).await.is_err());
    }
}
