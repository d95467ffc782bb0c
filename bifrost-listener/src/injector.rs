use crate::cluster_access::{self, AuthSpec, CaSpec, ClusterAccess, SecretKeyRef, SecretRef};
use crate::errors::ErrorKind;
use crate::prelude::*;

use bifrost_core::metadata::{
    canonical_host, AuthMaterial, CertificateAuthority, ClusterMetadata,
};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::config::Kubeconfig;
use kube::{Api, Client};
use tracing::debug;

const KUBECONFIG_SECRET_KEY: &str = "kubeconfig";
const TLS_CERT_KEY: &str = "tls.crt";
const TLS_KEY_KEY: &str = "tls.key";

/// Resolves a ClusterAccess object into self-contained connection metadata
/// by reading the referenced Secrets and ConfigMaps from the management
/// cluster.
pub struct MetadataInjector {
    client: Client,
}

impl MetadataInjector {
    pub fn new(client: Client) -> Self {
        MetadataInjector { client }
    }

    pub async fn metadata_for(&self, access: &ClusterAccess) -> Result<ClusterMetadata> {
        let host = canonical_host(&access.spec.host, None)
            .map_err(|err| ErrorKind::ConfigError(format!("host: {err}")))?;
        let path = cluster_access::cluster_key(access);
        let mut metadata = ClusterMetadata::new(&host, &path);

        if let Some(auth) = &access.spec.auth {
            metadata.auth = Some(self.resolve_auth(auth).await?);
        }
        metadata.ca = self.resolve_ca(&access.spec.ca, &metadata.auth).await?;
        metadata
            .validate()
            .map_err(|err| ErrorKind::ConfigError(format!("metadata: {err}")))?;
        Ok(metadata)
    }

    async fn resolve_auth(&self, auth: &AuthSpec) -> Result<AuthMaterial> {
        if let Some(reference) = &auth.secret_ref {
            let bytes = self.secret_key_bytes(reference).await?;
            return Ok(AuthMaterial::token(&bytes));
        }
        if let Some(reference) = &auth.kubeconfig_secret_ref {
            let bytes = self
                .secret_bytes(reference, KUBECONFIG_SECRET_KEY)
                .await?;
            return Ok(AuthMaterial::kubeconfig(&bytes));
        }
        if let Some(reference) = &auth.client_certificate_ref {
            let cert = self.secret_bytes(reference, TLS_CERT_KEY).await?;
            let key = self.secret_bytes(reference, TLS_KEY_KEY).await?;
            return Ok(AuthMaterial::client_cert(&cert, &key));
        }
        if auth.service_account.is_some() {
            return Err(ErrorKind::ConfigError(
                "auth.serviceAccount is declared but not supported; use secretRef, \
                 kubeconfigSecretRef or clientCertificateRef"
                    .to_string(),
            )
            .into());
        }
        Err(ErrorKind::ConfigError(
            "auth requires one of secretRef, kubeconfigSecretRef or clientCertificateRef"
                .to_string(),
        )
        .into())
    }

    /// CA preference: explicit Secret or ConfigMap reference, then a CA
    /// carried inside a referenced kubeconfig, then none.
    async fn resolve_ca(
        &self,
        ca: &Option<CaSpec>,
        auth: &Option<AuthMaterial>,
    ) -> Result<Option<CertificateAuthority>> {
        if let Some(spec) = ca {
            if let Some(reference) = &spec.secret_ref {
                let bytes = self.secret_key_bytes(reference).await?;
                return Ok(Some(CertificateAuthority::from_pem(&bytes)));
            }
            if let Some(reference) = &spec.config_map_ref {
                let bytes = self.config_map_bytes(reference).await?;
                return Ok(Some(CertificateAuthority::from_pem(&bytes)));
            }
        }
        if let Some(AuthMaterial::Kubeconfig { kubeconfig }) = auth {
            let bytes = bifrost_core::metadata::decode_base64(kubeconfig)
                .map_err(|err| ErrorKind::ConfigError(format!("kubeconfig: {err}")))?;
            return Ok(kubeconfig_ca(&bytes));
        }
        Ok(None)
    }

    async fn secret_key_bytes(&self, reference: &SecretKeyRef) -> Result<Vec<u8>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &reference.namespace);
        let secret = api.get(&reference.name).await?;
        secret
            .data
            .as_ref()
            .and_then(|data| data.get(&reference.key))
            .map(|bytes| bytes.0.clone())
            .ok_or_else(|| {
                ErrorKind::ConfigError(format!(
                    "secret {}/{} has no key {}",
                    reference.namespace, reference.name, reference.key
                ))
                .into()
            })
    }

    async fn secret_bytes(&self, reference: &SecretRef, key: &str) -> Result<Vec<u8>> {
        self.secret_key_bytes(&SecretKeyRef {
            name: reference.name.clone(),
            namespace: reference.namespace.clone(),
            key: key.to_string(),
        })
        .await
    }

    async fn config_map_bytes(&self, reference: &SecretKeyRef) -> Result<Vec<u8>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &reference.namespace);
        let config_map = api.get(&reference.name).await?;
        config_map
            .data
            .as_ref()
            .and_then(|data| data.get(&reference.key))
            .map(|text| text.clone().into_bytes())
            .ok_or_else(|| {
                ErrorKind::ConfigError(format!(
                    "config map {}/{} has no key {}",
                    reference.namespace, reference.name, reference.key
                ))
                .into()
            })
    }
}

/// Metadata for a cluster the listener reaches with its own ambient
/// kubeconfig (KCP workspaces, local development). The whole kubeconfig is
/// embedded so the gateway needs nothing from the listener's environment.
pub fn ambient_metadata(
    host: &str,
    path: &str,
    kubeconfig_bytes: &[u8],
    override_host: Option<&str>,
) -> Result<ClusterMetadata> {
    let host = canonical_host(host, override_host)
        .map_err(|err| ErrorKind::ConfigError(format!("host: {err}")))?;
    let mut metadata = ClusterMetadata::new(&host, path);
    if !kubeconfig_bytes.is_empty() {
        metadata.auth = Some(AuthMaterial::kubeconfig(kubeconfig_bytes));
        metadata.ca = kubeconfig_ca(kubeconfig_bytes);
    }
    metadata
        .validate()
        .map_err(|err| ErrorKind::ConfigError(format!("metadata: {err}")))?;
    Ok(metadata)
}

/// Extracts the CA of the active (or first) cluster entry of a kubeconfig.
fn kubeconfig_ca(kubeconfig_bytes: &[u8]) -> Option<CertificateAuthority> {
    let text = std::str::from_utf8(kubeconfig_bytes).ok()?;
    let kubeconfig = Kubeconfig::from_yaml(text).ok()?;

    let current = kubeconfig.current_context.as_deref();
    let cluster_name = current
        .and_then(|name| {
            kubeconfig
                .contexts
                .iter()
                .find(|ctx| ctx.name == name)
                .and_then(|ctx| ctx.context.as_ref())
                .map(|ctx| ctx.cluster.clone())
        })
        .or_else(|| kubeconfig.clusters.first().map(|c| c.name.clone()))?;

    let cluster = kubeconfig
        .clusters
        .iter()
        .find(|c| c.name == cluster_name)
        .and_then(|c| c.cluster.as_ref())?;

    match &cluster.certificate_authority_data {
        Some(data) => Some(CertificateAuthority { data: data.clone() }),
        None => {
            debug!("kubeconfig cluster {cluster_name} carries no inline CA");
            None
        }
    }
}
