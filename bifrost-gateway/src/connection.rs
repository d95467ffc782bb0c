use crate::auth::CallerIdentity;
use crate::prelude::*;

use bifrost_core::connection::config_from_metadata;
use bifrost_core::metadata::ClusterMetadata;
use kube::Client;
use secrecy::SecretString;

/// The connection an endpoint holds onto: the artifact's metadata plus the
/// base `kube::Config` derived from it once. Per-request clients are cheap
/// clones of the base with the caller's identity applied.
#[derive(Clone)]
pub struct EndpointConnection {
    metadata: ClusterMetadata,
    base: kube::Config,
}

impl EndpointConnection {
    pub async fn from_metadata(metadata: ClusterMetadata) -> Result<Self> {
        let base = config_from_metadata(&metadata)
            .await
            .map_err(crate::errors::ErrorKind::from)?;
        Ok(EndpointConnection { metadata, base })
    }

    pub fn metadata(&self) -> &ClusterMetadata {
        &self.metadata
    }

    pub fn host(&self) -> &str {
        &self.metadata.host
    }

    /// Per-request client carrying the caller's identity.
    ///
    /// With impersonation the embedded credential authenticates and the
    /// caller is set through `Impersonate-User`/`Impersonate-Group`. Without
    /// it the caller's own bearer token replaces the embedded credential.
    pub fn client_for(&self, identity: &CallerIdentity, impersonate: bool) -> Result<Client> {
        let config = self.request_config(identity, impersonate);
        let client = Client::try_from(config)?;
        Ok(client)
    }

    fn request_config(&self, identity: &CallerIdentity, impersonate: bool) -> kube::Config {
        let mut config = self.base.clone();
        if impersonate {
            config.auth_info.impersonate = Some(identity.user.clone());
            config.auth_info.impersonate_groups = if identity.groups.is_empty() {
                None
            } else {
                Some(identity.groups.clone())
            };
        } else {
            config.auth_info.token = Some(SecretString::from(identity.token.clone()));
            config.auth_info.token_file = None;
            config.auth_info.client_certificate_data = None;
            config.auth_info.client_key_data = None;
            config.auth_info.username = None;
            config.auth_info.password = None;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bifrost_core::metadata::AuthMaterial;
    use secrecy::ExposeSecret;

    fn identity() -> CallerIdentity {
        CallerIdentity {
            user: "jdoe@example.com".to_string(),
            groups: vec!["team-a".to_string()],
            token: "caller-token".to_string(),
        }
    }

    async fn connection() -> EndpointConnection {
        let metadata = ClusterMetadata::new("https://api.example", "kubernetes")
            .with_auth(AuthMaterial::token(b"embedded-token"));
        EndpointConnection::from_metadata(metadata)
            .await
            .expect("connection")
    }

    #[tokio::test]
    async fn impersonation_keeps_embedded_credential_and_sets_caller() {
        let connection = connection().await;
        let config = connection.request_config(&identity(), true);

        assert_eq!(
            config.auth_info.impersonate.as_deref(),
            Some("jdoe@example.com")
        );
        assert_eq!(
            config.auth_info.impersonate_groups,
            Some(vec!["team-a".to_string()])
        );
        assert_eq!(
            config
                .auth_info
                .token
                .as_ref()
                .map(|t| t.expose_secret().to_string()),
            Some("embedded-token".to_string())
        );
    }

    #[tokio::test]
    async fn token_forwarding_replaces_embedded_credential() {
        let connection = connection().await;
        let config = connection.request_config(&identity(), false);

        assert_eq!(config.auth_info.impersonate, None);
        assert_eq!(
            config
                .auth_info
                .token
                .as_ref()
                .map(|t| t.expose_secret().to_string()),
            Some("caller-token".to_string())
        );
    }

    #[tokio::test]
    async fn empty_groups_do_not_set_impersonate_groups() {
        let connection = connection().await;
        let mut caller = identity();
        caller.groups.clear();
        let config = connection.request_config(&caller, true);
        assert_eq!(config.auth_info.impersonate_groups, None);
    }
}
