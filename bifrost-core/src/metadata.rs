use crate::errors::ErrorKind;
use crate::prelude::*;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use url::Url;

/// Path prefix under which a KCP shard exposes APIExport virtual workspaces.
pub const VIRTUAL_WORKSPACE_PREFIX: &str = "/services/apiexport/";

/// Connection descriptor embedded in an artifact under `x-cluster-metadata`.
///
/// Self-contained: the gateway builds a client for the target cluster from
/// this alone, without access to the listener's environment.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ClusterMetadata {
    pub host: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub auth: Option<AuthMaterial>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ca: Option<CertificateAuthority>,
}

impl ClusterMetadata {
    pub fn new(host: &str, path: &str) -> Self {
        ClusterMetadata {
            host: host.to_string(),
            path: path.to_string(),
            auth: None,
            ca: None,
        }
    }

    pub fn with_auth(mut self, auth: AuthMaterial) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_ca(mut self, ca: CertificateAuthority) -> Self {
        self.ca = Some(ca);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(ErrorKind::InvalidMetadataError("host must not be empty".to_string()).into());
        }
        Url::parse(&self.host)?;
        Ok(())
    }
}

/// Credential material, tagged by `type`. All byte payloads are base64.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AuthMaterial {
    Token {
        token: String,
    },
    Kubeconfig {
        kubeconfig: String,
    },
    ClientCert {
        #[serde(rename = "certData")]
        cert_data: String,
        #[serde(rename = "keyData")]
        key_data: String,
    },
}

impl AuthMaterial {
    pub fn token(bytes: &[u8]) -> Self {
        AuthMaterial::Token {
            token: BASE64.encode(bytes),
        }
    }

    pub fn kubeconfig(bytes: &[u8]) -> Self {
        AuthMaterial::Kubeconfig {
            kubeconfig: BASE64.encode(bytes),
        }
    }

    pub fn client_cert(cert: &[u8], key: &[u8]) -> Self {
        AuthMaterial::ClientCert {
            cert_data: BASE64.encode(cert),
            key_data: BASE64.encode(key),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CertificateAuthority {
    pub data: String,
}

impl CertificateAuthority {
    pub fn from_pem(bytes: &[u8]) -> Self {
        CertificateAuthority {
            data: BASE64.encode(bytes),
        }
    }

    pub fn decode(&self) -> Result<Vec<u8>> {
        let bytes = BASE64.decode(&self.data)?;
        Ok(bytes)
    }
}

pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    let bytes = BASE64.decode(data)?;
    Ok(bytes)
}

/// Canonical base URL for a discovered host.
///
/// A host pointing at an APIExport virtual workspace is reduced to its
/// scheme and authority unless an explicit override is supplied; artifacts
/// for the virtual workspaces themselves pass the override.
pub fn canonical_host(discovered: &str, override_host: Option<&str>) -> Result<String> {
    if let Some(host) = override_host {
        return Ok(host.trim_end_matches('/').to_string());
    }
    let url = Url::parse(discovered)?;
    if url.path().starts_with(VIRTUAL_WORKSPACE_PREFIX) {
        let origin = format!(
            "{}://{}",
            url.scheme(),
            url.host_str().ok_or_else(|| ErrorKind::InvalidMetadataError(format!(
                "host {discovered} has no authority"
            )))?
        );
        let origin = match url.port() {
            Some(port) => format!("{origin}:{port}"),
            None => origin,
        };
        return Ok(origin);
    }
    Ok(discovered.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_host_strips_virtual_workspace_suffix() {
        let host = canonical_host(
            "https://kcp.example:6443/services/apiexport/root/tenancy.kcp.io",
            None,
        )
        .expect("canonical host");
        assert_eq!(host, "https://kcp.example:6443");
    }

    #[test]
    fn canonical_host_keeps_plain_hosts() {
        let host = canonical_host("https://api.example", None).expect("canonical host");
        assert_eq!(host, "https://api.example");

        let host = canonical_host("https://kcp.example/clusters/root:alpha", None)
            .expect("canonical host");
        assert_eq!(host, "https://kcp.example/clusters/root:alpha");
    }

    #[test]
    fn canonical_host_honors_override() {
        let host = canonical_host(
            "https://kcp.example/services/apiexport/root/core.bifrost.io",
            Some("https://kcp.example/services/apiexport/root/core.bifrost.io/"),
        )
        .expect("canonical host");
        assert_eq!(
            host,
            "https://kcp.example/services/apiexport/root/core.bifrost.io"
        );
    }

    #[test]
    fn auth_material_serializes_with_type_tag() {
        let token = AuthMaterial::token(b"secret");
        let value = serde_json::to_value(&token).expect("serialize");
        assert_eq!(value["type"], json!("token"));
        assert_eq!(value["token"], json!(BASE64.encode(b"secret")));

        let cert = AuthMaterial::client_cert(b"cert", b"key");
        let value = serde_json::to_value(&cert).expect("serialize");
        assert_eq!(value["type"], json!("clientCert"));
        assert!(value.get("certData").is_some());
        assert!(value.get("keyData").is_some());

        let parsed: AuthMaterial = serde_json::from_value(value).expect("parse");
        assert_eq!(parsed, cert);
    }

    #[test]
    fn metadata_validation_requires_parseable_host() {
        let ok = ClusterMetadata::new("https://api.example", "root:team");
        assert!(ok.validate().is_ok());

        let empty = ClusterMetadata::new("", "root:team");
        assert!(empty.validate().is_err());

        let junk = ClusterMetadata::new("not a url", "root:team");
        assert!(junk.validate().is_err());
    }
}
