use crate::errors::GatewayError;
use crate::prelude::*;

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::Value;

/// Which token claims name the caller and their groups.
#[derive(Debug, Clone)]
pub struct ClaimsConfig {
    pub username_claim: String,
    pub groups_claim: String,
}

impl Default for ClaimsConfig {
    fn default() -> Self {
        ClaimsConfig {
            username_claim: "sub".to_string(),
            groups_claim: "groups".to_string(),
        }
    }
}

/// The caller as derived from the bearer token. The raw token is kept for
/// token-forwarding mode.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub user: String,
    pub groups: Vec<String>,
    pub token: String,
}

/// Extracts and decodes the caller from the `Authorization` header.
///
/// The gateway never verifies the signature itself. Authorization is
/// delegated: the decoded identity is impersonated (or the raw token
/// forwarded) and the target API server is the judge of it.
pub fn identity_from_headers(headers: &HeaderMap, claims: &ClaimsConfig) -> Result<CallerIdentity> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| GatewayError::auth("missing Authorization header"))?;
    let header = header
        .to_str()
        .map_err(|_| GatewayError::auth("Authorization header is not valid UTF-8"))?;
    let token = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .ok_or_else(|| GatewayError::auth("Authorization header is not a bearer token"))?
        .trim();
    if token.is_empty() {
        return Err(GatewayError::auth("empty bearer token"));
    }
    identity_from_token(token, claims)
}

pub fn identity_from_token(token: &str, claims: &ClaimsConfig) -> Result<CallerIdentity> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    validation.algorithms = vec![
        Algorithm::HS256,
        Algorithm::HS384,
        Algorithm::HS512,
        Algorithm::RS256,
        Algorithm::RS384,
        Algorithm::RS512,
        Algorithm::PS256,
        Algorithm::PS384,
        Algorithm::PS512,
        Algorithm::ES256,
        Algorithm::ES384,
        Algorithm::EdDSA,
    ];

    let decoded = jsonwebtoken::decode::<serde_json::Map<String, Value>>(
        token,
        &DecodingKey::from_secret(&[]),
        &validation,
    )
    .map_err(|err| GatewayError::auth(format!("invalid bearer token: {err}")))?;

    let user = decoded
        .claims
        .get(&claims.username_claim)
        .and_then(Value::as_str)
        .ok_or_else(|| {
            GatewayError::auth(format!(
                "token has no usable {} claim",
                claims.username_claim
            ))
        })?
        .to_string();

    let groups = match decoded.claims.get(&claims.groups_claim) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(single)) => vec![single.clone()],
        _ => Vec::new(),
    };

    Ok(CallerIdentity {
        user,
        groups,
        token: token.to_string(),
    })
}
