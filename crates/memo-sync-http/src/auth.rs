//! Token helpers for the server's `/auth` endpoints.
//!
//! The token is an opaque bearer string; nothing here inspects it.

use crate::transport::{normalize_endpoint, read_json};

use memo_sync_core::transport::{Result, TransportError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Serialize)]
struct Credentials<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub username: String,
}

/// A successful register/login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub token: String,
    pub user: Option<UserInfo>,
}

/// Create an account and return its first token.
pub async fn register(endpoint: &str, username: &str, password: &str) -> Result<AuthSession> {
    post_auth(endpoint, "/auth/register", username, password).await
}

/// Exchange credentials for a token.
pub async fn login(endpoint: &str, username: &str, password: &str) -> Result<AuthSession> {
    post_auth(endpoint, "/auth/login", username, password).await
}

/// Revoke `token` on the server.
pub async fn logout(endpoint: &str, token: &str) -> Result<()> {
    let base = normalize_endpoint(endpoint).ok_or(TransportError::EndpointNotSet)?;
    let response = Client::new()
        .post(format!("{}/auth/logout", base))
        .bearer_auth(token)
        .send()
        .await
        .map_err(|e| TransportError::Network(e.to_string()))?;
    read_json(response).await?;
    tracing::info!("Logged out");
    Ok(())
}

/// The user `token` belongs to.
pub async fn me(endpoint: &str, token: &str) -> Result<UserInfo> {
    let base = normalize_endpoint(endpoint).ok_or(TransportError::EndpointNotSet)?;
    let response = Client::new()
        .get(format!("{}/auth/me", base))
        .bearer_auth(token)
        .send()
        .await
        .map_err(|e| TransportError::Network(e.to_string()))?;
    let payload = read_json(response).await?;
    serde_json::from_value(payload).map_err(|e| TransportError::InvalidResponse(e.to_string()))
}

async fn post_auth(endpoint: &str, path: &str, username: &str, password: &str) -> Result<AuthSession> {
    let base = normalize_endpoint(endpoint).ok_or(TransportError::EndpointNotSet)?;
    tracing::debug!("Auth request {} for {}", path, username);

    let response = Client::new()
        .post(format!("{}{}", base, path))
        .json(&Credentials { username, password })
        .send()
        .await
        .map_err(|e| TransportError::Network(e.to_string()))?;
    let payload = read_json(response).await?;

    let token = payload
        .get("token")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| TransportError::InvalidResponse("token missing".to_string()))?;
    let user = payload
        .get("user")
        .and_then(|u| serde_json::from_value(u.clone()).ok());
    tracing::info!("Authenticated as {}", username);
    Ok(AuthSession {
        token: token.to_string(),
        user,
    })
}
