// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Auth collaborator: HS256 JWT verification.
//!
//! Tokens are issued by the account service; this surface only verifies the
//! signature and expiry and extracts the farmer identity.  When no secret is
//! configured, auth is disabled and every request runs as an anonymous
//! operator (dev mode).  SSE clients that cannot set headers may pass the
//! token as a `token=` query parameter instead.

use std::sync::Arc;

use axum::extract::State;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Authenticated farmer identity; `None` when auth is disabled.
#[derive(Debug, Clone, Copy)]
pub struct AuthFarmer(pub Option<Uuid>);

#[derive(serde::Deserialize)]
struct Header {
    alg: String,
}

#[derive(serde::Deserialize)]
struct Claims {
    sub: Uuid,
    exp: i64,
}

/// Verify a compact JWT and return the farmer id it carries.
pub fn verify_token(token: &str, secret: &str, now: DateTime<Utc>) -> Result<Uuid, ApiError> {
    let mut parts = token.split('.');
    let (header_b64, payload_b64, sig_b64) =
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(h), Some(p), Some(s), None) => (h, p, s),
            _ => return Err(ApiError::Unauthorized),
        };

    let header_bytes =
        URL_SAFE_NO_PAD.decode(header_b64).map_err(|_| ApiError::Unauthorized)?;
    let header: Header =
        serde_json::from_slice(&header_bytes).map_err(|_| ApiError::Unauthorized)?;
    if header.alg != "HS256" {
        return Err(ApiError::Unauthorized);
    }

    let signature = URL_SAFE_NO_PAD.decode(sig_b64).map_err(|_| ApiError::Unauthorized)?;
    let key = ring::hmac::Key::new(ring::hmac::HMAC_SHA256, secret.as_bytes());
    let signing_input = &token[..header_b64.len() + 1 + payload_b64.len()];
    ring::hmac::verify(&key, signing_input.as_bytes(), &signature)
        .map_err(|_| ApiError::Unauthorized)?;

    let payload_bytes =
        URL_SAFE_NO_PAD.decode(payload_b64).map_err(|_| ApiError::Unauthorized)?;
    let claims: Claims =
        serde_json::from_slice(&payload_bytes).map_err(|_| ApiError::Unauthorized)?;
    if claims.exp <= now.timestamp() {
        return Err(ApiError::Unauthorized);
    }
    Ok(claims.sub)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn query_token(query: &str) -> Option<&str> {
    query.split('&').find_map(|pair| pair.strip_prefix("token="))
}

/// Axum middleware enforcing farmer authentication.
///
/// Exempt: `/api/v1/health`.
pub async fn auth_layer(
    State(app): State<Arc<AppState>>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    if req.uri().path() == "/api/v1/health" {
        return next.run(req).await;
    }

    let farmer = match app.config.jwt_secret.as_deref() {
        None => AuthFarmer(None),
        Some(secret) => {
            let token = bearer_token(req.headers())
                .or_else(|| req.uri().query().and_then(query_token))
                .map(str::to_owned);
            let Some(token) = token else {
                return ApiError::Unauthorized.into_response();
            };
            match verify_token(&token, secret, Utc::now()) {
                Ok(farmer_id) => AuthFarmer(Some(farmer_id)),
                Err(e) => return e.into_response(),
            }
        }
    };

    req.extensions_mut().insert(farmer);
    next.run(req).await
}

impl<S> axum::extract::FromRequestParts<S> for AuthFarmer
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<AuthFarmer>().copied().ok_or(ApiError::Unauthorized)
    }
}

/// Resolve the animal and check the caller may read it.
pub async fn ensure_cow_access(
    app: &AppState,
    cow_id: Uuid,
    farmer: &AuthFarmer,
) -> Result<(), ApiError> {
    let owner = app.store.cow_owner(cow_id).await?;
    let Some(owner) = owner else {
        return Err(ApiError::NotFound(format!("unknown animal {cow_id}")));
    };
    match farmer.0 {
        Some(caller) if caller != owner => Err(ApiError::Forbidden),
        _ => Ok(()),
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
