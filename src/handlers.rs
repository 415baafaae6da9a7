/*
 * Copyright Nitro Agility S.r.l.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *      https://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! HTTP admin handlers.

use crate::identity::{IssuerState, IssuerStatus};
use crate::metrics::Metrics;
use crate::trust_domain::TrustDomain;
use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub issuer: Arc<IssuerState>,
    pub trust_domain: TrustDomain,
    pub metrics: Metrics,
}

// ============================================================================
// Discovery Handlers
// ============================================================================

/// GET /.well-known/mesh-identity.json
pub async fn identity_metadata(State(state): State<AppState>) -> Json<serde_json::Value> {
    let issuer = state.issuer.current_issuer();
    let issuer_expiry = issuer
        .as_ref()
        .and_then(|i| chrono::DateTime::from_timestamp(i.not_after().unix_timestamp(), 0))
        .map(|t| t.to_rfc3339());

    Json(serde_json::json!({
        "trust_domain": state.trust_domain.domain(),
        "controller_namespace": state.trust_domain.controller_namespace(),
        "issuer_name": state.trust_domain.issuer_name(),
        "status": state.issuer.status(),
        "issuer_expiry": issuer_expiry,
    }))
}

/// GET /v1/trust-bundle
pub async fn trust_bundle(State(state): State<AppState>) -> impl IntoResponse {
    match state.issuer.current_issuer() {
        Some(issuer) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/x-pem-file")],
            issuer.trust_anchors().pem().to_string(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain")],
            "issuer material not loaded\n".to_string(),
        ),
    }
}

// ============================================================================
// Health Handlers
// ============================================================================

/// GET /health
pub async fn health() -> &'static str {
    "OK"
}

/// GET /ready
pub async fn ready(State(state): State<AppState>) -> (StatusCode, &'static str) {
    match state.issuer.status() {
        IssuerStatus::Valid => (StatusCode::OK, "OK"),
        IssuerStatus::Uninitialized => (StatusCode::SERVICE_UNAVAILABLE, "issuer not loaded"),
        IssuerStatus::Invalid => (StatusCode::SERVICE_UNAVAILABLE, "issuer invalid"),
    }
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.render(&state.issuer) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            format!("{}\n", e),
        ),
    }
}
