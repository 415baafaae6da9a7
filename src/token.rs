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

//! ServiceAccount token validation.
//!
//! Tokens are verified by the Kubernetes TokenReview API. The reviewed
//! username (`system:serviceaccount:<namespace>:<name>`) is turned into a
//! [`WorkloadIdentity`], which is then authorized against the identity name
//! the caller asked a certificate for.

use crate::trust_domain::{TrustDomain, is_dns1123_label};
use async_trait::async_trait;
use k8s_openapi::api::authentication::v1::{TokenReview, TokenReviewSpec, TokenReviewStatus};
use kube::api::PostParams;
use kube::{Api, Client};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

const SERVICE_ACCOUNT_PREFIX: &str = "system:serviceaccount:";

/// Token validation failures.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The token was authenticated but does not belong to a usable ServiceAccount
    #[error("invalid token: {0}")]
    Invalid(String),

    /// The API server did not authenticate the token
    #[error("token not authenticated: {0}")]
    NotAuthenticated(String),

    /// The token's identity may not request the given name
    #[error("identity {token} is not authorized to request {requested}")]
    IdentityMismatch { token: String, requested: String },

    /// The TokenReview call itself failed
    #[error("token review failed: {0}")]
    Review(String),
}

/// Submits bearer tokens for review.
#[async_trait]
pub trait TokenReviewer: Send + Sync {
    async fn review(
        &self,
        token: &str,
        audiences: &[String],
    ) -> Result<TokenReviewStatus, TokenError>;
}

/// TokenReview against the Kubernetes API server.
pub struct KubeTokenReviewer {
    client: Client,
}

impl KubeTokenReviewer {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TokenReviewer for KubeTokenReviewer {
    async fn review(
        &self,
        token: &str,
        audiences: &[String],
    ) -> Result<TokenReviewStatus, TokenError> {
        let api: Api<TokenReview> = Api::all(self.client.clone());

        let review = TokenReview {
            metadata: Default::default(),
            spec: TokenReviewSpec {
                token: Some(token.to_string()),
                audiences: (!audiences.is_empty()).then(|| audiences.to_vec()),
            },
            status: None,
        };

        let result = api
            .create(&PostParams::default(), &review)
            .await
            .map_err(|e| TokenError::Review(format!("TokenReview API error: {}", e)))?;

        result
            .status
            .ok_or_else(|| TokenError::Review("TokenReview returned no status".to_string()))
    }
}

/// Namespace and name of an authenticated ServiceAccount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadIdentity {
    pub namespace: String,
    pub service_account: String,
}

impl WorkloadIdentity {
    /// Parse a reviewed username of the form `system:serviceaccount:<ns>:<name>`.
    pub fn from_username(username: &str) -> Result<Self, TokenError> {
        let rest = username.strip_prefix(SERVICE_ACCOUNT_PREFIX).ok_or_else(|| {
            TokenError::Invalid(format!("{} is not a ServiceAccount", username))
        })?;

        let mut parts = rest.split(':');
        let (Some(namespace), Some(service_account), None) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Invalid(format!(
                "malformed ServiceAccount username {}",
                username
            )));
        };

        if !is_dns1123_label(namespace) || !is_dns1123_label(service_account) {
            return Err(TokenError::Invalid(format!(
                "ServiceAccount {}/{} is not a valid DNS-1123 name",
                namespace, service_account
            )));
        }

        Ok(Self {
            namespace: namespace.to_string(),
            service_account: service_account.to_string(),
        })
    }

    pub fn identity_name(&self, trust_domain: &TrustDomain) -> String {
        trust_domain.identity_name(&self.namespace, &self.service_account)
    }

    /// Require `requested` to be exactly this workload's identity name.
    pub fn authorize(&self, trust_domain: &TrustDomain, requested: &str) -> Result<(), TokenError> {
        let expected = self.identity_name(trust_domain);
        if expected != requested {
            return Err(TokenError::IdentityMismatch {
                token: expected,
                requested: requested.to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for WorkloadIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.service_account)
    }
}

/// Authenticates workloads and authorizes their requested identity.
pub struct TokenValidator {
    reviewer: Arc<dyn TokenReviewer>,
    trust_domain: TrustDomain,
    audiences: Vec<String>,
}

impl TokenValidator {
    pub fn new(
        reviewer: Arc<dyn TokenReviewer>,
        trust_domain: TrustDomain,
        audiences: Vec<String>,
    ) -> Self {
        Self {
            reviewer,
            trust_domain,
            audiences,
        }
    }

    pub fn trust_domain(&self) -> &TrustDomain {
        &self.trust_domain
    }

    /// Review `token` and check that its ServiceAccount owns `requested`.
    pub async fn validate(
        &self,
        token: &str,
        requested: &str,
    ) -> Result<WorkloadIdentity, TokenError> {
        let status = self.reviewer.review(token, &self.audiences).await?;

        if !status.authenticated.unwrap_or(false) {
            return Err(TokenError::NotAuthenticated(
                status
                    .error
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| "token was not authenticated".to_string()),
            ));
        }

        let username = status
            .user
            .and_then(|user| user.username)
            .ok_or_else(|| TokenError::Invalid("reviewed token has no username".to_string()))?;

        let identity = WorkloadIdentity::from_username(&username)?;
        identity.authorize(&self.trust_domain, requested)?;

        debug!(workload = %identity, "Validated ServiceAccount token");
        Ok(identity)
    }
}
