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

//! Identity service.
//!
//! [`IssuerState`] tracks the lifecycle of the issuer material:
//!
//! ```text
//! Uninitialized --update--> Valid --update--> Valid
//!                             |                 ^
//!                  error, expiry or             |
//!                  watcher stopped            update
//!                             v                 |
//!                           Invalid ------------+
//! ```
//!
//! Issuance is only served while the state is `Valid`. [`IssuerRotation`]
//! drives the transitions from watcher events, and [`IdentityServiceImpl`]
//! serves the `Certify` RPC.

use crate::credentials::{CredentialProvider, WatchEvents};
use crate::error::{Error, Result};
use crate::events::{EventPublisher, actions, reasons};
use crate::metrics::Metrics;
use crate::proto::identity::{
    CertifyRequest, CertifyResponse,
    identity_server::{Identity, IdentityServer},
};
use crate::token::TokenValidator;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::EventType;
use mesh_identity_pki::{
    CertificateAuthority, CertificateRequest, IssuanceError, IssuerCredential, KeyMaterialError,
    Validity,
};
use serde::Serialize;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{Instrument, error, info, info_span, warn};

/// Lifecycle state of the issuer material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssuerStatus {
    Uninitialized,
    Valid,
    Invalid,
}

/// Certificate authority plus the validity of its issuer material.
pub struct IssuerState {
    authority: OnceLock<CertificateAuthority>,
    validity: Validity,
    apply_lock: Mutex<()>,
    status: watch::Sender<IssuerStatus>,
}

impl IssuerState {
    pub fn new(validity: Validity) -> Self {
        let (status, _) = watch::channel(IssuerStatus::Uninitialized);
        Self {
            authority: OnceLock::new(),
            validity,
            apply_lock: Mutex::new(()),
            status,
        }
    }

    pub fn status(&self) -> IssuerStatus {
        *self.status.borrow()
    }

    /// Receive every status transition.
    pub fn subscribe(&self) -> watch::Receiver<IssuerStatus> {
        self.status.subscribe()
    }

    /// Issue from `credential` from now on and mark the material valid.
    pub fn apply(&self, credential: IssuerCredential) {
        let _guard = self.apply_lock.lock().unwrap_or_else(PoisonError::into_inner);
        match self.authority.get() {
            Some(authority) => authority.update_issuer(credential),
            None => {
                // Cannot fail: initialization happens only under the apply lock.
                let _ = self
                    .authority
                    .set(CertificateAuthority::new(credential, self.validity));
            }
        }
        self.status.send_replace(IssuerStatus::Valid);
    }

    /// Stop issuance until the next successful [`apply`](Self::apply).
    pub fn invalidate(&self) {
        self.status.send_replace(IssuerStatus::Invalid);
    }

    /// The authority, if issuance is currently allowed.
    pub fn authority(&self) -> Result<&CertificateAuthority> {
        match (self.status(), self.authority.get()) {
            (IssuerStatus::Valid, Some(authority)) => Ok(authority),
            (IssuerStatus::Invalid, _) => Err(Error::NotReady(
                "issuer material is invalid, issuance is suspended".to_string(),
            )),
            _ => Err(Error::NotReady(
                "issuer material has not been loaded yet".to_string(),
            )),
        }
    }

    /// Most recently applied issuer, regardless of status.
    pub fn current_issuer(&self) -> Option<Arc<IssuerCredential>> {
        self.authority.get().map(CertificateAuthority::issuer)
    }

    pub fn issued_count(&self) -> u64 {
        self.authority
            .get()
            .map(CertificateAuthority::issued_count)
            .unwrap_or(0)
    }
}

/// Applies watcher events to the issuer state.
pub struct IssuerRotation {
    provider: Arc<dyn CredentialProvider>,
    state: Arc<IssuerState>,
    events: Arc<dyn EventPublisher>,
    deployment: ObjectReference,
}

impl IssuerRotation {
    pub fn new(
        provider: Arc<dyn CredentialProvider>,
        state: Arc<IssuerState>,
        events: Arc<dyn EventPublisher>,
        deployment: ObjectReference,
    ) -> Self {
        Self {
            provider,
            state,
            events,
            deployment,
        }
    }

    /// Wait for the watcher's first event. Invalid material at startup is fatal.
    pub async fn initialize(&self, rx: &mut WatchEvents) -> Result<()> {
        tokio::select! {
            Some(()) = rx.updates.recv() => {
                let credential = self.provider.load()?;
                info!(
                    issuer = %credential.name(),
                    not_after = %credential.not_after(),
                    "Loaded issuer credentials"
                );
                self.state.apply(credential);
                Ok(())
            }
            Some(e) = rx.errors.recv() => Err(Error::KeyMaterial(e)),
            else => Err(Error::Internal(
                "credentials watcher stopped before publishing".to_string(),
            )),
        }
    }

    /// Process events until cancelled or the watcher stops.
    ///
    /// While the issuer is valid a timer runs until its certificate expires;
    /// if no replacement arrives first, issuance is suspended.
    pub async fn run(self, mut rx: WatchEvents, cancel: CancellationToken) {
        loop {
            let expires_in = self.expires_in();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                update = rx.updates.recv() => match update {
                    Some(()) => self.on_update().await,
                    None => {
                        self.on_watcher_stopped().await;
                        break;
                    }
                },
                error = rx.errors.recv() => match error {
                    Some(e) => self.on_error(e).await,
                    None => {
                        self.on_watcher_stopped().await;
                        break;
                    }
                },
                _ = tokio::time::sleep(expires_in.unwrap_or_default()), if expires_in.is_some() => {
                    self.on_expired().await;
                }
            }
        }
        info!("Issuer rotation stopped");
    }

    fn expires_in(&self) -> Option<Duration> {
        if self.state.status() != IssuerStatus::Valid {
            return None;
        }
        self.state.current_issuer().map(|issuer| issuer.expires_in())
    }

    async fn on_update(&self) {
        match self.provider.load() {
            Ok(credential) => {
                let note = format!(
                    "Updated identity issuer {}, valid until {}",
                    credential.name(),
                    credential.not_after()
                );
                info!(
                    issuer = %credential.name(),
                    not_after = %credential.not_after(),
                    "Updated issuer credentials"
                );
                self.state.apply(credential);
                self.publish(EventType::Normal, reasons::ISSUER_UPDATED, note)
                    .await;
            }
            Err(e) => {
                warn!(error = %e, "Skipping issuer update, keeping previous issuer");
                self.publish(
                    EventType::Warning,
                    reasons::ISSUER_UPDATE_SKIPPED,
                    format!("Skipping issuer update: {}", e),
                )
                .await;
            }
        }
    }

    async fn on_error(&self, e: KeyMaterialError) {
        error!(error = %e, "Issuer credentials became invalid, suspending issuance");
        self.state.invalidate();
        self.publish(
            EventType::Warning,
            reasons::ISSUER_INVALID,
            format!("Issuer credentials are invalid: {}", e),
        )
        .await;
    }

    async fn on_expired(&self) {
        let not_after = self
            .state
            .current_issuer()
            .map(|issuer| issuer.not_after().to_string())
            .unwrap_or_default();
        error!(not_after = %not_after, "Issuer certificate expired with no replacement, suspending issuance");
        self.state.invalidate();
        self.publish(
            EventType::Warning,
            reasons::ISSUER_INVALID,
            format!("Issuer certificate expired at {}", not_after),
        )
        .await;
    }

    async fn on_watcher_stopped(&self) {
        error!("Credentials watcher stopped, suspending issuance");
        self.state.invalidate();
        self.publish(
            EventType::Warning,
            reasons::ISSUER_INVALID,
            "Credentials watcher stopped, issuer rotation is no longer observed".to_string(),
        )
        .await;
    }

    async fn publish(&self, type_: EventType, reason: &str, note: String) {
        self.events
            .publish(&self.deployment, type_, reason, actions::ROTATE, Some(note))
            .await;
    }
}

/// `Certify` gRPC service.
pub struct IdentityServiceImpl {
    state: Arc<IssuerState>,
    validator: Arc<TokenValidator>,
    events: Arc<dyn EventPublisher>,
    deployment: ObjectReference,
    metrics: Metrics,
}

impl IdentityServiceImpl {
    pub fn new(
        state: Arc<IssuerState>,
        validator: Arc<TokenValidator>,
        events: Arc<dyn EventPublisher>,
        deployment: ObjectReference,
        metrics: Metrics,
    ) -> Self {
        Self {
            state,
            validator,
            events,
            deployment,
            metrics,
        }
    }

    pub fn into_server(self) -> IdentityServer<Self> {
        IdentityServer::new(self)
    }

    async fn certify_request(&self, req: CertifyRequest) -> Result<CertifyResponse> {
        if req.identity.is_empty() {
            return Err(Error::Invalid("identity is required".to_string()));
        }
        if req.token.is_empty() {
            return Err(Error::Invalid("token is required".to_string()));
        }
        if req.certificate_signing_request.is_empty() {
            return Err(Error::Invalid(
                "certificate signing request is required".to_string(),
            ));
        }
        let token = String::from_utf8(req.token)
            .map_err(|_| Error::Invalid("token is not valid UTF-8".to_string()))?;

        // Fail fast before calling out to the API server.
        self.state.authority()?;

        let workload = self.validator.validate(&token, &req.identity).await?;

        let authority = self.state.authority()?;

        let issued = match self.issue(authority, &req.certificate_signing_request, &req.identity) {
            Ok(issued) => issued,
            Err(e) => {
                warn!(workload = %workload, error = %e, "Certificate issuance failed");
                self.publish(
                    EventType::Warning,
                    reasons::ISSUANCE_FAILED,
                    format!("Failed to issue certificate for {}: {}", req.identity, e),
                );
                return Err(e.into());
            }
        };

        self.metrics.record_issued();
        info!(
            workload = %workload,
            serial = issued.serial,
            not_after = %issued.not_after,
            "Issued certificate"
        );
        self.publish(
            EventType::Normal,
            reasons::ISSUED_LEAF_CERTIFICATE,
            format!(
                "Issued certificate for {} until {}",
                req.identity, issued.not_after
            ),
        );

        Ok(CertifyResponse {
            leaf_certificate: issued.certificate,
            intermediate_certificates: issued.chain,
            valid_until: issued.not_after.unix_timestamp(),
            trust_bundle_pem: issued.trust_anchors_pem,
        })
    }

    fn issue(
        &self,
        authority: &CertificateAuthority,
        csr: &[u8],
        identity: &str,
    ) -> std::result::Result<mesh_identity_pki::IssuedCertificate, IssuanceError> {
        let request = CertificateRequest::from_der(csr, identity)?;
        request.check_identity()?;
        authority.issue(&request)
    }

    /// Spawned so the RPC never waits on the Kubernetes API.
    fn publish(&self, type_: EventType, reason: &'static str, note: String) {
        let events = self.events.clone();
        let deployment = self.deployment.clone();
        tokio::spawn(async move {
            events
                .publish(&deployment, type_, reason, actions::CERTIFY, Some(note))
                .await;
        });
    }
}

#[tonic::async_trait]
impl Identity for IdentityServiceImpl {
    async fn certify(
        &self,
        request: Request<CertifyRequest>,
    ) -> std::result::Result<Response<CertifyResponse>, Status> {
        let req = request.into_inner();
        let span = info_span!(
            "certify",
            request_id = %uuid::Uuid::new_v4(),
            identity = %req.identity
        );

        self.certify_request(req)
            .instrument(span)
            .await
            .map(Response::new)
            .map_err(|e| {
                warn!(error = %e, "Certify request rejected");
                Status::from(e)
            })
    }
}
