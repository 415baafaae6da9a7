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

//! End-to-end tests of the Certify RPC and issuer rotation.

use async_trait::async_trait;
use k8s_openapi::api::authentication::v1::{TokenReviewStatus, UserInfo};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::EventType;
use mesh_identity::credentials::{self, CredentialProvider, WatchSender};
use mesh_identity::events::{EventPublisher, deployment_ref, reasons};
use mesh_identity::pki::testing::{Fixture, csr_for, csr_with_names};
use mesh_identity::pki::{
    CertificateAuthority, CertificateRequest, GeneratedCa, IssuerCredential, KeyMaterialError,
    TrustAnchors, Validity,
};
use mesh_identity::proto::identity::{CertifyRequest, identity_server::Identity};
use mesh_identity::token::{TokenError, TokenReviewer};
use mesh_identity::{
    IdentityServiceImpl, IssuerRotation, IssuerState, IssuerStatus, Metrics, TokenValidator,
    TrustDomain,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;
use tonic::{Code, Request};

const ISSUER: &str = "identity.mesh-system.cluster.local";
const WEB: &str = "web.emojivoto.serviceaccount.identity.mesh-system.cluster.local";
const VOTING: &str = "voting.emojivoto.serviceaccount.identity.mesh-system.cluster.local";
const WEB_TOKEN: &str = "web-token";

struct FakeReviewer {
    users: HashMap<String, String>,
}

#[async_trait]
impl TokenReviewer for FakeReviewer {
    async fn review(
        &self,
        token: &str,
        _audiences: &[String],
    ) -> Result<TokenReviewStatus, TokenError> {
        Ok(match self.users.get(token) {
            Some(username) => TokenReviewStatus {
                authenticated: Some(true),
                user: Some(UserInfo {
                    username: Some(username.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            None => TokenReviewStatus {
                authenticated: Some(false),
                error: Some("invalid bearer token".to_string()),
                ..Default::default()
            },
        })
    }
}

#[derive(Default)]
struct RecordingPublisher {
    reasons: Mutex<Vec<String>>,
}

impl RecordingPublisher {
    fn reasons(&self) -> Vec<String> {
        self.reasons.lock().unwrap().clone()
    }

    async fn wait_for(&self, reason: &str) -> bool {
        for _ in 0..100 {
            if self.reasons().iter().any(|r| r == reason) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
        self.reasons.lock().unwrap().push(reason.to_string());
    }
}

/// Serves whichever fixture is currently installed.
struct SwappableProvider {
    current: Mutex<Fixture>,
}

#[async_trait]
impl CredentialProvider for SwappableProvider {
    fn issuer_name(&self) -> &str {
        ISSUER
    }

    fn load(&self) -> Result<IssuerCredential, KeyMaterialError> {
        Ok(self.current.lock().unwrap().credential())
    }

    async fn watch(&self, _tx: WatchSender, cancel: CancellationToken) -> mesh_identity::Result<()> {
        cancel.cancelled().await;
        Ok(())
    }
}

struct Harness {
    fixture: Fixture,
    state: Arc<IssuerState>,
    events: Arc<RecordingPublisher>,
    service: IdentityServiceImpl,
}

impl Harness {
    fn new() -> Self {
        let fixture = Fixture::new(ISSUER);
        let state = Arc::new(IssuerState::new(Validity::default()));
        let events = Arc::new(RecordingPublisher::default());
        let reviewer = FakeReviewer {
            users: HashMap::from([(
                WEB_TOKEN.to_string(),
                "system:serviceaccount:emojivoto:web".to_string(),
            )]),
        };
        let validator = Arc::new(TokenValidator::new(
            Arc::new(reviewer),
            TrustDomain::new("mesh-system", "cluster.local").unwrap(),
            vec![],
        ));
        let service = IdentityServiceImpl::new(
            state.clone(),
            validator,
            events.clone(),
            deployment_ref("mesh-system", "mesh-identity"),
            Metrics::new().unwrap(),
        );
        Self {
            fixture,
            state,
            events,
            service,
        }
    }

    fn ready(self) -> Self {
        self.state.apply(self.fixture.credential());
        self
    }
}

fn request(identity: &str, token: &str, csr: Vec<u8>) -> Request<CertifyRequest> {
    Request::new(CertifyRequest {
        identity: identity.to_string(),
        token: token.as_bytes().to_vec(),
        certificate_signing_request: csr,
    })
}

#[tokio::test]
async fn issues_certificate_for_own_identity() {
    let h = Harness::new().ready();

    let response = assert_ok!(
        h.service
            .certify(request(WEB, WEB_TOKEN, csr_for(WEB)))
            .await
    )
    .into_inner();

    let anchors = TrustAnchors::from_pem(&response.trust_bundle_pem).unwrap();
    assert_ok!(anchors.verify(
        &response.leaf_certificate,
        &response.intermediate_certificates,
        WEB
    ));
    assert_eq!(response.intermediate_certificates.len(), 1);
    assert_eq!(
        response.trust_bundle_pem.trim(),
        h.fixture.anchors_pem().trim()
    );
    assert!(response.valid_until > time_now());
    assert_eq!(h.state.issued_count(), 1);
    assert!(h.events.wait_for(reasons::ISSUED_LEAF_CERTIFICATE).await);
}

#[tokio::test]
async fn rejects_request_for_another_workloads_identity() {
    let h = Harness::new().ready();

    let status = assert_err!(
        h.service
            .certify(request(VOTING, WEB_TOKEN, csr_for(VOTING)))
            .await
    );

    assert_eq!(status.code(), Code::PermissionDenied);
    assert_eq!(h.state.issued_count(), 0);
}

#[tokio::test]
async fn rejects_unknown_token() {
    let h = Harness::new().ready();

    let status = assert_err!(
        h.service
            .certify(request(WEB, "stolen", csr_for(WEB)))
            .await
    );

    assert_eq!(status.code(), Code::Unauthenticated);
    assert!(h.events.reasons().is_empty());
}

#[tokio::test]
async fn rejects_malformed_requests() {
    let h = Harness::new().ready();

    for req in [
        request("", WEB_TOKEN, csr_for(WEB)),
        request(WEB, "", csr_for(WEB)),
        request(WEB, WEB_TOKEN, vec![]),
    ] {
        let status = assert_err!(h.service.certify(req).await);
        assert_eq!(status.code(), Code::InvalidArgument);
    }
}

#[tokio::test]
async fn rejects_csr_not_naming_the_identity() {
    let h = Harness::new().ready();

    let status = assert_err!(
        h.service
            .certify(request(WEB, WEB_TOKEN, csr_with_names(&[WEB, VOTING])))
            .await
    );
    assert_eq!(status.code(), Code::InvalidArgument);

    let status = assert_err!(
        h.service
            .certify(request(WEB, WEB_TOKEN, b"not a csr".to_vec()))
            .await
    );
    assert_eq!(status.code(), Code::InvalidArgument);

    assert!(h.events.wait_for(reasons::ISSUANCE_FAILED).await);
}

#[tokio::test]
async fn refuses_issuance_before_material_is_loaded() {
    let h = Harness::new();

    let status = assert_err!(
        h.service
            .certify(request(WEB, WEB_TOKEN, csr_for(WEB)))
            .await
    );

    assert_eq!(status.code(), Code::FailedPrecondition);
}

#[tokio::test]
async fn expired_issuer_is_a_failed_precondition() {
    let h = Harness::new();
    let root = GeneratedCa::root("root.mesh-system.cluster.local").unwrap();
    let issuer = root
        .intermediate(
            ISSUER,
            Validity::new(Duration::from_secs(2), Duration::ZERO),
            None,
        )
        .unwrap();
    h.state.apply(
        IssuerCredential::from_pem(root.cert_pem(), issuer.key_pem(), issuer.cert_pem(), ISSUER)
            .unwrap(),
    );

    tokio::time::sleep(Duration::from_secs(4)).await;

    let status = assert_err!(
        h.service
            .certify(request(WEB, WEB_TOKEN, csr_for(WEB)))
            .await
    );
    assert_eq!(status.code(), Code::FailedPrecondition);
    assert_eq!(h.state.issued_count(), 0);
    assert!(h.events.wait_for(reasons::ISSUANCE_FAILED).await);
}

#[tokio::test]
async fn fails_closed_on_invalid_rotation_until_next_update() {
    let h = Harness::new().ready();
    let provider = Arc::new(SwappableProvider {
        current: Mutex::new(h.fixture.clone()),
    });
    let rotation = IssuerRotation::new(
        provider.clone(),
        h.state.clone(),
        h.events.clone(),
        deployment_ref("mesh-system", "mesh-identity"),
    );
    let (tx, rx) = credentials::channel();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(rotation.run(rx, cancel.clone()));
    let mut status = h.state.subscribe();

    assert!(
        tx.failed(KeyMaterialError::InvalidIssuerCredential(
            "issuer no longer chains to the trust anchor".to_string()
        ))
        .await
    );
    wait_for_status(&mut status, IssuerStatus::Invalid).await;

    let denied = assert_err!(
        h.service
            .certify(request(WEB, WEB_TOKEN, csr_for(WEB)))
            .await
    );
    assert_eq!(denied.code(), Code::FailedPrecondition);

    let rotated = h.fixture.rotate();
    *provider.current.lock().unwrap() = rotated.clone();
    assert!(tx.updated().await);
    wait_for_status(&mut status, IssuerStatus::Valid).await;

    let response = assert_ok!(
        h.service
            .certify(request(WEB, WEB_TOKEN, csr_for(WEB)))
            .await
    )
    .into_inner();
    let rotated_issuer = ::pem::parse(rotated.issuer.cert_pem()).unwrap();
    assert_eq!(
        response.intermediate_certificates,
        vec![rotated_issuer.contents().to_vec()]
    );

    let seen = h.events.reasons();
    assert!(seen.iter().any(|r| r == reasons::ISSUER_INVALID));
    assert!(seen.iter().any(|r| r == reasons::ISSUER_UPDATED));

    cancel.cancel();
    assert_ok!(task.await);
}

#[test]
fn issued_certificate_verifies_against_anchor_for_requested_name() {
    let fixture = Fixture::new("identity.linkerd.cluster.local");
    let ca = CertificateAuthority::new(fixture.credential(), Validity::default());
    let name = "default.default.serviceaccount.identity.cluster.local";

    let request = CertificateRequest::from_der(&csr_for(name), name).unwrap();
    let issued = ca.issue(&request).unwrap();

    let anchors = TrustAnchors::from_pem(fixture.anchors_pem()).unwrap();
    assert_ok!(anchors.verify(&issued.certificate, &issued.chain, name));
}

async fn wait_for_status(rx: &mut tokio::sync::watch::Receiver<IssuerStatus>, want: IssuerStatus) {
    let result = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == want)).await;
    assert!(matches!(result, Ok(Ok(_))), "status never became {:?}", want);
}

fn time_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}
