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

//! Full server lifecycle: startup, Certify over gRPC, admin HTTP, shutdown.

use async_trait::async_trait;
use k8s_openapi::api::authentication::v1::{TokenReviewStatus, UserInfo};
use mesh_identity::config::ProviderConfig;
use mesh_identity::events::NoopEventPublisher;
use mesh_identity::pki::testing::csr_for;
use mesh_identity::pki::{TrustAnchors, Validity};
use mesh_identity::proto::identity::{CertifyRequest, identity_client::IdentityClient};
use mesh_identity::token::{TokenError, TokenReviewer};
use mesh_identity::{
    Config, IssuerStatus, SelfSignedProvider, Server, TokenValidator, TrustDomain,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;

const WEB: &str = "web.emojivoto.serviceaccount.identity.mesh-system.cluster.local";

struct AcceptAll;

#[async_trait]
impl TokenReviewer for AcceptAll {
    async fn review(
        &self,
        _token: &str,
        _audiences: &[String],
    ) -> Result<TokenReviewStatus, TokenError> {
        Ok(TokenReviewStatus {
            authenticated: Some(true),
            user: Some(UserInfo {
                username: Some("system:serviceaccount:emojivoto:web".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

fn free_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        path
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

fn config(http_addr: SocketAddr, grpc_addr: SocketAddr) -> Config {
    Config {
        debug: true,
        log_level: "INFO".to_string(),
        trust_domain: TrustDomain::new("mesh-system", "cluster.local").unwrap(),
        provider: ProviderConfig::SelfSigned,
        validity: Validity::default(),
        watch_debounce: Duration::from_millis(50),
        token_audiences: vec![],
        events_enabled: false,
        deployment_name: "mesh-identity".to_string(),
        http_addr,
        grpc_addr,
        metrics_enabled: true,
        shutdown_grace_period: Duration::from_secs(5),
    }
}

fn self_signed_server(config: Config) -> (Server, String) {
    let provider = Arc::new(SelfSignedProvider::new(&config.trust_domain).unwrap());
    let anchors_pem = provider.trust_anchors_pem().to_string();
    let validator = Arc::new(TokenValidator::new(
        Arc::new(AcceptAll),
        config.trust_domain.clone(),
        vec![],
    ));
    let server = Server::with_components(
        config,
        provider,
        validator,
        Arc::new(NoopEventPublisher),
    );
    (server, anchors_pem)
}

#[tokio::test]
async fn serves_certify_and_admin_endpoints_until_shutdown() {
    let http_addr = free_addr();
    let grpc_addr = free_addr();
    let (server, anchors_pem) = self_signed_server(config(http_addr, grpc_addr));

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(server.run_until(async {
        let _ = stop_rx.await;
    }));

    let mut client = None;
    for _ in 0..100 {
        if let Ok(c) = IdentityClient::connect(format!("http://{}", grpc_addr)).await {
            client = Some(c);
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let mut client = client.expect("gRPC server did not come up");

    let response = client
        .certify(CertifyRequest {
            identity: WEB.to_string(),
            token: b"token".to_vec(),
            certificate_signing_request: csr_for(WEB),
        })
        .await
        .unwrap()
        .into_inner();

    let anchors = TrustAnchors::from_pem(&anchors_pem).unwrap();
    anchors
        .verify(
            &response.leaf_certificate,
            &response.intermediate_certificates,
            WEB,
        )
        .unwrap();
    // The self-signed anchor is the issuer, so no intermediates are returned.
    assert!(response.intermediate_certificates.is_empty());

    let ready = http_get(http_addr, "/ready").await;
    assert!(ready.starts_with("HTTP/1.1 200"), "{}", ready);

    let bundle = http_get(http_addr, "/v1/trust-bundle").await;
    assert!(bundle.contains(anchors_pem.trim()));

    let metrics = http_get(http_addr, "/metrics").await;
    assert!(metrics.contains("mesh_identity_issued_certificates_total 1"));

    stop_tx.send(()).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(10), task).await;
    assert!(matches!(result, Ok(Ok(Ok(())))));
}

#[tokio::test]
async fn grpc_port_in_use_fails_the_run() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let grpc_addr = taken.local_addr().unwrap();
    let (server, _) = self_signed_server(config(free_addr(), grpc_addr));

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        server.run_until(std::future::pending::<()>()),
    )
    .await;

    assert!(matches!(result, Ok(Err(_))), "{:?}", result);
    drop(taken);
}

#[tokio::test]
async fn http_port_in_use_fails_before_startup() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let http_addr = taken.local_addr().unwrap();
    let (server, _) = self_signed_server(config(http_addr, free_addr()));
    let state = server.issuer_state();

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        server.run_until(std::future::pending::<()>()),
    )
    .await;

    assert!(matches!(result, Ok(Err(_))), "{:?}", result);
    assert_eq!(state.status(), IssuerStatus::Uninitialized);
    drop(taken);
}
