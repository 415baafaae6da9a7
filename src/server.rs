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

//! Server orchestration.

use crate::config::{Config, ProviderConfig};
use crate::credentials::{self, CredentialProvider, FileProvider, SelfSignedProvider};
use crate::error::{Error, Result};
use crate::events::{self, EventPublisher, KubeEventPublisher, NoopEventPublisher};
use crate::handlers::{self, AppState};
use crate::identity::{IdentityServiceImpl, IssuerRotation, IssuerState};
use crate::metrics::Metrics;
use crate::token::{KubeTokenReviewer, TokenValidator};
use axum::{Router, routing::get};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server as TonicServer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// File descriptor for gRPC reflection
const FILE_DESCRIPTOR_SET: &[u8] = include_bytes!("proto/descriptor.bin");

/// Reporting component on published Events
const CONTROLLER_NAME: &str = "mesh-identity";

/// Mesh identity server
pub struct Server {
    config: Config,
    provider: Arc<dyn CredentialProvider>,
    validator: Arc<TokenValidator>,
    events: Arc<dyn EventPublisher>,
    state: Arc<IssuerState>,
}

impl Server {
    /// Create a server talking to the cluster from the ambient kubeconfig
    pub async fn new(config: Config) -> Result<Self> {
        let client = kube::Client::try_default().await?;

        let provider: Arc<dyn CredentialProvider> = match &config.provider {
            ProviderConfig::File {
                trust_anchors,
                issuer_dir,
                key_file,
                crt_file,
            } => Arc::new(FileProvider {
                issuer_name: config.trust_domain.issuer_name(),
                trust_anchors: trust_anchors.clone(),
                issuer_dir: issuer_dir.clone(),
                key_file: key_file.clone(),
                crt_file: crt_file.clone(),
                debounce: config.watch_debounce,
            }),
            ProviderConfig::SelfSigned => Arc::new(SelfSignedProvider::new(&config.trust_domain)?),
        };

        let events: Arc<dyn EventPublisher> = if config.events_enabled {
            Arc::new(KubeEventPublisher::new(client.clone(), CONTROLLER_NAME))
        } else {
            Arc::new(NoopEventPublisher)
        };

        let validator = Arc::new(TokenValidator::new(
            Arc::new(KubeTokenReviewer::new(client)),
            config.trust_domain.clone(),
            config.token_audiences.clone(),
        ));

        Ok(Self::with_components(config, provider, validator, events))
    }

    /// Create a server from explicit collaborators
    pub fn with_components(
        config: Config,
        provider: Arc<dyn CredentialProvider>,
        validator: Arc<TokenValidator>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        let state = Arc::new(IssuerState::new(config.validity));
        Self {
            config,
            provider,
            validator,
            events,
            state,
        }
    }

    pub fn issuer_state(&self) -> Arc<IssuerState> {
        self.state.clone()
    }

    /// Run until SIGINT or SIGTERM
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `shutdown` resolves, then drain within the grace period.
    ///
    /// Returns an error if either server stops on its own.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let http_addr = self.config.http_addr;
        let grpc_addr = self.config.grpc_addr;

        // Fallible setup happens before any task is spawned.
        let metrics = Metrics::new()?;
        let reflection_service = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()?;
        let http_listener = tokio::net::TcpListener::bind(http_addr).await?;
        let cancel = CancellationToken::new();

        let deployment = events::deployment_ref(
            self.config.trust_domain.controller_namespace(),
            &self.config.deployment_name,
        );

        // ====================================================================
        // Issuer credentials
        // ====================================================================
        let (tx, mut rx) = credentials::channel();
        let watch_task = {
            let provider = self.provider.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = provider.watch(tx, cancel).await {
                    error!(error = %e, "Credentials watcher failed");
                }
            })
        };

        let rotation = IssuerRotation::new(
            self.provider.clone(),
            self.state.clone(),
            self.events.clone(),
            deployment.clone(),
        );
        if let Err(e) = rotation.initialize(&mut rx).await {
            cancel.cancel();
            let _ = watch_task.await;
            return Err(e);
        }
        let rotation_task = tokio::spawn(rotation.run(rx, cancel.clone()));

        // ====================================================================
        // HTTP admin
        // ====================================================================
        let state = AppState {
            issuer: self.state.clone(),
            trust_domain: self.config.trust_domain.clone(),
            metrics: metrics.clone(),
        };

        let mut http_router = Router::new()
            // Discovery
            .route(
                "/.well-known/mesh-identity.json",
                get(handlers::identity_metadata),
            )
            .route("/v1/trust-bundle", get(handlers::trust_bundle))
            // Health
            .route("/health", get(handlers::health))
            .route("/ready", get(handlers::ready));

        // Metrics (optional)
        if self.config.metrics_enabled {
            http_router = http_router.route("/metrics", get(handlers::metrics));
        }

        let http_router = http_router
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        // ====================================================================
        // gRPC Server with Reflection
        // ====================================================================
        let identity_service = IdentityServiceImpl::new(
            self.state.clone(),
            self.validator.clone(),
            self.events.clone(),
            deployment,
            metrics,
        );

        let grpc_builder = TonicServer::builder()
            .add_service(reflection_service)
            .add_service(identity_service.into_server());

        // ====================================================================
        // Logging
        // ====================================================================
        info!("[MESH-IDENTITY]: Starting servers");
        info!("");
        info!("  HTTP Admin: http://{}", http_addr);
        info!("    GET  /.well-known/mesh-identity.json");
        info!("    GET  /v1/trust-bundle");
        info!("    GET  /health");
        info!("    GET  /ready");
        if self.config.metrics_enabled {
            info!("    GET  /metrics");
        }
        info!("");
        info!("  gRPC Server: {}", grpc_addr);
        info!("    mesh.identity.v1.Identity/Certify");
        info!("");

        // ====================================================================
        // Start servers
        // ====================================================================
        let mut http_task = tokio::spawn(
            axum::serve(http_listener, http_router)
                .with_graceful_shutdown(cancel.clone().cancelled_owned())
                .into_future(),
        );
        let mut grpc_task = tokio::spawn(
            grpc_builder.serve_with_shutdown(grpc_addr, cancel.clone().cancelled_owned()),
        );

        let mut http_done = false;
        let mut grpc_done = false;
        let outcome: Result<()> = tokio::select! {
            res = &mut http_task => {
                http_done = true;
                Err(stopped("HTTP", res.map(|r| r.map_err(Error::from))))
            }
            res = &mut grpc_task => {
                grpc_done = true;
                Err(stopped("gRPC", res.map(|r| r.map_err(Error::from))))
            }
            _ = shutdown => Ok(()),
        };

        // ====================================================================
        // Drain
        // ====================================================================
        cancel.cancel();
        let grace = self.config.shutdown_grace_period;
        let drain = async {
            if !http_done {
                let _ = http_task.await;
            }
            if !grpc_done {
                let _ = grpc_task.await;
            }
            let _ = rotation_task.await;
            let _ = watch_task.await;
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!(grace_period = ?grace, "Shutdown grace period elapsed, exiting with requests in flight");
        }

        info!("Server shutdown complete");
        outcome
    }
}

/// Log a server that exited before shutdown and turn it into an error.
fn stopped(name: &str, res: std::result::Result<Result<()>, tokio::task::JoinError>) -> Error {
    match res {
        Ok(Ok(())) => {
            warn!(server = name, "Server stopped unexpectedly");
            Error::Internal(format!("{} server stopped unexpectedly", name))
        }
        Ok(Err(e)) => {
            error!(server = name, error = %e, "Server error");
            e
        }
        Err(e) => {
            error!(server = name, error = %e, "Server task failed");
            Error::Internal(format!("{} server task failed: {}", name, e))
        }
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("Shutting down gracefully...");
}
