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

//! CLI argument definitions.

use clap::Parser;

/// Mesh identity controller
#[derive(Parser, Debug)]
#[command(name = "mesh-identity")]
#[command(about = "Mesh identity controller\n\nIssues short-lived workload certificates from hot-rotated issuer material.")]
#[command(version)]
pub struct Cli {
    // === General ===
    /// Enable debug mode (human-readable logs)
    #[arg(long, env = "MESH_IDENTITY_DEBUG", default_value = "false")]
    pub debug: bool,

    /// Log level
    #[arg(long, env = "MESH_IDENTITY_LOG_LEVEL", default_value = "INFO")]
    pub log_level: String,

    // === Identity ===
    /// Trust domain, e.g. cluster.local
    #[arg(long, env = "MESH_IDENTITY_TRUST_DOMAIN", default_value = "cluster.local")]
    pub trust_domain: String,

    /// Namespace the controller runs in
    #[arg(long, env = "MESH_IDENTITY_CONTROLLER_NAMESPACE", default_value = "mesh-system")]
    pub controller_namespace: String,

    /// Credential provider: file, self-signed
    #[arg(long, env = "MESH_IDENTITY_CREDENTIAL_PROVIDER", default_value = "file")]
    pub credential_provider: String,

    /// Trust anchors as PEM or base64-encoded PEM (file provider)
    #[arg(long, env = "MESH_IDENTITY_TRUST_ANCHORS")]
    pub trust_anchors: Option<String>,

    /// Path to a trust anchors PEM file (file provider)
    #[arg(long, env = "MESH_IDENTITY_TRUST_ANCHORS_PATH")]
    pub trust_anchors_path: Option<String>,

    /// Directory holding the issuer key and certificate (file provider)
    #[arg(long, env = "MESH_IDENTITY_ISSUER_DIR", default_value = "/var/run/mesh/identity/issuer")]
    pub issuer_dir: String,

    /// Issuer private key file name
    #[arg(long, env = "MESH_IDENTITY_ISSUER_KEY_FILE", default_value = "tls.key")]
    pub issuer_key_file: String,

    /// Issuer certificate file name
    #[arg(long, env = "MESH_IDENTITY_ISSUER_CRT_FILE", default_value = "tls.crt")]
    pub issuer_crt_file: String,

    // === Issuance ===
    /// Lifetime of issued certificates in seconds
    #[arg(long, env = "MESH_IDENTITY_ISSUANCE_LIFETIME", default_value = "86400")]
    pub issuance_lifetime: u64,

    /// Clock skew allowance in seconds
    #[arg(long, env = "MESH_IDENTITY_CLOCK_SKEW_ALLOWANCE", default_value = "20")]
    pub clock_skew_allowance: u64,

    /// Quiet period in milliseconds that ends a burst of file changes
    #[arg(long, env = "MESH_IDENTITY_WATCH_DEBOUNCE_MS", default_value = "250")]
    pub watch_debounce_ms: u64,

    /// Audiences required of ServiceAccount tokens (comma separated)
    #[arg(long, env = "MESH_IDENTITY_TOKEN_AUDIENCES", value_delimiter = ',')]
    pub token_audiences: Vec<String>,

    // === Kubernetes ===
    /// Publish Kubernetes Events
    #[arg(long, env = "MESH_IDENTITY_EVENTS_ENABLED", default_value = "true")]
    pub events_enabled: bool,

    /// Name of the controller's Deployment, the subject of its Events
    #[arg(long, env = "MESH_IDENTITY_DEPLOYMENT_NAME", default_value = "mesh-identity")]
    pub deployment_name: String,

    // === Server ===
    /// Bind address
    #[arg(long, env = "MESH_IDENTITY_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// HTTP admin port
    #[arg(long, env = "MESH_IDENTITY_HTTP_PORT", default_value = "9990")]
    pub http_port: u16,

    /// gRPC port
    #[arg(long, env = "MESH_IDENTITY_GRPC_PORT", default_value = "8080")]
    pub grpc_port: u16,

    /// Enable metrics endpoint
    #[arg(long, env = "MESH_IDENTITY_METRICS_ENABLED", default_value = "true")]
    pub metrics_enabled: bool,

    // === Shutdown ===
    /// Shutdown grace period in seconds
    #[arg(long, env = "MESH_IDENTITY_SHUTDOWN_GRACE_PERIOD", default_value = "30")]
    pub shutdown_grace_period: u64,
}
