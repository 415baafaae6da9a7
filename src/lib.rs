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

//! Mesh Identity - workload certificate issuance for a service mesh.
//!
//! Workloads present a ServiceAccount token and a CSR; the controller
//! checks the token with the Kubernetes TokenReview API and signs a
//! short-lived certificate for the workload's identity name. Issuer
//! material is watched on disk and swapped in without a restart.

// PKI re-export
pub mod pki {
    pub use mesh_identity_pki::*;
}

// Core modules
pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod trust_domain;

// Credentials management
pub mod credentials;

// Services
pub mod events;
pub mod identity;
pub mod token;

// Server
pub mod server;

pub mod proto;

// Public API
pub use cli::Cli;
pub use config::Config;
pub use credentials::{CredentialProvider, CredentialsWatcher, FileProvider, SelfSignedProvider};
pub use error::{Error, Result};
pub use identity::{IdentityServiceImpl, IssuerRotation, IssuerState, IssuerStatus};
pub use metrics::Metrics;
pub use server::Server;
pub use token::{TokenValidator, WorkloadIdentity};
pub use trust_domain::TrustDomain;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
