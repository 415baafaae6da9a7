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

//! Configuration management.

use crate::cli::Cli;
use crate::credentials::TrustAnchorSource;
use crate::error::{Error, Result};
use crate::trust_domain::TrustDomain;
use base64::Engine;
use mesh_identity_pki::Validity;
use mesh_identity_pki::validity::{MAX_CLOCK_SKEW_ALLOWANCE, MAX_LIFETIME};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Where issuer credentials come from.
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    /// Issuer key and certificate files, watched for rotation
    File {
        trust_anchors: TrustAnchorSource,
        issuer_dir: PathBuf,
        key_file: String,
        crt_file: String,
    },
    /// Ephemeral self-signed root generated at startup
    SelfSigned,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub debug: bool,
    pub log_level: String,

    // Identity
    pub trust_domain: TrustDomain,
    pub provider: ProviderConfig,
    pub validity: Validity,
    pub watch_debounce: Duration,
    pub token_audiences: Vec<String>,

    // Kubernetes
    pub events_enabled: bool,
    pub deployment_name: String,

    // Server
    pub http_addr: SocketAddr,
    pub grpc_addr: SocketAddr,
    pub metrics_enabled: bool,
    pub shutdown_grace_period: Duration,
}

impl TryFrom<Cli> for Config {
    type Error = Error;

    fn try_from(cli: Cli) -> Result<Self> {
        let http_addr: SocketAddr = format!("{}:{}", cli.bind_address, cli.http_port)
            .parse()
            .map_err(|e| Error::Config(format!("Invalid HTTP address: {}", e)))?;

        let grpc_addr: SocketAddr = format!("{}:{}", cli.bind_address, cli.grpc_port)
            .parse()
            .map_err(|e| Error::Config(format!("Invalid gRPC address: {}", e)))?;

        if http_addr == grpc_addr {
            return Err(Error::Config(
                "HTTP and gRPC ports must differ".to_string(),
            ));
        }

        let trust_domain = TrustDomain::new(&cli.controller_namespace, &cli.trust_domain)?;

        let provider = match cli.credential_provider.as_str() {
            "file" => {
                let trust_anchors = match (cli.trust_anchors, cli.trust_anchors_path) {
                    (Some(value), None) => TrustAnchorSource::Inline(decode_trust_anchors(&value)?),
                    (None, Some(path)) => TrustAnchorSource::File(PathBuf::from(path)),
                    (Some(_), Some(_)) => {
                        return Err(Error::Config(
                            "Set either trust anchors or a trust anchors path, not both".to_string(),
                        ));
                    }
                    (None, None) => {
                        return Err(Error::Config(
                            "The file credential provider requires trust anchors".to_string(),
                        ));
                    }
                };
                ProviderConfig::File {
                    trust_anchors,
                    issuer_dir: PathBuf::from(cli.issuer_dir),
                    key_file: cli.issuer_key_file,
                    crt_file: cli.issuer_crt_file,
                }
            }
            "self-signed" => ProviderConfig::SelfSigned,
            other => {
                return Err(Error::Config(format!(
                    "Unknown credential provider '{}' (expected file or self-signed)",
                    other
                )));
            }
        };

        let lifetime = Duration::from_secs(cli.issuance_lifetime);
        if lifetime.is_zero() || lifetime > MAX_LIFETIME {
            return Err(Error::Config(format!(
                "Issuance lifetime must be between 1 and {} seconds",
                MAX_LIFETIME.as_secs()
            )));
        }
        let clock_skew_allowance = Duration::from_secs(cli.clock_skew_allowance);
        if clock_skew_allowance > MAX_CLOCK_SKEW_ALLOWANCE {
            return Err(Error::Config(format!(
                "Clock skew allowance must be at most {} seconds",
                MAX_CLOCK_SKEW_ALLOWANCE.as_secs()
            )));
        }

        let token_audiences = cli
            .token_audiences
            .into_iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();

        Ok(Self {
            debug: cli.debug,
            log_level: cli.log_level,
            trust_domain,
            provider,
            validity: Validity::new(lifetime, clock_skew_allowance),
            watch_debounce: Duration::from_millis(cli.watch_debounce_ms),
            token_audiences,
            events_enabled: cli.events_enabled,
            deployment_name: cli.deployment_name,
            http_addr,
            grpc_addr,
            metrics_enabled: cli.metrics_enabled,
            shutdown_grace_period: Duration::from_secs(cli.shutdown_grace_period),
        })
    }
}

/// Accept PEM as-is, or base64-encoded PEM as delivered through env vars.
fn decode_trust_anchors(value: &str) -> Result<String> {
    let value = value.trim();
    if value.contains("-----BEGIN") {
        return Ok(value.to_string());
    }
    let compact: String = value.split_whitespace().collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| Error::Config(format!("Trust anchors are neither PEM nor base64: {}", e)))?;
    String::from_utf8(bytes)
        .map_err(|e| Error::Config(format!("Decoded trust anchors are not UTF-8: {}", e)))
}
