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

//! Prometheus metrics.

use crate::error::{Error, Result};
use crate::identity::{IssuerState, IssuerStatus};
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Metrics exported on `/metrics`.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    issuer_valid: IntGauge,
    issuer_expiry: IntGauge,
    issued_certificates: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let issuer_valid = IntGauge::new(
            "mesh_identity_issuer_valid",
            "Whether issuer material is valid",
        )?;
        let issuer_expiry = IntGauge::new(
            "mesh_identity_issuer_expiry_timestamp_seconds",
            "Expiry of the current issuer certificate",
        )?;
        let issued_certificates = IntCounter::new(
            "mesh_identity_issued_certificates_total",
            "Certificates issued",
        )?;

        registry.register(Box::new(issuer_valid.clone()))?;
        registry.register(Box::new(issuer_expiry.clone()))?;
        registry.register(Box::new(issued_certificates.clone()))?;

        Ok(Self {
            registry,
            issuer_valid,
            issuer_expiry,
            issued_certificates,
        })
    }

    pub fn record_issued(&self) {
        self.issued_certificates.inc();
    }

    /// Refresh the issuer gauges from `state` and encode in the text format.
    pub fn render(&self, state: &IssuerState) -> Result<String> {
        self.issuer_valid
            .set(i64::from(state.status() == IssuerStatus::Valid));
        if let Some(issuer) = state.current_issuer() {
            self.issuer_expiry.set(issuer.not_after().unix_timestamp());
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| Error::Internal(format!("metrics are not UTF-8: {}", e)))
    }
}
