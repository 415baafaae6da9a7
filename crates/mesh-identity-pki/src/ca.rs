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

//! End-entity certificate authority.
//!
//! The CA signs leaf certificates for workload identities with the current
//! issuer credential. The credential can be swapped at any time. Each
//! issuance validates the request first, then captures the credential and
//! its serial number under one short lock and signs outside of it, so a
//! certificate is always produced by a single, complete issuer generation.

use crate::csr::CertificateRequest;
use crate::error::IssuanceError;
use crate::material::IssuerCredential;
use crate::validity::Validity;
use rcgen::{
    string::Ia5String, CertificateParams, DistinguishedName, ExtendedKeyUsagePurpose, IsCa,
    KeyUsagePurpose, SanType, SerialNumber,
};
use ::time::OffsetDateTime;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// A signed end-entity certificate and what the caller needs to use it.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    /// DER encoding of the leaf certificate
    pub certificate: Vec<u8>,
    /// Issuer chain up to, but excluding, the trust anchor
    pub chain: Vec<Vec<u8>>,
    /// Trust anchors of the issuer generation that signed the leaf
    pub trust_anchors_pem: String,
    pub serial: u64,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

struct State {
    issuer: Arc<IssuerCredential>,
    next_serial: u64,
}

/// Certificate authority for workload identities.
pub struct CertificateAuthority {
    state: Mutex<State>,
    issued: AtomicU64,
    validity: Validity,
}

impl CertificateAuthority {
    pub fn new(issuer: IssuerCredential, validity: Validity) -> Self {
        Self {
            state: Mutex::new(State {
                issuer: Arc::new(issuer),
                next_serial: 1,
            }),
            issued: AtomicU64::new(0),
            validity,
        }
    }

    pub fn validity(&self) -> &Validity {
        &self.validity
    }

    /// The issuer credential new certificates are currently signed with.
    pub fn issuer(&self) -> Arc<IssuerCredential> {
        self.lock().issuer.clone()
    }

    /// Number of certificates successfully signed over this CA's lifetime.
    pub fn issued_count(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }

    /// Replace the issuer credential for subsequent issuance.
    ///
    /// Issuance already in flight finishes with the credential it captured.
    /// The serial counter carries over.
    pub fn update_issuer(&self, issuer: IssuerCredential) {
        let issuer = Arc::new(issuer);
        let mut state = self.lock();
        debug!(
            issuer = %issuer.name(),
            not_after = %issuer.not_after(),
            "Swapping issuer credential"
        );
        state.issuer = issuer;
    }

    /// Sign a leaf certificate for the request's identity.
    ///
    /// Refuses once the current issuer has expired; the leaf would be born
    /// invalid.
    pub fn issue(&self, request: &CertificateRequest) -> Result<IssuedCertificate, IssuanceError> {
        let dns_name = Ia5String::try_from(request.identity().to_string()).map_err(|e| {
            IssuanceError::IssuanceFailed(format!(
                "invalid DNS name '{}': {}",
                request.identity(),
                e
            ))
        })?;
        let public_key = request.public_key()?;

        let now = OffsetDateTime::now_utc();
        let (not_before, window_end) = self.validity.window(now).ok_or_else(|| {
            IssuanceError::IssuanceFailed("validity window is out of range".to_string())
        })?;

        let (issuer, serial) = {
            let mut state = self.lock();
            if now >= state.issuer.not_after() {
                return Err(IssuanceError::IssuerExpired(
                    state.issuer.not_after().to_string(),
                ));
            }
            let serial = state.next_serial;
            state.next_serial += 1;
            (state.issuer.clone(), serial)
        };
        let not_after = window_end.min(issuer.not_after());

        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        params.subject_alt_names = vec![SanType::DnsName(dns_name)];
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        params.use_authority_key_identifier_extension = true;
        params.serial_number = Some(serial_number(serial));
        params.not_before = not_before;
        params.not_after = not_after;

        let certificate = params
            .signed_by(&public_key, issuer.signer())
            .map_err(|e| {
                IssuanceError::IssuanceFailed(format!("failed to sign certificate: {}", e))
            })?;
        self.issued.fetch_add(1, Ordering::Relaxed);

        Ok(IssuedCertificate {
            certificate: certificate.der().to_vec(),
            chain: issuer.chain(),
            trust_anchors_pem: issuer.trust_anchors().pem().to_string(),
            serial,
            not_before,
            not_after,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Minimal big-endian encoding of a positive serial.
fn serial_number(serial: u64) -> SerialNumber {
    let bytes = serial.to_be_bytes();
    let start = bytes
        .iter()
        .position(|b| *b != 0)
        .unwrap_or(bytes.len() - 1);
    SerialNumber::from_slice(&bytes[start..])
}
