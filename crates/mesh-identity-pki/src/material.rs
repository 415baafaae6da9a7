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

//! Issuer key material loading and validation.
//!
//! An [`IssuerCredential`] is only ever constructed from material that has
//! passed every check: the trust anchors parse, the issuer certificate and
//! key parse and belong together, the key is ECDSA P-256, and the issuer
//! chains to the anchors under the expected identity name.

use crate::error::KeyMaterialError;
use crate::verify::{self, TrustAnchors};
use ::time::OffsetDateTime;
use rcgen::{Issuer, KeyPair, PublicKeyData};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use x509_parser::prelude::{FromDer, X509Certificate};

/// Issuer certificate chain and signing key, validated against trust anchors.
pub struct IssuerCredential {
    name: String,
    trust_anchors: TrustAnchors,
    /// Issuer certificate first, then any intermediates from the certificate file.
    chain: Vec<Vec<u8>>,
    certificate_pem: String,
    not_after: OffsetDateTime,
    signer: Issuer<'static, KeyPair>,
}

impl fmt::Debug for IssuerCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuerCredential")
            .field("name", &self.name)
            .field("chain_len", &self.chain.len())
            .field("not_after", &self.not_after)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl IssuerCredential {
    /// Validate issuer material held in memory.
    pub fn from_pem(
        trust_anchors_pem: &str,
        issuer_key_pem: &str,
        issuer_crt_pem: &str,
        expected_name: &str,
    ) -> Result<Self, KeyMaterialError> {
        let trust_anchors = TrustAnchors::from_pem(trust_anchors_pem)?;

        let blocks = ::pem::parse_many(issuer_crt_pem.as_bytes()).map_err(|e| {
            KeyMaterialError::InvalidIssuerCredential(format!(
                "failed to parse issuer certificate PEM: {}",
                e
            ))
        })?;
        let certificates: Vec<&::pem::Pem> =
            blocks.iter().filter(|b| b.tag() == "CERTIFICATE").collect();
        let Some(issuer_block) = certificates.first() else {
            return Err(KeyMaterialError::InvalidIssuerCredential(
                "no issuer certificate found".to_string(),
            ));
        };

        let (_, issuer_cert) = X509Certificate::from_der(issuer_block.contents()).map_err(|e| {
            KeyMaterialError::InvalidIssuerCredential(format!(
                "failed to parse issuer certificate: {}",
                e
            ))
        })?;

        let key = KeyPair::from_pem(issuer_key_pem).map_err(|e| {
            KeyMaterialError::InvalidIssuerCredential(format!("failed to parse issuer key: {}", e))
        })?;

        if key.algorithm() != &rcgen::PKCS_ECDSA_P256_SHA256 {
            return Err(KeyMaterialError::InvalidIssuerCredential(
                "issuer key must be an ECDSA P-256 key".to_string(),
            ));
        }

        if key.der_bytes() != issuer_cert.public_key().subject_public_key.data.as_ref() {
            return Err(KeyMaterialError::InvalidIssuerCredential(
                "issuer key does not match issuer certificate".to_string(),
            ));
        }

        if !issuer_cert.is_ca() {
            return Err(KeyMaterialError::InvalidIssuerCredential(
                "issuer certificate is not a CA".to_string(),
            ));
        }

        let chain: Vec<Vec<u8>> = certificates.iter().map(|b| b.contents().to_vec()).collect();
        let links: Vec<&[u8]> = chain.iter().map(Vec::as_slice).collect();
        verify::verify_chain(&links, &trust_anchors, expected_name, verify::now())?;

        let not_after = issuer_cert.validity().not_after.to_datetime();
        let certificate_pem = ::pem::encode(issuer_block);

        let signer = Issuer::from_ca_cert_pem(&certificate_pem, key).map_err(|e| {
            KeyMaterialError::InvalidIssuerCredential(format!("failed to build issuer: {}", e))
        })?;

        Ok(Self {
            name: expected_name.to_string(),
            trust_anchors,
            chain,
            certificate_pem,
            not_after,
            signer,
        })
    }

    /// Read the issuer key and certificate from disk and validate them.
    pub fn load(
        trust_anchors_pem: &str,
        issuer_key_path: &Path,
        issuer_crt_path: &Path,
        expected_name: &str,
    ) -> Result<Self, KeyMaterialError> {
        let issuer_key_pem = read(issuer_key_path)?;
        let issuer_crt_pem = read(issuer_crt_path)?;
        Self::from_pem(
            trust_anchors_pem,
            &issuer_key_pem,
            &issuer_crt_pem,
            expected_name,
        )
    }

    /// Identity name the issuer certificate was validated for.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn trust_anchors(&self) -> &TrustAnchors {
        &self.trust_anchors
    }

    /// DER encoding of the issuer certificate.
    pub fn certificate(&self) -> &[u8] {
        &self.chain[0]
    }

    pub fn certificate_pem(&self) -> &str {
        &self.certificate_pem
    }

    /// Certificates to hand out alongside issued leaves: the issuer chain
    /// without any certificate that is itself a trust anchor.
    pub fn chain(&self) -> Vec<Vec<u8>> {
        self.chain
            .iter()
            .filter(|der| !self.trust_anchors.contains(der))
            .cloned()
            .collect()
    }

    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }

    /// Time left until the issuer certificate expires, zero once it has.
    pub fn expires_in(&self) -> Duration {
        Duration::try_from(self.not_after - OffsetDateTime::now_utc()).unwrap_or(Duration::ZERO)
    }

    pub(crate) fn signer(&self) -> &Issuer<'static, KeyPair> {
        &self.signer
    }
}

/// Read a PEM file.
pub fn read(path: &Path) -> Result<String, KeyMaterialError> {
    std::fs::read_to_string(path).map_err(|source| KeyMaterialError::Read {
        path: path.to_path_buf(),
        source,
    })
}
