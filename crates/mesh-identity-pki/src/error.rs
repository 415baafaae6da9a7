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

//! Error types.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading and validating issuer key material.
#[derive(Debug, Error)]
pub enum KeyMaterialError {
    /// Trust anchor PEM could not be parsed or contained no certificates
    #[error("invalid trust anchor: {0}")]
    InvalidTrustAnchor(String),

    /// Issuer certificate or key could not be parsed, or they do not belong together
    #[error("invalid issuer credential: {0}")]
    InvalidIssuerCredential(String),

    /// Issuer certificate does not chain to the trust anchors
    #[error("issuer certificate is not trusted: {0}")]
    IssuerNotTrusted(#[from] VerificationError),

    /// A key material file could not be read
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl KeyMaterialError {
    /// Whether the failure is expected to clear up on its own.
    ///
    /// Atomic file replacement (rename over, or a Kubernetes secret `..data`
    /// swap) leaves a short window where a file is missing. Such failures are
    /// retried on the next filesystem event instead of being reported.
    pub fn is_transient(&self) -> bool {
        matches!(self, KeyMaterialError::Read { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// Reasons a certificate chain fails verification against trust anchors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("certificate is not valid for name {expected}")]
    NameMismatch { expected: String },

    #[error("certificate {subject} is not yet valid")]
    NotYetValid { subject: String },

    #[error("certificate {subject} has expired")]
    Expired { subject: String },

    #[error("signature of {subject} does not verify against {issuer}")]
    BadSignature { subject: String, issuer: String },

    #[error("certificate {subject} is not a CA")]
    NotCa { subject: String },

    #[error("certificate {subject} allows fewer intermediate CAs than follow it")]
    PathLenExceeded { subject: String },

    #[error("certificate {subject} does not chain to any trust anchor")]
    Untrusted { subject: String },

    #[error("malformed certificate: {0}")]
    Malformed(String),
}

/// Errors raised while issuing end-entity certificates.
#[derive(Debug, Error)]
pub enum IssuanceError {
    /// The certificate signing request is malformed or does not match the requested identity
    #[error("invalid certificate signing request: {0}")]
    InvalidCsr(String),

    /// The issuer certificate has expired, so nothing it signs would be valid
    #[error("issuer certificate expired at {0}")]
    IssuerExpired(String),

    /// The certificate could not be built or signed
    #[error("certificate issuance failed: {0}")]
    IssuanceFailed(String),
}
