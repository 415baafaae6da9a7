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

//! Generated CA certificates.
//!
//! Used for self-signed deployments and for building test hierarchies.

use crate::error::KeyMaterialError;
use crate::material::IssuerCredential;
use crate::validity::Validity;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer, KeyPair,
    KeyUsagePurpose, SanType, string::Ia5String,
};
use std::fmt;
use std::time::Duration;
use ::time::OffsetDateTime;

/// Lifetime of a generated root (one year)
pub const ROOT_LIFETIME: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Backdating applied to a generated root
pub const ROOT_CLOCK_SKEW_ALLOWANCE: Duration = Duration::from_secs(12 * 60 * 60);

/// A CA certificate with its P-256 signing key, both PEM-encoded.
#[derive(Clone)]
pub struct GeneratedCa {
    cert_pem: String,
    key_pem: String,
}

impl fmt::Debug for GeneratedCa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedCa")
            .field("cert_pem", &self.cert_pem)
            .field("key_pem", &"[REDACTED]")
            .finish()
    }
}

impl GeneratedCa {
    /// Generate a self-signed root CA named `name`.
    pub fn root(name: &str) -> Result<Self, KeyMaterialError> {
        Self::root_with_validity(
            name,
            Validity::new(ROOT_LIFETIME, ROOT_CLOCK_SKEW_ALLOWANCE),
        )
    }

    pub fn root_with_validity(name: &str, validity: Validity) -> Result<Self, KeyMaterialError> {
        let key = generate_key()?;
        let params = ca_params(name, validity, None)?;
        let cert = params.self_signed(&key).map_err(|e| {
            KeyMaterialError::InvalidIssuerCredential(format!(
                "failed to self-sign root certificate: {}",
                e
            ))
        })?;
        Ok(Self {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
        })
    }

    /// Generate a CA named `name` signed by this one.
    ///
    /// `max_path_len` constrains how many further CAs may sit below the new one.
    pub fn intermediate(
        &self,
        name: &str,
        validity: Validity,
        max_path_len: Option<u8>,
    ) -> Result<Self, KeyMaterialError> {
        let parent_key = KeyPair::from_pem(&self.key_pem).map_err(|e| {
            KeyMaterialError::InvalidIssuerCredential(format!("failed to parse CA key: {}", e))
        })?;
        let parent = Issuer::from_ca_cert_pem(&self.cert_pem, parent_key).map_err(|e| {
            KeyMaterialError::InvalidIssuerCredential(format!(
                "failed to parse CA certificate: {}",
                e
            ))
        })?;

        let key = generate_key()?;
        let params = ca_params(name, validity, max_path_len)?;
        let cert = params.signed_by(&key, &parent).map_err(|e| {
            KeyMaterialError::InvalidIssuerCredential(format!(
                "failed to sign intermediate certificate: {}",
                e
            ))
        })?;
        Ok(Self {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
        })
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// PKCS#8 PEM of the signing key.
    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    /// Use this CA as both trust anchor and issuer for `name`.
    pub fn into_credential(&self, name: &str) -> Result<IssuerCredential, KeyMaterialError> {
        IssuerCredential::from_pem(&self.cert_pem, &self.key_pem, &self.cert_pem, name)
    }
}

fn generate_key() -> Result<KeyPair, KeyMaterialError> {
    KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).map_err(|e| {
        KeyMaterialError::InvalidIssuerCredential(format!("failed to generate key: {}", e))
    })
}

fn ca_params(
    name: &str,
    validity: Validity,
    max_path_len: Option<u8>,
) -> Result<CertificateParams, KeyMaterialError> {
    let dns_name = Ia5String::try_from(name.to_string()).map_err(|e| {
        KeyMaterialError::InvalidIssuerCredential(format!("invalid CA name '{}': {}", name, e))
    })?;

    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, name);
    params.distinguished_name = dn;
    params.subject_alt_names = vec![SanType::DnsName(dns_name)];
    params.is_ca = match max_path_len {
        Some(n) => IsCa::Ca(BasicConstraints::Constrained(n)),
        None => IsCa::Ca(BasicConstraints::Unconstrained),
    };
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    let (not_before, not_after) = validity.window(OffsetDateTime::now_utc()).ok_or_else(|| {
        KeyMaterialError::InvalidIssuerCredential(format!(
            "validity of CA '{}' is out of range",
            name
        ))
    })?;
    params.not_before = not_before;
    params.not_after = not_after;
    Ok(params)
}
