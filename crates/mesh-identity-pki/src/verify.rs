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

//! Trust anchors and certificate chain verification.
//!
//! A chain is an ordered list of DER certificates, end-entity (or issuer)
//! first. Verification checks, in order:
//!
//! 1. the first certificate is valid for the expected DNS name,
//! 2. every certificate is inside its validity window,
//! 3. every link is signed by the next certificate, which must be a CA
//!    whose path length constraint admits the CAs below it,
//! 4. the last certificate is a trust anchor or is signed by one.
//!
//! Self-issued intermediates count against path length constraints like any
//! other CA certificate.

use crate::error::{KeyMaterialError, VerificationError};
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::{FromDer, X509Certificate};

/// Root certificates that terminate chain verification.
#[derive(Clone, Debug)]
pub struct TrustAnchors {
    certificates: Vec<Vec<u8>>,
    pem: String,
}

impl TrustAnchors {
    /// Parse one or more PEM-encoded root certificates.
    pub fn from_pem(pem_data: &str) -> Result<Self, KeyMaterialError> {
        let blocks = ::pem::parse_many(pem_data.as_bytes()).map_err(|e| {
            KeyMaterialError::InvalidTrustAnchor(format!("failed to parse PEM: {}", e))
        })?;

        let mut certificates = Vec::new();
        for block in blocks.iter().filter(|b| b.tag() == "CERTIFICATE") {
            X509Certificate::from_der(block.contents()).map_err(|e| {
                KeyMaterialError::InvalidTrustAnchor(format!("failed to parse certificate: {}", e))
            })?;
            certificates.push(block.contents().to_vec());
        }

        if certificates.is_empty() {
            return Err(KeyMaterialError::InvalidTrustAnchor(
                "no certificates found".to_string(),
            ));
        }

        let mut pem = pem_data.trim().to_string();
        pem.push('\n');

        Ok(Self { certificates, pem })
    }

    /// The anchors as PEM, suitable for distribution as a trust bundle.
    pub fn pem(&self) -> &str {
        &self.pem
    }

    /// DER encodings of the anchors.
    pub fn certificates(&self) -> &[Vec<u8>] {
        &self.certificates
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// Whether `der` is byte-for-byte one of the anchors.
    pub fn contains(&self, der: &[u8]) -> bool {
        self.certificates.iter().any(|anchor| anchor.as_slice() == der)
    }

    /// Verify `leaf` and its `intermediates` against these anchors for `dns_name`.
    pub fn verify(
        &self,
        leaf: &[u8],
        intermediates: &[Vec<u8>],
        dns_name: &str,
    ) -> Result<(), VerificationError> {
        let mut chain: Vec<&[u8]> = Vec::with_capacity(intermediates.len() + 1);
        chain.push(leaf);
        chain.extend(intermediates.iter().map(Vec::as_slice));
        verify_chain(&chain, self, dns_name, now())
    }
}

pub(crate) fn now() -> i64 {
    ::time::OffsetDateTime::now_utc().unix_timestamp()
}

pub(crate) fn verify_chain(
    chain: &[&[u8]],
    anchors: &TrustAnchors,
    dns_name: &str,
    now: i64,
) -> Result<(), VerificationError> {
    let parsed = chain
        .iter()
        .map(|der| parse(der))
        .collect::<Result<Vec<_>, _>>()?;

    let Some(first) = parsed.first() else {
        return Err(VerificationError::Malformed("empty chain".to_string()));
    };

    if !valid_for_name(first, dns_name)? {
        return Err(VerificationError::NameMismatch {
            expected: dns_name.to_string(),
        });
    }

    for cert in &parsed {
        check_time(cert, now)?;
    }

    for (i, link) in parsed.windows(2).enumerate() {
        let (child, parent) = (&link[0], &link[1]);
        if !parent.is_ca() {
            return Err(VerificationError::NotCa {
                subject: describe(parent),
            });
        }
        check_signature(child, parent)?;
        check_path_len(parent, cas_in(&parsed[..=i]))?;
    }

    let (Some(last), Some(last_der)) = (parsed.last(), chain.last()) else {
        return Err(VerificationError::Malformed("empty chain".to_string()));
    };
    if anchors.contains(last_der) {
        return Ok(());
    }

    for anchor_der in anchors.certificates() {
        let anchor = parse(anchor_der)?;
        if anchor.subject().as_raw() != last.issuer().as_raw() || !anchor.is_ca() {
            continue;
        }
        if check_time(&anchor, now).is_ok() && check_signature(last, &anchor).is_ok() {
            return check_path_len(&anchor, cas_in(&parsed));
        }
    }

    Err(VerificationError::Untrusted {
        subject: describe(last),
    })
}

pub(crate) fn parse(der: &[u8]) -> Result<X509Certificate<'_>, VerificationError> {
    X509Certificate::from_der(der)
        .map(|(_, cert)| cert)
        .map_err(|e| VerificationError::Malformed(e.to_string()))
}

/// DNS SANs are authoritative; the common name is only consulted when the
/// certificate carries no SAN extension at all.
pub(crate) fn valid_for_name(
    cert: &X509Certificate<'_>,
    name: &str,
) -> Result<bool, VerificationError> {
    let san = cert
        .subject_alternative_name()
        .map_err(|e| VerificationError::Malformed(e.to_string()))?;

    Ok(match san {
        Some(san) => san.value.general_names.iter().any(|general_name| {
            matches!(general_name, GeneralName::DNSName(dns) if dns.eq_ignore_ascii_case(name))
        }),
        None => cert
            .subject()
            .iter_common_name()
            .filter_map(|cn| cn.as_str().ok())
            .any(|cn| cn.eq_ignore_ascii_case(name)),
    })
}

fn check_time(cert: &X509Certificate<'_>, now: i64) -> Result<(), VerificationError> {
    let validity = cert.validity();
    if now < validity.not_before.timestamp() {
        return Err(VerificationError::NotYetValid {
            subject: describe(cert),
        });
    }
    if now > validity.not_after.timestamp() {
        return Err(VerificationError::Expired {
            subject: describe(cert),
        });
    }
    Ok(())
}

fn cas_in(certs: &[X509Certificate<'_>]) -> usize {
    certs.iter().filter(|cert| cert.is_ca()).count()
}

fn check_path_len(
    cert: &X509Certificate<'_>,
    cas_below: usize,
) -> Result<(), VerificationError> {
    let constraints = cert
        .basic_constraints()
        .map_err(|e| VerificationError::Malformed(e.to_string()))?;
    match constraints.and_then(|bc| bc.value.path_len_constraint) {
        Some(limit) if cas_below > limit as usize => Err(VerificationError::PathLenExceeded {
            subject: describe(cert),
        }),
        _ => Ok(()),
    }
}

fn check_signature(
    child: &X509Certificate<'_>,
    parent: &X509Certificate<'_>,
) -> Result<(), VerificationError> {
    child
        .verify_signature(Some(parent.public_key()))
        .map_err(|_| VerificationError::BadSignature {
            subject: describe(child),
            issuer: describe(parent),
        })
}

/// Human-readable name for error messages.
pub(crate) fn describe(cert: &X509Certificate<'_>) -> String {
    let subject = cert.subject().to_string();
    if !subject.is_empty() {
        return subject;
    }
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for general_name in &san.value.general_names {
            if let GeneralName::DNSName(dns) = general_name {
                return format!("DNS:{}", dns);
            }
        }
    }
    format!("serial {}", cert.raw_serial_as_string())
}
