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

//! Certificate signing requests.

use crate::error::IssuanceError;
use rcgen::{PublicKeyData, SignatureAlgorithm};
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::oid_registry::asn1_rs::oid;
use x509_parser::prelude::FromDer;
use x509_parser::x509::AlgorithmIdentifier;

/// A parsed CSR together with the identity name the caller asked for.
///
/// Parsing verifies the CSR's self-signature, so holding a
/// `CertificateRequest` proves the caller possesses the private key.
#[derive(Debug, Clone)]
pub struct CertificateRequest {
    identity: String,
    dns_names: Vec<String>,
    other_names: usize,
    public_key: Vec<u8>,
    algorithm: Option<&'static SignatureAlgorithm>,
}

impl CertificateRequest {
    /// Parse a DER-encoded PKCS#10 request.
    pub fn from_der(der: &[u8], identity: impl Into<String>) -> Result<Self, IssuanceError> {
        let (rest, csr) = X509CertificationRequest::from_der(der)
            .map_err(|e| IssuanceError::InvalidCsr(format!("failed to parse CSR: {}", e)))?;
        if !rest.is_empty() {
            return Err(IssuanceError::InvalidCsr(
                "trailing data after CSR".to_string(),
            ));
        }

        csr.verify_signature().map_err(|e| {
            IssuanceError::InvalidCsr(format!("CSR signature verification failed: {}", e))
        })?;

        let mut dns_names = Vec::new();
        let mut other_names = 0;
        if let Some(extensions) = csr.requested_extensions() {
            for ext in extensions {
                if let ParsedExtension::SubjectAlternativeName(san) = ext {
                    for name in &san.general_names {
                        match name {
                            GeneralName::DNSName(dns) => dns_names.push(dns.to_string()),
                            _ => other_names += 1,
                        }
                    }
                }
            }
        }

        let spki = &csr.certification_request_info.subject_pki;

        Ok(Self {
            identity: identity.into(),
            dns_names,
            other_names,
            public_key: spki.subject_public_key.data.to_vec(),
            algorithm: detect_algorithm(&spki.algorithm),
        })
    }

    /// The identity name requested alongside the CSR.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// DNS names carried in the CSR's subject alternative names.
    pub fn dns_names(&self) -> &[String] {
        &self.dns_names
    }

    /// Require the CSR to name exactly the requested identity and nothing else.
    pub fn check_identity(&self) -> Result<(), IssuanceError> {
        if self.other_names > 0 {
            return Err(IssuanceError::InvalidCsr(
                "CSR must not carry email, IP address or URI names".to_string(),
            ));
        }
        match self.dns_names.as_slice() {
            [name] if *name == self.identity => Ok(()),
            names => Err(IssuanceError::InvalidCsr(format!(
                "CSR names {:?} do not match requested identity {}",
                names, self.identity
            ))),
        }
    }

    /// The CSR's public key, if its algorithm is one we can certify.
    pub(crate) fn public_key(&self) -> Result<CsrPublicKey<'_>, IssuanceError> {
        let algorithm = self.algorithm.ok_or_else(|| {
            IssuanceError::IssuanceFailed("unsupported public key algorithm in CSR".to_string())
        })?;
        Ok(CsrPublicKey {
            key: &self.public_key,
            algorithm,
        })
    }
}

/// CSR public key in the shape rcgen signs over.
pub(crate) struct CsrPublicKey<'a> {
    key: &'a [u8],
    algorithm: &'static SignatureAlgorithm,
}

impl PublicKeyData for CsrPublicKey<'_> {
    fn der_bytes(&self) -> &[u8] {
        self.key
    }

    fn algorithm(&self) -> &'static SignatureAlgorithm {
        self.algorithm
    }
}

fn detect_algorithm(alg: &AlgorithmIdentifier<'_>) -> Option<&'static SignatureAlgorithm> {
    let rsa = oid!(1.2.840 .113549 .1 .1 .1);
    let ec = oid!(1.2.840 .10045 .2 .1);
    let ed25519 = oid!(1.3.101 .112);
    let p256 = oid!(1.2.840 .10045 .3 .1 .7);
    let p384 = oid!(1.3.132 .0 .34);

    if alg.algorithm == ed25519 {
        return Some(&rcgen::PKCS_ED25519);
    }
    if alg.algorithm == rsa {
        return Some(&rcgen::PKCS_RSA_SHA256);
    }
    if alg.algorithm == ec {
        let curve = alg.parameters.as_ref()?.as_oid().ok()?;
        if curve == p256 {
            return Some(&rcgen::PKCS_ECDSA_P256_SHA256);
        }
        if curve == p384 {
            return Some(&rcgen::PKCS_ECDSA_P384_SHA384);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, DistinguishedName, KeyPair, SanType};

    const NAME: &str = "default.default.serviceaccount.identity.mesh-system.cluster.local";

    fn csr(sans: Vec<SanType>, alg: &'static SignatureAlgorithm) -> Vec<u8> {
        let key = KeyPair::generate_for(alg).unwrap();
        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        params.subject_alt_names = sans;
        params.serialize_request(&key).unwrap().der().to_vec()
    }

    fn dns(name: &str) -> SanType {
        SanType::DnsName(name.to_string().try_into().unwrap())
    }

    #[test]
    fn parses_p256_request() {
        let der = csr(vec![dns(NAME)], &rcgen::PKCS_ECDSA_P256_SHA256);

        let req = CertificateRequest::from_der(&der, NAME).unwrap();

        assert_eq!(req.identity(), NAME);
        assert_eq!(req.dns_names(), [NAME.to_string()]);
        assert!(req.check_identity().is_ok());
        assert!(req.public_key().is_ok());
    }

    #[test]
    fn ed25519_keys_are_supported() {
        let der = csr(vec![dns(NAME)], &rcgen::PKCS_ED25519);

        let req = CertificateRequest::from_der(&der, NAME).unwrap();

        assert!(req.public_key().is_ok());
    }

    #[test]
    fn garbage_is_rejected() {
        let err = CertificateRequest::from_der(b"definitely not a csr", NAME).unwrap_err();
        assert!(matches!(err, IssuanceError::InvalidCsr(_)));
    }

    #[test]
    fn tampered_request_fails_signature_check() {
        let mut der = csr(vec![dns(NAME)], &rcgen::PKCS_ECDSA_P256_SHA256);
        // The signature's final byte sits at the very end of the encoding.
        let last = der.len() - 1;
        der[last] ^= 0x01;

        let err = CertificateRequest::from_der(&der, NAME).unwrap_err();
        assert!(matches!(err, IssuanceError::InvalidCsr(_)));
    }

    #[test]
    fn mismatched_dns_name() {
        let der = csr(
            vec![dns("other.default.serviceaccount.identity.mesh-system.cluster.local")],
            &rcgen::PKCS_ECDSA_P256_SHA256,
        );

        let req = CertificateRequest::from_der(&der, NAME).unwrap();

        assert!(matches!(
            req.check_identity(),
            Err(IssuanceError::InvalidCsr(_))
        ));
    }

    #[test]
    fn extra_names_are_rejected() {
        let der = csr(
            vec![dns(NAME), dns("extra.example.com")],
            &rcgen::PKCS_ECDSA_P256_SHA256,
        );
        let req = CertificateRequest::from_der(&der, NAME).unwrap();
        assert!(req.check_identity().is_err());

        let der = csr(
            vec![
                dns(NAME),
                SanType::IpAddress(std::net::IpAddr::from([10, 0, 0, 1])),
            ],
            &rcgen::PKCS_ECDSA_P256_SHA256,
        );
        let req = CertificateRequest::from_der(&der, NAME).unwrap();
        assert!(req.check_identity().is_err());
    }
}
