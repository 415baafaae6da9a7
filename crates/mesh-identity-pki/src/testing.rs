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

//! Test fixtures: a root, an issuer signed by it, and CSR generation.

use crate::material::IssuerCredential;
use crate::root::GeneratedCa;
use crate::validity::Validity;
use rcgen::{CertificateParams, DistinguishedName, KeyPair};

/// A two-level hierarchy for one issuer identity name.
#[derive(Debug, Clone)]
pub struct Fixture {
    pub name: String,
    pub root: GeneratedCa,
    pub issuer: GeneratedCa,
}

impl Fixture {
    /// Panics if generation fails.
    pub fn new(issuer_name: &str) -> Self {
        let root = GeneratedCa::root(&format!("root.{}", issuer_name)).expect("generate root");
        let issuer = root
            .intermediate(issuer_name, Validity::default(), None)
            .expect("generate issuer");
        Self {
            name: issuer_name.to_string(),
            root,
            issuer,
        }
    }

    /// A fresh issuer under the same root.
    pub fn rotate(&self) -> Self {
        let issuer = self
            .root
            .intermediate(&self.name, Validity::default(), None)
            .expect("generate issuer");
        Self {
            name: self.name.clone(),
            root: self.root.clone(),
            issuer,
        }
    }

    pub fn anchors_pem(&self) -> &str {
        self.root.cert_pem()
    }

    pub fn credential(&self) -> IssuerCredential {
        IssuerCredential::from_pem(
            self.root.cert_pem(),
            self.issuer.key_pem(),
            self.issuer.cert_pem(),
            &self.name,
        )
        .expect("valid issuer credential")
    }
}

/// DER CSR with a single DNS SAN `name` and an empty subject.
pub fn csr_for(name: &str) -> Vec<u8> {
    csr_with_names(&[name])
}

/// DER CSR carrying every name in `names` as a DNS SAN.
pub fn csr_with_names(names: &[&str]) -> Vec<u8> {
    let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).expect("generate key");
    let mut params = CertificateParams::new(
        names.iter().map(|n| n.to_string()).collect::<Vec<_>>(),
    )
    .expect("valid names");
    params.distinguished_name = DistinguishedName::new();
    params
        .serialize_request(&key)
        .expect("serialize CSR")
        .der()
        .to_vec()
}
