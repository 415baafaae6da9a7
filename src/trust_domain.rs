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

//! Trust domain and identity naming.
//!
//! The issuer is named `identity.<controller-namespace>.<trust-domain>` and
//! every workload identity lives below it:
//! `<serviceaccount>.<namespace>.serviceaccount.identity.<controller-namespace>.<trust-domain>`.

use crate::error::{Error, Result};
use std::fmt;

/// Scope for all identity names issued by one controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustDomain {
    controller_namespace: String,
    domain: String,
}

impl TrustDomain {
    pub fn new(controller_namespace: &str, domain: &str) -> Result<Self> {
        if !is_dns1123_label(controller_namespace) {
            return Err(Error::Config(format!(
                "controller namespace '{}' is not a valid DNS-1123 label",
                controller_namespace
            )));
        }
        let domain = domain.trim_end_matches('.');
        if domain.is_empty() || !domain.split('.').all(is_dns1123_label) {
            return Err(Error::Config(format!(
                "trust domain '{}' is not a valid DNS name",
                domain
            )));
        }
        Ok(Self {
            controller_namespace: controller_namespace.to_string(),
            domain: domain.to_string(),
        })
    }

    pub fn controller_namespace(&self) -> &str {
        &self.controller_namespace
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Name the issuer certificate must be valid for.
    pub fn issuer_name(&self) -> String {
        format!("identity.{}.{}", self.controller_namespace, self.domain)
    }

    /// Identity name of a ServiceAccount.
    pub fn identity_name(&self, namespace: &str, service_account: &str) -> String {
        format!(
            "{}.{}.serviceaccount.{}",
            service_account,
            namespace,
            self.issuer_name()
        )
    }
}

impl fmt::Display for TrustDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.domain)
    }
}

/// RFC 1123 label: 1-63 lowercase alphanumerics or '-', alphanumeric at both ends.
pub fn is_dns1123_label(s: &str) -> bool {
    let bytes = s.as_bytes();
    let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
        return false;
    };
    bytes.len() <= 63
        && first.is_ascii_alphanumeric()
        && last.is_ascii_alphanumeric()
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
}
