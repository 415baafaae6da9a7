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

//! # Mesh Identity PKI
//!
//! X.509 building blocks for the mesh identity controller.
//!
//! - [`IssuerCredential`]: issuer certificate and key validated against trust anchors
//! - [`CertificateAuthority`]: signs end-entity certificates, hot-swappable issuer
//! - [`CertificateRequest`]: parsed and signature-checked CSRs
//! - [`TrustAnchors`]: chain verification
//! - [`GeneratedCa`]: self-signed roots and intermediates
//!
//! Everything here is synchronous and free of I/O beyond reading PEM files.

pub mod ca;
pub mod csr;
pub mod error;
pub mod material;
pub mod root;
pub mod validity;
pub mod verify;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use ca::{CertificateAuthority, IssuedCertificate};
pub use csr::CertificateRequest;
pub use error::{IssuanceError, KeyMaterialError, VerificationError};
pub use material::IssuerCredential;
pub use root::GeneratedCa;
pub use validity::Validity;
pub use verify::TrustAnchors;
