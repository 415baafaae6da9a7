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

use crate::token::TokenError;
use mesh_identity_pki::{IssuanceError, KeyMaterialError};
use std::fmt;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Mesh identity error types
#[derive(Debug)]
pub enum Error {
    /// Configuration error
    Config(String),

    /// Invalid request
    Invalid(String),

    /// Issuer material is not loaded or no longer valid
    NotReady(String),

    /// Issuer key material error
    KeyMaterial(KeyMaterialError),

    /// Certificate issuance error
    Issuance(IssuanceError),

    /// Token validation error
    Token(TokenError),

    /// Filesystem watch error
    Watch(String),

    /// IO error
    Io(std::io::Error),

    /// Transport error
    Transport(String),

    /// Internal error
    Internal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
            Error::Invalid(msg) => write!(f, "invalid: {}", msg),
            Error::NotReady(msg) => write!(f, "not ready: {}", msg),
            Error::KeyMaterial(e) => write!(f, "key material error: {}", e),
            Error::Issuance(e) => write!(f, "{}", e),
            Error::Token(e) => write!(f, "{}", e),
            Error::Watch(msg) => write!(f, "watch error: {}", msg),
            Error::Io(e) => write!(f, "io error: {}", e),
            Error::Transport(msg) => write!(f, "transport error: {}", msg),
            Error::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::KeyMaterial(e) => Some(e),
            Error::Issuance(e) => Some(e),
            Error::Token(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<KeyMaterialError> for Error {
    fn from(e: KeyMaterialError) -> Self {
        Error::KeyMaterial(e)
    }
}

impl From<IssuanceError> for Error {
    fn from(e: IssuanceError) -> Self {
        Error::Issuance(e)
    }
}

impl From<TokenError> for Error {
    fn from(e: TokenError) -> Self {
        Error::Token(e)
    }
}

impl From<notify::Error> for Error {
    fn from(e: notify::Error) -> Self {
        Error::Watch(e.to_string())
    }
}

impl From<kube::Error> for Error {
    fn from(e: kube::Error) -> Self {
        Error::Internal(format!("kubernetes client error: {}", e))
    }
}

impl From<prometheus::Error> for Error {
    fn from(e: prometheus::Error) -> Self {
        Error::Internal(format!("metrics error: {}", e))
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(e: tonic::transport::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl From<tonic_reflection::server::Error> for Error {
    fn from(e: tonic_reflection::server::Error) -> Self {
        Error::Internal(format!("gRPC reflection error: {}", e))
    }
}

/// The single translation point from internal errors to gRPC status codes.
impl From<Error> for tonic::Status {
    fn from(e: Error) -> Self {
        match e {
            Error::Invalid(msg) => tonic::Status::invalid_argument(msg),
            Error::NotReady(msg) => tonic::Status::failed_precondition(msg),
            Error::Config(msg) => tonic::Status::failed_precondition(msg),
            Error::KeyMaterial(e) => tonic::Status::failed_precondition(e.to_string()),
            Error::Issuance(IssuanceError::InvalidCsr(msg)) => {
                tonic::Status::invalid_argument(format!("invalid CSR: {}", msg))
            }
            Error::Issuance(e @ IssuanceError::IssuerExpired(_)) => {
                tonic::Status::failed_precondition(e.to_string())
            }
            Error::Issuance(e @ IssuanceError::IssuanceFailed(_)) => {
                tonic::Status::internal(e.to_string())
            }
            Error::Token(e @ (TokenError::Invalid(_) | TokenError::NotAuthenticated(_))) => {
                tonic::Status::unauthenticated(e.to_string())
            }
            Error::Token(e @ TokenError::IdentityMismatch { .. }) => {
                tonic::Status::permission_denied(e.to_string())
            }
            Error::Token(e @ TokenError::Review(_)) => tonic::Status::internal(e.to_string()),
            _ => tonic::Status::internal(e.to_string()),
        }
    }
}
