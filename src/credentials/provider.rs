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

//! Credential providers.

use crate::credentials::{CredentialsWatcher, WatchSender};
use crate::error::Result;
use crate::trust_domain::TrustDomain;
use async_trait::async_trait;
use mesh_identity_pki::{GeneratedCa, IssuerCredential, KeyMaterialError, material};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Source of issuer credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Identity name the issuer certificate must be valid for
    fn issuer_name(&self) -> &str;

    /// Load and validate the current issuer material
    fn load(&self) -> std::result::Result<IssuerCredential, KeyMaterialError>;

    /// Publish the material's state, then every change, until cancelled
    async fn watch(&self, tx: WatchSender, cancel: CancellationToken) -> Result<()>;
}

/// Where trust anchors come from.
#[derive(Debug, Clone)]
pub enum TrustAnchorSource {
    /// PEM text supplied at startup
    Inline(String),
    /// PEM file, re-read on every load
    File(PathBuf),
}

impl TrustAnchorSource {
    pub fn read(&self) -> std::result::Result<String, KeyMaterialError> {
        match self {
            TrustAnchorSource::Inline(pem) => Ok(pem.clone()),
            TrustAnchorSource::File(path) => material::read(path),
        }
    }

    fn directory(&self) -> Option<PathBuf> {
        match self {
            TrustAnchorSource::Inline(_) => None,
            TrustAnchorSource::File(path) => Some(parent_dir(path)),
        }
    }
}

/// Issuer key and certificate files in a directory, typically a mounted secret.
#[derive(Debug, Clone)]
pub struct FileProvider {
    pub issuer_name: String,
    pub trust_anchors: TrustAnchorSource,
    pub issuer_dir: PathBuf,
    pub key_file: String,
    pub crt_file: String,
    pub debounce: Duration,
}

impl FileProvider {
    pub fn key_path(&self) -> PathBuf {
        self.issuer_dir.join(&self.key_file)
    }

    pub fn crt_path(&self) -> PathBuf {
        self.issuer_dir.join(&self.crt_file)
    }

    fn watcher(&self) -> CredentialsWatcher {
        let mut directories = vec![self.issuer_dir.clone()];
        directories.extend(self.trust_anchors.directory());
        CredentialsWatcher::new(directories, self.debounce)
    }
}

#[async_trait]
impl CredentialProvider for FileProvider {
    fn issuer_name(&self) -> &str {
        &self.issuer_name
    }

    fn load(&self) -> std::result::Result<IssuerCredential, KeyMaterialError> {
        let anchors = self.trust_anchors.read()?;
        IssuerCredential::load(
            &anchors,
            &self.key_path(),
            &self.crt_path(),
            &self.issuer_name,
        )
    }

    async fn watch(&self, tx: WatchSender, cancel: CancellationToken) -> Result<()> {
        self.watcher().run(|| self.load(), tx, cancel).await
    }
}

/// Generates a self-signed root at startup and issues directly from it.
///
/// Keys live only in memory, so every restart creates a new trust anchor.
#[derive(Debug)]
pub struct SelfSignedProvider {
    issuer_name: String,
    root: GeneratedCa,
}

impl SelfSignedProvider {
    pub fn new(trust_domain: &TrustDomain) -> Result<Self> {
        let issuer_name = trust_domain.issuer_name();
        warn!("Using self-signed credential provider - trust anchor is ephemeral!");
        let root = GeneratedCa::root(&issuer_name)?;
        info!(issuer = %issuer_name, "Generated self-signed trust anchor");
        Ok(Self { issuer_name, root })
    }

    /// PEM of the generated trust anchor.
    pub fn trust_anchors_pem(&self) -> &str {
        self.root.cert_pem()
    }
}

#[async_trait]
impl CredentialProvider for SelfSignedProvider {
    fn issuer_name(&self) -> &str {
        &self.issuer_name
    }

    fn load(&self) -> std::result::Result<IssuerCredential, KeyMaterialError> {
        self.root.into_credential(&self.issuer_name)
    }

    async fn watch(&self, tx: WatchSender, cancel: CancellationToken) -> Result<()> {
        // Nothing ever changes; publish once and idle.
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tx.updated() => {}
        }
        cancel.cancelled().await;
        Ok(())
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
