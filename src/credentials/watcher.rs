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

//! Filesystem watcher for issuer key material.

use crate::credentials::WatchSender;
use crate::error::Result;
use mesh_identity_pki::{IssuerCredential, KeyMaterialError};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default quiet period that ends a burst of filesystem events
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Watches directories holding issuer material and republishes its state.
///
/// Directories are watched rather than files so that atomic replacement
/// (rename over the target, or a Kubernetes secret `..data` symlink swap)
/// is observed.
#[derive(Debug, Clone)]
pub struct CredentialsWatcher {
    directories: Vec<PathBuf>,
    debounce: Duration,
}

impl CredentialsWatcher {
    pub fn new(directories: Vec<PathBuf>, debounce: Duration) -> Self {
        let mut unique: Vec<PathBuf> = Vec::with_capacity(directories.len());
        for dir in directories {
            if !unique.contains(&dir) {
                unique.push(dir);
            }
        }
        Self {
            directories: unique,
            debounce,
        }
    }

    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    /// Publish the current state of the material, then once per settled
    /// change, until `cancel` fires or the consumer goes away.
    pub async fn run<F>(&self, load: F, tx: WatchSender, cancel: CancellationToken) -> Result<()>
    where
        F: Fn() -> std::result::Result<IssuerCredential, KeyMaterialError> + Send + Sync,
    {
        let (changes_tx, mut changes) = mpsc::channel::<()>(1);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) if is_change(&event.kind) => {
                    // A pending signal already covers this change.
                    let _ = changes_tx.try_send(());
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Filesystem watch error"),
            }
        })?;

        for dir in &self.directories {
            watcher.watch(dir, RecursiveMode::NonRecursive)?;
        }
        info!(directories = ?self.directories, "Watching issuer credentials");

        if !self.publish(&load, &tx, &cancel, true).await {
            return Ok(());
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = changes.recv() => {
                    if changed.is_none() || !self.settle(&mut changes, &cancel).await {
                        break;
                    }
                    if !self.publish(&load, &tx, &cancel, false).await {
                        break;
                    }
                }
            }
        }

        drop(watcher);
        info!("Stopped watching issuer credentials");
        Ok(())
    }

    /// Wait for a full debounce interval without further changes.
    async fn settle(&self, changes: &mut mpsc::Receiver<()>, cancel: &CancellationToken) -> bool {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                next = tokio::time::timeout(self.debounce, changes.recv()) => match next {
                    Ok(Some(())) => continue,
                    Ok(None) => return false,
                    Err(_) => return true,
                },
            }
        }
    }

    /// Load the material and send the outcome. Returns `false` when the
    /// watcher should stop.
    async fn publish<F>(
        &self,
        load: &F,
        tx: &WatchSender,
        cancel: &CancellationToken,
        initial: bool,
    ) -> bool
    where
        F: Fn() -> std::result::Result<IssuerCredential, KeyMaterialError> + Send + Sync,
    {
        let error = match load() {
            Ok(credential) => {
                debug!(
                    issuer = %credential.name(),
                    not_after = %credential.not_after(),
                    "Issuer credentials loaded"
                );
                None
            }
            Err(e) if e.is_transient() && !initial => {
                debug!(error = %e, "Issuer credentials incomplete, waiting for next change");
                return true;
            }
            Err(e) => Some(e),
        };

        let send = async {
            match error {
                None => tx.updated().await,
                Some(e) => {
                    warn!(error = %e, "Issuer credentials are invalid");
                    tx.failed(e).await
                }
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => false,
            delivered = send => delivered,
        }
    }
}

fn is_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
    )
}
