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

//! Issuer credential providers and rotation events.
//!
//! A provider loads validated issuer material and watches for changes.
//! Changes are signalled over two channels: `updates` carries no payload
//! (the consumer reloads through the provider itself) and `errors` carries
//! the reason the material is currently invalid. Both hold a single event so
//! the watcher moves in lock-step with its one consumer.

mod provider;
mod watcher;

pub use provider::{CredentialProvider, FileProvider, SelfSignedProvider, TrustAnchorSource};
pub use watcher::CredentialsWatcher;

use mesh_identity_pki::KeyMaterialError;
use tokio::sync::mpsc;

/// Producer half of the rotation channels.
#[derive(Clone, Debug)]
pub struct WatchSender {
    updates: mpsc::Sender<()>,
    errors: mpsc::Sender<KeyMaterialError>,
}

impl WatchSender {
    /// Signal that valid material is available. Returns `false` once the
    /// consumer has gone away.
    pub async fn updated(&self) -> bool {
        self.updates.send(()).await.is_ok()
    }

    /// Report that the material is invalid. Returns `false` once the
    /// consumer has gone away.
    pub async fn failed(&self, error: KeyMaterialError) -> bool {
        self.errors.send(error).await.is_ok()
    }
}

/// Consumer half of the rotation channels.
#[derive(Debug)]
pub struct WatchEvents {
    pub updates: mpsc::Receiver<()>,
    pub errors: mpsc::Receiver<KeyMaterialError>,
}

/// Create a connected pair of rotation channels.
pub fn channel() -> (WatchSender, WatchEvents) {
    let (updates_tx, updates_rx) = mpsc::channel(1);
    let (errors_tx, errors_rx) = mpsc::channel(1);
    (
        WatchSender {
            updates: updates_tx,
            errors: errors_tx,
        },
        WatchEvents {
            updates: updates_rx,
            errors: errors_rx,
        },
    )
}
