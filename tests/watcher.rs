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

//! Filesystem watcher tests against real directories.

use mesh_identity::credentials::{
    self, CredentialProvider, FileProvider, TrustAnchorSource, WatchEvents,
};
use mesh_identity::pki::KeyMaterialError;
use mesh_identity::pki::testing::Fixture;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const ISSUER: &str = "identity.mesh-system.cluster.local";
const DEBOUNCE: Duration = Duration::from_millis(100);
const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

fn write_issuer(dir: &Path, fixture: &Fixture) {
    fs::write(dir.join("tls.key"), fixture.issuer.key_pem()).unwrap();
    fs::write(dir.join("tls.crt"), fixture.issuer.cert_pem()).unwrap();
}

fn provider(dir: &Path, anchors: TrustAnchorSource) -> FileProvider {
    FileProvider {
        issuer_name: ISSUER.to_string(),
        trust_anchors: anchors,
        issuer_dir: dir.to_path_buf(),
        key_file: "tls.key".to_string(),
        crt_file: "tls.crt".to_string(),
        debounce: DEBOUNCE,
    }
}

fn start(
    provider: FileProvider,
    cancel: &CancellationToken,
) -> (WatchEvents, JoinHandle<mesh_identity::Result<()>>) {
    let (tx, rx) = credentials::channel();
    let cancel = cancel.clone();
    let task = tokio::spawn(async move { provider.watch(tx, cancel).await });
    (rx, task)
}

async fn next_update(rx: &mut WatchEvents) {
    tokio::select! {
        Some(()) = rx.updates.recv() => {}
        Some(e) = rx.errors.recv() => panic!("expected update, got error: {}", e),
        _ = tokio::time::sleep(EVENT_TIMEOUT) => panic!("no update within {:?}", EVENT_TIMEOUT),
    }
}

async fn next_error(rx: &mut WatchEvents) -> KeyMaterialError {
    tokio::select! {
        Some(e) = rx.errors.recv() => e,
        Some(()) = rx.updates.recv() => panic!("expected error, got update"),
        _ = tokio::time::sleep(EVENT_TIMEOUT) => panic!("no error within {:?}", EVENT_TIMEOUT),
    }
}

async fn assert_quiet(rx: &mut WatchEvents, period: Duration) {
    tokio::select! {
        Some(()) = rx.updates.recv() => panic!("unexpected update"),
        Some(e) = rx.errors.recv() => panic!("unexpected error: {}", e),
        _ = tokio::time::sleep(period) => {}
    }
}

#[tokio::test]
async fn publishes_initial_state_then_rotations() {
    let dir = TempDir::new().unwrap();
    let fixture = Fixture::new(ISSUER);
    write_issuer(dir.path(), &fixture);
    let provider = provider(
        dir.path(),
        TrustAnchorSource::Inline(fixture.anchors_pem().to_string()),
    );
    let cancel = CancellationToken::new();
    let (mut rx, task) = start(provider.clone(), &cancel);

    next_update(&mut rx).await;

    let rotated = fixture.rotate();
    write_issuer(dir.path(), &rotated);
    next_update(&mut rx).await;

    let loaded = provider.load().unwrap();
    let expected = ::pem::parse(rotated.issuer.cert_pem()).unwrap();
    assert_eq!(loaded.certificate(), expected.contents());

    cancel.cancel();
    tokio_test::assert_ok!(task.await.unwrap());
}

#[tokio::test]
async fn burst_of_writes_is_one_update() {
    let dir = TempDir::new().unwrap();
    let fixture = Fixture::new(ISSUER);
    write_issuer(dir.path(), &fixture);
    let cancel = CancellationToken::new();
    let (mut rx, _task) = start(
        provider(
            dir.path(),
            TrustAnchorSource::Inline(fixture.anchors_pem().to_string()),
        ),
        &cancel,
    );
    next_update(&mut rx).await;

    let rotated = fixture.rotate();
    for _ in 0..3 {
        write_issuer(dir.path(), &rotated);
    }

    next_update(&mut rx).await;
    assert_quiet(&mut rx, DEBOUNCE * 4).await;
    cancel.cancel();
}

#[tokio::test]
async fn issuer_from_foreign_root_is_an_error_event() {
    let dir = TempDir::new().unwrap();
    let fixture = Fixture::new(ISSUER);
    write_issuer(dir.path(), &fixture);
    let cancel = CancellationToken::new();
    let (mut rx, _task) = start(
        provider(
            dir.path(),
            TrustAnchorSource::Inline(fixture.anchors_pem().to_string()),
        ),
        &cancel,
    );
    next_update(&mut rx).await;

    let foreign = Fixture::new(ISSUER);
    write_issuer(dir.path(), &foreign);

    let err = next_error(&mut rx).await;
    assert!(matches!(err, KeyMaterialError::IssuerNotTrusted(_)));

    write_issuer(dir.path(), &fixture.rotate());
    next_update(&mut rx).await;
    cancel.cancel();
}

#[tokio::test]
async fn missing_file_during_rewrite_is_retried() {
    let dir = TempDir::new().unwrap();
    let fixture = Fixture::new(ISSUER);
    write_issuer(dir.path(), &fixture);
    let cancel = CancellationToken::new();
    let (mut rx, _task) = start(
        provider(
            dir.path(),
            TrustAnchorSource::Inline(fixture.anchors_pem().to_string()),
        ),
        &cancel,
    );
    next_update(&mut rx).await;

    fs::remove_file(dir.path().join("tls.crt")).unwrap();
    assert_quiet(&mut rx, DEBOUNCE * 4).await;

    write_issuer(dir.path(), &fixture.rotate());
    next_update(&mut rx).await;
    cancel.cancel();
}

#[tokio::test]
async fn atomic_rename_is_observed() {
    let dir = TempDir::new().unwrap();
    let fixture = Fixture::new(ISSUER);
    write_issuer(dir.path(), &fixture);
    let cancel = CancellationToken::new();
    let (mut rx, _task) = start(
        provider(
            dir.path(),
            TrustAnchorSource::Inline(fixture.anchors_pem().to_string()),
        ),
        &cancel,
    );
    next_update(&mut rx).await;

    let rotated = fixture.rotate();
    let staging = TempDir::new().unwrap();
    write_issuer(staging.path(), &rotated);
    fs::rename(staging.path().join("tls.key"), dir.path().join("tls.key")).unwrap();
    fs::rename(staging.path().join("tls.crt"), dir.path().join("tls.crt")).unwrap();

    next_update(&mut rx).await;
    cancel.cancel();
}

#[tokio::test]
async fn anchor_file_rotation_is_watched() {
    let issuer_dir = TempDir::new().unwrap();
    let anchor_dir = TempDir::new().unwrap();
    let fixture = Fixture::new(ISSUER);
    write_issuer(issuer_dir.path(), &fixture);
    let anchors_path = anchor_dir.path().join("ca.crt");
    fs::write(&anchors_path, fixture.anchors_pem()).unwrap();

    let cancel = CancellationToken::new();
    let (mut rx, _task) = start(
        provider(issuer_dir.path(), TrustAnchorSource::File(anchors_path.clone())),
        &cancel,
    );
    next_update(&mut rx).await;

    let other = Fixture::new(ISSUER);
    fs::write(&anchors_path, other.anchors_pem()).unwrap();

    let err = next_error(&mut rx).await;
    assert!(matches!(err, KeyMaterialError::IssuerNotTrusted(_)));
    cancel.cancel();
}

#[tokio::test]
async fn invalid_material_at_startup_is_reported() {
    let dir = TempDir::new().unwrap();
    let fixture = Fixture::new(ISSUER);
    let cancel = CancellationToken::new();
    let (mut rx, _task) = start(
        provider(
            dir.path(),
            TrustAnchorSource::Inline(fixture.anchors_pem().to_string()),
        ),
        &cancel,
    );

    let err = next_error(&mut rx).await;
    assert!(matches!(err, KeyMaterialError::Read { .. }));
    cancel.cancel();
}

#[tokio::test]
async fn stops_when_cancelled() {
    let dir = TempDir::new().unwrap();
    let fixture = Fixture::new(ISSUER);
    write_issuer(dir.path(), &fixture);
    let cancel = CancellationToken::new();
    let (mut rx, task) = start(
        provider(
            dir.path(),
            TrustAnchorSource::Inline(fixture.anchors_pem().to_string()),
        ),
        &cancel,
    );
    next_update(&mut rx).await;

    cancel.cancel();

    let result = tokio::time::timeout(EVENT_TIMEOUT, task).await;
    assert!(matches!(result, Ok(Ok(Ok(())))));
}
