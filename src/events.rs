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

//! Kubernetes Events on the identity controller's Deployment.
//!
//! Publishing is fire-and-forget: failures are logged and never reach the
//! caller.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::Client;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::warn;

/// Publishes Kubernetes Events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// `controller_name` is reported as the Event's reporting component.
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Discards every event.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Reference to the identity controller's Deployment.
pub fn deployment_ref(namespace: &str, name: &str) -> ObjectReference {
    ObjectReference {
        api_version: Some("apps/v1".to_string()),
        kind: Some("Deployment".to_string()),
        namespace: Some(namespace.to_string()),
        name: Some(name.to_string()),
        ..Default::default()
    }
}

/// Event reasons, shown in the REASON column of `kubectl get events`.
pub mod reasons {
    /// A workload certificate was issued
    pub const ISSUED_LEAF_CERTIFICATE: &str = "IssuedLeafCertificate";
    /// An authenticated issuance request failed
    pub const ISSUANCE_FAILED: &str = "IssuanceFailed";
    /// New issuer material was loaded
    pub const ISSUER_UPDATED: &str = "IssuerUpdated";
    /// Changed issuer material could not be loaded, the previous issuer stays in use
    pub const ISSUER_UPDATE_SKIPPED: &str = "IssuerUpdateSkipped";
    /// Issuer material on disk is invalid, issuance is stopped
    pub const ISSUER_INVALID: &str = "IssuerInvalid";
}

/// Event actions.
pub mod actions {
    pub const CERTIFY: &str = "Certify";
    pub const ROTATE: &str = "Rotate";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployment_reference() {
        let r = deployment_ref("mesh-system", "mesh-identity");

        assert_eq!(r.api_version.as_deref(), Some("apps/v1"));
        assert_eq!(r.kind.as_deref(), Some("Deployment"));
        assert_eq!(r.namespace.as_deref(), Some("mesh-system"));
        assert_eq!(r.name.as_deref(), Some("mesh-identity"));
    }

    #[tokio::test]
    async fn noop_publisher_accepts_events() {
        let publisher: Box<dyn EventPublisher> = Box::new(NoopEventPublisher);
        publisher
            .publish(
                &deployment_ref("mesh-system", "mesh-identity"),
                EventType::Warning,
                reasons::ISSUER_INVALID,
                actions::ROTATE,
                None,
            )
            .await;
    }
}
