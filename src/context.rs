// Copyright 2025 The Kubernetes Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Controller manager context - shared state for all controllers.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use kube::core::GroupVersionKind;
use kube::Client;
use tracing::Span;

use crate::event::GenericEventChannel;
use crate::options::Options;
use crate::record::Recorder;
use crate::registry::GenericEventRegistry;
use crate::scheme::Scheme;

/// Context of the manager that owns the controllers.
///
/// Built once at startup from defaulted [`Options`] and shared by every
/// controller as an `Arc<ControllerManagerContext>`. Nothing in it changes
/// after construction except the generic event registry, which grows as
/// controllers ask for channels.
pub struct ControllerManagerContext {
    namespace: String,
    name: String,
    leader_election_id: String,
    leader_election_namespace: String,
    watch_namespace: String,
    max_concurrent_reconciles: usize,
    sync_period: Duration,
    client: Client,
    logger: Span,
    recorder: Arc<dyn Recorder>,
    scheme: Arc<Scheme>,
    generic_events: GenericEventRegistry,
}

impl ControllerManagerContext {
    /// Creates a context from defaulted options and live collaborators.
    ///
    /// `options` is expected to have gone through [`Options::defaults`]; a
    /// missing scheme or logger is replaced the same way defaulting would.
    pub fn new(options: &Options, client: Client, recorder: Arc<dyn Recorder>) -> Self {
        Self {
            namespace: options.pod_namespace.clone(),
            name: options.pod_name.clone(),
            leader_election_id: options.leader_election_id.clone(),
            leader_election_namespace: options.leader_election_namespace.clone(),
            watch_namespace: options.watch_namespace.clone(),
            max_concurrent_reconciles: options.max_concurrent_reconciles,
            sync_period: options.sync_period,
            client,
            logger: options.logger.clone().unwrap_or_else(Span::current),
            recorder,
            scheme: options.scheme.clone().unwrap_or_default(),
            generic_events: GenericEventRegistry::new(),
        }
    }

    /// Namespace of the pod running the manager.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Name of the manager.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the leader election lock.
    pub fn leader_election_id(&self) -> &str {
        &self.leader_election_id
    }

    /// Namespace of the leader election lock.
    pub fn leader_election_namespace(&self) -> &str {
        &self.leader_election_namespace
    }

    /// Namespace the controllers watch. Empty means all namespaces.
    pub fn watch_namespace(&self) -> &str {
        &self.watch_namespace
    }

    /// Maximum number of concurrent reconciles per controller.
    pub fn max_concurrent_reconciles(&self) -> usize {
        self.max_concurrent_reconciles
    }

    /// Interval between object cache resyncs.
    pub fn sync_period(&self) -> Duration {
        self.sync_period
    }

    /// The manager's API client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The manager's logging span.
    pub fn logger(&self) -> &Span {
        &self.logger
    }

    /// Recorder for events about reconciled objects.
    pub fn recorder(&self) -> &Arc<dyn Recorder> {
        &self.recorder
    }

    /// The manager's API scheme.
    pub fn scheme(&self) -> &Arc<Scheme> {
        &self.scheme
    }

    /// Returns the generic event channel for the resource kind `gvk`.
    ///
    /// Every caller asking for the same kind gets the same channel.
    pub fn generic_event_channel_for(&self, gvk: &GroupVersionKind) -> GenericEventChannel {
        self.generic_events.get_or_create(gvk)
    }
}

impl fmt::Display for ControllerManagerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl fmt::Debug for ControllerManagerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerManagerContext")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .field("leader_election_id", &self.leader_election_id)
            .field("leader_election_namespace", &self.leader_election_namespace)
            .field("watch_namespace", &self.watch_namespace)
            .field("max_concurrent_reconciles", &self.max_concurrent_reconciles)
            .field("generic_event_kinds", &self.generic_events.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::event::GenericEvent;
    use crate::record::TracingRecorder;

    pub(crate) fn test_client() -> Client {
        let config = kube::Config::new("http://127.0.0.1:6443".parse().unwrap());
        Client::try_from(config).unwrap()
    }

    pub(crate) fn test_options() -> Options {
        Options {
            prefix: "acme-".to_string(),
            pod_name: "acme-mgr".to_string(),
            pod_namespace: "acme-system".to_string(),
            watch_namespace: "apps".to_string(),
            ..Options::default()
        }
        .defaults()
    }

    fn test_context() -> ControllerManagerContext {
        ControllerManagerContext::new(
            &test_options(),
            test_client(),
            Arc::new(TracingRecorder::new("acme-mgr")),
        )
    }

    #[tokio::test]
    async fn test_context_identity() {
        let ctx = test_context();

        assert_eq!(ctx.to_string(), "acme-mgr");
        assert_eq!(ctx.name(), "acme-mgr");
        assert_eq!(ctx.namespace(), "acme-system");
        assert_eq!(ctx.leader_election_id(), "acme-mgr-runtime");
        assert_eq!(ctx.leader_election_namespace(), "default");
        assert_eq!(ctx.watch_namespace(), "apps");
        assert_eq!(ctx.max_concurrent_reconciles(), 10);
        assert!(ctx.scheme().is_empty());
    }

    #[tokio::test]
    async fn test_generic_event_channel_for() {
        let ctx = test_context();
        let gvk = GroupVersionKind::gvk("apps", "v1", "Deployment");

        let publisher = ctx.generic_event_channel_for(&gvk);
        let mut subscriber = ctx.generic_event_channel_for(&gvk).subscribe();

        publisher.send(GenericEvent::named("web", Some("apps")));
        let event = subscriber.recv().await.unwrap();
        assert_eq!(event.name(), Some("web"));
        assert_eq!(event.namespace(), Some("apps"));

        let other = ctx.generic_event_channel_for(&GroupVersionKind::gvk("", "v1", "Pod"));
        assert!(!publisher.same_channel(&other));
    }
}
