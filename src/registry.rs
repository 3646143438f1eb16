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

//! Registry of generic event channels keyed by resource kind.

use dashmap::DashMap;
use kube::core::GroupVersionKind;

use crate::event::GenericEventChannel;

/// Concurrent map from resource kind to its generic event channel.
///
/// Exactly one channel exists per kind for the lifetime of the registry, and
/// every caller asking for a kind receives that same channel, including
/// callers racing on the first request. Entries are never removed and the
/// registry never closes a channel it owns.
///
/// The backing map is private; [`GenericEventRegistry::get_or_create`] is the
/// only way to add an entry.
#[derive(Debug, Default)]
pub struct GenericEventRegistry {
    channels: DashMap<GroupVersionKind, GenericEventChannel>,
}

impl GenericEventRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the channel for `gvk`, creating it on first request.
    pub fn get_or_create(&self, gvk: &GroupVersionKind) -> GenericEventChannel {
        if let Some(channel) = self.channels.get(gvk) {
            return channel.value().clone();
        }

        // The entry holds the shard's write lock, so only the caller that
        // wins the insert ever constructs a channel.
        self.channels
            .entry(gvk.clone())
            .or_insert_with(|| {
                tracing::debug!(
                    group = %gvk.group,
                    version = %gvk.version,
                    kind = %gvk.kind,
                    "created generic event channel"
                );
                GenericEventChannel::new(gvk.clone())
            })
            .value()
            .clone()
    }

    /// Returns true if a channel has already been created for `gvk`.
    pub fn contains(&self, gvk: &GroupVersionKind) -> bool {
        self.channels.contains_key(gvk)
    }

    /// Number of resource kinds with a channel.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Returns true if no channel has been created yet.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_key_returns_same_channel() {
        let registry = GenericEventRegistry::new();
        let gvk = GroupVersionKind::gvk("apps", "v1", "Deployment");

        let first = registry.get_or_create(&gvk);
        let second = registry.get_or_create(&GroupVersionKind::gvk("apps", "v1", "Deployment"));

        assert!(first.same_channel(&second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_keys_differing_in_one_field_are_distinct() {
        let registry = GenericEventRegistry::new();
        let base = registry.get_or_create(&GroupVersionKind::gvk("apps", "v1", "Deployment"));

        for other in [
            GroupVersionKind::gvk("extensions", "v1", "Deployment"),
            GroupVersionKind::gvk("apps", "v1beta1", "Deployment"),
            GroupVersionKind::gvk("apps", "v1", "StatefulSet"),
        ] {
            assert!(!base.same_channel(&registry.get_or_create(&other)));
        }
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_contains_after_first_request() {
        let registry = GenericEventRegistry::new();
        let gvk = GroupVersionKind::gvk("", "v1", "Service");

        assert!(registry.is_empty());
        assert!(!registry.contains(&gvk));

        let channel = registry.get_or_create(&gvk);
        assert!(registry.contains(&gvk));
        assert_eq!(channel.gvk(), &gvk);
    }

    #[test]
    fn test_concurrent_first_access_yields_one_channel() {
        use std::sync::{Arc, Barrier};

        const THREADS: usize = 16;

        let registry = Arc::new(GenericEventRegistry::new());
        let barrier = Arc::new(Barrier::new(THREADS));
        let gvk = GroupVersionKind::gvk("batch", "v1", "Job");

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let registry = registry.clone();
                let barrier = barrier.clone();
                let gvk = gvk.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    registry.get_or_create(&gvk)
                })
            })
            .collect();

        let channels: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for channel in &channels[1..] {
            assert!(channels[0].same_channel(channel));
        }
        assert_eq!(registry.len(), 1);
    }
}
