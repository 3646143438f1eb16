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

//! Generic events and the channels that carry them between controllers.
//!
//! A generic event tells a controller that something relevant to a resource
//! kind changed for reasons outside the watched object itself. It carries the
//! object's metadata only, never its body.

use std::fmt;
use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::GroupVersionKind;
use kube::Resource;
use tokio::sync::broadcast;

/// Number of events a generic event channel buffers for slow receivers.
pub const GENERIC_EVENT_CHANNEL_CAPACITY: usize = 16;

/// A notification that an object of some kind should be re-reconciled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenericEvent {
    /// Metadata of the object the event refers to.
    pub meta: ObjectMeta,
}

impl GenericEvent {
    /// Creates an event from object metadata.
    pub fn new(meta: ObjectMeta) -> Self {
        Self { meta }
    }

    /// Creates an event referring to `obj`, copying only its metadata.
    pub fn for_object<K: Resource>(obj: &K) -> Self {
        Self::new(obj.meta().clone())
    }

    /// Creates an event for a named object in an optional namespace.
    pub fn named(name: impl Into<String>, namespace: Option<&str>) -> Self {
        Self::new(ObjectMeta {
            name: Some(name.into()),
            namespace: namespace.map(str::to_string),
            ..ObjectMeta::default()
        })
    }

    /// Name of the referenced object.
    pub fn name(&self) -> Option<&str> {
        self.meta.name.as_deref()
    }

    /// Namespace of the referenced object, if namespaced.
    pub fn namespace(&self) -> Option<&str> {
        self.meta.namespace.as_deref()
    }
}

/// Broadcast channel of [`GenericEvent`]s for a single resource kind.
///
/// Clones share the same underlying channel. Two handles can be compared with
/// [`GenericEventChannel::same_channel`].
#[derive(Clone)]
pub struct GenericEventChannel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    gvk: GroupVersionKind,
    tx: broadcast::Sender<GenericEvent>,
}

impl GenericEventChannel {
    pub(crate) fn new(gvk: GroupVersionKind) -> Self {
        let (tx, _rx) = broadcast::channel(GENERIC_EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(ChannelInner { gvk, tx }),
        }
    }

    /// The resource kind this channel carries events for.
    pub fn gvk(&self) -> &GroupVersionKind {
        &self.inner.gvk
    }

    /// Publishes an event to every current subscriber.
    ///
    /// Returns the number of subscribers the event reached. Sending with no
    /// subscribers drops the event and returns zero.
    pub fn send(&self, event: GenericEvent) -> usize {
        self.inner.tx.send(event).unwrap_or(0)
    }

    /// Subscribes to events sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<GenericEvent> {
        self.inner.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn receiver_count(&self) -> usize {
        self.inner.tx.receiver_count()
    }

    /// Returns true if both handles refer to the same channel instance.
    pub fn same_channel(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for GenericEventChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenericEventChannel")
            .field("gvk", &self.inner.gvk)
            .field("receivers", &self.inner.tx.receiver_count())
            .finish()
    }
}
