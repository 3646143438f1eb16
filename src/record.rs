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

//! Event recording for controllers.

use std::fmt;

use k8s_openapi::api::core::v1::ObjectReference;

/// Kind of a recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Informational event.
    Normal,
    /// Something went wrong or needs attention.
    Warning,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Normal => f.write_str("Normal"),
            EventType::Warning => f.write_str("Warning"),
        }
    }
}

/// Records events about objects on behalf of a controller.
pub trait Recorder: Send + Sync + 'static {
    /// Records an event about the referenced object.
    fn event(&self, reference: &ObjectReference, event_type: EventType, reason: &str, message: &str);

    /// Records a [`EventType::Normal`] event.
    fn normal(&self, reference: &ObjectReference, reason: &str, message: &str) {
        self.event(reference, EventType::Normal, reason, message);
    }

    /// Records a [`EventType::Warning`] event.
    fn warning(&self, reference: &ObjectReference, reason: &str, message: &str) {
        self.event(reference, EventType::Warning, reason, message);
    }
}

/// Recorder that writes events to the structured log.
#[derive(Debug, Clone)]
pub struct TracingRecorder {
    reporter: String,
}

impl TracingRecorder {
    /// Creates a recorder reporting as `reporter`.
    pub fn new(reporter: impl Into<String>) -> Self {
        Self {
            reporter: reporter.into(),
        }
    }

    /// Name the events are reported under.
    pub fn reporter(&self) -> &str {
        &self.reporter
    }
}

impl Recorder for TracingRecorder {
    fn event(&self, reference: &ObjectReference, event_type: EventType, reason: &str, message: &str) {
        let kind = reference.kind.as_deref().unwrap_or_default();
        let name = reference.name.as_deref().unwrap_or_default();
        let namespace = reference.namespace.as_deref().unwrap_or_default();

        match event_type {
            EventType::Normal => tracing::info!(
                reporter = %self.reporter,
                kind,
                name,
                namespace,
                reason,
                "{}",
                message
            ),
            EventType::Warning => tracing::warn!(
                reporter = %self.reporter,
                kind,
                name,
                namespace,
                reason,
                "{}",
                message
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingRecorder {
        events: Mutex<Vec<(EventType, String, String)>>,
    }

    impl Recorder for CollectingRecorder {
        fn event(&self, _: &ObjectReference, event_type: EventType, reason: &str, message: &str) {
            self.events
                .lock()
                .unwrap()
                .push((event_type, reason.to_string(), message.to_string()));
        }
    }

    #[test]
    fn test_provided_methods_set_event_type() {
        let recorder = CollectingRecorder::default();
        let reference = ObjectReference {
            kind: Some("Pod".to_string()),
            name: Some("web-0".to_string()),
            ..ObjectReference::default()
        };

        recorder.normal(&reference, "Synced", "pod synced");
        recorder.warning(&reference, "SyncFailed", "pod failed to sync");

        let events = recorder.events.lock().unwrap();
        assert_eq!(events[0].0, EventType::Normal);
        assert_eq!(events[1].0, EventType::Warning);
        assert_eq!(events[1].1, "SyncFailed");
    }

    #[test]
    fn test_event_type_display() {
        assert_eq!(EventType::Normal.to_string(), "Normal");
        assert_eq!(EventType::Warning.to_string(), "Warning");
    }

    #[test]
    fn test_tracing_recorder_reporter() {
        let recorder = TracingRecorder::new("acme-controller-manager");
        assert_eq!(recorder.reporter(), "acme-controller-manager");
        recorder.normal(&ObjectReference::default(), "Started", "manager started");
    }
}
