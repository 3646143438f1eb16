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

//! kube-manager-context - shared runtime context for a Kubernetes controller manager
//!
//! This library provides what independent controllers hosted in one manager
//! process share:
//! - Generic event channels keyed by resource kind
//! - Defaulting of the manager's identity (pod name, namespace, leader election lock)
//! - The controller manager context carrying client, logger, recorder and scheme
//! - A thin manager that runs controllers and serves health checks

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod controller;
pub mod event;
pub mod health;
pub mod manager;
pub mod options;
pub mod record;
pub mod registry;
pub mod scheme;

// Re-export commonly used types
pub use context::ControllerManagerContext;
pub use controller::{CancellationToken, Controller, ControllerError, FunctionController};
pub use event::{GenericEvent, GenericEventChannel};
pub use kube::core::GroupVersionKind;
pub use manager::{Manager, ManagerError};
pub use options::{Environment, Options, ProcessEnvironment};
pub use record::{EventType, Recorder, TracingRecorder};
pub use registry::GenericEventRegistry;
pub use scheme::Scheme;

/// Semantic version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
