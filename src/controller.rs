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

//! Core controller traits and types.
//!
//! This module defines the interface a reconciliation loop implements to be
//! hosted by the [`Manager`](crate::manager::Manager).

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use tokio_util::sync::CancellationToken;

use crate::context::ControllerManagerContext;

/// Errors that can occur when running a controller.
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("controller {name} failed to start: {source}")]
    StartFailed {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("controller {name} runtime error: {source}")]
    Runtime {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Result type for controller operations.
pub type Result<T> = std::result::Result<T, ControllerError>;

impl ControllerError {
    /// Wraps a failure raised while the named controller was running.
    pub fn runtime(
        name: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        ControllerError::Runtime {
            name: name.into(),
            source: source.into(),
        }
    }
}

/// The trait every hosted controller implements.
///
/// # Lifecycle
///
/// 1. The controller is registered with [`Manager::add`](crate::manager::Manager::add)
/// 2. [`Controller::run`] is called with the shared context and a cancellation token
/// 3. The controller runs until the token is cancelled or an error occurs
/// 4. [`Controller::shutdown`] is called to clean up resources
///
/// Controllers that need to hear about changes outside their own watch
/// subscribe to [`ControllerManagerContext::generic_event_channel_for`].
#[async_trait]
pub trait Controller: Send + Sync + 'static {
    /// Returns the canonical name of this controller.
    fn name(&self) -> &str;

    /// Runs the controller's main loop.
    ///
    /// Should return `Ok(())` once `cancel` is triggered.
    async fn run(&self, ctx: Arc<ControllerManagerContext>, cancel: CancellationToken) -> Result<()>;

    /// Optional readiness check. The default implementation always passes.
    fn health_check(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async { true })
    }

    /// Optional graceful shutdown hook, called after [`Controller::run`] returns.
    fn shutdown(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}

/// A wrapper that turns a closure into a [`Controller`].
pub struct FunctionController<F, Fut>
where
    F: Fn(Arc<ControllerManagerContext>, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    name: String,
    run_fn: F,
}

impl<F, Fut> FunctionController<F, Fut>
where
    F: Fn(Arc<ControllerManagerContext>, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    /// Creates a new function-based controller.
    pub fn new(name: impl Into<String>, run_fn: F) -> Self {
        Self {
            name: name.into(),
            run_fn,
        }
    }
}

impl<F, Fut> fmt::Debug for FunctionController<F, Fut>
where
    F: Fn(Arc<ControllerManagerContext>, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionController")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<F, Fut> Controller for FunctionController<F, Fut>
where
    F: Fn(Arc<ControllerManagerContext>, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: Arc<ControllerManagerContext>, cancel: CancellationToken) -> Result<()> {
        (self.run_fn)(ctx, cancel).await
    }
}
