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

//! Manager - hosts controllers around a shared context.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::context::ControllerManagerContext;
use crate::controller::{Controller, ControllerError};
use crate::health::{
    parse_bind_address, ControllerHealthChecker, FunctionHealthChecker, HealthRegistry,
    HealthServer,
};
use crate::options::Options;
use crate::record::TracingRecorder;

/// How long [`Manager::run`] waits for controllers to stop after shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur while building or running a manager.
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("failed to infer client configuration: {0}")]
    InferConfig(#[from] kube::config::InferConfigError),

    #[error("failed to build API client: {0}")]
    Client(#[from] kube::Error),

    #[error("failed to add controllers to the manager: {0:#}")]
    AddToManager(#[source] anyhow::Error),

    #[error("controller {0} is already registered")]
    DuplicateController(String),

    #[error("invalid health address {addr:?}: {source}")]
    InvalidHealthAddr {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("failed to start health server: {0}")]
    HealthServer(#[source] std::io::Error),

    #[error(transparent)]
    Controller(#[from] ControllerError),
}

/// Result type for manager operations.
pub type Result<T> = std::result::Result<T, ManagerError>;

/// Builds an API client from the options' client configuration, inferring
/// one from the environment when none is set.
pub async fn build_client(options: &Options) -> Result<kube::Client> {
    let config = match &options.kube_config {
        Some(config) => config.clone(),
        None => kube::Config::infer().await?,
    };
    Ok(kube::Client::try_from(config)?)
}

/// The controller manager.
///
/// Owns the [`ControllerManagerContext`] and runs every registered
/// [`Controller`] against it until shutdown.
pub struct Manager {
    /// Defaulted options this manager was built from.
    options: Options,

    /// Context shared with every controller.
    context: Arc<ControllerManagerContext>,

    /// Controllers in registration order.
    controllers: Vec<Arc<dyn Controller>>,

    /// Readiness checks served on the health address.
    health: HealthRegistry,

    /// Root cancellation token for shutdown.
    shutdown_token: CancellationToken,

    /// Maximum time to wait for controllers to stop.
    shutdown_timeout: Duration,

    /// Controllers that are currently running.
    running_controllers: Arc<tokio::sync::RwLock<HashSet<String>>>,
}

impl Manager {
    /// Defaults `options`, builds an API client and creates the manager.
    pub async fn new(options: Options) -> Result<Self> {
        let options = options.defaults();
        let client = build_client(&options).await?;
        Self::from_defaulted(options, client)
    }

    /// Defaults `options` and creates the manager around an existing client.
    pub fn with_client(options: Options, client: kube::Client) -> Result<Self> {
        Self::from_defaulted(options.defaults(), client)
    }

    fn from_defaulted(options: Options, client: kube::Client) -> Result<Self> {
        let recorder = Arc::new(TracingRecorder::new(options.pod_name.clone()));
        let context = Arc::new(ControllerManagerContext::new(&options, client, recorder));

        tracing::info!(
            name = %context,
            namespace = context.namespace(),
            leader_election_id = context.leader_election_id(),
            leader_election_namespace = context.leader_election_namespace(),
            watch_namespace = context.watch_namespace(),
            "created controller manager context"
        );

        let add_to_manager = options.add_to_manager.clone();
        let mut manager = Self {
            options,
            context,
            controllers: Vec::new(),
            health: HealthRegistry::new(),
            shutdown_token: CancellationToken::new(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            running_controllers: Arc::new(tokio::sync::RwLock::new(HashSet::new())),
        };

        if let Some(add_to_manager) = add_to_manager {
            let context = manager.context.clone();
            add_to_manager(&context, &mut manager).map_err(ManagerError::AddToManager)?;
        }

        Ok(manager)
    }

    /// Registers a controller. Names must be unique.
    pub fn add(&mut self, controller: Arc<dyn Controller>) -> Result<&mut Self> {
        let name = controller.name();
        if self.controllers.iter().any(|c| c.name() == name) {
            return Err(ManagerError::DuplicateController(name.to_string()));
        }

        tracing::debug!(controller = %name, "registered controller");
        self.controllers.push(controller);
        Ok(self)
    }

    /// Sets how long to wait for controllers to stop after shutdown.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// The context shared with every controller.
    pub fn context(&self) -> &Arc<ControllerManagerContext> {
        &self.context
    }

    /// The defaulted options this manager was built from.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// The readiness checks served on the health address.
    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    /// Names of the registered controllers, in registration order.
    pub fn controller_names(&self) -> Vec<&str> {
        self.controllers.iter().map(|c| c.name()).collect()
    }

    /// Returns the shutdown cancellation token.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Initiates a graceful shutdown.
    pub fn shutdown(&self) {
        tracing::info!("initiating graceful shutdown");
        self.shutdown_token.cancel();
    }

    /// Runs the manager.
    ///
    /// Starts the health server when a health address is configured, runs
    /// every controller concurrently and returns once shutdown has been
    /// requested and the controllers have stopped, or as soon as one of them
    /// fails.
    pub async fn run(&self) -> Result<()> {
        let span = self.context.logger().clone();
        self.run_instrumented().instrument(span).await
    }

    async fn run_instrumented(&self) -> Result<()> {
        tracing::info!(manager = %self.context, "starting controller manager");

        if self.options.leader_election_enabled {
            tracing::info!(
                lock = self.context.leader_election_id(),
                namespace = self.context.leader_election_namespace(),
                "leader election lock configured"
            );
        }

        let health_server = self.start_health_server().await?;

        if self.controllers.is_empty() {
            tracing::warn!("no controllers registered, waiting for shutdown");
        }

        let result = self.run_controllers().await;

        self.shutdown_token.cancel();
        if let Some(handle) = health_server {
            match handle.await {
                Ok(Err(error)) => tracing::warn!(%error, "health server stopped with error"),
                Err(error) => tracing::warn!(%error, "health server task failed"),
                Ok(Ok(())) => {}
            }
        }

        result
    }

    async fn start_health_server(
        &self,
    ) -> Result<Option<tokio::task::JoinHandle<std::io::Result<()>>>> {
        let addr = &self.options.health_addr;
        if addr.is_empty() {
            return Ok(None);
        }

        let addr = parse_bind_address(addr).map_err(|source| ManagerError::InvalidHealthAddr {
            addr: addr.clone(),
            source,
        })?;

        self.health
            .register(Arc::new(FunctionHealthChecker::new("ping", || async { true })))
            .await;
        for controller in &self.controllers {
            self.health
                .register(Arc::new(ControllerHealthChecker(controller.clone())))
                .await;
        }

        let server = HealthServer::bind(addr, self.health.clone())
            .await
            .map_err(ManagerError::HealthServer)?;

        Ok(Some(tokio::spawn(server.serve(self.shutdown_token.clone()))))
    }

    /// Runs all controllers concurrently.
    async fn run_controllers(&self) -> Result<()> {
        let mut join_set = JoinSet::new();
        let mut task_names = HashMap::new();

        for controller in &self.controllers {
            let controller = controller.clone();
            let name = controller.name().to_string();
            let ctx = self.context.clone();
            let cancel = self.shutdown_token.child_token();
            let running = self.running_controllers.clone();
            let span = self.context.logger().clone();

            let controller_name = name.clone();
            let handle = join_set.spawn(async move {
                tracing::info!(controller = %name, "starting controller");
                running.write().await.insert(name.clone());

                let result = controller.run(ctx, cancel).await;

                running.write().await.remove(&name);

                if let Err(e) = controller.shutdown().await {
                    tracing::warn!(controller = %name, error = %e, "controller shutdown hook failed");
                }

                match &result {
                    Ok(()) => tracing::info!(controller = %name, "controller terminated successfully"),
                    Err(e) => tracing::error!(controller = %name, error = %e, "controller terminated with error"),
                }

                result
            }.instrument(span));
            task_names.insert(handle.id(), controller_name);
        }

        let result = tokio::select! {
            result = async {
                while let Some(joined) = join_set.join_next_with_id().await {
                    match joined {
                        Ok((id, Ok(()))) => {
                            tracing::debug!(controller = %task_name(&task_names, id), "controller finished");
                        }
                        Ok((_, Err(e))) => return Err(ManagerError::from(e)),
                        Err(e) => {
                            let name = task_name(&task_names, e.id());
                            if e.is_panic() {
                                tracing::error!(controller = %name, "controller task panicked");
                            }
                            return Err(ControllerError::runtime(name, e).into());
                        }
                    }
                }
                // Every controller returned on its own; keep serving until shutdown.
                self.shutdown_token.cancelled().await;
                Ok(())
            } => result,

            _ = self.shutdown_token.cancelled() => {
                tracing::info!("shutdown signal received, waiting for controllers to stop");
                Ok(())
            }
        };

        if result.is_err() {
            self.shutdown_token.cancel();
        }
        self.drain(&mut join_set, &task_names).await;

        result
    }

    /// Waits for the remaining controllers, up to the shutdown timeout.
    async fn drain(
        &self,
        join_set: &mut JoinSet<crate::controller::Result<()>>,
        task_names: &HashMap<tokio::task::Id, String>,
    ) {
        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;

        loop {
            match tokio::time::timeout_at(deadline, join_set.join_next_with_id()).await {
                Ok(Some(Ok((id, Ok(()))))) => {
                    tracing::debug!(controller = %task_name(task_names, id), "controller stopped");
                }
                Ok(Some(Ok((id, Err(e))))) => {
                    tracing::warn!(controller = %task_name(task_names, id), error = %e, "controller stopped with error");
                }
                Ok(Some(Err(e))) => {
                    tracing::warn!(controller = %task_name(task_names, e.id()), error = %e, "controller task failed");
                }
                Ok(None) => break,
                Err(_) => {
                    let running = self.running_controllers.read().await;
                    tracing::warn!(
                        controllers = ?running.iter().collect::<Vec<_>>(),
                        "shutdown timeout reached, controllers still running"
                    );
                    join_set.abort_all();
                    break;
                }
            }
        }
    }
}

/// Name of the controller a task was spawned for.
fn task_name(task_names: &HashMap<tokio::task::Id, String>, id: tokio::task::Id) -> String {
    task_names
        .get(&id)
        .cloned()
        .unwrap_or_else(|| format!("task-{id}"))
}
