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

//! controller-manager - hosts controllers around a shared manager context.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{ArgAction, Parser};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kube_manager_context::options::{
    Options, DEFAULT_MAX_CONCURRENT_RECONCILES, DEFAULT_SYNC_PERIOD, DEFAULT_WEBHOOK_PORT,
};
use kube_manager_context::Manager;

/// Controller manager
///
/// Resolves the manager's identity (pod name, namespace, leader election lock)
/// from flags, environment and service account metadata, then hosts the
/// registered controllers until it receives SIGINT or SIGTERM.
#[derive(Parser, Debug)]
#[command(name = "controller-manager")]
#[command(version)]
#[command(about = "Kubernetes controller manager", long_about = None)]
struct Args {
    /// Path to the kubeconfig file
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Path to a YAML file with manager options
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    log_json: bool,

    /// Prefix for the pod name, namespace and leader election ID
    #[arg(long)]
    prefix: Option<String>,

    /// The address the metric endpoint binds to [default: :8080]
    #[arg(long)]
    metrics_addr: Option<String>,

    /// The address the health endpoint binds to [default: :9440]
    #[arg(long)]
    health_addr: Option<String>,

    /// Enable leader election for the controller manager [default: true]
    #[arg(long, action = ArgAction::Set)]
    enable_leader_election: Option<bool>,

    /// Name of the resource used as the leader election lock
    #[arg(long)]
    leader_election_id: Option<String>,

    /// Namespace of the leader election lock
    #[arg(long)]
    leader_election_namespace: Option<String>,

    /// Namespace the controllers watch; all namespaces if unset
    #[arg(long)]
    namespace: Option<String>,

    /// Interval at which watched objects are synchronized [default: 10m]
    #[arg(long, value_parser = parse_duration)]
    sync_period: Option<Duration>,

    /// Maximum number of concurrent reconciles per controller [default: 10]
    #[arg(long)]
    max_concurrent_reconciles: Option<usize>,

    /// Suffix of the pod name running the manager [default: controller-manager]
    #[arg(long)]
    pod_name_suffix: Option<String>,

    /// Suffix of the pod namespace running the manager [default: controller-manager]
    #[arg(long)]
    pod_namespace_suffix: Option<String>,

    /// Webhook server port, 0 disables it [default: 9443]
    #[arg(long)]
    webhook_port: Option<u16>,
}

fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    humantime::parse_duration(s).map_err(|e| anyhow::anyhow!("invalid duration: {}", e))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level, args.log_json)?;

    info!("starting controller-manager");

    let options = load_options(args).await?;
    let manager = Manager::new(options)
        .await
        .context("failed to create controller manager")?;

    let shutdown_token = manager.shutdown_token();
    tokio::spawn(async move {
        wait_for_shutdown().await;
        shutdown_token.cancel();
    });

    if let Err(e) = manager.run().await {
        error!("controller manager failed: {:#}", e);
        return Err(e.into());
    }

    info!("controller-manager exited successfully");
    Ok(())
}

/// Initializes logging based on the provided level and format.
fn init_logging(level: &str, json: bool) -> anyhow::Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(
            level
                .parse::<tracing_subscriber::filter::Directive>()
                .with_context(|| format!("invalid log level: {level}"))?,
        )
        .from_env_lossy();

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer())
            .init();
    }
    Ok(())
}

/// Builds options from the documented defaults, then the config file, then
/// command-line flags. Later sources win.
async fn load_options(args: Args) -> anyhow::Result<Options> {
    let mut options = if let Some(config_path) = &args.config {
        let content = tokio::fs::read_to_string(config_path)
            .await
            .with_context(|| format!("failed to read config file: {:?}", config_path))?;

        parse_config(&content)
            .with_context(|| format!("failed to parse config file: {:?}", config_path))?
    } else {
        flag_defaults()
    };

    override_with(&mut options.prefix, args.prefix);
    override_with(&mut options.metrics_addr, args.metrics_addr);
    override_with(&mut options.health_addr, args.health_addr);
    override_with(&mut options.leader_election_enabled, args.enable_leader_election);
    override_with(&mut options.leader_election_id, args.leader_election_id);
    override_with(&mut options.leader_election_namespace, args.leader_election_namespace);
    override_with(&mut options.watch_namespace, args.namespace);
    override_with(&mut options.sync_period, args.sync_period);
    override_with(&mut options.max_concurrent_reconciles, args.max_concurrent_reconciles);
    override_with(&mut options.pod_name_suffix, args.pod_name_suffix);
    override_with(&mut options.pod_namespace_suffix, args.pod_namespace_suffix);
    override_with(&mut options.webhook_port, args.webhook_port);

    if let Some(kubeconfig_path) = &args.kubeconfig {
        options.kube_config = Some(load_kubeconfig(kubeconfig_path).await?);
    }

    Ok(options)
}

/// Options as the command line leaves them when no flag is given.
fn flag_defaults() -> Options {
    Options {
        metrics_addr: ":8080".to_string(),
        health_addr: ":9440".to_string(),
        leader_election_enabled: true,
        sync_period: DEFAULT_SYNC_PERIOD,
        max_concurrent_reconciles: DEFAULT_MAX_CONCURRENT_RECONCILES,
        pod_name_suffix: "controller-manager".to_string(),
        pod_namespace_suffix: "controller-manager".to_string(),
        webhook_port: DEFAULT_WEBHOOK_PORT,
        ..Options::default()
    }
}

/// Parses a YAML config file. Keys the file leaves out keep their
/// [`flag_defaults`] value.
fn parse_config(content: &str) -> anyhow::Result<Options> {
    let mut merged = serde_yaml::to_value(flag_defaults())?;
    let file: serde_yaml::Value = serde_yaml::from_str(content)?;

    match (merged.as_mapping_mut(), file) {
        (_, serde_yaml::Value::Null) => {}
        (Some(base), serde_yaml::Value::Mapping(overlay)) => base.extend(overlay),
        _ => anyhow::bail!("config file must be a mapping of option names to values"),
    }

    Ok(serde_yaml::from_value(merged)?)
}

fn override_with<T>(field: &mut T, flag: Option<T>) {
    if let Some(value) = flag {
        *field = value;
    }
}

/// Loads a client configuration from a kubeconfig file.
async fn load_kubeconfig(path: &Path) -> anyhow::Result<kube::Config> {
    use kube::config::{KubeConfigOptions, Kubeconfig};

    let kubeconfig = Kubeconfig::read_from(path)
        .with_context(|| format!("failed to read kubeconfig from: {:?}", path))?;
    kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .with_context(|| format!("failed to load kubeconfig from: {:?}", path))
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    error!(error = %e, "failed to install signal handlers");
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
            }
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down");
        }
    }
}
