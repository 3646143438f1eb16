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

//! Manager options and their defaulting.
//!
//! [`Options`] is populated from flags, an optional config file and the
//! environment, then defaulted exactly once with [`Options::defaults`].
//! Defaulting fills every unset identity field through a fixed precedence
//! chain. A value that is already set is never replaced.
//!
//! String fields use the empty string to mean "unset", matching how the
//! command line and config file leave them.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::Span;

use crate::context::ControllerManagerContext;
use crate::manager::Manager;
use crate::scheme::Scheme;

/// Interval at which the object cache is resynchronized with the API server.
pub const DEFAULT_SYNC_PERIOD: Duration = Duration::from_secs(10 * 60);

/// Number of reconciles a controller may run at once.
pub const DEFAULT_MAX_CONCURRENT_RECONCILES: usize = 10;

/// Port the webhook server listens on.
pub const DEFAULT_WEBHOOK_PORT: u16 = 9443;

/// Namespace holding the leader election lock.
pub const DEFAULT_LEADER_ELECTION_NAMESPACE: &str = "default";

/// Environment variable naming the pod's namespace.
pub const POD_NAMESPACE_ENV: &str = "POD_NAMESPACE";

/// File the service account admission controller mounts the namespace into.
pub const SERVICE_ACCOUNT_NAMESPACE_PATH: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

const FALLBACK_NAMESPACE_SUFFIX: &str = "system";
const FALLBACK_POD_NAME_SUFFIX: &str = "controller-manager";
const FALLBACK_LEADER_ELECTION_ID_SUFFIX: &str = "-runtime";

/// Hook that registers controllers with a freshly built manager.
pub type AddToManagerFn =
    Arc<dyn Fn(&Arc<ControllerManagerContext>, &mut Manager) -> anyhow::Result<()> + Send + Sync>;

/// Options used to create a new manager.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Options {
    /// Prefix for the pod name, namespace and leader election ID.
    pub prefix: String,

    /// Whether leader election is enabled.
    pub leader_election_enabled: bool,

    /// Name of the leader election lock. Built from the prefix, pod name and
    /// [`Options::leader_election_id_suffix`] unless set explicitly.
    pub leader_election_id: String,

    /// Suffix of the leader election lock name.
    pub leader_election_id_suffix: String,

    /// Namespace in which the leader election lock is kept.
    pub leader_election_namespace: String,

    /// Interval between object cache resyncs. Zero means unset.
    #[serde(with = "humantime_serde")]
    pub sync_period: Duration,

    /// Maximum number of concurrent reconciles per controller. Zero means unset.
    pub max_concurrent_reconciles: usize,

    /// Bind address of the metrics endpoint.
    pub metrics_addr: String,

    /// Bind address of the health endpoint. Empty disables it.
    pub health_addr: String,

    /// Name of the pod running the manager.
    pub pod_name: String,

    /// Suffix of the pod name.
    pub pod_name_suffix: String,

    /// Namespace of the pod running the manager.
    pub pod_namespace: String,

    /// Suffix of the pod namespace.
    pub pod_namespace_suffix: String,

    /// Namespace the controllers watch. Empty watches all namespaces.
    pub watch_namespace: String,

    /// Port of the webhook server. Zero disables it.
    pub webhook_port: u16,

    /// Logging span the manager and its controllers log under.
    #[serde(skip)]
    pub logger: Option<Span>,

    /// Client configuration. Inferred from the environment when absent.
    #[serde(skip)]
    pub kube_config: Option<kube::Config>,

    /// Resource kinds known to the manager.
    #[serde(skip)]
    pub scheme: Option<Arc<Scheme>>,

    /// Registers controllers with the manager once it is built.
    #[serde(skip)]
    pub add_to_manager: Option<AddToManagerFn>,
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("prefix", &self.prefix)
            .field("leader_election_enabled", &self.leader_election_enabled)
            .field("leader_election_id", &self.leader_election_id)
            .field("leader_election_id_suffix", &self.leader_election_id_suffix)
            .field("leader_election_namespace", &self.leader_election_namespace)
            .field("sync_period", &self.sync_period)
            .field("max_concurrent_reconciles", &self.max_concurrent_reconciles)
            .field("metrics_addr", &self.metrics_addr)
            .field("health_addr", &self.health_addr)
            .field("pod_name", &self.pod_name)
            .field("pod_name_suffix", &self.pod_name_suffix)
            .field("pod_namespace", &self.pod_namespace)
            .field("pod_namespace_suffix", &self.pod_namespace_suffix)
            .field("watch_namespace", &self.watch_namespace)
            .field("webhook_port", &self.webhook_port)
            .field("scheme", &self.scheme)
            .field("add_to_manager", &self.add_to_manager.is_some())
            .finish_non_exhaustive()
    }
}

impl Options {
    /// Sets the hook that registers controllers once the manager is built.
    pub fn with_add_to_manager<F>(mut self, add_to_manager: F) -> Self
    where
        F: Fn(&Arc<ControllerManagerContext>, &mut Manager) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.add_to_manager = Some(Arc::new(add_to_manager));
        self
    }

    /// Fills every unset field using the process environment.
    pub fn defaults(self) -> Self {
        self.defaults_with(&ProcessEnvironment::default())
    }

    /// Fills every unset field, reading external inputs from `env`.
    ///
    /// Reads from `env` are best-effort: a missing variable, an unreadable
    /// file or a failed host name lookup moves on to the next source.
    pub fn defaults_with(mut self, env: &dyn Environment) -> Self {
        if self.logger.is_none() {
            self.logger = Some(Span::current());
        }

        let prefix = self.prefix.clone();

        let name_suffix = self.pod_name_suffix.clone();
        self.pod_name = Chain::new("pod_name")
            .tier("pod-name-suffix", || {
                non_empty(&name_suffix).map(|s| format!("{prefix}{s}"))
            })
            .tier("hostname", || env.hostname().map(|h| format!("{prefix}{h}")))
            .tier("fallback", || {
                Some(format!("{prefix}{FALLBACK_POD_NAME_SUFFIX}"))
            })
            .resolve(std::mem::take(&mut self.pod_name));

        if self.sync_period.is_zero() {
            self.sync_period = DEFAULT_SYNC_PERIOD;
        }

        if self.scheme.is_none() {
            self.scheme = Some(Arc::new(Scheme::new()));
        }

        let namespace_suffix = self.pod_namespace_suffix.clone();
        self.pod_namespace = Chain::new("pod_namespace")
            .tier("env", || env.var(POD_NAMESPACE_ENV).filter(|ns| !ns.is_empty()))
            .tier("service-account", || match env.service_account_namespace() {
                Ok(data) => non_empty(data.trim()).map(str::to_string),
                Err(error) => {
                    tracing::debug!(%error, "service account namespace unavailable");
                    None
                }
            })
            .tier("pod-namespace-suffix", || {
                non_empty(&namespace_suffix).map(|s| format!("{prefix}{s}"))
            })
            .tier("fallback", || {
                Some(format!("{prefix}{FALLBACK_NAMESPACE_SUFFIX}"))
            })
            .resolve(std::mem::take(&mut self.pod_namespace));

        let lock_base = leader_election_base(&prefix, &self.pod_name);
        let id_suffix = self.leader_election_id_suffix.clone();
        self.leader_election_id = Chain::new("leader_election_id")
            .tier("leader-election-id-suffix", || {
                non_empty(&id_suffix).map(|s| format!("{lock_base}{s}"))
            })
            .tier("fallback", || {
                Some(format!("{lock_base}{FALLBACK_LEADER_ELECTION_ID_SUFFIX}"))
            })
            .resolve(std::mem::take(&mut self.leader_election_id));

        self.leader_election_namespace = Chain::new("leader_election_namespace")
            .tier("fallback", || Some(DEFAULT_LEADER_ELECTION_NAMESPACE.to_string()))
            .resolve(std::mem::take(&mut self.leader_election_namespace));

        if self.max_concurrent_reconciles == 0 {
            self.max_concurrent_reconciles = DEFAULT_MAX_CONCURRENT_RECONCILES;
        }

        self
    }
}

/// Prefix joined with the pod name, without repeating a prefix the pod name
/// already carries.
fn leader_election_base(prefix: &str, pod_name: &str) -> String {
    if pod_name.starts_with(prefix) {
        pod_name.to_string()
    } else {
        format!("{prefix}{pod_name}")
    }
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

type Source<'a> = Box<dyn FnOnce() -> Option<String> + 'a>;

/// Ordered precedence chain for one field.
///
/// Tiers are tried top-down; the first one yielding a value wins. A field that
/// is already set skips the chain entirely.
struct Chain<'a> {
    field: &'static str,
    tiers: Vec<(&'static str, Source<'a>)>,
}

impl<'a> Chain<'a> {
    fn new(field: &'static str) -> Self {
        Self {
            field,
            tiers: Vec::new(),
        }
    }

    fn tier(mut self, source: &'static str, compute: impl FnOnce() -> Option<String> + 'a) -> Self {
        self.tiers.push((source, Box::new(compute)));
        self
    }

    fn resolve(self, current: String) -> String {
        if !current.is_empty() {
            return current;
        }

        for (source, compute) in self.tiers {
            if let Some(value) = compute() {
                tracing::debug!(field = self.field, source, %value, "defaulted option");
                return value;
            }
        }

        current
    }
}

/// External inputs read while defaulting.
pub trait Environment {
    /// Value of an environment variable, if set.
    fn var(&self, key: &str) -> Option<String>;

    /// Raw contents of the service account namespace file.
    fn service_account_namespace(&self) -> io::Result<String>;

    /// Host name of the machine, or `None` if the lookup failed.
    fn hostname(&self) -> Option<String>;
}

/// [`Environment`] backed by the running process and its filesystem.
#[derive(Debug, Clone)]
pub struct ProcessEnvironment {
    namespace_file: PathBuf,
}

impl ProcessEnvironment {
    /// Reads the service account namespace from `path` instead of the
    /// well-known mount point.
    pub fn with_namespace_file(path: impl AsRef<Path>) -> Self {
        Self {
            namespace_file: path.as_ref().to_path_buf(),
        }
    }
}

impl Default for ProcessEnvironment {
    fn default() -> Self {
        Self::with_namespace_file(SERVICE_ACCOUNT_NAMESPACE_PATH)
    }
}

impl Environment for ProcessEnvironment {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn service_account_namespace(&self) -> io::Result<String> {
        std::fs::read_to_string(&self.namespace_file)
    }

    fn hostname(&self) -> Option<String> {
        gethostname::gethostname()
            .into_string()
            .ok()
            .filter(|name| !name.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeEnvironment {
        vars: HashMap<String, String>,
        namespace_file: Option<String>,
        hostname: Option<String>,
    }

    impl Environment for FakeEnvironment {
        fn var(&self, key: &str) -> Option<String> {
            self.vars.get(key).cloned()
        }

        fn service_account_namespace(&self) -> io::Result<String> {
            self.namespace_file
                .clone()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no namespace file"))
        }

        fn hostname(&self) -> Option<String> {
            self.hostname.clone()
        }
    }

    fn acme() -> Options {
        Options {
            prefix: "acme-".to_string(),
            ..Options::default()
        }
    }

    #[test]
    fn test_chain_skips_set_value() {
        let value = Chain::new("field")
            .tier("never", || panic!("tier evaluated for a set field"))
            .resolve("explicit".to_string());
        assert_eq!(value, "explicit");
    }

    #[test]
    fn test_chain_first_tier_wins() {
        let value = Chain::new("field")
            .tier("empty", || None)
            .tier("second", || Some("second".to_string()))
            .tier("third", || Some("third".to_string()))
            .resolve(String::new());
        assert_eq!(value, "second");
    }

    #[test]
    fn test_namespace_fallback_to_system() {
        let opts = acme().defaults_with(&FakeEnvironment::default());
        assert_eq!(opts.pod_namespace, "acme-system");
    }

    #[test]
    fn test_namespace_from_suffix() {
        let opts = Options {
            pod_namespace_suffix: "controllers".to_string(),
            ..acme()
        }
        .defaults_with(&FakeEnvironment::default());
        assert_eq!(opts.pod_namespace, "acme-controllers");
    }

    #[test]
    fn test_namespace_from_file_is_trimmed() {
        let env = FakeEnvironment {
            namespace_file: Some("  team-a\n".to_string()),
            ..FakeEnvironment::default()
        };
        let opts = acme().defaults_with(&env);
        assert_eq!(opts.pod_namespace, "team-a");
    }

    #[test]
    fn test_blank_namespace_file_falls_through() {
        let env = FakeEnvironment {
            namespace_file: Some(" \n".to_string()),
            ..FakeEnvironment::default()
        };
        let opts = Options {
            pod_namespace_suffix: "ops".to_string(),
            ..acme()
        }
        .defaults_with(&env);
        assert_eq!(opts.pod_namespace, "acme-ops");
    }

    #[test]
    fn test_namespace_env_beats_file() {
        let env = FakeEnvironment {
            vars: [(POD_NAMESPACE_ENV.to_string(), "from-env".to_string())].into(),
            namespace_file: Some("from-file".to_string()),
            ..FakeEnvironment::default()
        };
        let opts = acme().defaults_with(&env);
        assert_eq!(opts.pod_namespace, "from-env");
    }

    #[test]
    fn test_explicit_namespace_beats_env() {
        let env = FakeEnvironment {
            vars: [(POD_NAMESPACE_ENV.to_string(), "other-ns".to_string())].into(),
            ..FakeEnvironment::default()
        };
        let opts = Options {
            pod_namespace: "custom-ns".to_string(),
            ..acme()
        }
        .defaults_with(&env);
        assert_eq!(opts.pod_namespace, "custom-ns");
    }

    #[test]
    fn test_pod_name_suffix_beats_hostname() {
        let env = FakeEnvironment {
            hostname: Some("node-7".to_string()),
            ..FakeEnvironment::default()
        };
        let opts = Options {
            pod_name_suffix: "mgr".to_string(),
            ..acme()
        }
        .defaults_with(&env);
        assert_eq!(opts.pod_name, "acme-mgr");
    }

    #[test]
    fn test_pod_name_from_hostname() {
        let env = FakeEnvironment {
            hostname: Some("node-7".to_string()),
            ..FakeEnvironment::default()
        };
        let opts = acme().defaults_with(&env);
        assert_eq!(opts.pod_name, "acme-node-7");
    }

    #[test]
    fn test_pod_name_when_hostname_lookup_fails() {
        let opts = acme().defaults_with(&FakeEnvironment::default());
        assert_eq!(opts.pod_name, "acme-controller-manager");
    }

    #[test]
    fn test_leader_election_id_runtime_suffix() {
        let opts = Options {
            pod_name_suffix: "mgr".to_string(),
            ..acme()
        }
        .defaults_with(&FakeEnvironment::default());
        assert_eq!(opts.leader_election_id, "acme-mgr-runtime");
    }

    #[test]
    fn test_leader_election_id_prefixes_bare_pod_name() {
        let opts = Options {
            pod_name: "mgr-0".to_string(),
            leader_election_id_suffix: "-lock".to_string(),
            ..acme()
        }
        .defaults_with(&FakeEnvironment::default());
        assert_eq!(opts.leader_election_id, "acme-mgr-0-lock");
    }

    #[test]
    fn test_leader_election_namespace_default() {
        let opts = acme().defaults_with(&FakeEnvironment::default());
        assert_eq!(opts.leader_election_namespace, "default");

        let opts = Options {
            leader_election_namespace: "kube-system".to_string(),
            ..acme()
        }
        .defaults_with(&FakeEnvironment::default());
        assert_eq!(opts.leader_election_namespace, "kube-system");
    }

    #[test]
    fn test_numeric_defaults() {
        let opts = Options::default().defaults_with(&FakeEnvironment::default());
        assert_eq!(opts.sync_period, DEFAULT_SYNC_PERIOD);
        assert_eq!(opts.max_concurrent_reconciles, DEFAULT_MAX_CONCURRENT_RECONCILES);
        assert_eq!(opts.webhook_port, 0);

        let opts = Options {
            sync_period: Duration::from_secs(30),
            max_concurrent_reconciles: 3,
            ..Options::default()
        }
        .defaults_with(&FakeEnvironment::default());
        assert_eq!(opts.sync_period, Duration::from_secs(30));
        assert_eq!(opts.max_concurrent_reconciles, 3);
    }

    #[test]
    fn test_scheme_and_logger_defaulted() {
        let opts = Options::default().defaults_with(&FakeEnvironment::default());
        assert!(opts.scheme.is_some());
        assert!(opts.logger.is_some());

        let scheme = Arc::new(Scheme::new());
        let opts = Options {
            scheme: Some(scheme.clone()),
            ..Options::default()
        }
        .defaults_with(&FakeEnvironment::default());
        assert!(Arc::ptr_eq(opts.scheme.as_ref().unwrap(), &scheme));
    }

    #[test]
    fn test_deserialize_from_yaml() {
        let opts: Options = serde_yaml::from_str(
            r#"
prefix: "acme-"
podNameSuffix: mgr
syncPeriod: 5m
maxConcurrentReconciles: 4
"#,
        )
        .unwrap();

        assert_eq!(opts.prefix, "acme-");
        assert_eq!(opts.pod_name_suffix, "mgr");
        assert_eq!(opts.sync_period, Duration::from_secs(300));
        assert_eq!(opts.max_concurrent_reconciles, 4);
        assert!(opts.pod_name.is_empty());
    }
}
