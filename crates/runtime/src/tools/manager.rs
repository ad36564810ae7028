//! Scoped lifecycle for a set of tool-provider connections.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{
    CatalogBuilder, CollisionPolicy, ConnectionHandle, ConnectionState, DEFAULT_SHUTDOWN_GRACE,
    McpProvider, ToolCatalog, ToolError, ToolProvider,
};
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Launch parameters for one stdio tool provider.
pub type ProviderConfig = mcp::ServerConfig;

/// What to do when some providers fail to connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Close everything that did connect and fail the scope.
    #[default]
    Abort,
    /// Warn and continue with the providers that connected.
    Degrade,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionOptions {
    pub failure_policy: FailurePolicy,
    pub collision_policy: CollisionPolicy,
    /// Bound on the whole parallel connect phase.
    pub connect_timeout: Duration,
    /// Bound on each provider's close.
    pub close_timeout: Duration,
    /// Retry applied to each provider's connect.
    pub retry: RetryPolicy,
    /// Per-request bound for stdio providers built from config.
    pub request_timeout: Duration,
    /// Time a stdio provider gets to exit after its stdin closes.
    pub shutdown_grace: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            collision_policy: CollisionPolicy::default(),
            connect_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default().with_max_attempts(2),
            request_timeout: mcp::DEFAULT_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

/// A labelled provider awaiting connection.
#[derive(Clone)]
pub struct ProviderEntry {
    label: String,
    provider: Arc<dyn ToolProvider>,
}

impl ProviderEntry {
    pub fn new(label: impl Into<String>, provider: Arc<dyn ToolProvider>) -> Self {
        Self {
            label: label.into(),
            provider,
        }
    }

    /// A stdio process provider labelled with its configured name.
    pub fn from_config(config: ProviderConfig, options: &ConnectionOptions) -> Self {
        let provider = McpProvider::new(config.clone())
            .with_request_timeout(options.request_timeout)
            .with_shutdown_grace(options.shutdown_grace);
        Self::new(config.name, Arc::new(provider))
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// A provider that did not make it into the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderFailure {
    pub provider: String,
    pub error: ToolError,
}

/// Owns the configured providers and hands out connection scopes.
///
/// Each session builds its own manager; nothing is shared between managers.
pub struct ToolConnectionManager {
    entries: Vec<ProviderEntry>,
    options: ConnectionOptions,
}

impl ToolConnectionManager {
    pub fn new(entries: Vec<ProviderEntry>, options: ConnectionOptions) -> Self {
        Self { entries, options }
    }

    pub fn from_configs(
        configs: impl IntoIterator<Item = ProviderConfig>,
        options: ConnectionOptions,
    ) -> Self {
        let entries = configs
            .into_iter()
            .map(|config| ProviderEntry::from_config(config, &options))
            .collect();
        Self::new(entries, options)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Connect every provider in parallel and freeze the resulting catalog.
    ///
    /// The returned scope must be closed with [`ConnectionScope::close`]; if it
    /// is dropped instead (including when this future is cancelled) the close
    /// runs in the background on the current runtime.
    pub async fn connect(&self) -> Result<ConnectionScope> {
        let handles: Vec<Arc<ConnectionHandle>> = self
            .entries
            .iter()
            .map(|entry| Arc::new(ConnectionHandle::new(&entry.label, entry.provider.clone())))
            .collect();

        let mut scope = ConnectionScope {
            handles,
            catalog: ToolCatalog::empty(),
            failures: Vec::new(),
            close_timeout: self.options.close_timeout,
            closed: false,
        };

        let opened =
            tokio::time::timeout(self.options.connect_timeout, self.open_all(&scope.handles)).await;
        let mut failures = match opened {
            Ok(failures) => failures,
            Err(_) => {
                warn!(timeout = ?self.options.connect_timeout, "provider connect timed out");
                scope.close().await;
                return Err(Error::ConnectTimeout(self.options.connect_timeout));
            }
        };

        if !failures.is_empty() {
            match self.options.failure_policy {
                FailurePolicy::Abort => {
                    let first = failures.remove(0);
                    scope.close().await;
                    return Err(Error::Connection {
                        provider: first.provider,
                        message: first.error.to_string(),
                    });
                }
                FailurePolicy::Degrade => {
                    for failure in &failures {
                        warn!(
                            provider = %failure.provider,
                            error = %failure.error,
                            "provider unavailable, continuing without it"
                        );
                    }
                }
            }
        }

        let mut builder = CatalogBuilder::new(self.options.collision_policy);
        let registered = scope
            .handles
            .iter()
            .filter(|handle| handle.state() == ConnectionState::Ready)
            .try_for_each(|handle| builder.register(handle));
        if let Err(e) = registered {
            scope.close().await;
            return Err(e);
        }

        scope.catalog = builder.build();
        scope.failures = failures;
        info!(
            providers = scope.handles.len() - scope.failures.len(),
            tools = scope.catalog.len(),
            "tool catalog ready"
        );
        Ok(scope)
    }

    /// Open every handle concurrently and collect the failures in
    /// configuration order. Under [`FailurePolicy::Abort`] the first failure
    /// drops the opens still in flight; their handles stay `Connecting` and
    /// are closed with the scope.
    async fn open_all(&self, handles: &[Arc<ConnectionHandle>]) -> Vec<ProviderFailure> {
        let retry = &self.options.retry;
        let mut pending: FuturesUnordered<_> = handles
            .iter()
            .enumerate()
            .map(|(index, handle)| async move {
                handle.open(retry).await.err().map(|error| {
                    let failure = ProviderFailure {
                        provider: handle.label().to_string(),
                        error,
                    };
                    (index, failure)
                })
            })
            .collect();

        let mut failures = Vec::new();
        while let Some(result) = pending.next().await {
            if let Some(failure) = result {
                failures.push(failure);
                if self.options.failure_policy == FailurePolicy::Abort {
                    break;
                }
            }
        }
        failures.sort_by_key(|(index, _)| *index);
        failures.into_iter().map(|(_, failure)| failure).collect()
    }

    /// Acquire a scope, run `body` with its catalog, then close the scope
    /// whether `body` succeeded or not.
    pub async fn scoped<F, Fut, T, E>(&self, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce(ToolCatalog) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<Error>,
    {
        let scope = self.connect().await?;
        let outcome = body(scope.catalog().clone()).await;
        scope.close().await;
        outcome
    }
}

/// Live connections plus the catalog built from them.
pub struct ConnectionScope {
    handles: Vec<Arc<ConnectionHandle>>,
    catalog: ToolCatalog,
    failures: Vec<ProviderFailure>,
    close_timeout: Duration,
    closed: bool,
}

impl ConnectionScope {
    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Providers skipped under [`FailurePolicy::Degrade`].
    pub fn failures(&self) -> &[ProviderFailure] {
        &self.failures
    }

    /// Label and state of every connection, in configuration order.
    pub fn connections(&self) -> Vec<(&str, ConnectionState)> {
        self.handles
            .iter()
            .map(|handle| (handle.label(), handle.state()))
            .collect()
    }

    /// Close every connection concurrently and wait for all of them.
    pub async fn close(mut self) {
        self.close_all().await;
    }

    async fn close_all(&mut self) {
        self.closed = true;
        let timeout = self.close_timeout;
        join_all(self.handles.iter().map(|handle| handle.close(timeout))).await;
    }
}

impl Drop for ConnectionScope {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let pending: Vec<Arc<ConnectionHandle>> = self
            .handles
            .iter()
            .filter(|handle| !handle.state().is_terminal())
            .cloned()
            .collect();
        if pending.is_empty() {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!(
                    connections = pending.len(),
                    "connection scope dropped without close, closing in background"
                );
                let timeout = self.close_timeout;
                runtime.spawn(async move {
                    join_all(pending.iter().map(|handle| handle.close(timeout))).await;
                });
            }
            Err(_) => {
                warn!(
                    connections = pending.len(),
                    "connection scope dropped outside a runtime, providers left open"
                );
            }
        }
    }
}
