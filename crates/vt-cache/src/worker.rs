//! Install/activate lifecycle and request routing for the shell origin.

use tracing::debug;
use vt_core::ShellError;
use vt_core::ShellResult;

use crate::assets::AssetList;
use crate::store::ActivationReport;
use crate::store::AssetCache;
use crate::store::CachedAsset;

/// Lifecycle of the caching worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Installed,
    Active,
}

/// How a request for a shell-origin path is served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchDecision {
    /// Scoped app paths and dynamic endpoints go straight to the network.
    NotIntercepted,
    /// The manifest endpoint is answered by the rewrite pipeline.
    RewriteManifest,
    /// Served from the asset cache.
    FromCache(CachedAsset),
    /// Unknown path with no cached root document.
    Fallthrough,
}

/// Paths the static cache must never answer itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRules {
    pub scope_prefix: String,
    pub manifest_endpoint: String,
    pub dynamic_prefixes: Vec<String>,
}

impl RouteRules {
    pub fn new(
        scope_prefix: impl Into<String>,
        manifest_endpoint: impl Into<String>,
        dynamic_prefixes: Vec<String>,
    ) -> Self {
        Self {
            scope_prefix: scope_prefix.into(),
            manifest_endpoint: manifest_endpoint.into(),
            dynamic_prefixes,
        }
    }

    pub fn validate(&self) -> ShellResult<()> {
        if !self.scope_prefix.starts_with('/') || !self.scope_prefix.ends_with('/') {
            return Err(ShellError::new(
                "cache.scope_prefix_invalid",
                format!(
                    "scope prefix `{}` must start and end with `/`",
                    self.scope_prefix
                ),
            ));
        }

        if !self.manifest_endpoint.starts_with('/') {
            return Err(ShellError::new(
                "cache.manifest_endpoint_invalid",
                format!(
                    "manifest endpoint `{}` must start with `/`",
                    self.manifest_endpoint
                ),
            ));
        }

        for prefix in &self.dynamic_prefixes {
            if !prefix.starts_with('/') {
                return Err(ShellError::new(
                    "cache.dynamic_prefix_invalid",
                    format!("dynamic prefix `{prefix}` must start with `/`"),
                ));
            }
        }

        Ok(())
    }
}

/// Content cache driven through the install/activate lifecycle.
pub struct CacheWorker {
    state: WorkerState,
    pending: Option<AssetList>,
    cache: AssetCache,
    rules: RouteRules,
}

impl CacheWorker {
    /// Wraps an opened cache. A cache that already holds an activated list
    /// resumes routing immediately.
    pub fn new(cache: AssetCache, rules: RouteRules) -> ShellResult<Self> {
        rules.validate()?;
        let state = if cache.active_version()?.is_some() {
            WorkerState::Active
        } else {
            WorkerState::Idle
        };

        Ok(Self {
            state,
            pending: None,
            cache,
            rules,
        })
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn cache(&self) -> &AssetCache {
        &self.cache
    }

    /// Stages a list for activation. A newer install replaces any staged
    /// list immediately; nothing waits on the superseded version.
    pub fn install(&mut self, list: AssetList) {
        debug!(version = %list.version, "staged asset list");
        self.pending = Some(list);
        self.state = WorkerState::Installed;
    }

    /// Applies the staged list to the cache.
    pub fn activate(&mut self) -> ShellResult<ActivationReport> {
        let list = self.pending.take().ok_or_else(|| {
            ShellError::new("cache.nothing_staged", "no staged asset list to activate")
        })?;

        let report = self.cache.activate(&list)?;
        self.state = WorkerState::Active;
        Ok(report)
    }

    /// Routes one request path. Until the worker has activated a list the
    /// cache answers nothing and every path goes to the network.
    pub fn handle_request(&self, path: &str) -> ShellResult<FetchDecision> {
        if self.state != WorkerState::Active {
            return Ok(FetchDecision::NotIntercepted);
        }

        let dynamic = self
            .rules
            .dynamic_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()));
        if dynamic || path.starts_with(&self.rules.scope_prefix) {
            return Ok(FetchDecision::NotIntercepted);
        }

        if path == self.rules.manifest_endpoint {
            return Ok(FetchDecision::RewriteManifest);
        }

        if let Some(asset) = self.cache.lookup(path)? {
            return Ok(FetchDecision::FromCache(asset));
        }

        if let Some(root) = self.cache.lookup("/")? {
            return Ok(FetchDecision::FromCache(root));
        }

        Ok(FetchDecision::Fallthrough)
    }
}
