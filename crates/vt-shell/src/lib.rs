//! Shell orchestration: embed planning, frame sessions, and the RPC surface.

use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use serde_json::Value;
use serde_json::json;
use tracing::debug;
use vt_cache::RouteRules;
use vt_core::DigestSource;
use vt_core::KeyValueStore;
use vt_core::ShellError;
use vt_core::ShellResult;
use vt_core::SystemDigest;
use vt_core::SystemTokenSource;
use vt_core::TokenSource;
use vt_fragment::Fragment;
use vt_manifest::ManifestFetcher;
use vt_manifest::ManifestRewriter;
use vt_net::Origin;
use vt_net::ShellUrl;
use vt_policy::CspPolicy;
use vt_policy::IntegrityHash;
use vt_policy::PolicyEngine;
use vt_policy::PolicyState;
use vt_rpc::METHOD_NOT_FOUND_CODE;
use vt_rpc::MethodHandler;
use vt_rpc::REQUEST_SUPERSEDED_CODE;
use vt_scope::SCOPE_ROUTE_PREFIX;
use vt_scope::ScopeConfig;
use vt_scope::ScopeResolver;
use vt_scope::ScopeToken;
use vt_scope::scoped_path;
use vt_scope::token_from_path;

/// Fixed string a frame can ask for to confirm it runs inside the shell.
pub const IDENTIFICATION: &str = "vitrine";

/// How manifest scope segments are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentMode {
    /// Reuse the scope token. The mapping persists and the session is
    /// replace-navigated onto its canonical scoped path before anything
    /// publishes.
    Resolved,
    /// Fresh random segment per publication; nothing persists.
    Ephemeral,
}

/// Deployment configuration for one shell origin.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    pub shell_base: ShellUrl,
    pub scope: ScopeConfig,
    pub routes: RouteRules,
    pub segment_mode: SegmentMode,
}

impl ShellConfig {
    pub fn new(shell_base: ShellUrl) -> Self {
        Self {
            shell_base,
            scope: ScopeConfig::default(),
            routes: RouteRules::new(SCOPE_ROUTE_PREFIX, "/manifest.json", Vec::new()),
            segment_mode: SegmentMode::Resolved,
        }
    }

    pub fn validate(&self) -> ShellResult<()> {
        self.scope.validate()?;
        self.routes.validate()
    }
}

/// Everything the host page needs to mount one pinned frame.
#[derive(Debug, Clone)]
pub struct EmbedView {
    pub fragment: Fragment,
    pub target: ShellUrl,
    pub target_origin: Origin,
    pub token: ScopeToken,
    pub scoped_path: String,
    pub policy: CspPolicy,
}

/// Owns the scope resolver and manifest pipeline for one shell origin.
pub struct Shell {
    config: ShellConfig,
    resolver: ScopeResolver,
    fetcher: Box<dyn ManifestFetcher>,
    rewriter: ManifestRewriter,
}

impl Shell {
    /// Wires the shell with the process capabilities.
    pub fn new(
        config: ShellConfig,
        store: Arc<dyn KeyValueStore>,
        fetcher: Box<dyn ManifestFetcher>,
    ) -> ShellResult<Self> {
        Self::with_capabilities(
            config,
            Box::new(SystemDigest),
            Box::new(SystemTokenSource),
            store,
            fetcher,
        )
    }

    pub fn with_capabilities(
        config: ShellConfig,
        digest: Box<dyn DigestSource>,
        tokens: Box<dyn TokenSource>,
        store: Arc<dyn KeyValueStore>,
        fetcher: Box<dyn ManifestFetcher>,
    ) -> ShellResult<Self> {
        config.validate()?;
        let resolver = ScopeResolver::new(config.scope.clone(), digest, tokens, store)?;
        let rewriter = ManifestRewriter::new(config.shell_base.clone());

        Ok(Self {
            config,
            resolver,
            fetcher,
            rewriter,
        })
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    pub fn resolver(&self) -> &ScopeResolver {
        &self.resolver
    }

    /// Plans the embed for a parsed address fragment.
    ///
    /// Validates the target, derives the scope token, persists the
    /// token → fragment mapping, and computes the frame policy.
    pub fn prepare_embed(&self, fragment: &Fragment) -> ShellResult<EmbedView> {
        if !fragment.has_target() {
            return Err(ShellError::new(
                "shell.address_incomplete",
                "address fragment names no target to embed",
            ));
        }

        let target = ShellUrl::parse(&fragment.href)?;
        let token = self.resolver.derive_token(&fragment.hash, target.as_str())?;
        self.resolver
            .remember_fragment(&token, &fragment.to_string())?;

        let policy = CspPolicy::script_src_for(&IntegrityHash::new(fragment.hash.clone()));
        debug!(target = %target, token = %token, "prepared embed");

        Ok(EmbedView {
            fragment: fragment.clone(),
            target_origin: target.origin(),
            target,
            scoped_path: scoped_path(token.as_str()),
            token,
            policy,
        })
    }

    /// Resolves a direct `/x/<token>` visit back to its pinned address.
    pub fn resolve_scoped_path(&self, path: &str) -> ShellResult<Option<Fragment>> {
        let token = match token_from_path(path) {
            Some(token) => token,
            None => return Ok(None),
        };

        let payload = self.resolver.recall_fragment(&token)?;
        Ok(payload.map(|text| Fragment::parse(&text)))
    }

    /// Starts a frame session for `fragment` with the browser currently at
    /// `active_path`. The feed carries renavigation requests; each one ends
    /// this session and seeds the next.
    pub fn open_session(
        &self,
        fragment: &Fragment,
        active_path: impl Into<String>,
    ) -> ShellResult<(FrameHost<'_>, NavigationFeed)> {
        let view = self.prepare_embed(fragment)?;

        let mut engine = PolicyEngine::new();
        engine.apply_hash(&IntegrityHash::new(view.fragment.hash.clone()));

        let (nav, receiver) = mpsc::channel();
        Ok((
            FrameHost {
                shell: self,
                view,
                engine,
                hidden: true,
                manifest_href: None,
                active_path: active_path.into(),
                pending_redirect: None,
                nav,
            },
            NavigationFeed { receiver },
        ))
    }
}

/// Receiver half of a session's renavigation stream.
pub struct NavigationFeed {
    receiver: mpsc::Receiver<Fragment>,
}

impl NavigationFeed {
    /// Next requested address, if one arrives within `timeout`.
    pub fn next_within(&self, timeout: Duration) -> Option<Fragment> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Next requested address without waiting.
    pub fn try_next(&self) -> Option<Fragment> {
        self.receiver.try_recv().ok()
    }
}

/// Per-session frame state and the RPC method surface.
///
/// Frames start hidden; the embedded page reveals itself with `frame_show`
/// once it has verified the shell through `knock_knock`.
pub struct FrameHost<'a> {
    shell: &'a Shell,
    view: EmbedView,
    engine: PolicyEngine,
    hidden: bool,
    manifest_href: Option<String>,
    active_path: String,
    pending_redirect: Option<String>,
    nav: mpsc::Sender<Fragment>,
}

impl FrameHost<'_> {
    pub fn view(&self) -> &EmbedView {
        &self.view
    }

    pub fn hidden(&self) -> bool {
        self.hidden
    }

    pub fn policy(&self) -> Option<&CspPolicy> {
        self.engine.policy()
    }

    pub fn policy_state(&self) -> PolicyState {
        self.engine.state()
    }

    pub fn manifest_href(&self) -> Option<&str> {
        self.manifest_href.as_deref()
    }

    pub fn active_path(&self) -> &str {
        &self.active_path
    }

    /// Path the outer loop must replace-navigate to before retrying, if a
    /// manifest publication was parked on it.
    pub fn take_pending_redirect(&mut self) -> Option<String> {
        self.pending_redirect.take()
    }

    fn csp_get(&self) -> Value {
        match self.engine.policy() {
            Some(policy) => json!(policy.as_str()),
            None => Value::Null,
        }
    }

    fn csp_set(&mut self, params: &Value) -> ShellResult<Value> {
        let policy = single_string_param(params, "csp_set")?;
        self.engine.apply_override(policy)?;
        Ok(Value::Null)
    }

    fn request_navigation(&self, fragment: Fragment) -> ShellResult<Value> {
        self.nav
            .send(fragment)
            .map_err(|_| ShellError::new("shell.navigation_closed", "navigation feed is closed"))?;
        Ok(Value::Null)
    }

    fn manifest_set(&mut self, params: &Value) -> ShellResult<Value> {
        let endpoint = single_string_param(params, "manifest_set")?;
        let manifest_url = self.view.target.join(&endpoint)?;
        let document = self.shell.fetcher.fetch_manifest(&manifest_url)?;

        let segment = match self.shell.config.segment_mode {
            SegmentMode::Resolved => {
                if self.active_path != self.view.scoped_path {
                    self.shell
                        .resolver
                        .remember_fragment(&self.view.token, &self.view.fragment.to_string())?;
                    self.pending_redirect = Some(self.view.scoped_path.clone());
                    return Err(ShellError::new(
                        REQUEST_SUPERSEDED_CODE,
                        "session must move to its scoped path before the manifest publishes",
                    ));
                }
                self.view.token.as_str().to_owned()
            }
            SegmentMode::Ephemeral => self.shell.resolver.ephemeral_segment(),
        };

        let rewritten = self.shell.rewriter.rewrite(
            document,
            &self.view.target,
            &self.view.fragment.hash,
            &scoped_path(&segment),
        )?;

        debug!(target = %self.view.target, "published rewritten manifest");
        self.manifest_href = Some(rewritten.data_href.clone());
        Ok(json!(rewritten.data_href))
    }
}

impl MethodHandler for FrameHost<'_> {
    fn handle(&mut self, method: &str, params: &Value) -> ShellResult<Value> {
        match method {
            "knock_knock" => Ok(json!(IDENTIFICATION)),
            "csp_get" => Ok(self.csp_get()),
            "csp_set" => self.csp_set(params),
            "frame_show" => {
                self.hidden = false;
                Ok(Value::Null)
            }
            "frame_hide" | "html_show" => {
                self.hidden = true;
                Ok(Value::Null)
            }
            "href_set" => {
                let href = single_string_param(params, "href_set")?;
                self.request_navigation(self.view.fragment.with_href(href))
            }
            "hash_set" => {
                let hash = single_string_param(params, "hash_set")?;
                self.request_navigation(self.view.fragment.with_hash(hash))
            }
            "manifest_set" => self.manifest_set(params),
            _ => Err(ShellError::new(
                METHOD_NOT_FOUND_CODE,
                format!("no such method `{method}`"),
            )),
        }
    }
}

fn single_string_param(params: &Value, method: &str) -> ShellResult<String> {
    let value = match params {
        Value::Array(items) if items.len() == 1 => &items[0],
        _ => {
            return Err(ShellError::new(
                "rpc.params_invalid",
                format!("`{method}` expects exactly one string parameter"),
            ));
        }
    };

    match value {
        Value::String(text) => Ok(text.clone()),
        _ => Err(ShellError::new(
            "rpc.params_invalid",
            format!("`{method}` expects exactly one string parameter"),
        )),
    }
}
