//! Command execution against a wired shell.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;
use serde_json::json;
use tracing::debug;
use vt_cache::AssetCache;
use vt_cache::AssetList;
use vt_cache::CacheWorker;
use vt_cache::FetchDecision;
use vt_cache::RouteRules;
use vt_core::KeyValueStore;
use vt_core::MemoryStore;
use vt_core::ShellError;
use vt_core::ShellResult;
use vt_core::SystemDigest;
use vt_fragment::Fragment;
use vt_manifest::HttpManifestFetcher;
use vt_net::HttpFetcher;
use vt_net::ShellUrl;
use vt_net::TrustStoreMode;
use vt_rpc::MethodHandler;
use vt_rpc::PortConfig;
use vt_rpc::REQUEST_SUPERSEDED_CODE;
use vt_rpc::RequestIdSource;
use vt_rpc::RouteOutcome;
use vt_rpc::RpcRequest;
use vt_rpc::RpcRouter;
use vt_rpc::local_port_pair;
use vt_scope::SCOPE_ROUTE_PREFIX;
use vt_scope::ScopeMode;
use vt_scope::scoped_path;
use vt_shell::SegmentMode;
use vt_shell::Shell;
use vt_shell::ShellConfig;
use vt_storage::ProfileStore;

use super::startup::Command;
use super::startup::Invocation;
use super::startup::Options;

const DATA_HREF_PREFIX: &str = "data:application/json;base64,";
const DEMO_STEP_TIMEOUT: Duration = Duration::from_secs(20);
const TRANSCRIPT_PREVIEW_CHARS: usize = 200;

pub(crate) fn dispatch(invocation: &Invocation) -> ShellResult<()> {
    match &invocation.command {
        Command::Embed { address } => run_embed(&invocation.options, address),
        Command::Recall { reference } => run_recall(&invocation.options, reference),
        Command::Manifest { address, endpoint } => {
            run_manifest(&invocation.options, address, endpoint)
        }
        Command::Assets { dir } => run_assets(&invocation.options, dir),
        Command::Route { path } => run_route(&invocation.options, path),
        Command::RpcDemo { address } => run_rpc_demo(&invocation.options, address),
    }
}

fn build_shell(options: &Options) -> ShellResult<Shell> {
    let shell_base = ShellUrl::parse(&options.shell_base)?;
    let mut config = ShellConfig::new(shell_base);
    if options.ephemeral {
        config.segment_mode = SegmentMode::Ephemeral;
    }
    if options.public_scope {
        config.scope.mode = ScopeMode::Public;
    }
    if let Some(width) = options.token_chars {
        config.scope.token_hex_chars = width;
    }

    let store = open_store(options)?;
    let fetcher =
        HttpManifestFetcher::new(HttpFetcher::with_trust_store(trust_store_mode(options)));
    Shell::new(config, store, Box::new(fetcher))
}

fn open_store(options: &Options) -> ShellResult<Arc<dyn KeyValueStore>> {
    if options.ephemeral {
        return Ok(Arc::new(MemoryStore::new()));
    }

    let root = storage_root(options);
    debug!(root = %root.display(), "opening profile store");
    Ok(Arc::new(ProfileStore::open(root)?))
}

fn storage_root(options: &Options) -> PathBuf {
    if let Some(dir) = &options.storage_dir {
        return dir.clone();
    }

    match std::env::var_os("VITRINE_STATE_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".vitrine"),
    }
}

fn trust_store_mode(options: &Options) -> TrustStoreMode {
    if options.trust_os_roots {
        TrustStoreMode::WebPkiAndOs
    } else {
        TrustStoreMode::WebPkiOnly
    }
}

fn run_embed(options: &Options, address: &str) -> ShellResult<()> {
    let shell = build_shell(options)?;
    let view = shell.prepare_embed(&Fragment::parse(address))?;

    println!("target       {}", view.target);
    println!("origin       {}", view.target_origin);
    println!("policy       {}", view.policy);
    println!("scope token  {}", view.token);
    println!("scoped path  {}", view.scoped_path);
    Ok(())
}

fn run_recall(options: &Options, reference: &str) -> ShellResult<()> {
    let shell = build_shell(options)?;
    let path = normalize_scope_reference(reference);

    match shell.resolve_scoped_path(&path)? {
        Some(fragment) => {
            println!("address  {}", fragment.encode());
            println!("hash     {}", fragment.hash);
            println!("target   {}", fragment.href);
        }
        None => println!("nothing stored under {path}"),
    }
    Ok(())
}

/// Accepts both the routed form (`/x/<token>`) and a bare token.
fn normalize_scope_reference(reference: &str) -> String {
    if reference.starts_with(SCOPE_ROUTE_PREFIX) {
        reference.to_owned()
    } else {
        scoped_path(reference)
    }
}

fn run_manifest(options: &Options, address: &str, endpoint: &str) -> ShellResult<()> {
    let shell = build_shell(options)?;
    let fragment = Fragment::parse(address);
    let (mut host, _feed) = shell.open_session(&fragment, "/")?;

    let href = match host.handle("manifest_set", &json!([endpoint])) {
        Ok(value) => value,
        Err(error) if error.code == REQUEST_SUPERSEDED_CODE => {
            let canonical = match host.take_pending_redirect() {
                Some(path) => path,
                None => host.view().scoped_path.clone(),
            };
            println!("replace-navigating to {canonical}");
            let (mut retried, _feed) = shell.open_session(&fragment, canonical)?;
            retried.handle("manifest_set", &json!([endpoint]))?
        }
        Err(error) => return Err(error),
    };

    let href_text = match &href {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    println!("{}", render_manifest_document(&href_text)?);
    println!();
    println!("{href_text}");
    Ok(())
}

fn render_manifest_document(href: &str) -> ShellResult<String> {
    let payload = href.strip_prefix(DATA_HREF_PREFIX).ok_or_else(|| {
        ShellError::new(
            "app.manifest_href_invalid",
            format!("expected a {DATA_HREF_PREFIX} URL, got `{href}`"),
        )
    })?;

    let decoded = BASE64.decode(payload).map_err(|error| {
        ShellError::new(
            "app.manifest_href_invalid",
            format!("manifest data URL payload is not base64: {error}"),
        )
    })?;
    let document: Value = serde_json::from_slice(&decoded).map_err(|error| {
        ShellError::new(
            "app.manifest_href_invalid",
            format!("manifest data URL payload is not JSON: {error}"),
        )
    })?;

    serde_json::to_string_pretty(&document).map_err(|error| {
        ShellError::new(
            "app.manifest_render_failed",
            format!("failed to render manifest document: {error}"),
        )
    })
}

fn run_assets(options: &Options, dir: &Path) -> ShellResult<()> {
    let list = AssetList::from_dir(dir, &SystemDigest)?;
    println!("list version {}", list.version);

    let mut worker = open_worker(options)?;
    worker.install(list);
    let report = worker.activate()?;
    println!(
        "stored {} assets, evicted {} stale paths",
        report.stored, report.evicted
    );
    for path in worker.cache().keys()? {
        println!("  {path}");
    }
    Ok(())
}

fn open_worker(options: &Options) -> ShellResult<CacheWorker> {
    let cache = AssetCache::open(storage_root(options).join("cache"))?;
    CacheWorker::new(cache, default_route_rules(options)?)
}

fn default_route_rules(options: &Options) -> ShellResult<RouteRules> {
    Ok(ShellConfig::new(ShellUrl::parse(&options.shell_base)?).routes)
}

fn run_route(options: &Options, path: &str) -> ShellResult<()> {
    let mut worker = open_worker(options)?;
    if let Some(dir) = &options.assets_dir {
        worker.install(AssetList::from_dir(dir, &SystemDigest)?);
        worker.activate()?;
    }

    match worker.handle_request(path)? {
        FetchDecision::NotIntercepted => {
            println!("not intercepted: {path} goes to the network");
        }
        FetchDecision::RewriteManifest => {
            println!("manifest endpoint: answered by the rewrite pipeline");
        }
        FetchDecision::FromCache(asset) => {
            println!(
                "cache hit: {} ({}, {} bytes)",
                asset.path,
                asset.content_type,
                asset.body.len()
            );
        }
        FetchDecision::Fallthrough => {
            println!("fallthrough: no cached document answers {path}");
        }
    }
    Ok(())
}

/// Drives a scripted page conversation through the real port pair and
/// router, printing both sides of the wire.
fn run_rpc_demo(options: &Options, address: &str) -> ShellResult<()> {
    let shell = build_shell(options)?;
    let fragment = Fragment::parse(address);
    let view = shell.prepare_embed(&fragment)?;
    let page_origin = view.target_origin.as_str().to_owned();
    let shell_origin = shell.config().shell_base.origin();

    let (host, feed) = shell.open_session(&fragment, view.scoped_path.clone())?;
    let (page_port, shell_port) = local_port_pair(
        PortConfig::hardened(page_origin.clone())?,
        PortConfig::hardened(shell_origin.as_str())?,
    )?;
    let mut router = RpcRouter::new(shell_port, page_origin, host);

    println!(
        "session for {} (frame origin {})",
        view.target, view.target_origin
    );

    let script = [
        ("knock_knock", json!([])),
        ("csp_get", json!([])),
        ("frame_show", json!([])),
        ("manifest_set", json!(["/manifest.json"])),
        ("hash_set", json!([view.fragment.hash.clone()])),
    ];
    let mut ids = RequestIdSource::new();
    for (method, params) in &script {
        let request = RpcRequest {
            id: ids.next(),
            method: (*method).to_owned(),
            params: params.clone(),
        };
        let body = serde_json::to_string(&request).map_err(|error| {
            ShellError::new(
                "app.demo_encode_failed",
                format!("failed to encode demo request: {error}"),
            )
        })?;
        println!(">> {body}");
        page_port.post(&body, shell_origin.as_str())?;

        match router.pump(DEMO_STEP_TIMEOUT)? {
            RouteOutcome::Replied => {
                let reply = page_port.recv_timeout(DEMO_STEP_TIMEOUT)?;
                println!("<< {}", preview(&reply.body));
            }
            outcome => println!("-- no reply ({outcome:?})"),
        }
    }

    while let Some(next) = feed.try_next() {
        println!("navigation requested: {}", next.encode());
    }

    Ok(())
}

fn preview(text: &str) -> String {
    if text.chars().count() <= TRANSCRIPT_PREVIEW_CHARS {
        return text.to_owned();
    }

    let prefix: String = text.chars().take(TRANSCRIPT_PREVIEW_CHARS).collect();
    format!("{prefix}... ({} bytes total)", text.len())
}
