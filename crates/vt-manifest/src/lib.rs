//! Web-manifest retrieval and rewriting into the shell's scoped namespace.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Map;
use serde_json::Value;
use tracing::debug;
use vt_core::ShellError;
use vt_core::ShellResult;
use vt_fragment::Fragment;
use vt_net::FetchedDocument;
use vt_net::HttpFetcher;
use vt_net::ShellUrl;

/// Retrieves a target's web manifest as a JSON object.
pub trait ManifestFetcher: Send + Sync {
    fn fetch_manifest(&self, url: &ShellUrl) -> ShellResult<Map<String, Value>>;
}

/// Manifest fetcher backed by the blocking HTTP client.
#[derive(Default)]
pub struct HttpManifestFetcher {
    fetcher: HttpFetcher,
}

impl HttpManifestFetcher {
    pub fn new(fetcher: HttpFetcher) -> Self {
        Self { fetcher }
    }
}

impl ManifestFetcher for HttpManifestFetcher {
    fn fetch_manifest(&self, url: &ShellUrl) -> ShellResult<Map<String, Value>> {
        let document = self.fetcher.get(url)?;
        manifest_from_response(url, &document)
    }
}

fn manifest_from_response(
    url: &ShellUrl,
    document: &FetchedDocument,
) -> ShellResult<Map<String, Value>> {
    if !(200..300).contains(&document.status) {
        return Err(ShellError::new(
            "manifest.fetch_status",
            format!(
                "manifest endpoint `{url}` answered with status {}",
                document.status
            ),
        ));
    }

    let parsed: Value = serde_json::from_slice(&document.body).map_err(|error| {
        ShellError::new(
            "manifest.parse_failed",
            format!("manifest at `{url}` is not valid JSON: {error}"),
        )
    })?;

    match parsed {
        Value::Object(manifest) => Ok(manifest),
        other => Err(ShellError::new(
            "manifest.not_object",
            format!(
                "manifest at `{url}` must be a JSON object, got {}",
                json_kind(&other)
            ),
        )),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Rewritten manifest plus its publishable `data:` URL form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenManifest {
    pub document: Map<String, Value>,
    pub data_href: String,
}

/// Rewrites target manifests so launched installs re-enter the shell.
pub struct ManifestRewriter {
    shell_base: ShellUrl,
}

impl ManifestRewriter {
    pub fn new(shell_base: ShellUrl) -> Self {
        Self { shell_base }
    }

    /// Validates a manifest against its target and moves it under the
    /// shell's scoped path.
    ///
    /// `scope` and `start_url` resolve against the target, missing or
    /// non-string members resolving to the target itself. Both must stay
    /// on the target's origin. The rewritten `start_url` carries the
    /// pinned address as its fragment so the install loads the same
    /// hash and target through the shell.
    pub fn rewrite(
        &self,
        mut document: Map<String, Value>,
        target: &ShellUrl,
        hash: &str,
        scope_path: &str,
    ) -> ShellResult<RewrittenManifest> {
        let declared_scope = resolve_member(&document, "scope", target)?;
        let declared_start = resolve_member(&document, "start_url", target)?;

        let target_origin = target.origin();
        if declared_scope.origin() != target_origin || declared_start.origin() != target_origin {
            return Err(ShellError::new(
                "manifest.origin_invalid",
                format!("manifest scope or start_url leaves origin `{target_origin}`"),
            ));
        }

        let shell_scope = self.shell_base.join(scope_path)?;
        let launch = Fragment::new(hash, declared_start.as_str());
        let shell_start = self
            .shell_base
            .join(&format!("{scope_path}{}", launch.encode()))?;

        document.insert(
            "scope".to_owned(),
            Value::String(shell_scope.as_str().to_owned()),
        );
        document.insert(
            "start_url".to_owned(),
            Value::String(shell_start.as_str().to_owned()),
        );
        absolutize_icons(&mut document, target);

        let serialized = serde_json::to_string(&document).map_err(|error| {
            ShellError::new(
                "manifest.serialize_failed",
                format!("failed to serialize rewritten manifest: {error}"),
            )
        })?;
        let data_href = format!("data:application/json;base64,{}", BASE64.encode(&serialized));

        debug!(
            target = %target,
            scope = %shell_scope,
            "rewrote manifest into shell scope"
        );

        Ok(RewrittenManifest {
            document,
            data_href,
        })
    }
}

fn resolve_member(
    document: &Map<String, Value>,
    name: &str,
    target: &ShellUrl,
) -> ShellResult<ShellUrl> {
    match document.get(name) {
        Some(Value::String(href)) => target.join(href),
        _ => Ok(target.clone()),
    }
}

fn absolutize_icons(document: &mut Map<String, Value>, target: &ShellUrl) {
    let icons = match document.get_mut("icons") {
        Some(Value::Array(entries)) => entries,
        _ => return,
    };

    for icon in icons {
        let entry = match icon.as_object_mut() {
            Some(value) => value,
            None => continue,
        };
        let src = match entry.get("src") {
            Some(Value::String(value)) => value.clone(),
            _ => continue,
        };

        // Srcs that do not resolve inside http(s), data URIs mostly, pass
        // through unchanged.
        if let Ok(absolute) = target.join(&src) {
            entry.insert(
                "src".to_owned(),
                Value::String(absolute.as_str().to_owned()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ManifestRewriter;
    use super::manifest_from_response;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use serde_json::Map;
    use serde_json::Value;
    use serde_json::json;
    use vt_net::FetchedDocument;
    use vt_net::ShellUrl;

    const HASH: &str = "LPJNul+wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ=";

    fn url(text: &str) -> ShellUrl {
        match ShellUrl::parse(text) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn rewriter() -> ManifestRewriter {
        ManifestRewriter::new(url("https://shell.example/"))
    }

    #[test]
    fn minimal_manifest_moves_into_shell_scope() {
        let target = url("https://app.example/deep/page?q=1");
        let rewritten = rewriter().rewrite(Map::new(), &target, HASH, "/x/abcdef0123456789");
        assert!(rewritten.is_ok());
        let rewritten = match rewritten {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };

        assert_eq!(
            rewritten.document.get("scope"),
            Some(&json!("https://shell.example/x/abcdef0123456789"))
        );
        assert_eq!(
            rewritten.document.get("start_url"),
            Some(&json!(format!(
                "https://shell.example/x/abcdef0123456789#{HASH}@https://app.example/deep/page?q=1"
            )))
        );
    }

    #[test]
    fn declared_members_resolve_against_the_target() {
        let target = url("https://app.example/pwa/index.html");
        let document = object(json!({
            "scope": "/pwa/",
            "start_url": "launch.html",
        }));

        let rewritten = rewriter().rewrite(document, &target, HASH, "/x/0011223344556677");
        assert!(rewritten.is_ok());
        if let Ok(rewritten) = rewritten {
            assert_eq!(
                rewritten.document.get("start_url"),
                Some(&json!(format!(
                    "https://shell.example/x/0011223344556677#{HASH}@https://app.example/pwa/launch.html"
                )))
            );
        }
    }

    #[test]
    fn cross_origin_scope_is_rejected() {
        let target = url("https://app.example/page");
        let document = object(json!({ "scope": "https://evil.example/" }));

        let rewritten = rewriter().rewrite(document, &target, HASH, "/x/aa");
        assert!(rewritten.is_err());
        if let Err(error) = rewritten {
            assert_eq!(error.code, "manifest.origin_invalid");
        }
    }

    #[test]
    fn cross_origin_start_url_is_rejected() {
        let target = url("https://app.example/page");
        let document = object(json!({ "start_url": "//evil.example/launch" }));

        let rewritten = rewriter().rewrite(document, &target, HASH, "/x/aa");
        assert!(rewritten.is_err());
        if let Err(error) = rewritten {
            assert_eq!(error.code, "manifest.origin_invalid");
        }
    }

    #[test]
    fn non_string_members_fall_back_to_the_target() {
        let target = url("https://app.example/page");
        let document = object(json!({ "scope": 7, "start_url": null }));

        let rewritten = rewriter().rewrite(document, &target, HASH, "/x/aa");
        assert!(rewritten.is_ok());
    }

    #[test]
    fn icons_absolutize_against_the_target() {
        let target = url("https://app.example/pwa/page");
        let document = object(json!({
            "icons": [
                { "src": "icon-192.png", "sizes": "192x192" },
                { "src": "data:image/png;base64,AAAA" },
                { "purpose": "maskable" },
                "junk",
            ],
        }));

        let rewritten = rewriter().rewrite(document, &target, HASH, "/x/aa");
        assert!(rewritten.is_ok());
        if let Ok(rewritten) = rewritten {
            assert_eq!(
                rewritten.document.get("icons"),
                Some(&json!([
                    { "src": "https://app.example/pwa/icon-192.png", "sizes": "192x192" },
                    { "src": "data:image/png;base64,AAAA" },
                    { "purpose": "maskable" },
                    "junk",
                ]))
            );
        }
    }

    #[test]
    fn unknown_fields_survive_the_rewrite() {
        let target = url("https://app.example/page");
        let document = object(json!({
            "name": "Example App",
            "theme_color": "#102030",
            "display": "standalone",
        }));

        let rewritten = rewriter().rewrite(document, &target, HASH, "/x/aa");
        assert!(rewritten.is_ok());
        if let Ok(rewritten) = rewritten {
            assert_eq!(rewritten.document.get("name"), Some(&json!("Example App")));
            assert_eq!(
                rewritten.document.get("theme_color"),
                Some(&json!("#102030"))
            );
            assert_eq!(
                rewritten.document.get("display"),
                Some(&json!("standalone"))
            );
        }
    }

    #[test]
    fn data_href_decodes_back_to_the_document() {
        let target = url("https://app.example/page");
        let rewritten = rewriter().rewrite(Map::new(), &target, HASH, "/x/aa");
        assert!(rewritten.is_ok());
        let rewritten = match rewritten {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };

        let payload = rewritten
            .data_href
            .strip_prefix("data:application/json;base64,");
        assert!(payload.is_some());
        let decoded = BASE64.decode(payload.unwrap_or_default());
        assert!(decoded.is_ok());
        let parsed: Result<Value, _> = serde_json::from_slice(&decoded.unwrap_or_default());
        assert_eq!(parsed.ok(), Some(Value::Object(rewritten.document)));
    }

    #[test]
    fn fetch_gate_rejects_non_success_status() {
        let target = url("https://app.example/manifest.json");
        let response = FetchedDocument {
            status: 404,
            content_type: "text/plain".to_owned(),
            body: b"not here".to_vec(),
        };

        let manifest = manifest_from_response(&target, &response);
        assert!(manifest.is_err());
        if let Err(error) = manifest {
            assert_eq!(error.code, "manifest.fetch_status");
        }
    }

    #[test]
    fn fetch_gate_rejects_non_object_payloads() {
        let target = url("https://app.example/manifest.json");
        let response = FetchedDocument {
            status: 200,
            content_type: "application/manifest+json".to_owned(),
            body: b"[1, 2, 3]".to_vec(),
        };

        let manifest = manifest_from_response(&target, &response);
        assert!(manifest.is_err());
        if let Err(error) = manifest {
            assert_eq!(error.code, "manifest.not_object");
        }
    }

    #[test]
    fn fetch_gate_reports_invalid_json() {
        let target = url("https://app.example/manifest.json");
        let response = FetchedDocument {
            status: 200,
            content_type: "application/manifest+json".to_owned(),
            body: b"{ not json".to_vec(),
        };

        let manifest = manifest_from_response(&target, &response);
        assert!(manifest.is_err());
        if let Err(error) = manifest {
            assert_eq!(error.code, "manifest.parse_failed");
        }
    }
}
