//! Asset lists built from a static build directory.

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use vt_core::DigestSource;
use vt_core::ShellError;
use vt_core::ShellResult;
use vt_core::encode_hex;

const VERSION_HEX_CHARS: usize = 16;

/// One precachable document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetEntry {
    pub path: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

/// Versioned set of assets served for the shell origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetList {
    pub version: String,
    pub entries: Vec<AssetEntry>,
}

impl AssetList {
    pub fn new(entries: Vec<AssetEntry>, digest: &dyn DigestSource) -> Self {
        let version = list_version(&entries, digest);
        Self { version, entries }
    }

    /// Builds the list from a build output directory. Files are walked in
    /// sorted order, the top-level `index.html` becomes the canonical `/`
    /// document, and content types follow file extensions.
    pub fn from_dir(dir: impl AsRef<Path>, digest: &dyn DigestSource) -> ShellResult<Self> {
        let dir = dir.as_ref();
        let mut entries = Vec::new();
        walk_dir(dir, dir, &mut entries)?;
        Ok(Self::new(entries, digest))
    }

    pub fn paths(&self) -> Vec<&str> {
        self.entries
            .iter()
            .map(|entry| entry.path.as_str())
            .collect()
    }

    pub fn lookup(&self, path: &str) -> Option<&AssetEntry> {
        self.entries.iter().find(|entry| entry.path == path)
    }
}

fn list_version(entries: &[AssetEntry], digest: &dyn DigestSource) -> String {
    let mut material = Vec::new();
    for entry in entries {
        // Paths cannot contain NUL and bodies are length-prefixed, so
        // entries cannot bleed into each other.
        material.extend_from_slice(entry.path.as_bytes());
        material.push(0);
        material.extend_from_slice(&(entry.body.len() as u64).to_be_bytes());
        material.extend_from_slice(&entry.body);
    }

    let mut version = encode_hex(&digest.sha256(&material));
    version.truncate(VERSION_HEX_CHARS);
    version
}

fn walk_dir(root: &Path, dir: &Path, entries: &mut Vec<AssetEntry>) -> ShellResult<()> {
    let listing = fs::read_dir(dir).map_err(|error| {
        ShellError::new(
            "cache.dir_read_failed",
            format!("failed to read asset directory `{}`: {error}", dir.display()),
        )
    })?;

    let mut children: Vec<PathBuf> = Vec::new();
    for item in listing {
        let item = item.map_err(|error| {
            ShellError::new(
                "cache.dir_read_failed",
                format!("failed to list entry under `{}`: {error}", dir.display()),
            )
        })?;
        children.push(item.path());
    }
    children.sort();

    for child in children {
        if child.is_dir() {
            walk_dir(root, &child, entries)?;
            continue;
        }

        let relative = relative_asset_path(root, &child)?;
        let content_type = content_type_for(&relative).to_owned();
        let path = if relative == "index.html" {
            "/".to_owned()
        } else {
            format!("/{relative}")
        };

        let body = fs::read(&child).map_err(|error| {
            ShellError::new(
                "cache.asset_read_failed",
                format!("failed to read asset `{}`: {error}", child.display()),
            )
        })?;

        entries.push(AssetEntry {
            path,
            content_type,
            body,
        });
    }

    Ok(())
}

fn relative_asset_path(root: &Path, file: &Path) -> ShellResult<String> {
    let relative = file.strip_prefix(root).map_err(|error| {
        ShellError::new(
            "cache.path_outside_root",
            format!("asset `{}` escapes its root: {error}", file.display()),
        )
    })?;

    let mut parts = Vec::new();
    for component in relative.components() {
        let text = component.as_os_str().to_str().ok_or_else(|| {
            ShellError::new(
                "cache.path_not_unicode",
                format!("asset path `{}` is not valid Unicode", file.display()),
            )
        })?;
        parts.push(text);
    }

    Ok(parts.join("/"))
}

fn content_type_for(path: &str) -> &'static str {
    let extension = path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or_default();
    match extension.to_ascii_lowercase().as_str() {
        "html" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "text/javascript",
        "json" => "application/json",
        "webmanifest" => "application/manifest+json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "txt" => "text/plain",
        "wasm" => "application/wasm",
        "woff2" => "font/woff2",
        _ => "application/octet-stream",
    }
}
