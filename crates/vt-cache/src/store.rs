//! File-backed asset store with a hex-TSV index.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::MutexGuard;

use tracing::debug;
use vt_core::ShellError;
use vt_core::ShellResult;
use vt_core::decode_hex;
use vt_core::encode_hex;

use crate::assets::AssetList;

/// Asset served out of the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedAsset {
    pub path: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

/// Counts reported by one activation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationReport {
    pub evicted: usize,
    pub stored: usize,
}

/// File-backed content cache for one shell origin.
///
/// The index holds `hex(path)\thex(content type)\thex(version)` rows and
/// bodies live under `assets/` in hex-named files, one per path.
#[derive(Debug)]
pub struct AssetCache {
    index_path: PathBuf,
    assets_dir: PathBuf,
    guard: Mutex<()>,
}

struct IndexRow {
    content_type: String,
    version: String,
}

impl AssetCache {
    /// Opens the cache under `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> ShellResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|error| {
            ShellError::new(
                "cache.root_create_failed",
                format!("failed to create cache root `{}`: {error}", root.display()),
            )
        })?;

        Ok(Self {
            index_path: root.join("assets.idx"),
            assets_dir: root.join("assets"),
            guard: Mutex::new(()),
        })
    }

    /// Sorted paths currently cached.
    pub fn keys(&self) -> ShellResult<Vec<String>> {
        let _guard = self.locked()?;
        let index = self.read_index()?;
        Ok(index.into_keys().collect())
    }

    /// Version of the active list, when one is cached.
    pub fn active_version(&self) -> ShellResult<Option<String>> {
        let _guard = self.locked()?;
        let index = self.read_index()?;
        Ok(index.into_values().next().map(|row| row.version))
    }

    pub fn lookup(&self, path: &str) -> ShellResult<Option<CachedAsset>> {
        let _guard = self.locked()?;
        let index = self.read_index()?;
        let row = match index.get(path) {
            Some(row) => row,
            None => return Ok(None),
        };

        let body_path = self.body_path(path);
        let body = fs::read(&body_path).map_err(|error| {
            ShellError::new(
                "cache.body_read_failed",
                format!(
                    "failed to read cached body `{}`: {error}",
                    body_path.display()
                ),
            )
        })?;

        Ok(Some(CachedAsset {
            path: path.to_owned(),
            content_type: row.content_type.clone(),
            body,
        }))
    }

    /// Applies `list`: evicts every cached path the list no longer names,
    /// then stores every entry. Afterwards the cached key set equals the
    /// list's key set exactly.
    pub fn activate(&self, list: &AssetList) -> ShellResult<ActivationReport> {
        let _guard = self.locked()?;
        let existing = self.read_index()?;

        let mut evicted = 0_usize;
        for path in existing.keys() {
            if list.lookup(path).is_some() {
                continue;
            }

            let body_path = self.body_path(path);
            if body_path.exists() {
                fs::remove_file(&body_path).map_err(|error| {
                    ShellError::new(
                        "cache.evict_failed",
                        format!("failed to evict `{}`: {error}", body_path.display()),
                    )
                })?;
            }
            evicted += 1;
        }

        fs::create_dir_all(&self.assets_dir).map_err(|error| {
            ShellError::new(
                "cache.dir_create_failed",
                format!(
                    "failed to create asset directory `{}`: {error}",
                    self.assets_dir.display()
                ),
            )
        })?;

        let mut rows = BTreeMap::new();
        for entry in &list.entries {
            let body_path = self.body_path(&entry.path);
            fs::write(&body_path, &entry.body).map_err(|error| {
                ShellError::new(
                    "cache.body_write_failed",
                    format!("failed to store `{}`: {error}", body_path.display()),
                )
            })?;

            rows.insert(
                entry.path.clone(),
                IndexRow {
                    content_type: entry.content_type.clone(),
                    version: list.version.clone(),
                },
            );
        }

        self.write_index(&rows)?;
        debug!(
            version = %list.version,
            stored = rows.len(),
            evicted,
            "activated asset list"
        );

        Ok(ActivationReport {
            evicted,
            stored: rows.len(),
        })
    }

    fn body_path(&self, path: &str) -> PathBuf {
        self.assets_dir.join(encode_hex(path.as_bytes()))
    }

    fn locked(&self) -> ShellResult<MutexGuard<'_, ()>> {
        self.guard
            .lock()
            .map_err(|_| ShellError::new("cache.lock_poisoned", "asset cache lock poisoned"))
    }

    fn read_index(&self) -> ShellResult<BTreeMap<String, IndexRow>> {
        if !self.index_path.exists() {
            return Ok(BTreeMap::new());
        }

        let content = fs::read_to_string(&self.index_path).map_err(|error| {
            ShellError::new(
                "cache.index_read_failed",
                format!(
                    "failed to read cache index `{}`: {error}",
                    self.index_path.display()
                ),
            )
        })?;

        let mut rows = BTreeMap::new();
        for (number, line) in content.lines().enumerate() {
            if line.is_empty() {
                continue;
            }

            let mut fields = line.split('\t');
            let (path, content_type, version) =
                match (fields.next(), fields.next(), fields.next(), fields.next()) {
                    (Some(path), Some(content_type), Some(version), None) => {
                        (path, content_type, version)
                    }
                    _ => {
                        return Err(ShellError::new(
                            "cache.index_format_invalid",
                            format!(
                                "invalid index row at `{}` line {}",
                                self.index_path.display(),
                                number + 1
                            ),
                        ));
                    }
                };

            rows.insert(
                decode_index_field(path)?,
                IndexRow {
                    content_type: decode_index_field(content_type)?,
                    version: decode_index_field(version)?,
                },
            );
        }

        Ok(rows)
    }

    fn write_index(&self, rows: &BTreeMap<String, IndexRow>) -> ShellResult<()> {
        if rows.is_empty() {
            if self.index_path.exists() {
                fs::remove_file(&self.index_path).map_err(|error| {
                    ShellError::new(
                        "cache.index_remove_failed",
                        format!(
                            "failed removing empty cache index `{}`: {error}",
                            self.index_path.display()
                        ),
                    )
                })?;
            }
            return Ok(());
        }

        let mut encoded = String::new();
        for (path, row) in rows {
            encoded.push_str(&encode_hex(path.as_bytes()));
            encoded.push('\t');
            encoded.push_str(&encode_hex(row.content_type.as_bytes()));
            encoded.push('\t');
            encoded.push_str(&encode_hex(row.version.as_bytes()));
            encoded.push('\n');
        }

        fs::write(&self.index_path, encoded).map_err(|error| {
            ShellError::new(
                "cache.index_write_failed",
                format!(
                    "failed to write cache index `{}`: {error}",
                    self.index_path.display()
                ),
            )
        })
    }
}

fn decode_index_field(value: &str) -> ShellResult<String> {
    let bytes = decode_hex(value).ok_or_else(|| {
        ShellError::new(
            "cache.index_hex_invalid",
            format!("invalid hex field `{value}` in cache index"),
        )
    })?;

    String::from_utf8(bytes).map_err(|error| {
        ShellError::new(
            "cache.index_utf8_invalid",
            format!("cache index field is not valid UTF-8: {error}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::AssetCache;
    use crate::assets::AssetEntry;
    use crate::assets::AssetList;
    use std::time::{SystemTime, UNIX_EPOCH};
    use vt_core::SystemDigest;

    fn temp_cache_root(tag: &str) -> std::path::PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|value| value.as_nanos())
            .unwrap_or_default();
        std::env::temp_dir().join(format!("vitrine-cache-test-{tag}-{stamp}"))
    }

    fn sample_list(entries: &[(&str, &str)]) -> AssetList {
        let entries = entries
            .iter()
            .map(|(path, body)| AssetEntry {
                path: (*path).to_owned(),
                content_type: "text/plain".to_owned(),
                body: body.as_bytes().to_vec(),
            })
            .collect();
        AssetList::new(entries, &SystemDigest)
    }

    #[test]
    fn activation_makes_key_sets_match_exactly() {
        let root = temp_cache_root("keyset");
        let cache = AssetCache::open(root.clone()).unwrap_or_else(|_| unreachable!());

        let first = sample_list(&[("/", "v1 root"), ("/old.js", "gone soon")]);
        let report = cache.activate(&first);
        assert_eq!(report.map(|r| (r.evicted, r.stored)), Ok((0, 2)));

        let second = sample_list(&[("/", "v2 root"), ("/new.js", "fresh")]);
        let report = cache.activate(&second);
        assert_eq!(report.map(|r| (r.evicted, r.stored)), Ok((1, 2)));

        assert_eq!(cache.keys(), Ok(vec!["/".to_owned(), "/new.js".to_owned()]));
        assert_eq!(cache.lookup("/old.js"), Ok(None));

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn lookup_returns_body_and_content_type() {
        let root = temp_cache_root("lookup");
        let cache = AssetCache::open(root.clone()).unwrap_or_else(|_| unreachable!());

        let list = sample_list(&[("/hello.txt", "hi there")]);
        assert!(cache.activate(&list).is_ok());

        match cache.lookup("/hello.txt") {
            Ok(Some(asset)) => {
                assert_eq!(asset.content_type, "text/plain");
                assert_eq!(asset.body, b"hi there");
            }
            other => panic!("unexpected lookup result: {other:?}"),
        }

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn reopen_sees_the_active_version() {
        let root = temp_cache_root("reopen");
        let version = {
            let cache = AssetCache::open(root.clone()).unwrap_or_else(|_| unreachable!());
            let list = sample_list(&[("/", "persist me")]);
            assert!(cache.activate(&list).is_ok());
            list.version
        };

        let reopened = AssetCache::open(root.clone()).unwrap_or_else(|_| unreachable!());
        assert_eq!(reopened.active_version(), Ok(Some(version)));

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn activating_an_empty_list_clears_everything() {
        let root = temp_cache_root("clear");
        let cache = AssetCache::open(root.clone()).unwrap_or_else(|_| unreachable!());

        assert!(cache.activate(&sample_list(&[("/", "root")])).is_ok());
        assert!(cache.activate(&sample_list(&[])).is_ok());

        assert_eq!(cache.keys(), Ok(Vec::new()));
        assert_eq!(cache.active_version(), Ok(None));

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn malformed_index_rows_are_format_errors() {
        let root = temp_cache_root("malformed");
        let cache = AssetCache::open(root.clone()).unwrap_or_else(|_| unreachable!());

        assert!(std::fs::write(root.join("assets.idx"), "only-one-field\n").is_ok());
        match cache.keys() {
            Err(error) => assert_eq!(error.code, "cache.index_format_invalid"),
            Ok(keys) => panic!("malformed index must not read as {keys:?}"),
        }

        let _ = std::fs::remove_dir_all(root);
    }
}
