//! Durable profile storage for the install secret and scope mappings.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::MutexGuard;

use tracing::debug;
use vt_core::KeyValueStore;
use vt_core::ShellError;
use vt_core::ShellResult;
use vt_core::decode_hex;
use vt_core::encode_hex;

/// File-backed key/value store holding one install profile.
///
/// Records are `hex(key)\thex(value)` lines and the whole file is rewritten
/// on every mutation. The durable namespace stays tiny (the install secret
/// plus one record per scope token), so the format favors inspectability
/// over throughput.
#[derive(Debug)]
pub struct ProfileStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl ProfileStore {
    /// Opens the profile under `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> ShellResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|error| {
            ShellError::new(
                "storage.root_create_failed",
                format!("failed to create storage root `{}`: {error}", root.display()),
            )
        })?;

        Ok(Self {
            path: root.join("profile.kv"),
            guard: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn locked(&self) -> ShellResult<MutexGuard<'_, ()>> {
        self.guard
            .lock()
            .map_err(|_| ShellError::new("storage.lock_poisoned", "profile store lock poisoned"))
    }
}

impl KeyValueStore for ProfileStore {
    fn get(&self, key: &str) -> ShellResult<Option<String>> {
        let _guard = self.locked()?;
        let map = read_profile_map(&self.path)?;
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> ShellResult<()> {
        let _guard = self.locked()?;
        let mut map = read_profile_map(&self.path)?;
        map.insert(key.to_owned(), value.to_owned());
        write_profile_map(&self.path, &map)
    }

    fn remove(&self, key: &str) -> ShellResult<()> {
        let _guard = self.locked()?;
        let mut map = read_profile_map(&self.path)?;
        map.remove(key);

        if map.is_empty() {
            if self.path.exists() {
                fs::remove_file(&self.path).map_err(|error| {
                    ShellError::new(
                        "storage.profile_remove_failed",
                        format!(
                            "failed removing empty profile file `{}`: {error}",
                            self.path.display()
                        ),
                    )
                })?;
            }
            return Ok(());
        }

        write_profile_map(&self.path, &map)
    }
}

fn read_profile_map(path: &Path) -> ShellResult<BTreeMap<String, String>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }

    let content = fs::read_to_string(path).map_err(|error| {
        ShellError::new(
            "storage.profile_read_failed",
            format!("failed to read profile file `{}`: {error}", path.display()),
        )
    })?;

    let mut map = BTreeMap::new();
    for (index, line) in content.lines().enumerate() {
        if line.is_empty() {
            continue;
        }

        let (key_hex, value_hex) = line.split_once('\t').ok_or_else(|| {
            ShellError::new(
                "storage.profile_format_invalid",
                format!("invalid record format at `{}` line {}", path.display(), index + 1),
            )
        })?;

        let key = decode_hex_string(key_hex)?;
        let value = decode_hex_string(value_hex)?;
        map.insert(key, value);
    }

    Ok(map)
}

fn write_profile_map(path: &Path, map: &BTreeMap<String, String>) -> ShellResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|error| {
            ShellError::new(
                "storage.profile_dir_create_failed",
                format!(
                    "failed to create profile directory `{}`: {error}",
                    parent.display()
                ),
            )
        })?;
    }

    let mut encoded = String::new();
    for (key, value) in map {
        encoded.push_str(&encode_hex(key.as_bytes()));
        encoded.push('\t');
        encoded.push_str(&encode_hex(value.as_bytes()));
        encoded.push('\n');
    }

    fs::write(path, encoded).map_err(|error| {
        ShellError::new(
            "storage.profile_write_failed",
            format!("failed to write profile file `{}`: {error}", path.display()),
        )
    })?;

    debug!(records = map.len(), "rewrote profile file");
    Ok(())
}

fn decode_hex_string(value: &str) -> ShellResult<String> {
    let bytes = decode_hex(value).ok_or_else(|| {
        ShellError::new(
            "storage.profile_hex_invalid",
            format!("invalid hex field `{value}`"),
        )
    })?;

    String::from_utf8(bytes).map_err(|error| {
        ShellError::new(
            "storage.profile_utf8_invalid",
            format!("profile field is not valid UTF-8: {error}"),
        )
    })
}
