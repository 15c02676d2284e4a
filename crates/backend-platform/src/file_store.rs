use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};

use tracing::debug;

use crate::{SecretStore, SecretStoreError};

/// Secret store backed by one JSON file, for hosts without an OS keyring.
///
/// Keys are `service\u{1f}account`. Every write rewrites the whole file through
/// [`write_file_atomic`]; on Unix the file is created with mode `0600`.
#[derive(Debug)]
pub struct FileSecretStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, SecretStoreError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => {
                return Err(SecretStoreError::Unavailable(format!(
                    "failed reading {}: {err}",
                    self.path.display()
                )));
            }
        };
        serde_json::from_slice(&raw).map_err(|err| {
            SecretStoreError::Backend(format!("failed parsing {}: {err}", self.path.display()))
        })
    }

    fn store(&self, entries: &BTreeMap<String, String>) -> Result<(), SecretStoreError> {
        let encoded = serde_json::to_vec_pretty(entries)
            .map_err(|err| SecretStoreError::Backend(err.to_string()))?;
        write_file_atomic(&self.path, &encoded).map_err(|err| {
            SecretStoreError::Unavailable(format!("failed writing {}: {err}", self.path.display()))
        })
    }

    fn update<T>(
        &self,
        apply: impl FnOnce(&mut BTreeMap<String, String>) -> Result<T, SecretStoreError>,
    ) -> Result<T, SecretStoreError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| SecretStoreError::Backend("poisoned lock".to_owned()))?;
        let mut entries = self.load()?;
        let result = apply(&mut entries)?;
        self.store(&entries)?;
        Ok(result)
    }
}

fn entry_key(service: &str, account: &str) -> String {
    format!("{service}\u{1f}{account}")
}

impl SecretStore for FileSecretStore {
    fn set_secret(
        &self,
        service: &str,
        account: &str,
        secret: &str,
    ) -> Result<(), SecretStoreError> {
        self.update(|entries| {
            entries.insert(entry_key(service, account), secret.to_owned());
            Ok(())
        })?;
        debug!(service, account, path = %self.path.display(), "stored secret");
        Ok(())
    }

    fn get_secret(&self, service: &str, account: &str) -> Result<String, SecretStoreError> {
        self.load()?
            .remove(&entry_key(service, account))
            .ok_or(SecretStoreError::NotFound)
    }

    fn delete_secret(&self, service: &str, account: &str) -> Result<(), SecretStoreError> {
        self.update(|entries| {
            entries
                .remove(&entry_key(service, account))
                .map(|_| ())
                .ok_or(SecretStoreError::NotFound)
        })
    }
}

/// Write `contents` to `path` through a temp file and rename, creating parent
/// directories when needed.
pub fn write_file_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let temp_path = temp_path_for(path);
    write_private(&temp_path, contents)?;

    if let Err(rename_err) = fs::rename(&temp_path, path) {
        // Windows does not allow replacing existing files via rename.
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                let _ = fs::remove_file(&temp_path);
                return Err(io::Error::new(
                    err.kind(),
                    format!("replacing after rename error ({rename_err}): {err}"),
                ));
            }
        }
        fs::rename(&temp_path, path).inspect_err(|_| {
            let _ = fs::remove_file(&temp_path);
        })?;
    }

    Ok(())
}

/// Remove `path`, treating a missing file as success.
pub fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    use std::{io::Write, os::unix::fs::OpenOptionsExt};

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    fs::write(path, contents)
}

fn temp_path_for(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("swoon-store.json");
    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or(0);
    parent.join(format!(".{file_name}.{now_nanos}.tmp"))
}
