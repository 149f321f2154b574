//! Package store
//!
//! Durable registry of installed mods under a data root:
//!
//! ```text
//! <root>/
//! ├── records/<mod-id>.json         one InstalledModRecord per mod
//! └── packages/<content-hash>.amod  package artifacts, content addressed
//! ```
//!
//! Records are written to a temporary file and renamed into place. The
//! in-memory snapshot is only swapped after the disk write succeeded, so a
//! reader sees either the previous record or the new one, never a torn
//! write, and a failed write leaves both disk and memory unchanged.
//!
//! A writable store holds an exclusive lock on `<root>/.lock` for as long
//! as it is open; a second writer on the same root fails with
//! [`StoreError::Locked`]. [`PackageStore::open_read_only`] skips the lock
//! and refuses every write.

use auramore_api::{ContentHash, ModDetails, ModManifest, ModStatus, ModSummary, PACKAGE_EXTENSION};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;

const RECORDS_DIR: &str = "records";
const PACKAGES_DIR: &str = "packages";
const LOCK_FILE: &str = ".lock";

/// Error type for store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Mod not found: {0}")]
    NotFound(String),

    #[error("Data directory {0} is in use by another auramore process")]
    Locked(PathBuf),

    #[error("Store at {0} was opened read-only")]
    ReadOnly(PathBuf),
}

impl StoreError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Persisted state of one installed mod
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledModRecord {
    /// Manifest snapshot taken at install time
    pub manifest: ModManifest,
    pub status: ModStatus,
    /// Hash of the package artifact, re-verified on enable
    pub content_hash: ContentHash,
    pub installed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl InstalledModRecord {
    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub fn enabled(&self) -> bool {
        self.status.is_enabled()
    }

    pub fn summary(&self) -> ModSummary {
        ModSummary::new(&self.manifest, &self.status)
    }

    pub fn details(&self) -> ModDetails {
        ModDetails {
            manifest: self.manifest.clone(),
            enabled: self.enabled(),
            status: self.status.kind(),
            error: self.status.error().map(str::to_string),
            content_hash: self.content_hash.clone(),
            installed_at: self.installed_at,
            updated_at: self.updated_at,
        }
    }
}

type Snapshot = Arc<BTreeMap<String, InstalledModRecord>>;

/// File-backed store of installed mod records and package artifacts
pub struct PackageStore {
    root: PathBuf,
    records: RwLock<Snapshot>,
    /// Serializes writers; readers only touch `records`
    write_lock: Mutex<()>,
    /// Held open for the lifetime of a writable store
    root_lock: Option<File>,
}

impl PackageStore {
    /// Open (or create) a store rooted at `root`
    ///
    /// Record files that cannot be read or parsed are skipped with a
    /// warning so one damaged file does not hide the others.
    ///
    /// Fails with [`StoreError::Locked`] while another writable store is
    /// open on the same root.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        let records_dir = root.join(RECORDS_DIR);
        let packages_dir = root.join(PACKAGES_DIR);
        fs::create_dir_all(&records_dir).map_err(|e| StoreError::io(&records_dir, e))?;
        fs::create_dir_all(&packages_dir).map_err(|e| StoreError::io(&packages_dir, e))?;

        let root_lock = lock_root(&root)?;
        let records = load_records(&records_dir)?;
        tracing::debug!(root = %root.display(), count = records.len(), "Package store opened");

        Ok(Self {
            root,
            records: RwLock::new(Arc::new(records)),
            write_lock: Mutex::new(()),
            root_lock: Some(root_lock),
        })
    }

    /// Open a store for queries only, without taking the root lock
    ///
    /// A missing root reads as empty. Every write returns
    /// [`StoreError::ReadOnly`].
    pub fn open_read_only(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        let records_dir = root.join(RECORDS_DIR);
        let records = if records_dir.is_dir() {
            load_records(&records_dir)?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            root,
            records: RwLock::new(Arc::new(records)),
            write_lock: Mutex::new(()),
            root_lock: None,
        })
    }

    fn ensure_writable(&self) -> Result<(), StoreError> {
        match self.root_lock {
            Some(_) => Ok(()),
            None => Err(StoreError::ReadOnly(self.root.clone())),
        }
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn snapshot(&self) -> Snapshot {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Get a record
    pub fn get(&self, id: &str) -> Result<InstalledModRecord, StoreError> {
        self.snapshot()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.snapshot().contains_key(id)
    }

    /// All records, oldest install first (ties broken by id)
    pub fn list(&self) -> Vec<InstalledModRecord> {
        let mut records: Vec<_> = self.snapshot().values().cloned().collect();
        records.sort_by(|a, b| {
            a.installed_at
                .cmp(&b.installed_at)
                .then_with(|| a.id().cmp(b.id()))
        });
        records
    }

    /// Create a fresh record, inactive and stamped now
    ///
    /// Any previous record for the same id is overwritten.
    pub fn put(
        &self,
        manifest: ModManifest,
        content_hash: ContentHash,
    ) -> Result<InstalledModRecord, StoreError> {
        let record = InstalledModRecord {
            manifest,
            status: ModStatus::default(),
            content_hash,
            installed_at: Utc::now(),
            updated_at: None,
        };
        self.commit(record)
    }

    /// Replace the package of an existing record (an update)
    ///
    /// Keeps `installed_at`, stamps `updated_at` and resets the status to a
    /// clean inactive.
    pub fn replace(
        &self,
        manifest: ModManifest,
        content_hash: ContentHash,
    ) -> Result<InstalledModRecord, StoreError> {
        let previous = self.get(&manifest.id)?;
        let record = InstalledModRecord {
            manifest,
            status: ModStatus::default(),
            content_hash,
            installed_at: previous.installed_at,
            updated_at: Some(Utc::now()),
        };
        self.commit(record)
    }

    /// Set the lifecycle status of a record
    pub fn update_status(
        &self,
        id: &str,
        status: ModStatus,
    ) -> Result<InstalledModRecord, StoreError> {
        let mut record = self.get(id)?;
        record.status = status;
        self.commit(record)
    }

    /// Remove a record; removing an unknown id is a no-op
    ///
    /// Returns whether a record existed.
    pub fn remove(&self, id: &str) -> Result<bool, StoreError> {
        self.ensure_writable()?;
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if !self.snapshot().contains_key(id) {
            return Ok(false);
        }

        let path = self.record_path(id);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io(path, e)),
        }

        self.publish(|records| {
            records.remove(id);
        });
        Ok(true)
    }

    /// Write a record to disk, then publish it
    fn commit(&self, record: InstalledModRecord) -> Result<InstalledModRecord, StoreError> {
        self.ensure_writable()?;
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let json = serde_json::to_vec_pretty(&record)?;
        write_atomic(&self.record_path(record.id()), &json)?;

        let published = record.clone();
        self.publish(move |records| {
            records.insert(record.id().to_string(), record);
        });
        Ok(published)
    }

    fn publish(&self, change: impl FnOnce(&mut BTreeMap<String, InstalledModRecord>)) {
        let mut next = (*self.snapshot()).clone();
        change(&mut next);
        let mut guard = self.records.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(next);
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.root.join(RECORDS_DIR).join(format!("{}.json", id))
    }

    // ------------------------------------------------------------------
    // Artifacts
    // ------------------------------------------------------------------

    /// Path of the artifact for a content hash
    pub fn artifact_path(&self, hash: &ContentHash) -> PathBuf {
        self.root
            .join(PACKAGES_DIR)
            .join(format!("{}.{}", hash, PACKAGE_EXTENSION))
    }

    /// Store package bytes under their hash
    ///
    /// Always rewrites, so reinstalling repairs a damaged artifact.
    pub fn write_artifact(&self, hash: &ContentHash, bytes: &[u8]) -> Result<PathBuf, StoreError> {
        self.ensure_writable()?;
        let path = self.artifact_path(hash);
        write_atomic(&path, bytes)?;
        Ok(path)
    }

    pub fn read_artifact(&self, hash: &ContentHash) -> Result<Vec<u8>, StoreError> {
        let path = self.artifact_path(hash);
        fs::read(&path).map_err(|e| StoreError::io(path, e))
    }

    /// Delete an artifact; a missing file is not an error
    pub fn remove_artifact(&self, hash: &ContentHash) -> Result<(), StoreError> {
        self.ensure_writable()?;
        let path = self.artifact_path(hash);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    /// Whether any record still references an artifact
    pub fn artifact_in_use(&self, hash: &ContentHash) -> bool {
        self.snapshot().values().any(|r| &r.content_hash == hash)
    }

    /// Delete artifacts no record references, returning how many went
    pub fn prune_artifacts(&self) -> Result<usize, StoreError> {
        self.ensure_writable()?;
        let referenced: BTreeSet<PathBuf> = self
            .snapshot()
            .values()
            .map(|r| self.artifact_path(&r.content_hash))
            .collect();

        let dir = self.root.join(PACKAGES_DIR);
        let entries = fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))?;
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() || referenced.contains(&path) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), "Pruned orphan artifact");
                    removed += 1;
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to prune artifact"),
            }
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for PackageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageStore")
            .field("root", &self.root)
            .field("records", &self.snapshot().len())
            .field("read_only", &self.root_lock.is_none())
            .finish()
    }
}

/// Take the exclusive lock on `<root>/.lock`
fn lock_root(root: &Path) -> Result<File, StoreError> {
    let path = root.join(LOCK_FILE);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .map_err(|e| StoreError::io(&path, e))?;

    match fs2::FileExt::try_lock_exclusive(&file) {
        Ok(()) => Ok(file),
        Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
            Err(StoreError::Locked(root.to_path_buf()))
        }
        Err(e) => Err(StoreError::io(path, e)),
    }
}

fn load_records(dir: &Path) -> Result<BTreeMap<String, InstalledModRecord>, StoreError> {
    let mut records = BTreeMap::new();
    let entries = fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match load_record(&path) {
            Ok(record) => {
                let expected = path.file_stem().and_then(|s| s.to_str());
                if expected != Some(record.id()) {
                    tracing::warn!(path = %path.display(), mod_id = %record.id(), "Record file name does not match mod id, skipping");
                    continue;
                }
                records.insert(record.id().to_string(), record);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable record");
            }
        }
    }
    Ok(records)
}

fn load_record(path: &Path) -> Result<InstalledModRecord, StoreError> {
    let bytes = fs::read(path).map_err(|e| StoreError::io(path, e))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Write to a sibling temp file and rename it over the target
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("record");
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));

    fs::write(&tmp, bytes).map_err(|e| StoreError::io(&tmp, e))?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(StoreError::io(path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use auramore_api::{PayloadHasher, TargetApps, TargetOs};
    use std::time::Duration;

    fn manifest(id: &str) -> ModManifest {
        ModManifest {
            schema_version: 1,
            id: id.into(),
            name: format!("Mod {}", id),
            version: semver::Version::new(1, 0, 0),
            author: "Aura".into(),
            description: "test".into(),
            target_os: [TargetOs::All].into_iter().collect(),
            target_apps: TargetApps::All,
            permissions: Default::default(),
            entry_point: "mod.wat".into(),
        }
    }

    fn hash(seed: &str) -> ContentHash {
        PayloadHasher::new().add_entry(seed, seed.as_bytes()).finish()
    }

    #[test]
    fn test_put_get_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = PackageStore::open(dir.path()).unwrap();

        let record = store.put(manifest("demo"), hash("a")).unwrap();
        assert_eq!(record.status, ModStatus::default());
        assert!(!record.enabled());
        drop(store);

        let reopened = PackageStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get("demo").unwrap(), record);
    }

    #[test]
    fn test_get_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = PackageStore::open(dir.path()).unwrap();
        assert!(matches!(store.get("nope"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_list_ordered_by_install_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = PackageStore::open(dir.path()).unwrap();

        store.put(manifest("zeta"), hash("z")).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        store.put(manifest("alpha"), hash("a")).unwrap();

        let ids: Vec<_> = store.list().iter().map(|r| r.id().to_string()).collect();
        assert_eq!(ids, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_replace_keeps_install_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = PackageStore::open(dir.path()).unwrap();

        let first = store.put(manifest("demo"), hash("a")).unwrap();
        store.update_status("demo", ModStatus::Active).unwrap();

        let mut next = manifest("demo");
        next.version = semver::Version::new(2, 0, 0);
        let second = store.replace(next, hash("b")).unwrap();

        assert_eq!(second.installed_at, first.installed_at);
        assert!(second.updated_at.is_some());
        assert_eq!(second.status, ModStatus::default());
        assert_eq!(second.content_hash, hash("b"));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = PackageStore::open(dir.path()).unwrap();
        store.put(manifest("demo"), hash("a")).unwrap();

        assert!(store.remove("demo").unwrap());
        assert!(!store.remove("demo").unwrap());
        assert!(!store.contains("demo"));
        drop(store);
        assert!(PackageStore::open(dir.path()).unwrap().list().is_empty());
    }

    #[test]
    fn test_snapshot_isolated_from_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = PackageStore::open(dir.path()).unwrap();
        store.put(manifest("demo"), hash("a")).unwrap();

        let before = store.snapshot();
        store.update_status("demo", ModStatus::Active).unwrap();

        assert_eq!(before["demo"].status, ModStatus::default());
        assert_eq!(store.get("demo").unwrap().status, ModStatus::Active);
    }

    #[test]
    fn test_bad_record_file_skipped() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = PackageStore::open(dir.path()).unwrap();
            store.put(manifest("good"), hash("a")).unwrap();
        }
        fs::write(dir.path().join("records").join("bad.json"), b"{ nope").unwrap();

        let store = PackageStore::open(dir.path()).unwrap();
        assert_eq!(store.list().len(), 1);
        assert!(store.contains("good"));
    }

    #[test]
    fn test_failed_write_leaves_state_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = PackageStore::open(dir.path()).unwrap();
        store.put(manifest("demo"), hash("a")).unwrap();

        // A directory where the temp file should go makes the write fail
        fs::create_dir(dir.path().join("records").join(".demo.json.tmp")).unwrap();
        assert!(store.update_status("demo", ModStatus::Active).is_err());
        assert_eq!(store.get("demo").unwrap().status, ModStatus::default());
    }

    #[test]
    fn test_second_writer_is_locked_out() {
        let dir = tempfile::tempdir().unwrap();
        let store = PackageStore::open(dir.path()).unwrap();
        store.put(manifest("demo"), hash("a")).unwrap();

        let err = PackageStore::open(dir.path()).unwrap_err();
        assert!(matches!(err, StoreError::Locked(_)));

        // Queries still work next to the writer
        let reader = PackageStore::open_read_only(dir.path()).unwrap();
        assert!(reader.contains("demo"));
        assert!(matches!(
            reader.update_status("demo", ModStatus::Active),
            Err(StoreError::ReadOnly(_))
        ));
        assert!(matches!(reader.remove("demo"), Err(StoreError::ReadOnly(_))));
        assert!(matches!(reader.prune_artifacts(), Err(StoreError::ReadOnly(_))));

        drop(store);
        assert!(PackageStore::open(dir.path()).is_ok());
    }

    #[test]
    fn test_read_only_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = PackageStore::open_read_only(dir.path().join("absent")).unwrap();
        assert!(store.list().is_empty());
        assert!(!dir.path().join("absent").exists());
    }

    #[test]
    fn test_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = PackageStore::open(dir.path()).unwrap();
        let used = hash("used");
        let orphan = hash("orphan");

        store.write_artifact(&used, b"used").unwrap();
        store.write_artifact(&orphan, b"orphan").unwrap();
        store.put(manifest("demo"), used.clone()).unwrap();

        assert!(store.artifact_in_use(&used));
        assert!(!store.artifact_in_use(&orphan));
        assert_eq!(store.prune_artifacts().unwrap(), 1);
        assert_eq!(store.read_artifact(&used).unwrap(), b"used");
        assert!(store.read_artifact(&orphan).is_err());

        store.remove_artifact(&used).unwrap();
        store.remove_artifact(&used).unwrap();
    }
}
