use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use mnemo_core::{format_uri, MemoryError, OperationKind, ResourceKind, SnapshotPayload};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

type Result<T> = std::result::Result<T, MemoryError>;

const LOCATOR_MAX_CHARS: usize = 100;
const LOCATOR_HASH_CHARS: usize = 8;

/// Manifest index entry for one captured resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    pub resource_type: ResourceKind,
    pub snapshot_time: String,
    pub operation_type: OperationKind,
    pub file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionManifest {
    pub session_id: String,
    pub created_at: String,
    pub resources: BTreeMap<String, ManifestEntry>,
}

/// One durable capture: the state of a resource immediately before this
/// session's first mutation of it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub resource_id: String,
    pub resource_type: ResourceKind,
    pub snapshot_time: String,
    pub data: SnapshotPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: String,
    pub created_at: String,
    pub resource_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotSummary {
    pub resource_id: String,
    pub resource_type: ResourceKind,
    pub snapshot_time: String,
    pub operation_type: OperationKind,
}

/// Session-scoped snapshot storage: one directory per session holding a
/// manifest plus one JSON file per captured resource.
///
/// Layout:
/// ```text
/// {root}/
/// └── {session_id}/
///     ├── manifest.json
///     └── resources/
///         └── {locator}.json
/// ```
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    /// Open (creating if needed) a snapshot store rooted at `root`.
    ///
    /// # Errors
    /// Returns [`MemoryError::Storage`] when the root cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|err| {
            MemoryError::Storage(format!(
                "failed to create snapshot root {}: {err}",
                root.display()
            ))
        })?;
        Ok(Self { root })
    }

    /// Capture a resource's pre-mutation state, at most once per
    /// `(session, resource)`. Returns `false` without touching storage when
    /// a snapshot already exists, unless `force` is set (delete captures
    /// overwrite earlier metadata captures this way).
    ///
    /// # Errors
    /// Returns [`MemoryError::Storage`] on I/O or serialization failure.
    pub fn create_snapshot(
        &self,
        session_id: &str,
        resource_id: &str,
        payload: SnapshotPayload,
        force: bool,
    ) -> Result<bool> {
        if !force && self.has_snapshot(session_id, resource_id)? {
            return Ok(false);
        }

        let resources_dir = self.resources_dir(session_id);
        fs::create_dir_all(&resources_dir).map_err(|err| {
            MemoryError::Storage(format!(
                "failed to create resources dir {}: {err}",
                resources_dir.display()
            ))
        })?;

        let record = SnapshotRecord {
            resource_id: resource_id.to_string(),
            resource_type: payload.resource_kind(),
            snapshot_time: now_rfc3339()?,
            data: payload,
        };

        let snapshot_path = self.snapshot_path(session_id, resource_id);
        write_json(&snapshot_path, &record)?;

        let mut manifest = self.load_manifest(session_id)?;
        manifest.resources.insert(
            resource_id.to_string(),
            ManifestEntry {
                resource_type: record.resource_type,
                snapshot_time: record.snapshot_time.clone(),
                operation_type: record.data.operation(),
                file: file_name_of(&snapshot_path),
            },
        );
        self.save_manifest(session_id, &manifest)?;

        Ok(true)
    }

    /// # Errors
    /// Returns [`MemoryError::Storage`] when the manifest cannot be read.
    pub fn has_snapshot(&self, session_id: &str, resource_id: &str) -> Result<bool> {
        let manifest = self.load_manifest(session_id)?;
        if manifest.resources.contains_key(resource_id) {
            return Ok(true);
        }
        Ok(self.snapshot_path(session_id, resource_id).exists())
    }

    /// # Errors
    /// Returns [`MemoryError::Storage`] on I/O or parse failure; an absent
    /// snapshot yields `Ok(None)`.
    pub fn get_snapshot(
        &self,
        session_id: &str,
        resource_id: &str,
    ) -> Result<Option<SnapshotRecord>> {
        let path = self.locate(session_id, resource_id)?;
        if !path.exists() {
            return Ok(None);
        }

        let bytes = fs::read(&path).map_err(|err| {
            MemoryError::Storage(format!("failed to read snapshot {}: {err}", path.display()))
        })?;
        let record = serde_json::from_slice(&bytes).map_err(|err| {
            MemoryError::Storage(format!("failed to parse snapshot {}: {err}", path.display()))
        })?;
        Ok(Some(record))
    }

    /// Find the session's content snapshot whose recorded address (or any
    /// recorded alias) matches `uri`. Content snapshots are keyed by memory
    /// id, so after version churn the current id no longer matches the key;
    /// this lookup is what keeps content capture idempotent per address.
    ///
    /// # Errors
    /// Returns [`MemoryError::Storage`] on I/O or parse failure.
    pub fn find_content_snapshot(&self, session_id: &str, uri: &str) -> Result<Option<String>> {
        let manifest = self.load_manifest(session_id)?;
        for (resource_id, entry) in &manifest.resources {
            if entry.resource_type != ResourceKind::Memory {
                continue;
            }
            let Some(record) = self.get_snapshot(session_id, resource_id)? else {
                continue;
            };
            if let SnapshotPayload::ModifyContent { namespace, path, all_addresses, .. } =
                &record.data
            {
                if format_uri(namespace, path) == uri
                    || all_addresses.iter().any(|address| address == uri)
                {
                    return Ok(Some(resource_id.clone()));
                }
            }
        }
        Ok(None)
    }

    /// All sessions holding at least one snapshot, newest first. Sessions
    /// whose manifest lists zero resources are discarded on the way.
    ///
    /// # Errors
    /// Returns [`MemoryError::Storage`] on directory or manifest failure.
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.root).map_err(|err| {
            MemoryError::Storage(format!(
                "failed to list snapshot root {}: {err}",
                self.root.display()
            ))
        })?;

        let mut sessions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| {
                MemoryError::Storage(format!("failed to read snapshot root entry: {err}"))
            })?;
            if !entry.path().is_dir() {
                continue;
            }
            let session_id = entry.file_name().to_string_lossy().to_string();
            let manifest = self.load_manifest(&session_id)?;

            if manifest.resources.is_empty() {
                self.clear_session(&session_id)?;
                continue;
            }

            sessions.push(SessionSummary {
                session_id,
                created_at: manifest.created_at,
                resource_count: manifest.resources.len(),
            });
        }

        sessions.sort_by(|lhs, rhs| rhs.created_at.cmp(&lhs.created_at));
        Ok(sessions)
    }

    /// # Errors
    /// Returns [`MemoryError::Storage`] when the manifest cannot be read.
    pub fn list_snapshots(&self, session_id: &str) -> Result<Vec<SnapshotSummary>> {
        let manifest = self.load_manifest(session_id)?;
        Ok(manifest
            .resources
            .into_iter()
            .map(|(resource_id, entry)| SnapshotSummary {
                resource_id,
                resource_type: entry.resource_type,
                snapshot_time: entry.snapshot_time,
                operation_type: entry.operation_type,
            })
            .collect())
    }

    /// Delete one snapshot; removes the whole session once its last
    /// snapshot is gone. Returns `false` when nothing was stored.
    ///
    /// # Errors
    /// Returns [`MemoryError::Storage`] on I/O failure.
    pub fn delete_snapshot(&self, session_id: &str, resource_id: &str) -> Result<bool> {
        let path = self.locate(session_id, resource_id)?;
        if !path.exists() {
            return Ok(false);
        }

        fs::remove_file(&path).map_err(|err| {
            MemoryError::Storage(format!("failed to delete snapshot {}: {err}", path.display()))
        })?;

        let mut manifest = self.load_manifest(session_id)?;
        if manifest.resources.remove(resource_id).is_some() {
            if manifest.resources.is_empty() {
                self.clear_session(session_id)?;
            } else {
                self.save_manifest(session_id, &manifest)?;
            }
        }

        Ok(true)
    }

    /// Drop a session's entire snapshot directory. Returns the number of
    /// snapshots that were stored in it.
    ///
    /// # Errors
    /// Returns [`MemoryError::Storage`] on I/O failure.
    pub fn clear_session(&self, session_id: &str) -> Result<usize> {
        let session_dir = self.session_dir(session_id);
        if !session_dir.exists() {
            return Ok(0);
        }

        let count = self.load_manifest(session_id)?.resources.len();
        fs::remove_dir_all(&session_dir).map_err(|err| {
            MemoryError::Storage(format!(
                "failed to clear session {}: {err}",
                session_dir.display()
            ))
        })?;
        Ok(count)
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    fn resources_dir(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("resources")
    }

    fn manifest_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("manifest.json")
    }

    fn snapshot_path(&self, session_id: &str, resource_id: &str) -> PathBuf {
        self.resources_dir(session_id).join(format!("{}.json", sanitize_resource_id(resource_id)))
    }

    /// Prefer the file name recorded in the manifest over the computed one,
    /// so records survive changes to the sanitization scheme.
    fn locate(&self, session_id: &str, resource_id: &str) -> Result<PathBuf> {
        let manifest = self.load_manifest(session_id)?;
        match manifest.resources.get(resource_id) {
            Some(entry) => Ok(self.resources_dir(session_id).join(&entry.file)),
            None => Ok(self.snapshot_path(session_id, resource_id)),
        }
    }

    fn load_manifest(&self, session_id: &str) -> Result<SessionManifest> {
        let manifest_path = self.manifest_path(session_id);
        if !manifest_path.exists() {
            return Ok(SessionManifest {
                session_id: session_id.to_string(),
                created_at: now_rfc3339()?,
                resources: BTreeMap::new(),
            });
        }

        let bytes = fs::read(&manifest_path).map_err(|err| {
            MemoryError::Storage(format!(
                "failed to read manifest {}: {err}",
                manifest_path.display()
            ))
        })?;
        serde_json::from_slice(&bytes).map_err(|err| {
            MemoryError::Storage(format!(
                "failed to parse manifest {}: {err}",
                manifest_path.display()
            ))
        })
    }

    fn save_manifest(&self, session_id: &str, manifest: &SessionManifest) -> Result<()> {
        let session_dir = self.session_dir(session_id);
        fs::create_dir_all(&session_dir).map_err(|err| {
            MemoryError::Storage(format!(
                "failed to create session dir {}: {err}",
                session_dir.display()
            ))
        })?;
        write_json(&self.manifest_path(session_id), manifest)
    }
}

/// Map a resource id to a storage-safe locator. The hash suffix is computed
/// over the ORIGINAL id, so `core://a/b` and `core://a_b` stay distinct no
/// matter what the substitutions collapse.
#[must_use]
pub fn sanitize_resource_id(resource_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(resource_id.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    let suffix = &digest[..LOCATOR_HASH_CHARS];

    let mut safe: String = resource_id
        .replace("://", "__")
        .chars()
        .map(|ch| match ch {
            ':' | '/' | '\\' => '_',
            _ => ch,
        })
        .collect();

    if safe.chars().count() > LOCATOR_MAX_CHARS {
        safe = safe.chars().take(LOCATOR_MAX_CHARS).collect();
    }

    format!("{safe}_{suffix}")
}

fn file_name_of(path: &Path) -> String {
    path.file_name().map(|name| name.to_string_lossy().to_string()).unwrap_or_default()
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_vec_pretty(value).map_err(|err| {
        MemoryError::Storage(format!("failed to serialize {}: {err}", path.display()))
    })?;
    fs::write(path, body).map_err(|err| {
        MemoryError::Storage(format!("failed to write {}: {err}", path.display()))
    })
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| MemoryError::Storage(format!("failed to format RFC3339 timestamp: {err}")))
}
