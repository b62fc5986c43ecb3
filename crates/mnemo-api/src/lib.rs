use std::path::PathBuf;

use mnemo_core::{
    content_resource_id, format_uri, split_uri, unified_diff, ChildEntry, CreatedAlias,
    CreatedMemory, MemoryDetail, MemoryError, MemoryId, OperationKind, OrphanDetail, OrphanEntry,
    PurgeOutcome, RemovedPath, ResolvedMemory, ResourceKind, RestoredVersion, SnapshotPayload,
    UpdateFields, UpdateOutcome,
};
use mnemo_snapshot::{SessionSummary, SnapshotRecord, SnapshotStore, SnapshotSummary};
use mnemo_store_sqlite::{ChildrenScope, SqliteStore};
use serde::{Deserialize, Serialize};

type Result<T> = std::result::Result<T, MemoryError>;

pub const DEFAULT_NAMESPACE: &str = "core";

/// Shown on the current side of a diff when the live resource is gone.
pub const DELETED_PLACEHOLDER: &str = "[DELETED]";
/// Shown on the snapshot side when the pre-state row was purged from the
/// entity store.
pub const PURGED_PLACEHOLDER: &str = "[PERMANENTLY DELETED]";

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub db_path: PathBuf,
    pub snapshot_dir: PathBuf,
    pub session_id: String,
    pub namespaces: Vec<String>,
}

impl ApiConfig {
    #[must_use]
    pub fn new(db_path: PathBuf, snapshot_dir: PathBuf, session_id: String) -> Self {
        Self { db_path, snapshot_dir, session_id, namespaces: default_namespaces() }
    }
}

#[must_use]
pub fn default_namespaces() -> Vec<String> {
    vec![DEFAULT_NAMESPACE.to_string(), "notes".to_string(), "archive".to_string()]
}

/// One side of a reviewer diff: content plus path metadata as captured or
/// as currently live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SideView {
    pub content: String,
    pub priority: Option<i64>,
    pub disclosure: Option<String>,
}

impl SideView {
    fn empty() -> Self {
        Self { content: String::new(), priority: None, disclosure: None }
    }

    fn deleted() -> Self {
        Self { content: DELETED_PLACEHOLDER.to_string(), priority: None, disclosure: None }
    }

    fn of(memory: &ResolvedMemory) -> Self {
        Self {
            content: memory.content.clone(),
            priority: Some(memory.priority),
            disclosure: memory.disclosure.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceDiff {
    pub resource_id: String,
    pub resource_type: ResourceKind,
    pub snapshot_time: String,
    pub snapshot: SideView,
    pub current: SideView,
    pub diff_unified: String,
    pub diff_summary: String,
    pub has_changes: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStatus {
    RolledBack,
    Restored,
    Deleted,
    AlreadyDeleted,
    NoChange,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RollbackOutcome {
    pub resource_id: String,
    pub status: RollbackStatus,
    pub message: String,
    pub new_version: Option<MemoryId>,
}

/// Process-wide entry point: one store, one snapshot store, one session.
///
/// Every mutating operation captures the affected resource's pre-state into
/// the session ledger before driving the store, so a reviewer can later
/// diff and selectively reverse it.
pub struct MemoryApi {
    store: SqliteStore,
    snapshots: SnapshotStore,
    session_id: String,
    namespaces: Vec<String>,
}

impl MemoryApi {
    /// Open the underlying store (migrating it to the latest schema) and
    /// the snapshot store.
    ///
    /// # Errors
    /// Returns [`MemoryError::Validation`] for an empty session id and
    /// [`MemoryError::Storage`] when either store cannot be opened.
    pub fn open(config: ApiConfig) -> Result<Self> {
        if config.session_id.trim().is_empty() {
            return Err(MemoryError::Validation("session id must be non-empty".to_string()));
        }

        let mut store = SqliteStore::open(&config.db_path)?;
        store.migrate()?;
        let snapshots = SnapshotStore::open(config.snapshot_dir)?;

        let namespaces =
            if config.namespaces.is_empty() { default_namespaces() } else { config.namespaces };

        Ok(Self { store, snapshots, session_id: config.session_id, namespaces })
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn ensure_namespace(&self, namespace: &str) -> Result<()> {
        if self.namespaces.iter().any(|known| known == namespace) {
            Ok(())
        } else {
            Err(MemoryError::Validation(format!(
                "unknown namespace '{namespace}'; valid namespaces: {}",
                self.namespaces.join(", ")
            )))
        }
    }

    /// # Errors
    /// Returns [`MemoryError::Validation`] for an unknown namespace and
    /// [`MemoryError::Storage`] on query failure.
    pub fn read(&self, path: &str, namespace: &str) -> Result<Option<ResolvedMemory>> {
        self.ensure_namespace(namespace)?;
        self.store.get_memory_by_path(path, namespace)
    }

    /// # Errors
    /// Returns [`MemoryError::Storage`] on query failure.
    pub fn memory_detail(&self, memory_id: MemoryId) -> Result<Option<MemoryDetail>> {
        self.store.get_memory_by_id(memory_id)
    }

    /// # Errors
    /// Returns [`MemoryError::Storage`] on query failure.
    pub fn children_of(&self, memory_id: MemoryId) -> Result<Vec<ChildEntry>> {
        self.store.get_children(ChildrenScope::Memory(memory_id))
    }

    /// # Errors
    /// Returns [`MemoryError::Validation`] for an unknown namespace and
    /// [`MemoryError::Storage`] on query failure.
    pub fn children_at_root(&self, namespace: &str) -> Result<Vec<ChildEntry>> {
        self.ensure_namespace(namespace)?;
        self.store.get_children(ChildrenScope::Root(namespace))
    }

    /// Create a memory and record the created address in the session
    /// ledger (its rollback is deletion).
    ///
    /// # Errors
    /// Propagates [`SqliteStore::create_memory`] failures; snapshot
    /// persistence failures surface as [`MemoryError::Storage`].
    pub fn create(
        &mut self,
        parent: &str,
        namespace: &str,
        content: &str,
        priority: i64,
        name: Option<&str>,
        disclosure: Option<&str>,
    ) -> Result<CreatedMemory> {
        self.ensure_namespace(namespace)?;
        let created = self.store.create_memory(parent, namespace, content, priority, name, disclosure)?;

        let payload = SnapshotPayload::Create {
            namespace: created.namespace.clone(),
            path: created.path.clone(),
            memory_id: created.id,
        };
        self.snapshots.create_snapshot(&self.session_id, &created.uri, payload, false)?;

        Ok(created)
    }

    /// Create an alias and record it in the session ledger (its rollback
    /// removes only the alias path).
    ///
    /// # Errors
    /// Propagates [`SqliteStore::add_path`] failures.
    pub fn add_alias(
        &mut self,
        new_path: &str,
        new_namespace: &str,
        target_path: &str,
        target_namespace: &str,
        priority: i64,
        disclosure: Option<&str>,
    ) -> Result<CreatedAlias> {
        self.ensure_namespace(new_namespace)?;
        self.ensure_namespace(target_namespace)?;

        let created = self.store.add_path(
            new_path,
            new_namespace,
            target_path,
            target_namespace,
            priority,
            disclosure,
        )?;

        let payload = SnapshotPayload::CreateAlias {
            namespace: new_namespace.to_string(),
            path: new_path.to_string(),
            memory_id: created.memory_id,
            target_uri: created.target_uri.clone(),
        };
        self.snapshots.create_snapshot(&self.session_id, &created.new_uri, payload, false)?;

        Ok(created)
    }

    /// Update a memory, capturing pre-state first: the current content
    /// version when content changes (keyed by memory id), and the current
    /// path metadata when priority/disclosure change (keyed by address).
    /// Each capture is idempotent per session.
    ///
    /// # Errors
    /// Propagates [`SqliteStore::update_memory`] failures.
    pub fn update(
        &mut self,
        path: &str,
        namespace: &str,
        fields: UpdateFields,
    ) -> Result<UpdateOutcome> {
        self.ensure_namespace(namespace)?;

        if fields.content.is_some() {
            self.capture_content(path, namespace)?;
        }
        if fields.priority.is_some() || fields.disclosure.is_some() {
            self.capture_meta(path, namespace)?;
        }

        self.store.update_memory(path, namespace, &fields)
    }

    /// Remove an address, capturing enough to recreate it. A delete that
    /// follows a same-session create cancels out instead: both ledger
    /// entries vanish, as if nothing had happened.
    ///
    /// # Errors
    /// [`MemoryError::NotFound`] when the address does not resolve;
    /// propagates [`SqliteStore::remove_path`] failures.
    pub fn delete(&mut self, path: &str, namespace: &str) -> Result<RemovedPath> {
        self.ensure_namespace(namespace)?;

        let uri = format_uri(namespace, path);
        let Some(memory) = self.store.get_memory_by_path(path, namespace)? else {
            return Err(MemoryError::NotFound(format!("memory at '{uri}' not found")));
        };

        self.capture_delete(path, namespace, &memory)?;
        self.store.remove_path(path, namespace)
    }

    /// Direct passthrough to the store's version rollback (exposed for the
    /// reviewer surface; does not itself capture a snapshot).
    ///
    /// # Errors
    /// Propagates [`SqliteStore::rollback_to_memory`] failures.
    pub fn rollback_to_version(
        &mut self,
        path: &str,
        namespace: &str,
        target: MemoryId,
    ) -> Result<RestoredVersion> {
        self.ensure_namespace(namespace)?;
        self.store.rollback_to_memory(path, namespace, target)
    }

    /// # Errors
    /// Propagates [`SqliteStore::permanently_delete`] failures.
    pub fn permanently_delete(
        &mut self,
        memory_id: MemoryId,
        require_orphan: bool,
    ) -> Result<PurgeOutcome> {
        self.store.permanently_delete(memory_id, require_orphan)
    }

    /// # Errors
    /// Returns [`MemoryError::Storage`] on query failure.
    pub fn list_orphans(&self) -> Result<Vec<OrphanEntry>> {
        self.store.list_orphans()
    }

    /// # Errors
    /// Returns [`MemoryError::Storage`] on query failure.
    pub fn orphan_detail(&self, memory_id: MemoryId) -> Result<Option<OrphanDetail>> {
        self.store.orphan_detail(memory_id)
    }

    /// # Errors
    /// Returns [`MemoryError::Storage`] on snapshot store failure.
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        self.snapshots.list_sessions()
    }

    /// # Errors
    /// Returns [`MemoryError::Storage`] on snapshot store failure.
    pub fn list_snapshots(&self, session_id: &str) -> Result<Vec<SnapshotSummary>> {
        self.snapshots.list_snapshots(session_id)
    }

    /// # Errors
    /// Returns [`MemoryError::Storage`] on snapshot store failure.
    pub fn get_snapshot(&self, session_id: &str, resource_id: &str) -> Result<Option<SnapshotRecord>> {
        self.snapshots.get_snapshot(session_id, resource_id)
    }

    /// # Errors
    /// Returns [`MemoryError::Storage`] on snapshot store failure.
    pub fn has_snapshot(&self, session_id: &str, resource_id: &str) -> Result<bool> {
        self.snapshots.has_snapshot(session_id, resource_id)
    }

    /// # Errors
    /// Returns [`MemoryError::Storage`] on snapshot store failure.
    pub fn delete_snapshot(&mut self, session_id: &str, resource_id: &str) -> Result<bool> {
        self.snapshots.delete_snapshot(session_id, resource_id)
    }

    /// # Errors
    /// Returns [`MemoryError::Storage`] on snapshot store failure.
    pub fn clear_session(&mut self, session_id: &str) -> Result<usize> {
        self.snapshots.clear_session(session_id)
    }

    /// Reconstruct the captured and current projections of a resource and
    /// render their difference for review.
    ///
    /// # Errors
    /// [`MemoryError::NotFound`] when the snapshot does not exist.
    pub fn diff(&self, session_id: &str, resource_id: &str) -> Result<ResourceDiff> {
        let record = self.require_snapshot(session_id, resource_id)?;

        let (snapshot_side, current_side, diff_unified, diff_summary, has_changes) =
            match &record.data {
                SnapshotPayload::Create { namespace, path, .. }
                | SnapshotPayload::CreateAlias { namespace, path, .. } => {
                    self.diff_created(namespace, path)?
                }
                SnapshotPayload::Delete { namespace, path, memory_id, priority, disclosure } => {
                    self.diff_deleted(namespace, path, *memory_id, *priority, disclosure.clone())?
                }
                SnapshotPayload::ModifyMeta { namespace, path, priority, disclosure, .. } => {
                    self.diff_meta(namespace, path, *priority, disclosure.clone())?
                }
                SnapshotPayload::ModifyContent { namespace, path, memory_id, all_addresses } => {
                    self.diff_content(namespace, path, *memory_id, all_addresses)?
                }
            };

        Ok(ResourceDiff {
            resource_id: record.resource_id,
            resource_type: record.resource_type,
            snapshot_time: record.snapshot_time,
            snapshot: snapshot_side,
            current: current_side,
            diff_unified,
            diff_summary,
            has_changes,
        })
    }

    /// Reverse the recorded operation, re-validating live state first.
    /// Failure modes are typed and distinguishable; a content rollback
    /// whose target already matches reports no-change rather than failing.
    ///
    /// # Errors
    /// [`MemoryError::NotFound`] when the snapshot or live resource is
    /// missing, [`MemoryError::Conflict`] when the inverse operation
    /// collides with later edits.
    pub fn rollback(&mut self, session_id: &str, resource_id: &str) -> Result<RollbackOutcome> {
        let record = self.require_snapshot(session_id, resource_id)?;

        match record.data {
            SnapshotPayload::Create { namespace, path, .. } => {
                let uri = format_uri(&namespace, &path);
                match self.store.get_memory_by_path(&path, &namespace)? {
                    None => Ok(outcome(
                        resource_id,
                        RollbackStatus::AlreadyDeleted,
                        format!("'{uri}' was already deleted"),
                        None,
                    )),
                    Some(current) => {
                        self.store.permanently_delete(current.id, false)?;
                        Ok(outcome(
                            resource_id,
                            RollbackStatus::Deleted,
                            format!("deleted created resource '{uri}'"),
                            None,
                        ))
                    }
                }
            }
            SnapshotPayload::CreateAlias { namespace, path, .. } => {
                let uri = format_uri(&namespace, &path);
                match self.store.remove_path(&path, &namespace) {
                    Ok(_) => Ok(outcome(
                        resource_id,
                        RollbackStatus::Deleted,
                        format!("removed alias '{uri}'"),
                        None,
                    )),
                    Err(MemoryError::NotFound(_)) => Ok(outcome(
                        resource_id,
                        RollbackStatus::AlreadyDeleted,
                        format!("alias '{uri}' was already removed"),
                        None,
                    )),
                    Err(err) => Err(err),
                }
            }
            SnapshotPayload::Delete { namespace, path, memory_id, priority, disclosure } => {
                let uri = format_uri(&namespace, &path);
                match self.store.restore_path(
                    &path,
                    &namespace,
                    memory_id,
                    priority,
                    disclosure.as_deref(),
                ) {
                    Ok(_) => Ok(outcome(
                        resource_id,
                        RollbackStatus::Restored,
                        format!("restored deleted resource '{uri}'"),
                        Some(memory_id),
                    )),
                    Err(MemoryError::NotFound(_)) => Err(MemoryError::NotFound(format!(
                        "memory version {memory_id} was permanently deleted; cannot restore '{uri}'"
                    ))),
                    Err(err) => Err(err),
                }
            }
            SnapshotPayload::ModifyMeta { namespace, path, priority, disclosure, .. } => {
                let uri = format_uri(&namespace, &path);
                let current =
                    self.store.get_memory_by_path(&path, &namespace)?.ok_or_else(|| {
                        MemoryError::NotFound(format!(
                            "'{uri}' no longer exists; cannot roll back metadata"
                        ))
                    })?;

                if current.priority == priority && current.disclosure == disclosure {
                    return Ok(outcome(
                        resource_id,
                        RollbackStatus::NoChange,
                        "metadata already matches snapshot".to_string(),
                        Some(current.id),
                    ));
                }

                self.store.set_path_meta(&path, &namespace, priority, disclosure.as_deref())?;
                Ok(outcome(
                    resource_id,
                    RollbackStatus::RolledBack,
                    format!("restored metadata for '{uri}'"),
                    Some(current.id),
                ))
            }
            SnapshotPayload::ModifyContent { namespace, path, memory_id, all_addresses } => {
                let uri = format_uri(&namespace, &path);
                let current =
                    self.resolve_live(&namespace, &path, &all_addresses)?.ok_or_else(|| {
                        MemoryError::NotFound(format!("'{uri}' no longer exists; cannot roll back"))
                    })?;

                if current.id == memory_id {
                    return Ok(outcome(
                        resource_id,
                        RollbackStatus::NoChange,
                        "content already matches snapshot".to_string(),
                        Some(memory_id),
                    ));
                }

                let restored =
                    self.store.rollback_to_memory(&current.path, &current.namespace, memory_id)?;
                Ok(outcome(
                    resource_id,
                    RollbackStatus::RolledBack,
                    format!("restored '{}' to version {memory_id}", restored.uri),
                    Some(restored.restored_memory_id),
                ))
            }
        }
    }

    fn require_snapshot(&self, session_id: &str, resource_id: &str) -> Result<SnapshotRecord> {
        self.snapshots.get_snapshot(session_id, resource_id)?.ok_or_else(|| {
            MemoryError::NotFound(format!(
                "snapshot for '{resource_id}' not found in session '{session_id}'"
            ))
        })
    }

    /// Capture the current content version once per session. Keyed by
    /// `memory:{id}`, with an address-level fallback lookup: repeated
    /// updates to one address produce fresh ids, but only the first
    /// pre-session version is ever captured.
    fn capture_content(&mut self, path: &str, namespace: &str) -> Result<bool> {
        let Some(memory) = self.store.get_memory_by_path(path, namespace)? else {
            return Ok(false);
        };

        let resource_id = content_resource_id(memory.id);
        if self.snapshots.has_snapshot(&self.session_id, &resource_id)? {
            return Ok(false);
        }

        let uri = format_uri(namespace, path);
        if self.snapshots.find_content_snapshot(&self.session_id, &uri)?.is_some() {
            return Ok(false);
        }

        // Record every current address so rollback can fall back to an
        // alias if the primary path is deleted later in the session.
        let all_addresses = self
            .store
            .get_memory_by_id(memory.id)?
            .map(|detail| detail.addresses)
            .unwrap_or_default();

        let payload = SnapshotPayload::ModifyContent {
            namespace: namespace.to_string(),
            path: path.to_string(),
            memory_id: memory.id,
            all_addresses,
        };
        self.snapshots.create_snapshot(&self.session_id, &resource_id, payload, false)
    }

    fn capture_meta(&mut self, path: &str, namespace: &str) -> Result<bool> {
        let uri = format_uri(namespace, path);
        if self.snapshots.has_snapshot(&self.session_id, &uri)? {
            return Ok(false);
        }

        let Some(memory) = self.store.get_memory_by_path(path, namespace)? else {
            return Ok(false);
        };

        let payload = SnapshotPayload::ModifyMeta {
            namespace: namespace.to_string(),
            path: path.to_string(),
            memory_id: memory.id,
            priority: memory.priority,
            disclosure: memory.disclosure,
        };
        self.snapshots.create_snapshot(&self.session_id, &uri, payload, false)
    }

    /// Delete capture. A same-session create/create_alias snapshot on the
    /// address cancels against the delete (including the address's content
    /// snapshot). Otherwise the capture force-overwrites a metadata
    /// snapshot while keeping its values: the invariant is always "state
    /// before this session began", not "state just before the delete".
    fn capture_delete(
        &mut self,
        path: &str,
        namespace: &str,
        memory: &ResolvedMemory,
    ) -> Result<bool> {
        let uri = format_uri(namespace, path);

        let mut priority = memory.priority;
        let mut disclosure = memory.disclosure.clone();

        if let Some(existing) = self.snapshots.get_snapshot(&self.session_id, &uri)? {
            match existing.data.operation() {
                OperationKind::Create | OperationKind::CreateAlias => {
                    if let Some(content_id) =
                        self.snapshots.find_content_snapshot(&self.session_id, &uri)?
                    {
                        self.snapshots.delete_snapshot(&self.session_id, &content_id)?;
                    }
                    self.snapshots.delete_snapshot(&self.session_id, &uri)?;
                    return Ok(false);
                }
                _ => {
                    if let SnapshotPayload::ModifyMeta {
                        priority: captured_priority,
                        disclosure: captured_disclosure,
                        ..
                    } = existing.data
                    {
                        priority = captured_priority;
                        disclosure = captured_disclosure;
                    }
                }
            }
        }

        let payload = SnapshotPayload::Delete {
            namespace: namespace.to_string(),
            path: path.to_string(),
            memory_id: memory.id,
            priority,
            disclosure,
        };
        self.snapshots.create_snapshot(&self.session_id, &uri, payload, true)
    }

    /// Resolve a live memory through its primary address, falling back to
    /// the other addresses recorded at capture time.
    fn resolve_live(
        &self,
        namespace: &str,
        path: &str,
        alternates: &[String],
    ) -> Result<Option<ResolvedMemory>> {
        if let Some(memory) = self.store.get_memory_by_path(path, namespace)? {
            return Ok(Some(memory));
        }

        for address in alternates {
            let Some((alt_namespace, alt_path)) = split_uri(address) else {
                continue;
            };
            if alt_namespace == namespace && alt_path == path {
                continue;
            }
            if let Some(memory) = self.store.get_memory_by_path(alt_path, alt_namespace)? {
                return Ok(Some(memory));
            }
        }

        Ok(None)
    }

    fn diff_created(
        &self,
        namespace: &str,
        path: &str,
    ) -> Result<(SideView, SideView, String, String, bool)> {
        let uri = format_uri(namespace, path);
        let header = format!("--- /dev/null\n+++ {uri}\n");

        match self.store.get_memory_by_path(path, namespace)? {
            None => Ok((
                SideView::empty(),
                SideView::deleted(),
                header,
                "Created then deleted".to_string(),
                false,
            )),
            Some(memory) => {
                let mut unified = header;
                for line in memory.content.lines() {
                    unified.push('+');
                    unified.push_str(line);
                    unified.push('\n');
                }
                let summary = format!(
                    "Created: +{} lines (rollback = delete)",
                    memory.content.lines().count()
                );
                Ok((SideView::empty(), SideView::of(&memory), unified, summary, true))
            }
        }
    }

    fn diff_deleted(
        &self,
        namespace: &str,
        path: &str,
        memory_id: MemoryId,
        priority: i64,
        disclosure: Option<String>,
    ) -> Result<(SideView, SideView, String, String, bool)> {
        // The captured content still lives in the entity store unless it
        // was purged in the meantime.
        let snapshot_content = self
            .store
            .get_memory_by_id(memory_id)?
            .map_or_else(|| PURGED_PLACEHOLDER.to_string(), |detail| detail.content);

        let snapshot_side =
            SideView { content: snapshot_content, priority: Some(priority), disclosure };

        let current = self.store.get_memory_by_path(path, namespace)?;
        let current_side = current.as_ref().map_or_else(SideView::deleted, SideView::of);

        let diff = unified_diff(&snapshot_side.content, &current_side.content);
        let summary = if current.is_none() {
            "Deleted (rollback = restore)".to_string()
        } else {
            // The address was recreated after the delete; show the drift.
            diff.summary
        };

        Ok((snapshot_side, current_side, diff.unified, summary, true))
    }

    fn diff_meta(
        &self,
        namespace: &str,
        path: &str,
        priority: i64,
        disclosure: Option<String>,
    ) -> Result<(SideView, SideView, String, String, bool)> {
        let snapshot_side =
            SideView { content: String::new(), priority: Some(priority), disclosure };

        let Some(current) = self.store.get_memory_by_path(path, namespace)? else {
            return Ok((
                snapshot_side,
                SideView::deleted(),
                String::new(),
                "Deleted".to_string(),
                true,
            ));
        };

        let current_side = SideView {
            content: String::new(),
            priority: Some(current.priority),
            disclosure: current.disclosure.clone(),
        };

        let mut changes = Vec::new();
        if snapshot_side.priority != current_side.priority {
            changes.push(format!(
                "priority: {} -> {}",
                display_option(snapshot_side.priority.as_ref()),
                display_option(current_side.priority.as_ref())
            ));
        }
        if snapshot_side.disclosure != current_side.disclosure {
            changes.push(format!(
                "disclosure: {} -> {}",
                display_option(snapshot_side.disclosure.as_ref()),
                display_option(current_side.disclosure.as_ref())
            ));
        }

        let has_changes = !changes.is_empty();
        let summary = if has_changes {
            format!("Metadata: {}", changes.join(", "))
        } else {
            "No changes".to_string()
        };

        Ok((snapshot_side, current_side, String::new(), summary, has_changes))
    }

    fn diff_content(
        &self,
        namespace: &str,
        path: &str,
        memory_id: MemoryId,
        alternates: &[String],
    ) -> Result<(SideView, SideView, String, String, bool)> {
        let snapshot_content = self
            .store
            .get_memory_by_id(memory_id)?
            .map_or_else(|| PURGED_PLACEHOLDER.to_string(), |detail| detail.content);
        let snapshot_side =
            SideView { content: snapshot_content, priority: None, disclosure: None };

        let current = self.resolve_live(namespace, path, alternates)?;
        let current_side = current.as_ref().map_or_else(SideView::deleted, SideView::of);

        let diff = unified_diff(&snapshot_side.content, &current_side.content);
        let has_changes = snapshot_side.content != current_side.content;

        Ok((snapshot_side, current_side, diff.unified, diff.summary, has_changes))
    }
}

fn outcome(
    resource_id: &str,
    status: RollbackStatus,
    message: String,
    new_version: Option<MemoryId>,
) -> RollbackOutcome {
    RollbackOutcome { resource_id: resource_id.to_string(), status, message, new_version }
}

fn display_option<T: std::fmt::Display>(value: Option<&T>) -> String {
    value.map_or_else(|| "(not set)".to_string(), ToString::to_string)
}
