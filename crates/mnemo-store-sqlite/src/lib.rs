use std::collections::BTreeSet;
use std::path::Path;

use mnemo_core::{
    format_uri, is_valid_segment, join_path, leaf_name, parent_path, snippet, ChildEntry,
    CreatedAlias, CreatedMemory, MemoryDetail, MemoryError, MemoryId, MigrationTarget,
    MigrationTargetDetail, OrphanCategory, OrphanDetail, OrphanEntry, PurgeOutcome, RemovedPath,
    ResolvedMemory, RestoredPath, RestoredVersion, UpdateFields, UpdateOutcome, MAX_CHAIN_HOPS,
};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction};
use time::OffsetDateTime;

type Result<T> = std::result::Result<T, MemoryError>;

pub const LATEST_SCHEMA_VERSION: i64 = 1;

const SNIPPET_CHARS: usize = 200;
const CHILD_SNIPPET_CHARS: usize = 100;
const BLOCKING_CHILD_SAMPLE: i64 = 5;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS memories (
  id          INTEGER PRIMARY KEY AUTOINCREMENT,
  content     TEXT NOT NULL,
  deprecated  INTEGER NOT NULL DEFAULT 0,
  migrated_to INTEGER,
  created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS paths (
  namespace  TEXT NOT NULL,
  path       TEXT NOT NULL,
  memory_id  INTEGER NOT NULL REFERENCES memories(id),
  priority   INTEGER NOT NULL DEFAULT 0,
  disclosure TEXT,
  created_at TEXT NOT NULL,
  PRIMARY KEY (namespace, path)
);

CREATE INDEX IF NOT EXISTS idx_paths_memory_id ON paths(memory_id);
CREATE INDEX IF NOT EXISTS idx_memories_deprecated ON memories(deprecated);
CREATE INDEX IF NOT EXISTS idx_memories_migrated_to ON memories(migrated_to);
";

/// Scope for a children query: either every alias of one memory, or the
/// virtual root of a namespace.
#[derive(Debug, Clone, Copy)]
pub enum ChildrenScope<'a> {
    Memory(MemoryId),
    Root(&'a str),
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open a `SQLite`-backed memory store and configure runtime pragmas.
    ///
    /// # Errors
    /// Returns [`MemoryError::Storage`] when the database cannot be opened
    /// or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|err| {
            MemoryError::Storage(format!("failed to open database at {}: {err}", path.display()))
        })?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|err| MemoryError::Storage(format!("failed to configure pragmas: {err}")))?;

        Ok(Self { conn })
    }

    /// Apply all forward migrations up to the latest schema version.
    ///
    /// # Errors
    /// Returns [`MemoryError::Storage`] when any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn.execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL).map_err(db_err)?;

        let version = self.schema_version()?;
        if version < 1 {
            self.conn.execute_batch(MIGRATION_001_SQL).map_err(db_err)?;
            self.conn
                .execute(
                    "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                    params![1_i64, now_rfc3339()?],
                )
                .map_err(db_err)?;
        }

        let version = self.schema_version()?;
        if version == LATEST_SCHEMA_VERSION {
            Ok(())
        } else {
            Err(MemoryError::Storage(format!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            )))
        }
    }

    /// Highest applied migration version, 0 for a fresh database.
    ///
    /// # Errors
    /// Returns [`MemoryError::Storage`] when schema metadata cannot be read.
    pub fn schema_version(&self) -> Result<i64> {
        self.conn.execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL).map_err(db_err)?;
        self.conn
            .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
                row.get::<_, i64>(0)
            })
            .map_err(db_err)
    }

    /// Resolve an active memory through its address.
    ///
    /// # Errors
    /// Returns [`MemoryError::Storage`] on query failure; an absent or
    /// deprecated target yields `Ok(None)`.
    pub fn get_memory_by_path(&self, path: &str, namespace: &str) -> Result<Option<ResolvedMemory>> {
        let row = self
            .conn
            .query_row(
                "SELECT m.id, m.content, p.priority, p.disclosure, m.created_at
                 FROM memories m
                 JOIN paths p ON p.memory_id = m.id
                 WHERE p.namespace = ?1 AND p.path = ?2 AND m.deprecated = 0",
                params![namespace, path],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(db_err)?;

        match row {
            Some((id, content, priority, disclosure, created_at)) => Ok(Some(ResolvedMemory {
                id: MemoryId(id),
                content,
                priority,
                disclosure,
                namespace: namespace.to_string(),
                path: path.to_string(),
                created_at: parse_rfc3339(&created_at)?,
            })),
            None => Ok(None),
        }
    }

    /// Fetch any memory version by id, including deprecated ones, with all
    /// addresses currently referencing it.
    ///
    /// # Errors
    /// Returns [`MemoryError::Storage`] on query failure.
    pub fn get_memory_by_id(&self, memory_id: MemoryId) -> Result<Option<MemoryDetail>> {
        let row = self
            .conn
            .query_row(
                "SELECT content, deprecated, migrated_to, created_at FROM memories WHERE id = ?1",
                params![memory_id.0],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .map_err(db_err)?;

        let Some((content, deprecated, migrated_to, created_at)) = row else {
            return Ok(None);
        };

        Ok(Some(MemoryDetail {
            id: memory_id,
            content,
            deprecated: deprecated != 0,
            migrated_to: migrated_to.map(MemoryId),
            created_at: parse_rfc3339(&created_at)?,
            addresses: addresses_for(&self.conn, memory_id)?,
        }))
    }

    /// Direct children, deduplicated by `(namespace, path)`.
    ///
    /// With a memory scope the union runs over ALL aliases of that memory,
    /// across namespaces: which sub-memories exist depends on what the
    /// memory IS, not on which address was used to reach it. With a root
    /// scope, top-level paths of the namespace.
    ///
    /// # Errors
    /// Returns [`MemoryError::Storage`] on query failure.
    pub fn get_children(&self, scope: ChildrenScope<'_>) -> Result<Vec<ChildEntry>> {
        let (sql, binds) = match scope {
            ChildrenScope::Root(namespace) => (
                "SELECT m.content, p.namespace, p.path, p.priority, p.disclosure
                 FROM memories m
                 JOIN paths p ON p.memory_id = m.id
                 WHERE p.namespace = ?1 AND m.deprecated = 0 AND p.path NOT LIKE '%/%'
                 ORDER BY p.priority ASC, p.path ASC"
                    .to_string(),
                vec![namespace.to_string()],
            ),
            ChildrenScope::Memory(memory_id) => {
                let parents = self.parent_addresses(memory_id)?;
                if parents.is_empty() {
                    return Ok(Vec::new());
                }

                let mut clauses = Vec::with_capacity(parents.len());
                let mut binds = Vec::with_capacity(parents.len() * 3);
                for (namespace, path) in &parents {
                    clauses.push(
                        "(p.namespace = ? AND p.path LIKE ? ESCAPE '\\' \
                         AND p.path NOT LIKE ? ESCAPE '\\')",
                    );
                    let safe = like_escape(path);
                    binds.push(namespace.clone());
                    binds.push(format!("{safe}/%"));
                    binds.push(format!("{safe}/%/%"));
                }

                (
                    format!(
                        "SELECT m.content, p.namespace, p.path, p.priority, p.disclosure
                         FROM memories m
                         JOIN paths p ON p.memory_id = m.id
                         WHERE m.deprecated = 0 AND ({})
                         ORDER BY p.priority ASC, p.path ASC",
                        clauses.join(" OR ")
                    ),
                    binds,
                )
            }
        };

        let mut stmt = self.conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params_from_iter(binds.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })
            .map_err(db_err)?;

        let mut seen = BTreeSet::new();
        let mut children = Vec::new();
        for row in rows {
            let (content, namespace, path, priority, disclosure) = row.map_err(db_err)?;
            if !seen.insert((namespace.clone(), path.clone())) {
                continue;
            }
            children.push(ChildEntry {
                name: leaf_name(&path).to_string(),
                content_snippet: snippet(&content, CHILD_SNIPPET_CHARS),
                namespace,
                path,
                priority,
                disclosure,
            });
        }

        Ok(children)
    }

    /// Create a new memory under a parent path, with either a caller-given
    /// leaf name or the next unused integer sibling.
    ///
    /// # Errors
    /// [`MemoryError::NotFound`] when the parent is missing,
    /// [`MemoryError::Validation`] for a malformed name,
    /// [`MemoryError::Conflict`] when the final address already exists.
    pub fn create_memory(
        &mut self,
        parent: &str,
        namespace: &str,
        content: &str,
        priority: i64,
        name: Option<&str>,
        disclosure: Option<&str>,
    ) -> Result<CreatedMemory> {
        if let Some(name) = name {
            if !is_valid_segment(name) {
                return Err(MemoryError::Validation(format!(
                    "name '{name}' may only contain alphanumerics, underscores, or hyphens"
                )));
            }
        }

        let tx = self.conn.transaction().map_err(db_err)?;

        if !parent.is_empty() && !path_exists(&tx, parent, namespace)? {
            return Err(MemoryError::NotFound(format!(
                "parent '{}' does not exist; create the parent first, or use '{namespace}://' as root",
                format_uri(namespace, parent)
            )));
        }

        let final_path = match name {
            Some(name) => join_path(parent, name),
            None => {
                let next = next_numeric_child(&tx, parent, namespace)?;
                join_path(parent, &next.to_string())
            }
        };

        if path_exists(&tx, &final_path, namespace)? {
            return Err(MemoryError::Conflict(format!(
                "path '{}' already exists",
                format_uri(namespace, &final_path)
            )));
        }

        let now = now_rfc3339()?;
        tx.execute(
            "INSERT INTO memories(content, deprecated, migrated_to, created_at)
             VALUES (?1, 0, NULL, ?2)",
            params![content, now],
        )
        .map_err(db_err)?;
        let memory_id = MemoryId(tx.last_insert_rowid());

        tx.execute(
            "INSERT INTO paths(namespace, path, memory_id, priority, disclosure, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![namespace, final_path, memory_id.0, priority, disclosure, now],
        )
        .map_err(db_err)?;

        tx.commit().map_err(db_err)?;

        Ok(CreatedMemory {
            id: memory_id,
            uri: format_uri(namespace, &final_path),
            namespace: namespace.to_string(),
            path: final_path,
            priority,
        })
    }

    /// Update a memory. A content update always creates a new version, even
    /// when the payload is byte-identical to the current content: the
    /// caller may have read and recomputed across two transactions, and a
    /// skip-if-unchanged shortcut silently drops such writes. The old row
    /// is deprecated with its migration pointer set, and every alias is
    /// repointed in the same transaction. Metadata-only updates touch only
    /// the addressed path row.
    ///
    /// # Errors
    /// [`MemoryError::Validation`] when no field is supplied,
    /// [`MemoryError::NotFound`] when the address does not resolve.
    pub fn update_memory(
        &mut self,
        path: &str,
        namespace: &str,
        fields: &UpdateFields,
    ) -> Result<UpdateOutcome> {
        if fields.is_empty() {
            return Err(MemoryError::Validation(format!(
                "no update fields provided for '{}'; set at least one of content, priority, or disclosure",
                format_uri(namespace, path)
            )));
        }

        let tx = self.conn.transaction().map_err(db_err)?;

        let old_id = tx
            .query_row(
                "SELECT m.id
                 FROM memories m
                 JOIN paths p ON p.memory_id = m.id
                 WHERE p.namespace = ?1 AND p.path = ?2 AND m.deprecated = 0",
                params![namespace, path],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| {
                MemoryError::NotFound(format!(
                    "path '{}' not found or memory is deprecated",
                    format_uri(namespace, path)
                ))
            })?;

        if let Some(priority) = fields.priority {
            tx.execute(
                "UPDATE paths SET priority = ?1 WHERE namespace = ?2 AND path = ?3",
                params![priority, namespace, path],
            )
            .map_err(db_err)?;
        }
        if let Some(disclosure) = &fields.disclosure {
            tx.execute(
                "UPDATE paths SET disclosure = ?1 WHERE namespace = ?2 AND path = ?3",
                params![disclosure, namespace, path],
            )
            .map_err(db_err)?;
        }

        let mut new_id = old_id;
        if let Some(content) = &fields.content {
            tx.execute(
                "INSERT INTO memories(content, deprecated, migrated_to, created_at)
                 VALUES (?1, 0, NULL, ?2)",
                params![content, now_rfc3339()?],
            )
            .map_err(db_err)?;
            new_id = tx.last_insert_rowid();

            tx.execute(
                "UPDATE memories SET deprecated = 1, migrated_to = ?1 WHERE id = ?2",
                params![new_id, old_id],
            )
            .map_err(db_err)?;

            // All aliases move together, in every namespace.
            tx.execute(
                "UPDATE paths SET memory_id = ?1 WHERE memory_id = ?2",
                params![new_id, old_id],
            )
            .map_err(db_err)?;
        }

        tx.commit().map_err(db_err)?;

        Ok(UpdateOutcome {
            uri: format_uri(namespace, path),
            old_memory_id: MemoryId(old_id),
            new_memory_id: MemoryId(new_id),
        })
    }

    /// Repoint an address to an earlier version: the current memory is
    /// deprecated with its pointer aimed at the target, the target is
    /// reactivated (`deprecated` and `migrated_to` cleared), and every
    /// alias of the current memory follows.
    ///
    /// # Errors
    /// [`MemoryError::NotFound`] when the path or the target id is missing.
    pub fn rollback_to_memory(
        &mut self,
        path: &str,
        namespace: &str,
        target: MemoryId,
    ) -> Result<RestoredVersion> {
        let tx = self.conn.transaction().map_err(db_err)?;

        let current_id = tx
            .query_row(
                "SELECT memory_id FROM paths WHERE namespace = ?1 AND path = ?2",
                params![namespace, path],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| {
                MemoryError::NotFound(format!("path '{}' not found", format_uri(namespace, path)))
            })?;

        if !memory_exists(&tx, target)? {
            return Err(MemoryError::NotFound(format!("target memory {target} not found")));
        }

        tx.execute(
            "UPDATE memories SET deprecated = 1, migrated_to = ?1 WHERE id = ?2",
            params![target.0, current_id],
        )
        .map_err(db_err)?;

        tx.execute(
            "UPDATE memories SET deprecated = 0, migrated_to = NULL WHERE id = ?1",
            params![target.0],
        )
        .map_err(db_err)?;

        tx.execute(
            "UPDATE paths SET memory_id = ?1 WHERE memory_id = ?2",
            params![target.0, current_id],
        )
        .map_err(db_err)?;

        tx.commit().map_err(db_err)?;

        Ok(RestoredVersion {
            uri: format_uri(namespace, path),
            old_memory_id: MemoryId(current_id),
            restored_memory_id: target,
        })
    }

    /// Create an alias address resolving to the same memory as the target
    /// address. Aliases may cross namespaces.
    ///
    /// # Errors
    /// [`MemoryError::NotFound`] when the target or the alias parent is
    /// missing, [`MemoryError::Conflict`] when the alias address exists.
    pub fn add_path(
        &mut self,
        new_path: &str,
        new_namespace: &str,
        target_path: &str,
        target_namespace: &str,
        priority: i64,
        disclosure: Option<&str>,
    ) -> Result<CreatedAlias> {
        let tx = self.conn.transaction().map_err(db_err)?;

        let target_id = tx
            .query_row(
                "SELECT memory_id FROM paths WHERE namespace = ?1 AND path = ?2",
                params![target_namespace, target_path],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| {
                MemoryError::NotFound(format!(
                    "target path '{}' not found",
                    format_uri(target_namespace, target_path)
                ))
            })?;

        if let Some(parent) = parent_path(new_path) {
            if !path_exists(&tx, parent, new_namespace)? {
                return Err(MemoryError::NotFound(format!(
                    "parent '{}' does not exist; create the parent first, or use a shallower alias path",
                    format_uri(new_namespace, parent)
                )));
            }
        }

        if path_exists(&tx, new_path, new_namespace)? {
            return Err(MemoryError::Conflict(format!(
                "path '{}' already exists",
                format_uri(new_namespace, new_path)
            )));
        }

        tx.execute(
            "INSERT INTO paths(namespace, path, memory_id, priority, disclosure, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![new_namespace, new_path, target_id, priority, disclosure, now_rfc3339()?],
        )
        .map_err(db_err)?;

        tx.commit().map_err(db_err)?;

        Ok(CreatedAlias {
            new_uri: format_uri(new_namespace, new_path),
            target_uri: format_uri(target_namespace, target_path),
            memory_id: MemoryId(target_id),
        })
    }

    /// Remove an address without touching the memory it references.
    /// Deletion proceeds bottom-up: an address with descendants is refused,
    /// naming a sample of the blocking children.
    ///
    /// # Errors
    /// [`MemoryError::NotFound`] when absent, [`MemoryError::Conflict`]
    /// when descendants exist.
    pub fn remove_path(&mut self, path: &str, namespace: &str) -> Result<RemovedPath> {
        let tx = self.conn.transaction().map_err(db_err)?;

        let memory_id = tx
            .query_row(
                "SELECT memory_id FROM paths WHERE namespace = ?1 AND path = ?2",
                params![namespace, path],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| {
                MemoryError::NotFound(format!("path '{}' not found", format_uri(namespace, path)))
            })?;

        let child_pattern = format!("{}/%", like_escape(path));
        let child_count: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM paths WHERE namespace = ?1 AND path LIKE ?2 ESCAPE '\\'",
                params![namespace, child_pattern],
                |row| row.get(0),
            )
            .map_err(db_err)?;

        if child_count > 0 {
            let mut stmt = tx
                .prepare(
                    "SELECT path FROM paths
                     WHERE namespace = ?1 AND path LIKE ?2 ESCAPE '\\'
                     ORDER BY path ASC LIMIT ?3",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![namespace, child_pattern, BLOCKING_CHILD_SAMPLE], |row| {
                    row.get::<_, String>(0)
                })
                .map_err(db_err)?;

            let mut sample = Vec::new();
            for row in rows {
                sample.push(format_uri(namespace, &row.map_err(db_err)?));
            }
            let listing = sample.join(", ");
            let remainder = usize::try_from(child_count).unwrap_or(usize::MAX);
            let suffix = if remainder > sample.len() {
                format!(" (and {} more)", remainder - sample.len())
            } else {
                String::new()
            };

            return Err(MemoryError::Conflict(format!(
                "cannot delete '{}': it still has {child_count} child path(s); delete children first: {listing}{suffix}",
                format_uri(namespace, path)
            )));
        }

        tx.execute(
            "DELETE FROM paths WHERE namespace = ?1 AND path = ?2",
            params![namespace, path],
        )
        .map_err(db_err)?;

        tx.commit().map_err(db_err)?;

        Ok(RemovedPath { uri: format_uri(namespace, path), memory_id: MemoryId(memory_id) })
    }

    /// Recreate an address pointing at a specific memory version,
    /// reactivating the version if it was deprecated in the meantime.
    /// Used by rollback-of-delete.
    ///
    /// # Errors
    /// [`MemoryError::NotFound`] when the memory row no longer exists,
    /// [`MemoryError::Conflict`] when the address was recreated by someone
    /// else.
    pub fn restore_path(
        &mut self,
        path: &str,
        namespace: &str,
        memory_id: MemoryId,
        priority: i64,
        disclosure: Option<&str>,
    ) -> Result<RestoredPath> {
        let tx = self.conn.transaction().map_err(db_err)?;

        if !memory_exists(&tx, memory_id)? {
            return Err(MemoryError::NotFound(format!("memory {memory_id} not found")));
        }

        // The referenced version may have been deprecated by a later update;
        // it must become visible again for the restored address to resolve.
        tx.execute("UPDATE memories SET deprecated = 0 WHERE id = ?1", params![memory_id.0])
            .map_err(db_err)?;

        if path_exists(&tx, path, namespace)? {
            return Err(MemoryError::Conflict(format!(
                "path '{}' already exists",
                format_uri(namespace, path)
            )));
        }

        tx.execute(
            "INSERT INTO paths(namespace, path, memory_id, priority, disclosure, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![namespace, path, memory_id.0, priority, disclosure, now_rfc3339()?],
        )
        .map_err(db_err)?;

        tx.commit().map_err(db_err)?;

        Ok(RestoredPath { uri: format_uri(namespace, path), memory_id })
    }

    /// Write both metadata columns of a path row unconditionally. Used by
    /// rollback-of-metadata, where a captured NULL disclosure must be
    /// restored as NULL.
    ///
    /// # Errors
    /// [`MemoryError::NotFound`] when the address does not exist.
    pub fn set_path_meta(
        &mut self,
        path: &str,
        namespace: &str,
        priority: i64,
        disclosure: Option<&str>,
    ) -> Result<()> {
        let tx = self.conn.transaction().map_err(db_err)?;

        let updated = tx
            .execute(
                "UPDATE paths SET priority = ?1, disclosure = ?2 WHERE namespace = ?3 AND path = ?4",
                params![priority, disclosure, namespace, path],
            )
            .map_err(db_err)?;

        if updated == 0 {
            return Err(MemoryError::NotFound(format!(
                "path '{}' not found",
                format_uri(namespace, path)
            )));
        }

        tx.commit().map_err(db_err)?;
        Ok(())
    }

    /// Permanently delete a memory version, repairing the chain so any
    /// pointer aimed at it skips to its own successor (A→B→C, delete B ⇒
    /// A→C), and removing any path rows that still reference it.
    ///
    /// With `require_orphan` the orphan check (deprecated or path-less)
    /// runs inside the delete transaction, closing the check-then-act race
    /// within this process; a second process can still recreate a path
    /// between its own check and this delete.
    ///
    /// # Errors
    /// [`MemoryError::NotFound`] for a missing id;
    /// [`MemoryError::PermissionDenied`] when `require_orphan` finds the
    /// memory has gained active paths.
    pub fn permanently_delete(
        &mut self,
        memory_id: MemoryId,
        require_orphan: bool,
    ) -> Result<PurgeOutcome> {
        let tx = self.conn.transaction().map_err(db_err)?;

        let target = tx
            .query_row(
                "SELECT deprecated, migrated_to FROM memories WHERE id = ?1",
                params![memory_id.0],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<i64>>(1)?)),
            )
            .optional()
            .map_err(db_err)?;

        let Some((deprecated, successor)) = target else {
            return Err(MemoryError::NotFound(format!("memory {memory_id} not found")));
        };

        if require_orphan && deprecated == 0 {
            let path_count: i64 = tx
                .query_row(
                    "SELECT COUNT(*) FROM paths WHERE memory_id = ?1",
                    params![memory_id.0],
                    |row| row.get(0),
                )
                .map_err(db_err)?;
            if path_count > 0 {
                return Err(MemoryError::PermissionDenied(format!(
                    "memory {memory_id} is no longer an orphan (has {path_count} active path(s)); deletion aborted"
                )));
            }
        }

        tx.execute(
            "UPDATE memories SET migrated_to = ?1 WHERE migrated_to = ?2",
            params![successor, memory_id.0],
        )
        .map_err(db_err)?;

        tx.execute("DELETE FROM paths WHERE memory_id = ?1", params![memory_id.0])
            .map_err(db_err)?;
        tx.execute("DELETE FROM memories WHERE id = ?1", params![memory_id.0]).map_err(db_err)?;

        tx.commit().map_err(db_err)?;

        Ok(PurgeOutcome { deleted_memory_id: memory_id, chain_repaired_to: successor.map(MemoryId) })
    }

    /// All orphan memories: deprecated versions left behind by updates,
    /// and non-deprecated memories with no address (left behind by path
    /// deletion). Deprecated entries carry their resolved migration target
    /// so a reviewer sees where content moved without opening each version.
    ///
    /// # Errors
    /// Returns [`MemoryError::Storage`] on query failure.
    pub fn list_orphans(&self) -> Result<Vec<OrphanEntry>> {
        let mut orphans = Vec::new();

        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, content, migrated_to, created_at FROM memories
                 WHERE deprecated = 1
                 ORDER BY created_at DESC, id DESC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(db_err)?;

        for row in rows {
            let (id, content, migrated_to, created_at) = row.map_err(db_err)?;
            let migration_target = match migrated_to {
                Some(next) => match follow_chain(&self.conn, MemoryId(next))? {
                    ChainWalk::Terminal(detail) => Some(MigrationTarget {
                        id: detail.id,
                        addresses: detail.addresses,
                        content_snippet: snippet(&detail.content, SNIPPET_CHARS),
                    }),
                    ChainWalk::Broken(_) => None,
                },
                None => None,
            };

            orphans.push(OrphanEntry {
                id: MemoryId(id),
                content_snippet: snippet(&content, SNIPPET_CHARS),
                created_at: parse_rfc3339(&created_at)?,
                deprecated: true,
                migrated_to: migrated_to.map(MemoryId),
                category: OrphanCategory::Deprecated,
                migration_target,
            });
        }

        let mut stmt = self
            .conn
            .prepare(
                "SELECT m.id, m.content, m.migrated_to, m.created_at
                 FROM memories m
                 LEFT JOIN paths p ON p.memory_id = m.id
                 WHERE m.deprecated = 0 AND p.memory_id IS NULL
                 ORDER BY m.created_at DESC, m.id DESC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(db_err)?;

        for row in rows {
            let (id, content, migrated_to, created_at) = row.map_err(db_err)?;
            orphans.push(OrphanEntry {
                id: MemoryId(id),
                content_snippet: snippet(&content, SNIPPET_CHARS),
                created_at: parse_rfc3339(&created_at)?,
                deprecated: false,
                migrated_to: migrated_to.map(MemoryId),
                category: OrphanCategory::Orphaned,
                migration_target: None,
            });
        }

        Ok(orphans)
    }

    /// Full orphan content plus the full content of its resolved migration
    /// target, for the reviewer's comparison view.
    ///
    /// # Errors
    /// Returns [`MemoryError::Storage`] on query failure.
    pub fn orphan_detail(&self, memory_id: MemoryId) -> Result<Option<OrphanDetail>> {
        let Some(detail) = self.get_memory_by_id(memory_id)? else {
            return Ok(None);
        };

        let category = if detail.deprecated {
            OrphanCategory::Deprecated
        } else if detail.addresses.is_empty() {
            OrphanCategory::Orphaned
        } else {
            OrphanCategory::Active
        };

        let migration_target = match detail.migrated_to {
            Some(next) => match follow_chain(&self.conn, next)? {
                ChainWalk::Terminal(target) => Some(MigrationTargetDetail {
                    id: target.id,
                    content: target.content,
                    addresses: target.addresses,
                    created_at: target.created_at,
                }),
                ChainWalk::Broken(_) => None,
            },
            None => None,
        };

        Ok(Some(OrphanDetail {
            id: detail.id,
            content: detail.content,
            created_at: detail.created_at,
            deprecated: detail.deprecated,
            migrated_to: detail.migrated_to,
            category,
            migration_target,
        }))
    }

    /// Follow the migration chain from a memory to its terminal version.
    /// Fails closed rather than looping: a cycle, a missing link, or an
    /// over-long chain is reported as broken.
    ///
    /// # Errors
    /// [`MemoryError::NotFound`] when the starting id is missing,
    /// [`MemoryError::BrokenChain`] when traversal cannot terminate.
    pub fn resolve_chain_target(&self, memory_id: MemoryId) -> Result<MemoryDetail> {
        if self.get_memory_by_id(memory_id)?.is_none() {
            return Err(MemoryError::NotFound(format!("memory {memory_id} not found")));
        }

        match follow_chain(&self.conn, memory_id)? {
            ChainWalk::Terminal(detail) => Ok(detail),
            ChainWalk::Broken(reason) => Err(MemoryError::BrokenChain(reason)),
        }
    }

    fn parent_addresses(&self, memory_id: MemoryId) -> Result<Vec<(String, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT namespace, path FROM paths WHERE memory_id = ?1 ORDER BY namespace, path")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![memory_id.0], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(db_err)?;

        let mut parents = Vec::new();
        for row in rows {
            parents.push(row.map_err(db_err)?);
        }
        Ok(parents)
    }
}

enum ChainWalk {
    Terminal(MemoryDetail),
    Broken(String),
}

fn follow_chain(conn: &Connection, start: MemoryId) -> Result<ChainWalk> {
    let mut visited: BTreeSet<i64> = BTreeSet::new();
    let mut current = start;

    for _ in 0..MAX_CHAIN_HOPS {
        if !visited.insert(current.0) {
            return Ok(ChainWalk::Broken(format!(
                "migration chain from {start} revisits memory {current}"
            )));
        }

        let row = conn
            .query_row(
                "SELECT content, deprecated, migrated_to, created_at FROM memories WHERE id = ?1",
                params![current.0],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .map_err(db_err)?;

        let Some((content, deprecated, migrated_to, created_at)) = row else {
            return Ok(ChainWalk::Broken(format!(
                "migration chain from {start} references missing memory {current}"
            )));
        };

        match migrated_to {
            None => {
                return Ok(ChainWalk::Terminal(MemoryDetail {
                    id: current,
                    content,
                    deprecated: deprecated != 0,
                    migrated_to: None,
                    created_at: parse_rfc3339(&created_at)?,
                    addresses: addresses_for(conn, current)?,
                }));
            }
            Some(next) => current = MemoryId(next),
        }
    }

    Ok(ChainWalk::Broken(format!(
        "migration chain from {start} exceeded {MAX_CHAIN_HOPS} hops"
    )))
}

fn addresses_for(conn: &Connection, memory_id: MemoryId) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT namespace, path FROM paths WHERE memory_id = ?1 ORDER BY namespace, path")
        .map_err(db_err)?;
    let rows = stmt
        .query_map(params![memory_id.0], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(db_err)?;

    let mut addresses = Vec::new();
    for row in rows {
        let (namespace, path) = row.map_err(db_err)?;
        addresses.push(format_uri(&namespace, &path));
    }
    Ok(addresses)
}

fn path_exists(tx: &Transaction<'_>, path: &str, namespace: &str) -> Result<bool> {
    let exists: i64 = tx
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM paths WHERE namespace = ?1 AND path = ?2)",
            params![namespace, path],
            |row| row.get(0),
        )
        .map_err(db_err)?;
    Ok(exists == 1)
}

fn memory_exists(tx: &Transaction<'_>, memory_id: MemoryId) -> Result<bool> {
    let exists: i64 = tx
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM memories WHERE id = ?1)",
            params![memory_id.0],
            |row| row.get(0),
        )
        .map_err(db_err)?;
    Ok(exists == 1)
}

fn next_numeric_child(tx: &Transaction<'_>, parent: &str, namespace: &str) -> Result<i64> {
    let prefix = if parent.is_empty() { String::new() } else { format!("{parent}/") };

    let (sql, binds): (&str, Vec<String>) = if parent.is_empty() {
        ("SELECT path FROM paths WHERE namespace = ?", vec![namespace.to_string()])
    } else {
        (
            "SELECT path FROM paths WHERE namespace = ? AND path LIKE ? ESCAPE '\\'",
            vec![namespace.to_string(), format!("{}/%", like_escape(parent))],
        )
    };

    let mut stmt = tx.prepare(sql).map_err(db_err)?;
    let rows = stmt
        .query_map(params_from_iter(binds.iter()), |row| row.get::<_, String>(0))
        .map_err(db_err)?;

    let mut max_num = 0_i64;
    for row in rows {
        let path = row.map_err(db_err)?;
        let Some(remainder) = path.strip_prefix(&prefix) else {
            continue;
        };
        if remainder.contains('/') {
            continue;
        }
        if let Ok(num) = remainder.parse::<i64>() {
            max_num = max_num.max(num);
        }
    }

    Ok(max_num + 1)
}

fn like_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn db_err(err: rusqlite::Error) -> MemoryError {
    MemoryError::Storage(err.to_string())
}

fn now_rfc3339() -> Result<String> {
    rfc3339(OffsetDateTime::now_utc())
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| MemoryError::Storage(format!("failed to format RFC3339 timestamp: {err}")))
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .map_err(|err| MemoryError::Storage(format!("invalid RFC3339 timestamp '{value}': {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_store() -> SqliteStore {
        let mut store = match SqliteStore::open(Path::new(":memory:")) {
            Ok(store) => store,
            Err(err) => panic!("store should open: {err}"),
        };
        if let Err(err) = store.migrate() {
            panic!("store should migrate: {err}");
        }
        store
    }

    fn create(
        store: &mut SqliteStore,
        parent: &str,
        namespace: &str,
        content: &str,
        priority: i64,
        name: Option<&str>,
    ) -> CreatedMemory {
        match store.create_memory(parent, namespace, content, priority, name, None) {
            Ok(created) => created,
            Err(err) => panic!("create should succeed for {parent:?}/{name:?}: {err}"),
        }
    }

    fn update_content(store: &mut SqliteStore, path: &str, namespace: &str, content: &str) -> UpdateOutcome {
        let fields = UpdateFields { content: Some(content.to_string()), ..UpdateFields::default() };
        match store.update_memory(path, namespace, &fields) {
            Ok(outcome) => outcome,
            Err(err) => panic!("update should succeed for {path}: {err}"),
        }
    }

    fn read(store: &SqliteStore, path: &str, namespace: &str) -> ResolvedMemory {
        match store.get_memory_by_path(path, namespace) {
            Ok(Some(memory)) => memory,
            Ok(None) => panic!("'{namespace}://{path}' should resolve"),
            Err(err) => panic!("read should succeed: {err}"),
        }
    }

    #[test]
    fn create_then_read_round_trips() {
        let mut store = mk_store();
        let created = match store.create_memory("", "core", "the content", 3, Some("a"), Some("when asked")) {
            Ok(created) => created,
            Err(err) => panic!("create should succeed: {err}"),
        };

        assert_eq!(created.uri, "core://a");
        let memory = read(&store, "a", "core");
        assert_eq!(memory.id, created.id);
        assert_eq!(memory.content, "the content");
        assert_eq!(memory.priority, 3);
        assert_eq!(memory.disclosure.as_deref(), Some("when asked"));
    }

    #[test]
    fn create_rejects_missing_parent_bad_name_and_collision() {
        let mut store = mk_store();

        let missing = store.create_memory("nope", "core", "x", 0, Some("a"), None);
        assert!(matches!(missing, Err(MemoryError::NotFound(_))));

        let bad_name = store.create_memory("", "core", "x", 0, Some("a b"), None);
        assert!(matches!(bad_name, Err(MemoryError::Validation(_))));

        create(&mut store, "", "core", "x", 0, Some("a"));
        let collision = store.create_memory("", "core", "y", 0, Some("a"), None);
        assert!(matches!(collision, Err(MemoryError::Conflict(_))));
    }

    #[test]
    fn auto_naming_picks_next_free_integer_sibling() {
        let mut store = mk_store();
        let first = create(&mut store, "", "core", "x", 0, None);
        assert_eq!(first.path, "1");

        create(&mut store, "", "core", "y", 0, Some("7"));
        let next = create(&mut store, "", "core", "z", 0, None);
        assert_eq!(next.path, "8");

        // Numbering is scoped per parent.
        create(&mut store, "", "core", "p", 0, Some("parent"));
        let nested = create(&mut store, "parent", "core", "c", 0, None);
        assert_eq!(nested.path, "parent/1");
    }

    #[test]
    fn namespaces_partition_the_address_space() {
        let mut store = mk_store();
        create(&mut store, "", "core", "core content", 0, Some("a"));
        create(&mut store, "", "notes", "notes content", 0, Some("a"));

        assert_eq!(read(&store, "a", "core").content, "core content");
        assert_eq!(read(&store, "a", "notes").content, "notes content");
    }

    #[test]
    fn update_requires_at_least_one_field() {
        let mut store = mk_store();
        create(&mut store, "", "core", "x", 0, Some("a"));
        let err = store.update_memory("a", "core", &UpdateFields::default());
        assert!(matches!(err, Err(MemoryError::Validation(_))));
    }

    #[test]
    fn content_update_always_creates_a_new_version() {
        let mut store = mk_store();
        let created = create(&mut store, "", "core", "same", 0, Some("a"));

        // Byte-identical content still versions; equality shortcuts dropped
        // writes when content was read and recomputed across transactions.
        let outcome = update_content(&mut store, "a", "core", "same");
        assert_eq!(outcome.old_memory_id, created.id);
        assert_ne!(outcome.new_memory_id, created.id);

        let old = match store.get_memory_by_id(created.id) {
            Ok(Some(detail)) => detail,
            Ok(None) => panic!("old version should be retained"),
            Err(err) => panic!("lookup should succeed: {err}"),
        };
        assert!(old.deprecated);
        assert_eq!(old.migrated_to, Some(outcome.new_memory_id));
        assert!(old.addresses.is_empty());

        assert_eq!(read(&store, "a", "core").id, outcome.new_memory_id);
    }

    #[test]
    fn content_update_repoints_every_alias() {
        let mut store = mk_store();
        let created = create(&mut store, "", "core", "shared", 0, Some("a"));
        if let Err(err) = store.add_path("mirror", "notes", "a", "core", 1, None) {
            panic!("alias should succeed: {err}");
        }

        let outcome = update_content(&mut store, "a", "core", "v2");

        assert_eq!(read(&store, "a", "core").id, outcome.new_memory_id);
        assert_eq!(read(&store, "mirror", "notes").id, outcome.new_memory_id);
        assert_ne!(outcome.new_memory_id, created.id);
    }

    #[test]
    fn metadata_update_touches_only_the_addressed_path() {
        let mut store = mk_store();
        let created = create(&mut store, "", "core", "x", 0, Some("a"));
        if let Err(err) = store.add_path("mirror", "notes", "a", "core", 9, None) {
            panic!("alias should succeed: {err}");
        }

        let fields = UpdateFields { priority: Some(5), ..UpdateFields::default() };
        let outcome = match store.update_memory("a", "core", &fields) {
            Ok(outcome) => outcome,
            Err(err) => panic!("meta update should succeed: {err}"),
        };

        assert_eq!(outcome.old_memory_id, outcome.new_memory_id);
        assert_eq!(outcome.new_memory_id, created.id);
        assert_eq!(read(&store, "a", "core").priority, 5);
        assert_eq!(read(&store, "mirror", "notes").priority, 9);
    }

    #[test]
    fn rollback_reactivates_target_and_deprecates_current() {
        let mut store = mk_store();
        let created = create(&mut store, "", "core", "v1", 0, Some("a"));
        let updated = update_content(&mut store, "a", "core", "v2");

        let restored = match store.rollback_to_memory("a", "core", created.id) {
            Ok(restored) => restored,
            Err(err) => panic!("rollback should succeed: {err}"),
        };
        assert_eq!(restored.old_memory_id, updated.new_memory_id);
        assert_eq!(restored.restored_memory_id, created.id);

        let head = read(&store, "a", "core");
        assert_eq!(head.id, created.id);
        assert_eq!(head.content, "v1");

        let skipped = match store.get_memory_by_id(updated.new_memory_id) {
            Ok(Some(detail)) => detail,
            Ok(None) => panic!("skipped version should remain"),
            Err(err) => panic!("lookup should succeed: {err}"),
        };
        assert!(skipped.deprecated);
        assert_eq!(skipped.migrated_to, Some(created.id));
    }

    #[test]
    fn rollback_rejects_missing_path_or_target() {
        let mut store = mk_store();
        create(&mut store, "", "core", "x", 0, Some("a"));

        assert!(matches!(
            store.rollback_to_memory("missing", "core", MemoryId(1)),
            Err(MemoryError::NotFound(_))
        ));
        assert!(matches!(
            store.rollback_to_memory("a", "core", MemoryId(999)),
            Err(MemoryError::NotFound(_))
        ));
    }

    #[test]
    fn children_are_a_property_of_identity_not_address() {
        let mut store = mk_store();
        create(&mut store, "", "core", "hub", 0, Some("hub"));
        let hub_id = read(&store, "hub", "core").id;

        if let Err(err) = store.add_path("alias_hub", "notes", "hub", "core", 0, None) {
            panic!("alias should succeed: {err}");
        }

        create(&mut store, "hub", "core", "left child", 1, Some("left"));
        create(&mut store, "alias_hub", "notes", "right child", 0, Some("right"));
        // Grandchildren are not direct children.
        create(&mut store, "hub/left", "core", "deep", 0, Some("deep"));

        let children = match store.get_children(ChildrenScope::Memory(hub_id)) {
            Ok(children) => children,
            Err(err) => panic!("children query should succeed: {err}"),
        };

        let addresses: Vec<String> =
            children.iter().map(|child| format_uri(&child.namespace, &child.path)).collect();
        assert_eq!(addresses, vec!["notes://alias_hub/right", "core://hub/left"]);
    }

    #[test]
    fn root_children_list_top_level_paths_only() {
        let mut store = mk_store();
        create(&mut store, "", "core", "one", 2, Some("one"));
        create(&mut store, "", "core", "two", 1, Some("two"));
        create(&mut store, "one", "core", "nested", 0, Some("nested"));
        create(&mut store, "", "notes", "elsewhere", 0, Some("other"));

        let roots = match store.get_children(ChildrenScope::Root("core")) {
            Ok(children) => children,
            Err(err) => panic!("root query should succeed: {err}"),
        };

        let paths: Vec<&str> = roots.iter().map(|child| child.path.as_str()).collect();
        assert_eq!(paths, vec!["two", "one"]);
    }

    #[test]
    fn remove_path_blocks_until_children_are_gone() {
        let mut store = mk_store();
        create(&mut store, "", "core", "p", 0, Some("parent"));
        create(&mut store, "parent", "core", "c", 0, Some("child"));

        let blocked = store.remove_path("parent", "core");
        match blocked {
            Err(MemoryError::Conflict(message)) => {
                assert!(message.contains("core://parent/child"), "message was: {message}");
            }
            other => panic!("expected conflict, got {other:?}"),
        }

        if let Err(err) = store.remove_path("parent/child", "core") {
            panic!("child removal should succeed: {err}");
        }
        if let Err(err) = store.remove_path("parent", "core") {
            panic!("parent removal should succeed after children: {err}");
        }
    }

    #[test]
    fn orphan_listing_is_exactly_deprecated_plus_pathless() {
        let mut store = mk_store();
        let kept = create(&mut store, "", "core", "kept", 0, Some("kept"));
        let updated = create(&mut store, "", "core", "v1", 0, Some("updated"));
        let outcome = update_content(&mut store, "updated", "core", "v2");
        let unlinked = create(&mut store, "", "core", "unlinked", 0, Some("gone"));
        if let Err(err) = store.remove_path("gone", "core") {
            panic!("remove should succeed: {err}");
        }

        let orphans = match store.list_orphans() {
            Ok(orphans) => orphans,
            Err(err) => panic!("orphan listing should succeed: {err}"),
        };

        let ids: BTreeSet<i64> = orphans.iter().map(|orphan| orphan.id.0).collect();
        assert_eq!(ids, BTreeSet::from([updated.id.0, unlinked.id.0]));
        assert!(!ids.contains(&kept.id.0));
        assert!(!ids.contains(&outcome.new_memory_id.0));

        let deprecated = orphans
            .iter()
            .find(|orphan| orphan.id == updated.id)
            .unwrap_or_else(|| panic!("deprecated orphan should be listed"));
        assert_eq!(deprecated.category, OrphanCategory::Deprecated);
        let target = deprecated
            .migration_target
            .as_ref()
            .unwrap_or_else(|| panic!("deprecated orphan should resolve its successor"));
        assert_eq!(target.id, outcome.new_memory_id);
        assert_eq!(target.addresses, vec!["core://updated".to_string()]);

        let pathless = orphans
            .iter()
            .find(|orphan| orphan.id == unlinked.id)
            .unwrap_or_else(|| panic!("path-less orphan should be listed"));
        assert_eq!(pathless.category, OrphanCategory::Orphaned);
        assert!(pathless.migration_target.is_none());
    }

    #[test]
    fn orphan_detail_carries_full_contents_for_comparison() {
        let mut store = mk_store();
        let created = create(&mut store, "", "core", "original text", 0, Some("a"));
        update_content(&mut store, "a", "core", "revised text");

        let detail = match store.orphan_detail(created.id) {
            Ok(Some(detail)) => detail,
            Ok(None) => panic!("orphan should exist"),
            Err(err) => panic!("detail should succeed: {err}"),
        };

        assert_eq!(detail.category, OrphanCategory::Deprecated);
        assert_eq!(detail.content, "original text");
        let target = detail
            .migration_target
            .unwrap_or_else(|| panic!("detail should resolve the successor"));
        assert_eq!(target.content, "revised text");
    }

    #[test]
    fn restore_path_reactivates_and_detects_collisions() {
        let mut store = mk_store();
        let created = create(&mut store, "", "core", "v1", 0, Some("a"));
        update_content(&mut store, "a", "core", "v2");
        if let Err(err) = store.remove_path("a", "core") {
            panic!("remove should succeed: {err}");
        }

        // created.id is deprecated now; restoring must make it visible again.
        let restored = match store.restore_path("a", "core", created.id, 4, Some("again")) {
            Ok(restored) => restored,
            Err(err) => panic!("restore should succeed: {err}"),
        };
        assert_eq!(restored.memory_id, created.id);
        let memory = read(&store, "a", "core");
        assert_eq!(memory.id, created.id);
        assert_eq!(memory.priority, 4);

        let collision = store.restore_path("a", "core", created.id, 0, None);
        assert!(matches!(collision, Err(MemoryError::Conflict(_))));

        let gone = store.restore_path("b", "core", MemoryId(999), 0, None);
        assert!(matches!(gone, Err(MemoryError::NotFound(_))));
    }

    #[test]
    fn purge_repairs_the_chain_by_skipping_over() {
        let mut store = mk_store();
        let a = create(&mut store, "", "core", "v1", 0, Some("x"));
        let b = update_content(&mut store, "x", "core", "v2").new_memory_id;
        let c = update_content(&mut store, "x", "core", "v3").new_memory_id;

        // Chain is a -> b -> c; deleting b must leave a -> c.
        let outcome = match store.permanently_delete(b, false) {
            Ok(outcome) => outcome,
            Err(err) => panic!("purge should succeed: {err}"),
        };
        assert_eq!(outcome.chain_repaired_to, Some(c));

        let first = match store.get_memory_by_id(a.id) {
            Ok(Some(detail)) => detail,
            Ok(None) => panic!("first version should remain"),
            Err(err) => panic!("lookup should succeed: {err}"),
        };
        assert_eq!(first.migrated_to, Some(c));
        assert!(matches!(store.get_memory_by_id(b), Ok(None)));
    }

    #[test]
    fn purging_a_terminal_version_nulls_predecessor_pointers() {
        let mut store = mk_store();
        let a = create(&mut store, "", "core", "v1", 0, Some("x"));
        let b = update_content(&mut store, "x", "core", "v2").new_memory_id;
        if let Err(err) = store.remove_path("x", "core") {
            panic!("remove should succeed: {err}");
        }

        let outcome = match store.permanently_delete(b, true) {
            Ok(outcome) => outcome,
            Err(err) => panic!("purge of path-less head should succeed: {err}"),
        };
        assert_eq!(outcome.chain_repaired_to, None);

        let first = match store.get_memory_by_id(a.id) {
            Ok(Some(detail)) => detail,
            Ok(None) => panic!("first version should remain"),
            Err(err) => panic!("lookup should succeed: {err}"),
        };
        assert_eq!(first.migrated_to, None);
    }

    #[test]
    fn orphan_safety_check_is_a_distinct_error() {
        let mut store = mk_store();
        let created = create(&mut store, "", "core", "x", 0, Some("a"));

        // Still addressed: the in-transaction re-check must refuse, and with
        // PermissionDenied rather than NotFound, so callers can tell a race
        // from a missing resource.
        let refused = store.permanently_delete(created.id, true);
        assert!(matches!(refused, Err(MemoryError::PermissionDenied(_))));

        assert!(matches!(
            store.permanently_delete(MemoryId(999), true),
            Err(MemoryError::NotFound(_))
        ));

        // Without the flag the delete proceeds (reviewer override).
        if let Err(err) = store.permanently_delete(created.id, false) {
            panic!("unchecked purge should succeed: {err}");
        }
        assert!(matches!(store.get_memory_by_path("a", "core"), Ok(None)));
    }

    #[test]
    fn chain_resolution_terminates_and_reports_cycles() {
        let mut store = mk_store();
        let a = create(&mut store, "", "core", "v1", 0, Some("x"));
        let b = update_content(&mut store, "x", "core", "v2").new_memory_id;
        let c = update_content(&mut store, "x", "core", "v3").new_memory_id;

        let resolved = match store.resolve_chain_target(a.id) {
            Ok(detail) => detail,
            Err(err) => panic!("resolution should succeed: {err}"),
        };
        assert_eq!(resolved.id, c);

        // Force a cycle c -> a directly in storage.
        if let Err(err) = store.conn.execute(
            "UPDATE memories SET migrated_to = ?1 WHERE id = ?2",
            params![a.id.0, c.0],
        ) {
            panic!("cycle setup should succeed: {err}");
        }

        assert!(matches!(store.resolve_chain_target(a.id), Err(MemoryError::BrokenChain(_))));
        assert!(matches!(store.resolve_chain_target(b), Err(MemoryError::BrokenChain(_))));
    }

    #[test]
    fn over_long_chains_fail_closed() {
        let mut store = mk_store();
        let first = create(&mut store, "", "core", "v0", 0, Some("x"));
        for round in 0..MAX_CHAIN_HOPS + 5 {
            update_content(&mut store, "x", "core", &format!("v{}", round + 1));
        }

        assert!(matches!(store.resolve_chain_target(first.id), Err(MemoryError::BrokenChain(_))));

        // The orphan listing degrades to "no target" instead of erroring.
        let orphans = match store.list_orphans() {
            Ok(orphans) => orphans,
            Err(err) => panic!("orphan listing should not propagate broken chains: {err}"),
        };
        let oldest = orphans
            .iter()
            .find(|orphan| orphan.id == first.id)
            .unwrap_or_else(|| panic!("first version should be listed as deprecated"));
        assert!(oldest.migration_target.is_none());
    }
}
