use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Maximum number of `migrated_to` hops followed before a chain is treated
/// as broken. Combined with a visited set this bounds every chain walk.
pub const MAX_CHAIN_HOPS: usize = 50;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum MemoryError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("broken version chain: {0}")]
    BrokenChain(String),
    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MemoryId(pub i64);

impl Display for MemoryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Render a full address as `namespace://path`.
#[must_use]
pub fn format_uri(namespace: &str, path: &str) -> String {
    format!("{namespace}://{path}")
}

/// Split a `namespace://path` address back into its two halves.
#[must_use]
pub fn split_uri(uri: &str) -> Option<(&str, &str)> {
    uri.split_once("://")
}

/// Resource identifier for content-level snapshots, disjoint from the
/// address-keyed space used by path-level snapshots.
#[must_use]
pub fn content_resource_id(memory_id: MemoryId) -> String {
    format!("memory:{memory_id}")
}

/// A caller-chosen path segment may only use alphanumerics, underscores,
/// and hyphens.
#[must_use]
pub fn is_valid_segment(name: &str) -> bool {
    !name.is_empty()
        && name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
}

#[must_use]
pub fn parent_path(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

#[must_use]
pub fn leaf_name(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, leaf)| leaf)
}

#[must_use]
pub fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// First `max_chars` characters of `content`, with an ellipsis when cut.
/// Operates on characters, never mid-codepoint.
#[must_use]
pub fn snippet(content: &str, max_chars: usize) -> String {
    let mut iter = content.char_indices();
    match iter.nth(max_chars) {
        Some((byte_index, _)) => format!("{}...", &content[..byte_index]),
        None => content.to_string(),
    }
}

/// Active memory resolved through a path, as returned by read-by-address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolvedMemory {
    pub id: MemoryId,
    pub content: String,
    pub priority: i64,
    pub disclosure: Option<String>,
    pub namespace: String,
    pub path: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl ResolvedMemory {
    #[must_use]
    pub fn uri(&self) -> String {
        format_uri(&self.namespace, &self.path)
    }
}

/// Any memory version fetched by id, including deprecated ones, together
/// with every address currently referencing it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryDetail {
    pub id: MemoryId,
    pub content: String,
    pub deprecated: bool,
    pub migrated_to: Option<MemoryId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChildEntry {
    pub namespace: String,
    pub path: String,
    pub name: String,
    pub content_snippet: String,
    pub priority: i64,
    pub disclosure: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreatedMemory {
    pub id: MemoryId,
    pub namespace: String,
    pub path: String,
    pub uri: String,
    pub priority: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreatedAlias {
    pub new_uri: String,
    pub target_uri: String,
    pub memory_id: MemoryId,
}

/// Field set for update-as-new-version. `content` forces a new version;
/// `priority`/`disclosure` touch only the path row.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateFields {
    pub content: Option<String>,
    pub priority: Option<i64>,
    pub disclosure: Option<String>,
}

impl UpdateFields {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.priority.is_none() && self.disclosure.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub uri: String,
    pub old_memory_id: MemoryId,
    pub new_memory_id: MemoryId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestoredVersion {
    pub uri: String,
    pub old_memory_id: MemoryId,
    pub restored_memory_id: MemoryId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestoredPath {
    pub uri: String,
    pub memory_id: MemoryId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemovedPath {
    pub uri: String,
    pub memory_id: MemoryId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PurgeOutcome {
    pub deleted_memory_id: MemoryId,
    pub chain_repaired_to: Option<MemoryId>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum OrphanCategory {
    Deprecated,
    Orphaned,
    Active,
}

impl OrphanCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deprecated => "deprecated",
            Self::Orphaned => "orphaned",
            Self::Active => "active",
        }
    }
}

/// Live successor at the end of an orphan's migration chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationTarget {
    pub id: MemoryId,
    pub addresses: Vec<String>,
    pub content_snippet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrphanEntry {
    pub id: MemoryId,
    pub content_snippet: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub deprecated: bool,
    pub migrated_to: Option<MemoryId>,
    pub category: OrphanCategory,
    pub migration_target: Option<MigrationTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationTargetDetail {
    pub id: MemoryId,
    pub content: String,
    pub addresses: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Full orphan view with the migration target's complete content, for the
/// reviewer's side-by-side comparison.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrphanDetail {
    pub id: MemoryId,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub deprecated: bool,
    pub migrated_to: Option<MemoryId>,
    pub category: OrphanCategory,
    pub migration_target: Option<MigrationTargetDetail>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Path,
    Memory,
}

impl ResourceKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Path => "path",
            Self::Memory => "memory",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "path" => Some(Self::Path),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    CreateAlias,
    Delete,
    ModifyMeta,
    ModifyContent,
}

impl OperationKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::CreateAlias => "create_alias",
            Self::Delete => "delete",
            Self::ModifyMeta => "modify_meta",
            Self::ModifyContent => "modify_content",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(Self::Create),
            "create_alias" => Some(Self::CreateAlias),
            "delete" => Some(Self::Delete),
            "modify_meta" => Some(Self::ModifyMeta),
            "modify_content" => Some(Self::ModifyContent),
            _ => None,
        }
    }
}

/// Pre-mutation state captured once per session and resource, one variant
/// per operation with exactly the fields its inverse needs.
///
/// Content is never duplicated into `Delete`/`ModifyContent` payloads: the
/// superseded memory row stays in the entity store until permanently
/// deleted, and is re-read from there for diffs and rollback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "operation_type", rename_all = "snake_case")]
pub enum SnapshotPayload {
    Create {
        namespace: String,
        path: String,
        memory_id: MemoryId,
    },
    CreateAlias {
        namespace: String,
        path: String,
        memory_id: MemoryId,
        target_uri: String,
    },
    Delete {
        namespace: String,
        path: String,
        memory_id: MemoryId,
        priority: i64,
        disclosure: Option<String>,
    },
    ModifyMeta {
        namespace: String,
        path: String,
        memory_id: MemoryId,
        priority: i64,
        disclosure: Option<String>,
    },
    ModifyContent {
        namespace: String,
        path: String,
        memory_id: MemoryId,
        all_addresses: Vec<String>,
    },
}

impl SnapshotPayload {
    #[must_use]
    pub fn operation(&self) -> OperationKind {
        match self {
            Self::Create { .. } => OperationKind::Create,
            Self::CreateAlias { .. } => OperationKind::CreateAlias,
            Self::Delete { .. } => OperationKind::Delete,
            Self::ModifyMeta { .. } => OperationKind::ModifyMeta,
            Self::ModifyContent { .. } => OperationKind::ModifyContent,
        }
    }

    /// Content captures live in the `memory:{id}` id space; everything else
    /// is keyed by the path address.
    #[must_use]
    pub fn resource_kind(&self) -> ResourceKind {
        match self {
            Self::ModifyContent { .. } => ResourceKind::Memory,
            _ => ResourceKind::Path,
        }
    }

    #[must_use]
    pub fn uri(&self) -> String {
        match self {
            Self::Create { namespace, path, .. }
            | Self::CreateAlias { namespace, path, .. }
            | Self::Delete { namespace, path, .. }
            | Self::ModifyMeta { namespace, path, .. }
            | Self::ModifyContent { namespace, path, .. } => format_uri(namespace, path),
        }
    }

    #[must_use]
    pub fn memory_id(&self) -> MemoryId {
        match self {
            Self::Create { memory_id, .. }
            | Self::CreateAlias { memory_id, .. }
            | Self::Delete { memory_id, .. }
            | Self::ModifyMeta { memory_id, .. }
            | Self::ModifyContent { memory_id, .. } => *memory_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffText {
    pub unified: String,
    pub summary: String,
    pub additions: usize,
    pub deletions: usize,
}

// Beyond this many DP cells fall back to a whole-file replacement script
// instead of a quadratic LCS.
const LCS_CELL_LIMIT: usize = 4_000_000;

enum DiffOp<'a> {
    Keep(&'a str),
    Remove(&'a str),
    Add(&'a str),
}

/// Line-based unified diff between a snapshot-side and a current-side text,
/// with a one-line `+A / -D lines` summary.
#[must_use]
pub fn unified_diff(old: &str, new: &str) -> DiffText {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();

    if old_lines == new_lines {
        return DiffText {
            unified: String::new(),
            summary: "No changes".to_string(),
            additions: 0,
            deletions: 0,
        };
    }

    let script = if old_lines.len().saturating_mul(new_lines.len()) > LCS_CELL_LIMIT {
        let mut ops = Vec::with_capacity(old_lines.len() + new_lines.len());
        ops.extend(old_lines.iter().copied().map(DiffOp::Remove));
        ops.extend(new_lines.iter().copied().map(DiffOp::Add));
        ops
    } else {
        lcs_script(&old_lines, &new_lines)
    };

    let mut additions = 0_usize;
    let mut deletions = 0_usize;
    let mut body = String::new();
    for op in &script {
        match op {
            DiffOp::Keep(line) => {
                body.push(' ');
                body.push_str(line);
            }
            DiffOp::Remove(line) => {
                deletions += 1;
                body.push('-');
                body.push_str(line);
            }
            DiffOp::Add(line) => {
                additions += 1;
                body.push('+');
                body.push_str(line);
            }
        }
        body.push('\n');
    }

    let unified = format!(
        "--- snapshot\n+++ current\n@@ -1,{} +1,{} @@\n{body}",
        old_lines.len(),
        new_lines.len()
    );

    DiffText {
        unified,
        summary: format!("+{additions} / -{deletions} lines"),
        additions,
        deletions,
    }
}

fn lcs_script<'a>(old: &[&'a str], new: &[&'a str]) -> Vec<DiffOp<'a>> {
    let cols = new.len() + 1;
    let mut table = vec![0_u32; (old.len() + 1) * cols];

    for i in (0..old.len()).rev() {
        for j in (0..new.len()).rev() {
            table[i * cols + j] = if old[i] == new[j] {
                table[(i + 1) * cols + j + 1] + 1
            } else {
                table[(i + 1) * cols + j].max(table[i * cols + j + 1])
            };
        }
    }

    let mut ops = Vec::new();
    let mut i = 0;
    let mut j = 0;
    while i < old.len() && j < new.len() {
        if old[i] == new[j] {
            ops.push(DiffOp::Keep(old[i]));
            i += 1;
            j += 1;
        } else if table[(i + 1) * cols + j] >= table[i * cols + j + 1] {
            ops.push(DiffOp::Remove(old[i]));
            i += 1;
        } else {
            ops.push(DiffOp::Add(new[j]));
            j += 1;
        }
    }
    while i < old.len() {
        ops.push(DiffOp::Remove(old[i]));
        i += 1;
    }
    while j < new.len() {
        ops.push(DiffOp::Add(new[j]));
        j += 1;
    }

    ops
}
