use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── IDs ──
// Every row in the schema is keyed by a small integer (SQLite INTEGER PRIMARY
// KEY / ROWID). content_hash and commit_hash are the only opaque hex strings.
pub type ProjectId = i64;
pub type FileId = i64;
pub type BranchId = i64;
pub type CommitId = i64;
pub type CheckoutId = i64;

/// The entity kinds that can appear in a `NotFound`/`AlreadyExists` error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    Project,
    File,
    Blob,
    Branch,
    Commit,
    Checkout,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Project => "project",
            Self::File => "file",
            Self::Blob => "blob",
            Self::Branch => "branch",
            Self::Commit => "commit",
            Self::Checkout => "checkout",
        };
        write!(f, "{s}")
    }
}

/// Content kind recorded on first sighting of a blob; never changes after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentKind {
    Text,
    Binary,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Binary => "binary",
        }
    }
}

impl FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "binary" => Ok(Self::Binary),
            other => Err(format!("unknown content kind: {other}")),
        }
    }
}

/// Per-file change classification inside a commit. `Renamed` is carried for
/// schema completeness (see DESIGN.md) but never constructed by the commit
/// engine — renames surface as delete + add.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
    Renamed,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Renamed => "renamed",
        }
    }
}

impl FromStr for ChangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "added" => Ok(Self::Added),
            "modified" => Ok(Self::Modified),
            "deleted" => Ok(Self::Deleted),
            "renamed" => Ok(Self::Renamed),
            other => Err(format!("unknown change type: {other}")),
        }
    }
}

/// How a commit should respond when its diff observes a version mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictStrategy {
    Abort,
    Force,
}

/// What to do when a workspace diff yields no Added/Modified/Deleted files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EmptyCommitPolicy {
    #[default]
    AcceptNoOp,
    Reject,
}

/// When to re-verify a blob's SHA-256 against its stored payload on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BlobVerifyOnRead {
    #[default]
    Off,
    Sample,
    Always,
}

/// A single file-level version conflict surfaced by the commit engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictEntry {
    pub path: String,
    pub snapshot_version: i64,
    pub current_version: i64,
    pub last_author: Option<String>,
    pub last_time: Option<DateTime<Utc>>,
}

// ── Row structs ──
// Typed row structs replace the dynamic row-dictionaries of the reference
// implementation; only the lowest DB adapter layer deals in raw columns.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRow {
    pub id: ProjectId,
    pub slug: String,
    pub name: String,
    pub source_url: Option<String>,
    pub default_branch: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectFileRow {
    pub id: FileId,
    pub project_id: ProjectId,
    pub path: String,
    pub type_tag: String,
    pub component: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlobRow {
    pub content_hash: String,
    pub kind: ContentKind,
    pub encoding: Option<String>,
    pub size_bytes: i64,
    pub first_seen_at: DateTime<Utc>,
    pub reference_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileContentRow {
    pub file_id: FileId,
    pub content_hash: String,
    pub size_bytes: i64,
    pub line_count: Option<i64>,
    pub version: i64,
    pub is_current: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchRow {
    pub id: BranchId,
    pub project_id: ProjectId,
    pub name: String,
    pub parent_branch: Option<String>,
    pub is_default: bool,
    pub head_commit_id: Option<CommitId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRow {
    pub id: CommitId,
    pub project_id: ProjectId,
    pub branch_id: BranchId,
    pub commit_hash: String,
    pub parent_commit_id: Option<CommitId>,
    pub author: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub files_changed: i64,
    pub lines_added: i64,
    pub lines_removed: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitFileRow {
    pub commit_id: CommitId,
    pub file_id: FileId,
    pub path: String,
    pub change_type: ChangeType,
    pub old_content_hash: Option<String>,
    pub new_content_hash: Option<String>,
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub lines_added: i64,
    pub lines_removed: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRow {
    pub id: CheckoutId,
    pub project_id: ProjectId,
    pub path: String,
    pub branch: String,
    pub created_at: DateTime<Utc>,
    pub last_synced_at: DateTime<Utc>,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSnapshotRow {
    pub checkout_id: CheckoutId,
    pub file_id: FileId,
    pub content_hash: String,
    pub version: i64,
}

/// Immutable, engine-wide classification ruleset for the file scanner.
/// Loaded once at engine init, per §9's "global mutable state" note.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub rules: Vec<(String, String)>,
    pub hidden_allow_list: Vec<String>,
    pub max_file_bytes: u64,
}

impl RuleSet {
    pub fn default_rules() -> Self {
        Self {
            rules: vec![
                ("*.rs".into(), "source".into()),
                ("*.toml".into(), "config".into()),
                ("*.json".into(), "config".into()),
                ("*.yaml".into(), "config".into()),
                ("*.yml".into(), "config".into()),
                ("*.md".into(), "markup".into()),
                ("*.txt".into(), "markup".into()),
                ("**/Cargo.lock".into(), "config".into()),
            ],
            hidden_allow_list: vec![".gitignore".into(), ".env.example".into()],
            max_file_bytes: 8 * 1024 * 1024,
        }
    }
}

/// Engine-wide configuration, recognized on engine init (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub db_path: Option<String>,
    pub busy_timeout_ms: u32,
    pub scan_max_file_bytes: u64,
    pub empty_commit_policy: EmptyCommitPolicy,
    pub blob_verify_on_read: BlobVerifyOnRead,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            busy_timeout_ms: 5000,
            scan_max_file_bytes: 8 * 1024 * 1024,
            empty_commit_policy: EmptyCommitPolicy::AcceptNoOp,
            blob_verify_on_read: BlobVerifyOnRead::Off,
        }
    }
}

// ── Public operation results (§6 external interfaces) ──

/// Either a decoded text payload or a binary one, as stored in `content_blob`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(s) => s.as_bytes(),
            Self::Binary(b) => b,
        }
    }

    pub fn kind(&self) -> ContentKind {
        match self {
            Self::Text(_) => ContentKind::Text,
            Self::Binary(_) => ContentKind::Binary,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

/// A file discovered by the scanner, not yet read or hashed.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub relative_path: String,
    pub absolute_path: std::path::PathBuf,
    pub type_tag: String,
    pub size: u64,
    pub mtime: DateTime<Utc>,
}

/// One yield from the scanner: either a classified file or an entry the
/// scanner could not read (permissions, race with deletion, etc).
#[derive(Debug, Clone)]
pub enum ScanEntry {
    File(ScannedFile),
    Unreadable { relative_path: String, message: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportSummary {
    pub files_added: u64,
    pub files_updated: u64,
    pub files_unchanged: u64,
    pub blobs_added: u64,
    pub bytes_stored: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub slug: String,
    pub name: String,
    pub file_count: u64,
    pub total_bytes: u64,
    pub last_commit_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDetail {
    pub project: ProjectRow,
    pub branches: Vec<BranchRow>,
    pub file_count: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileListEntry {
    pub path: String,
    pub size_bytes: i64,
    pub version: i64,
    pub type_tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutResult {
    pub checkout_id: CheckoutId,
    pub files_written: u64,
    pub bytes_written: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitResult {
    pub commit_id: CommitId,
    pub commit_hash: String,
    pub files_added: u64,
    pub files_modified: u64,
    pub files_deleted: u64,
    pub lines_added: i64,
    pub lines_removed: i64,
}

/// Outcome of a commit attempt. Conflicts and no-op commits are both
/// ordinary results, not errors — only genuine failures go through `Error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CommitOutcome {
    Committed(CommitResult),
    Conflict(Vec<ConflictEntry>),
    NoOp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutListEntry {
    pub checkout: CheckoutRow,
    pub path_exists: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRecord {
    pub commit: CommitRow,
    pub files: Vec<CommitFileRow>,
}

/// A unified diff rendered on the fly from two blob bodies; never cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedDiff {
    pub path: String,
    pub from_label: String,
    pub to_label: String,
    pub text: String,
}
