use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content digest identifying a file by its bytes alone.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest([u8; 32]);

impl Digest {
    pub fn to_hex(&self) -> String {
        blake3::Hash::from_bytes(self.0).to_hex().to_string()
    }

    /// First eight hex characters, used to disambiguate file names.
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(8);
        hex
    }
}

impl From<blake3::Hash> for Digest {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

impl TryFrom<String> for Digest {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        blake3::Hash::from_hex(value.as_bytes())
            .map(Self::from)
            .map_err(|e| format!("invalid digest '{}': {}", value, e))
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.to_hex()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.short())
    }
}

/// A file this tool has copied and verified. Only created after verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub digest: Digest,
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
    pub size_bytes: u64,
    pub copied_at: DateTime<Utc>,
}

/// A mounted removable volume as reported by a drive enumerator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub root: PathBuf,
    pub label: String,
    pub device: String,
}

impl Volume {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let label = volume_label(&root);
        Self {
            device: String::new(),
            label,
            root,
        }
    }
}

/// Derive a directory-safe label from a mount point.
pub fn volume_label(root: &std::path::Path) -> String {
    let raw = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.to_string_lossy().into_owned());

    let label: String = raw
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();

    if label.trim_matches('_').is_empty() {
        "volume".to_string()
    } else {
        label
    }
}

/// Emitted once per stable attach of a removable volume.
#[derive(Debug, Clone)]
pub struct DriveEvent {
    pub volume: Volume,
    pub detected_at: DateTime<Utc>,
}

/// A regular file discovered on the volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierKind {
    /// A configured priority extension, normalized (lower case, no dot).
    Priority(String),
    /// Files whose extension is not in the priority list.
    NonPriority,
    /// Everything not disabled, used when priority ordering is turned off.
    AllFiles,
}

/// An ordered bucket of files sharing one priority rank.
#[derive(Debug, Clone)]
pub struct PriorityTier {
    pub rank: usize,
    pub kind: TierKind,
    pub files: Vec<DiscoveredFile>,
}

impl PriorityTier {
    pub fn label(&self) -> String {
        match &self.kind {
            TierKind::Priority(ext) => format!("Priority {} ({})", self.rank + 1, ext.to_uppercase()),
            TierKind::NonPriority => "Non-priority".to_string(),
            TierKind::AllFiles => "All files".to_string(),
        }
    }

    /// Name of the sub-directory this tier copies into.
    pub fn directory_name(&self) -> String {
        match &self.kind {
            TierKind::Priority(ext) => format!("Priority_{}", ext.to_uppercase()),
            TierKind::NonPriority => "Non-priority".to_string(),
            TierKind::AllFiles => "All_files".to_string(),
        }
    }

    pub fn is_priority(&self) -> bool {
        matches!(self.kind, TierKind::Priority(_))
    }
}

/// A file that could not be copied during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub kind: String,
    pub message: String,
}

impl FileFailure {
    pub fn from_error(path: PathBuf, error: &crate::error::Error) -> Self {
        Self {
            path,
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TierSummary {
    pub rank: usize,
    pub label: String,
    pub files_copied: u64,
    pub duplicates_skipped: u64,
    pub bytes_copied: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub volume_root: PathBuf,
    pub volume_label: String,
    pub destination: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub tiers: Vec<TierSummary>,
    pub files_copied: u64,
    pub duplicates_skipped: u64,
    /// Sum of verified destination file lengths.
    pub bytes_copied: u64,
    pub failures: Vec<FileFailure>,
}

impl RunSummary {
    pub fn new(run_id: String, volume: &Volume, destination: PathBuf) -> Self {
        Self {
            run_id,
            volume_root: volume.root.clone(),
            volume_label: volume.label.clone(),
            destination,
            started_at: Utc::now(),
            finished_at: None,
            tiers: Vec::new(),
            files_copied: 0,
            duplicates_skipped: 0,
            bytes_copied: 0,
            failures: Vec::new(),
        }
    }

    pub fn absorb(&mut self, tier: TierSummary, failures: Vec<FileFailure>) {
        self.files_copied += tier.files_copied;
        self.duplicates_skipped += tier.duplicates_skipped;
        self.bytes_copied += tier.bytes_copied;
        self.failures.extend(failures);
        self.tiers.push(tier);
    }

    pub fn duration_secs(&self) -> u64 {
        self.finished_at
            .map(|end| (end - self.started_at).num_seconds().max(0) as u64)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_hex_round_trips_through_string() {
        let digest = Digest::from(blake3::hash(b"content"));
        let hex: String = digest.into();
        assert_eq!(hex.len(), 64);
        assert_eq!(Digest::try_from(hex).unwrap(), digest);
        assert_eq!(digest.short().len(), 8);
    }

    #[test]
    fn digest_rejects_garbage() {
        assert!(Digest::try_from("not-hex".to_string()).is_err());
    }

    #[test]
    fn volume_label_is_directory_safe() {
        assert_eq!(volume_label(std::path::Path::new("/media/user/EOS DIGITAL")), "EOS_DIGITAL");
        assert_eq!(volume_label(std::path::Path::new("/")), "volume");
    }

    #[test]
    fn tier_labels_and_directories() {
        let tier = PriorityTier {
            rank: 1,
            kind: TierKind::Priority("mp4".to_string()),
            files: Vec::new(),
        };
        assert_eq!(tier.label(), "Priority 2 (MP4)");
        assert_eq!(tier.directory_name(), "Priority_MP4");

        let rest = PriorityTier {
            rank: 2,
            kind: TierKind::NonPriority,
            files: Vec::new(),
        };
        assert_eq!(rest.directory_name(), "Non-priority");
        assert!(!rest.is_priority());
    }
}
