//! Source snapshot
//!
//! Produces a deterministic, filtered listing of the project sources with
//! a content hash. Excluded paths (VCS metadata, docs, lockfiles of
//! convenience) never reach the hash, so editing them never invalidates a
//! build.

use crate::config::schema::SnapshotConfig;
use crate::error::{KilnError, KilnResult};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Path-prefix exclusion rules
#[derive(Debug, Clone, Default)]
pub struct ExclusionRules {
    prefixes: Vec<PathBuf>,
    exclude_hidden: bool,
}

impl ExclusionRules {
    /// Create rules from relative path prefixes
    pub fn new<I, S>(prefixes: I, exclude_hidden: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            prefixes: prefixes
                .into_iter()
                .map(|p| without_cur_dir(Path::new(p.as_ref())))
                .filter(|p| !p.as_os_str().is_empty())
                .collect(),
            exclude_hidden,
        }
    }

    /// Rules from the snapshot configuration section
    pub fn from_config(config: &SnapshotConfig) -> Self {
        Self::new(&config.exclude, config.exclude_hidden)
    }

    /// Add an extra excluded prefix
    pub fn with_prefix(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.prefixes.push(without_cur_dir(&prefix.into()));
        self
    }

    /// Whether a root-relative path is excluded.
    ///
    /// A path is excluded if it or any ancestor matches a prefix; matching
    /// is per path component, so `docs` excludes `docs/a.md` but not
    /// `docsite/a.md`.
    pub fn is_excluded(&self, relative: &Path) -> bool {
        if self.exclude_hidden
            && relative.components().any(|c| match c {
                Component::Normal(name) => name.to_string_lossy().starts_with('.'),
                _ => false,
            })
        {
            return true;
        }
        self.prefixes.iter().any(|prefix| relative.starts_with(prefix))
    }
}

/// `./docs/` and `docs` name the same prefix
fn without_cur_dir(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// A file included in the snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    /// Root-relative path with `/` separators
    pub path: String,

    /// SHA-256 of the file contents (or symlink target)
    pub digest: String,
}

/// Ordered, filtered view of the project sources
#[derive(Debug, Clone)]
pub struct SourceSnapshot {
    root: PathBuf,
    rules: ExclusionRules,
    entries: Vec<SnapshotEntry>,
    hash: String,
}

impl SourceSnapshot {
    /// Capture a snapshot of `root` on the blocking pool
    pub async fn capture(root: &Path, rules: &ExclusionRules) -> KilnResult<Self> {
        let root = root.to_path_buf();
        let rules = rules.clone();
        tokio::task::spawn_blocking(move || Self::capture_blocking(&root, &rules))
            .await
            .map_err(|e| KilnError::Internal(format!("snapshot task failed: {}", e)))?
    }

    /// Capture a snapshot of `root` on the current thread
    pub fn capture_blocking(root: &Path, rules: &ExclusionRules) -> KilnResult<Self> {
        if !root.exists() {
            return Err(KilnError::InvalidPath {
                path: root.to_path_buf(),
                reason: "snapshot root does not exist".to_string(),
            });
        }
        if !root.is_dir() {
            return Err(KilnError::InvalidPath {
                path: root.to_path_buf(),
                reason: "snapshot root is not a directory".to_string(),
            });
        }

        let mut entries = Vec::new();
        walk(root, Path::new(""), rules, &mut entries)?;
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        let mut hasher = Sha256::new();
        for entry in &entries {
            hasher.update(entry.path.as_bytes());
            hasher.update([0u8]);
            hasher.update(entry.digest.as_bytes());
            hasher.update(b"\n");
        }
        let hash = hex::encode(hasher.finalize());

        debug!(
            "Snapshot of {}: {} files, hash {}",
            root.display(),
            entries.len(),
            &hash[..12]
        );

        Ok(Self {
            root: root.to_path_buf(),
            rules: rules.clone(),
            entries,
            hash,
        })
    }

    /// Capture the same root with the same rules again
    pub async fn recapture(&self) -> KilnResult<Self> {
        Self::capture(&self.root, &self.rules).await
    }

    /// Snapshot root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Included files in canonical order
    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    /// Content hash over all included files
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

fn walk(
    root: &Path,
    relative: &Path,
    rules: &ExclusionRules,
    entries: &mut Vec<SnapshotEntry>,
) -> KilnResult<()> {
    let dir = root.join(relative);
    let read_dir =
        fs::read_dir(&dir).map_err(|e| KilnError::io(format!("reading {}", dir.display()), e))?;

    for item in read_dir {
        let item = item.map_err(|e| KilnError::io(format!("reading {}", dir.display()), e))?;
        let rel = relative.join(item.file_name());
        if rules.is_excluded(&rel) {
            continue;
        }

        let file_type = item
            .file_type()
            .map_err(|e| KilnError::io(format!("inspecting {}", rel.display()), e))?;
        let full = root.join(&rel);

        if file_type.is_dir() {
            walk(root, &rel, rules, entries)?;
        } else if file_type.is_file() {
            entries.push(SnapshotEntry {
                path: portable(&rel),
                digest: hash_file(&full)?,
            });
        } else if file_type.is_symlink() {
            let target = fs::read_link(&full)
                .map_err(|e| KilnError::io(format!("reading link {}", full.display()), e))?;
            let mut hasher = Sha256::new();
            hasher.update(b"symlink:");
            hasher.update(portable(&target).as_bytes());
            entries.push(SnapshotEntry {
                path: portable(&rel),
                digest: hex::encode(hasher.finalize()),
            });
        }
    }

    Ok(())
}

fn hash_file(path: &Path) -> KilnResult<String> {
    let mut file =
        fs::File::open(path).map_err(|e| KilnError::io(format!("opening {}", path.display()), e))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)
        .map_err(|e| KilnError::io(format!("hashing {}", path.display()), e))?;
    Ok(hex::encode(hasher.finalize()))
}

fn portable(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
