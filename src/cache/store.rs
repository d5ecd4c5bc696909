//! Content-addressed entry store
//!
//! Every entry is an immutable file at `<root>/<namespace>/<key[0..2]>/<key>`:
//! a 4-byte little-endian header length, a JSON header, then the raw
//! payload. Entries are written to a uniquely named temp file and renamed
//! into place, so a reader sees either nothing or a complete entry.
//!
//! A damaged entry (bad header, wrong key, checksum mismatch) is reported
//! as [`KilnError::CacheCorruption`], deleted, and treated as a miss.

use crate::error::{KilnError, KilnResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Magic bytes identifying a Kiln store entry
const ENTRY_MAGIC: &str = "KILN";

/// Entry format version; bump on any header or payload layout change
const ENTRY_FORMAT_VERSION: u32 = 1;

/// Marker in the name of in-progress writes
const TEMP_MARKER: &str = ".tmp-";

/// Temp files older than this are leftovers from a crashed write
const STALE_TEMP_MINUTES: i64 = 60;

/// Store partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// Dependency artifacts
    Deps,
    /// Project artifacts
    Project,
    /// Check results
    Checks,
}

impl Namespace {
    /// Directory name for this namespace
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deps => "deps",
            Self::Project => "project",
            Self::Checks => "checks",
        }
    }

    /// All namespaces
    pub fn all() -> &'static [Self] {
        &[Self::Deps, Self::Project, Self::Checks]
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Validation header written in front of every payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryHeader {
    pub magic: String,
    pub format_version: u32,
    pub key: String,
    pub kind: Namespace,
    pub created_at: DateTime<Utc>,
    pub payload_sha256: String,

    /// Toolchain output captured when the entry was produced
    #[serde(default)]
    pub diagnostics: Vec<String>,
}

/// A validated entry
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub header: EntryHeader,
    pub payload: Vec<u8>,
}

/// Summary of an entry on disk, for listing and eviction
#[derive(Debug, Clone)]
pub struct EntryInfo {
    pub namespace: Namespace,
    pub key: String,
    pub path: PathBuf,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

impl EntryInfo {
    /// Age in whole days
    pub fn age_days(&self) -> i64 {
        (Utc::now() - self.created_at).num_days()
    }
}

/// On-disk content-addressed store
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Create a store rooted at `root`; directories are created lazily
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path an entry lives at
    pub fn entry_path(&self, namespace: Namespace, key: &str) -> PathBuf {
        let shard = &key[..2.min(key.len())];
        self.root.join(namespace.as_str()).join(shard).join(key)
    }

    /// Directory build outputs for an entry are written to
    pub fn output_dir(&self, namespace: Namespace, key: &str) -> PathBuf {
        self.root.join("outputs").join(namespace.as_str()).join(key)
    }

    /// Throwaway working directory for one check run
    pub fn scratch_dir(&self, key: &str) -> PathBuf {
        self.root.join("scratch").join(key)
    }

    /// Fast existence check; does not validate the entry
    pub async fn contains(&self, namespace: Namespace, key: &str) -> bool {
        fs::metadata(self.entry_path(namespace, key))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Read and validate an entry.
    ///
    /// Returns `Ok(None)` on a miss, including when a corrupt entry was
    /// found and removed.
    pub async fn get(&self, namespace: Namespace, key: &str) -> KilnResult<Option<StoredEntry>> {
        let path = self.entry_path(namespace, key);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(KilnError::io(format!("reading {}", path.display()), e)),
        };

        match decode(&bytes, &path, Some((namespace, key))) {
            Ok(entry) => {
                debug!("Cache hit: {}/{}", namespace, &key[..12.min(key.len())]);
                Ok(Some(entry))
            }
            Err(err) => {
                warn!("{}; discarding entry", err);
                if let Err(e) = fs::remove_file(&path).await {
                    warn!("Failed to remove corrupt entry {}: {}", path.display(), e);
                }
                Ok(None)
            }
        }
    }

    /// Atomically insert an entry, replacing any existing one
    pub async fn put(
        &self,
        namespace: Namespace,
        key: &str,
        payload: &[u8],
        diagnostics: Vec<String>,
    ) -> KilnResult<StoredEntry> {
        let header = EntryHeader {
            magic: ENTRY_MAGIC.to_string(),
            format_version: ENTRY_FORMAT_VERSION,
            key: key.to_string(),
            kind: namespace,
            created_at: Utc::now(),
            payload_sha256: sha256_hex(payload),
            diagnostics,
        };

        let bytes = encode(&header, payload)?;
        let path = self.entry_path(namespace, key);
        write_atomic(&path, &bytes)
            .await
            .map_err(|e| KilnError::CacheWrite {
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        debug!("Stored {}/{} ({} bytes)", namespace, &key[..12.min(key.len())], bytes.len());

        Ok(StoredEntry {
            header,
            payload: payload.to_vec(),
        })
    }

    /// Remove an entry and its outputs; returns whether the entry existed
    pub async fn remove(&self, namespace: Namespace, key: &str) -> KilnResult<bool> {
        let path = self.entry_path(namespace, key);
        let existed = match fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(KilnError::io(format!("removing {}", path.display()), e)),
        };
        remove_dir_if_present(&self.output_dir(namespace, key)).await?;
        Ok(existed)
    }

    /// List valid entries across all namespaces, newest first.
    ///
    /// Corrupt entries are skipped with a warning.
    pub async fn list(&self) -> KilnResult<Vec<EntryInfo>> {
        let mut infos = Vec::new();

        for namespace in Namespace::all() {
            for path in self.entry_files(*namespace).await? {
                let name = file_name(&path);
                if name.contains(TEMP_MARKER) {
                    continue;
                }
                let bytes = fs::read(&path)
                    .await
                    .map_err(|e| KilnError::io(format!("reading {}", path.display()), e))?;
                match decode(&bytes, &path, None) {
                    Ok(entry) => infos.push(EntryInfo {
                        namespace: *namespace,
                        key: entry.header.key,
                        size: bytes.len() as u64,
                        created_at: entry.header.created_at,
                        path,
                    }),
                    Err(err) => warn!("{}", err),
                }
            }
        }

        infos.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(infos)
    }

    /// Evict entries older than `days` and stale temp files.
    ///
    /// Returns the evicted entries. With `dry_run` nothing is deleted.
    pub async fn gc(&self, days: u32, dry_run: bool) -> KilnResult<Vec<EntryInfo>> {
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let expired: Vec<EntryInfo> = self
            .list()
            .await?
            .into_iter()
            .filter(|info| info.created_at < cutoff)
            .collect();

        if dry_run {
            return Ok(expired);
        }

        for info in &expired {
            self.remove(info.namespace, &info.key).await?;
        }

        let stale = std::time::Duration::from_secs((STALE_TEMP_MINUTES * 60) as u64);
        for namespace in Namespace::all() {
            for path in self.entry_files(*namespace).await? {
                if !file_name(&path).contains(TEMP_MARKER) {
                    continue;
                }
                let old = fs::metadata(&path)
                    .await
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .and_then(|t| t.elapsed().ok())
                    .is_some_and(|age| age > stale);
                if old {
                    debug!("Removing stale temp file {}", path.display());
                    let _ = fs::remove_file(&path).await;
                }
            }
        }

        Ok(expired)
    }

    /// Remove every entry and output; returns the number of entries removed
    pub async fn clear(&self) -> KilnResult<usize> {
        let count = self.list().await?.len();
        for namespace in Namespace::all() {
            remove_dir_if_present(&self.root.join(namespace.as_str())).await?;
        }
        remove_dir_if_present(&self.root.join("outputs")).await?;
        remove_dir_if_present(&self.root.join("scratch")).await?;
        Ok(count)
    }

    async fn entry_files(&self, namespace: Namespace) -> KilnResult<Vec<PathBuf>> {
        let dir = self.root.join(namespace.as_str());
        let mut files = Vec::new();

        let mut shards = match fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(KilnError::io(format!("reading {}", dir.display()), e)),
        };

        while let Some(shard) = shards
            .next_entry()
            .await
            .map_err(|e| KilnError::io(format!("reading {}", dir.display()), e))?
        {
            let shard_path = shard.path();
            if !shard_path.is_dir() {
                continue;
            }
            let mut entries = fs::read_dir(&shard_path)
                .await
                .map_err(|e| KilnError::io(format!("reading {}", shard_path.display()), e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| KilnError::io(format!("reading {}", shard_path.display()), e))?
            {
                files.push(entry.path());
            }
        }

        files.sort();
        Ok(files)
    }
}

/// Write `bytes` to `path` via a unique temp file in the same directory,
/// fsync, then rename over the destination
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> KilnResult<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .await
        .map_err(|e| KilnError::io(format!("creating {}", parent.display()), e))?;

    let tmp = parent.join(format!(".{}{}{}", file_name(path), TEMP_MARKER, Uuid::new_v4()));

    let result = async {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp).await;
        return Err(KilnError::io(format!("writing {}", path.display()), e));
    }

    Ok(())
}

async fn remove_dir_if_present(dir: &Path) -> KilnResult<()> {
    match fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(KilnError::io(format!("removing {}", dir.display()), e)),
    }
}

fn encode(header: &EntryHeader, payload: &[u8]) -> KilnResult<Vec<u8>> {
    let header_bytes = serde_json::to_vec(header)?;
    let header_len = u32::try_from(header_bytes.len())
        .map_err(|_| KilnError::Internal("entry header too large".to_string()))?;

    let mut out = Vec::with_capacity(4 + header_bytes.len() + payload.len());
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(payload);
    Ok(out)
}

fn decode(
    bytes: &[u8],
    path: &Path,
    expected: Option<(Namespace, &str)>,
) -> Result<StoredEntry, KilnError> {
    let corrupt = |reason: String| KilnError::CacheCorruption {
        path: path.to_path_buf(),
        reason,
    };

    if bytes.len() < 4 {
        return Err(corrupt("truncated header length".to_string()));
    }
    let header_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let header_end = 4usize
        .checked_add(header_len)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| corrupt("truncated header".to_string()))?;

    let header: EntryHeader = serde_json::from_slice(&bytes[4..header_end])
        .map_err(|e| corrupt(format!("unreadable header: {}", e)))?;

    if header.magic != ENTRY_MAGIC {
        return Err(corrupt(format!("bad magic {:?}", header.magic)));
    }
    if header.format_version != ENTRY_FORMAT_VERSION {
        return Err(corrupt(format!(
            "format version {} (expected {})",
            header.format_version, ENTRY_FORMAT_VERSION
        )));
    }
    if let Some((namespace, key)) = expected {
        if header.kind != namespace || header.key != key {
            return Err(corrupt(format!(
                "entry is {}/{}, expected {}/{}",
                header.kind, header.key, namespace, key
            )));
        }
    }

    let payload = &bytes[header_end..];
    if sha256_hex(payload) != header.payload_sha256 {
        return Err(corrupt("payload checksum mismatch".to_string()));
    }

    Ok(StoredEntry {
        header,
        payload: payload.to_vec(),
    })
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
