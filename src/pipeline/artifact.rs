//! Cached build artifacts
//!
//! [`ArtifactCache`] implements get-or-build for one store namespace: a
//! valid entry is returned as is, otherwise the build runs once per
//! fingerprint no matter how many callers ask, and its output is persisted
//! before anyone sees it. Failed builds leave nothing behind.

use crate::cache::{ArtifactStore, Fingerprint, Flight, Namespace, StoredEntry};
use crate::error::{KilnError, KilnResult};
use crate::journal::Journal;
use crate::toolchain::{BuildOutput, ToolFailure};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Output of a build step, addressed by its fingerprint
#[derive(Debug, Clone)]
pub struct Artifact {
    pub fingerprint: Fingerprint,
    /// Directory holding the build outputs
    pub output_dir: PathBuf,
    /// Opaque blob produced by the toolchain
    pub payload: Vec<u8>,
    pub diagnostics: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// Built during this run rather than served from cache
    pub fresh: bool,
}

impl Artifact {
    fn from_entry(fingerprint: Fingerprint, output_dir: PathBuf, entry: StoredEntry, fresh: bool) -> Self {
        Self {
            fingerprint,
            output_dir,
            payload: entry.payload,
            diagnostics: entry.header.diagnostics,
            created_at: entry.header.created_at,
            fresh,
        }
    }
}

/// Why a shared build produced no artifact
#[derive(Debug, Clone)]
enum BuildFailure {
    Tool(ToolFailure),
    Cache(String),
}

type SharedBuild = Result<Arc<Artifact>, BuildFailure>;

/// Get-or-build over one store namespace
pub struct ArtifactCache {
    store: ArtifactStore,
    namespace: Namespace,
    flight: Flight<SharedBuild>,
    journal: Journal,
    build_error: fn(String, Vec<String>) -> KilnError,
}

impl ArtifactCache {
    /// `build_error` turns a fingerprint and toolchain diagnostics into the
    /// error reported for a failed build in this namespace
    pub fn new(
        store: ArtifactStore,
        namespace: Namespace,
        journal: Journal,
        build_error: fn(String, Vec<String>) -> KilnError,
    ) -> Self {
        Self {
            store,
            namespace,
            flight: Flight::new(),
            journal,
            build_error,
        }
    }

    /// Return the cached artifact for `fingerprint`, if a valid one exists
    pub async fn lookup(&self, fingerprint: &Fingerprint) -> KilnResult<Option<Arc<Artifact>>> {
        lookup(&self.store, self.namespace, fingerprint).await
    }

    /// Return the cached artifact or run `build` to produce it.
    ///
    /// `build` receives the output directory it owns. It runs at most once
    /// per fingerprint across concurrent callers, on a task that outlives
    /// any single caller.
    pub async fn get_or_build<F, Fut>(
        &self,
        fingerprint: &Fingerprint,
        build: F,
    ) -> KilnResult<Arc<Artifact>>
    where
        F: FnOnce(PathBuf) -> Fut + Send + 'static,
        Fut: Future<Output = Result<BuildOutput, ToolFailure>> + Send + 'static,
    {
        if let Some(artifact) = self.lookup(fingerprint).await? {
            return Ok(artifact);
        }

        let store = self.store.clone();
        let namespace = self.namespace;
        let journal = self.journal.clone();
        let fp = fingerprint.clone();

        let shared = self
            .flight
            .run(fingerprint.as_str(), move || {
                build_and_store(store, namespace, journal, fp, build)
            })
            .await?;

        shared.map_err(|failure| match failure {
            BuildFailure::Tool(tool) => {
                (self.build_error)(fingerprint.short().to_string(), tool.diagnostics)
            }
            BuildFailure::Cache(reason) => KilnError::CacheWrite {
                key: fingerprint.short().to_string(),
                reason,
            },
        })
    }
}

async fn build_and_store<F, Fut>(
    store: ArtifactStore,
    namespace: Namespace,
    journal: Journal,
    fp: Fingerprint,
    build: F,
) -> SharedBuild
where
    F: FnOnce(PathBuf) -> Fut,
    Fut: Future<Output = Result<BuildOutput, ToolFailure>>,
{
    // Another flight may have finished between the caller's miss and now
    if let Some(artifact) = lookup(&store, namespace, &fp)
        .await
        .map_err(|e| BuildFailure::Cache(e.to_string()))?
    {
        return Ok(artifact);
    }

    let output_dir = store.output_dir(namespace, fp.as_str());
    let started = Instant::now();
    let output = build(output_dir.clone()).await.map_err(BuildFailure::Tool)?;

    let entry = store
        .put(namespace, fp.as_str(), &output.payload, output.diagnostics)
        .await
        .map_err(|e| BuildFailure::Cache(e.to_string()))?;

    journal
        .record(
            &format!("{}.built", namespace),
            serde_json::json!({
                "fingerprint": fp.as_str(),
                "duration_ms": started.elapsed().as_millis() as u64,
            }),
        )
        .await;

    Ok(Arc::new(Artifact::from_entry(fp, output_dir, entry, true)))
}

async fn lookup(
    store: &ArtifactStore,
    namespace: Namespace,
    fingerprint: &Fingerprint,
) -> KilnResult<Option<Arc<Artifact>>> {
    let Some(entry) = store.get(namespace, fingerprint.as_str()).await? else {
        return Ok(None);
    };

    let output_dir = store.output_dir(namespace, fingerprint.as_str());
    let present = tokio::fs::metadata(&output_dir)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);
    if !present {
        warn!(
            "Cache entry {}/{} has no outputs; rebuilding",
            namespace,
            fingerprint.short()
        );
        store.remove(namespace, fingerprint.as_str()).await?;
        return Ok(None);
    }

    debug!("Reusing {} artifact {}", namespace, fingerprint.short());
    Ok(Some(Arc::new(Artifact::from_entry(
        fingerprint.clone(),
        output_dir,
        entry,
        false,
    ))))
}
