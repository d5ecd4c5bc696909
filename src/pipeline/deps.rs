//! Dependency artifact cache
//!
//! Compiles the pinned dependency graph once per dependency fingerprint and
//! reuses it for every project build on top of it. Source edits never reach
//! this layer.

use super::artifact::{Artifact, ArtifactCache};
use crate::cache::{fingerprint_deps, ArtifactStore, DependencyInputs, Fingerprint, Namespace};
use crate::error::{KilnError, KilnResult};
use crate::journal::Journal;
use crate::toolchain::{DependencyBuildRequest, Toolchain};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Get-or-build for dependency artifacts
pub struct DependencyCache {
    cache: ArtifactCache,
    toolchain: Arc<dyn Toolchain>,
}

impl DependencyCache {
    pub fn new(store: ArtifactStore, toolchain: Arc<dyn Toolchain>, journal: Journal) -> Self {
        Self {
            cache: ArtifactCache::new(store, Namespace::Deps, journal, |fingerprint, diagnostics| {
                KilnError::DependencyBuild {
                    fingerprint,
                    diagnostics,
                }
            }),
            toolchain,
        }
    }

    /// Fingerprint of the dependency build; pure
    pub fn fingerprint(&self, inputs: &DependencyInputs<'_>) -> KilnResult<Fingerprint> {
        fingerprint_deps(inputs)
    }

    /// Cached artifact for `fingerprint`, without building
    pub async fn lookup(&self, fingerprint: &Fingerprint) -> KilnResult<Option<Arc<Artifact>>> {
        self.cache.lookup(fingerprint).await
    }

    /// Return the cached dependency artifact, building it if needed
    pub async fn get_or_build(
        &self,
        fingerprint: &Fingerprint,
        project_dir: &Path,
        env: &BTreeMap<String, String>,
    ) -> KilnResult<Arc<Artifact>> {
        let toolchain = Arc::clone(&self.toolchain);
        let project_dir = project_dir.to_path_buf();
        let env = env.clone();
        let fp = fingerprint.to_string();

        self.cache
            .get_or_build(fingerprint, move |output_dir| async move {
                toolchain
                    .build_dependencies(&DependencyBuildRequest {
                        project_dir,
                        fingerprint: fp,
                        output_dir,
                        env,
                    })
                    .await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::scripted::ScriptedToolchain;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fingerprint(n: u8) -> Fingerprint {
        Fingerprint::from_seed(&format!("deps-{}", n))
    }

    fn setup(delay: Duration) -> (TempDir, ArtifactStore, Arc<ScriptedToolchain>, Arc<DependencyCache>) {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join("cache"));
        let toolchain = Arc::new(ScriptedToolchain::new().with_delay(delay));
        let cache = Arc::new(DependencyCache::new(
            store.clone(),
            toolchain.clone(),
            Journal::disabled(),
        ));
        (dir, store, toolchain, cache)
    }

    #[tokio::test]
    async fn builds_once_then_hits() {
        let (dir, _store, toolchain, cache) = setup(Duration::from_millis(5));
        let fp = fingerprint(1);

        let first = cache.get_or_build(&fp, dir.path(), &BTreeMap::new()).await.unwrap();
        let second = cache.get_or_build(&fp, dir.path(), &BTreeMap::new()).await.unwrap();

        assert!(first.fresh);
        assert!(!second.fresh);
        assert_eq!(first.payload, second.payload);
        assert_eq!(toolchain.deps_builds(), 1);
    }

    #[tokio::test]
    async fn concurrent_requests_build_once() {
        let (dir, _store, toolchain, cache) = setup(Duration::from_millis(100));
        let fp = fingerprint(2);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let fp = fp.clone();
            let project = dir.path().to_path_buf();
            handles.push(tokio::spawn(async move {
                cache.get_or_build(&fp, &project, &BTreeMap::new()).await.unwrap()
            }));
        }

        let mut payloads = Vec::new();
        for handle in handles {
            payloads.push(handle.await.unwrap().payload.clone());
        }

        assert_eq!(toolchain.deps_builds(), 1);
        assert!(payloads.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let (dir, store, toolchain, cache) = setup(Duration::from_millis(5));
        let fp = fingerprint(3);

        toolchain.fail_dependencies(true);
        let err = cache
            .get_or_build(&fp, dir.path(), &BTreeMap::new())
            .await
            .unwrap_err();
        match err {
            KilnError::DependencyBuild { diagnostics, .. } => {
                assert!(diagnostics[0].contains("failed to compile"));
            }
            other => panic!("expected DependencyBuild, got {other:?}"),
        }
        assert!(!store.contains(Namespace::Deps, fp.as_str()).await);

        toolchain.fail_dependencies(false);
        cache.get_or_build(&fp, dir.path(), &BTreeMap::new()).await.unwrap();
        assert_eq!(toolchain.deps_builds(), 2);
    }

    #[tokio::test]
    async fn cancelled_caller_leaves_build_running() {
        let (dir, store, toolchain, cache) = setup(Duration::from_millis(150));
        let fp = fingerprint(4);

        let first = {
            let cache = Arc::clone(&cache);
            let fp = fp.clone();
            let project = dir.path().to_path_buf();
            tokio::spawn(async move { cache.get_or_build(&fp, &project, &BTreeMap::new()).await })
        };
        while toolchain.deps_builds() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let second = {
            let cache = Arc::clone(&cache);
            let fp = fp.clone();
            let project = dir.path().to_path_buf();
            tokio::spawn(async move { cache.get_or_build(&fp, &project, &BTreeMap::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        first.abort();

        let artifact = second.await.unwrap().unwrap();
        assert_eq!(artifact.fingerprint, fp);
        assert_eq!(toolchain.deps_builds(), 1);
        assert!(store.contains(Namespace::Deps, fp.as_str()).await);
    }

    #[tokio::test]
    async fn cancelling_the_only_caller_still_populates_cache() {
        let (dir, store, toolchain, cache) = setup(Duration::from_millis(50));
        let fp = fingerprint(5);

        let caller = {
            let cache = Arc::clone(&cache);
            let fp = fp.clone();
            let project = dir.path().to_path_buf();
            tokio::spawn(async move { cache.get_or_build(&fp, &project, &BTreeMap::new()).await })
        };
        while toolchain.deps_builds() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        caller.abort();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(store.contains(Namespace::Deps, fp.as_str()).await);

        let artifact = cache.get_or_build(&fp, dir.path(), &BTreeMap::new()).await.unwrap();
        assert!(!artifact.fresh);
        assert_eq!(toolchain.deps_builds(), 1);
    }

    #[tokio::test]
    async fn corrupt_entry_is_rebuilt() {
        let (dir, store, toolchain, cache) = setup(Duration::from_millis(5));
        let fp = fingerprint(6);
        cache.get_or_build(&fp, dir.path(), &BTreeMap::new()).await.unwrap();

        std::fs::write(store.entry_path(Namespace::Deps, fp.as_str()), b"garbage").unwrap();

        let artifact = cache.get_or_build(&fp, dir.path(), &BTreeMap::new()).await.unwrap();
        assert!(artifact.fresh);
        assert_eq!(toolchain.deps_builds(), 2);
    }

    #[tokio::test]
    async fn entry_without_outputs_is_rebuilt() {
        let (dir, store, toolchain, cache) = setup(Duration::from_millis(5));
        let fp = fingerprint(7);
        cache.get_or_build(&fp, dir.path(), &BTreeMap::new()).await.unwrap();

        std::fs::remove_dir_all(store.output_dir(Namespace::Deps, fp.as_str())).unwrap();

        assert!(cache.lookup(&fp).await.unwrap().is_none());
        cache.get_or_build(&fp, dir.path(), &BTreeMap::new()).await.unwrap();
        assert_eq!(toolchain.deps_builds(), 2);
    }
}
