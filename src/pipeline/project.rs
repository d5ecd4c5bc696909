//! Project builder
//!
//! Compiles the project on top of a dependency artifact. Keyed by the full
//! fingerprint, which folds the source snapshot hash into the dependency
//! fingerprint.

use super::artifact::{Artifact, ArtifactCache};
use crate::cache::{fingerprint_project, ArtifactStore, Fingerprint, Namespace};
use crate::error::{KilnError, KilnResult};
use crate::journal::Journal;
use crate::project::{Manifest, SourceSnapshot};
use crate::toolchain::{ProjectBuildRequest, ToolFailure, Toolchain};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Get-or-build for project artifacts
pub struct ProjectBuilder {
    cache: ArtifactCache,
    toolchain: Arc<dyn Toolchain>,
}

impl ProjectBuilder {
    pub fn new(store: ArtifactStore, toolchain: Arc<dyn Toolchain>, journal: Journal) -> Self {
        Self {
            cache: ArtifactCache::new(store, Namespace::Project, journal, |fingerprint, diagnostics| {
                KilnError::ProjectBuild {
                    fingerprint,
                    diagnostics,
                }
            }),
            toolchain,
        }
    }

    /// Full fingerprint for building `manifest`'s package from `snapshot`
    pub fn fingerprint(
        &self,
        deps: &Fingerprint,
        snapshot: &SourceSnapshot,
        manifest: &Manifest,
    ) -> KilnResult<Fingerprint> {
        fingerprint_project(
            deps,
            snapshot.hash(),
            &manifest.package.name,
            &manifest.package.version,
            &self.toolchain.project_recipe(),
        )
    }

    /// Return the cached project artifact for `fingerprint`, building it on
    /// top of `deps` if needed.
    ///
    /// The toolchain compiles the live project tree, so the sources are
    /// hashed again afterwards; an edit made mid-build fails the build
    /// instead of being cached under the older fingerprint.
    pub async fn build(
        &self,
        fingerprint: &Fingerprint,
        deps: &Artifact,
        snapshot: &SourceSnapshot,
        env: &BTreeMap<String, String>,
    ) -> KilnResult<Arc<Artifact>> {
        let toolchain = Arc::clone(&self.toolchain);
        let snapshot = snapshot.clone();
        let request_base = ProjectBuildRequest {
            project_dir: snapshot.root().to_path_buf(),
            fingerprint: fingerprint.to_string(),
            deps_output: deps.output_dir.clone(),
            output_dir: Default::default(),
            env: env.clone(),
        };

        self.cache
            .get_or_build(fingerprint, move |output_dir| async move {
                let request = ProjectBuildRequest {
                    output_dir,
                    ..request_base
                };
                let output = toolchain.build_project(&request).await?;
                match snapshot.recapture().await {
                    Ok(current) if current.hash() == snapshot.hash() => Ok(output),
                    Ok(_) => Err(ToolFailure::new(
                        "project sources changed during the build; run it again",
                    )),
                    Err(e) => Err(ToolFailure::new(format!("failed to re-read project sources: {}", e))),
                }
            })
            .await
    }
}
