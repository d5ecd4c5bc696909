//! Dependency resolution
//!
//! Turns manifest constraints into a pinned lockfile using a registry
//! snapshot. An existing lockfile that still satisfies the manifest is
//! returned unchanged so re-running never churns the lock.
//!
//! The search is a deterministic backtracking walk: package names are
//! visited in sorted order and candidates are tried highest version first,
//! with one selected version per package name.

use crate::error::{KilnError, KilnResult};
use crate::project::lockfile::{LockedPackage, Lockfile};
use crate::project::registry::{Registry, RegistryEntry};
use semver::VersionReq;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Outcome of a resolution run
#[derive(Debug, Clone)]
pub struct Resolution {
    /// The pinned dependency graph
    pub lockfile: Lockfile,

    /// Whether the lockfile differs from the pre-existing one
    pub changed: bool,
}

/// Resolve root requirements into a lockfile.
///
/// `root` names the requirer of the root constraints in conflict reports.
pub fn resolve(
    root: &str,
    roots: &BTreeMap<String, VersionReq>,
    existing: Option<&Lockfile>,
    registry: Option<&Registry>,
) -> KilnResult<Resolution> {
    if let Some(lockfile) = existing {
        if lockfile.satisfies(roots) {
            debug!("Existing lockfile satisfies manifest, keeping it");
            return Ok(Resolution {
                lockfile: lockfile.clone(),
                changed: false,
            });
        }
        info!("Lockfile is stale, re-resolving");
    }

    if roots.is_empty() {
        let lockfile = Lockfile::from_packages(Vec::new());
        let changed = existing != Some(&lockfile);
        return Ok(Resolution { lockfile, changed });
    }

    let registry = registry.ok_or(KilnError::RegistryMissing)?;
    let lockfile = Resolver::new(root, roots, registry).run()?;
    let changed = existing != Some(&lockfile);

    Ok(Resolution { lockfile, changed })
}

#[derive(Debug, Clone)]
struct Requirement {
    req: VersionReq,
    by: String,
}

impl Requirement {
    fn describe(&self) -> String {
        format!("{} (required by {})", self.req, self.by)
    }
}

struct Resolver<'a> {
    registry: &'a Registry,
    requirements: BTreeMap<String, Vec<Requirement>>,
    chosen: BTreeMap<String, &'a RegistryEntry>,
    conflict: Option<(String, Vec<String>)>,
}

impl<'a> Resolver<'a> {
    fn new(root: &str, roots: &BTreeMap<String, VersionReq>, registry: &'a Registry) -> Self {
        let requirements = roots
            .iter()
            .map(|(name, req)| {
                (
                    name.clone(),
                    vec![Requirement {
                        req: req.clone(),
                        by: root.to_string(),
                    }],
                )
            })
            .collect();

        Self {
            registry,
            requirements,
            chosen: BTreeMap::new(),
            conflict: None,
        }
    }

    fn run(mut self) -> KilnResult<Lockfile> {
        if self.search() {
            let packages = self
                .chosen
                .values()
                .map(|entry| LockedPackage {
                    name: entry.name.clone(),
                    version: entry.version.clone(),
                    checksum: entry.checksum.clone(),
                    dependencies: entry.dependencies.clone(),
                })
                .collect();
            return Ok(Lockfile::from_packages(packages));
        }

        let (package, requirements) = self
            .conflict
            .unwrap_or_else(|| ("<root>".to_string(), vec!["no assignment exists".to_string()]));
        Err(KilnError::Unsatisfiable {
            package,
            requirements,
        })
    }

    fn record_conflict(&mut self, name: &str, requirements: Vec<String>) {
        if self.conflict.is_none() {
            self.conflict = Some((name.to_string(), requirements));
        }
    }

    fn search(&mut self) -> bool {
        let Some(name) = self
            .requirements
            .keys()
            .find(|n| !self.chosen.contains_key(*n))
            .cloned()
        else {
            return true;
        };

        let reqs = self.requirements.get(&name).cloned().unwrap_or_default();
        let registry = self.registry;
        let candidates: Vec<&'a RegistryEntry> = registry
            .versions(&name)
            .iter()
            .filter(|entry| reqs.iter().all(|r| r.req.matches(&entry.version)))
            .collect();

        if candidates.is_empty() {
            let described = reqs.iter().map(Requirement::describe).collect();
            self.record_conflict(&name, described);
            return false;
        }

        for candidate in candidates {
            let requirer = format!("{} {}", candidate.name, candidate.version);

            if let Some((dep, req)) = candidate.dependencies.iter().find(|(dep, req)| {
                self.chosen
                    .get(*dep)
                    .is_some_and(|selected| !req.matches(&selected.version))
            }) {
                let mut described: Vec<String> = self
                    .requirements
                    .get(dep)
                    .map(|rs| rs.iter().map(Requirement::describe).collect())
                    .unwrap_or_default();
                described.push(format!("{} (required by {})", req, requirer));
                self.record_conflict(dep, described);
                continue;
            }

            for (dep, req) in &candidate.dependencies {
                self.requirements.entry(dep.clone()).or_default().push(Requirement {
                    req: req.clone(),
                    by: requirer.clone(),
                });
            }
            self.chosen.insert(name.clone(), candidate);

            if self.search() {
                return true;
            }

            self.chosen.remove(&name);
            for dep in candidate.dependencies.keys() {
                if let Some(rs) = self.requirements.get_mut(dep) {
                    rs.pop();
                    if rs.is_empty() {
                        self.requirements.remove(dep);
                    }
                }
            }
        }

        false
    }
}
