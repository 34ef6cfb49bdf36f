use crate::cli::GroupBy;
use crate::scope::ScopeMap;
use crate::types::{Violation, WorkUnit};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, trace, warn};

/// Split remaining violations into work units, one droid each.
///
/// Every violation not excluded lands in exactly one unit. Units are ordered by
/// file, then by location. Exclude globs match paths relative to `root`, and
/// relative file names are read from under `root` when grouping by scope.
pub fn plan(
    violations: Vec<Violation>,
    group_by: GroupBy,
    exclude: &[String],
    root: &Path,
) -> Vec<WorkUnit> {
    debug!(
        "Planning {} violations grouped by {:?}",
        violations.len(),
        group_by
    );
    let exclude = build_globset(exclude);

    let mut by_file: BTreeMap<String, Vec<Violation>> = BTreeMap::new();
    for violation in violations {
        let file = Path::new(&violation.filename);
        if exclude.is_match(file.strip_prefix(root).unwrap_or(file)) {
            debug!(
                "Skipping excluded {} in {}",
                violation.code_or_unknown(),
                violation.filename
            );
            continue;
        }
        by_file
            .entry(violation.filename.clone())
            .or_default()
            .push(violation);
    }

    let mut units = Vec::new();
    for (file, mut file_violations) in by_file {
        file_violations.sort_by_key(|v| v.location);
        match group_by {
            GroupBy::Scope => {
                let scopes = load_scope_map(&root.join(&file));
                let mut by_scope: Vec<(String, Vec<Violation>)> = Vec::new();
                for violation in file_violations {
                    let scope = scopes.scope_for(violation.location.row);
                    match by_scope.iter_mut().find(|(name, _)| name == scope) {
                        Some((_, group)) => group.push(violation),
                        None => by_scope.push((scope.to_string(), vec![violation])),
                    }
                }
                trace!("{} scope(s) with violations in {}", by_scope.len(), file);
                for (scope, violations) in by_scope {
                    units.push(WorkUnit {
                        id: units.len(),
                        file: file.clone(),
                        scope: Some(scope),
                        violations,
                    });
                }
            }
            GroupBy::Violation => {
                for violation in file_violations {
                    units.push(WorkUnit {
                        id: units.len(),
                        file: file.clone(),
                        scope: None,
                        violations: vec![violation],
                    });
                }
            }
            GroupBy::File => {
                trace!("{} violations in {}", file_violations.len(), file);
                units.push(WorkUnit {
                    id: units.len(),
                    file,
                    scope: None,
                    violations: file_violations,
                });
            }
        }
    }
    units
}

/// Scope map of a source file; unreadable files put everything at module level
fn load_scope_map(path: &Path) -> ScopeMap {
    match std::fs::read_to_string(path) {
        Ok(source) => ScopeMap::parse(&source),
        Err(e) => {
            debug!("Cannot read {} for scopes: {}", path.display(), e);
            ScopeMap::default()
        }
    }
}

fn build_globset(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => warn!("Invalid exclude pattern '{}': {}", pattern, e),
        }
    }
    builder.build().unwrap_or_else(|e| {
        warn!("Failed to build exclude globset: {}", e);
        GlobSet::empty()
    })
}
