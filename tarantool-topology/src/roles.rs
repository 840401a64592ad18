//! Role set comparison.
//!
//! Cartridge enables the dependencies of a role implicitly, so the roles it
//! reports for a replicaset may be a superset of the roles that were
//! requested. Comparisons are done on the dependency closure, with every
//! parent role whose dependencies are all enabled counted as enabled too.

use crate::types::RolesHierarchy;
use std::collections::BTreeSet;

/// Roles together with everything they depend on.
pub fn vshard_roles_set(roles: &[String], hierarchy: &RolesHierarchy) -> BTreeSet<String> {
    let mut set = BTreeSet::new();
    let mut pending: Vec<&str> = roles.iter().map(String::as_str).collect();

    while let Some(role) = pending.pop() {
        if !set.insert(role.to_string()) {
            continue;
        }
        if let Some(dependencies) = hierarchy.get(role) {
            pending.extend(dependencies.iter().map(String::as_str));
        }
    }

    set
}

/// Dependency closure of `roles`, plus every role of the hierarchy whose
/// dependencies are all in it. Roles without dependencies are never implied.
pub fn normalized_roles_set(roles: &[String], hierarchy: &RolesHierarchy) -> BTreeSet<String> {
    let mut set = vshard_roles_set(roles, hierarchy);

    loop {
        let implied: Vec<&String> = hierarchy
            .iter()
            .filter(|(parent, dependencies)| {
                !set.contains(*parent)
                    && !dependencies.is_empty()
                    && dependencies.iter().all(|dependency| set.contains(dependency))
            })
            .map(|(parent, _)| parent)
            .collect();

        if implied.is_empty() {
            return set;
        }
        set.extend(implied.into_iter().cloned());
    }
}

/// Whether two role lists enable the same roles once dependencies are taken
/// into account.
pub fn is_vshard_roles_equal(a: &[String], b: &[String], hierarchy: &RolesHierarchy) -> bool {
    normalized_roles_set(a, hierarchy) == normalized_roles_set(b, hierarchy)
}
