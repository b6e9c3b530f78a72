// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Ranks the branches of an `||` group so the builder tries the most
//! promising one first (§4.7).
//!
//! The constants below are deliberately tunable: they encode a preference
//! order, not a correctness requirement, and tests only assert relative
//! ordering between branches, never exact scores.

use crate::dependency::package::{PackageAtom, PackageDependency, VersionOp};
use crate::dependency::Dependency;

/// Score contribution for a branch that is already satisfied by something
/// installed, vs. one that would need new work. Tunable.
const SCORE_ALREADY_INSTALLED: i64 = 1000;
/// Per-atom bonus for a branch containing fewer atoms overall (prefers the
/// "smaller" choice when neither is already installed). Tunable.
const SCORE_PER_FEWER_ATOM: i64 = 10;
/// Bonus applied per atom carrying a lower-bound version operator, which
/// tends to accept more existing candidates than an exact pin. Tunable.
const SCORE_PER_PERMISSIVE_OPERATOR: i64 = 1;

/// Queries the set of atoms that installed packages already satisfy, so
/// scoring can prefer branches that need no new installs.
pub trait InstalledSatisfactionQuery {
    fn is_already_satisfied(&self, atom: &PackageAtom) -> bool;
}

/// Orders the branches of an `||` group, most preferred first, per the
/// scoring rule in §4.7: branches satisfied by an already-installed package
/// outrank everything else; among the rest, fewer/more-permissive atoms win.
pub fn rank_any_of_branches<'a, Q: InstalledSatisfactionQuery>(
    branches: &'a [PackageDependency],
    installed: &Q,
) -> Vec<&'a PackageDependency> {
    let mut scored: Vec<(i64, &PackageDependency)> = branches
        .iter()
        .map(|branch| (score_branch(branch, installed), branch))
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().map(|(_, branch)| branch).collect()
}

fn score_branch<Q: InstalledSatisfactionQuery>(branch: &PackageDependency, installed: &Q) -> i64 {
    let leaves = branch.leaves();
    if leaves.iter().all(|atom| installed.is_already_satisfied(atom)) && !leaves.is_empty() {
        return SCORE_ALREADY_INSTALLED;
    }

    let atom_count = leaves.len() as i64;
    let permissive_bonus: i64 = leaves
        .iter()
        .flat_map(|atom| atom.version_reqs.iter())
        .filter(|(op, _)| matches!(op, VersionOp::GreaterOrEqual | VersionOp::Greater))
        .count() as i64
        * SCORE_PER_PERMISSIVE_OPERATOR;

    permissive_bonus - atom_count * SCORE_PER_FEWER_ATOM
}

/// Simplifies a dependency tree's redundant structure without changing its
/// matching semantics: collapses single-child groups and drops empty `AllOf`
/// nodes left behind by a USE-conditional whose branch compiled out. Used by
/// the builder before it walks a tree, so debug output and error messages
/// name leaner trees.
pub fn simplify<M: crate::dependency::DependencyMeta>(tree: Dependency<M>) -> Dependency<M> {
    match tree {
        Dependency::AllOf(children) => {
            let simplified: Vec<_> = children.into_iter().map(simplify).collect();
            let mut flattened = Vec::with_capacity(simplified.len());
            for child in simplified {
                match child {
                    Dependency::AllOf(grandchildren) => flattened.extend(grandchildren),
                    other => flattened.push(other),
                }
            }
            match flattened.len() {
                1 => flattened.into_iter().next().unwrap(),
                _ => Dependency::AllOf(flattened),
            }
        }
        Dependency::AnyOf(children) => Dependency::AnyOf(children.into_iter().map(simplify).collect()),
        Dependency::ExactlyOneOf(children) => {
            Dependency::ExactlyOneOf(children.into_iter().map(simplify).collect())
        }
        Dependency::AtMostOneOf(children) => {
            Dependency::AtMostOneOf(children.into_iter().map(simplify).collect())
        }
        Dependency::UseConditional { flag, invert, children } => Dependency::UseConditional {
            flag,
            invert,
            children: children.into_iter().map(simplify).collect(),
        },
        leaf @ Dependency::Leaf(_) => leaf,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::package::PackageDependency;
    use std::collections::HashSet;

    struct FakeInstalled(HashSet<String>);

    impl InstalledSatisfactionQuery for FakeInstalled {
        fn is_already_satisfied(&self, atom: &PackageAtom) -> bool {
            atom.package_name()
                .map(|name| self.0.contains(&name.to_string()))
                .unwrap_or(false)
        }
    }

    #[test]
    fn prefers_already_installed_branch() {
        let a: PackageDependency = "sys-apps/a".parse().unwrap();
        let b: PackageDependency = "sys-apps/b".parse().unwrap();
        let installed = FakeInstalled(["sys-apps/b".to_string()].into_iter().collect());

        let ranked = rank_any_of_branches(&[a.clone(), b.clone()], &installed);
        assert_eq!(ranked[0], &b);
    }

    #[test]
    fn prefers_fewer_atoms_when_nothing_installed() {
        let one: PackageDependency = "sys-apps/a".parse().unwrap();
        let two: PackageDependency = "sys-apps/a sys-apps/b".parse().unwrap();
        let installed = FakeInstalled(HashSet::new());

        let ranked = rank_any_of_branches(&[two, one.clone()], &installed);
        assert_eq!(ranked[0], &one);
    }

    #[test]
    fn simplify_flattens_single_child_all_of() {
        let tree: PackageDependency = "( sys-apps/a )".parse().unwrap();
        let simplified = simplify(tree);
        assert!(matches!(simplified, Dependency::Leaf(_)));
    }
}
