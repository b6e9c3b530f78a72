// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The constraint-propagating resolver (§4.6): a second-generation
//! replacement for [`crate::deplist::DepListBuilder`] that accumulates every
//! constraint on a package before deciding its candidate, instead of
//! deciding on first encounter.
//!
//! `SuggestRestart` (the reference implementation's internal backtracking
//! signal) is modeled as a plain return value, [`ResolverStep::Restart`],
//! rather than an exception: [`Resolver::resolve`] loops on it internally,
//! so it never reaches a caller.

pub mod nag;

use std::fmt::Display;

use tracing::{debug, instrument, trace};
use version::{QualifiedPackageName, SlotName};

use crate::data::UseMap;
use crate::dependency::algorithm::{rank_any_of_branches, InstalledSatisfactionQuery};
use crate::dependency::package::{PackageAtom, PackageDependency};
use crate::dependency::Dependency;
use crate::environment::Environment;
use crate::error::BuildError;
use crate::repository::{PackageId, Repository};

use nag::{Arrow, ArrowClass, Nag};

/// A single destination a package can be installed to. The reference
/// implementation distinguishes the target root from alternate roots used
/// for cross-building; this crate models only the common case and treats
/// that distinction as out of scope (see DESIGN.md).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum DestinationType {
    Slash,
}

/// The identity under which the resolver aggregates constraints (§4.6): one
/// resolution per distinct (name, slot, destination) triple.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Resolvent {
    pub name: QualifiedPackageName,
    pub slot: Option<SlotName>,
    pub destination: DestinationType,
}

impl Display for Resolvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.slot {
            Some(slot) => write!(f, "{}:{slot}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Why a constraint exists, for diagnostics and for `WasUsedBy`-style
/// backtracking (§4.6).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConstraintReason {
    Target,
    Preset,
    Set(String),
    DependencyOnIdentifiedParent(Resolvent),
    LikeOtherDestinationType,
    ViaBinary,
    WasUsedBy(Resolvent),
    Dependent,
}

/// How strongly a constraint prefers reusing whatever is already installed
/// over picking a new candidate. Ordered so [`UseExistingPreference::strictest`]
/// can fold several constraints' preferences into one.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub enum UseExistingPreference {
    MustInstallNew,
    PreferNew,
    PreferExisting,
    MustUseExisting,
}

impl UseExistingPreference {
    pub fn strictest(prefs: impl IntoIterator<Item = UseExistingPreference>) -> UseExistingPreference {
        prefs
            .into_iter()
            .max()
            .unwrap_or(UseExistingPreference::PreferExisting)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Constraint {
    pub atom: PackageAtom,
    pub reason: ConstraintReason,
    pub use_existing: UseExistingPreference,
}

/// What the resolver decided to do about one resolvent (§4.6).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Decision {
    ChangesToMake(PackageId),
    ExistingNoChange(PackageId),
    ExistingWithAttributes(PackageId),
    NothingNoChange,
    UnableToDecide,
    Remove(PackageId),
    Break,
}

#[derive(Clone, Debug)]
pub struct Resolution {
    pub resolvent: Resolvent,
    pub constraints: Vec<Constraint>,
    pub decision: Option<Decision>,
    pub arrows: Vec<Arrow>,
}

impl Resolution {
    fn new(resolvent: Resolvent) -> Self {
        Resolution {
            resolvent,
            constraints: Vec::new(),
            decision: None,
            arrows: Vec::new(),
        }
    }
}

/// A constraint to seed into the next pass after a [`ResolverStep::Restart`]
/// (§4.6/§5's `SuggestRestart`).
#[derive(Clone, Debug)]
pub struct PreloadedConstraint {
    pub resolvent: Resolvent,
    pub constraint: Constraint,
}

/// The ordered outcome of a completed resolve: every resolution the NAG
/// reached a decision for, in dependency order.
#[derive(Clone, Debug)]
pub struct Plan {
    pub decisions: Vec<(Resolvent, Decision)>,
}

impl Plan {
    /// Only the decisions that actually require installer action.
    pub fn merge_list(&self) -> Vec<PackageId> {
        self.decisions
            .iter()
            .filter_map(|(_, decision)| match decision {
                Decision::ChangesToMake(id) | Decision::ExistingWithAttributes(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }
}

/// What one resolver pass produced: either a finished, ordered [`Plan`], or
/// a signal to re-plan with one more constraint preloaded.
#[derive(Clone, Debug)]
pub enum ResolverStep {
    Decided(Plan),
    Restart(PreloadedConstraint),
}

const MAX_RESTARTS: usize = 64;

pub struct Resolver<'a> {
    repository: &'a dyn Repository,
    environment: &'a dyn Environment,
}

struct InstalledQuery<'a> {
    environment: &'a dyn Environment,
}

impl InstalledSatisfactionQuery for InstalledQuery<'_> {
    fn is_already_satisfied(&self, atom: &PackageAtom) -> bool {
        atom.package_name()
            .is_some_and(|name| self.environment.installed(name).is_some())
    }
}

impl<'a> Resolver<'a> {
    pub fn new(repository: &'a dyn Repository, environment: &'a dyn Environment) -> Self {
        Self { repository, environment }
    }

    /// Runs passes until one decides cleanly, restarting with each
    /// preloaded constraint a previous pass raised. Bounded so a resolver
    /// bug turns into an error instead of a hang.
    #[instrument(skip(self, targets))]
    pub fn resolve(&self, targets: &[PackageAtom]) -> Result<Plan, BuildError> {
        let mut preloaded = Vec::new();
        for _ in 0..MAX_RESTARTS {
            match self.run_pass(targets, &preloaded)? {
                ResolverStep::Decided(plan) => return Ok(plan),
                ResolverStep::Restart(next) => {
                    debug!(resolvent = %next.resolvent, "restarting with a preloaded constraint");
                    preloaded.push(next);
                }
            }
        }
        Err(BuildError::Other(anyhow::anyhow!(
            "resolver did not converge after {MAX_RESTARTS} restarts"
        )))
    }

    fn resolvent_for(&self, name: &QualifiedPackageName) -> Resolvent {
        Resolvent {
            name: name.clone(),
            slot: None,
            destination: DestinationType::Slash,
        }
    }

    fn run_pass(
        &self,
        targets: &[PackageAtom],
        preloaded: &[PreloadedConstraint],
    ) -> Result<ResolverStep, BuildError> {
        let mut nag = Nag::new();
        let mut queue: Vec<(Resolvent, Constraint)> = Vec::new();

        for atom in targets {
            if atom.block.is_block() {
                continue;
            }
            let Some(name) = atom.package_name() else { continue };
            queue.push((
                self.resolvent_for(name),
                Constraint {
                    atom: atom.clone(),
                    reason: ConstraintReason::Target,
                    use_existing: UseExistingPreference::PreferExisting,
                },
            ));
        }
        for pre in preloaded {
            queue.push((pre.resolvent.clone(), pre.constraint.clone()));
        }

        while let Some((resolvent, constraint)) = queue.pop() {
            nag.entry(resolvent.clone()).constraints.push(constraint);
            let atoms: Vec<PackageAtom> = nag
                .get(&resolvent)
                .unwrap()
                .constraints
                .iter()
                .map(|c| c.atom.clone())
                .collect();
            let prior_decision = nag.get(&resolvent).unwrap().decision.clone();

            if let Some(decision) = prior_decision {
                // Revisit: check whether the previously-decided candidate
                // still satisfies every constraint now on file.
                let still_valid = match &decision {
                    Decision::ChangesToMake(id) | Decision::ExistingNoChange(id) => {
                        self.candidate_matches_all(id, &atoms)?
                    }
                    _ => true,
                };
                if !still_valid {
                    let newest = nag.get(&resolvent).unwrap().constraints.last().unwrap().clone();
                    return Ok(ResolverStep::Restart(PreloadedConstraint {
                        resolvent,
                        constraint: newest,
                    }));
                }
                continue;
            }

            let decision = self.decide_candidate(&resolvent, &atoms)?;
            trace!(resolvent = %resolvent, decision = ?decision, "decided");

            let id_for_deps = match &decision {
                Decision::ChangesToMake(id) | Decision::ExistingNoChange(id) | Decision::ExistingWithAttributes(id) => {
                    Some(id.clone())
                }
                _ => None,
            };
            nag.entry(resolvent.clone()).decision = Some(decision);

            if let Some(id) = id_for_deps {
                self.expand_dependencies(&resolvent, &id, &mut nag, &mut queue)?;
            }
        }

        let order = nag
            .order()
            .map_err(BuildError::Circular)?;
        let decisions = order
            .into_iter()
            .map(|resolvent| {
                let decision = nag.get(&resolvent).and_then(|r| r.decision.clone()).unwrap_or(Decision::UnableToDecide);
                (resolvent, decision)
            })
            .collect();
        Ok(ResolverStep::Decided(Plan { decisions }))
    }

    /// Picks a candidate satisfying every constraint on file for `resolvent`
    /// (§4.6 step 2): highest version among those matching every constraint
    /// atom, short-circuiting to "nothing to do" if an installed build
    /// already satisfies everything and no constraint demands otherwise.
    fn decide_candidate(&self, resolvent: &Resolvent, atoms: &[PackageAtom]) -> Result<Decision, BuildError> {
        if let Some(installed) = self.environment.installed(&resolvent.name) {
            if self.candidate_matches_all(installed, atoms)? {
                return Ok(Decision::ExistingNoChange(installed.clone()));
            }
        }

        let mut versions: Vec<_> = self.repository.versions(&resolvent.name).into_iter().cloned().collect();
        versions.sort();
        versions.reverse();

        let repository_name = self.repository.name().clone();
        for version in versions {
            let id = PackageId {
                name: resolvent.name.clone(),
                version,
                repository: repository_name.clone(),
            };
            if self.candidate_matches_all(&id, atoms)? {
                if self.environment.mask_reasons(&id).is_empty() {
                    return Ok(Decision::ChangesToMake(id));
                }
            }
        }

        if atoms.is_empty() {
            Ok(Decision::NothingNoChange)
        } else {
            Ok(Decision::UnableToDecide)
        }
    }

    fn candidate_matches_all(&self, id: &PackageId, atoms: &[PackageAtom]) -> Result<bool, BuildError> {
        let metadata = self
            .repository
            .metadata(id)
            .map_err(|e| BuildError::Other(e.into()))?;
        let no_use = UseMap::new();
        let package_ref = crate::dependency::package::PackageRef {
            name: &id.name,
            version: &id.version,
            slot: &metadata.slot,
            repository: &id.repository,
            use_map: &no_use,
            metadata: &metadata.metadata_kv,
            masked: !self.environment.mask_reasons(id).is_empty(),
        };
        Ok(atoms.iter().all(|atom| atom.matches_ignoring_use(&package_ref)))
    }

    fn expand_dependencies(
        &self,
        resolvent: &Resolvent,
        id: &PackageId,
        nag: &mut Nag,
        queue: &mut Vec<(Resolvent, Constraint)>,
    ) -> Result<(), BuildError> {
        let metadata = self
            .repository
            .metadata(id)
            .map_err(|e| BuildError::Other(e.into()))?;
        let use_map = self.environment.use_map(id, &metadata.iuse);

        for (tree, class) in [
            (&metadata.depend, ArrowClass::Build),
            (&metadata.rdepend, ArrowClass::Run),
            (&metadata.pdepend, ArrowClass::Post),
        ] {
            for atom in self.sanitize(tree, &use_map) {
                let Some(name) = atom.package_name() else { continue };
                let dep_resolvent = self.resolvent_for(name);
                let already_installed = match self.environment.installed(name) {
                    Some(installed) => self.candidate_matches_all(installed, std::slice::from_ref(&atom))?,
                    None => false,
                };
                let ignorable_pass = match (class, already_installed) {
                    (_, true) => 1,
                    (ArrowClass::Post, false) => 2,
                    (_, false) => 0,
                };
                nag.entry(resolvent.clone()).arrows.push(Arrow {
                    to: dep_resolvent.clone(),
                    ignorable_pass,
                    class,
                    build_all_met: already_installed,
                });
                queue.push((
                    dep_resolvent,
                    Constraint {
                        atom,
                        reason: ConstraintReason::DependencyOnIdentifiedParent(resolvent.clone()),
                        use_existing: UseExistingPreference::PreferExisting,
                    },
                ));
            }
        }
        Ok(())
    }

    /// Flattens a dependency tree into a flat atom list for a single
    /// resolvent's dependency expansion (§4.6 step 3): `AllOf`/
    /// `UseConditional` expand structurally, while `AnyOf`/`ExactlyOneOf`/
    /// `AtMostOneOf` pick one ranked branch rather than tracking every
    /// branch as a separate possibility, mirroring the classical builder's
    /// simplification (see DESIGN.md).
    fn sanitize(&self, tree: &PackageDependency, source_use: &UseMap) -> Vec<PackageAtom> {
        let mut out = Vec::new();
        self.sanitize_into(tree, source_use, &mut out);
        out
    }

    fn sanitize_into(&self, tree: &PackageDependency, source_use: &UseMap, out: &mut Vec<PackageAtom>) {
        match tree {
            Dependency::Leaf(atom) => {
                if !atom.block.is_block() {
                    out.push(atom.clone());
                }
            }
            Dependency::AllOf(children) => {
                for child in children {
                    self.sanitize_into(child, source_use, out);
                }
            }
            Dependency::UseConditional { flag, invert, children } => {
                let active = source_use.get(flag.as_str()).copied().unwrap_or(false) != *invert;
                if active {
                    for child in children {
                        self.sanitize_into(child, source_use, out);
                    }
                }
            }
            Dependency::AnyOf(children) | Dependency::ExactlyOneOf(children) | Dependency::AtMostOneOf(children) => {
                let installed = InstalledQuery {
                    environment: self.environment,
                };
                if let Some(branch) = rank_any_of_branches(children, &installed).into_iter().next() {
                    self.sanitize_into(branch, source_use, out);
                }
            }
        }
    }
}
