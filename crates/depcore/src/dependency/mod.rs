// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The generic dependency-expression tree (§3.3) and its traversal/matching
//! machinery.
//!
//! Rather than a family of visitor classes (one per tree "kind": dependency
//! trees, license trees, ...), every kind is one instantiation of the
//! generic [`Dependency<M>`] enum over a [`DependencyMeta`] that names the
//! leaf type and the parser that produces it. Consumers match exhaustively;
//! the compiler, not a double-dispatch visitor, enforces completeness.

pub mod algorithm;
pub mod license;
pub mod package;
pub mod parser;

use std::fmt::{self, Display};
use std::str::FromStr;

use rayon::prelude::*;

use crate::data::UseMap;
pub use parser::DepParseError;

/// Associates a leaf type with the parser that produces it, so a single
/// generic [`Dependency`] type can be instantiated for package deps,
/// license expressions, and so on.
pub trait DependencyMeta: Clone + fmt::Debug + Eq {
    type Leaf: Clone + fmt::Debug + Eq + Display + Send + Sync;
    type Parser: parser::DependencyParserCommon<Self>;
}

/// A two-valued predicate: does `target` satisfy `self`?
pub trait Predicate<T> {
    fn predicate_matches(&self, target: &T) -> bool;
}

/// A three-valued predicate: `Ok(Some(bool))` for a definite answer,
/// `Ok(None)` when the answer depends on information `target` doesn't carry
/// (e.g. a USE flag this package doesn't declare), `Err` on a hard failure.
pub trait ThreeValuedPredicate<T> {
    fn predicate_matches(&self, target: &T) -> anyhow::Result<Option<bool>>;
}

/// Lets the generic [`Dependency::predicate_matches`] evaluate
/// use-conditional nodes without knowing anything else about `T`.
pub trait UseFlagQuery {
    fn use_flag(&self, flag: &str) -> Option<bool>;
}

impl UseFlagQuery for UseMap {
    fn use_flag(&self, flag: &str) -> Option<bool> {
        self.get(flag).copied()
    }
}

/// An EAPI's feature matrix, threaded explicitly through parser, matcher,
/// and builder instead of branching on an EAPI string mid-algorithm (design
/// note: "EAPI matrix").
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EapiProfile {
    pub level: u8,
    pub allows_exactly_one_of: bool,
    pub allows_at_most_one_of: bool,
    pub empty_any_of_is_vacuous_true: bool,
    pub supports_bdepend: bool,
    pub supports_subslots: bool,
}

impl EapiProfile {
    /// The most permissive profile this crate knows about (EAPI 8). Used as
    /// the default for [`FromStr`] convenience impls and tests; production
    /// callers should look up the profile matching the package's declared
    /// EAPI instead.
    pub const PERMISSIVE: EapiProfile = EapiProfile {
        level: 8,
        allows_exactly_one_of: true,
        allows_at_most_one_of: true,
        empty_any_of_is_vacuous_true: true,
        supports_bdepend: true,
        supports_subslots: true,
    };

    pub fn for_level(level: u8) -> EapiProfile {
        EapiProfile {
            level,
            allows_exactly_one_of: level >= 5,
            allows_at_most_one_of: level >= 5,
            empty_any_of_is_vacuous_true: true,
            supports_bdepend: level >= 7,
            supports_subslots: level >= 5,
        }
    }
}

/// A parsed dependency expression tree, generic over the leaf family.
///
/// See §3.3: this enum folds the distilled spec's seven node kinds down to
/// six variants by dropping the separate "block leaf" variant (a block is
/// just a leaf whose atom carries a block marker — see
/// `package::PackageAtom::block`) and representing "plain text leaf" as
/// `Leaf` of a string-like meta (see [`license`]).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Dependency<M: DependencyMeta> {
    Leaf(M::Leaf),
    AllOf(Vec<Dependency<M>>),
    AnyOf(Vec<Dependency<M>>),
    ExactlyOneOf(Vec<Dependency<M>>),
    AtMostOneOf(Vec<Dependency<M>>),
    UseConditional {
        flag: String,
        invert: bool,
        children: Vec<Dependency<M>>,
    },
}

impl<M: DependencyMeta> Dependency<M> {
    pub fn leaves(&self) -> Vec<&M::Leaf> {
        let mut out = Vec::new();
        self.walk_leaves(&mut |leaf| out.push(leaf));
        out
    }

    pub fn walk_leaves<'a>(&'a self, visit: &mut impl FnMut(&'a M::Leaf)) {
        match self {
            Dependency::Leaf(leaf) => visit(leaf),
            Dependency::AllOf(children)
            | Dependency::AnyOf(children)
            | Dependency::ExactlyOneOf(children)
            | Dependency::AtMostOneOf(children)
            | Dependency::UseConditional { children, .. } => {
                for child in children {
                    child.walk_leaves(visit);
                }
            }
        }
    }

    /// Structurally transforms every leaf, preserving tree shape.
    pub fn map_tree<M2, F>(&self, f: &F) -> Dependency<M2>
    where
        M2: DependencyMeta,
        F: Fn(&M::Leaf) -> M2::Leaf,
    {
        match self {
            Dependency::Leaf(leaf) => Dependency::Leaf(f(leaf)),
            Dependency::AllOf(c) => Dependency::AllOf(c.iter().map(|d| d.map_tree(f)).collect()),
            Dependency::AnyOf(c) => Dependency::AnyOf(c.iter().map(|d| d.map_tree(f)).collect()),
            Dependency::ExactlyOneOf(c) => {
                Dependency::ExactlyOneOf(c.iter().map(|d| d.map_tree(f)).collect())
            }
            Dependency::AtMostOneOf(c) => {
                Dependency::AtMostOneOf(c.iter().map(|d| d.map_tree(f)).collect())
            }
            Dependency::UseConditional {
                flag,
                invert,
                children,
            } => Dependency::UseConditional {
                flag: flag.clone(),
                invert: *invert,
                children: children.iter().map(|d| d.map_tree(f)).collect(),
            },
        }
    }

    /// Like [`Self::map_tree`], but leaves may fail to convert.
    pub fn try_map_tree<M2, E, F>(&self, f: &F) -> Result<Dependency<M2>, E>
    where
        M2: DependencyMeta,
        F: Fn(&M::Leaf) -> Result<M2::Leaf, E>,
    {
        Ok(match self {
            Dependency::Leaf(leaf) => Dependency::Leaf(f(leaf)?),
            Dependency::AllOf(c) => Dependency::AllOf(
                c.iter()
                    .map(|d| d.try_map_tree(f))
                    .collect::<Result<_, E>>()?,
            ),
            Dependency::AnyOf(c) => Dependency::AnyOf(
                c.iter()
                    .map(|d| d.try_map_tree(f))
                    .collect::<Result<_, E>>()?,
            ),
            Dependency::ExactlyOneOf(c) => Dependency::ExactlyOneOf(
                c.iter()
                    .map(|d| d.try_map_tree(f))
                    .collect::<Result<_, E>>()?,
            ),
            Dependency::AtMostOneOf(c) => Dependency::AtMostOneOf(
                c.iter()
                    .map(|d| d.try_map_tree(f))
                    .collect::<Result<_, E>>()?,
            ),
            Dependency::UseConditional {
                flag,
                invert,
                children,
            } => Dependency::UseConditional {
                flag: flag.clone(),
                invert: *invert,
                children: children
                    .iter()
                    .map(|d| d.try_map_tree(f))
                    .collect::<Result<_, E>>()?,
            },
        })
    }

    /// Parallel variant of [`Self::try_map_tree`] for when leaf conversion
    /// does real work (e.g. loading package metadata behind each atom).
    pub fn try_map_tree_par<M2, E, F>(&self, f: &F) -> Result<Dependency<M2>, E>
    where
        M2: DependencyMeta,
        E: Send,
        F: Fn(&M::Leaf) -> Result<M2::Leaf, E> + Sync,
    {
        Ok(match self {
            Dependency::Leaf(leaf) => Dependency::Leaf(f(leaf)?),
            Dependency::AllOf(c) => Dependency::AllOf(
                c.par_iter()
                    .map(|d| d.try_map_tree_par(f))
                    .collect::<Result<_, E>>()?,
            ),
            Dependency::AnyOf(c) => Dependency::AnyOf(
                c.par_iter()
                    .map(|d| d.try_map_tree_par(f))
                    .collect::<Result<_, E>>()?,
            ),
            Dependency::ExactlyOneOf(c) => Dependency::ExactlyOneOf(
                c.par_iter()
                    .map(|d| d.try_map_tree_par(f))
                    .collect::<Result<_, E>>()?,
            ),
            Dependency::AtMostOneOf(c) => Dependency::AtMostOneOf(
                c.par_iter()
                    .map(|d| d.try_map_tree_par(f))
                    .collect::<Result<_, E>>()?,
            ),
            Dependency::UseConditional {
                flag,
                invert,
                children,
            } => Dependency::UseConditional {
                flag: flag.clone(),
                invert: *invert,
                children: children
                    .par_iter()
                    .map(|d| d.try_map_tree_par(f))
                    .collect::<Result<_, E>>()?,
            },
        })
    }

    pub fn parse_with(eapi: &EapiProfile, input: &str) -> Result<Self, DepParseError>
    where
        M::Parser: parser::DependencyParserCommon<M>,
    {
        parser::parse_full(eapi, input)
    }
}

impl<M: DependencyMeta> FromStr for Dependency<M> {
    type Err = DepParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_with(&EapiProfile::PERMISSIVE, s)
    }
}

impl<M: DependencyMeta> Display for Dependency<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dependency::Leaf(leaf) => write!(f, "{leaf}"),
            Dependency::AllOf(children) => {
                write!(
                    f,
                    "{}",
                    children.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(" ")
                )
            }
            Dependency::AnyOf(children) => write_group(f, "||", children),
            Dependency::ExactlyOneOf(children) => write_group(f, "^^", children),
            Dependency::AtMostOneOf(children) => write_group(f, "??", children),
            Dependency::UseConditional {
                flag,
                invert,
                children,
            } => {
                if *invert {
                    write!(f, "!{flag}? (")?;
                } else {
                    write!(f, "{flag}? (")?;
                }
                for child in children {
                    write!(f, " {child}")?;
                }
                write!(f, " )")
            }
        }
    }
}

fn write_group<M: DependencyMeta>(
    f: &mut fmt::Formatter<'_>,
    op: &str,
    children: &[Dependency<M>],
) -> fmt::Result {
    write!(f, "{op} (")?;
    for child in children {
        write!(f, " {child}")?;
    }
    write!(f, " )")
}

impl<M, T> ThreeValuedPredicate<T> for Dependency<M>
where
    M: DependencyMeta,
    M::Leaf: ThreeValuedPredicate<T>,
    T: UseFlagQuery,
{
    fn predicate_matches(&self, target: &T) -> anyhow::Result<Option<bool>> {
        match self {
            Dependency::Leaf(leaf) => leaf.predicate_matches(target),
            Dependency::AllOf(children) => all_of(children, target),
            Dependency::ExactlyOneOf(children) => {
                let (count, unknown) = count_true(children, target)?;
                Ok(if unknown { None } else { Some(count == 1) })
            }
            Dependency::AtMostOneOf(children) => {
                let (count, unknown) = count_true(children, target)?;
                Ok(if unknown { None } else { Some(count <= 1) })
            }
            Dependency::AnyOf(children) => {
                let mut unknown = false;
                for child in children {
                    match child.predicate_matches(target)? {
                        Some(true) => return Ok(Some(true)),
                        None => unknown = true,
                        Some(false) => {}
                    }
                }
                Ok(if unknown { None } else { Some(false) })
            }
            Dependency::UseConditional {
                flag,
                invert,
                children,
            } => match target.use_flag(flag) {
                None => Ok(None),
                Some(state) => {
                    if state != *invert {
                        all_of(children, target)
                    } else {
                        // Condition false: the group contributes nothing.
                        Ok(Some(true))
                    }
                }
            },
        }
    }
}

fn all_of<M, T>(children: &[Dependency<M>], target: &T) -> anyhow::Result<Option<bool>>
where
    M: DependencyMeta,
    M::Leaf: ThreeValuedPredicate<T>,
    T: UseFlagQuery,
{
    let mut unknown = false;
    for child in children {
        match child.predicate_matches(target)? {
            Some(false) => return Ok(Some(false)),
            None => unknown = true,
            Some(true) => {}
        }
    }
    Ok(if unknown { None } else { Some(true) })
}

fn count_true<M, T>(children: &[Dependency<M>], target: &T) -> anyhow::Result<(usize, bool)>
where
    M: DependencyMeta,
    M::Leaf: ThreeValuedPredicate<T>,
    T: UseFlagQuery,
{
    let mut count = 0;
    let mut unknown = false;
    for child in children {
        match child.predicate_matches(target)? {
            Some(true) => count += 1,
            None => unknown = true,
            Some(false) => {}
        }
    }
    Ok((count, unknown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::license::{LicenseAtom, LicenseDependency, LicenseDependencyMeta};

    #[test]
    fn leaves_collects_every_leaf_in_order() {
        let tree: LicenseDependency = "GPL-2 ( MIT BSD )".parse().unwrap();
        let leaves: Vec<String> = tree.leaves().into_iter().map(|l| l.0.clone()).collect();
        assert_eq!(leaves, vec!["GPL-2", "MIT", "BSD"]);
    }

    #[test]
    fn map_tree_preserves_shape() {
        let tree: LicenseDependency = "gpl-2 mit".parse().unwrap();
        let upper: Dependency<LicenseDependencyMeta> =
            tree.map_tree(&|leaf: &LicenseAtom| LicenseAtom(leaf.0.to_uppercase()));
        assert_eq!(upper.to_string(), "GPL-2 MIT");
    }
}
