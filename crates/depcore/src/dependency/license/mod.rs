// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The "plain text leaf" instantiation of [`Dependency`] (§3.3), used for
//! LICENSE expressions. Unlike package dependency trees, leaves here are
//! bare tokens with no atom structure; conversely package/block leaves are
//! illegal in this tree (there simply is no variant for them).

use std::collections::HashSet;
use std::fmt::Display;

use super::{Dependency, DependencyMeta, EapiProfile, ThreeValuedPredicate, UseFlagQuery};
use crate::data::UseMap;

mod parser;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LicenseDependencyMeta;

impl DependencyMeta for LicenseDependencyMeta {
    type Leaf = LicenseAtom;
    type Parser = parser::LicenseDependencyParser;
}

/// Alias of [`Dependency`] specialized to license expressions.
pub type LicenseDependency = Dependency<LicenseDependencyMeta>;

/// A single plain-text token in a LICENSE string, e.g. `GPL-2` or `MIT`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct LicenseAtom(pub String);

impl Display for LicenseAtom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Context against which a license tree is evaluated: the set of license
/// tokens the environment/user has accepted, plus the USE state of the
/// package the tree belongs to (USE-conditional groups inside LICENSE are
/// legal and common).
pub struct LicenseContext<'a> {
    pub accepted: &'a HashSet<String>,
    pub use_map: &'a UseMap,
}

impl UseFlagQuery for LicenseContext<'_> {
    fn use_flag(&self, flag: &str) -> Option<bool> {
        self.use_map.get(flag).copied()
    }
}

impl ThreeValuedPredicate<LicenseContext<'_>> for LicenseAtom {
    fn predicate_matches(&self, target: &LicenseContext<'_>) -> anyhow::Result<Option<bool>> {
        Ok(Some(target.accepted.contains(&self.0)))
    }
}

pub fn parse(eapi: &EapiProfile, input: &str) -> Result<LicenseDependency, super::parser::DepParseError> {
    Dependency::parse_with(eapi, input)
}
