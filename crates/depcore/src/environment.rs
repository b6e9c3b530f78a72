// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The environment surface (§6.2): host configuration, masks, and
//! already-installed state, independent of where that configuration is
//! actually stored (profiles, `package.mask`, a world file, ...).

use std::collections::{HashMap, HashSet};

use version::{KeywordName, QualifiedPackageName};

use crate::data::{IUseMap, UseMap, Vars};
use crate::repository::PackageId;

/// One reason a candidate is masked (§4.3): tracked individually so
/// diagnostics can name every contributing reason, not just the first.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MaskReason {
    /// No keyword in the package's `KEYWORDS` is stable (or `~testing`,
    /// under a testing-accepting profile) for the target architecture.
    Keyword,
    /// Matched by a `package.mask`-equivalent entry.
    PackageMask,
    /// Masked by profile (`-*` or an explicit profile mask entry).
    Profile,
    /// Carries a license the environment's accepted set doesn't cover.
    License,
}

/// The set of [`MaskReason`]s that apply to one candidate. Empty means
/// unmasked.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MaskReasonSet(Vec<MaskReason>);

impl MaskReasonSet {
    pub fn empty() -> Self {
        MaskReasonSet(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, reason: MaskReason) -> bool {
        self.0.contains(&reason)
    }

    pub fn reasons(&self) -> &[MaskReason] {
        &self.0
    }

    pub fn insert(&mut self, reason: MaskReason) {
        if !self.contains(reason) {
            self.0.push(reason);
        }
    }
}

impl FromIterator<MaskReason> for MaskReasonSet {
    fn from_iter<T: IntoIterator<Item = MaskReason>>(iter: T) -> Self {
        let mut set = MaskReasonSet::empty();
        for reason in iter {
            set.insert(reason);
        }
        set
    }
}

/// Host configuration, masking policy, and already-installed state: the
/// second input (besides a [`crate::repository::Repository`]) the builder
/// and resolver need.
pub trait Environment: Send + Sync {
    fn accepted_licenses(&self) -> &HashSet<String>;

    fn target_keywords(&self) -> &HashSet<KeywordName>;

    /// Resolves a candidate's actual USE state from its declared IUSE plus
    /// profile/user configuration layering. Flags outside `iuse` are
    /// omitted from the result, per [`UseMap`]'s contract.
    fn use_map(&self, id: &PackageId, iuse: &IUseMap) -> UseMap;

    fn mask_reasons(&self, id: &PackageId) -> MaskReasonSet;

    /// The currently-installed build for `name`, if any.
    fn installed(&self, name: &QualifiedPackageName) -> Option<&PackageId>;

    fn vars(&self) -> &Vars;
}

/// A fixture [`Environment`] for tests: every axis is a plain map/set the
/// test populates directly, with no profile stacking.
#[derive(Clone, Debug, Default)]
pub struct InMemoryEnvironment {
    accepted_licenses: HashSet<String>,
    target_keywords: HashSet<KeywordName>,
    use_overrides: HashMap<PackageId, UseMap>,
    default_use: UseMap,
    masks: HashMap<PackageId, MaskReasonSet>,
    installed: HashMap<QualifiedPackageName, PackageId>,
    vars: Vars,
}

impl InMemoryEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept_license(mut self, license: impl Into<String>) -> Self {
        self.accepted_licenses.insert(license.into());
        self
    }

    pub fn with_target_keyword(mut self, keyword: KeywordName) -> Self {
        self.target_keywords.insert(keyword);
        self
    }

    pub fn with_use_override(mut self, id: PackageId, use_map: UseMap) -> Self {
        self.use_overrides.insert(id, use_map);
        self
    }

    pub fn with_mask(mut self, id: PackageId, reasons: MaskReasonSet) -> Self {
        self.masks.insert(id, reasons);
        self
    }

    pub fn with_installed(mut self, id: PackageId) -> Self {
        self.installed.insert(id.name.clone(), id);
        self
    }
}

impl Environment for InMemoryEnvironment {
    fn accepted_licenses(&self) -> &HashSet<String> {
        &self.accepted_licenses
    }

    fn target_keywords(&self) -> &HashSet<KeywordName> {
        &self.target_keywords
    }

    fn use_map(&self, id: &PackageId, iuse: &IUseMap) -> UseMap {
        if let Some(over) = self.use_overrides.get(id) {
            return over.clone();
        }
        iuse.iter()
            .map(|(flag, default)| {
                let state = self.default_use.get(flag).copied().unwrap_or(*default);
                (flag.clone(), state)
            })
            .collect()
    }

    fn mask_reasons(&self, id: &PackageId) -> MaskReasonSet {
        self.masks.get(id).cloned().unwrap_or_else(MaskReasonSet::empty)
    }

    fn installed(&self, name: &QualifiedPackageName) -> Option<&PackageId> {
        self.installed.get(name)
    }

    fn vars(&self) -> &Vars {
        &self.vars
    }
}
