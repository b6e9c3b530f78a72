// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The dep-list builder's policy bundle (§4.5): every knob that changes how
//! an otherwise-deterministic build behaves, gathered into one value so a
//! caller can construct it once and share it across an entire resolve.
//!
//! Defaults below match the reference implementation's own constructor
//! defaults rather than an arbitrary "sensible" guess.

use crate::dependency::package::PackageAtom;
use crate::error::PolicyError;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReinstallPolicy {
    Never,
    Always,
    IfUseChanged,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TargetType {
    Package,
    Set,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UpgradePolicy {
    Always,
    AsNeeded,
    Never,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DowngradePolicy {
    AsNeeded,
    Never,
    Error,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NewSlotsPolicy {
    Always,
    AsNeeded,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FallBackPolicy {
    Never,
    AsNeededExceptTargets,
    AsNeeded,
}

/// How a dependency class (DEPEND/RDEPEND/PDEPEND at various lifecycle
/// stages) is handled when the dependent package is installed vs. about to
/// be installed/rebuilt (§4.5).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DepClassPolicy {
    Discard,
    Pre,
    Post,
    PreOrPost,
    TryPost,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SuggestedPolicy {
    Show,
    Take,
    Discard,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CircularPolicy {
    Error,
    Discard,
    DiscardSilently,
}

/// How a `Dependency::UseConditional` node is evaluated while walking a
/// dependency tree (§4.5's "considering the use policy option").
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UsePolicy {
    /// Recurse into a conditional's children only if the dependent
    /// package's actual USE state satisfies the flag/invert test.
    Standard,
    /// Recurse into every conditional's children regardless of USE state.
    TakeAll,
    /// Never recurse into a conditional's children.
    Skip,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BlocksPolicy {
    Accumulate,
    Discard,
}

/// Every policy knob the classical dep-list builder consults, bundled so a
/// caller builds it once per resolve. See SPEC_FULL.md for each field's
/// default, sourced from the reference implementation's options
/// constructor.
#[derive(Clone, Debug)]
pub struct PolicyBundle {
    pub reinstall: ReinstallPolicy,
    pub target_type: TargetType,
    pub upgrade: UpgradePolicy,
    pub downgrade: DowngradePolicy,
    pub new_slots: NewSlotsPolicy,
    pub fall_back: FallBackPolicy,
    pub installed_deps_pre: DepClassPolicy,
    pub installed_deps_runtime: DepClassPolicy,
    pub installed_deps_post: DepClassPolicy,
    pub uninstalled_deps_pre: DepClassPolicy,
    pub uninstalled_deps_runtime: DepClassPolicy,
    pub uninstalled_deps_post: DepClassPolicy,
    pub uninstalled_deps_suggested: DepClassPolicy,
    pub suggested: SuggestedPolicy,
    pub circular: CircularPolicy,
    pub use_policy: UsePolicy,
    pub blocks: BlocksPolicy,
    pub dependency_tags: bool,
    pub override_masks: Vec<PackageAtom>,
}

impl Default for PolicyBundle {
    fn default() -> Self {
        PolicyBundle {
            reinstall: ReinstallPolicy::Never,
            target_type: TargetType::Package,
            upgrade: UpgradePolicy::Always,
            downgrade: DowngradePolicy::AsNeeded,
            new_slots: NewSlotsPolicy::Always,
            fall_back: FallBackPolicy::AsNeededExceptTargets,
            installed_deps_pre: DepClassPolicy::Discard,
            installed_deps_runtime: DepClassPolicy::TryPost,
            installed_deps_post: DepClassPolicy::TryPost,
            uninstalled_deps_pre: DepClassPolicy::Pre,
            uninstalled_deps_runtime: DepClassPolicy::PreOrPost,
            uninstalled_deps_post: DepClassPolicy::Post,
            uninstalled_deps_suggested: DepClassPolicy::TryPost,
            suggested: SuggestedPolicy::Show,
            circular: CircularPolicy::Error,
            use_policy: UsePolicy::Standard,
            blocks: BlocksPolicy::Accumulate,
            dependency_tags: false,
            override_masks: Vec::new(),
        }
    }
}

impl PolicyBundle {
    /// Rejects a handful of combinations that are individually valid fields
    /// but contradictory together, and override-mask atoms that carry
    /// constraints that can never apply to a mask override (blocks, USE
    /// requirements).
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.downgrade == DowngradePolicy::Error && self.upgrade == UpgradePolicy::Never {
            return Err(PolicyError::Configuration(
                "downgrade=error with upgrade=never can never be satisfied once a newer version exists"
                    .to_string(),
            ));
        }
        for atom in &self.override_masks {
            if atom.block.is_block() {
                return Err(PolicyError::Configuration(format!(
                    "override mask {atom} must not carry a block marker"
                )));
            }
        }
        Ok(())
    }
}
