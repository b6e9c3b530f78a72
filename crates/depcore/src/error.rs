// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The typed error taxonomy exposed at API boundaries.
//!
//! Internal plumbing threads [`anyhow::Result`] with `.context(...)`; these
//! enums exist at the handful of seams (`add`, `resolve`, policy
//! construction) where callers need to `match` on *why* something failed,
//! not just read a message.

use version::{QualifiedPackageName, Version};

/// Repository/environment lookup misses.
#[derive(thiserror::Error, Debug)]
pub enum LookupError {
    #[error("no such package: {0}")]
    NoSuchPackage(String),
    #[error("no such version: {name}-{version}")]
    NoSuchVersion {
        name: QualifiedPackageName,
        version: Version,
    },
    #[error("no such repository: {0}")]
    NoSuchRepository(String),
    #[error("ambiguous package name {name:?}: matches {candidates:?}")]
    AmbiguousPackageName {
        name: String,
        candidates: Vec<QualifiedPackageName>,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A non-empty witness cycle, used by [`BuildError::Circular`].
///
/// The first and last element name the same resolvent, closing the loop.
#[derive(Debug, Clone)]
pub struct CycleWitness(pub Vec<String>);

impl std::fmt::Display for CycleWitness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join(" -> "))
    }
}

/// Policy-fatal conditions raised while growing the merge list.
///
/// These are caught by speculative any-of branch trials internally; only an
/// error that escapes the top-level `resolve()`/`add()` call is user-visible.
#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    #[error("no acceptable candidate for {atom} after exhausting override masks")]
    AllMasked { atom: String },
    #[error("{atom} fails only due to unmet USE requirements")]
    UseRequirementsNotMet { atom: String },
    #[error("blocker {blocker} against {target} could not be discarded")]
    Block { blocker: String, target: String },
    #[error("best candidate {candidate} is lower than installed {installed} and downgrade=error")]
    DowngradeNotAllowed {
        candidate: Version,
        installed: Version,
    },
    #[error("circular dependency that policy refuses to break: {0}")]
    Circular(CycleWitness),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors raised while constructing/validating a [`crate::policy::PolicyBundle`].
///
/// Treated as a precondition failure by the builder: it is never caught by
/// any-of branch trials, unlike [`BuildError`].
#[derive(thiserror::Error, Debug)]
pub enum PolicyError {
    #[error("invalid policy configuration: {0}")]
    Configuration(String),
    #[error("invalid default policy configuration: {0}")]
    DefaultConfig(String),
}
