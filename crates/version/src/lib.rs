// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Validated name and version types shared by every other crate in the
//! dependency resolution engine.
//!
//! Everything here is a pure value type: parsing is fallible and happens
//! once at the boundary (atom parsing, repository metadata loading), and
//! the resulting types are cheap to clone, compare, and use as map keys.

pub mod name;
pub mod version;

pub use name::{
    CategoryName, KeywordName, NameError, PackageNamePart, QualifiedPackageName, RepositoryName,
    SlotName, UseFlagName,
};
pub use version::{Suffix, Version, VersionError, VERSION_RE_RAW};
