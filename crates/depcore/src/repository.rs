// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The repository surface (§6.1): what the builder/resolver can ask about a
//! source of package data, independent of how that data is actually loaded
//! (ebuild trees, binary package indexes, ...).

use std::collections::HashMap;
use std::fmt::Display;

use version::{KeywordName, QualifiedPackageName, RepositoryName, SlotName, Version};

use crate::data::{IUseMap, ProvidedPackage, Slot};
use crate::dependency::license::LicenseDependency;
use crate::dependency::package::{MetadataValue, PackageDependency};
use crate::dependency::EapiProfile;
use crate::error::LookupError;

/// Identifies one specific package build (§3.4): a name, a version, and the
/// repository it came from. Two builds of the same name/version in
/// different repositories are distinct ids.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct PackageId {
    pub name: QualifiedPackageName,
    pub version: Version,
    pub repository: RepositoryName,
}

impl Display for PackageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}::{}", self.name, self.version, self.repository)
    }
}

// The name/version/repository types have no serde support of their own (see
// DESIGN.md); merge-list output only ever needs the canonical string form,
// so this serializes as that rather than deriving field-by-field.
impl serde::Serialize for PackageId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Everything about one build that the builder/resolver need, short of its
/// resolved USE state (which depends on environment/profile layering and so
/// lives behind [`crate::environment::Environment`]).
#[derive(Clone, Debug)]
pub struct PackageMetadata {
    pub eapi: EapiProfile,
    pub slot: Slot<SlotName>,
    pub iuse: IUseMap,
    pub keywords: Vec<KeywordName>,
    pub depend: PackageDependency,
    pub rdepend: PackageDependency,
    pub bdepend: Option<PackageDependency>,
    pub pdepend: PackageDependency,
    /// Suggested-only dependencies (SDEPEND, §4.5's `suggested` policy):
    /// never pulled in by default, shown or installed only when
    /// [`crate::policy::SuggestedPolicy`] says so.
    pub suggest: PackageDependency,
    pub license: LicenseDependency,
    /// The real package(s) this build stands in for, if it's an old-style
    /// virtual (flattened PROVIDE, under current USE). `None` for an
    /// ordinary package.
    pub virtual_for: Option<PackageDependency>,
    /// Backing store for `[.KEY=VALUE]` atom filters (§4.2 item 6); callers
    /// populate whichever keys they want filterable (commonly `EAPI`).
    pub metadata_kv: HashMap<String, MetadataValue>,
}

/// A source of package data: an ebuild tree, a binary package index, or (in
/// tests) a plain in-memory fixture.
pub trait Repository: Send + Sync {
    fn name(&self) -> &RepositoryName;

    /// All known versions of `name` in this repository, in no particular
    /// order; the builder is responsible for sorting candidates (§4.4).
    fn versions(&self, name: &QualifiedPackageName) -> Vec<&Version>;

    fn metadata(&self, id: &PackageId) -> Result<&PackageMetadata, LookupError>;

    fn provided_packages(&self) -> &[ProvidedPackage];
}

/// A fixture [`Repository`] backed by a plain map, for tests and for
/// exercising the builder/resolver without a real package tree.
#[derive(Clone, Debug, Default)]
pub struct InMemoryRepository {
    name: Option<RepositoryName>,
    packages: HashMap<PackageId, PackageMetadata>,
    provided: Vec<ProvidedPackage>,
}

impl InMemoryRepository {
    pub fn new(name: RepositoryName) -> Self {
        Self {
            name: Some(name),
            packages: HashMap::new(),
            provided: Vec::new(),
        }
    }

    pub fn with_package(mut self, id: PackageId, metadata: PackageMetadata) -> Self {
        self.packages.insert(id, metadata);
        self
    }

    pub fn with_provided(mut self, provided: ProvidedPackage) -> Self {
        self.provided.push(provided);
        self
    }
}

impl Repository for InMemoryRepository {
    fn name(&self) -> &RepositoryName {
        self.name.as_ref().expect("InMemoryRepository must be constructed with RepositoryName::new")
    }

    fn versions(&self, name: &QualifiedPackageName) -> Vec<&Version> {
        self.packages
            .keys()
            .filter(|id| &id.name == name)
            .map(|id| &id.version)
            .collect()
    }

    fn metadata(&self, id: &PackageId) -> Result<&PackageMetadata, LookupError> {
        self.packages
            .get(id)
            .ok_or_else(|| LookupError::NoSuchVersion {
                name: id.name.clone(),
                version: id.version.clone(),
            })
    }

    fn provided_packages(&self) -> &[ProvidedPackage] {
        &self.provided
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> PackageMetadata {
        PackageMetadata {
            eapi: EapiProfile::PERMISSIVE,
            slot: Slot {
                main: "0".parse().unwrap(),
                sub: "0".parse().unwrap(),
            },
            iuse: IUseMap::new(),
            keywords: vec!["amd64".parse().unwrap()],
            depend: "".parse().unwrap(),
            rdepend: "".parse().unwrap(),
            bdepend: None,
            pdepend: "".parse().unwrap(),
            suggest: "".parse().unwrap(),
            license: "MIT".parse().unwrap(),
            virtual_for: None,
            metadata_kv: HashMap::new(),
        }
    }

    #[test]
    fn looks_up_inserted_package() {
        let id = PackageId {
            name: "sys-apps/portage".parse().unwrap(),
            version: "3.0.30".parse().unwrap(),
            repository: "gentoo".parse().unwrap(),
        };
        let repo = InMemoryRepository::new("gentoo".parse().unwrap())
            .with_package(id.clone(), sample_metadata());

        assert!(repo.metadata(&id).is_ok());
        assert_eq!(repo.versions(&id.name).len(), 1);
    }

    #[test]
    fn missing_version_is_lookup_error() {
        let repo = InMemoryRepository::new("gentoo".parse().unwrap());
        let id = PackageId {
            name: "sys-apps/portage".parse().unwrap(),
            version: "3.0.30".parse().unwrap(),
            repository: "gentoo".parse().unwrap(),
        };
        assert!(matches!(repo.metadata(&id), Err(LookupError::NoSuchVersion { .. })));
    }
}
