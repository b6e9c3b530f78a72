// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::{
    collections::HashMap,
    fmt::Display,
    ops::{Deref, DerefMut},
};

use version::{SlotName, Version};

/// A dictionary of variables defined by the host configuration (e.g. a
/// profile or `make.conf` equivalent). Opaque to the core beyond lookups.
pub type Vars = HashMap<String, String>;

/// Represents USE flags disabled/enabled for a particular package.
///
/// It should contain all USE flags defined explicitly in IUSE, and those
/// available implicitly due to profile-injected IUSE. Other USE flags are
/// omitted/hidden in the map.
///
/// This is not an alias of [`HashMap`] because we need to implement
/// [`AsRef<UseMap>`]; [`AsRef`] is not reflexive, so we implement [`Deref`]/
/// [`DerefMut`] instead to make this behave like a plain map.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UseMap(HashMap<String, bool>);

impl UseMap {
    pub fn new() -> Self {
        UseMap(HashMap::new())
    }
}

impl<T: Into<HashMap<String, bool>>> From<T> for UseMap {
    fn from(value: T) -> Self {
        UseMap(value.into())
    }
}

impl FromIterator<(String, bool)> for UseMap {
    fn from_iter<T: IntoIterator<Item = (String, bool)>>(iter: T) -> Self {
        UseMap(HashMap::from_iter(iter))
    }
}

impl Deref for UseMap {
    type Target = HashMap<String, bool>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for UseMap {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl AsRef<UseMap> for UseMap {
    fn as_ref(&self) -> &UseMap {
        self
    }
}

/// Declared IUSE: maps a flag name to its default state absent other input.
pub type IUseMap = HashMap<String, bool>;

/// A package's declared SLOT, parsed into main/subslot.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Slot<S = String> {
    pub main: S,
    pub sub: S,
}

impl<'s, S: From<&'s str>> Slot<S> {
    pub fn new(s: &'s (impl AsRef<str> + ?Sized)) -> Self {
        let s = s.as_ref();
        let (main, sub) = s.split_once('/').unwrap_or((s, s));
        Self {
            main: main.into(),
            sub: sub.into(),
        }
    }
}

impl Slot<SlotName> {
    pub fn matches_main(&self, main: &SlotName) -> bool {
        &self.main == main
    }
}

impl<S: Display> Display for Slot<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", &self.main, &self.sub)
    }
}

/// A package the host configures as "treat as already installed" without
/// it existing in any repository or the installed-state view. See
/// `ProvidedPackage` users in `repository`/`deplist`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvidedPackage {
    pub package_name: String,
    pub version: Version,
}
