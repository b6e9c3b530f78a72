// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt::Display;
use std::ops::Deref;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::version::VERSION_RE_RAW;

#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
#[error("invalid {kind}: {value:?}: {reason}")]
pub struct NameError {
    kind: &'static str,
    value: String,
    reason: &'static str,
}

/// Defines a validated newtype wrapping a `String`, along with `FromStr`
/// backed by a regex, `Display`, and the usual value-type derives.
macro_rules! validated_name {
    ($name:ident, $kind:literal, $re:expr, $reason:literal) => {
        #[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = NameError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                static RE: Lazy<Regex> = Lazy::new(|| Regex::new($re).unwrap());
                if !RE.is_match(s) {
                    return Err(NameError {
                        kind: $kind,
                        value: s.to_string(),
                        reason: $reason,
                    });
                }
                Ok($name(s.to_string()))
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

validated_name!(
    CategoryName,
    "category name",
    r"^[A-Za-z0-9_][A-Za-z0-9+_.-]*$",
    "categories may only contain letters, digits, and '_+.-', and must not start with a separator"
);

validated_name!(
    PackageNamePart,
    "package name",
    r"^[A-Za-z0-9_][A-Za-z0-9+_-]*$",
    "package names may only contain letters, digits, and '_+-', and must not start with a separator"
);

validated_name!(
    SlotName,
    "slot name",
    r"^[A-Za-z0-9_][A-Za-z0-9_.+-]*$",
    "slot names may only contain letters, digits, and '_+.-'"
);

validated_name!(
    UseFlagName,
    "USE flag name",
    r"^[A-Za-z0-9][A-Za-z0-9+_@-]*$",
    "USE flags may only contain letters, digits, and '+_@-', and must not start with a separator"
);

validated_name!(
    RepositoryName,
    "repository name",
    r"^[A-Za-z0-9][A-Za-z0-9_-]*$",
    "repository names may only contain letters, digits, and '_-'"
);

validated_name!(
    KeywordName,
    "keyword name",
    r"^-?~?[A-Za-z0-9_-]+$",
    "keywords are an arch token optionally prefixed with '~' (testing) or written as '-*' (negative)"
);

/// A fully-qualified package name, e.g. `sys-apps/portage`.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct QualifiedPackageName {
    category: CategoryName,
    package: PackageNamePart,
}

impl QualifiedPackageName {
    pub fn new(category: CategoryName, package: PackageNamePart) -> Self {
        Self { category, package }
    }

    pub fn category(&self) -> &CategoryName {
        &self.category
    }

    pub fn package(&self) -> &PackageNamePart {
        &self.package
    }
}

impl FromStr for QualifiedPackageName {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (category, package) = s.split_once('/').ok_or(NameError {
            kind: "qualified package name",
            value: s.to_string(),
            reason: "expected \"category/package\"",
        })?;
        // A bare package-name component must not be ambiguous with a
        // trailing version string (e.g. "foo-1" could otherwise be parsed
        // as package "foo" version "1").
        if Regex::new(&format!("-{VERSION_RE_RAW}$"))
            .unwrap()
            .is_match(package)
        {
            return Err(NameError {
                kind: "qualified package name",
                value: s.to_string(),
                reason: "package name component looks like it ends in a version string",
            });
        }
        Ok(QualifiedPackageName {
            category: category.parse()?,
            package: package.parse()?,
        })
    }
}

impl Display for QualifiedPackageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.category, self.package)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_names() {
        assert!("sys-apps".parse::<CategoryName>().is_ok());
        assert!("portage".parse::<PackageNamePart>().is_ok());
        assert!("0".parse::<SlotName>().is_ok());
        assert!("amd64".parse::<KeywordName>().is_ok());
        assert!("~amd64".parse::<KeywordName>().is_ok());
        assert!("-*".parse::<KeywordName>().is_ok());
    }

    #[test]
    fn rejects_invalid_names() {
        assert!("".parse::<CategoryName>().is_err());
        assert!("/foo".parse::<CategoryName>().is_err());
    }

    #[test]
    fn qualified_package_name_round_trips() {
        let qpn: QualifiedPackageName = "sys-apps/portage".parse().unwrap();
        assert_eq!(qpn.category().as_str(), "sys-apps");
        assert_eq!(qpn.package().as_str(), "portage");
        assert_eq!(qpn.to_string(), "sys-apps/portage");
    }

    #[test]
    fn rejects_package_component_ambiguous_with_version() {
        assert!("sys-apps/foo-1.2.3".parse::<QualifiedPackageName>().is_err());
    }
}
