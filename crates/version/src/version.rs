// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::cmp::Ordering;
use std::fmt::Display;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

/// Raw (uncompiled) regular expression matching a bare version string, with
/// no surrounding anchors. Exposed so that callers composing larger grammars
/// (package-name-with-version, atom version ranges) can embed it directly.
pub const VERSION_RE_RAW: &str =
    r"[0-9]+(?:\.[0-9]+)*[a-z]?(?:_(?:alpha|beta|pre|rc|p)[0-9]*)*(?:-r[0-9]+)?";

static VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("^(?:{VERSION_RE_RAW})$")).unwrap());

static VERSION_FULL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        ^
        (?P<numbers>[0-9]+(?:\.[0-9]+)*)
        (?P<letter>[a-z])?
        (?P<suffixes>(?:_(?:alpha|beta|pre|rc|p)[0-9]*)*)
        (?:-r(?P<rev>[0-9]+))?
        $
        ",
    )
    .unwrap()
});

static SUFFIX_ITEM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_(alpha|beta|pre|rc|p)([0-9]*)").unwrap());

/// A version suffix component, in PMS sort order.
///
/// [`Suffix::Release`] is never produced by the parser: it exists only as
/// the implicit filler used when comparing two versions whose suffix lists
/// have different lengths (a version with no more suffixes ranks as if it
/// had one more "release" suffix at that position).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Suffix {
    Alpha,
    Beta,
    Pre,
    Rc,
    Release,
    P,
}

impl Suffix {
    fn rank(self) -> u8 {
        match self {
            Suffix::Alpha => 0,
            Suffix::Beta => 1,
            Suffix::Pre => 2,
            Suffix::Rc => 3,
            Suffix::Release => 4,
            Suffix::P => 5,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Suffix::Alpha => "alpha",
            Suffix::Beta => "beta",
            Suffix::Pre => "pre",
            Suffix::Rc => "rc",
            Suffix::Release => "",
            Suffix::P => "p",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "alpha" => Some(Suffix::Alpha),
            "beta" => Some(Suffix::Beta),
            "pre" => Some(Suffix::Pre),
            "rc" => Some(Suffix::Rc),
            "p" => Some(Suffix::P),
            _ => None,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum VersionError {
    #[error("malformed version string: {0:?}")]
    Malformed(String),
}

/// A Portage-style package version, e.g. `1.2.3b_alpha4-r5`.
///
/// Equality and ordering both follow the PMS version comparison algorithm,
/// not structural/string equality: `1.01` and `1.010` compare equal even
/// though they are stored with different raw digit strings (preserved for
/// [`Display`]).
#[derive(Clone, Debug)]
pub struct Version {
    numbers: Vec<String>,
    letter: Option<char>,
    suffixes: Vec<(Suffix, Option<u64>)>,
    revision: Option<u64>,
}

impl Version {
    pub fn try_new(s: &str) -> Result<Self, VersionError> {
        Self::from_str(s)
    }

    /// Returns a copy of this version with any `-rN` revision stripped.
    pub fn without_revision(&self) -> Version {
        Version {
            revision: None,
            ..self.clone()
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision.unwrap_or(0)
    }

    /// Returns whether this version's canonical string representation has
    /// `prefix`'s canonical string representation as a literal prefix.
    ///
    /// This mirrors the glob-equal (`=pkg-1.2*`) matching rule: it is a
    /// textual prefix match, not a numeric-component-aware one, so `1.10`
    /// does *not* start_with `1.1` is true as plain text even though they
    /// are numerically distinct versions. That textual looseness is the
    /// documented (if imperfect) behavior of wildcard atoms.
    pub fn starts_with(&self, prefix: &Version) -> bool {
        self.to_string().starts_with(&prefix.to_string())
    }

    /// Attempts to split `input` into a `(remainder, version)` pair by
    /// finding the rightmost `-VERSION` suffix, e.g.
    /// `"sys-apps/systemd-utils-250.4-r1"` splits into
    /// `("sys-apps/systemd-utils", 250.4-r1)`.
    ///
    /// Returns `None` if no valid version suffix exists at all.
    pub fn from_str_suffix(input: &str) -> Option<(&str, Version)> {
        static SPLIT_RE: Lazy<Regex> =
            Lazy::new(|| Regex::new(&format!("^(?P<name>.+)-(?P<version>{VERSION_RE_RAW})$")).unwrap());
        let caps = SPLIT_RE.captures(input)?;
        let name = caps.name("name")?.as_str();
        let version_str = caps.name("version")?.as_str();
        let version = Version::try_new(version_str).ok()?;
        Some((name, version))
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !VERSION_RE.is_match(s) {
            return Err(VersionError::Malformed(s.to_string()));
        }
        let caps = VERSION_FULL_RE
            .captures(s)
            .ok_or_else(|| VersionError::Malformed(s.to_string()))?;

        let numbers = caps["numbers"]
            .split('.')
            .map(|s| s.to_string())
            .collect();
        let letter = caps.name("letter").map(|m| m.as_str().chars().next().unwrap());
        let suffixes = SUFFIX_ITEM_RE
            .captures_iter(&caps["suffixes"])
            .map(|c| {
                let kind = Suffix::parse(&c[1]).expect("regex only matches known suffix kinds");
                let num = c[2].parse::<u64>().ok();
                (kind, num)
            })
            .collect();
        let revision = caps.name("rev").map(|m| m.as_str().parse::<u64>().unwrap());

        Ok(Version {
            numbers,
            letter,
            suffixes,
            revision,
        })
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.numbers.join("."))?;
        if let Some(letter) = self.letter {
            write!(f, "{letter}")?;
        }
        for (kind, num) in &self.suffixes {
            write!(f, "_{}", kind.as_str())?;
            if let Some(num) = num {
                write!(f, "{num}")?;
            }
        }
        if let Some(rev) = self.revision {
            write!(f, "-r{rev}")?;
        }
        Ok(())
    }
}

fn has_leading_zero(s: &str) -> bool {
    s.len() > 1 && s.starts_with('0')
}

/// Compares two numeric version components per the PMS rule: components
/// with a leading zero are compared as strings (after trimming trailing
/// zeros), everything else is compared numerically (as strings of digits,
/// to sidestep overflow on pathologically long components).
fn compare_numeric_component(a: &str, b: &str) -> Ordering {
    if has_leading_zero(a) || has_leading_zero(b) {
        let ta = a.trim_end_matches('0');
        let tb = b.trim_end_matches('0');
        ta.cmp(tb)
    } else {
        let na = a.trim_start_matches('0');
        let na = if na.is_empty() { "0" } else { na };
        let nb = b.trim_start_matches('0');
        let nb = if nb.is_empty() { "0" } else { nb };
        if na.len() != nb.len() {
            na.len().cmp(&nb.len())
        } else {
            na.cmp(nb)
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.numbers.len().max(other.numbers.len());
        for i in 0..len {
            let a = self.numbers.get(i).map(String::as_str).unwrap_or("0");
            let b = other.numbers.get(i).map(String::as_str).unwrap_or("0");
            match compare_numeric_component(a, b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }

        match self.letter.cmp(&other.letter) {
            Ordering::Equal => {}
            ord => return ord,
        }

        let slen = self.suffixes.len().max(other.suffixes.len());
        for i in 0..slen {
            let (ak, an) = self.suffixes.get(i).copied().unwrap_or((Suffix::Release, Some(0)));
            let (bk, bn) = other.suffixes.get(i).copied().unwrap_or((Suffix::Release, Some(0)));
            match ak.rank().cmp(&bk.rank()) {
                Ordering::Equal => match an.unwrap_or(0).cmp(&bn.unwrap_or(0)) {
                    Ordering::Equal => continue,
                    ord => return ord,
                },
                ord => return ord,
            }
        }

        self.revision().cmp(&other.revision())
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}
