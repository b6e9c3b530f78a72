// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The package dependency spec ("atom", §3.2) and its instantiation of the
//! generic dependency tree (§3.3) for DEPEND/RDEPEND/PDEPEND-style strings.

use std::collections::HashMap;
use std::fmt::Display;

use version::{QualifiedPackageName, RepositoryName, SlotName, Version};

use super::{Dependency, DependencyMeta};
use crate::data::{Slot, UseMap};

pub mod parser;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PackageDependencyMeta;

impl DependencyMeta for PackageDependencyMeta {
    type Leaf = PackageAtom;
    type Parser = parser::PackageDependencyParser;
}

/// Alias of [`Dependency`] specialized to package dependency trees.
pub type PackageDependency = Dependency<PackageDependencyMeta>;

/// A package's identity as seen by the matcher: everything [`PackageAtom`]
/// can test against. Borrowed so repeated matching doesn't clone metadata.
#[derive(Clone, Copy, Debug)]
pub struct PackageRef<'a> {
    pub name: &'a QualifiedPackageName,
    pub version: &'a Version,
    pub slot: &'a Slot<SlotName>,
    pub repository: &'a RepositoryName,
    pub use_map: &'a UseMap,
    pub metadata: &'a HashMap<String, MetadataValue>,
    /// Whether the environment currently masks this build. Consulted by
    /// [`PackageAtom::matches_ignoring_use`] against `installable_to`; callers
    /// with no mask concept of their own (most tests) can pass `false`.
    pub masked: bool,
}

/// A package metadata value as addressed by a `[.KEY=VALUE]` requirement
/// (§3.2/§4.2 item 6): stringified per its shape before comparison.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MetadataValue {
    Str(String),
    List(Vec<String>),
    Id(QualifiedPackageName),
}

impl MetadataValue {
    pub fn stringify(&self) -> String {
        match self {
            MetadataValue::Str(s) => s.clone(),
            MetadataValue::List(items) => items.join(" "),
            MetadataValue::Id(id) => id.to_string(),
        }
    }
}

/// Block strength, serialized as the marker that precedes the atom text.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum_macros::Display, strum_macros::EnumString)]
pub enum Block {
    #[strum(serialize = "")]
    None,
    #[strum(serialize = "!")]
    Weak,
    #[strum(serialize = "!!")]
    Strong,
}

impl Block {
    pub fn is_block(&self) -> bool {
        !matches!(self, Block::None)
    }
}

/// Version comparison operator (§3.1). `Equal { wildcard }` distinguishes
/// plain `=` from glob-equal (`=pkg-1.2*`); the wildcard bit comes from a
/// trailing `*` in the atom's version text, not from a distinct operator
/// token, so it is folded into this variant rather than given its own.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VersionOp {
    Less,
    LessOrEqual,
    Equal { wildcard: bool },
    /// `~`: matches ignoring revision.
    TildeEqual,
    GreaterOrEqual,
    Greater,
    /// `~>`: pessimistic/compatible-release match. Not part of the grammar
    /// this is distilled from; see SPEC_FULL.md's Open Questions for the
    /// chosen semantics.
    PessimisticCompatible,
}

impl Display for VersionOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VersionOp::Less => "<",
            VersionOp::LessOrEqual => "<=",
            VersionOp::Equal { .. } => "=",
            VersionOp::TildeEqual => "~",
            VersionOp::GreaterOrEqual => ">=",
            VersionOp::Greater => ">",
            VersionOp::PessimisticCompatible => "~>",
        };
        write!(f, "{s}")
    }
}

impl VersionOp {
    pub fn matches(&self, target: &Version, required: &Version) -> bool {
        match self {
            VersionOp::Less => target < required,
            VersionOp::LessOrEqual => target <= required,
            VersionOp::Equal { wildcard: false } => target == required,
            VersionOp::Equal { wildcard: true } => target.starts_with(required),
            VersionOp::TildeEqual => target.without_revision() == required.without_revision(),
            VersionOp::GreaterOrEqual => target >= required,
            VersionOp::Greater => target > required,
            VersionOp::PessimisticCompatible => {
                target >= required && target < &pessimistic_upper_bound(required)
            }
        }
    }
}

fn pessimistic_upper_bound(required: &Version) -> Version {
    use once_cell::sync::Lazy;
    use regex::Regex;
    static NUMERIC_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+(?:\.[0-9]+)*").unwrap());

    let s = required.to_string();
    let caps = NUMERIC_PREFIX
        .find(&s)
        .expect("a parsed Version always starts with a numeric component");
    let mut parts: Vec<u64> = caps
        .as_str()
        .split('.')
        .map(|p| p.parse().unwrap_or(0))
        .collect();
    if let Some(last) = parts.last_mut() {
        *last += 1;
    }
    let bumped = parts
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(".");
    bumped.parse().expect("incrementing a numeric component stays numeric")
}

/// How several version requirements on one atom combine (§4.1's
/// `&`/`|` grouping inside `[]`; see SPEC_FULL.md's Open Questions).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum VersionCombine {
    #[default]
    And,
    Or,
}

/// Slot requirement (§3.2/§4.2 item 3). `lock` models the trailing `=`
/// ("lock to whatever slot ends up chosen"); enforcing the lock against a
/// previously-resolved slot is the builder's job, not the matcher's — see
/// [`Self::matches`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SlotRequirement {
    pub slot: Option<(SlotName, Option<SlotName>)>,
    pub lock: bool,
}

impl SlotRequirement {
    pub fn matches(&self, candidate: &Slot<SlotName>) -> bool {
        match &self.slot {
            None => true,
            Some((main, sub)) => {
                candidate.main == *main && sub.as_ref().map(|s| *s == candidate.sub).unwrap_or(true)
            }
        }
    }
}

impl Display for SlotRequirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, ":")?;
        match &self.slot {
            None => write!(f, "*")?,
            Some((main, None)) => write!(f, "{main}")?,
            Some((main, Some(sub))) => write!(f, "{main}/{sub}")?,
        }
        if self.lock {
            write!(f, "=")?;
        }
        Ok(())
    }
}

/// In-repository / from-repository requirement (`::repo`, `::src->dst`).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RepositoryRequirement {
    In(RepositoryName),
    FromTo {
        from: RepositoryName,
        to: RepositoryName,
    },
}

impl RepositoryRequirement {
    pub fn matches(&self, source: &RepositoryName, destination: Option<&RepositoryName>) -> bool {
        match self {
            RepositoryRequirement::In(name) => name == source,
            RepositoryRequirement::FromTo { from, to } => {
                from == source && destination.map(|d| d == to).unwrap_or(true)
            }
        }
    }
}

impl Display for RepositoryRequirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepositoryRequirement::In(name) => write!(f, "::{name}"),
            RepositoryRequirement::FromTo { from, to } => write!(f, "::{from}->{to}"),
        }
    }
}

/// `?`/`??` suffix: per SPEC_FULL.md, `?` requires strict installability,
/// `??` additionally accepts masked candidates.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InstallableToMode {
    Strict,
    IncludeMasked,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstallableToRequirement {
    pub repository_or_path: String,
    pub mode: InstallableToMode,
}

/// One `[.KEY=VALUE]` metadata filter.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyValueRequirement {
    pub key: String,
    pub value: String,
}

/// How a USE requirement's desired state is computed (§3.2).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UseRequirementOp {
    /// `flag` / `-flag`: a fixed desired state.
    Required,
    /// `flag=` / `!flag=`: must match (or, negated, must differ from) the
    /// dependent package's own state for the same flag.
    Synchronized,
    /// `flag?` / `!flag?`: only constraining when the dependent package's
    /// own flag is (or, negated, isn't) enabled.
    ConditionalRequired,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UseRequirement {
    pub negate: bool,
    pub flag: String,
    pub op: UseRequirementOp,
    /// `(+)`/`(-)` default applied when the flag is absent from IUSE.
    pub missing_default: Option<bool>,
}

impl UseRequirement {
    pub fn matches(&self, source_use: &UseMap, target_use: &UseMap) -> anyhow::Result<bool> {
        let resolve = |map: &UseMap| -> Option<bool> { map.get(&self.flag).copied().or(self.missing_default) };

        let desired = match self.op {
            UseRequirementOp::Required => !self.negate,
            UseRequirementOp::Synchronized => {
                let source_state = resolve(source_use).ok_or_else(|| {
                    anyhow::anyhow!(
                        "dependent package does not declare USE flag {:?} and no default given",
                        self.flag
                    )
                })?;
                if self.negate {
                    !source_state
                } else {
                    source_state
                }
            }
            UseRequirementOp::ConditionalRequired => {
                let source_state = source_use.get(&self.flag).copied().unwrap_or(false);
                let triggers = if self.negate { !source_state } else { source_state };
                if !triggers {
                    return Ok(true);
                }
                !self.negate
            }
        };

        let target_state = resolve(target_use).ok_or_else(|| {
            anyhow::anyhow!(
                "target package does not declare USE flag {:?} and no default given",
                self.flag
            )
        })?;
        Ok(target_state == desired)
    }
}

impl Display for UseRequirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.op {
            UseRequirementOp::Required => {
                if self.negate {
                    write!(f, "-{}", self.flag)
                } else {
                    write!(f, "{}", self.flag)
                }
            }
            UseRequirementOp::Synchronized => {
                if self.negate {
                    write!(f, "!{}=", self.flag)
                } else {
                    write!(f, "{}=", self.flag)
                }
            }
            UseRequirementOp::ConditionalRequired => {
                if self.negate {
                    write!(f, "!{}?", self.flag)
                } else {
                    write!(f, "{}?", self.flag)
                }
            }
        }
    }
}

/// Qualified name, or a partial name when wildcards are permitted (§3.2).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PackageNameSpec {
    Full(QualifiedPackageName),
    CategoryOnly(version::CategoryName),
    PackageOnly(version::PackageNamePart),
}

impl PackageNameSpec {
    pub fn matches(&self, candidate: &QualifiedPackageName) -> bool {
        match self {
            PackageNameSpec::Full(q) => q == candidate,
            PackageNameSpec::CategoryOnly(c) => c == candidate.category(),
            PackageNameSpec::PackageOnly(p) => p == candidate.package(),
        }
    }

    pub fn qualified(&self) -> Option<&QualifiedPackageName> {
        match self {
            PackageNameSpec::Full(q) => Some(q),
            _ => None,
        }
    }
}

impl Display for PackageNameSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PackageNameSpec::Full(q) => write!(f, "{q}"),
            PackageNameSpec::CategoryOnly(c) => write!(f, "{c}/*"),
            PackageNameSpec::PackageOnly(p) => write!(f, "{p}"),
        }
    }
}

/// A package dependency spec ("atom", §3.2): the leaf type of
/// [`PackageDependency`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PackageAtom {
    pub name: PackageNameSpec,
    pub version_reqs: Vec<(VersionOp, Version)>,
    pub version_combine: VersionCombine,
    pub slot: Option<SlotRequirement>,
    pub repository: Option<RepositoryRequirement>,
    pub installable_to: Option<InstallableToRequirement>,
    pub use_reqs: Vec<UseRequirement>,
    pub key_value_reqs: Vec<KeyValueRequirement>,
    pub block: Block,
}

impl PackageAtom {
    pub fn package_name(&self) -> Option<&QualifiedPackageName> {
        self.name.qualified()
    }

    /// Full match, including USE requirements (§4.2 items 1-6).
    pub fn matches(&self, target: &PackageRef<'_>, source_use: &UseMap) -> anyhow::Result<bool> {
        if !self.matches_ignoring_use(target) {
            return Ok(false);
        }
        for req in &self.use_reqs {
            if !req.matches(source_use, target.use_map)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Match ignoring USE requirements (§4.2's "ignore additional USE
    /// requirements" option bit): used for "would install if USE matched"
    /// diagnostics and for re-querying when a USE requirement is the only
    /// thing standing between an atom and a candidate.
    pub fn matches_ignoring_use(&self, target: &PackageRef<'_>) -> bool {
        if !self.name.matches(target.name) {
            return false;
        }
        if !self.version_requirements_match(target.version) {
            return false;
        }
        if let Some(slot_req) = &self.slot {
            if !slot_req.matches(target.slot) {
                return false;
            }
        }
        if let Some(repo_req) = &self.repository {
            if !repo_req.matches(target.repository, None) {
                return false;
            }
        }
        for kv in &self.key_value_reqs {
            match target.metadata.get(&kv.key) {
                Some(value) if value.stringify() == kv.value => {}
                _ => return false,
            }
        }
        if let Some(req) = &self.installable_to {
            if req.mode == InstallableToMode::Strict && target.masked {
                return false;
            }
        }
        true
    }

    fn version_requirements_match(&self, version: &Version) -> bool {
        if self.version_reqs.is_empty() {
            return true;
        }
        match self.version_combine {
            VersionCombine::And => self.version_reqs.iter().all(|(op, req)| op.matches(version, req)),
            VersionCombine::Or => self.version_reqs.iter().any(|(op, req)| op.matches(version, req)),
        }
    }
}

impl Display for PackageAtom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.block)?;
        if let Some((op, version)) = self.version_reqs.first() {
            write!(f, "{op}")?;
            write!(f, "{}-{version}", self.name)?;
            if matches!(op, VersionOp::Equal { wildcard: true }) {
                write!(f, "*")?;
            }
        } else {
            write!(f, "{}", self.name)?;
        }
        if let Some(slot) = &self.slot {
            write!(f, "{slot}")?;
        }
        if let Some(repo) = &self.repository {
            write!(f, "{repo}")?;
        }
        if !self.use_reqs.is_empty() {
            write!(f, "[")?;
            for (i, req) in self.use_reqs.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{req}")?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;
    use version::CategoryName;

    fn qpn(s: &str) -> QualifiedPackageName {
        s.parse().unwrap()
    }

    fn slot(s: &str) -> Slot<SlotName> {
        Slot {
            main: s.parse().unwrap(),
            sub: s.parse().unwrap(),
        }
    }

    fn repo(s: &str) -> RepositoryName {
        s.parse().unwrap()
    }

    #[test]
    fn version_op_matches() {
        let v = |s: &str| -> Version { s.parse().unwrap() };
        assert!(VersionOp::GreaterOrEqual.matches(&v("2.0"), &v("1.0")));
        assert!(!VersionOp::Less.matches(&v("2.0"), &v("1.0")));
        assert!(VersionOp::Equal { wildcard: true }.matches(&v("1.2.3"), &v("1.2")));
        assert!(VersionOp::TildeEqual.matches(&v("1.2-r5"), &v("1.2")));
        assert!(VersionOp::PessimisticCompatible.matches(&v("2.4.9"), &v("2.4.1")));
        assert!(!VersionOp::PessimisticCompatible.matches(&v("2.5.0"), &v("2.4.1")));
    }

    #[test]
    fn name_spec_matching() {
        let full = PackageNameSpec::Full(qpn("sys-apps/portage"));
        assert!(full.matches(&qpn("sys-apps/portage")));
        assert!(!full.matches(&qpn("sys-apps/other")));

        let cat_only = PackageNameSpec::CategoryOnly("sys-apps".parse::<CategoryName>().unwrap());
        assert!(cat_only.matches(&qpn("sys-apps/portage")));
    }

    #[test]
    fn slot_requirement_matching() {
        let req = SlotRequirement {
            slot: Some(("0".parse().unwrap(), None)),
            lock: false,
        };
        assert!(req.matches(&slot("0")));
        assert!(!req.matches(&slot("1")));

        let any = SlotRequirement { slot: None, lock: true };
        assert!(any.matches(&slot("0")));
    }

    #[test]
    fn use_requirement_required() {
        let req = UseRequirement {
            negate: false,
            flag: "foo".to_string(),
            op: UseRequirementOp::Required,
            missing_default: None,
        };
        let source = UseMap::new();
        let target_on: UseMap = [("foo".to_string(), true)].into_iter().collect();
        let target_off: UseMap = [("foo".to_string(), false)].into_iter().collect();
        assert!(req.matches(&source, &target_on).unwrap());
        assert!(!req.matches(&source, &target_off).unwrap());
    }

    #[test]
    fn use_requirement_synchronized() {
        let req = UseRequirement {
            negate: false,
            flag: "foo".to_string(),
            op: UseRequirementOp::Synchronized,
            missing_default: None,
        };
        let source_on: UseMap = [("foo".to_string(), true)].into_iter().collect();
        let target_on: UseMap = [("foo".to_string(), true)].into_iter().collect();
        let target_off: UseMap = [("foo".to_string(), false)].into_iter().collect();
        assert!(req.matches(&source_on, &target_on).unwrap());
        assert!(!req.matches(&source_on, &target_off).unwrap());
    }

    #[test]
    fn use_requirement_conditional() {
        let req = UseRequirement {
            negate: false,
            flag: "foo".to_string(),
            op: UseRequirementOp::ConditionalRequired,
            missing_default: None,
        };
        let source_off = UseMap::new();
        let target_off: UseMap = [("foo".to_string(), false)].into_iter().collect();
        // Source doesn't have foo enabled, so no constraint is imposed.
        assert!(req.matches(&source_off, &target_off).unwrap());

        let source_on: UseMap = [("foo".to_string(), true)].into_iter().collect();
        assert!(!req.matches(&source_on, &target_off).unwrap());
    }

    #[test]
    fn key_value_requirement() {
        let atom = PackageAtom {
            name: PackageNameSpec::Full(qpn("sys-apps/portage")),
            version_reqs: vec![],
            version_combine: VersionCombine::And,
            slot: None,
            repository: None,
            installable_to: None,
            use_reqs: vec![],
            key_value_reqs: vec![KeyValueRequirement {
                key: "EAPI".to_string(),
                value: "7".to_string(),
            }],
            block: Block::None,
        };
        let mut metadata = Map::new();
        metadata.insert("EAPI".to_string(), MetadataValue::Str("7".to_string()));
        let version = "1.0".parse().unwrap();
        let s = slot("0");
        let r = repo("gentoo");
        let use_map = UseMap::new();
        let target = PackageRef {
            name: &qpn("sys-apps/portage"),
            version: &version,
            slot: &s,
            repository: &r,
            use_map: &use_map,
            metadata: &metadata,
            masked: false,
        };
        assert!(atom.matches_ignoring_use(&target));
    }

    #[test]
    fn installable_to_strict_rejects_masked_candidate() {
        let atom = PackageAtom {
            name: PackageNameSpec::Full(qpn("sys-apps/portage")),
            version_reqs: vec![],
            version_combine: VersionCombine::And,
            slot: None,
            repository: None,
            installable_to: Some(InstallableToRequirement {
                repository_or_path: "gentoo".to_string(),
                mode: InstallableToMode::Strict,
            }),
            use_reqs: vec![],
            key_value_reqs: vec![],
            block: Block::None,
        };
        let version = "1.0".parse().unwrap();
        let s = slot("0");
        let r = repo("gentoo");
        let use_map = UseMap::new();
        let metadata = Map::new();
        let target = PackageRef {
            name: &qpn("sys-apps/portage"),
            version: &version,
            slot: &s,
            repository: &r,
            use_map: &use_map,
            metadata: &metadata,
            masked: true,
        };
        assert!(!atom.matches_ignoring_use(&target));

        let unmasked = PackageRef { masked: false, ..target };
        assert!(atom.matches_ignoring_use(&unmasked));
    }
}
