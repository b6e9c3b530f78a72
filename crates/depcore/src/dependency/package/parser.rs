// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Parses one atom token (§4.1's per-token state machine, §3.2) into a
//! [`PackageAtom`]. The surrounding group grammar (`||`, `( )`, USE
//! conditionals) is already handled by [`crate::dependency::parser`]; this
//! module only ever sees one already-isolated word.

use nom::{
    branch::alt,
    bytes::complete::tag,
    combinator::{opt, value},
    sequence::pair,
    IResult,
};
use once_cell::sync::Lazy;
use regex::Regex;

use version::{CategoryName, PackageNamePart, QualifiedPackageName, Version};

use super::{
    Block, InstallableToMode, InstallableToRequirement, KeyValueRequirement, PackageAtom,
    PackageNameSpec, RepositoryRequirement, SlotRequirement, UseRequirement, UseRequirementOp,
    VersionCombine, VersionOp,
};
use crate::dependency::parser::DependencyParserCommon;
use crate::dependency::EapiProfile;

pub struct PackageDependencyParser;

impl DependencyParserCommon<super::PackageDependencyMeta> for PackageDependencyParser {
    fn parse_leaf(eapi: &EapiProfile, word: &str) -> Result<PackageAtom, String> {
        parse_atom(eapi, word)
    }
}

fn parse_block(input: &str) -> IResult<&str, Block> {
    alt((
        value(Block::Strong, tag("!!")),
        value(Block::Weak, tag("!")),
        value(Block::None, nom::combinator::success("")),
    ))(input)
}

fn parse_op(input: &str) -> IResult<&str, Option<VersionOp>> {
    opt(alt((
        value(VersionOp::LessOrEqual, tag("<=")),
        value(VersionOp::GreaterOrEqual, tag(">=")),
        value(VersionOp::PessimisticCompatible, tag("~>")),
        value(VersionOp::Less, tag("<")),
        value(VersionOp::Greater, tag(">")),
        value(VersionOp::TildeEqual, tag("~")),
        value(VersionOp::Equal { wildcard: false }, tag("=")),
    )))(input)
}

fn parse_prefix(input: &str) -> IResult<&str, (Block, Option<VersionOp>)> {
    pair(parse_block, parse_op)(input)
}

fn parse_atom(eapi: &EapiProfile, word: &str) -> Result<PackageAtom, String> {
    let mut rest = word;

    let installable_to = if let Some(stripped) = rest.strip_suffix("??") {
        rest = stripped;
        Some(InstallableToMode::IncludeMasked)
    } else if let Some(stripped) = rest.strip_suffix('?') {
        rest = stripped;
        Some(InstallableToMode::Strict)
    } else {
        None
    };

    let mut use_reqs = Vec::new();
    let mut key_value_reqs = Vec::new();
    if rest.ends_with(']') {
        let open = rest
            .rfind('[')
            .ok_or_else(|| format!("{word:?}: unbalanced ']' in USE requirement list"))?;
        let body = &rest[open + 1..rest.len() - 1];
        rest = &rest[..open];
        for item in body.split(',') {
            if item.is_empty() {
                continue;
            }
            if let Some(kv) = item.strip_prefix('.') {
                key_value_reqs.push(parse_key_value_requirement(kv)?);
            } else {
                use_reqs.push(parse_use_requirement(item)?);
            }
        }
    }

    let repository = if let Some(idx) = rest.find("::") {
        let spec = &rest[idx + 2..];
        rest = &rest[..idx];
        Some(parse_repository_requirement(spec)?)
    } else {
        None
    };

    let slot = if let Some(idx) = find_slot_separator(rest) {
        let spec = &rest[idx + 1..];
        rest = &rest[..idx];
        Some(parse_slot_requirement(eapi, spec)?)
    } else {
        None
    };

    let (after_prefix, (block, op)) =
        parse_prefix(rest).map_err(|e| format!("{word:?}: malformed block/operator prefix: {e:?}"))?;

    let (name, version_reqs, version_combine) = match op {
        None => (parse_name_spec(after_prefix)?, Vec::new(), VersionCombine::And),
        Some(base_op) => {
            let (body, wildcard) = match after_prefix.strip_suffix('*') {
                Some(stripped) if matches!(base_op, VersionOp::Equal { .. }) => (stripped, true),
                _ => (after_prefix, false),
            };
            let (name_str, version) = Version::from_str_suffix(body)
                .ok_or_else(|| format!("{word:?}: expected a trailing version after a comparison operator"))?;
            let op = if wildcard { VersionOp::Equal { wildcard: true } } else { base_op };
            let qpn: QualifiedPackageName = name_str
                .parse()
                .map_err(|e| format!("{word:?}: invalid package name {name_str:?}: {e}"))?;
            (
                PackageNameSpec::Full(qpn),
                vec![(op, version)],
                VersionCombine::And,
            )
        }
    };

    Ok(PackageAtom {
        name,
        version_reqs,
        version_combine,
        slot,
        repository,
        installable_to: installable_to.map(|mode| InstallableToRequirement {
            repository_or_path: String::new(),
            mode,
        }),
        use_reqs,
        key_value_reqs,
        block,
    })
}

/// `[.KEY=VALUE]` filters live inside the same bracket list as USE
/// requirements, distinguished by a leading `.`.
fn parse_key_value_requirement(token: &str) -> Result<KeyValueRequirement, String> {
    let (key, value) = token
        .split_once('=')
        .ok_or_else(|| format!("{token:?} is not a valid \"KEY=VALUE\" metadata filter"))?;
    if key.is_empty() {
        return Err(format!("{token:?}: metadata filter key must not be empty"));
    }
    Ok(KeyValueRequirement {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn find_slot_separator(input: &str) -> Option<usize> {
    // The first ':' that isn't part of a "::repo" marker.
    let bytes = input.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b':' && bytes.get(i + 1) != Some(&b':') {
            return Some(i);
        }
    }
    None
}

fn parse_name_spec(input: &str) -> Result<PackageNameSpec, String> {
    if let Some(category) = input.strip_suffix("/*") {
        return Ok(PackageNameSpec::CategoryOnly(
            category
                .parse::<CategoryName>()
                .map_err(|e| format!("{input:?}: invalid category: {e}"))?,
        ));
    }
    if !input.contains('/') {
        return Ok(PackageNameSpec::PackageOnly(
            input
                .parse::<PackageNamePart>()
                .map_err(|e| format!("{input:?}: invalid package name: {e}"))?,
        ));
    }
    Ok(PackageNameSpec::Full(
        input
            .parse::<QualifiedPackageName>()
            .map_err(|e| format!("{input:?}: invalid package name: {e}"))?,
    ))
}

fn parse_slot_requirement(eapi: &EapiProfile, spec: &str) -> Result<SlotRequirement, String> {
    if !eapi.supports_subslots && spec.contains('/') {
        return Err(format!("{spec:?}: subslots are not permitted by this EAPI"));
    }
    if spec == "*" {
        return Ok(SlotRequirement { slot: None, lock: false });
    }
    if spec == "=" {
        return Ok(SlotRequirement { slot: None, lock: true });
    }
    let (body, lock) = match spec.strip_suffix('=') {
        Some(rest) => (rest, true),
        None => (spec, false),
    };
    let (main, sub) = match body.split_once('/') {
        Some((main, sub)) => (main, Some(sub)),
        None => (body, None),
    };
    Ok(SlotRequirement {
        slot: Some((
            main.parse().map_err(|e| format!("{spec:?}: invalid slot: {e}"))?,
            sub.map(|s| s.parse())
                .transpose()
                .map_err(|e| format!("{spec:?}: invalid subslot: {e}"))?,
        )),
        lock,
    })
}

fn parse_repository_requirement(spec: &str) -> Result<RepositoryRequirement, String> {
    match spec.split_once("->") {
        Some((from, to)) => Ok(RepositoryRequirement::FromTo {
            from: from.parse().map_err(|e| format!("{spec:?}: invalid repository: {e}"))?,
            to: to.parse().map_err(|e| format!("{spec:?}: invalid repository: {e}"))?,
        }),
        None => Ok(RepositoryRequirement::In(
            spec.parse().map_err(|e| format!("{spec:?}: invalid repository: {e}"))?,
        )),
    }
}

static USE_TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<negate>!)?(?P<flag>[A-Za-z0-9][A-Za-z0-9+_@-]*)(?P<op>[=?]|-)?(?P<default>\(\+\)|\(-\))?$")
        .unwrap()
});

fn parse_use_requirement(token: &str) -> Result<UseRequirement, String> {
    // A leading '-' is a negated plain requirement ("-flag"), distinct from
    // the trailing '-' default marker matched below, so it's peeled off
    // before the regex runs.
    let (token, leading_dash) = match token.strip_prefix('-') {
        Some(rest) => (rest, true),
        None => (token, false),
    };

    let caps = USE_TOKEN_RE
        .captures(token)
        .ok_or_else(|| format!("{token:?} is not a valid USE requirement"))?;
    let negate = leading_dash || caps.name("negate").is_some();
    let flag = caps["flag"].to_string();
    let missing_default = caps.name("default").map(|m| m.as_str() == "(+)");

    let op = match caps.name("op").map(|m| m.as_str()) {
        None => UseRequirementOp::Required,
        Some("=") => UseRequirementOp::Synchronized,
        Some("?") => UseRequirementOp::ConditionalRequired,
        Some(other) => return Err(format!("{token:?}: unrecognized USE requirement suffix {other:?}")),
    };

    if leading_dash && !matches!(op, UseRequirementOp::Required) {
        return Err(format!("{token:?}: a negated USE requirement must be a plain flag"));
    }

    Ok(UseRequirement {
        negate,
        flag,
        op,
        missing_default,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::package::PackageDependency;

    fn eapi() -> EapiProfile {
        EapiProfile::PERMISSIVE
    }

    #[test]
    fn parses_bare_atom() {
        let tree: PackageDependency = "sys-apps/portage".parse().unwrap();
        let leaf = &tree.leaves()[0];
        assert_eq!(leaf.package_name().unwrap().to_string(), "sys-apps/portage");
        assert!(leaf.version_reqs.is_empty());
        assert_eq!(leaf.block, Block::None);
    }

    #[test]
    fn parses_versioned_atom_with_slot_and_repo() {
        let tree: PackageDependency = ">=sys-apps/portage-3.0.30:0/1::gentoo".parse().unwrap();
        let leaf = &tree.leaves()[0];
        assert_eq!(leaf.version_reqs, vec![(VersionOp::GreaterOrEqual, "3.0.30".parse().unwrap())]);
        assert_eq!(
            leaf.slot,
            Some(SlotRequirement {
                slot: Some(("0".parse().unwrap(), Some("1".parse().unwrap()))),
                lock: false
            })
        );
        assert_eq!(
            leaf.repository,
            Some(RepositoryRequirement::In("gentoo".parse().unwrap()))
        );
    }

    #[test]
    fn parses_block_and_use_requirements() {
        let tree: PackageDependency = "!!sys-apps/other[foo,-bar,baz=,qux?]".parse().unwrap();
        let leaf = &tree.leaves()[0];
        assert_eq!(leaf.block, Block::Strong);
        assert_eq!(leaf.use_reqs.len(), 4);
        assert_eq!(leaf.use_reqs[0].flag, "foo");
        assert!(!leaf.use_reqs[0].negate);
        assert_eq!(leaf.use_reqs[1].flag, "bar");
        assert!(leaf.use_reqs[1].negate);
        assert_eq!(leaf.use_reqs[2].op, UseRequirementOp::Synchronized);
        assert_eq!(leaf.use_reqs[3].op, UseRequirementOp::ConditionalRequired);
    }

    #[test]
    fn parses_wildcard_equal() {
        let tree: PackageDependency = "=sys-apps/portage-3.0*".parse().unwrap();
        let leaf = &tree.leaves()[0];
        assert_eq!(leaf.version_reqs[0].0, VersionOp::Equal { wildcard: true });
    }

    #[test]
    fn parses_installable_to_suffix() {
        let tree: PackageDependency = "sys-apps/portage?".parse().unwrap();
        let leaf = &tree.leaves()[0];
        assert_eq!(
            leaf.installable_to.as_ref().map(|r| r.mode),
            Some(InstallableToMode::Strict)
        );
    }

    #[test]
    fn rejects_malformed_atom() {
        assert!("sys-apps/".parse::<PackageDependency>().is_err());
    }

    #[test]
    fn gates_subslots_by_eapi() {
        let old = EapiProfile::for_level(0);
        let err = parse_atom(&old, "sys-apps/portage:0/1").unwrap_err();
        assert!(err.contains("subslots"));
        assert!(parse_atom(&eapi(), "sys-apps/portage:0/1").is_ok());
    }
}
