// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Shared recursive-descent grammar for dependency-expression strings
//! (§4.1): tokenizes on whitespace (paren groups and operator markers must
//! already be whitespace-separated per the grammar) and threads an
//! [`EapiProfile`] through every gated construct instead of branching on an
//! EAPI string.

use super::{Dependency, DependencyMeta, EapiProfile};

/// Errors from dependency-string parsing (`DepStringParseError` and
/// `DepStringNestingError` folded into one closed sum type, per the
/// "tagged variants" design note).
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum DepParseError {
    #[error("dependency syntax error at offset {offset}: {detail}")]
    Syntax { offset: usize, detail: String },
    #[error("unbalanced parentheses at offset {offset}: {detail}")]
    Nesting { offset: usize, detail: String },
}

/// Implemented once per leaf family (package atoms, license tokens, ...) to
/// turn one already-isolated word token into a leaf value.
pub trait DependencyParserCommon<M: DependencyMeta> {
    fn parse_leaf(eapi: &EapiProfile, word: &str) -> Result<M::Leaf, String>;
}

enum GroupKind {
    AnyOf,
    ExactlyOneOf,
    AtMostOneOf,
}

/// `(offset, token)` pairs; `offset` is a byte offset into the original
/// input, recovered via pointer arithmetic since every token is a literal
/// substring of it.
fn tokenize(input: &str) -> Vec<(usize, &str)> {
    input
        .split_whitespace()
        .map(|tok| ((tok.as_ptr() as usize) - (input.as_ptr() as usize), tok))
        .collect()
}

pub fn parse_full<M: DependencyMeta>(
    eapi: &EapiProfile,
    input: &str,
) -> Result<Dependency<M>, DepParseError> {
    let tokens = tokenize(input);
    let mut pos = 0;
    let children = parse_sequence::<M>(eapi, &tokens, &mut pos)?;
    if pos != tokens.len() {
        let (offset, tok) = tokens[pos];
        return Err(DepParseError::Nesting {
            offset,
            detail: format!("unexpected token {tok:?} (unmatched closing paren?)"),
        });
    }
    Ok(Dependency::AllOf(children))
}

fn expect_open(tokens: &[(usize, &str)], pos: usize, context_offset: usize) -> Result<(), DepParseError> {
    match tokens.get(pos) {
        Some((_, "(")) => Ok(()),
        Some((offset, tok)) => Err(DepParseError::Syntax {
            offset: *offset,
            detail: format!("expected '(' after operator, found {tok:?}"),
        }),
        None => Err(DepParseError::Nesting {
            offset: context_offset,
            detail: "expected '(' after operator, found end of input".to_string(),
        }),
    }
}

fn expect_close(tokens: &[(usize, &str)], pos: usize, open_offset: usize) -> Result<(), DepParseError> {
    match tokens.get(pos) {
        Some((_, ")")) => Ok(()),
        Some((offset, tok)) => Err(DepParseError::Nesting {
            offset: *offset,
            detail: format!("expected ')' to close group opened at offset {open_offset}, found {tok:?}"),
        }),
        None => Err(DepParseError::Nesting {
            offset: open_offset,
            detail: "unclosed group: reached end of input".to_string(),
        }),
    }
}

fn parse_op_group<M: DependencyMeta>(
    eapi: &EapiProfile,
    tokens: &[(usize, &str)],
    pos: &mut usize,
    op_offset: usize,
    kind: GroupKind,
) -> Result<Dependency<M>, DepParseError> {
    expect_open(tokens, *pos, op_offset)?;
    *pos += 1;
    let children = parse_sequence::<M>(eapi, tokens, pos)?;
    expect_close(tokens, *pos, op_offset)?;
    *pos += 1;

    if children.is_empty() && !eapi.empty_any_of_is_vacuous_true {
        return Err(DepParseError::Syntax {
            offset: op_offset,
            detail: "empty group is not permitted by this EAPI".to_string(),
        });
    }

    Ok(match kind {
        GroupKind::AnyOf => Dependency::AnyOf(children),
        GroupKind::ExactlyOneOf => Dependency::ExactlyOneOf(children),
        GroupKind::AtMostOneOf => Dependency::AtMostOneOf(children),
    })
}

fn parse_sequence<M: DependencyMeta>(
    eapi: &EapiProfile,
    tokens: &[(usize, &str)],
    pos: &mut usize,
) -> Result<Vec<Dependency<M>>, DepParseError> {
    let mut out = Vec::new();

    while *pos < tokens.len() {
        let (offset, tok) = tokens[*pos];
        match tok {
            ")" => break,
            "(" => {
                *pos += 1;
                let children = parse_sequence::<M>(eapi, tokens, pos)?;
                expect_close(tokens, *pos, offset)?;
                *pos += 1;
                out.push(Dependency::AllOf(children));
            }
            "||" => {
                *pos += 1;
                out.push(parse_op_group::<M>(eapi, tokens, pos, offset, GroupKind::AnyOf)?);
            }
            "^^" => {
                if !eapi.allows_exactly_one_of {
                    return Err(DepParseError::Syntax {
                        offset,
                        detail: "^^ groups are not permitted by this EAPI".to_string(),
                    });
                }
                *pos += 1;
                out.push(parse_op_group::<M>(
                    eapi,
                    tokens,
                    pos,
                    offset,
                    GroupKind::ExactlyOneOf,
                )?);
            }
            "??" => {
                if !eapi.allows_at_most_one_of {
                    return Err(DepParseError::Syntax {
                        offset,
                        detail: "?? groups are not permitted by this EAPI".to_string(),
                    });
                }
                *pos += 1;
                out.push(parse_op_group::<M>(
                    eapi,
                    tokens,
                    pos,
                    offset,
                    GroupKind::AtMostOneOf,
                )?);
            }
            // A USE-conditional token is always immediately followed by a
            // group opener; a leaf word that merely happens to end in `?`
            // (e.g. a package atom's `installable_to` suffix) is not, so
            // peeking ahead is what tells the two apart. Without this check
            // every `?`-suffixed atom would be swallowed here and fail at
            // `expect_open` instead of reaching `parse_leaf`.
            _ if tok.ends_with('?') && matches!(tokens.get(*pos + 1), Some((_, "("))) => {
                let (flag, invert) = match tok.strip_prefix('!') {
                    Some(rest) => (rest.trim_end_matches('?'), true),
                    None => (tok.trim_end_matches('?'), false),
                };
                if flag.is_empty() {
                    return Err(DepParseError::Syntax {
                        offset,
                        detail: format!("empty flag name in conditional {tok:?}"),
                    });
                }
                *pos += 1;
                expect_open(tokens, *pos, offset)?;
                *pos += 1;
                let children = parse_sequence::<M>(eapi, tokens, pos)?;
                expect_close(tokens, *pos, offset)?;
                *pos += 1;
                out.push(Dependency::UseConditional {
                    flag: flag.to_string(),
                    invert,
                    children,
                });
            }
            word => {
                *pos += 1;
                let leaf = M::Parser::parse_leaf(eapi, word).map_err(|detail| DepParseError::Syntax {
                    offset,
                    detail,
                })?;
                out.push(Dependency::Leaf(leaf));
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::license::{LicenseAtom, LicenseDependencyMeta};

    #[test]
    fn parses_nested_groups() {
        let eapi = EapiProfile::PERMISSIVE;
        let tree = parse_full::<LicenseDependencyMeta>(&eapi, "GPL-2 ( MIT BSD )").unwrap();
        assert_eq!(tree.leaves(), vec![
            &LicenseAtom("GPL-2".to_string()),
            &LicenseAtom("MIT".to_string()),
            &LicenseAtom("BSD".to_string()),
        ]);
    }

    #[test]
    fn rejects_unbalanced_parens() {
        let eapi = EapiProfile::PERMISSIVE;
        let err = parse_full::<LicenseDependencyMeta>(&eapi, "GPL-2 ( MIT").unwrap_err();
        assert!(matches!(err, DepParseError::Nesting { .. }));
    }

    #[test]
    fn rejects_stray_close_paren() {
        let eapi = EapiProfile::PERMISSIVE;
        let err = parse_full::<LicenseDependencyMeta>(&eapi, "GPL-2 )").unwrap_err();
        assert!(matches!(err, DepParseError::Nesting { .. }));
    }

    #[test]
    fn question_mark_suffixed_atom_without_group_is_not_a_use_conditional() {
        // "sys-apps/portage?" has no following "(", so it must reach
        // parse_leaf as an ordinary atom word (its `?` is the atom's own
        // installable_to suffix) rather than being misread as a USE
        // conditional missing its group.
        use crate::dependency::package::PackageDependencyMeta;

        let eapi = EapiProfile::PERMISSIVE;
        let tree = parse_full::<PackageDependencyMeta>(&eapi, "sys-apps/portage?").unwrap();
        assert_eq!(tree.leaves().len(), 1);
    }

    #[test]
    fn gates_exactly_one_of_by_eapi() {
        let old = EapiProfile::for_level(0);
        let err = parse_full::<LicenseDependencyMeta>(&old, "^^ ( GPL-2 MIT )").unwrap_err();
        assert!(matches!(err, DepParseError::Syntax { .. }));

        let new = EapiProfile::for_level(5);
        assert!(parse_full::<LicenseDependencyMeta>(&new, "^^ ( GPL-2 MIT )").is_ok());
    }
}
