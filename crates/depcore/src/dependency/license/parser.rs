// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{LicenseAtom, LicenseDependencyMeta};
use crate::dependency::parser::DependencyParserCommon;
use crate::dependency::EapiProfile;

static LICENSE_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9+._-]*$").unwrap());

pub struct LicenseDependencyParser;

impl DependencyParserCommon<LicenseDependencyMeta> for LicenseDependencyParser {
    fn parse_leaf(_eapi: &EapiProfile, word: &str) -> Result<LicenseAtom, String> {
        if !LICENSE_NAME_RE.is_match(word) {
            return Err(format!("{word:?} is not a valid license token"));
        }
        Ok(LicenseAtom(word.to_string()))
    }
}
