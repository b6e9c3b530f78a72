// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Core data model and algorithms for resolving a package's dependency
//! graph into an ordered merge list: dependency-expression parsing and
//! matching, atom/version matching, environment and masking policy,
//! candidate selection, the classical recursive dep-list builder, and the
//! constraint-propagating resolver.
//!
//! Loading real repository/environment data (ebuild parsing, profile
//! stacking, persisted world files) is out of scope; this crate works
//! against the [`repository::Repository`] and [`environment::Environment`]
//! traits, with in-memory reference implementations provided for testing.

pub mod data;
pub mod deplist;
pub mod dependency;
pub mod environment;
pub mod error;
pub mod mergelist;
pub mod policy;
pub mod repository;
pub mod resolver;

pub use data::{IUseMap, ProvidedPackage, Slot, UseMap, Vars};
pub use error::{BuildError, CycleWitness, LookupError, PolicyError};
