// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The merge list (§3.5, §3.6): an append-only arena of entries plus a
//! name-keyed index, with RAII-style transactions so a builder can try an
//! `||` branch speculatively and roll back everything it appended if that
//! branch doesn't pan out, without cloning the whole list.
//!
//! Grounded in the reference implementation's generation-stamped
//! transaction object: committing just forgets the rollback point, and
//! dropping an uncommitted transaction undoes every entry appended since it
//! was opened.

use std::collections::HashMap;

use serde::Serialize;
use version::QualifiedPackageName;

use crate::repository::PackageId;

/// What a merge list entry asks the installer to do (§3.5).
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum Action {
    Install,
    Reinstall,
    Uninstall,
    /// Already installed at a version/slot the builder decided to keep
    /// (§4.5 step 10, `add_already_installed_package`): nothing is built,
    /// but the entry still records the decision and still carries its own
    /// dependency walk under the installed-deps policies.
    Keep,
    /// A suggested-only dependency surfaced under `suggested=show` (§4.5
    /// step 9's suggestions pass): informational, never a hard requirement
    /// of the entry that named it.
    Suggest,
}

/// What kind of thing an entry represents (§3.5's entry kind enumeration).
/// A `ProvidedVirtual` entry is bookkeeping only: nothing is actually built
/// for it, it just records that a virtual target was satisfied by the real
/// entry named in `associated_entry`. An already-installed build the
/// builder decided to keep still gets a `Package` entry (tagged
/// [`Action::Keep`]); there's no separate already-installed kind here
/// since the distinction lives on `Action`, not `EntryKind`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum EntryKind {
    Package,
    ProvidedVirtual,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct MergeListEntry {
    pub id: PackageId,
    pub action: Action,
    pub kind: EntryKind,
    /// For a `ProvidedVirtual` entry, the real provider entry it stands in
    /// for (§3.5's "associated entry").
    pub associated_entry: Option<Handle>,
    /// Human-readable provenance, only populated when the policy's
    /// `dependency_tags` bit is set (§4.5): e.g. `"depended on by foo-1.0"`.
    pub tags: Vec<String>,
}

/// An opaque reference to an entry, valid for the [`MergeList`] it was
/// returned from. Invalidated (but not reused) by a rollback past it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Handle(usize);

#[derive(Clone, Debug, Default)]
pub struct MergeList {
    entries: Vec<MergeListEntry>,
    index: HashMap<QualifiedPackageName, Vec<usize>>,
}

impl MergeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: MergeListEntry) -> Handle {
        let idx = self.entries.len();
        self.index.entry(entry.id.name.clone()).or_default().push(idx);
        self.entries.push(entry);
        Handle(idx)
    }

    pub fn get(&self, handle: Handle) -> &MergeListEntry {
        &self.entries[handle.0]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every entry already queued for `name`, in insertion order.
    pub fn entries_for(&self, name: &QualifiedPackageName) -> impl Iterator<Item = &MergeListEntry> {
        self.index
            .get(name)
            .into_iter()
            .flatten()
            .map(move |&idx| &self.entries[idx])
    }

    /// Handles of every entry already queued for `name`, in insertion order.
    pub fn handles_for(&self, name: &QualifiedPackageName) -> impl Iterator<Item = Handle> + '_ {
        self.index.get(name).into_iter().flatten().map(|&idx| Handle(idx))
    }

    pub fn iter(&self) -> impl Iterator<Item = &MergeListEntry> {
        self.entries.iter()
    }

    /// Opens a transaction: every entry pushed through it is rolled back
    /// automatically unless [`Transaction::commit`] is called before it is
    /// dropped.
    pub fn begin_transaction(&mut self) -> Transaction<'_> {
        let snapshot_len = self.entries.len();
        Transaction {
            list: self,
            snapshot_len,
            committed: false,
        }
    }

    fn rollback_to(&mut self, len: usize) {
        self.entries.truncate(len);
        self.index.retain(|_, indices| {
            indices.retain(|&idx| idx < len);
            !indices.is_empty()
        });
    }
}

/// An RAII guard over a [`MergeList`] append window. See [`MergeList::begin_transaction`].
pub struct Transaction<'a> {
    list: &'a mut MergeList,
    snapshot_len: usize,
    committed: bool,
}

impl<'a> Transaction<'a> {
    pub fn push(&mut self, entry: MergeListEntry) -> Handle {
        self.list.push(entry)
    }

    pub fn entries_for(&self, name: &QualifiedPackageName) -> impl Iterator<Item = &MergeListEntry> {
        self.list.entries_for(name)
    }

    pub fn handles_for(&self, name: &QualifiedPackageName) -> impl Iterator<Item = Handle> + '_ {
        self.list.handles_for(name)
    }

    /// Keeps every entry appended through this transaction.
    pub fn commit(mut self) {
        self.committed = true;
    }

    /// Opens a nested transaction scoped to this one's append window.
    pub fn begin_transaction(&mut self) -> Transaction<'_> {
        self.list.begin_transaction()
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.list.rollback_to(self.snapshot_len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pkg: &str, version: &str) -> MergeListEntry {
        MergeListEntry {
            id: PackageId {
                name: pkg.parse().unwrap(),
                version: version.parse().unwrap(),
                repository: "gentoo".parse().unwrap(),
            },
            action: Action::Install,
            kind: EntryKind::Package,
            associated_entry: None,
            tags: Vec::new(),
        }
    }

    #[test]
    fn committed_transaction_keeps_entries() {
        let mut list = MergeList::new();
        {
            let mut txn = list.begin_transaction();
            txn.push(entry("sys-apps/a", "1.0"));
            txn.commit();
        }
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let mut list = MergeList::new();
        list.push(entry("sys-apps/keep", "1.0"));
        {
            let mut txn = list.begin_transaction();
            txn.push(entry("sys-apps/a", "1.0"));
            txn.push(entry("sys-apps/b", "1.0"));
            // txn dropped without commit: both pushes are undone.
        }
        assert_eq!(list.len(), 1);
        assert_eq!(list.iter().next().unwrap().id.name.to_string(), "sys-apps/keep");
    }

    #[test]
    fn nested_transaction_rolls_back_independently() {
        let mut list = MergeList::new();
        let mut outer = list.begin_transaction();
        outer.push(entry("sys-apps/a", "1.0"));
        {
            let mut inner = outer.begin_transaction();
            inner.push(entry("sys-apps/b", "1.0"));
        }
        outer.commit();
        assert_eq!(list.len(), 1);
    }

    mod props {
        use proptest::prelude::*;

        use super::*;

        fn entries() -> impl Strategy<Value = Vec<(String, u32)>> {
            prop::collection::vec(("[a-z]{3,8}", 0u32..20), 0..8)
                .prop_map(|v| v.into_iter().map(|(pkg, ver)| (format!("sys-apps/{pkg}"), ver)).collect())
        }

        proptest! {
            /// A dropped, uncommitted transaction restores the list to a
            /// snapshot bit-identical to what it was before the transaction
            /// opened, no matter how many entries were pushed through it.
            #[test]
            fn dropped_transaction_restores_snapshot(
                before in entries(),
                during in entries(),
            ) {
                let mut list = MergeList::new();
                for (pkg, ver) in &before {
                    list.push(entry(pkg, &ver.to_string()));
                }
                let snapshot = list.clone();

                {
                    let mut txn = list.begin_transaction();
                    for (pkg, ver) in &during {
                        txn.push(entry(pkg, &ver.to_string()));
                    }
                }

                pretty_assertions::assert_eq!(
                    snapshot.iter().collect::<Vec<_>>(),
                    list.iter().collect::<Vec<_>>()
                );
            }
        }
    }
}
