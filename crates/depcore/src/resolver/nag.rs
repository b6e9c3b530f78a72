// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The Node Arc Graph (§4.6): resolvents as nodes, dependency arrows as
//! edges, topologically ordered with cycle-breaking fallbacks.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use super::{Resolution, Resolvent};
use crate::error::CycleWitness;

/// What kind of dependency an [`Arrow`] represents (§4.6's "build vs run vs
/// post" edge property).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArrowClass {
    Build,
    Run,
    Post,
}

/// A directed edge from a dependent resolvent to a dependency resolvent.
///
/// `ignorable_pass` controls which cycle-breaking retry first treats this
/// arrow as non-blocking: 0 (hard) is never ignored during ordering, 1
/// (satisfied by something already installed) is ignored on the second
/// retry, 2 (runtime-only) is ignored on the first retry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Arrow {
    pub to: Resolvent,
    pub ignorable_pass: u8,
    pub class: ArrowClass,
    /// Whether every one of the dependency's own build-time requirements is
    /// already met, independent of this arrow's own satisfaction.
    pub build_all_met: bool,
}

/// The resolver's working graph: one [`Resolution`] per [`Resolvent`], with
/// that resolution's outgoing [`Arrow`]s recording its dependency edges.
#[derive(Clone, Debug, Default)]
pub struct Nag {
    order: Vec<Resolvent>,
    resolutions: HashMap<Resolvent, Resolution>,
}

impl Nag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, resolvent: &Resolvent) -> Option<&Resolution> {
        self.resolutions.get(resolvent)
    }

    pub fn get_mut(&mut self, resolvent: &Resolvent) -> Option<&mut Resolution> {
        self.resolutions.get_mut(resolvent)
    }

    /// Returns the existing resolution for `resolvent`, inserting a fresh
    /// empty one (and recording insertion order) if this is the first time
    /// it's been seen.
    pub fn entry(&mut self, resolvent: Resolvent) -> &mut Resolution {
        if !self.resolutions.contains_key(&resolvent) {
            self.order.push(resolvent.clone());
            self.resolutions
                .insert(resolvent.clone(), Resolution::new(resolvent.clone()));
        }
        self.resolutions.get_mut(&resolvent).unwrap()
    }

    pub fn resolvents(&self) -> impl Iterator<Item = &Resolvent> {
        self.order.iter()
    }

    pub fn resolutions(&self) -> impl Iterator<Item = &Resolution> {
        self.order.iter().map(move |r| &self.resolutions[r])
    }

    /// Emits resolvents in dependency order (dependencies before
    /// dependents), per §4.6 step 6: a strict pass first, then two retries
    /// that progressively treat more arrows as ignorable for the purpose of
    /// breaking cycles. Logs the edges a retry had to break.
    pub fn order(&self) -> Result<Vec<Resolvent>, CycleWitness> {
        for ignore_at_or_below in [None, Some(1), Some(2)] {
            if let Some(order) = self.try_order(ignore_at_or_below) {
                return Ok(order);
            }
        }
        Err(self.describe_cycle())
    }

    fn try_order(&self, ignore_at_or_below: Option<u8>) -> Option<Vec<Resolvent>> {
        let blocks = |arrow: &Arrow| match ignore_at_or_below {
            Some(threshold) => arrow.ignorable_pass > threshold,
            None => true,
        };

        let mut remaining_in_degree: HashMap<&Resolvent, usize> =
            self.order.iter().map(|r| (r, 0)).collect();
        for resolvent in &self.order {
            let resolution = &self.resolutions[resolvent];
            for arrow in &resolution.arrows {
                if blocks(arrow) {
                    if let Some(count) = remaining_in_degree.get_mut(&arrow.to) {
                        *count += 1;
                    }
                }
            }
        }

        // Lexicographic tie-break for determinism (§5's ordering guarantee).
        let mut ready: Vec<&Resolvent> = self
            .order
            .iter()
            .filter(|r| remaining_in_degree[*r] == 0)
            .collect();
        ready.sort();

        let mut emitted = Vec::with_capacity(self.order.len());
        let mut seen: HashSet<&Resolvent> = HashSet::new();

        while let Some(resolvent) = ready.pop() {
            if !seen.insert(resolvent) {
                continue;
            }
            emitted.push(resolvent.clone());

            // An edge from `dependent` to `resolvent` is satisfied once
            // `resolvent` itself is emitted; walk every resolution to find
            // dependents pointing at it (the NAG stores arrows by source,
            // not by destination, so this is a linear scan per node).
            let mut newly_ready = Vec::new();
            for candidate in &self.order {
                if seen.contains(candidate) {
                    continue;
                }
                let resolution = &self.resolutions[candidate];
                let points_here = resolution
                    .arrows
                    .iter()
                    .any(|arrow| blocks(arrow) && &arrow.to == resolvent);
                if !points_here {
                    continue;
                }
                let count = remaining_in_degree.get_mut(candidate).unwrap();
                *count -= 1;
                if *count == 0 {
                    newly_ready.push(candidate);
                }
            }
            newly_ready.sort();
            ready.extend(newly_ready);
            ready.sort();
        }

        if emitted.len() == self.order.len() {
            if ignore_at_or_below.is_some() {
                warn!(pass = ?ignore_at_or_below, "broke a dependency cycle by ignoring low-priority arrows");
            }
            Some(emitted)
        } else {
            None
        }
    }

    /// Called only once every retry in [`Self::order`] has failed: names
    /// every resolvent still outstanding as the (possibly multi-cycle)
    /// witness.
    fn describe_cycle(&self) -> CycleWitness {
        CycleWitness(self.order.iter().map(|r| r.to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::DestinationType;

    fn resolvent(name: &str) -> Resolvent {
        Resolvent {
            name: name.parse().unwrap(),
            slot: None,
            destination: DestinationType::Slash,
        }
    }

    #[test]
    fn orders_a_simple_chain() {
        let mut nag = Nag::new();
        let a = resolvent("sys-apps/a");
        let b = resolvent("sys-apps/b");
        nag.entry(b.clone());
        nag.entry(a.clone()).arrows.push(Arrow {
            to: b.clone(),
            ignorable_pass: 0,
            class: ArrowClass::Build,
            build_all_met: true,
        });

        let order = nag.order().unwrap();
        assert!(order.iter().position(|r| r == &b).unwrap() < order.iter().position(|r| r == &a).unwrap());
    }

    #[test]
    fn breaks_cycle_via_ignorable_arrow() {
        let mut nag = Nag::new();
        let a = resolvent("sys-apps/a");
        let b = resolvent("sys-apps/b");
        nag.entry(a.clone()).arrows.push(Arrow {
            to: b.clone(),
            ignorable_pass: 0,
            class: ArrowClass::Build,
            build_all_met: true,
        });
        nag.entry(b.clone()).arrows.push(Arrow {
            to: a.clone(),
            ignorable_pass: 2,
            class: ArrowClass::Post,
            build_all_met: true,
        });

        let order = nag.order().unwrap();
        assert_eq!(order.len(), 2);
    }

    #[test]
    fn hard_cycle_is_unorderable() {
        let mut nag = Nag::new();
        let a = resolvent("sys-apps/a");
        let b = resolvent("sys-apps/b");
        nag.entry(a.clone()).arrows.push(Arrow {
            to: b.clone(),
            ignorable_pass: 0,
            class: ArrowClass::Build,
            build_all_met: true,
        });
        nag.entry(b.clone()).arrows.push(Arrow {
            to: a.clone(),
            ignorable_pass: 0,
            class: ArrowClass::Build,
            build_all_met: true,
        });

        assert!(nag.order().is_err());
    }
}
