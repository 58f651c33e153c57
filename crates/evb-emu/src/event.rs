// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Event: a fixed fan-out of superfragments for one trigger.

use crate::superfragment::{SuperFragment, INITIAL_SUPERFRAGMENT_BYTES};

/// Per-slot allocation plan shared by every event of a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLayout {
    /// Fragment-count capacity of each superfragment slot.
    pub capacities: Vec<usize>,
    /// Initial byte capacity of each superfragment.
    pub initial_bytes: usize,
    pub compute_crc: bool,
}

impl EventLayout {
    pub fn uniform(super_fragments: usize, fragments_per_slot: usize) -> Self {
        Self {
            capacities: vec![fragments_per_slot; super_fragments],
            initial_bytes: INITIAL_SUPERFRAGMENT_BYTES,
            compute_crc: false,
        }
    }

    /// Number of superfragments per event.
    pub fn slots(&self) -> usize {
        self.capacities.len()
    }

    /// Total fragments one event can hold.
    pub fn total_fragment_capacity(&self) -> usize {
        self.capacities.iter().sum()
    }
}

/// One reusable event slot of the pool.
#[derive(Debug)]
pub struct Event {
    resource_id: u32,
    event_number: u32,
    super_fragments: Vec<SuperFragment>,
    layout: EventLayout,
    initialized: bool,
}

impl Event {
    /// Creates an uninitialized slot; memory is allocated on first use.
    pub fn new(resource_id: u32, layout: EventLayout) -> Self {
        Self {
            resource_id,
            event_number: 0,
            super_fragments: Vec::new(),
            layout,
            initialized: false,
        }
    }

    /// Allocate every superfragment and tag it with `event_number`.
    ///
    /// Only the first call allocates; later calls fall back to [`Event::reset`].
    pub fn initialise(&mut self, event_number: u32) {
        if self.initialized {
            self.reset(event_number);
            return;
        }
        self.super_fragments = self
            .layout
            .capacities
            .iter()
            .map(|&max| {
                let mut sf = SuperFragment::new(self.layout.initial_bytes, max);
                sf.set_compute_crc(self.layout.compute_crc);
                sf.set_trigno(event_number);
                sf
            })
            .collect();
        self.event_number = event_number;
        self.initialized = true;
    }

    /// Rewind used superfragments for a new event number.
    ///
    /// Slots never used keep their state.
    pub fn reset(&mut self, event_number: u32) {
        self.event_number = event_number;
        for sf in self.super_fragments.iter_mut().filter(|sf| sf.is_used()) {
            sf.reset();
            sf.set_trigno(event_number);
        }
    }

    /// Initialise on first use, reset afterwards.
    pub fn prepare(&mut self, event_number: u32) {
        if self.initialized {
            if self.used_super_fragment_count() > 0 {
                self.reset(event_number);
            } else {
                self.event_number = event_number;
            }
        } else {
            self.initialise(event_number);
        }
    }

    #[inline]
    pub fn resource_id(&self) -> u32 {
        self.resource_id
    }

    #[inline]
    pub fn event_number(&self) -> u32 {
        self.event_number
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Superfragment slots of this event (zero before initialization).
    pub fn capacity(&self) -> usize {
        self.super_fragments.len()
    }

    pub fn layout(&self) -> &EventLayout {
        &self.layout
    }

    pub fn used_super_fragment_count(&self) -> usize {
        self.super_fragments.iter().filter(|sf| sf.is_used()).count()
    }

    /// Fragments held across all slots.
    pub fn fragment_count(&self) -> usize {
        self.super_fragments
            .iter()
            .map(SuperFragment::used_fragments)
            .sum()
    }

    pub fn super_fragment(&self, index: usize) -> Option<&SuperFragment> {
        self.super_fragments.get(index)
    }

    pub fn super_fragment_mut(&mut self, index: usize) -> Option<&mut SuperFragment> {
        self.super_fragments.get_mut(index)
    }

    pub fn super_fragments(&self) -> &[SuperFragment] {
        &self.super_fragments
    }

    /// Install `replacement` at `index`, returning the old superfragment.
    pub fn replace_super_fragment(
        &mut self,
        index: usize,
        replacement: SuperFragment,
    ) -> Option<SuperFragment> {
        let slot = self.super_fragments.get_mut(index)?;
        Some(std::mem::replace(slot, replacement))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FragmentParams;
    use crate::superfragment::expand;

    fn event() -> Event {
        let mut layout = EventLayout::uniform(3, 4);
        layout.initial_bytes = 256;
        Event::new(2, layout)
    }

    #[test]
    fn test_initialise_allocates_slots() {
        let mut evt = event();
        assert_eq!(evt.capacity(), 0);
        evt.initialise(10);
        assert!(evt.is_initialized());
        assert_eq!(evt.capacity(), 3);
        assert_eq!(evt.event_number(), 10);
        assert_eq!(evt.super_fragment(1).unwrap().frl().trigno, 10);
        assert_eq!(evt.super_fragment(2).unwrap().max_fragments(), 4);
        assert_eq!(evt.used_super_fragment_count(), 0);
    }

    #[test]
    fn test_reset_only_touches_used_slots() {
        let mut evt = event();
        evt.initialise(1);
        let sf = evt.super_fragment_mut(0).unwrap();
        sf.mark_used();
        assert!(sf.push(&FragmentParams::new(1, 5, 3)));
        evt.super_fragment_mut(2).unwrap().set_trigno(99);
        assert_eq!(evt.fragment_count(), 1);

        evt.reset(2);
        assert_eq!(evt.event_number(), 2);
        assert_eq!(evt.fragment_count(), 0);
        assert_eq!(evt.super_fragment(0).unwrap().frl().trigno, 2);
        // Idle slot untouched.
        assert_eq!(evt.super_fragment(2).unwrap().frl().trigno, 99);
    }

    #[test]
    fn test_replace_super_fragment() {
        let mut evt = event();
        evt.initialise(1);
        let bigger = expand(evt.super_fragment(1).unwrap());
        let old = evt.replace_super_fragment(1, bigger).unwrap();
        assert_eq!(old.byte_capacity(), 256);
        assert_eq!(evt.super_fragment(1).unwrap().byte_capacity(), 512);
        assert!(evt.replace_super_fragment(7, old).is_none());
    }

    #[test]
    fn test_prepare_is_idempotent_on_fresh_event() {
        let mut evt = event();
        evt.prepare(4);
        evt.prepare(5);
        assert_eq!(evt.capacity(), 3);
        assert_eq!(evt.event_number(), 5);
    }
}
