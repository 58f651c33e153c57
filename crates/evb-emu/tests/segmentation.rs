// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Segmentation properties: every superfragment is reassembled byte for byte
//! from its blocks, and exactly its last block carries the last-segment flag.

use evb_emu::frame::split_fragments;
use evb_emu::segmenter::BLOCK_HEADER_SIZE;
use evb_emu::superfragment::FRL_HEADER_SIZE;
use evb_emu::{BlockChain, ChainMode, Event, EventLayout, FragmentParams, MessageSegmenter};
use proptest::collection;
use proptest::prelude::*;

/// Event whose slot `i` holds fragments of the given word lengths.
fn event_with(slots: &[Vec<u32>], event_number: u32) -> Event {
    let per_slot = slots.iter().map(Vec::len).max().unwrap_or(1).max(1);
    let mut layout = EventLayout::uniform(slots.len(), per_slot);
    layout.initial_bytes = slots
        .iter()
        .map(|s| s.iter().map(|&w| w as usize * 8).sum::<usize>())
        .max()
        .unwrap_or(0)
        .max(8);
    let mut event = Event::new(0, layout);
    event.prepare(event_number);

    let mut source = 0u16;
    for (i, words) in slots.iter().enumerate() {
        let sf = event.super_fragment_mut(i).unwrap();
        for &w in words {
            sf.mark_used();
            assert!(sf.push(&FragmentParams::new(event_number, source, w)));
            source += 1;
        }
    }
    event
}

fn check_chain(event: &Event, chain: &BlockChain, block_size: usize) {
    let mut seen = Vec::new();
    for block in chain {
        assert!(block.len() <= block_size);
        assert_eq!(block.len() % 4, 0);
        let header = block.header();
        assert_eq!(header.message_size_words as usize * 4, block.len());
        assert_eq!(
            block.frl().data_len(),
            block.len() - BLOCK_HEADER_SIZE - FRL_HEADER_SIZE
        );
        seen.push(header.super_fragment_nb);
    }

    for (index, sf) in event.super_fragments().iter().enumerate() {
        let index = index as u32;
        let blocks: Vec<_> = chain
            .iter()
            .filter(|b| b.header().super_fragment_nb == index)
            .collect();
        if sf.is_empty() {
            assert!(blocks.is_empty(), "empty superfragment {index} emitted blocks");
            continue;
        }

        // Payload reconstructs the superfragment exactly.
        assert_eq!(chain.super_fragment_payload(index), sf.as_bytes());

        // Block numbering and counts.
        let n = blocks.len() as u32;
        for (k, block) in blocks.iter().enumerate() {
            let header = block.header();
            assert_eq!(header.block_nb, k as u32);
            assert_eq!(header.nb_blocks_in_super_fragment, n);
            assert_eq!(block.frl().segno, k as u32);
            assert_eq!(block.frl().source, index);
            assert_eq!(block.frl().trigno, event.event_number());
        }

        // Exactly the final block is flagged.
        let flagged: Vec<bool> = blocks.iter().map(|b| b.frl().is_last_segment()).collect();
        assert_eq!(flagged.iter().filter(|&&f| f).count(), 1);
        assert_eq!(flagged.last(), Some(&true));
    }

    // Blocks of one superfragment are contiguous and in slot order.
    let mut order = seen.clone();
    order.dedup();
    let mut sorted = order.clone();
    sorted.sort_unstable();
    assert_eq!(order, sorted);
}

#[test]
fn fragment_larger_than_block() {
    let event = event_with(&[vec![3, 200, 3]], 7);
    let seg = MessageSegmenter::new(256, ChainMode::Normal).unwrap();
    let chain = seg.build_chain(&event, 1).unwrap();
    assert!(chain.len() > 3);
    check_chain(&event, &chain, 256);
    assert_eq!(chain.fragment_count().unwrap(), 3);
}

#[test]
fn fragment_exactly_filling_a_block() {
    // 256-byte blocks carry 184 bytes of fragment data: 23 words.
    let event = event_with(&[vec![23, 23], vec![20, 3]], 1);
    let seg = MessageSegmenter::new(256, ChainMode::Normal).unwrap();
    let chain = seg.build_chain(&event, 1).unwrap();
    check_chain(&event, &chain, 256);
    assert_eq!(chain.len(), 3);
    for block in &chain {
        assert_eq!(block.frl().data_len(), 184);
    }
}

#[test]
fn reassembled_fragments_keep_sources_in_order() {
    let event = event_with(&[vec![5, 9, 40], vec![3], vec![], vec![17, 17]], 42);
    let seg = MessageSegmenter::new(128, ChainMode::Normal).unwrap();
    let chain = seg.build_chain(&event, 9).unwrap();
    check_chain(&event, &chain, 128);

    let mut sources = Vec::new();
    for sf in chain.super_fragment_numbers() {
        let payload = chain.super_fragment_payload(sf);
        for fragment in split_fragments(&payload).unwrap() {
            let header = fragment.header().unwrap();
            assert_eq!(header.lvl1_id, 42);
            sources.push(header.source_id);
        }
    }
    assert_eq!(sources, vec![0, 1, 2, 3, 4, 5]);
}

fn slots_strategy(max_words: u32) -> impl Strategy<Value = Vec<Vec<u32>>> {
    collection::vec(collection::vec(3u32..max_words, 0..8), 1..6)
}

proptest! {
    /// Any mix of fragment sizes reassembles exactly in normal mode.
    #[test]
    fn normal_chain_reassembles(
        slots in slots_strategy(120),
        block_words in 12usize..64,
    ) {
        let block_size = block_words * 8;
        let event = event_with(&slots, 3);
        let seg = MessageSegmenter::new(block_size, ChainMode::Normal).unwrap();
        let chain = seg.build_chain(&event, 5).unwrap();
        check_chain(&event, &chain, block_size);
        let total: usize = slots.iter().map(Vec::len).sum();
        prop_assert_eq!(chain.fragment_count().unwrap(), total);
    }

    /// Simple mode packs whole fragments when every fragment fits a block.
    #[test]
    fn simple_chain_reassembles(slots in slots_strategy(20)) {
        let block_size = 512;
        let event = event_with(&slots, 11);
        let seg = MessageSegmenter::new(block_size, ChainMode::Simple).unwrap();
        let chain = seg.build_chain(&event, 5).unwrap();
        check_chain(&event, &chain, block_size);
        for sf in chain.super_fragment_numbers() {
            for block in chain.iter().filter(|b| b.header().super_fragment_nb == sf) {
                // No fragment is split across blocks.
                prop_assert!(split_fragments(block.data()).is_ok());
            }
        }
    }
}
