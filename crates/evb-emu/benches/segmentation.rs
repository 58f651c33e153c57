// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::cast_possible_truncation)] // Bench parameters
#![allow(clippy::missing_panics_doc)] // Benches panic on failure

//! Event building and segmentation benchmarks.
//!
//! - fragment synthesis into a pooled event
//! - block chain construction, normal and simple mode
//! - fragment CRC

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use evb_emu::frame::fragment_crc;
use evb_emu::{
    ChainMode, Event, EventLayout, Fragment, FragmentGenerator, FragmentParams, MessageSegmenter,
    SizeMode,
};

// ============================================================================
// Helpers
// ============================================================================

fn layout(slots: usize, per_slot: usize) -> EventLayout {
    let mut layout = EventLayout::uniform(slots, per_slot);
    layout.initial_bytes = 64 * 1024;
    layout
}

fn filled_event(slots: usize, per_slot: usize, words: u32) -> Event {
    let mut event = Event::new(0, layout(slots, per_slot));
    let mut gen = FragmentGenerator::new(SizeMode::Fixed { words }).with_seed(7);
    let fed_ids: Vec<u16> = (0..(slots * per_slot) as u16).collect();
    gen.fill_event(&mut event, 1, &fed_ids)
        .expect("bench event fits its layout");
    event
}

// ============================================================================
// Generation
// ============================================================================

fn bench_fill_event(c: &mut Criterion) {
    let mut group = c.benchmark_group("fill_event");
    let fed_ids: Vec<u16> = (0..512).collect();
    group.throughput(Throughput::Elements(fed_ids.len() as u64));

    for mode in [
        ("fixed_64w", SizeMode::Fixed { words: 64 }),
        (
            "uniform",
            SizeMode::Uniform {
                min_words: 3,
                max_words: 512,
            },
        ),
    ] {
        let (name, size) = mode;
        let mut gen = FragmentGenerator::new(size).with_seed(42);
        let mut event = Event::new(0, layout(64, 8));
        group.bench_function(name, |b| {
            let mut n = 0u32;
            b.iter(|| {
                n = n.wrapping_add(1);
                black_box(gen.fill_event(&mut event, n, &fed_ids).ok());
            });
        });
    }
    group.finish();
}

// ============================================================================
// Segmentation
// ============================================================================

fn bench_build_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_chain");
    let event = filled_event(64, 8, 64);
    let bytes: usize = event.super_fragments().iter().map(|sf| sf.used_bytes()).sum();
    group.throughput(Throughput::Bytes(bytes as u64));

    for block_size in [4096usize, 32768, 65536] {
        let seg = MessageSegmenter::new(block_size, ChainMode::Normal).expect("valid block size");
        group.bench_with_input(
            BenchmarkId::new("normal", block_size),
            &block_size,
            |b, _| b.iter(|| black_box(seg.build_chain(&event, 1).ok())),
        );
    }

    let seg = MessageSegmenter::new(32768, ChainMode::Simple).expect("valid block size");
    group.bench_function("simple/32768", |b| {
        b.iter(|| black_box(seg.build_chain(&event, 1).ok()))
    });
    group.finish();
}

// ============================================================================
// CRC
// ============================================================================

fn bench_fragment_crc(c: &mut Criterion) {
    let mut group = c.benchmark_group("fragment_crc");
    for words in [16u32, 256, 4096] {
        let fragment =
            Fragment::build(&FragmentParams::new(1, 0, words), false).expect("valid length");
        group.throughput(Throughput::Bytes(fragment.as_bytes().len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(words), &fragment, |b, f| {
            b.iter(|| black_box(fragment_crc(f.as_bytes())))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_fill_event, bench_build_chain, bench_fragment_crc);
criterion_main!(benches);
