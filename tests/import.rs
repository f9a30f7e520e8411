//! End-to-end import tests: stage, flush, freeze, decode.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use topograph::tracker::{CountingTracker, NoopTracker};
use topograph::{
    run_flush_tasks, AdjacencyImporter, AdjacencyList, Aggregation, AllocationTracker,
    BuildError, CompressionKind, CompressorFactory, ImportSizing, TerminationFlag,
};

fn noop() -> Arc<dyn AllocationTracker> {
    Arc::new(NoopTracker)
}

/// Imports `(source, target)` pairs one group per edge and freezes the list.
fn build(
    kind: CompressionKind,
    node_count: u64,
    edges: &[(u64, u64)],
    page_size: usize,
) -> AdjacencyList {
    let sizing = ImportSizing::of(2, node_count).unwrap();
    let importer = AdjacencyImporter::new(sizing, 0, TerminationFlag::running(), noop());
    let sources: Vec<u64> = edges.iter().map(|&(s, _)| s).collect();
    let targets: Vec<u64> = edges.iter().map(|&(_, t)| t).collect();
    let offsets: Vec<usize> = (0..sources.len()).collect();
    importer.add_all(&sources, &offsets, &targets, &[]).unwrap();

    let factory =
        CompressorFactory::new(kind, node_count, 0, &[], page_size, noop()).unwrap();
    let total = run_flush_tasks(importer.flush(&factory).unwrap()).unwrap();
    let list = factory.build().unwrap();
    assert_eq!(total, list.edge_count());
    list
}

#[test]
fn small_import_decodes_sorted() {
    let list = build(
        CompressionKind::DeltaVarLong,
        3,
        &[(0, 2), (0, 1), (1, 0)],
        1 << 12,
    );
    assert_eq!(list.degree(0), 2);
    assert_eq!(list.neighbors(0).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(list.degree(1), 1);
    assert_eq!(list.neighbors(1).collect::<Vec<_>>(), vec![0]);
    assert_eq!(list.degree(2), 0);
    assert_eq!(list.edge_count(), 3);
}

#[test]
fn sum_aggregation_merges_parallel_edges() {
    let sizing = ImportSizing::of(2, 2).unwrap();
    let importer = AdjacencyImporter::new(sizing, 1, TerminationFlag::running(), noop());
    importer
        .add_all(
            &[0, 0],
            &[0, 1],
            &[1, 1],
            &[&[3.0f64.to_bits(), 4.0f64.to_bits()]],
        )
        .unwrap();

    let factory = CompressorFactory::new(
        CompressionKind::DeltaVarLong,
        2,
        1,
        &[Aggregation::Sum],
        1 << 12,
        noop(),
    )
    .unwrap();
    run_flush_tasks(importer.flush(&factory).unwrap()).unwrap();
    let list = factory.build().unwrap();

    assert_eq!(list.degree(0), 1);
    assert_eq!(list.neighbors(0).collect::<Vec<_>>(), vec![1]);
    let values: Vec<f64> = list.property_values(0, 0).map(f64::from_bits).collect();
    assert_eq!(values, vec![7.0]);
    assert_eq!(list.edge_count(), 1);
}

#[test]
fn count_aggregation_yields_multiplicity() {
    let sizing = ImportSizing::of(1, 4).unwrap();
    let importer = AdjacencyImporter::new(sizing, 1, TerminationFlag::running(), noop());
    let raw = 99.0f64.to_bits();
    importer
        .add_all(&[2, 2, 2], &[0, 1, 2], &[3, 3, 0], &[&[raw, raw, raw]])
        .unwrap();

    let factory = CompressorFactory::new(
        CompressionKind::Raw,
        4,
        1,
        &[Aggregation::Count],
        1 << 12,
        noop(),
    )
    .unwrap();
    run_flush_tasks(importer.flush(&factory).unwrap()).unwrap();
    let list = factory.build().unwrap();

    assert_eq!(list.neighbors(2).collect::<Vec<_>>(), vec![0, 3]);
    let values: Vec<f64> = list.property_values(0, 2).map(f64::from_bits).collect();
    assert_eq!(values, vec![1.0, 2.0]);
}

#[test]
fn degree_tables_are_deterministic_across_builds() {
    let edges: Vec<(u64, u64)> = vec![(0, 5), (3, 1), (0, 2), (7, 7), (3, 0), (0, 2)];
    let a = build(CompressionKind::DeltaVarLong, 8, &edges, 256);
    let b = build(CompressionKind::DeltaVarLong, 8, &edges, 256);
    for node in 0..8u64 {
        assert_eq!(a.degree(node), b.degree(node));
        assert_eq!(
            a.neighbors(node).collect::<Vec<_>>(),
            b.neighbors(node).collect::<Vec<_>>()
        );
    }
}

#[test]
fn oversized_record_survives_tiny_pages() {
    // degree 100 raw record is 4 + 800 bytes, far above the 16-byte page
    let edges: Vec<(u64, u64)> = (0..100).map(|t| (0u64, t as u64 * 3)).collect();
    let list = build(CompressionKind::Raw, 2, &edges, 16);
    assert_eq!(list.degree(0), 100);
    let decoded: Vec<u64> = list.neighbors(0).collect();
    let expected: Vec<u64> = (0..100u64).map(|t| t * 3).collect();
    assert_eq!(decoded, expected);
}

#[test]
fn raw_and_delta_decode_identically() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let node_count = 64u64;
    let edges: Vec<(u64, u64)> = (0..2000)
        .map(|_| (rng.gen_range(0..node_count), rng.gen_range(0..node_count)))
        .collect();
    let delta = build(CompressionKind::DeltaVarLong, node_count, &edges, 512);
    let raw = build(CompressionKind::Raw, node_count, &edges, 512);
    for node in 0..node_count {
        assert_eq!(
            delta.neighbors(node).collect::<Vec<_>>(),
            raw.neighbors(node).collect::<Vec<_>>(),
            "node {node}"
        );
    }
}

#[test]
fn concurrent_import_matches_serial_oracle() {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let node_count = 500u64;
    let edges: Vec<(u64, u64)> = (0..20_000)
        .map(|_| (rng.gen_range(0..node_count), rng.gen_range(0..node_count)))
        .collect();

    let mut oracle: BTreeMap<u64, Vec<u64>> = BTreeMap::new();
    for &(s, t) in &edges {
        oracle.entry(s).or_default().push(t);
    }
    for targets in oracle.values_mut() {
        targets.sort_unstable();
    }

    let sizing = ImportSizing::of(4, node_count).unwrap();
    let importer = Arc::new(AdjacencyImporter::new(
        sizing,
        0,
        TerminationFlag::running(),
        noop(),
    ));
    thread::scope(|scope| {
        for chunk in edges.chunks(edges.len() / 4) {
            let importer = Arc::clone(&importer);
            scope.spawn(move || {
                let sources: Vec<u64> = chunk.iter().map(|&(s, _)| s).collect();
                let targets: Vec<u64> = chunk.iter().map(|&(_, t)| t).collect();
                let offsets: Vec<usize> = (0..sources.len()).collect();
                importer.add_all(&sources, &offsets, &targets, &[]).unwrap();
            });
        }
    });

    let importer = Arc::try_unwrap(importer).ok().unwrap();
    let factory = CompressorFactory::new(
        CompressionKind::DeltaVarLong,
        node_count,
        0,
        &[],
        1 << 14,
        noop(),
    )
    .unwrap();
    run_flush_tasks(importer.flush(&factory).unwrap()).unwrap();
    let list = factory.build().unwrap();

    assert_eq!(list.edge_count(), edges.len() as u64);
    for node in 0..node_count {
        let expected = oracle.get(&node).cloned().unwrap_or_default();
        assert_eq!(list.degree(node) as usize, expected.len(), "node {node}");
        assert_eq!(list.neighbors(node).collect::<Vec<_>>(), expected);
    }
}

#[test]
fn stopped_flag_terminates_the_flush() {
    let flag = TerminationFlag::running();
    let sizing = ImportSizing::of(1, 4).unwrap();
    let importer = AdjacencyImporter::new(sizing, 0, flag.clone(), noop());
    importer.add_all(&[0, 1], &[0, 1], &[1, 2], &[]).unwrap();

    let factory =
        CompressorFactory::new(CompressionKind::DeltaVarLong, 4, 0, &[], 256, noop()).unwrap();
    let tasks = importer.flush(&factory).unwrap();
    flag.stop();
    let err = run_flush_tasks(tasks).unwrap_err();
    assert!(matches!(err, BuildError::Terminated));
}

#[test]
fn tracker_balances_staging_and_holds_arena_pages() {
    let tracker = Arc::new(CountingTracker::default());
    let page_size = 1024usize;

    let sizing = ImportSizing::with_page_capacity(16, 4).unwrap();
    let importer = AdjacencyImporter::new(
        sizing,
        1,
        TerminationFlag::running(),
        Arc::clone(&tracker) as _,
    );
    let weights: Vec<u64> = (1..=6).map(|w| (w as f64).to_bits()).collect();
    importer
        .add_all(&[0, 1, 2], &[0, 2, 4], &[9, 8, 7, 6, 5, 4], &[&weights])
        .unwrap();
    let staged_bytes = tracker.in_use();
    assert!(staged_bytes > 0);

    let factory = CompressorFactory::new(
        CompressionKind::DeltaVarLong,
        4,
        1,
        &[Aggregation::None],
        page_size,
        Arc::clone(&tracker) as _,
    )
    .unwrap();
    run_flush_tasks(importer.flush(&factory).unwrap()).unwrap();
    let list = factory.build().unwrap();
    assert_eq!(list.edge_count(), 6);

    // all staged target and property bytes released; one flush task wrote
    // one topology page and one property page
    assert_eq!(tracker.in_use(), 2 * page_size as u64);
}

#[test]
fn empty_import_freezes_to_an_empty_list() {
    let sizing = ImportSizing::of(2, 10).unwrap();
    let importer = AdjacencyImporter::new(sizing, 0, TerminationFlag::running(), noop());
    let factory =
        CompressorFactory::new(CompressionKind::DeltaVarLong, 10, 0, &[], 256, noop()).unwrap();
    let tasks = importer.flush(&factory).unwrap();
    assert!(tasks.is_empty());
    let list = factory.build().unwrap();
    assert_eq!(list.edge_count(), 0);
    for node in 0..10u64 {
        assert_eq!(list.degree(node), 0);
        assert_eq!(list.neighbors(node).count(), 0);
    }
}

#[test]
fn nan_property_under_sum_fails_the_flush() {
    let sizing = ImportSizing::of(1, 2).unwrap();
    let importer = AdjacencyImporter::new(sizing, 1, TerminationFlag::running(), noop());
    importer
        .add_all(
            &[0, 0],
            &[0, 1],
            &[1, 1],
            &[&[f64::NAN.to_bits(), 1.0f64.to_bits()]],
        )
        .unwrap();

    let factory = CompressorFactory::new(
        CompressionKind::DeltaVarLong,
        2,
        1,
        &[Aggregation::Sum],
        256,
        noop(),
    )
    .unwrap();
    let err = run_flush_tasks(importer.flush(&factory).unwrap()).unwrap_err();
    assert!(matches!(err, BuildError::UnsupportedValue(_)));
}
