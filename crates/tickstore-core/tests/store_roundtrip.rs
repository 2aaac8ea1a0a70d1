//! End-to-end write/append/update/read lifecycle over the in-memory and
//! local backends.

use std::sync::Arc;

use tickstore_core::config::RuntimeConfig;
use tickstore_core::error::ErrorKind;
use tickstore_core::frame::{Column, DType, FieldDef, Frame, Scalar, Schema};
use tickstore_core::keys::StreamId;
use tickstore_core::query::ReadRequest;
use tickstore_core::storage::{Backend, LocalBackend, MemoryBackend};
use tickstore_core::store::TickStore;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn xy_schema() -> Schema {
    Schema::new(
        FieldDef::new("ts", DType::Timestamp),
        vec![
            FieldDef::new("x", DType::Int64),
            FieldDef::new("y", DType::Float64),
        ],
    )
    .expect("valid schema")
}

fn xy_frame(ts: impl Iterator<Item = i64>) -> Frame {
    let ts: Vec<i64> = ts.collect();
    let x: Vec<i64> = ts.clone();
    let y: Vec<f64> = ts.iter().map(|&v| v as f64 / 2.0).collect();
    Frame::new(
        xy_schema(),
        Column::from_i64(DType::Timestamp, ts),
        vec![
            Column::from_i64(DType::Int64, x),
            Column::from_f64(y),
        ],
    )
    .expect("valid frame")
}

fn memory_store() -> TickStore {
    TickStore::new(Arc::new(MemoryBackend::new()), RuntimeConfig::default())
}

fn small_tile_store(backend: Arc<dyn Backend>) -> TickStore {
    let config = RuntimeConfig {
        row_slice_size: 100,
        col_slice_size: 8,
        ..RuntimeConfig::default()
    };
    TickStore::new(backend, config)
}

fn symbol(name: &str) -> StreamId {
    TickStore::symbol(name).expect("valid symbol")
}

#[tokio::test]
async fn write_then_read_returns_identical_frame() -> TestResult {
    let store = memory_store();
    let sym = symbol("roundtrip");
    let frame = xy_frame(0..10);

    let node = store.write(&sym, &frame).await?;
    assert_eq!(node.version_id, 1);

    let back = store.read(&sym, ReadRequest::new()).await?;
    assert_eq!(back, frame);
    Ok(())
}

#[tokio::test]
async fn three_appends_with_date_range_read() -> TestResult {
    let backend = Arc::new(MemoryBackend::new());
    let store = small_tile_store(backend);
    let sym = symbol("appended");

    store.write(&sym, &xy_frame(0..100)).await?;
    store.append(&sym, &xy_frame(100..200)).await?;
    store.append(&sym, &xy_frame(200..300)).await?;

    let result = store
        .read(&sym, ReadRequest::new().with_date_range(50, 249))
        .await?;
    assert_eq!(result.num_rows(), 200);
    let x = result.column("x").expect("x column");
    assert_eq!(x.scalar_at(0), Some(Scalar::I64(50)));
    assert_eq!(x.scalar_at(199), Some(Scalar::I64(249)));
    for i in 0..200 {
        assert_eq!(x.scalar_at(i), Some(Scalar::I64(50 + i as i64)));
    }
    Ok(())
}

#[tokio::test]
async fn as_of_reads_are_unaffected_by_later_versions() -> TestResult {
    let store = memory_store();
    let sym = symbol("versioned");

    store.write(&sym, &xy_frame(0..5)).await?;
    store.write(&sym, &xy_frame(100..103)).await?;

    let latest = store.read(&sym, ReadRequest::new()).await?;
    assert_eq!(latest.num_rows(), 3);

    let v1 = store.read(&sym, ReadRequest::new().as_of(1)).await?;
    assert_eq!(v1.num_rows(), 5);
    assert_eq!(
        v1.index().i64_values(),
        Some(&[0i64, 1, 2, 3, 4][..])
    );

    let versions = store.list_versions(&sym).await?;
    let ids: Vec<u64> = versions.iter().map(|n| n.version_id).collect();
    assert_eq!(ids, vec![2, 1]);
    // Version 2 tombstoned version 1's keys without touching its chain.
    assert!(!versions[0].tombstones.is_empty());
    Ok(())
}

#[tokio::test]
async fn concurrent_appends_both_land() -> TestResult {
    let store = memory_store();
    let sym = symbol("contended");
    store.write(&sym, &xy_frame(0..0)).await?;

    let a = {
        let store = store.clone();
        let sym = sym.clone();
        tokio::spawn(async move { store.append(&sym, &xy_frame(100..101)).await })
    };
    let b = {
        let store = store.clone();
        let sym = sym.clone();
        tokio::spawn(async move { store.append(&sym, &xy_frame(100..101)).await })
    };
    a.await??;
    b.await??;

    let result = store.read(&sym, ReadRequest::new()).await?;
    assert_eq!(result.num_rows(), 2, "both appends committed");

    let versions = store.list_versions(&sym).await?;
    assert_eq!(versions.first().map(|n| n.version_id), Some(3));
    Ok(())
}

#[tokio::test]
async fn update_splices_rows_in_place() -> TestResult {
    let backend = Arc::new(MemoryBackend::new());
    let store = small_tile_store(backend);
    let sym = symbol("updated");

    store.write(&sym, &xy_frame(0..300)).await?;

    // Replace [100, 149] with rewritten values.
    let patch_ts: Vec<i64> = (100..150).collect();
    let patch = Frame::new(
        xy_schema(),
        Column::from_i64(DType::Timestamp, patch_ts.clone()),
        vec![
            Column::from_i64(DType::Int64, patch_ts.iter().map(|v| v * 10).collect()),
            Column::from_f64(vec![0.0; 50]),
        ],
    )?;
    store.update(&sym, &patch).await?;

    let result = store.read(&sym, ReadRequest::new()).await?;
    assert_eq!(result.num_rows(), 300);
    let x = result.column("x").expect("x column");
    assert_eq!(x.scalar_at(99), Some(Scalar::I64(99)));
    assert_eq!(x.scalar_at(100), Some(Scalar::I64(1000)));
    assert_eq!(x.scalar_at(149), Some(Scalar::I64(1490)));
    assert_eq!(x.scalar_at(150), Some(Scalar::I64(150)));

    // The index is still contiguous and sorted.
    assert!(result.index().is_sorted());
    Ok(())
}

#[tokio::test]
async fn corrupt_tile_fails_its_slice_and_spares_the_rest() -> TestResult {
    let tmp = tempfile::TempDir::new()?;
    let backend = Arc::new(LocalBackend::new(tmp.path()));
    let store = small_tile_store(backend.clone());
    let sym = symbol("corrupted");

    store.write(&sym, &xy_frame(0..200)).await?;

    // Flip one byte in the second row slice's tile.
    let tiles = backend.list("tdata/").await?;
    let target = tiles
        .iter()
        .find(|name| name.contains("/t:100/"))
        .expect("second tile present");
    let mut bytes = backend.get(target).await?.to_vec();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    backend
        .put(target, bytes.into(), false)
        .await
        .expect("overwrite for corruption test");

    // A read confined to the intact slice never touches the bad tile.
    let ok = store
        .read(&sym, ReadRequest::new().with_date_range(0, 99))
        .await?;
    assert_eq!(ok.num_rows(), 100);

    // A read across the corrupted slice surfaces Corrupt.
    let err = store
        .read(&sym, ReadRequest::new())
        .await
        .expect_err("corrupt slice");
    assert_eq!(err.kind(), ErrorKind::Corrupt);
    Ok(())
}

#[tokio::test]
async fn staged_frames_compact_into_one_sorted_version() -> TestResult {
    let store = memory_store();
    let sym = symbol("staged");

    store.stage(&sym, &xy_frame(50..60)).await?;
    store.stage(&sym, &xy_frame(0..10)).await?;

    let node = store.compact_staged(&sym).await?;
    assert_eq!(node.version_id, 1);

    let result = store.read(&sym, ReadRequest::new()).await?;
    assert_eq!(result.num_rows(), 20);
    assert!(result.index().is_sorted());
    assert_eq!(result.index().scalar_at(0), Some(Scalar::I64(0)));
    assert_eq!(result.index().scalar_at(19), Some(Scalar::I64(59)));

    // Staged keys are gone; compacting again is a user error.
    let err = store.compact_staged(&sym).await.expect_err("nothing staged");
    assert_eq!(err.kind(), ErrorKind::UserInput);
    Ok(())
}

#[tokio::test]
async fn symbol_lifecycle_listing_and_deletion() -> TestResult {
    let store = memory_store();
    let a = symbol("alpha");
    let b = symbol("beta");

    store.write(&a, &xy_frame(0..3)).await?;
    store.write(&b, &xy_frame(0..3)).await?;
    assert_eq!(store.list_symbols().await?, vec![a.clone(), b.clone()]);

    store.delete_symbol(&a).await?;
    assert_eq!(store.list_symbols().await?, vec![b.clone()]);

    let err = store.read(&a, ReadRequest::new()).await.expect_err("deleted");
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // History survives deletion for as-of access.
    let old = store.read(&a, ReadRequest::new().as_of(1)).await?;
    assert_eq!(old.num_rows(), 3);

    // Re-creating the symbol brings it back into the listing.
    store.write(&a, &xy_frame(10..12)).await?;
    assert_eq!(store.list_symbols().await?, vec![a, b]);
    Ok(())
}

#[tokio::test]
async fn snapshots_pin_versions_and_survive_rewrites() -> TestResult {
    let store = memory_store();
    let sym = symbol("snapped");

    store.write(&sym, &xy_frame(0..4)).await?;
    store.snapshot("release-1").await?;
    store.write(&sym, &xy_frame(100..102)).await?;

    assert_eq!(store.list_snapshots().await?, vec!["release-1".to_string()]);

    // A second snapshot under the same name is refused.
    let err = store.snapshot("release-1").await.expect_err("duplicate");
    assert_eq!(err.kind(), ErrorKind::UserInput);

    // Garbage collection with zero grace keeps everything the snapshot
    // and chain still reach, so the pinned version stays readable.
    let report = store.garbage_collect().await?;
    assert!(report.deleted.is_empty());
    let pinned = store.read(&sym, ReadRequest::new().as_of(1)).await?;
    assert_eq!(pinned.num_rows(), 4);

    store.delete_snapshot("release-1").await?;
    assert!(store.list_snapshots().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn head_and_tail_read_row_ranges() -> TestResult {
    let backend = Arc::new(MemoryBackend::new());
    let store = small_tile_store(backend);
    let sym = symbol("ranged");
    store.write(&sym, &xy_frame(0..250)).await?;

    let head = store.head(&sym, 5).await?;
    assert_eq!(head.index().i64_values(), Some(&[0i64, 1, 2, 3, 4][..]));

    let tail = store.tail(&sym, 3).await?;
    assert_eq!(tail.index().i64_values(), Some(&[247i64, 248, 249][..]));
    Ok(())
}

#[tokio::test]
async fn column_stats_artifact_is_persisted() -> TestResult {
    let store = memory_store();
    let sym = symbol("measured");
    store.write(&sym, &xy_frame(0..50)).await?;

    let stats = store.column_stats(&sym, Some(vec!["x".to_string()])).await?;
    assert!(!stats.is_empty());
    assert_eq!(stats[0].0, "x");
    assert_eq!(stats[0].1.min, Some(Scalar::I64(0)));
    assert_eq!(stats[0].1.max, Some(Scalar::I64(49)));
    Ok(())
}

#[tokio::test]
async fn unsorted_and_mismatched_writes_are_user_errors() -> TestResult {
    let store = memory_store();
    let sym = symbol("strict");

    let unsorted = Frame::new(
        xy_schema(),
        Column::from_i64(DType::Timestamp, vec![5, 1, 3]),
        vec![
            Column::from_i64(DType::Int64, vec![1, 2, 3]),
            Column::from_f64(vec![0.1, 0.2, 0.3]),
        ],
    )?;
    let err = store.write(&sym, &unsorted).await.expect_err("unsorted");
    assert_eq!(err.kind(), ErrorKind::UserInput);

    store.write(&sym, &xy_frame(0..10)).await?;

    // Appending before the last index value is refused.
    let err = store
        .append(&sym, &xy_frame(3..5))
        .await
        .expect_err("out of order append");
    assert_eq!(err.kind(), ErrorKind::UserInput);
    Ok(())
}
