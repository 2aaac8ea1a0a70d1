//! Pipeline-heavy reads: filter, projection, grouping, resampling,
//! sorting, and cancellation.

use std::sync::Arc;

use tickstore_core::agg::{AggOp, NamedAggregator};
use tickstore_core::clause::row_range::RowRangeKind;
use tickstore_core::clause::{ResampleBoundary, ResampleOrigin};
use tickstore_core::config::RuntimeConfig;
use tickstore_core::error::ErrorKind;
use tickstore_core::exec::CancelToken;
use tickstore_core::expr::{BinaryOp, ExprTree};
use tickstore_core::frame::{Column, DType, FieldDef, Frame, Scalar, Schema};
use tickstore_core::keys::StreamId;
use tickstore_core::query::{GroupBy, ReadRequest, ResampleSpec};
use tickstore_core::storage::MemoryBackend;
use tickstore_core::store::TickStore;

type TestResult = Result<(), Box<dyn std::error::Error>>;

const HOUR_NS: i64 = 3_600 * 1_000_000_000;

fn store_with_tiles(row_slice: usize) -> TickStore {
    let config = RuntimeConfig {
        row_slice_size: row_slice,
        ..RuntimeConfig::default()
    };
    TickStore::new(Arc::new(MemoryBackend::new()), config)
}

fn symbol(name: &str) -> StreamId {
    TickStore::symbol(name).expect("valid symbol")
}

fn gt_filter(column: &str, threshold: i64) -> ExprTree {
    let mut b = ExprTree::builder();
    let col = b.column(column);
    let v = b.value(Scalar::I64(threshold));
    let root = b.binary(BinaryOp::Gt, col, v);
    b.build(root).expect("tree")
}

fn times_two(column: &str) -> ExprTree {
    let mut b = ExprTree::builder();
    let col = b.column(column);
    let two = b.value(Scalar::I64(2));
    let root = b.binary(BinaryOp::Mul, col, two);
    b.build(root).expect("tree")
}

/// Deterministic pseudo-uniform value in `[0, 100)`.
fn uniform_100(i: u64) -> i64 {
    (xxhash_rust::xxh3::xxh3_64(&i.to_le_bytes()) % 100) as i64
}

#[tokio::test]
async fn filter_and_projection_over_many_slices() -> TestResult {
    let rows: u64 = 200_000;
    let store = store_with_tiles(20_000);
    let sym = symbol("uniform");

    let ts: Vec<i64> = (0..rows as i64).collect();
    let x: Vec<i64> = (0..rows).map(uniform_100).collect();
    let y: Vec<f64> = x.iter().map(|&v| v as f64).collect();
    let schema = Schema::new(
        FieldDef::new("ts", DType::Timestamp),
        vec![
            FieldDef::new("x", DType::Int64),
            FieldDef::new("y", DType::Float64),
        ],
    )?;
    let frame = Frame::new(
        schema,
        Column::from_i64(DType::Timestamp, ts),
        vec![
            Column::from_i64(DType::Int64, x.clone()),
            Column::from_f64(y),
        ],
    )?;
    store.write(&sym, &frame).await?;

    let result = store
        .read(
            &sym,
            ReadRequest::new()
                .with_filter(gt_filter("x", 90))
                .with_projection("z", times_two("x")),
        )
        .await?;

    // x > 90 keeps values 91..=99: about 9% of rows, within noise.
    let expected = x.iter().filter(|&&v| v > 90).count();
    assert_eq!(result.num_rows(), expected);
    let share = expected as f64 / rows as f64;
    assert!((0.05..=0.13).contains(&share), "share {share}");

    let xs = result.column("x").expect("x");
    let zs = result.column("z").expect("z");
    for i in 0..result.num_rows() {
        let x_v = xs.scalar_at(i).and_then(|s| s.as_i64()).expect("x value");
        let z_v = zs.scalar_at(i).and_then(|s| s.as_i64()).expect("z value");
        assert!(x_v > 90);
        assert_eq!(z_v, 2 * x_v);
    }
    Ok(())
}

#[tokio::test]
async fn group_by_aggregates_across_slices() -> TestResult {
    let store = store_with_tiles(16);
    let sym = symbol("grouped");

    let rows = 100usize;
    let venues = ["XNAS", "XLON", "XETR"];
    let venue_col: Vec<String> = (0..rows)
        .map(|i| venues[i % venues.len()].to_string())
        .collect();
    let qty: Vec<i64> = (0..rows as i64).collect();
    let schema = Schema::new(
        FieldDef::new("ts", DType::Timestamp),
        vec![
            FieldDef::new("venue", DType::Utf8),
            FieldDef::new("qty", DType::Int64),
        ],
    )?;
    let frame = Frame::new(
        schema,
        Column::from_i64(DType::Timestamp, (0..rows as i64).collect()),
        vec![
            Column::from_utf8(venue_col.clone()),
            Column::from_i64(DType::Int64, qty.clone()),
        ],
    )?;
    store.write(&sym, &frame).await?;

    let result = store
        .read(
            &sym,
            ReadRequest::new().with_group_by(GroupBy {
                column: "venue".to_string(),
                aggregators: vec![
                    NamedAggregator::new(AggOp::Sum, "qty", "qty_sum"),
                    NamedAggregator::new(AggOp::Count, "qty", "qty_count"),
                ],
            }),
        )
        .await?;

    assert_eq!(result.num_rows(), 3);
    let sums = result.column("qty_sum").expect("sum column");
    let counts = result.column("qty_count").expect("count column");
    let mut seen = 0u64;
    for row in 0..result.num_rows() {
        let Some(Scalar::Utf8(venue)) = result.index().scalar_at(row) else {
            panic!("venue key expected");
        };
        let expected_sum: i64 = (0..rows)
            .filter(|i| venue_col[*i] == venue)
            .map(|i| qty[i])
            .sum();
        let expected_count =
            (0..rows).filter(|i| venue_col[*i] == venue).count() as u64;
        assert_eq!(sums.scalar_at(row), Some(Scalar::I64(expected_sum)));
        assert_eq!(counts.scalar_at(row), Some(Scalar::U64(expected_count)));
        seen += expected_count;
    }
    assert_eq!(seen, rows as u64);
    Ok(())
}

#[tokio::test]
async fn hourly_data_resamples_to_daily_sums() -> TestResult {
    let store = store_with_tiles(48);
    let sym = symbol("hourly");

    let rows = 7 * 24;
    let ts: Vec<i64> = (0..rows as i64).map(|i| i * HOUR_NS).collect();
    let v: Vec<i64> = (0..rows as i64).collect();
    let schema = Schema::new(
        FieldDef::new("ts", DType::Timestamp),
        vec![FieldDef::new("v", DType::Int64)],
    )?;
    let frame = Frame::new(
        schema,
        Column::from_i64(DType::Timestamp, ts),
        vec![Column::from_i64(DType::Int64, v)],
    )?;
    store.write(&sym, &frame).await?;

    let result = store
        .read(
            &sym,
            ReadRequest::new().with_resample(ResampleSpec {
                rule: "1D".to_string(),
                closed: ResampleBoundary::Left,
                label: ResampleBoundary::Left,
                offset: 0,
                origin: ResampleOrigin::Epoch,
                aggregators: vec![NamedAggregator::new(AggOp::Sum, "v", "v_sum")],
            }),
        )
        .await?;

    assert_eq!(result.num_rows(), 7);
    let sums = result.column("v_sum").expect("sum column");
    for day in 0..7 {
        assert_eq!(
            result.index().scalar_at(day),
            Some(Scalar::I64(day as i64 * 24 * HOUR_NS))
        );
        let expected: i64 = (0..24).map(|h| day as i64 * 24 + h).sum();
        assert_eq!(sums.scalar_at(day), Some(Scalar::I64(expected)));
    }
    assert!(result.index().is_sorted());
    Ok(())
}

#[tokio::test]
async fn sort_defines_final_row_order() -> TestResult {
    let store = store_with_tiles(4);
    let sym = symbol("sortable");

    let schema = Schema::new(
        FieldDef::new("ts", DType::Timestamp),
        vec![FieldDef::new("x", DType::Int64)],
    )?;
    let frame = Frame::new(
        schema,
        Column::from_i64(DType::Timestamp, vec![0, 1, 2, 3, 4, 5]),
        vec![Column::from_i64(DType::Int64, vec![30, 10, 50, 20, 60, 40])],
    )?;
    store.write(&sym, &frame).await?;

    let result = store
        .read(&sym, ReadRequest::new().with_sort("x"))
        .await?;
    let x = result.column("x").expect("x");
    assert_eq!(
        x.i64_values(),
        Some(&[10i64, 20, 30, 40, 50, 60][..])
    );
    Ok(())
}

#[tokio::test]
async fn column_selection_restricts_output() -> TestResult {
    let store = store_with_tiles(1000);
    let sym = symbol("projected");

    let schema = Schema::new(
        FieldDef::new("ts", DType::Timestamp),
        vec![
            FieldDef::new("a", DType::Int64),
            FieldDef::new("b", DType::Float64),
            FieldDef::new("c", DType::Utf8),
        ],
    )?;
    let frame = Frame::new(
        schema,
        Column::from_i64(DType::Timestamp, vec![1, 2]),
        vec![
            Column::from_i64(DType::Int64, vec![10, 20]),
            Column::from_f64(vec![0.5, 1.5]),
            Column::from_utf8(vec!["p".to_string(), "q".to_string()]),
        ],
    )?;
    store.write(&sym, &frame).await?;

    let result = store
        .read(
            &sym,
            ReadRequest::new().with_columns(vec!["b".to_string()]),
        )
        .await?;
    assert_eq!(result.schema().fields().len(), 1);
    assert_eq!(result.schema().fields()[0].name, "b");
    assert_eq!(result.num_rows(), 2);
    Ok(())
}

#[tokio::test]
async fn row_range_wraps_negative_indices() -> TestResult {
    let store = store_with_tiles(10);
    let sym = symbol("wrapped");

    let schema = Schema::new(
        FieldDef::new("ts", DType::Timestamp),
        vec![FieldDef::new("x", DType::Int64)],
    )?;
    let ts: Vec<i64> = (0..30).collect();
    let frame = Frame::new(
        schema,
        Column::from_i64(DType::Timestamp, ts.clone()),
        vec![Column::from_i64(DType::Int64, ts)],
    )?;
    store.write(&sym, &frame).await?;

    let result = store
        .read(
            &sym,
            ReadRequest::new().with_row_range(RowRangeKind::Range { start: -5, end: -2 }),
        )
        .await?;
    assert_eq!(result.index().i64_values(), Some(&[25i64, 26, 27][..]));
    Ok(())
}

#[tokio::test]
async fn cancelled_token_aborts_the_read() -> TestResult {
    let store = store_with_tiles(10);
    let sym = symbol("cancelled");
    let schema = Schema::new(
        FieldDef::new("ts", DType::Timestamp),
        vec![FieldDef::new("x", DType::Int64)],
    )?;
    let frame = Frame::new(
        schema,
        Column::from_i64(DType::Timestamp, (0..100).collect()),
        vec![Column::from_i64(DType::Int64, (0..100).collect())],
    )?;
    store.write(&sym, &frame).await?;

    let token = CancelToken::new();
    token.cancel();
    let err = store
        .read_with_token(&sym, ReadRequest::new(), token)
        .await
        .expect_err("cancelled before load");
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    Ok(())
}

#[tokio::test]
async fn batch_reads_collect_per_item_results() -> TestResult {
    let store = store_with_tiles(10);
    let good = symbol("batch_good");
    let schema = Schema::new(
        FieldDef::new("ts", DType::Timestamp),
        vec![FieldDef::new("x", DType::Int64)],
    )?;
    let frame = Frame::new(
        schema,
        Column::from_i64(DType::Timestamp, vec![0, 1, 2]),
        vec![Column::from_i64(DType::Int64, vec![1, 2, 3])],
    )?;
    store.write(&good, &frame).await?;

    let results = store
        .read_batch(vec![
            (good.clone(), ReadRequest::new()),
            (symbol("batch_missing"), ReadRequest::new()),
            (good, ReadRequest::new().with_date_range(1, 2)),
        ])
        .await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().expect("good read").num_rows(), 3);
    assert_eq!(
        results[1].as_ref().expect_err("missing symbol").kind(),
        ErrorKind::NotFound
    );
    assert_eq!(results[2].as_ref().expect("ranged read").num_rows(), 2);
    Ok(())
}

#[tokio::test]
async fn invalid_requests_fail_fast_as_user_input() -> TestResult {
    let store = store_with_tiles(10);
    let sym = symbol("strict_query");
    let schema = Schema::new(
        FieldDef::new("ts", DType::Timestamp),
        vec![FieldDef::new("x", DType::Int64)],
    )?;
    let frame = Frame::new(
        schema,
        Column::from_i64(DType::Timestamp, vec![0, 1]),
        vec![Column::from_i64(DType::Int64, vec![1, 2])],
    )?;
    store.write(&sym, &frame).await?;

    let unknown = store
        .read(&sym, ReadRequest::new().with_filter(gt_filter("ghost", 0)))
        .await
        .expect_err("unknown column");
    assert_eq!(unknown.kind(), ErrorKind::UserInput);

    let both_ranges = store
        .read(
            &sym,
            ReadRequest::new()
                .with_date_range(0, 10)
                .with_row_range(RowRangeKind::Head(1)),
        )
        .await
        .expect_err("conflicting predicates");
    assert_eq!(both_ranges.kind(), ErrorKind::UserInput);

    let missing = store
        .read(&symbol("ghost_symbol"), ReadRequest::new())
        .await
        .expect_err("missing symbol");
    assert_eq!(missing.kind(), ErrorKind::NotFound);
    Ok(())
}
