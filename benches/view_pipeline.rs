use criterion::{black_box, criterion_group, criterion_main, Criterion};
use datagrid::data::data_view::DataView;
use datagrid::data::datatable::{ColumnDefinition, ColumnSet, DataType, DataValue, RowData};
use datagrid::data::filter_engine::SearchCriteria;
use datagrid::data::sort_engine::SortKey;

fn create_test_view(rows: usize) -> DataView {
    let columns = ColumnSet::new(vec![
        ColumnDefinition::new("book", 0),
        ColumnDefinition::new("value", 1).with_type(DataType::Integer),
        ColumnDefinition::new("status", 2),
    ]);

    let book_values = [
        "Commodities Trading",
        "Equity Trading",
        "FX Trading",
        "Bond Trading",
        "Derivatives",
        "Options",
        "Futures",
        "ETF Trading",
        "Structured Products",
        "Money Markets",
    ];

    let data = (0..rows)
        .map(|i| {
            RowData::array([
                DataValue::from(book_values[i % book_values.len()]),
                DataValue::Integer(((i * 7919) % rows) as i64),
                DataValue::from(format!("STATUS_{}", i % 5)),
            ])
        })
        .collect();

    let mut view = DataView::new(columns);
    view.add_rows(data, true).expect("bench rows fit the columns");
    view
}

fn benchmark_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter");

    for (label, rows) in [("10k_rows", 10_000), ("100k_rows", 100_000)] {
        group.bench_function(label, |b| {
            let mut view = create_test_view(rows);
            let mut flip = false;
            b.iter(|| {
                // Alternate terms so every pass is a full one
                flip = !flip;
                let term = if flip { "trading" } else { "status_1" };
                let result = view.filter(SearchCriteria::new(black_box(term)), None, true);
                assert!(result.is_ok());
            });
        });
    }

    group.bench_function("incremental_100k", |b| {
        let mut view = create_test_view(100_000);
        b.iter(|| {
            view.filter(SearchCriteria::new("t"), None, false).unwrap();
            let result = view.filter(SearchCriteria::new(black_box("tr")), None, true);
            assert!(result.is_ok());
        });
    });

    group.finish();
}

fn benchmark_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("sort");

    group.bench_function("numeric_100k", |b| {
        let mut view = create_test_view(100_000);
        let mut descending = false;
        b.iter(|| {
            descending = !descending;
            let key = if descending {
                SortKey::desc(1)
            } else {
                SortKey::asc(1)
            };
            let result = view.sort(black_box(vec![key]), true);
            assert!(result.is_ok());
        });
    });

    group.bench_function("two_keys_100k", |b| {
        let mut view = create_test_view(100_000);
        b.iter(|| {
            let result = view.sort(black_box(vec![SortKey::asc(2), SortKey::desc(0)]), true);
            assert!(result.is_ok());
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_filter, benchmark_sort);
criterion_main!(benches);
