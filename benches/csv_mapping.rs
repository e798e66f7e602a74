//! CSV Mapping Benchmarks
//!
//! Row mapping runs once per imported or exported book, so large libraries
//! spend most of their non-network time here.
//!
//! Run with: `cargo bench --bench csv_mapping`

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;

use bookshelf_server::transfer::mapping::{self, CsvRow};

/// A fully populated spreadsheet row
fn sample_row(i: usize) -> CsvRow {
    [
        ("Title", format!("Il nome della rosa {}", i)),
        ("Author", "Umberto Eco".to_string()),
        ("Status", "letto".to_string()),
        ("Original Title", String::new()),
        ("Subtitle", "Romanzo".to_string()),
        ("Author (Last, First)", "Eco, Umberto".to_string()),
        ("Translator", String::new()),
        ("Publisher", "Bompiani".to_string()),
        ("Genre", "Giallo storico".to_string()),
        ("Summary", "Un'abbazia benedettina nel 1327.".to_string()),
        ("Year Published", "1980".to_string()),
        ("Language", "Italiano".to_string()),
        ("Number of Pages", "503.0".to_string()),
        ("Rating", "4,5".to_string()),
        ("Physical Location", "Sez. 3".to_string()),
        ("Date Started", "03/01/2024".to_string()),
        ("Date Finished", "2024-02-11".to_string()),
        ("Current Page", "503".to_string()),
        ("Notes", String::new()),
        ("Category", "Narrativa".to_string()),
        ("Wish List", "no".to_string()),
        ("Previously Owned", "Sì".to_string()),
        ("Up Next", "0".to_string()),
        ("ISBN", "9788845278655".to_string()),
        ("Cover URL", String::new()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

fn bench_row_to_book(c: &mut Criterion) {
    let rows: Vec<CsvRow> = (0..100).map(sample_row).collect();

    let mut group = c.benchmark_group("csv_import_mapping");
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("row_to_book_100", |b| {
        b.iter(|| {
            for row in &rows {
                black_box(mapping::row_to_book(black_box(row)));
            }
        })
    });

    group.bench_function("parse_date_mixed", |b| {
        b.iter(|| {
            for raw in ["2024-02-11", "03/01/2024", "11.02.2024", "February 11, 2024", "1980"] {
                black_box(mapping::parse_date(black_box(raw)));
            }
        })
    });

    group.finish();
}

fn bench_book_to_record(c: &mut Criterion) {
    let books: Vec<_> = (0..100)
        .map(|i| mapping::row_to_book(&sample_row(i)))
        .collect();

    let mut group = c.benchmark_group("csv_export_mapping");
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("book_to_record_100", |b| {
        b.iter(|| {
            for book in &books {
                black_box(mapping::book_to_record(black_box(book)));
            }
        })
    });

    group.finish();
}

criterion_group!(benches, bench_row_to_book, bench_book_to_record);
criterion_main!(benches);
