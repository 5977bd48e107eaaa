//! End-to-end assembly benchmarks: many small chapters, and one large
//! chapter that gets split.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use assemble_core::plugin::FixedIdentifierSource;
use assemble_epub::{BookAssembler, BookOptions, ChapterOptions, EpubVersion, TocOptions};
use assemble_transforms::{FsFetcher, RasterImageLoader};

fn chapter(title: &str, paragraphs: usize) -> String {
    let mut body = String::new();
    for i in 0..paragraphs {
        body.push_str(&format!(
            "<p id=\"p{i}\">Paragraph {i} of {title}, long enough to resemble a line of ordinary prose.</p>\n"
        ));
    }
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<html xmlns=\"http://www.w3.org/1999/xhtml\">\
         <head><title>{title}</title></head><body><h1>{title}</h1>{body}</body></html>"
    )
}

fn assembler(version: EpubVersion) -> BookAssembler {
    let options = BookOptions::with_version(version);
    let images = RasterImageLoader::from_options(&options);
    let mut book = BookAssembler::with_collaborators(
        options,
        Box::new(FsFetcher),
        Box::new(images),
        Box::new(FixedIdentifierSource::new("bench-book", 1_700_000_000)),
    );
    book.set_title("Benchmark").unwrap();
    book.set_author("Bench Author", "Author, Bench").unwrap();
    book
}

fn bench_assemble(c: &mut Criterion) {
    let mut group = c.benchmark_group("Assemble");
    group.sample_size(20);

    let chapters: Vec<String> = (1..=50).map(|n| chapter(&format!("Chapter {n}"), 40)).collect();
    for version in [EpubVersion::V2, EpubVersion::V3] {
        let name = format!("50_chapters_epub{}", version.package_version());
        group.bench_function(&name, |b| {
            b.iter(|| {
                let mut book = assembler(version);
                for (n, html) in chapters.iter().enumerate() {
                    book.add_chapter(&format!("Chapter {}", n + 1), &format!("chapter{}.xhtml", n + 1), html.as_str())
                        .unwrap();
                }
                book.build_toc(TocOptions::default()).unwrap();
                black_box(book.book_size().unwrap())
            })
        });
    }

    let large = chapter("Large", 8000);
    let options = ChapterOptions {
        auto_split: true,
        ..ChapterOptions::default()
    };
    group.bench_function("auto_split_large_chapter", |b| {
        b.iter(|| {
            let mut book = assembler(EpubVersion::V2);
            book.add_chapter_with("Large", "large.xhtml", black_box(large.as_str()), &options)
                .unwrap();
            black_box(book.book_size().unwrap())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_assemble);
criterion_main!(benches);
