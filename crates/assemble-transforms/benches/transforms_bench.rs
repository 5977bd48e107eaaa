//! Benchmarks for chapter splitting, HTML parsing and image scaling.

use std::io::Cursor;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use assemble_core::plugin::ImageLoader;
use assemble_core::EpubVersion;
use assemble_transforms::dom::Document;
use assemble_transforms::{ChapterSplitter, RasterImageLoader, SplitBoundary};

fn make_chapter(paragraphs: usize) -> String {
    let mut body = String::new();
    for i in 0..paragraphs {
        if i % 50 == 0 {
            body.push_str(&format!("<h2>Section {}</h2>\n", i / 50));
        }
        body.push_str(&format!(
            "<p id=\"p{i}\">Paragraph {i} with <em>emphasis</em> and <strong>strong</strong> text, \
             padded out to look like ordinary prose in a long chapter.</p>\n"
        ));
    }
    format!(
        "<html xmlns=\"http://www.w3.org/1999/xhtml\"><head><title>Bench</title></head>\
         <body><div class=\"chapter\">{body}</div></body></html>"
    )
}

fn bench_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("Split");
    let chapter = make_chapter(5000);

    group.bench_function("parse_serialize_5000_paragraphs", |b| {
        b.iter(|| {
            let doc = Document::parse(black_box(&chapter));
            black_box(doc.to_xhtml(true))
        })
    });

    let splitter = ChapterSplitter::new(50_000, EpubVersion::V2);
    group.bench_function("split_by_size", |b| b.iter(|| black_box(splitter.split(black_box(&chapter)))));

    let boundary = SplitBoundary::Text("Section ".to_string());
    group.bench_function("split_at_headings", |b| {
        b.iter(|| black_box(splitter.split_at(black_box(&chapter), &boundary)))
    });

    group.finish();
}

fn bench_images(c: &mut Criterion) {
    let mut group = c.benchmark_group("Images");

    let img = image::RgbaImage::from_fn(2000, 1500, |x, y| image::Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255]));
    let mut png = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .unwrap();

    let loader = RasterImageLoader::new(Some((768, 1024)), false, 80);
    group.sample_size(10);
    group.bench_function("scale_png_2000x1500", |b| b.iter(|| black_box(loader.load(&png, "big.png").unwrap())));

    group.finish();
}

criterion_group!(benches, bench_split, bench_images);
criterion_main!(benches);
