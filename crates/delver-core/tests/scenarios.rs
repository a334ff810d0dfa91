//! End-to-end runs over temporary source trees.

use delver_core::cascade::CarvedRegion;
use delver_core::handler::PackWriter;
use delver_core::stream::ByteSource;
use delver_core::{
    scan, Action, Carver, Category, CutStrategy, Engine, FormatCatalog, RunSummary, ScanOptions,
};
use pretty_assertions::assert_eq;
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01\0\0\0\x01";

fn png(tag: u8) -> Vec<u8> {
    let mut data = PNG.to_vec();
    data.extend_from_slice(&[tag; 24]);
    data
}

fn write(root: &Path, rel: &str, data: &[u8]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, data).unwrap();
}

fn action_of(summary: &RunSummary, path: &str) -> Action {
    let outcomes: Vec<_> = summary.outcomes_for(path).collect();
    assert_eq!(outcomes.len(), 1, "expected one outcome for {path}: {:#?}", summary.outcomes);
    outcomes[0].action
}

fn sequential() -> ScanOptions {
    ScanOptions::new().sequential()
}

#[test]
fn plain_texture_is_emitted_unchanged() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    write(src.path(), "ui/logo.png", &png(7));

    let summary = scan(src.path(), dest.path(), sequential()).unwrap();

    assert_eq!(action_of(&summary, "ui/logo.png"), Action::Extract);
    assert_eq!(fs::read(dest.path().join("ui/logo.png")).unwrap(), png(7));
    assert_eq!(summary.counters.items, 1);
    assert_eq!(summary.counters.extracted, 1);

    let format = FormatCatalog::shared()
        .identify(&delver_core::stream::MemorySource::new(png(7)), "logo.png");
    assert_eq!(format.category, Category::Texture);
}

#[test]
fn container_routes_recognized_and_unknown_entries() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let mut pack = PackWriter::new();
    pack.add("blob.xyz", vec![0u8; 64]).add("tex.png", png(1));
    write(src.path(), "data.pack", &pack.finish().unwrap());

    let summary = scan(src.path(), dest.path(), sequential()).unwrap();

    assert_eq!(action_of(&summary, "data.pack"), Action::Unpack);
    assert_eq!(action_of(&summary, "data.pack/tex.png"), Action::Extract);
    assert_eq!(action_of(&summary, "data.pack/blob.xyz"), Action::Unknown);
    assert_eq!(fs::read(dest.path().join("data.pack/tex.png")).unwrap(), png(1));

    let position = |path: &str| summary.outcomes.iter().position(|o| o.path == path).unwrap();
    assert!(position("data.pack/tex.png") < position("data.pack/blob.xyz"));
}

#[test]
fn repeated_artifact_goes_to_duplicates() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    write(src.path(), "a/tex.png", &png(3));
    write(src.path(), "b/tex.png", &png(3));

    let summary = scan(src.path(), dest.path(), sequential()).unwrap();

    assert_eq!(action_of(&summary, "a/tex.png"), Action::Extract);
    assert_eq!(action_of(&summary, "b/tex.png"), Action::Duplicate);
    assert!(dest.path().join("a/tex.png").is_file());
    assert!(!dest.path().join("b/tex.png").exists());
    assert!(dest.path().join("~Duplicates/b/tex.png").is_file());
    assert_eq!(summary.counters.duplicates, 1);
}

#[test]
fn corrupt_container_is_contained() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let mut pack = PackWriter::new();
    pack.add("tex.png", png(2));
    let mut bad = pack.finish().unwrap();
    bad[8..12].copy_from_slice(&0x00FF_FFFFu32.to_le_bytes());
    write(src.path(), "bad.pack", &bad);
    write(src.path(), "good.png", &png(9));

    let summary = scan(src.path(), dest.path(), sequential().quarantine(true)).unwrap();

    assert_eq!(action_of(&summary, "bad.pack"), Action::Unsupported);
    let detail = &summary.outcomes_for("bad.pack").next().unwrap().detail;
    assert!(detail.contains("exceeds available"), "{detail}");
    assert_eq!(action_of(&summary, "good.png"), Action::Extract);
    assert_eq!(fs::read(dest.path().join("~Corrupt/bad.pack")).unwrap(), bad);
    assert_eq!(summary.counters.items, 2);
}

#[test]
fn progress_is_conserved_across_nesting() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();

    let mut inner = PackWriter::new();
    inner.add("deep.png", png(4)).add_split("noise.dat", vec![0xA5u8; 300], 3);
    let mut outer = PackWriter::new();
    outer
        .add("inner.pack", inner.finish().unwrap())
        .add("notes.txt", b"plain text".to_vec());
    write(src.path(), "outer.pack", &outer.finish().unwrap());
    write(src.path(), "compressed.gz", &gzip(&png(5)));
    write(src.path(), "archive.zip", &zip(&[("z/one.png", &png(6)), ("two.bin", &[1u8; 40])]));
    write(src.path(), "loose.bin", &[0x5Au8; 128]);

    let summary = scan(src.path(), dest.path(), sequential()).unwrap();

    assert!(summary.counters.bytes_total > 0);
    assert_eq!(summary.counters.bytes_processed, summary.counters.bytes_total);
    assert_eq!(action_of(&summary, "outer.pack/inner.pack/deep.png"), Action::Extract);
    assert_eq!(action_of(&summary, "compressed"), Action::Extract);
    assert_eq!(action_of(&summary, "archive.zip/z/one.png"), Action::Extract);
}

#[test]
fn concurrent_workers_dedup_consistently() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    for i in 0..40u8 {
        let k = i % 10;
        write(src.path(), &format!("d{i:02}/tex{k}.png"), &png(k));
    }

    let options = ScanOptions::new().top_parallelism(8).sub_parallelism(4);
    let engine = Engine::builder(dest.path()).options(options).build().unwrap();
    let summary = engine.run(src.path()).unwrap();

    assert_eq!(engine.result().fingerprint_count(), 10);
    assert_eq!(summary.counters.items, 40);
    assert_eq!(summary.counters.extracted, 10);
    assert_eq!(summary.counters.duplicates, 30);
    assert_eq!(summary.counters.bytes_processed, summary.counters.bytes_total);
}

/// Always "finds" regions, all of them empty
struct EmptyRegions {
    calls: Arc<AtomicUsize>,
}

impl Carver for EmptyRegions {
    fn carve(&self, source: &dyn ByteSource) -> delver_core::Result<Vec<CarvedRegion>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((0..source.len())
            .step_by(8)
            .map(|offset| CarvedRegion {
                offset,
                len: 0,
                extension: "bin".into(),
            })
            .collect())
    }
}

#[test]
fn carving_cutoff_halts_retries() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    for i in 0..10 {
        write(src.path(), &format!("junk{i}.raw"), b"JUNKDATA\x01\x02\x03\x04\x05\x06\x07\x08");
    }

    let calls = Arc::new(AtomicUsize::new(0));
    let engine = Engine::builder(dest.path())
        .options(sequential())
        .carver(EmptyRegions {
            calls: Arc::clone(&calls),
        })
        .build()
        .unwrap();
    let summary = engine.run(src.path()).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(summary.counters.items, 10);
    assert_eq!(summary.counters.unknown, 10);
}

#[test]
fn disk_image_partitions_are_descended() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();

    let mut pack = PackWriter::new();
    pack.add("boot/splash.png", png(8));
    let mut partition = pack.finish().unwrap();
    partition.resize(1024, 0);

    let mut image = vec![0u8; 512];
    image[446 + 4] = 0x83;
    image[446 + 8..446 + 12].copy_from_slice(&1u32.to_le_bytes());
    image[446 + 12..446 + 16].copy_from_slice(&2u32.to_le_bytes());
    image[510] = 0x55;
    image[511] = 0xAA;
    image.extend_from_slice(&partition);
    write(src.path(), "disk.img", &image);

    let summary = scan(src.path(), dest.path(), ScanOptions::new().sub_parallelism(4)).unwrap();

    assert_eq!(action_of(&summary, "disk.img"), Action::Unpack);
    assert_eq!(action_of(&summary, "disk.img/partition0_83"), Action::Unpack);
    assert!(dest
        .path()
        .join("disk.img/partition0_83/boot/splash.png")
        .is_file());
    assert_eq!(summary.counters.bytes_processed, summary.counters.bytes_total);
}

#[test]
fn sibling_data_file_is_resolved() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let mut pack = PackWriter::new();
    pack.add("hero.png", png(11)).add_split("map.dat", vec![7u8; 90], 2);
    let (index, data) = pack.finish_with_sibling("assets.dat").unwrap();
    write(src.path(), "assets.idx", &index);
    write(src.path(), "assets.dat", &data);

    let summary = scan(src.path(), dest.path(), sequential()).unwrap();

    assert_eq!(action_of(&summary, "assets.idx"), Action::Unpack);
    assert_eq!(fs::read(dest.path().join("assets.idx/hero.png")).unwrap(), png(11));
}

#[test]
fn nested_archives_mirror_logical_paths() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let inner = zip(&[("deep/tex.png", &png(12))]);
    let mut pack = PackWriter::new();
    pack.add("inner.zip", inner);
    write(src.path(), "outer.pack", &gzip(&pack.finish().unwrap()));

    let summary = scan(src.path(), dest.path(), sequential()).unwrap();

    assert_eq!(action_of(&summary, "outer.pack"), Action::Unpack);
    assert!(dest
        .path()
        .join("outer.pack~unpacked/inner.zip/deep/tex.png")
        .is_file());
}

#[test]
fn depth_limit_leaves_deeper_entries_unprocessed() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let mut inner = PackWriter::new();
    inner.add("tex.png", png(13));
    let mut outer = PackWriter::new();
    outer.add("inner.pack", inner.finish().unwrap());
    write(src.path(), "outer.pack", &outer.finish().unwrap());

    let summary = scan(src.path(), dest.path(), sequential().max_depth(1)).unwrap();

    assert_eq!(action_of(&summary, "outer.pack/inner.pack"), Action::Unpack);
    assert_eq!(action_of(&summary, "outer.pack/inner.pack/tex.png"), Action::Unsupported);
    assert!(!dest.path().join("outer.pack/inner.pack/tex.png").exists());
}

#[test]
fn dry_run_writes_nothing() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    write(src.path(), "tex.png", &png(14));
    write(src.path(), "blob.raw", &[0x3Cu8; 64]);

    let summary = scan(
        src.path(),
        dest.path(),
        sequential().dry_run(true).raw_passthrough(true).quarantine(true),
    )
    .unwrap();

    assert_eq!(summary.counters.items, 2);
    assert_eq!(fs::read_dir(dest.path()).unwrap().count(), 0);
}

#[test]
fn raw_passthrough_copies_unhandled_leaves() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    write(src.path(), "readme.txt", b"hello");
    write(src.path(), "mystery.raw", &[0u8; 48]);

    let without = scan(src.path(), dest.path(), sequential()).unwrap();
    assert_eq!(action_of(&without, "readme.txt"), Action::Unsupported);

    let dest = TempDir::new().unwrap();
    let with = scan(src.path(), dest.path(), sequential().raw_passthrough(true)).unwrap();
    assert_eq!(action_of(&with, "readme.txt"), Action::Extract);
    assert_eq!(fs::read(dest.path().join("readme.txt")).unwrap(), b"hello");
    assert_eq!(action_of(&with, "mystery.raw"), Action::Unknown);
    assert!(dest.path().join("~Alternatives/mystery.raw").is_file());
}

#[test]
fn cut_strategy_splits_raw_dumps() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let mut dump = vec![0xEEu8; 16];
    dump.extend_from_slice(&png(15));
    write(src.path(), "memory.dmp", &dump);

    let engine = Engine::builder(dest.path())
        .options(sequential())
        .strategy(CutStrategy)
        .build()
        .unwrap();
    let summary = engine.run(src.path()).unwrap();

    assert_eq!(action_of(&summary, "memory.dmp"), Action::Split);
    assert_eq!(
        fs::read(dest.path().join("memory.dmp/00000010.png")).unwrap(),
        png(15)
    );
    assert_eq!(
        fs::read(dest.path().join("memory.dmp/00000000.bin")).unwrap(),
        vec![0xEEu8; 16]
    );
    assert_eq!(summary.counters.bytes_processed, summary.counters.bytes_total);
}

#[test]
fn oversized_zip_entry_respects_decompress_limit() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let big = vec![0u8; 1 << 20];
    write(src.path(), "a.zip", &zip(&[("big.bin", big.as_slice())]));

    let options = sequential().decompress_limit(1024).raw_passthrough(true);
    let summary = scan(src.path(), dest.path(), options).unwrap();

    assert_eq!(action_of(&summary, "a.zip"), Action::Unsupported);
    let detail = &summary.outcomes_for("a.zip").next().unwrap().detail;
    assert!(detail.contains("limit of 1024"), "{detail}");
    assert_eq!(summary.outcomes_for("a.zip/big.bin").count(), 0);
    assert!(!dest.path().join("~Alternatives/a.zip/big.bin").exists());
}

#[test]
fn single_file_and_bad_roots() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    write(src.path(), "only.png", &png(16));

    let summary = scan(src.path().join("only.png"), dest.path(), sequential()).unwrap();
    assert_eq!(action_of(&summary, "only.png"), Action::Extract);
    assert!(dest.path().join("only.png").is_file());

    let err = scan(src.path().join("missing"), dest.path(), sequential()).unwrap_err();
    assert!(!err.is_recoverable());
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn zip(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in files {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}
