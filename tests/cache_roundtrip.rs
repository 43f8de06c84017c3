//! Focused tests for the persisted fish cache: determinism across runs,
//! version/tolerance gating on the header line, and that a round-tripped
//! entry still resolves to a usable fish.

use std::fs;

use pixelfish::cache::FishCache;
use pixelfish::Babl;

fn temp_dir(label: &str) -> std::path::PathBuf {
    let mut dir = std::env::temp_dir();
    dir.push(format!("pixelfish-cache-roundtrip-{label}-{:?}", std::thread::current().id()));
    let _ = fs::remove_dir_all(&dir);
    dir
}

/// Blank out the `pixels=<N>` token on each metadata line (the only field
/// allowed to differ between two runs that touch the same format pairs).
fn strip_pixel_counts(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| {
            line.split_whitespace()
                .map(|tok| if tok.starts_with("pixels=") { "pixels=*" } else { tok })
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

/// Two independent cache-populate-then-store runs over the same format
/// pairs produce byte-identical files modulo the pixels counter.
#[test]
fn cache_determinism_across_two_runs() {
    let dir_a = temp_dir("a");
    let dir_b = temp_dir("b");

    let babl = Babl::new();
    let mut cache_a = FishCache::load(Some(&dir_a), 1e-3);
    let mut cache_b = FishCache::load(Some(&dir_b), 1e-3);
    let pairs = [("rgba-u8", "rgba-float"), ("rgba-float", "rgba-double"), ("rgba-u8", "rgba-double")];
    for &(src_name, dst_name) in &pairs {
        let src = babl.format(src_name).unwrap();
        let dst = babl.format(dst_name).unwrap();
        let fish = babl.fish(src, dst);
        cache_a.insert(&babl, src, dst, 1e-3, fish.clone());
        cache_b.insert(&babl, src, dst, 1e-3, fish);
    }
    cache_a.store(Some(&dir_a), 1e-3).unwrap();
    cache_b.store(Some(&dir_b), 1e-3).unwrap();

    let text_a = fs::read_to_string(dir_a.join("fish-cache.txt")).unwrap();
    let text_b = fs::read_to_string(dir_b.join("fish-cache.txt")).unwrap();
    assert_eq!(strip_pixel_counts(&text_a), strip_pixel_counts(&text_b));

    fs::remove_dir_all(&dir_a).ok();
    fs::remove_dir_all(&dir_b).ok();
}

/// A header line that doesn't match the library's current version causes
/// the whole cache to be ignored.
#[test]
fn mismatched_header_discards_the_whole_cache() {
    let dir = temp_dir("version-gate");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("fish-cache.txt"),
        "babl-fish-cache v999 tolerance=0.001\nrgba-u8\nrgba-float\n\tpixels=12345 cost=0.1 error=0.0\n\trgba-u8-to-rgba-float\n----\n",
    )
    .unwrap();

    let babl = Babl::new();
    let cache = FishCache::load(Some(&dir), 0.001);
    let src = babl.format("rgba-u8").unwrap();
    let dst = babl.format("rgba-float").unwrap();
    assert!(cache.lookup(&babl, src, dst, 1.0).is_none(), "a version-mismatched cache file must be ignored entirely");

    fs::remove_dir_all(&dir).ok();
}

/// A tolerance override that doesn't match what the cache was written under
/// also discards the whole cache, same as a version bump.
#[test]
fn mismatched_tolerance_discards_the_whole_cache() {
    let dir = temp_dir("tolerance-gate");
    let babl = Babl::new();
    let src = babl.format("rgba-u8").unwrap();
    let dst = babl.format("rgba-double").unwrap();
    let fish = babl.fish(src, dst);

    let mut cache = FishCache::load(None, 1e-3);
    cache.insert(&babl, src, dst, 1e-3, fish);
    cache.store(Some(&dir), 1e-3).unwrap();

    let reloaded = FishCache::load(Some(&dir), 1e-9);
    assert!(reloaded.lookup(&babl, src, dst, 1.0).is_none(), "a tolerance-mismatched cache file must be ignored entirely");

    fs::remove_dir_all(&dir).ok();
}

/// A stored entry reloaded from disk resolves back to a fish whose
/// source/destination match what was asked for, and whose tolerance gate
/// behaves as documented (looser requests hit, stricter ones miss).
#[test]
fn stored_entry_round_trips_through_reload() {
    let dir = temp_dir("reload");
    let babl = Babl::new();
    let src = babl.format("rgba-u8").unwrap();
    let dst = babl.format("rgba-double").unwrap();
    let fish = babl.fish(src, dst);

    let mut cache = FishCache::load(None, 1e-4);
    cache.insert(&babl, src, dst, 1e-4, fish);
    cache.store(Some(&dir), 1e-4).unwrap();

    let reloaded = FishCache::load(Some(&dir), 1e-4);
    let hit = reloaded.lookup(&babl, src, dst, 1e-2);
    assert!(hit.is_some(), "a looser request than the stored tolerance must hit");
    let hit = hit.unwrap();
    assert_eq!(hit.source(), src);
    assert_eq!(hit.destination(), dst);

    let miss = reloaded.lookup(&babl, src, dst, 1e-9);
    assert!(miss.is_none(), "a stricter request than the stored tolerance must miss");

    fs::remove_dir_all(&dir).ok();
}
