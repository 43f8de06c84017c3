//! The persistent fish cache, grounded on
//! `original_source/babl/babl-cache.c`.
//!
//! In-memory lookup is keyed by (source, destination) name pair; a hit
//! additionally requires the cached fish to have been found at a tolerance
//! no looser than what's being requested now (a fish satisfying a tighter
//! bound always satisfies a looser one, never the reverse). On-disk
//! persistence is a plain text format: one header line carrying the library
//! version and the active tolerance, then one multi-line record per cached
//! fish, sorted descending by pixels processed so the hottest entries are
//! easy to spot by eye.

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use log::warn;

use crate::context::Babl;
use crate::entity::PixelFormat;
use crate::fish::Fish;
use crate::graph::GraphNode;
use crate::registry::Handle;
use crate::search::compound_error;

const CACHE_VERSION: u32 = 1;
const CACHE_FILE_NAME: &str = "fish-cache.txt";
const RECORD_SEPARATOR: &str = "----";
const REFERENCE_TAG: &str = "[[reference]]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FishKind {
    Memcpy,
    Path,
    Reference,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    source: String,
    destination: String,
    tolerance: f64,
    kind: FishKind,
    steps: Vec<String>,
    cost: Option<f64>,
    error: f64,
    pixels_processed: u64,
}

fn header_line(tolerance: f64) -> String {
    format!("babl-fish-cache v{CACHE_VERSION} tolerance={tolerance}")
}

/// In-memory fish cache; one instance lives behind a `Mutex` on [`Babl`].
pub struct FishCache {
    entries: Vec<CacheEntry>,
}

impl FishCache {
    fn empty() -> Self {
        FishCache { entries: Vec::new() }
    }

    /// Load from `dir/fish-cache.txt`, gating on version *and* `tolerance`
    /// (a tolerance override changes the header and therefore invalidates
    /// the whole on-disk cache, same as a version bump), and applying the
    /// 1%-eviction-on-load policy below. Any I/O or parse failure falls back
    /// to an empty cache rather than propagating an error — a missing or
    /// stale cache is never fatal.
    pub fn load(dir: Option<&Path>, tolerance: f64) -> Self {
        let Some(dir) = dir else { return Self::empty() };
        let path = dir.join(CACHE_FILE_NAME);
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(_) => return Self::empty(),
        };
        let mut lines = text.lines();
        let Some(header) = lines.next() else { return Self::empty() };
        if header.trim() != header_line(tolerance) {
            warn!("fish cache at {path:?} has an unrecognized header, discarding");
            return Self::empty();
        }

        let mut entries = Vec::new();
        while let Some(mut entry) = parse_record(&mut lines) {
            entry.tolerance = tolerance;
            entries.push(entry);
        }

        // Deliberately *not* a well-distributed RNG. Each loaded entry
        // survives unless the current wall-clock second divides its
        // recorded pixel count, which correlates entries with similar
        // traffic history in a way nobody has characterized further.
        // See DESIGN.md for why this was kept as-is rather than replaced.
        let now_secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        entries.retain(|e| !(e.pixels_processed > 0 && now_secs % e.pixels_processed == 0));

        FishCache { entries }
    }

    pub fn lookup(&self, babl: &Babl, src: Handle<PixelFormat>, dst: Handle<PixelFormat>, tolerance: f64) -> Option<Fish> {
        let src_name = babl.formats.get(src).name.clone();
        let dst_name = babl.formats.get(dst).name.clone();
        let entry = self
            .entries
            .iter()
            .find(|e| e.source == src_name && e.destination == dst_name && tolerance >= e.tolerance)?;
        rebuild_fish(babl, src, dst, entry)
    }

    pub fn insert(&mut self, babl: &Babl, src: Handle<PixelFormat>, dst: Handle<PixelFormat>, tolerance: f64, fish: Fish) {
        let source = babl.formats.get(src).name.clone();
        let destination = babl.formats.get(dst).name.clone();
        let kind = match &fish {
            Fish::Memcpy { .. } => FishKind::Memcpy,
            Fish::Simple { .. } | Fish::Path { .. } => FishKind::Path,
            Fish::Reference { .. } => FishKind::Reference,
        };
        let steps = match &fish {
            Fish::Simple { conversion, .. } => vec![babl.graph.get(*conversion).name.clone()],
            Fish::Path { steps, .. } => steps.iter().map(|&h| babl.graph.get(h).name.clone()).collect(),
            _ => Vec::new(),
        };
        let (cost, error) = match &fish {
            Fish::Memcpy { .. } | Fish::Reference { .. } => (None, 0.0),
            Fish::Simple { conversion, .. } => {
                let conv = babl.graph.get(*conversion);
                (Some(conv.cost()), conv.error())
            }
            Fish::Path { steps, .. } => {
                let mut total_cost = 0.0;
                let mut total_error = 0.0;
                for &h in steps {
                    let conv = babl.graph.get(h);
                    total_cost += conv.cost();
                    total_error = compound_error(total_error, conv.error());
                }
                (Some(total_cost), total_error)
            }
        };

        self.entries.retain(|e| !(e.source == source && e.destination == destination));
        self.entries.push(CacheEntry {
            source,
            destination,
            tolerance,
            kind,
            steps,
            cost,
            error,
            pixels_processed: fish.pixels_processed(),
        });
    }

    /// Write to a temp file in the same directory, then rename over the
    /// real cache file, so a crash mid-write never corrupts an existing
    /// cache.
    pub fn store(&self, dir: Option<&Path>, tolerance: f64) -> io::Result<()> {
        let Some(dir) = dir else { return Ok(()) };
        fs::create_dir_all(dir)?;
        let final_path = dir.join(CACHE_FILE_NAME);
        let tmp_path = dir.join(format!("{CACHE_FILE_NAME}.tmp"));

        let mut sorted = self.entries.clone();
        sorted.sort_by(|a, b| b.pixels_processed.cmp(&a.pixels_processed));

        let mut text = format!("{}\n", header_line(tolerance));
        for e in &sorted {
            text.push_str(&format_entry(e));
            text.push('\n');
        }

        let mut f = fs::File::create(&tmp_path)?;
        f.write_all(text.as_bytes())?;
        f.sync_all()?;
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }
}

fn format_entry(e: &CacheEntry) -> String {
    let mut s = String::new();
    s.push_str(&e.source);
    s.push('\n');
    s.push_str(&e.destination);
    s.push('\n');
    s.push('\t');
    s.push_str(&format!("pixels={}", e.pixels_processed));
    if let Some(cost) = e.cost {
        s.push_str(&format!(" cost={cost}"));
    }
    s.push_str(&format!(" error={}", e.error));
    if e.kind == FishKind::Reference {
        s.push(' ');
        s.push_str(REFERENCE_TAG);
    }
    for step in &e.steps {
        s.push('\n');
        s.push('\t');
        s.push_str(step);
    }
    s.push('\n');
    s.push_str(RECORD_SEPARATOR);
    s
}

/// Parse one multi-line record (`source` / `destination` / meta / steps /
/// `----`) off the front of `lines`, advancing it past the separator.
/// Returns `None` once `lines` is exhausted or a record is truncated.
fn parse_record<'a>(lines: &mut impl Iterator<Item = &'a str>) -> Option<CacheEntry> {
    let source = lines.next()?.to_owned();
    let destination = lines.next()?.to_owned();
    let meta = lines.next()?.strip_prefix('\t')?;

    let mut pixels_processed = None;
    let mut cost = None;
    let mut error = None;
    let mut is_reference = false;
    for token in meta.split_whitespace() {
        if let Some(v) = token.strip_prefix("pixels=") {
            pixels_processed = v.parse().ok();
        } else if let Some(v) = token.strip_prefix("cost=") {
            cost = v.parse().ok();
        } else if let Some(v) = token.strip_prefix("error=") {
            error = v.parse().ok();
        } else if token == REFERENCE_TAG {
            is_reference = true;
        }
    }

    let mut steps = Vec::new();
    loop {
        let line = lines.next()?;
        if line == RECORD_SEPARATOR {
            break;
        }
        steps.push(line.strip_prefix('\t')?.to_owned());
    }

    let kind = if source == destination {
        FishKind::Memcpy
    } else if is_reference {
        FishKind::Reference
    } else {
        FishKind::Path
    };

    Some(CacheEntry {
        source,
        destination,
        tolerance: 0.0,
        kind,
        steps,
        cost,
        error: error.unwrap_or(0.0),
        pixels_processed: pixels_processed.unwrap_or(0),
    })
}

fn rebuild_fish(babl: &Babl, src: Handle<PixelFormat>, dst: Handle<PixelFormat>, entry: &CacheEntry) -> Option<Fish> {
    match entry.kind {
        FishKind::Memcpy => Some(Fish::memcpy(src, babl.formats.get(src).bytes_per_pixel)),
        FishKind::Reference => Some(Fish::reference(src, dst)),
        FishKind::Path => {
            let mut steps = Vec::with_capacity(entry.steps.len());
            for name in &entry.steps {
                steps.push(babl.graph.by_name(name)?);
            }
            // Validate that the stored chain still actually connects src to
            // dst in the live graph before trusting it.
            let mut cursor = GraphNode::Format(src);
            for &step in &steps {
                let conv = babl.graph.get(step);
                if conv.source != cursor {
                    return None;
                }
                cursor = conv.destination;
            }
            if cursor != GraphNode::Format(dst) {
                return None;
            }
            Some(Fish::path(babl, src, dst, steps))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin;

    #[test]
    fn insert_then_lookup_round_trips() {
        let babl = Babl::new();
        let f = builtin::formats(&babl);
        let mut cache = FishCache::empty();
        let fish = babl.fish(f.rgba_u8, f.rgba_double);
        cache.insert(&babl, f.rgba_u8, f.rgba_double, 1e-3, fish);
        let hit = cache.lookup(&babl, f.rgba_u8, f.rgba_double, 1e-2);
        assert!(hit.is_some());
    }

    #[test]
    fn lookup_rejects_a_stricter_tolerance_than_was_cached() {
        let babl = Babl::new();
        let f = builtin::formats(&babl);
        let mut cache = FishCache::empty();
        let fish = babl.fish(f.rgba_u8, f.rgba_double);
        cache.insert(&babl, f.rgba_u8, f.rgba_double, 1e-3, fish);
        let hit = cache.lookup(&babl, f.rgba_u8, f.rgba_double, 1e-9);
        assert!(hit.is_none());
    }

    #[test]
    fn format_roundtrips_through_parse() {
        let entry = CacheEntry {
            source: "rgba-u8".into(),
            destination: "rgba-double".into(),
            tolerance: 1e-3,
            kind: FishKind::Path,
            steps: vec!["a".into(), "b".into()],
            cost: Some(0.25),
            error: 1e-6,
            pixels_processed: 42,
        };
        let text = format_entry(&entry);
        let mut lines = text.lines();
        let parsed = parse_record(&mut lines).unwrap();
        assert_eq!(parsed.source, entry.source);
        assert_eq!(parsed.steps, entry.steps);
        assert_eq!(parsed.cost, entry.cost);
        assert_eq!(parsed.error, entry.error);
        assert_eq!(parsed.pixels_processed, entry.pixels_processed);
    }

    #[test]
    fn reference_entry_round_trips_with_tag_and_no_steps() {
        let entry = CacheEntry {
            source: "rgba-u8".into(),
            destination: "cmyk-u8".into(),
            tolerance: 1e-3,
            kind: FishKind::Reference,
            steps: Vec::new(),
            cost: None,
            error: 0.0,
            pixels_processed: 7,
        };
        let text = format_entry(&entry);
        let mut lines = text.lines();
        let parsed = parse_record(&mut lines).unwrap();
        assert_eq!(parsed.kind, FishKind::Reference);
        assert!(parsed.steps.is_empty());
    }

    #[test]
    fn header_changes_with_tolerance() {
        assert_ne!(header_line(1e-3), header_line(1e-9));
    }
}
