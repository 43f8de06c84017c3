//! Error/cost measurement shared by edge registration and path search,
//! grounded on `original_source/babl/babl-conversion.c`'s `measure_error`/
//! `measure_performance` pair.
//!
//! Measurement always goes through the fixed corpus (`corpus.rs`) and the
//! reference converter (`reference.rs`): the candidate edge runs once over
//! the corpus, its output is compared against the reference path run over
//! the same input, and wall-clock cost is timed over exactly corpus-many
//! pixels. Building this as one call to `reference::convert` per step is
//! the idiomatic-Rust equivalent of building throwaway reference fishes
//! just to measure — same data flow, no `Fish` objects needed.

use std::time::Instant;

use crate::context::Babl;
use crate::corpus;
use crate::graph::{Conversion, ConversionFn, GraphNode, PixelSlice};
use crate::reference;
use crate::registry::Handle;

#[derive(Debug, Clone, Copy)]
pub struct EdgeMeasurement {
    pub error: f64,
    pub cost: f64,
}

fn pack_rgba_double(pixels: &[[f64; 4]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(pixels.len() * 32);
    for px in pixels {
        for c in px {
            out.extend_from_slice(&c.to_le_bytes());
        }
    }
    out
}

fn unpack_rgba_double(bytes: &[u8], n: usize) -> Vec<[f64; 4]> {
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let base = i * 32;
        let mut px = [0.0f64; 4];
        for (c, slot) in px.iter_mut().enumerate() {
            let off = base + c * 8;
            *slot = f64::from_le_bytes(bytes[off..off + 8].try_into().unwrap());
        }
        out.push(px);
    }
    out
}

fn mean_abs_error(a: &[[f64; 4]], b: &[[f64; 4]]) -> f64 {
    let mut total = 0.0;
    let mut count = 0usize;
    for (pa, pb) in a.iter().zip(b) {
        for i in 0..4 {
            total += (pa[i] - pb[i]).abs();
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

/// Measure one format-to-format edge against the fixed corpus.
///
/// `conv` must carry a [`ConversionFn::Linear`] function and
/// `GraphNode::Format` endpoints; the path search (`search.rs`) only ever
/// measures edges it is about to traverse, and only format-to-format edges
/// are traversable (see `entity.rs`'s `ModelKind` doc comment and the
/// scope note in DESIGN.md).
pub fn measure_edge(babl: &Babl, conv: &Conversion) -> EdgeMeasurement {
    let (GraphNode::Format(source), GraphNode::Format(destination)) = (conv.source, conv.destination) else {
        panic!("measure_edge called on a non-format-to-format conversion");
    };
    measure_function(babl, source, destination, &conv.function)
}

fn measure_function(
    babl: &Babl,
    source: Handle<crate::entity::PixelFormat>,
    destination: Handle<crate::entity::PixelFormat>,
    function: &ConversionFn,
) -> EdgeMeasurement {
    let canonical = babl
        .format("rgba-double")
        .expect("built-in canonical rgba-double format must be registered");

    let pixels = corpus::corpus();
    let n = pixels.len();
    let canonical_bytes = pack_rgba_double(pixels);

    let src_bytes = reference::convert(babl, canonical, source, &canonical_bytes, n);

    let src_fmt = babl.formats.get(source);
    let dst_fmt = babl.formats.get(destination);
    let mut candidate_out = vec![0u8; n * dst_fmt.bytes_per_pixel];

    let start = Instant::now();
    let f = match function {
        ConversionFn::Linear(f) => *f,
        _ => panic!("measure_function only supports ConversionFn::Linear edges"),
    };
    f(&src_bytes, &mut candidate_out, n);
    let elapsed = start.elapsed().as_secs_f64();
    let _ = src_fmt; // kept for readability of the stride math above

    let truth_out = reference::convert(babl, source, destination, &src_bytes, n);

    let candidate_canonical = reference::convert(babl, destination, canonical, &candidate_out, n);
    let truth_canonical = reference::convert(babl, destination, canonical, &truth_out, n);

    let error = mean_abs_error(
        &unpack_rgba_double(&candidate_canonical, n),
        &unpack_rgba_double(&truth_canonical, n),
    );

    EdgeMeasurement { error, cost: elapsed }
}

/// Lazily measure `conv` (if it hasn't been already) and return its
/// (error, cost), caching the result on the edge itself: measured once,
/// then reused.
pub fn ensure_measured(babl: &Babl, conv: &Conversion) -> (f64, f64) {
    if !conv.is_measured() {
        let m = measure_edge(babl, conv);
        conv.set_measurement(m.error, m.cost);
    }
    (conv.error(), conv.cost())
}
