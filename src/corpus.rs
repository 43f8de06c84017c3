//! A fixed test-pixel corpus.
//!
//! Grounded on `original_source/babl/babl-ref-pixels.c`'s hand-written probe
//! table, generalized to a full-size, reproducibly-generated corpus (the
//! original carries a short literal pixel array; we need a size large enough
//! for [`crate::measure`] to get a stable mean error, without pulling in a
//! `rand` dependency). A handful of literal edge-case
//! pixels are prepended so exact-boundary behavior (pure primaries, full
//! black/white, a zero-alpha pixel) is always exercised regardless of what
//! the generator produces.

use std::sync::OnceLock;

/// Number of generated (non-literal) pixels in the corpus.
pub const GENERATED_LEN: usize = 4096;

/// One canonical test pixel: straight (unassociated) RGBA in `[0, 1]`.
pub type CorpusPixel = [f64; 4];

const LITERAL_PIXELS: &[CorpusPixel] = &[
    [0.0, 0.0, 0.0, 1.0],
    [1.0, 1.0, 1.0, 1.0],
    [1.0, 0.0, 0.0, 1.0],
    [0.0, 1.0, 0.0, 1.0],
    [0.0, 0.0, 1.0, 1.0],
    [0.5, 0.5, 0.5, 1.0],
    [1.0, 1.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 0.0],
    [1.0, 0.5, 0.0, 0.25],
];

/// A small linear congruential generator (Numerical Recipes constants),
/// chosen only for bit-for-bit reproducibility across platforms — not for
/// statistical quality.
struct Lcg(u64);

impl Lcg {
    fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
        self.0
    }

    fn next_unit(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}

fn generate() -> Vec<CorpusPixel> {
    let mut rng = Lcg(0x9e37_79b9_7f4a_7c15);
    let mut pixels = Vec::with_capacity(LITERAL_PIXELS.len() + GENERATED_LEN);
    pixels.extend_from_slice(LITERAL_PIXELS);
    for _ in 0..GENERATED_LEN {
        pixels.push([
            rng.next_unit(),
            rng.next_unit(),
            rng.next_unit(),
            rng.next_unit(),
        ]);
    }
    pixels
}

static CORPUS: OnceLock<Vec<CorpusPixel>> = OnceLock::new();

/// The fixed test-pixel corpus, in canonical straight RGBA double.
///
/// Deterministic across runs and platforms (cache determinism relies on
/// this): same seed, same arithmetic, same pixels.
pub fn corpus() -> &'static [CorpusPixel] {
    CORPUS.get_or_init(generate)
}
