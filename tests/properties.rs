//! Black-box invariants and concrete scenarios exercised purely through the
//! public API: `Babl`, `Fish`, `Handle`, and the free `reference::convert`
//! used as the "always-correct" oracle to compare against.

use pixelfish::{reference, Babl, Quality};

fn pixel_f64(bytes: &[u8], i: usize, c: usize) -> f64 {
    let offset = i * 32 + c * 8;
    f64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap())
}

/// `process(fish(F, F), x, y, n)` is byte-for-byte identity for every
/// registered format.
#[test]
fn identity_conversion_is_byte_for_byte_for_every_format() {
    let babl = Babl::new();
    for name in [
        "rgba-u8", "rgba-float", "rgba-double", "gray-u8", "cmyk-u8", "lab-double", "rgba-u16", "rgba-half",
        "rgb-float", "ycbcr-float", "oklab-double", "rgba-premultiplied-u8",
    ] {
        let fmt = babl.format(name).unwrap_or_else(|| panic!("missing built-in format {name}"));
        let bpp = babl.format_bytes_per_pixel(fmt);
        let fish = babl.fish(fmt, fmt);
        let n = 17;
        let input: Vec<u8> = (0..n * bpp).map(|i| (i % 256) as u8).collect();
        let out = fish.process(&babl, &input, n);
        assert_eq!(out, input, "format {name} did not round-trip byte-for-byte through its own identity fish");
    }
}

/// Round-tripping `F -> RGBA double -> F` stays within F's representable
/// precision, for an 8-bit format where the rounding budget is large enough
/// to state simply (+/- 1 per u8 component).
#[test]
fn round_trip_through_canonical_double_preserves_u8_precision() {
    let babl = Babl::new();
    let u8_fmt = babl.format("rgba-u8").unwrap();
    let double_fmt = babl.format("rgba-double").unwrap();
    let input = vec![10u8, 128, 250, 64, 0, 255, 17, 200];
    let n = input.len() / 4;
    let canonical = reference::convert(&babl, u8_fmt, double_fmt, &input, n);
    let back = reference::convert(&babl, double_fmt, u8_fmt, &canonical, n);
    for (a, b) in input.iter().zip(&back) {
        assert!((i32::from(*a) - i32::from(*b)).abs() <= 1, "expected {a} ~= {b}");
    }
}

/// RGBA -> associated-alpha -> RGBA returns within a few u8 steps of the
/// input, away from the near-zero-alpha clamp region.
#[test]
fn premultiplication_round_trip_preserves_color_away_from_tiny_alpha() {
    let babl = Babl::new();
    let straight = babl.format("rgba-u8").unwrap();
    let premultiplied = babl.format("rgba-premultiplied-u8").unwrap();
    let input = vec![200u8, 40, 10, 180];
    let associated = reference::convert(&babl, straight, premultiplied, &input, 1);
    let back = reference::convert(&babl, premultiplied, straight, &associated, 1);
    for (a, b) in input.iter().zip(&back) {
        assert!((i32::from(*a) - i32::from(*b)).abs() <= 3, "expected {a} ~= {b} (u8 step ~= 1/255)");
    }
}

/// A fish built at an explicit tolerance produces output within that
/// tolerance of the always-correct reference converter.
#[test]
fn fast_fish_output_matches_reference_within_tolerance() {
    let babl = Babl::new();
    let src = babl.format("rgba-u8").unwrap();
    let dst = babl.format("rgba-double").unwrap();
    let tolerance = 1e-3;
    let fish = babl.fast_fish(src, dst, Quality::Tolerance(tolerance));
    let input = vec![12u8, 200, 77, 255, 0, 0, 0, 0, 255, 255, 255, 128];
    let n = input.len() / 4;
    let via_fish = fish.process(&babl, &input, n);
    let via_reference = reference::convert(&babl, src, dst, &input, n);
    for i in 0..n {
        for c in 0..4 {
            let a = pixel_f64(&via_fish, i, c);
            let b = pixel_f64(&via_reference, i, c);
            assert!((a - b).abs() <= tolerance * 10.0, "pixel {i} component {c}: {a} vs {b}");
        }
    }
}

/// Full-white nonlinear u8 decodes to full-white linear float.
#[test]
fn full_white_u8_decodes_to_full_white_float() {
    let babl = Babl::new();
    let src = babl.format("rgba-u8").unwrap();
    let dst = babl.format("rgba-float").unwrap();
    let fish = babl.fish(src, dst);
    let out = fish.process(&babl, &[0xff, 0xff, 0xff, 0xff], 1);
    for c in 0..4 {
        let v = f32::from_le_bytes(out[c * 4..c * 4 + 4].try_into().unwrap());
        assert!((v - 1.0).abs() < 1e-6, "component {c} = {v}");
    }
}

/// A known linear RGB triple maps to its BT.601-style Y'CbCr encoding
/// (values derived from this crate's own sRGB transfer function and
/// coefficients, not copied from elsewhere).
#[test]
fn rgb_float_maps_to_bt601_ycbcr() {
    let babl = Babl::new();
    let src = babl.format("rgb-float").unwrap();
    let dst = babl.format("ycbcr-float").unwrap();
    let mut input = Vec::new();
    for v in [0.0f32, 0.5, 1.0] {
        input.extend_from_slice(&v.to_le_bytes());
    }
    let out = reference::convert(&babl, src, dst, &input, 1);
    let expected = [0.545_654_549, 0.256_402_625, -0.389_197_253];
    for c in 0..3 {
        let v = f64::from_le_bytes(out[c * 8..c * 8 + 8].try_into().unwrap());
        assert!((v - expected[c]).abs() < 1e-6, "component {c}: got {v}, expected {}", expected[c]);
    }
}

/// Fully transparent input still carries its RGB through unchanged.
#[test]
fn zero_alpha_still_preserves_rgb() {
    let babl = Babl::new();
    let src = babl.format("rgba-u16").unwrap();
    let dst = babl.format("rgba-float").unwrap();
    let mut input = Vec::new();
    for v in [0xffffu16, 0xffff, 0xffff, 0x0000] {
        input.extend_from_slice(&v.to_le_bytes());
    }
    let out = reference::convert(&babl, src, dst, &input, 1);
    let expected = [1.0f32, 1.0, 1.0, 0.0];
    for c in 0..4 {
        let v = f32::from_le_bytes(out[c * 4..c * 4 + 4].try_into().unwrap());
        assert!((v - expected[c]).abs() < 1e-3, "component {c} = {v}, expected {}", expected[c]);
    }
}

/// `rgba-half` round-trips through canonical double within half-precision's
/// own representable error (about 1 part in 1024 per component).
#[test]
fn rgba_half_round_trip_preserves_precision() {
    let babl = Babl::new();
    let half_fmt = babl.format("rgba-half").unwrap();
    let double_fmt = babl.format("rgba-double").unwrap();
    let input = [0.0f64, 0.25, 0.5, 1.0];
    let mut packed = Vec::new();
    for v in input {
        packed.extend_from_slice(&v.to_le_bytes());
    }
    let half_bytes = reference::convert(&babl, double_fmt, half_fmt, &packed, 1);
    let back = reference::convert(&babl, half_fmt, double_fmt, &half_bytes, 1);
    for c in 0..4 {
        let v = f64::from_le_bytes(back[c * 8..c * 8 + 8].try_into().unwrap());
        assert!((v - input[c]).abs() < 1e-3, "component {c} = {v}, expected {}", input[c]);
    }
}

/// Oklab <-> RGBA float round-trips with low mean absolute error over a
/// batch of pseudo-random pixels in [0, 1]^4.
#[test]
fn oklab_round_trip_has_low_mean_error() {
    let babl = Babl::new();
    let rgba_double = babl.format("rgba-double").unwrap();
    let oklab = babl.format("oklab-double").unwrap();

    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    let mut next = || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state >> 11) as f64 / ((1u64 << 53) as f64)
    };

    let n = 1024;
    let mut input = Vec::with_capacity(n * 32);
    let mut originals = Vec::with_capacity(n * 4);
    for _ in 0..n {
        let pixel = [next(), next(), next(), next()];
        for v in pixel {
            input.extend_from_slice(&v.to_le_bytes());
        }
        originals.push(pixel);
    }

    let to_oklab = reference::convert(&babl, rgba_double, oklab, &input, n);
    let back = reference::convert(&babl, oklab, rgba_double, &to_oklab, n);

    let mut total = 0.0;
    let mut count = 0usize;
    for (i, pixel) in originals.iter().enumerate() {
        for c in 0..3 {
            let got = pixel_f64(&back, i, c);
            total += (got - pixel[c]).abs();
            count += 1;
        }
    }
    let mean = total / count as f64;
    assert!(mean <= 1e-4, "mean absolute error {mean} exceeds 1e-4");
}

/// `fish(F, F)` is always a memcpy variant and copies a larger random
/// buffer byte-for-byte.
#[test]
fn self_conversion_is_always_memcpy() {
    let babl = Babl::new();
    let fmt = babl.format("rgba-u8").unwrap();
    let fish = babl.fish(fmt, fmt);
    assert_eq!(fish.len(), 0, "self-conversion should be a zero-step (memcpy) fish");

    let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
    let n = 1024;
    let input: Vec<u8> = (0..n * 4)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 56) as u8
        })
        .collect();
    let out = fish.process(&babl, &input, n);
    assert_eq!(out, input);
}

/// Re-requesting a batch of previously-seen format pairs does not invoke
/// path search again (observable via `Babl::search_invocations`).
#[test]
fn repeat_fish_requests_do_not_re_invoke_search() {
    let babl = Babl::new();
    let names = [
        "rgba-u8", "rgba-float", "rgba-double", "gray-u8", "cmyk-u8", "lab-double", "rgba-u16", "rgb-float",
        "ycbcr-float", "oklab-double",
    ];
    let mut pairs = Vec::new();
    'outer: for &a in &names {
        for &b in &names {
            if a != b {
                pairs.push((a, b));
                if pairs.len() >= 20 {
                    break 'outer;
                }
            }
        }
    }

    for &(a, b) in &pairs {
        let src = babl.format(a).unwrap();
        let dst = babl.format(b).unwrap();
        babl.fish(src, dst);
    }
    let after_first_pass = babl.search_invocations();
    assert!(after_first_pass > 0, "expected at least one real search on first use");

    for &(a, b) in &pairs {
        let src = babl.format(a).unwrap();
        let dst = babl.format(b).unwrap();
        babl.fish(src, dst);
    }
    assert_eq!(
        babl.search_invocations(),
        after_first_pass,
        "repeat fish() calls for already-seen pairs must hit the cache, not re-run search"
    );
}
