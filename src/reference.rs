//! The reference converter.
//!
//! Always correct, never the fastest path: every conversion routes through
//! linear-light RGBA double (or, for Lab/LCh/Oklab/Oklch, through their own
//! colorimetric definitions) regardless of how many steps a found path would
//! take. Grounded on `original_source/babl/babl-fish-reference.c`, which
//! takes the same "expand to a wide canonical representation, transform,
//! narrow back down" shape.
//!
//! Model-specific decode/encode is dispatched on [`ModelKind`] rather than
//! on generic semantic-role flags; see the doc comment on `ModelKind` in
//! `entity.rs` for why.

use crate::context::Babl;
use crate::entity::{ComponentRole, ModelKind, NumKind, NumericType, PixelFormat};
use crate::registry::Handle;

/// Linear, straight RGBA in the format's own color space.
pub type Rgba = [f64; 4];

fn component_bytes(ty: &NumericType) -> usize {
    ty.bytes()
}

/// IEEE 754 binary16 -> f64, scalar stand-in for the hardware `F16C` path
/// `extensions/sse-half.c` takes when the CPU has it.
fn half_to_f64(bits: u16) -> f64 {
    let sign = u32::from(bits >> 15) << 31;
    let exp = u32::from((bits >> 10) & 0x1f);
    let frac = u32::from(bits & 0x3ff);
    let bits32 = if exp == 0 {
        if frac == 0 {
            sign
        } else {
            // Subnormal half: renormalize into a normal f32.
            let mut e = 0i32;
            let mut f = frac;
            while f & 0x400 == 0 {
                f <<= 1;
                e -= 1;
            }
            e += 1;
            let f = f & 0x3ff;
            let exp32 = (e + 127 - 15) as u32;
            sign | (exp32 << 23) | (f << 13)
        }
    } else if exp == 0x1f {
        sign | 0x7f800000 | (frac << 13)
    } else {
        sign | ((exp + (127 - 15)) << 23) | (frac << 13)
    };
    f64::from(f32::from_bits(bits32))
}

/// f64 -> IEEE 754 binary16, inverse of [`half_to_f64`]. Values outside the
/// half range saturate to +/-infinity, matching hardware `F16C` rounding
/// behavior at the extremes.
fn f64_to_half(value: f64) -> u16 {
    let bits32 = (value as f32).to_bits();
    let sign = (bits32 >> 16) & 0x8000;
    let exp32 = ((bits32 >> 23) & 0xff) as i32;
    let frac32 = bits32 & 0x007f_ffff;

    if exp32 == 0xff {
        return (sign | 0x7c00 | if frac32 != 0 { 0x200 } else { 0 }) as u16;
    }

    let exp = exp32 - (127 - 15);
    if exp >= 0x1f {
        return (sign | 0x7c00) as u16;
    }
    if exp <= 0 {
        if exp < -10 {
            return sign as u16;
        }
        let frac = (frac32 | 0x0080_0000) >> (14 - exp);
        return (sign | frac) as u16;
    }
    (sign | ((exp as u32) << 10) | (frac32 >> 13)) as u16
}

fn decode_component(bytes: &[u8], ty: &NumericType) -> f64 {
    match (ty.kind, ty.bits) {
        (NumKind::Integer, 8) => f64::from(bytes[0]) / 255.0,
        (NumKind::Integer, 16) => {
            let raw = u16::from_le_bytes([bytes[0], bytes[1]]);
            f64::from(raw) / 65535.0
        }
        (NumKind::Float, 16) => half_to_f64(u16::from_le_bytes([bytes[0], bytes[1]])),
        (NumKind::Float, 32) => f64::from(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        (NumKind::Float, 64) => f64::from_le_bytes(bytes[0..8].try_into().unwrap()),
        _ => panic!("unsupported numeric type: {} bits, {:?}", ty.bits, ty.kind),
    }
}

fn encode_component(value: f64, ty: &NumericType) -> [u8; 8] {
    let mut out = [0u8; 8];
    match (ty.kind, ty.bits) {
        (NumKind::Integer, 8) => {
            out[0] = (value.clamp(0.0, 1.0) * 255.0).round() as u8;
        }
        (NumKind::Integer, 16) => {
            let raw = (value.clamp(0.0, 1.0) * 65535.0).round() as u16;
            out[0..2].copy_from_slice(&raw.to_le_bytes());
        }
        (NumKind::Float, 16) => out[0..2].copy_from_slice(&f64_to_half(value).to_le_bytes()),
        (NumKind::Float, 32) => out[0..4].copy_from_slice(&(value as f32).to_le_bytes()),
        (NumKind::Float, 64) => out[0..8].copy_from_slice(&value.to_le_bytes()),
        _ => panic!("unsupported numeric type: {} bits, {:?}", ty.bits, ty.kind),
    }
    out
}

/// Decode one pixel's worth of raw, un-transformed component values, in the
/// order the format lists them.
fn decode_components(babl: &Babl, fmt: &PixelFormat, pixel: &[u8]) -> Vec<f64> {
    let mut offset = 0;
    let mut values = Vec::with_capacity(fmt.components.len());
    for fc in &fmt.components {
        let ty = babl.types.get(fc.ty);
        let n = component_bytes(ty);
        values.push(decode_component(&pixel[offset..offset + n], ty));
        offset += n;
    }
    values
}

fn encode_components(babl: &Babl, fmt: &PixelFormat, values: &[f64], out: &mut [u8]) {
    let mut offset = 0;
    for (fc, &value) in fmt.components.iter().zip(values) {
        let ty = babl.types.get(fc.ty);
        let n = component_bytes(ty);
        let encoded = encode_component(value, ty);
        out[offset..offset + n].copy_from_slice(&encoded[..n]);
        offset += n;
    }
}

fn alpha_index(babl: &Babl, fmt: &PixelFormat) -> Option<usize> {
    fmt.components.iter().position(|fc| {
        babl.components.get(fc.component).role.contains(ComponentRole::ALPHA)
    })
}

fn white_xyz(white: (f64, f64)) -> [f64; 3] {
    let (x, y) = white;
    [x / y, 1.0, (1.0 - x - y) / y]
}

const LAB_EPS: f64 = 6.0 / 29.0;

fn lab_finv(t: f64) -> f64 {
    if t > LAB_EPS {
        t * t * t
    } else {
        3.0 * LAB_EPS * LAB_EPS * (t - 4.0 / 29.0)
    }
}

fn lab_f(t: f64) -> f64 {
    if t > LAB_EPS.powi(3) {
        t.cbrt()
    } else {
        t / (3.0 * LAB_EPS * LAB_EPS) + 4.0 / 29.0
    }
}

fn lab_to_linear(babl: &Babl, space: Handle<crate::entity::ColorSpace>, l: f64, a: f64, b: f64) -> [f64; 3] {
    let space = babl.spaces.get(space);
    let fy = (l + 16.0) / 116.0;
    let fx = fy + a / 500.0;
    let fz = fy - b / 200.0;
    let white = white_xyz(space.white);
    let xyz = [lab_finv(fx) * white[0], lab_finv(fy) * white[1], lab_finv(fz) * white[2]];
    space.from_xyz.apply_f64(xyz)
}

fn linear_to_lab(babl: &Babl, space: Handle<crate::entity::ColorSpace>, rgb: [f64; 3]) -> [f64; 3] {
    let space = babl.spaces.get(space);
    let xyz = space.to_xyz.apply_f64(rgb);
    let white = white_xyz(space.white);
    let (fx, fy, fz) = (
        lab_f(xyz[0] / white[0]),
        lab_f(xyz[1] / white[1]),
        lab_f(xyz[2] / white[2]),
    );
    let l = 116.0 * fy - 16.0;
    let a = 500.0 * (fx - fy);
    let b = 200.0 * (fy - fz);
    [l, a, b]
}

fn oklab_to_linear_srgb(l: f64, a: f64, b: f64) -> [f64; 3] {
    let l_ = l + 0.396_337_7774 * a + 0.215_803_7573 * b;
    let m_ = l - 0.105_561_3458 * a - 0.063_854_1728 * b;
    let s_ = l - 0.089_484_1775 * a - 1.291_485_5480 * b;
    let (l3, m3, s3) = (l_.powi(3), m_.powi(3), s_.powi(3));
    [
        4.076_741_6621 * l3 - 3.307_711_5913 * m3 + 0.230_969_9292 * s3,
        -1.268_438_0046 * l3 + 2.609_757_4011 * m3 - 0.341_319_3965 * s3,
        -0.004_196_0863 * l3 - 0.703_418_6147 * m3 + 1.707_614_7010 * s3,
    ]
}

fn linear_srgb_to_oklab(rgb: [f64; 3]) -> [f64; 3] {
    let l = 0.412_221_470_8 * rgb[0] + 0.536_332_536_3 * rgb[1] + 0.051_445_992_9 * rgb[2];
    let m = 0.211_903_498_2 * rgb[0] + 0.680_699_545_1 * rgb[1] + 0.107_396_956_6 * rgb[2];
    let s = 0.088_302_461_9 * rgb[0] + 0.281_718_837_6 * rgb[1] + 0.629_978_700_5 * rgb[2];
    let (l_, m_, s_) = (l.cbrt(), m.cbrt(), s.cbrt());
    [
        0.210_454_255_3 * l_ + 0.793_617_785_0 * m_ - 0.004_072_046_8 * s_,
        1.977_998_495_1 * l_ - 2.428_592_205_0 * m_ + 0.450_593_709_9 * s_,
        0.025_904_037_1 * l_ + 0.782_771_766_2 * m_ - 0.808_675_766_0 * s_,
    ]
}

/// Naive ink-coverage inversion.
fn cmyk_to_rgb(c: f64, m: f64, y: f64, k: f64) -> [f64; 3] {
    [(1.0 - c) * (1.0 - k), (1.0 - m) * (1.0 - k), (1.0 - y) * (1.0 - k)]
}

fn rgb_to_cmyk(rgb: [f64; 3], pullout: f64) -> [f64; 4] {
    let max = rgb[0].max(rgb[1]).max(rgb[2]);
    let k = pullout * (1.0 - max);
    let denom = 1.0 - k;
    if denom > 1e-9 {
        [
            ((1.0 - rgb[0] - k) / denom).clamp(0.0, 1.0),
            ((1.0 - rgb[1] - k) / denom).clamp(0.0, 1.0),
            ((1.0 - rgb[2] - k) / denom).clamp(0.0, 1.0),
            k.clamp(0.0, 1.0),
        ]
    } else {
        [0.0, 0.0, 0.0, k.clamp(0.0, 1.0)]
    }
}

/// Expand one pixel's raw component values to linear, straight RGBA.
fn to_rgba(babl: &Babl, fmt: &PixelFormat, values: &[f64]) -> Rgba {
    let model = babl.models.get(fmt.model);
    let alpha_idx = alpha_index(babl, fmt);
    let alpha = alpha_idx.map(|i| values[i]).unwrap_or(1.0);
    let color: Vec<f64> = values
        .iter()
        .enumerate()
        .filter(|&(i, _)| Some(i) != alpha_idx)
        .map(|(_, &v)| v)
        .collect();
    let unpremultiply = |v: f64| -> f64 {
        if model.flags.contains(crate::entity::ModelFlags::ASSOCIATED) && alpha > 1e-8 {
            (v / alpha).clamp(0.0, 1.0)
        } else {
            v
        }
    };

    match model.kind {
        ModelKind::Rgb => {
            let raw = [unpremultiply(color[0]), unpremultiply(color[1]), unpremultiply(color[2])];
            let space = babl.spaces.get(fmt.space);
            let linear = if model.flags.contains(crate::entity::ModelFlags::NONLINEAR) {
                [space.trc[0].eval(raw[0]), space.trc[1].eval(raw[1]), space.trc[2].eval(raw[2])]
            } else {
                raw
            };
            [linear[0], linear[1], linear[2], alpha]
        }
        ModelKind::Gray => {
            let raw = unpremultiply(color[0]);
            let space = babl.spaces.get(fmt.space);
            let l = if model.flags.contains(crate::entity::ModelFlags::NONLINEAR) {
                space.trc[0].eval(raw)
            } else {
                raw
            };
            [l, l, l, alpha]
        }
        ModelKind::YCbCr => {
            let (y, cb, cr) = (color[0], color[1], color[2]);
            let (rp, gp, bp) = (y + 1.402 * cr, y - 0.344_136 * cb - 0.714_136 * cr, y + 1.772 * cb);
            let space = babl.spaces.get(fmt.space);
            [space.trc[0].eval(rp), space.trc[1].eval(gp), space.trc[2].eval(bp), alpha]
        }
        ModelKind::Cmyk | ModelKind::CmykA => {
            let rgb = cmyk_to_rgb(color[0], color[1], color[2], color[3]);
            [rgb[0], rgb[1], rgb[2], alpha]
        }
        ModelKind::Lab => {
            let rgb = lab_to_linear(babl, fmt.space, color[0], color[1], color[2]);
            [rgb[0], rgb[1], rgb[2], alpha]
        }
        ModelKind::LCh => {
            let h = color[2].to_radians();
            let (a, b) = (color[1] * h.cos(), color[1] * h.sin());
            let rgb = lab_to_linear(babl, fmt.space, color[0], a, b);
            [rgb[0], rgb[1], rgb[2], alpha]
        }
        ModelKind::Oklab => {
            let rgb = oklab_to_linear_srgb(color[0], color[1], color[2]);
            [rgb[0], rgb[1], rgb[2], alpha]
        }
        ModelKind::Oklch => {
            let h = color[2].to_radians();
            let (a, b) = (color[1] * h.cos(), color[1] * h.sin());
            let rgb = oklab_to_linear_srgb(color[0], a, b);
            [rgb[0], rgb[1], rgb[2], alpha]
        }
        ModelKind::Scalars => {
            let mut v = [0.0; 4];
            for (slot, value) in v.iter_mut().zip(values.iter()) {
                *slot = *value;
            }
            v
        }
    }
}

/// Narrow linear, straight RGBA back down to one format's raw component
/// values (the inverse of [`to_rgba`]).
fn from_rgba(babl: &Babl, fmt: &PixelFormat, rgba: Rgba) -> Vec<f64> {
    let model = babl.models.get(fmt.model);
    let alpha_idx = alpha_index(babl, fmt);
    let n = fmt.components.len();
    let mut values = vec![0.0; n];
    let [r, g, b, a] = rgba;

    let premultiply = |v: f64| -> f64 {
        if model.flags.contains(crate::entity::ModelFlags::ASSOCIATED) {
            v * a
        } else {
            v
        }
    };

    let color = match model.kind {
        ModelKind::Rgb => {
            let space = babl.spaces.get(fmt.space);
            let raw = if model.flags.contains(crate::entity::ModelFlags::NONLINEAR) {
                [space.trc[0].invert(r), space.trc[1].invert(g), space.trc[2].invert(b)]
            } else {
                [r, g, b]
            };
            vec![premultiply(raw[0]), premultiply(raw[1]), premultiply(raw[2])]
        }
        ModelKind::Gray => {
            let space = babl.spaces.get(fmt.space);
            let luma = (r + g + b) / 3.0;
            let raw = if model.flags.contains(crate::entity::ModelFlags::NONLINEAR) {
                space.trc[0].invert(luma)
            } else {
                luma
            };
            vec![premultiply(raw)]
        }
        ModelKind::YCbCr => {
            let space = babl.spaces.get(fmt.space);
            let (rp, gp, bp) = (space.trc[0].invert(r), space.trc[1].invert(g), space.trc[2].invert(b));
            let y = 0.299 * rp + 0.587 * gp + 0.114 * bp;
            let cb = (bp - y) / 1.772;
            let cr = (rp - y) / 1.402;
            vec![y, cb, cr]
        }
        ModelKind::Cmyk | ModelKind::CmykA => {
            let space = babl.spaces.get(fmt.space);
            let pullout = space.cmyk.as_ref().map(|p| p.pullout).unwrap_or(1.0);
            let cmyk = rgb_to_cmyk([r, g, b], pullout);
            cmyk.to_vec()
        }
        ModelKind::Lab => linear_to_lab(babl, fmt.space, [r, g, b]).to_vec(),
        ModelKind::LCh => {
            let lab = linear_to_lab(babl, fmt.space, [r, g, b]);
            let c = (lab[1] * lab[1] + lab[2] * lab[2]).sqrt();
            let h = lab[2].atan2(lab[1]).to_degrees().rem_euclid(360.0);
            vec![lab[0], c, h]
        }
        ModelKind::Oklab => linear_srgb_to_oklab([r, g, b]).to_vec(),
        ModelKind::Oklch => {
            let lab = linear_srgb_to_oklab([r, g, b]);
            let c = (lab[1] * lab[1] + lab[2] * lab[2]).sqrt();
            let h = lab[2].atan2(lab[1]).to_degrees().rem_euclid(360.0);
            vec![lab[0], c, h]
        }
        ModelKind::Scalars => vec![r, g, b, a],
    };

    let mut color_iter = color.into_iter();
    for (i, slot) in values.iter_mut().enumerate() {
        if Some(i) == alpha_idx {
            *slot = a;
        } else if let Some(v) = color_iter.next() {
            *slot = v;
        }
    }
    values
}

/// Convert `n` pixels from `src` to `dst`, always correctly.
///
/// Identity and "destination is the n-component generic format" both
/// short-circuit to a byte-for-byte copy; everything else goes through
/// [`to_rgba`]/[`from_rgba`].
pub fn convert(babl: &Babl, src: Handle<PixelFormat>, dst: Handle<PixelFormat>, input: &[u8], n: usize) -> Vec<u8> {
    let src_fmt = babl.formats.get(src);
    let dst_fmt = babl.formats.get(dst);

    if src == dst {
        let len = n * src_fmt.bytes_per_pixel;
        return input[..len].to_vec();
    }

    let src_stride = src_fmt.bytes_per_pixel;
    let dst_stride = dst_fmt.bytes_per_pixel;
    let mut out = vec![0u8; n * dst_stride];

    for i in 0..n {
        let pixel = &input[i * src_stride..(i + 1) * src_stride];
        let values = decode_components(babl, src_fmt, pixel);
        let rgba = to_rgba(babl, src_fmt, &values);
        let rgba = adapt_between_spaces(babl, src_fmt.space, dst_fmt.space, rgba);
        let dst_values = from_rgba(babl, dst_fmt, rgba);
        encode_components(babl, dst_fmt, &dst_values, &mut out[i * dst_stride..(i + 1) * dst_stride]);
    }
    out
}

/// Adapt a linear RGBA value from one space's linear RGB into another's.
/// A no-op when the two spaces are value-equal.
fn adapt_between_spaces(
    babl: &Babl,
    src: Handle<crate::entity::ColorSpace>,
    dst: Handle<crate::entity::ColorSpace>,
    rgba: Rgba,
) -> Rgba {
    if src == dst {
        return rgba;
    }
    let src_space = babl.spaces.get(src);
    let dst_space = babl.spaces.get(dst);
    if src_space.value_equal(dst_space) {
        return rgba;
    }
    let m = src_space.matrix_into(dst_space);
    let [r, g, b] = [
        m[0][0] * rgba[0] + m[0][1] * rgba[1] + m[0][2] * rgba[2],
        m[1][0] * rgba[0] + m[1][1] * rgba[1] + m[1][2] * rgba[2],
        m[2][0] * rgba[0] + m[2][1] * rgba[1] + m[2][2] * rgba[2],
    ];
    [r, g, b, rgba[3]]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin;

    #[test]
    fn identity_conversion_is_byte_for_byte() {
        let babl = Babl::new();
        let rgba_u8 = builtin::formats(&babl).rgba_u8;
        let input = vec![10u8, 20, 30, 255, 1, 2, 3, 4];
        let out = convert(&babl, rgba_u8, rgba_u8, &input, 2);
        assert_eq!(out, input);
    }

    #[test]
    fn premultiplied_alpha_unpremultiplies_before_linearizing() {
        let babl = Babl::new();
        let straight = babl.format("rgba-u8").unwrap();
        let premultiplied = babl.format("rgba-premultiplied-u8").unwrap();
        // Half-intensity red at half alpha, straight-alpha.
        let straight_px = vec![255u8, 0, 0, 128];
        let double = babl.format("rgba-double").unwrap();
        let straight_linear = convert(&babl, straight, double, &straight_px, 1);
        let via_premultiplied = convert(&babl, premultiplied, double, &[128u8, 0, 0, 128], 1);
        for (a, b) in straight_linear.chunks(8).zip(via_premultiplied.chunks(8)) {
            let x = f64::from_le_bytes(a.try_into().unwrap());
            let y = f64::from_le_bytes(b.try_into().unwrap());
            assert!((x - y).abs() < 0.02, "x={x} y={y}");
        }
    }

    #[test]
    fn srgb_u8_to_linear_double_roundtrips_midgray() {
        let babl = Babl::new();
        let f = builtin::formats(&babl);
        let input = vec![188u8, 188, 188, 255];
        let linear = convert(&babl, f.rgba_u8, f.rgba_double, &input, 1);
        let back = convert(&babl, f.rgba_double, f.rgba_u8, &linear, 1);
        for i in 0..4 {
            assert!((i32::from(back[i]) - i32::from(input[i])).abs() <= 1);
        }
    }
}
