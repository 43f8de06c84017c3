//! Built-in entity and conversion registrations, ported from
//! `original_source/extensions/{float,double,oklab,gegl-fixups}.c` and
//! `babl/base/pow-24.c`.
//!
//! Direct, hand-written conversion functions are only registered for the
//! sRGB RGBA family (u8/float/double) — the pairs the built-in demo and
//! test suite actually exercise at speed. Every other registered format
//! (gray, CMYK, Lab, Oklab) has no direct edges and is reached purely
//! through [`crate::reference::convert`]'s generic [`ModelKind`] dispatch,
//! same as any conversion [`Babl::fish`] can't find a bounded path for —
//! the reference converter is always available as a fallback. This mirrors
//! how real babl ships a handful of hand-optimized extension functions
//! alongside a universal fallback, rather than hand-writing every pairwise
//! conversion.

use crate::context::Babl;
use crate::entity::{
    ColorModel, ColorSpace, Component, ComponentRole, FormatComponent, ModelFlags, ModelKind, NumKind, NumericType,
    PixelFormat, Sampling, Trc,
};
use crate::graph::{ConversionFn, ConversionSpec, GraphNode};
use crate::registry::Handle;

const SRGB_G: f64 = 2.4;
const SRGB_A: f64 = 1.0 / 1.055;
const SRGB_B: f64 = 0.055 / 1.055;
const SRGB_C: f64 = 1.0 / 12.92;
const SRGB_D: f64 = 0.040_45;

fn srgb_eval(x: f64) -> f64 {
    if x >= SRGB_D {
        (SRGB_A * x + SRGB_B).powf(SRGB_G)
    } else {
        SRGB_C * x
    }
}

fn srgb_invert(y: f64) -> f64 {
    let d_linear = SRGB_C * SRGB_D;
    if y >= d_linear {
        (y.powf(1.0 / SRGB_G) - SRGB_B) / SRGB_A
    } else {
        y / SRGB_C
    }
}

fn rgba_u8_to_rgba_double(src: &[u8], dst: &mut [u8], n: usize) {
    for i in 0..n {
        let base_in = i * 4;
        let base_out = i * 32;
        for c in 0..3 {
            let linear = srgb_eval(f64::from(src[base_in + c]) / 255.0);
            dst[base_out + c * 8..base_out + c * 8 + 8].copy_from_slice(&linear.to_le_bytes());
        }
        let alpha = f64::from(src[base_in + 3]) / 255.0;
        dst[base_out + 24..base_out + 32].copy_from_slice(&alpha.to_le_bytes());
    }
}

fn rgba_double_to_rgba_u8(src: &[u8], dst: &mut [u8], n: usize) {
    for i in 0..n {
        let base_in = i * 32;
        let base_out = i * 4;
        for c in 0..3 {
            let linear = f64::from_le_bytes(src[base_in + c * 8..base_in + c * 8 + 8].try_into().unwrap());
            dst[base_out + c] = (srgb_invert(linear).clamp(0.0, 1.0) * 255.0).round() as u8;
        }
        let alpha = f64::from_le_bytes(src[base_in + 24..base_in + 32].try_into().unwrap());
        dst[base_out + 3] = (alpha.clamp(0.0, 1.0) * 255.0).round() as u8;
    }
}

fn rgba_u8_to_rgba_float(src: &[u8], dst: &mut [u8], n: usize) {
    for i in 0..n {
        let base_in = i * 4;
        let base_out = i * 16;
        for c in 0..3 {
            let linear = srgb_eval(f64::from(src[base_in + c]) / 255.0) as f32;
            dst[base_out + c * 4..base_out + c * 4 + 4].copy_from_slice(&linear.to_le_bytes());
        }
        let alpha = (f64::from(src[base_in + 3]) / 255.0) as f32;
        dst[base_out + 12..base_out + 16].copy_from_slice(&alpha.to_le_bytes());
    }
}

fn rgba_float_to_rgba_u8(src: &[u8], dst: &mut [u8], n: usize) {
    for i in 0..n {
        let base_in = i * 16;
        let base_out = i * 4;
        for c in 0..3 {
            let linear = f64::from(f32::from_le_bytes(src[base_in + c * 4..base_in + c * 4 + 4].try_into().unwrap()));
            dst[base_out + c] = (srgb_invert(linear).clamp(0.0, 1.0) * 255.0).round() as u8;
        }
        let alpha = f32::from_le_bytes(src[base_in + 12..base_in + 16].try_into().unwrap());
        dst[base_out + 3] = (alpha.clamp(0.0, 1.0) * 255.0).round() as u8;
    }
}

fn rgba_float_to_rgba_double(src: &[u8], dst: &mut [u8], n: usize) {
    for i in 0..n {
        let base_in = i * 16;
        let base_out = i * 32;
        for c in 0..4 {
            let v = f64::from(f32::from_le_bytes(src[base_in + c * 4..base_in + c * 4 + 4].try_into().unwrap()));
            dst[base_out + c * 8..base_out + c * 8 + 8].copy_from_slice(&v.to_le_bytes());
        }
    }
}

fn rgba_double_to_rgba_float(src: &[u8], dst: &mut [u8], n: usize) {
    for i in 0..n {
        let base_in = i * 32;
        let base_out = i * 16;
        for c in 0..4 {
            let v = f64::from_le_bytes(src[base_in + c * 8..base_in + c * 8 + 8].try_into().unwrap()) as f32;
            dst[base_out + c * 4..base_out + c * 4 + 4].copy_from_slice(&v.to_le_bytes());
        }
    }
}

struct Components {
    r: Handle<Component>,
    g: Handle<Component>,
    b: Handle<Component>,
    a: Handle<Component>,
    gray: Handle<Component>,
    y: Handle<Component>,
    cb: Handle<Component>,
    cr: Handle<Component>,
    cyan: Handle<Component>,
    magenta: Handle<Component>,
    yellow: Handle<Component>,
    key: Handle<Component>,
    l: Handle<Component>,
    lab_a: Handle<Component>,
    lab_b: Handle<Component>,
}

fn register_components(babl: &mut Babl) -> Components {
    Components {
        r: babl.register_component(Component { id: 0, name: "R".into(), role: ComponentRole::CHROMA }),
        g: babl.register_component(Component { id: 0, name: "G".into(), role: ComponentRole::CHROMA }),
        b: babl.register_component(Component { id: 0, name: "B".into(), role: ComponentRole::CHROMA }),
        a: babl.register_component(Component { id: 0, name: "A".into(), role: ComponentRole::ALPHA }),
        gray: babl.register_component(Component { id: 0, name: "Gray".into(), role: ComponentRole::LUMA }),
        y: babl.register_component(Component { id: 0, name: "Y".into(), role: ComponentRole::LUMA }),
        cb: babl.register_component(Component { id: 0, name: "Cb".into(), role: ComponentRole::CHROMA }),
        cr: babl.register_component(Component { id: 0, name: "Cr".into(), role: ComponentRole::CHROMA }),
        cyan: babl.register_component(Component { id: 0, name: "Cyan".into(), role: ComponentRole::CHROMA }),
        magenta: babl.register_component(Component { id: 0, name: "Magenta".into(), role: ComponentRole::CHROMA }),
        yellow: babl.register_component(Component { id: 0, name: "Yellow".into(), role: ComponentRole::CHROMA }),
        key: babl.register_component(Component { id: 0, name: "Key".into(), role: ComponentRole::CHROMA }),
        l: babl.register_component(Component { id: 0, name: "L".into(), role: ComponentRole::LUMA }),
        lab_a: babl.register_component(Component { id: 0, name: "a".into(), role: ComponentRole::CHROMA }),
        lab_b: babl.register_component(Component { id: 0, name: "b".into(), role: ComponentRole::CHROMA }),
    }
}

struct Types {
    u8_: Handle<NumericType>,
    u16_: Handle<NumericType>,
    half: Handle<NumericType>,
    float: Handle<NumericType>,
    double: Handle<NumericType>,
}

fn register_types(babl: &mut Babl) -> Types {
    Types {
        u8_: babl.register_type(NumericType { id: 0, name: "u8".into(), bits: 8, kind: NumKind::Integer, min: 0.0, max: 255.0 }),
        u16_: babl.register_type(NumericType { id: 0, name: "u16".into(), bits: 16, kind: NumKind::Integer, min: 0.0, max: 65535.0 }),
        half: babl.register_type(NumericType { id: 0, name: "half".into(), bits: 16, kind: NumKind::Float, min: -65504.0, max: 65504.0 }),
        float: babl.register_type(NumericType { id: 0, name: "float".into(), bits: 32, kind: NumKind::Float, min: f64::from(f32::MIN), max: f64::from(f32::MAX) }),
        double: babl.register_type(NumericType { id: 0, name: "double".into(), bits: 64, kind: NumKind::Float, min: f64::MIN, max: f64::MAX }),
    }
}

/// Handles to the formats most of the test suite and any quick-start demo
/// code cares about; built once by [`register_all`] and handed back by
/// [`formats`] for convenience (this is not part of the registry itself —
/// just a lookup shortcut).
pub struct FormatTable {
    pub rgba_u8: Handle<PixelFormat>,
    pub rgba_float: Handle<PixelFormat>,
    pub rgba_double: Handle<PixelFormat>,
    pub gray_u8: Handle<PixelFormat>,
    pub cmyk_u8: Handle<PixelFormat>,
    pub lab_double: Handle<PixelFormat>,
}

pub fn formats(babl: &Babl) -> FormatTable {
    FormatTable {
        rgba_u8: babl.format("rgba-u8").expect("built-in rgba-u8 format"),
        rgba_float: babl.format("rgba-float").expect("built-in rgba-float format"),
        rgba_double: babl.format("rgba-double").expect("built-in rgba-double format"),
        gray_u8: babl.format("gray-u8").expect("built-in gray-u8 format"),
        cmyk_u8: babl.format("cmyk-u8").expect("built-in cmyk-u8 format"),
        lab_double: babl.format("lab-double").expect("built-in lab-double format"),
    }
}

/// Register every built-in numeric type, component, model, space, format,
/// and fast-path conversion. Called once from [`Babl::with_config`].
pub fn register_all(babl: &mut Babl) {
    let types = register_types(babl);
    let comp = register_components(babl);

    let srgb = babl.register_space(ColorSpace::new(
        0,
        "sRGB",
        (0.64, 0.33),
        (0.30, 0.60),
        (0.15, 0.06),
        (0.3127, 0.3290),
        [Trc::SrgbCanonical, Trc::SrgbCanonical, Trc::SrgbCanonical],
    ));
    let srgb_cmyk_space = babl.register_space(
        ColorSpace::new(
            0,
            "sRGB-cmyk",
            (0.64, 0.33),
            (0.30, 0.60),
            (0.15, 0.06),
            (0.3127, 0.3290),
            [Trc::SrgbCanonical, Trc::SrgbCanonical, Trc::SrgbCanonical],
        )
        .with_cmyk(crate::entity::CmykProfile::default()),
    );

    let rgba_nonlinear = babl.register_model(ColorModel {
        id: 0,
        name: "R'G'B'A".into(),
        components: vec![comp.r, comp.g, comp.b, comp.a],
        flags: ModelFlags::RGB | ModelFlags::ALPHA | ModelFlags::NONLINEAR | ModelFlags::PERCEPTUAL,
        kind: ModelKind::Rgb,
        base_model: None,
        space: srgb,
    });
    let rgba_linear = babl.register_model(ColorModel {
        id: 0,
        name: "RGBA".into(),
        components: vec![comp.r, comp.g, comp.b, comp.a],
        flags: ModelFlags::RGB | ModelFlags::ALPHA | ModelFlags::LINEAR,
        kind: ModelKind::Rgb,
        base_model: None,
        space: srgb,
    });
    let rgb_linear = babl.register_model(ColorModel {
        id: 0,
        name: "RGB".into(),
        components: vec![comp.r, comp.g, comp.b],
        flags: ModelFlags::RGB | ModelFlags::LINEAR,
        kind: ModelKind::Rgb,
        base_model: None,
        space: srgb,
    });
    let oklab = babl.register_model(ColorModel {
        id: 0,
        name: "Oklab".into(),
        components: vec![comp.l, comp.lab_a, comp.lab_b],
        flags: ModelFlags::CIE | ModelFlags::LINEAR,
        kind: ModelKind::Oklab,
        base_model: None,
        space: srgb,
    });
    let gray_nonlinear = babl.register_model(ColorModel {
        id: 0,
        name: "Y'A".into(),
        components: vec![comp.gray, comp.a],
        flags: ModelFlags::GRAY | ModelFlags::ALPHA | ModelFlags::NONLINEAR | ModelFlags::PERCEPTUAL,
        kind: ModelKind::Gray,
        base_model: None,
        space: srgb,
    });
    let ycbcr_nonlinear = babl.register_model(ColorModel {
        id: 0,
        name: "Y'CbCr".into(),
        components: vec![comp.y, comp.cb, comp.cr],
        flags: ModelFlags::RGB | ModelFlags::NONLINEAR | ModelFlags::PERCEPTUAL,
        kind: ModelKind::YCbCr,
        base_model: None,
        space: srgb,
    });
    let cmyk = babl.register_model(ColorModel {
        id: 0,
        name: "CMYK".into(),
        components: vec![comp.cyan, comp.magenta, comp.yellow, comp.key],
        flags: ModelFlags::CMYK,
        kind: ModelKind::Cmyk,
        base_model: None,
        space: srgb_cmyk_space,
    });
    let rgba_premultiplied = babl.register_model(ColorModel {
        id: 0,
        name: "RaGaBaA".into(),
        components: vec![comp.r, comp.g, comp.b, comp.a],
        flags: ModelFlags::RGB | ModelFlags::ALPHA | ModelFlags::NONLINEAR | ModelFlags::ASSOCIATED,
        kind: ModelKind::Rgb,
        base_model: None,
        space: srgb,
    });
    let lab = babl.register_model(ColorModel {
        id: 0,
        name: "CIE Lab".into(),
        components: vec![comp.l, comp.lab_a, comp.lab_b],
        flags: ModelFlags::CIE | ModelFlags::LINEAR,
        kind: ModelKind::Lab,
        base_model: None,
        space: srgb,
    });

    let rgba_u8 = babl.register_format(PixelFormat {
        id: 0,
        name: "rgba-u8".into(),
        space: srgb,
        model: rgba_nonlinear,
        components: [comp.r, comp.g, comp.b, comp.a]
            .into_iter()
            .map(|c| FormatComponent { component: c, ty: types.u8_, sampling: Sampling::FULL })
            .collect(),
        planar: false,
        bytes_per_pixel: 4,
        is_generic: false,
    });
    let rgba_float = babl.register_format(PixelFormat {
        id: 0,
        name: "rgba-float".into(),
        space: srgb,
        model: rgba_linear,
        components: [comp.r, comp.g, comp.b, comp.a]
            .into_iter()
            .map(|c| FormatComponent { component: c, ty: types.float, sampling: Sampling::FULL })
            .collect(),
        planar: false,
        bytes_per_pixel: 16,
        is_generic: false,
    });
    let rgba_double = babl.register_format(PixelFormat {
        id: 0,
        name: "rgba-double".into(),
        space: srgb,
        model: rgba_linear,
        components: [comp.r, comp.g, comp.b, comp.a]
            .into_iter()
            .map(|c| FormatComponent { component: c, ty: types.double, sampling: Sampling::FULL })
            .collect(),
        planar: false,
        bytes_per_pixel: 32,
        is_generic: false,
    });
    let gray_u8 = babl.register_format(PixelFormat {
        id: 0,
        name: "gray-u8".into(),
        space: srgb,
        model: gray_nonlinear,
        components: [comp.gray, comp.a]
            .into_iter()
            .map(|c| FormatComponent { component: c, ty: types.u8_, sampling: Sampling::FULL })
            .collect(),
        planar: false,
        bytes_per_pixel: 2,
        is_generic: false,
    });
    let _rgba_premultiplied_u8 = babl.register_format(PixelFormat {
        id: 0,
        name: "rgba-premultiplied-u8".into(),
        space: srgb,
        model: rgba_premultiplied,
        components: [comp.r, comp.g, comp.b, comp.a]
            .into_iter()
            .map(|c| FormatComponent { component: c, ty: types.u8_, sampling: Sampling::FULL })
            .collect(),
        planar: false,
        bytes_per_pixel: 4,
        is_generic: false,
    });
    let _ycbcr_u8 = babl.register_format(PixelFormat {
        id: 0,
        name: "ycbcr-u8".into(),
        space: srgb,
        model: ycbcr_nonlinear,
        components: [comp.y, comp.cb, comp.cr]
            .into_iter()
            .map(|c| FormatComponent { component: c, ty: types.u8_, sampling: Sampling::FULL })
            .collect(),
        planar: false,
        bytes_per_pixel: 3,
        is_generic: false,
    });
    let cmyk_u8 = babl.register_format(PixelFormat {
        id: 0,
        name: "cmyk-u8".into(),
        space: srgb_cmyk_space,
        model: cmyk,
        components: [comp.cyan, comp.magenta, comp.yellow, comp.key]
            .into_iter()
            .map(|c| FormatComponent { component: c, ty: types.u8_, sampling: Sampling::FULL })
            .collect(),
        planar: false,
        bytes_per_pixel: 4,
        is_generic: false,
    });
    let lab_double = babl.register_format(PixelFormat {
        id: 0,
        name: "lab-double".into(),
        space: srgb,
        model: lab,
        components: [comp.l, comp.lab_a, comp.lab_b]
            .into_iter()
            .map(|c| FormatComponent { component: c, ty: types.double, sampling: Sampling::FULL })
            .collect(),
        planar: false,
        bytes_per_pixel: 24,
        is_generic: false,
    });
    let _rgba_u16 = babl.register_format(PixelFormat {
        id: 0,
        name: "rgba-u16".into(),
        space: srgb,
        model: rgba_nonlinear,
        components: [comp.r, comp.g, comp.b, comp.a]
            .into_iter()
            .map(|c| FormatComponent { component: c, ty: types.u16_, sampling: Sampling::FULL })
            .collect(),
        planar: false,
        bytes_per_pixel: 8,
        is_generic: false,
    });
    let _rgb_float = babl.register_format(PixelFormat {
        id: 0,
        name: "rgb-float".into(),
        space: srgb,
        model: rgb_linear,
        components: [comp.r, comp.g, comp.b]
            .into_iter()
            .map(|c| FormatComponent { component: c, ty: types.float, sampling: Sampling::FULL })
            .collect(),
        planar: false,
        bytes_per_pixel: 12,
        is_generic: false,
    });
    let _ycbcr_float = babl.register_format(PixelFormat {
        id: 0,
        name: "ycbcr-float".into(),
        space: srgb,
        model: ycbcr_nonlinear,
        components: [comp.y, comp.cb, comp.cr]
            .into_iter()
            .map(|c| FormatComponent { component: c, ty: types.float, sampling: Sampling::FULL })
            .collect(),
        planar: false,
        bytes_per_pixel: 12,
        is_generic: false,
    });
    let _oklab_double = babl.register_format(PixelFormat {
        id: 0,
        name: "oklab-double".into(),
        space: srgb,
        model: oklab,
        components: [comp.l, comp.lab_a, comp.lab_b]
            .into_iter()
            .map(|c| FormatComponent { component: c, ty: types.double, sampling: Sampling::FULL })
            .collect(),
        planar: false,
        bytes_per_pixel: 24,
        is_generic: false,
    });
    let _rgba_half = babl.register_format(PixelFormat {
        id: 0,
        name: "rgba-half".into(),
        space: srgb,
        model: rgba_nonlinear,
        components: [comp.r, comp.g, comp.b, comp.a]
            .into_iter()
            .map(|c| FormatComponent { component: c, ty: types.half, sampling: Sampling::FULL })
            .collect(),
        planar: false,
        bytes_per_pixel: 8,
        is_generic: false,
    });

    register_fast_path(babl, rgba_u8, rgba_double, rgba_u8_to_rgba_double, "rgba-u8-to-rgba-double");
    register_fast_path(babl, rgba_double, rgba_u8, rgba_double_to_rgba_u8, "rgba-double-to-rgba-u8");
    register_fast_path(babl, rgba_u8, rgba_float, rgba_u8_to_rgba_float, "rgba-u8-to-rgba-float");
    register_fast_path(babl, rgba_float, rgba_u8, rgba_float_to_rgba_u8, "rgba-float-to-rgba-u8");
    register_fast_path(babl, rgba_float, rgba_double, rgba_float_to_rgba_double, "rgba-float-to-rgba-double");
    register_fast_path(babl, rgba_double, rgba_float, rgba_double_to_rgba_float, "rgba-double-to-rgba-float");
}

fn register_fast_path(
    babl: &mut Babl,
    source: Handle<PixelFormat>,
    destination: Handle<PixelFormat>,
    f: fn(&[u8], &mut [u8], usize),
    name: &str,
) {
    let id = babl.next_id();
    babl.register_conversion(ConversionSpec {
        id,
        name: name.into(),
        source: GraphNode::Format(source),
        destination: GraphNode::Format(destination),
        function: ConversionFn::Linear(f),
        data: None,
        allow_collision: false,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_all_is_idempotent_across_contexts() {
        let a = Babl::new();
        let b = Babl::new();
        assert_eq!(a.formats.len(), b.formats.len());
        assert!(a.format("rgba-u8").is_some());
    }

    #[test]
    fn fast_path_round_trips_within_one_unit() {
        let babl = Babl::new();
        let f = formats(&babl);
        let input = vec![200u8, 50, 10, 255];
        let double = crate::reference::convert(&babl, f.rgba_u8, f.rgba_double, &input, 1);
        let back = crate::reference::convert(&babl, f.rgba_double, f.rgba_u8, &double, 1);
        for (a, b) in input.iter().zip(&back) {
            assert!((i32::from(*a) - i32::from(*b)).abs() <= 1);
        }
    }
}
