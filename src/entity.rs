//! Entity definitions and color-space derivation.
//!
//! Grounded on `WorldSEnder-stealth-paint`'s `buffer.rs`, which already
//! carries almost this exact data model for a single texel (`Color`, `Transfer`, `Primaries`,
//! `Whitepoint`, `Luminance`, `Samples`, `SampleBits`, `SampleParts`) — the
//! enums below generalize that shape to a full registry-backed entity graph,
//! and the matrix/TRC math is ported from `original_source/babl/babl-trc.c`
//! and `babl-space.h`.

use std::sync::Arc;

use bitflags::bitflags;

use crate::registry::{Entity, Handle};

/// A fixed-point hash used for value-based dedup. Floating point quantities
/// are compared "within 4 decimal digits": we hash the value rounded to
/// that precision rather than the raw bits, so two spaces whose primaries
/// agree to within tolerance fingerprint identically.
fn hash_f64_rounded(state: &mut u64, value: f64) {
    let scaled = (value * 10_000.0).round() as i64;
    *state = state.wrapping_mul(1_000_003).wrapping_add(scaled as u64);
}

fn hash_u64(state: &mut u64, value: u64) {
    *state = state.wrapping_mul(1_000_003).wrapping_add(value);
}

fn hash_str(state: &mut u64, value: &str) {
    for b in value.bytes() {
        *state = state.wrapping_mul(1_000_003).wrapping_add(u64::from(b));
    }
}

// ---------------------------------------------------------------------
// NumericType
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumKind {
    Integer,
    Float,
}

#[derive(Debug, Clone)]
pub struct NumericType {
    pub id: u32,
    pub name: String,
    pub bits: u32,
    pub kind: NumKind,
    pub min: f64,
    pub max: f64,
}

impl NumericType {
    pub fn bytes(&self) -> usize {
        (self.bits / 8) as usize
    }
}

impl Entity for NumericType {
    fn id(&self) -> u32 {
        self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn fingerprint(&self) -> u64 {
        let mut h = 0xcbf2_9ce4_8422_2325u64;
        hash_str(&mut h, &self.name);
        hash_u64(&mut h, u64::from(self.bits));
        hash_u64(&mut h, self.kind as u64);
        h
    }
}

// ---------------------------------------------------------------------
// Component
// ---------------------------------------------------------------------

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ComponentRole: u8 {
        const LUMA = 0b0001;
        const CHROMA = 0b0010;
        const ALPHA = 0b0100;
        const PADDING = 0b1000;
    }
}

#[derive(Debug, Clone)]
pub struct Component {
    pub id: u32,
    pub name: String,
    pub role: ComponentRole,
}

impl Entity for Component {
    fn id(&self) -> u32 {
        self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn fingerprint(&self) -> u64 {
        let mut h = 0x27d4_eb2f_1656_67c5u64;
        hash_str(&mut h, &self.name);
        hash_u64(&mut h, self.role.bits().into());
        h
    }
}

// ---------------------------------------------------------------------
// ColorModel
// ---------------------------------------------------------------------

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ModelFlags: u16 {
        const RGB = 1 << 0;
        const GRAY = 1 << 1;
        const CMYK = 1 << 2;
        const CIE = 1 << 3;
        const LINEAR = 1 << 4;
        const NONLINEAR = 1 << 5;
        const PERCEPTUAL = 1 << 6;
        const INVERTED = 1 << 7;
        const ASSOCIATED = 1 << 8;
        const ALPHA = 1 << 9;
    }
}

/// Picks which concrete decode/encode routine the reference converter
/// (`reference.rs`) uses for this model.
///
/// Component membership could in principle be described purely in terms of
/// semantic role flags, but resolving that generically for an arbitrary
/// registered model would need a full component-role inference engine.
/// Concretely tagging each model with its family is the pragmatic
/// equivalent scoped to the families the built-in formats actually need
/// (`builtin.rs`), and is recorded as a scope decision in DESIGN.md.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Rgb,
    Gray,
    YCbCr,
    Cmyk,
    CmykA,
    Lab,
    LCh,
    Oklab,
    Oklch,
    Scalars,
}

#[derive(Debug, Clone)]
pub struct ColorModel {
    pub id: u32,
    pub name: String,
    pub components: Vec<Handle<Component>>,
    pub flags: ModelFlags,
    pub kind: ModelKind,
    /// The canonical model this one was rebased from, if any.
    pub base_model: Option<Handle<ColorModel>>,
    pub space: Handle<ColorSpace>,
}

impl Entity for ColorModel {
    fn id(&self) -> u32 {
        self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn fingerprint(&self) -> u64 {
        let mut h = 0x9e37_79b9_7f4a_7c15u64;
        hash_str(&mut h, &self.name);
        hash_u64(&mut h, self.flags.bits().into());
        hash_u64(&mut h, self.kind as u64);
        hash_u64(&mut h, self.space.dense_index().into());
        for c in &self.components {
            hash_u64(&mut h, c.dense_index().into());
        }
        h
    }
}

// ---------------------------------------------------------------------
// TRC — tone reproduction curve
// ---------------------------------------------------------------------

/// A tone-reproduction curve.
///
/// `Lut` carries both the forward table and its numeric inverse, computed
/// once at construction via [`Trc::lut`] (a 16-iteration binary search per
/// entry).
///
/// Forward/inverse evaluation always goes through the closed-form formula
/// (or linear interpolation for `Lut`). A cached polynomial approximation
/// for the interior interval, as some implementations use, is a performance
/// optimization over the exact formula and is deliberately not replicated
/// bit-for-bit here — the exact formula is evaluated everywhere, which only
/// affects speed, not any observable conversion result.
#[derive(Debug, Clone)]
pub enum Trc {
    Linear,
    Gamma(f64),
    FormulaSrgb {
        g: f64,
        a: f64,
        b: f64,
        c: f64,
        d: f64,
    },
    /// The hard-coded canonical sRGB curve.
    SrgbCanonical,
    Lut {
        forward: Arc<[f32]>,
        inverse: Arc<[f32]>,
    },
}

const SRGB_G: f64 = 2.4;
const SRGB_A: f64 = 1.0 / 1.055;
const SRGB_B: f64 = 0.055 / 1.055;
const SRGB_C: f64 = 1.0 / 12.92;
const SRGB_D: f64 = 0.040_45;

impl Trc {
    pub fn lut(forward: Vec<f32>) -> Self {
        let inverse = invert_lut(&forward);
        Trc::Lut {
            forward: forward.into(),
            inverse: inverse.into(),
        }
    }

    /// Encoded → linear.
    pub fn eval(&self, x: f64) -> f64 {
        match self {
            Trc::Linear => x,
            Trc::Gamma(g) => {
                if x <= 0.0 {
                    0.0
                } else {
                    x.powf(*g)
                }
            }
            Trc::FormulaSrgb { g, a, b, c, d } => {
                if x >= *d {
                    (a * x + b).powf(*g)
                } else {
                    c * x
                }
            }
            Trc::SrgbCanonical => eval_formula_srgb(x, SRGB_G, SRGB_A, SRGB_B, SRGB_C, SRGB_D),
            Trc::Lut { forward, .. } => lerp_table(forward, x),
        }
    }

    /// Linear → encoded.
    pub fn invert(&self, y: f64) -> f64 {
        match self {
            Trc::Linear => y,
            Trc::Gamma(g) => {
                if y <= 0.0 {
                    0.0
                } else {
                    y.powf(1.0 / g)
                }
            }
            Trc::FormulaSrgb { g, a, b, c, d } => {
                let d_linear = c * d;
                if y >= d_linear {
                    (y.powf(1.0 / g) - b) / a
                } else {
                    y / c
                }
            }
            Trc::SrgbCanonical => invert_formula_srgb(y, SRGB_G, SRGB_A, SRGB_B, SRGB_C, SRGB_D),
            Trc::Lut { inverse, .. } => lerp_table(inverse, y),
        }
    }

    fn fingerprint(&self) -> u64 {
        let mut h = 0x1656_67c5_9e37_79b9u64;
        match self {
            Trc::Linear => hash_u64(&mut h, 0),
            Trc::Gamma(g) => {
                hash_u64(&mut h, 1);
                hash_f64_rounded(&mut h, *g);
            }
            Trc::FormulaSrgb { g, a, b, c, d } => {
                hash_u64(&mut h, 2);
                for v in [g, a, b, c, d] {
                    hash_f64_rounded(&mut h, *v);
                }
            }
            Trc::SrgbCanonical => hash_u64(&mut h, 3),
            Trc::Lut { forward, .. } => {
                hash_u64(&mut h, 4);
                hash_u64(&mut h, forward.len() as u64);
                if let Some(first) = forward.first() {
                    hash_f64_rounded(&mut h, f64::from(*first));
                }
                if let Some(last) = forward.last() {
                    hash_f64_rounded(&mut h, f64::from(*last));
                }
            }
        }
        h
    }
}

fn eval_formula_srgb(x: f64, g: f64, a: f64, b: f64, c: f64, d: f64) -> f64 {
    if x >= d {
        (a * x + b).powf(g)
    } else {
        c * x
    }
}

fn invert_formula_srgb(y: f64, g: f64, a: f64, b: f64, c: f64, d: f64) -> f64 {
    let d_linear = c * d;
    if y >= d_linear {
        (y.powf(1.0 / g) - b) / a
    } else {
        y / c
    }
}

/// Numerically invert a forward LUT with a 16-iteration binary search per
/// output entry.
fn invert_lut(forward: &[f32]) -> Vec<f32> {
    let n = forward.len();
    if n == 0 {
        return Vec::new();
    }
    let mut inverse = vec![0f32; n];
    for (i, slot) in inverse.iter_mut().enumerate() {
        let target = i as f32 / (n - 1).max(1) as f32;
        let mut lo = 0.0f32;
        let mut hi = 1.0f32;
        for _ in 0..16 {
            let mid = (lo + hi) * 0.5;
            if lerp_table(forward, f64::from(mid)) < f64::from(target) {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        *slot = (lo + hi) * 0.5;
    }
    inverse
}

fn lerp_table(table: &[f32], x: f64) -> f64 {
    if table.is_empty() {
        return x;
    }
    if table.len() == 1 {
        return f64::from(table[0]);
    }
    let x = x.clamp(0.0, 1.0);
    let scaled = x * (table.len() - 1) as f64;
    let lo = scaled.floor() as usize;
    let hi = (lo + 1).min(table.len() - 1);
    let frac = scaled - lo as f64;
    f64::from(table[lo]) * (1.0 - frac) + f64::from(table[hi]) * frac
}

// ---------------------------------------------------------------------
// ColorSpace
// ---------------------------------------------------------------------

pub type Chromaticity = (f64, f64);

/// A derived 3x3 matrix, stored both at double and float precision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix3 {
    pub d: [[f64; 3]; 3],
    pub f: [[f32; 3]; 3],
}

impl Matrix3 {
    pub fn apply_f64(&self, v: [f64; 3]) -> [f64; 3] {
        let m = &self.d;
        [
            m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
            m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
            m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
        ]
    }
}

fn invert3(m: [[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let det = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);
    let inv_det = 1.0 / det;
    [
        [
            (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * inv_det,
            (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv_det,
            (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv_det,
        ],
        [
            (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * inv_det,
            (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv_det,
            (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv_det,
        ],
        [
            (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * inv_det,
            (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv_det,
            (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv_det,
        ],
    ]
}

fn mul3(a: [[f64; 3]; 3], b: [[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

fn solve3(m: [[f64; 3]; 3], v: [f64; 3]) -> [f64; 3] {
    let inv = invert3(m);
    [
        inv[0][0] * v[0] + inv[0][1] * v[1] + inv[0][2] * v[2],
        inv[1][0] * v[0] + inv[1][1] * v[1] + inv[1][2] * v[2],
        inv[2][0] * v[0] + inv[2][1] * v[1] + inv[2][2] * v[2],
    ]
}

fn xy_to_xyz((x, y): Chromaticity) -> [f64; 3] {
    [x / y, 1.0, (1.0 - x - y) / y]
}

/// Build the RGB-to-XYZ matrix from primaries and a white point, ported
/// from `original_source/babl/babl-space.h`'s construction recipe.
pub fn rgb_to_xyz_matrix(
    red: Chromaticity,
    green: Chromaticity,
    blue: Chromaticity,
    white: Chromaticity,
) -> [[f64; 3]; 3] {
    let xr = xy_to_xyz(red);
    let xg = xy_to_xyz(green);
    let xb = xy_to_xyz(blue);
    let xw = xy_to_xyz(white);

    let primaries = [
        [xr[0], xg[0], xb[0]],
        [xr[1], xg[1], xb[1]],
        [xr[2], xg[2], xb[2]],
    ];
    let s = solve3(primaries, xw);
    [
        [primaries[0][0] * s[0], primaries[0][1] * s[1], primaries[0][2] * s[2]],
        [primaries[1][0] * s[0], primaries[1][1] * s[1], primaries[1][2] * s[2]],
        [primaries[2][0] * s[0], primaries[2][1] * s[1], primaries[2][2] * s[2]],
    ]
}

fn to_f32_matrix(m: [[f64; 3]; 3]) -> [[f32; 3]; 3] {
    let mut out = [[0f32; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            out[i][j] = m[i][j] as f32;
        }
    }
    out
}

/// Chromatic adaptation via the Bradford-less direct ratio method used by
/// babl: scale a source-white-relative matrix to a destination white point.
/// Sufficient here since all built-in spaces share D65; kept general for
/// callers that register spaces with other whitepoints.
pub fn chromatic_adaptation(src_white: Chromaticity, dst_white: Chromaticity) -> [[f64; 3]; 3] {
    if (src_white.0 - dst_white.0).abs() < 1e-9 && (src_white.1 - dst_white.1).abs() < 1e-9 {
        return [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
    }
    let src = xy_to_xyz(src_white);
    let dst = xy_to_xyz(dst_white);
    [
        [dst[0] / src[0], 0.0, 0.0],
        [0.0, dst[1] / src[1], 0.0],
        [0.0, 0.0, dst[2] / src[2]],
    ]
}

#[derive(Debug, Clone)]
pub struct CmykProfile {
    /// Ink-coverage pullout used by the naive fallback inversion when no
    /// ICC profile is attached.
    pub pullout: f64,
}

impl Default for CmykProfile {
    fn default() -> Self {
        CmykProfile { pullout: 1.0 }
    }
}

#[derive(Debug, Clone)]
pub struct ColorSpace {
    pub id: u32,
    pub name: String,
    pub red: Chromaticity,
    pub green: Chromaticity,
    pub blue: Chromaticity,
    pub white: Chromaticity,
    pub trc: [Trc; 3],
    pub to_xyz: Matrix3,
    pub from_xyz: Matrix3,
    pub icc: Option<Vec<u8>>,
    pub cmyk: Option<CmykProfile>,
}

impl ColorSpace {
    pub fn new(
        id: u32,
        name: impl Into<String>,
        red: Chromaticity,
        green: Chromaticity,
        blue: Chromaticity,
        white: Chromaticity,
        trc: [Trc; 3],
    ) -> Self {
        let to_xyz_d = rgb_to_xyz_matrix(red, green, blue, white);
        let from_xyz_d = invert3(to_xyz_d);
        ColorSpace {
            id,
            name: name.into(),
            red,
            green,
            blue,
            white,
            trc,
            to_xyz: Matrix3 {
                d: to_xyz_d,
                f: to_f32_matrix(to_xyz_d),
            },
            from_xyz: Matrix3 {
                d: from_xyz_d,
                f: to_f32_matrix(from_xyz_d),
            },
            icc: None,
            cmyk: None,
        }
    }

    pub fn with_cmyk(mut self, profile: CmykProfile) -> Self {
        self.cmyk = Some(profile);
        self
    }

    pub fn with_icc(mut self, bytes: Vec<u8>) -> Self {
        self.icc = Some(bytes);
        self
    }

    /// Matrix composing `self`'s linear RGB into `other`'s linear RGB,
    /// adapting white points if they differ.
    pub fn matrix_into(&self, other: &ColorSpace) -> [[f64; 3]; 3] {
        let adapt = chromatic_adaptation(self.white, other.white);
        mul3(other.from_xyz.d, mul3(adapt, self.to_xyz.d))
    }

    /// True when two spaces are close enough (4 decimal digits on
    /// primaries/white, identical TRC fingerprints) to be treated as the
    /// same instance.
    pub fn value_equal(&self, other: &ColorSpace) -> bool {
        self.fingerprint() == other.fingerprint()
    }
}

impl Entity for ColorSpace {
    fn id(&self) -> u32 {
        self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn fingerprint(&self) -> u64 {
        let mut h = 0x3243_f6a8_885a_308du64;
        for c in [self.red, self.green, self.blue, self.white] {
            hash_f64_rounded(&mut h, c.0);
            hash_f64_rounded(&mut h, c.1);
        }
        for t in &self.trc {
            hash_u64(&mut h, t.fingerprint());
        }
        h
    }
}

// ---------------------------------------------------------------------
// PixelFormat
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sampling {
    pub x: u8,
    pub y: u8,
}

impl Sampling {
    pub const FULL: Sampling = Sampling { x: 1, y: 1 };
}

#[derive(Debug, Clone)]
pub struct FormatComponent {
    pub component: Handle<Component>,
    pub ty: Handle<NumericType>,
    pub sampling: Sampling,
}

#[derive(Debug, Clone)]
pub struct PixelFormat {
    pub id: u32,
    pub name: String,
    pub space: Handle<ColorSpace>,
    pub model: Handle<ColorModel>,
    pub components: Vec<FormatComponent>,
    pub planar: bool,
    /// Sum of component type byte sizes; meaningful when `!planar`.
    pub bytes_per_pixel: usize,
    /// Marks the "n-component generic" format used as a reference-converter
    /// short circuit.
    pub is_generic: bool,
}

impl PixelFormat {
    pub fn num_components(&self) -> usize {
        self.components.len()
    }
}

impl Entity for PixelFormat {
    fn id(&self) -> u32 {
        self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn fingerprint(&self) -> u64 {
        let mut h = 0x0ff1_ce00_dead_beefu64;
        hash_u64(&mut h, self.space.dense_index().into());
        hash_u64(&mut h, self.model.dense_index().into());
        hash_u64(&mut h, self.planar as u64);
        for fc in &self.components {
            hash_u64(&mut h, fc.component.dense_index().into());
            hash_u64(&mut h, fc.ty.dense_index().into());
            hash_u64(&mut h, u64::from(fc.sampling.x));
            hash_u64(&mut h, u64::from(fc.sampling.y));
        }
        h
    }
}
