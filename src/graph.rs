//! Conversion edges.
//!
//! The three function kinds are a tagged enum rather than a union + tag.
//! Edge storage is its own small graph structure (not a generic
//! [`crate::registry::Registry`]) because conversions are *not*
//! value-deduplicated the way entities are: the collision policy lets many
//! distinct edges share one (source, destination) pair, disambiguated by an
//! auto-suffixed name.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use slotmap::{new_key_type, SlotMap};

use crate::entity::{ColorModel, NumericType, PixelFormat};
use crate::registry::Handle;

new_key_type! {
    pub struct ConversionKey;
}

/// A reference to a registered [`Conversion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversionHandle(ConversionKey);

/// A vertex of the conversion graph: a numeric type, a color model, or a
/// pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphNode {
    Type(Handle<NumericType>),
    Model(Handle<ColorModel>),
    Format(Handle<PixelFormat>),
}

/// The three conversion kinds, differing only in how they receive buffers.
#[derive(Clone, Copy)]
pub enum ConversionFn {
    /// Tightly packed `(src, dst, n)`.
    Linear(fn(&[u8], &mut [u8], usize)),
    /// Strided `(src, dst, src_pitch, dst_pitch, n)`, one component at a
    /// time.
    Plane(fn(&[u8], &mut [u8], usize, usize, usize)),
    /// Per-component pointer arrays with their own pitches.
    Planar(fn(&[&[u8]], &mut [&mut [u8]], &[usize], &[usize], usize)),
}

/// A view over a buffer suitable for any [`ConversionFn`] variant; built by
/// `fish.rs` right before dispatch.
pub enum PixelSlice<'a> {
    Contiguous {
        src: &'a [u8],
        dst: &'a mut [u8],
    },
    Strided {
        src: &'a [u8],
        dst: &'a mut [u8],
        src_pitch: usize,
        dst_pitch: usize,
    },
    Planar {
        src: &'a [&'a [u8]],
        dst: &'a mut [&'a mut [u8]],
        src_pitch: &'a [usize],
        dst_pitch: &'a [usize],
    },
}

impl ConversionFn {
    /// Dispatch through the external, uniform `(src, dst, n)` shim,
    /// presenting the same external signature regardless of variant.
    pub fn invoke(&self, slice: PixelSlice<'_>, n: usize) {
        match (self, slice) {
            (ConversionFn::Linear(f), PixelSlice::Contiguous { src, dst }) => f(src, dst, n),
            (
                ConversionFn::Plane(f),
                PixelSlice::Strided { src, dst, src_pitch, dst_pitch },
            ) => f(src, dst, src_pitch, dst_pitch, n),
            (
                ConversionFn::Planar(f),
                PixelSlice::Planar { src, dst, src_pitch, dst_pitch },
            ) => f(src, dst, src_pitch, dst_pitch, n),
            _ => panic!("ConversionFn invoked with a PixelSlice of the wrong shape"),
        }
    }
}

/// An opaque conversion edge.
pub struct Conversion {
    pub id: u32,
    pub name: String,
    pub source: GraphNode,
    pub destination: GraphNode,
    pub function: ConversionFn,
    pub data: Option<Arc<dyn Any + Send + Sync>>,
    error_bits: AtomicU64,
    cost_bits: AtomicU64,
    pixels_processed: AtomicU64,
}

/// Sentinel stored in [`Conversion::error`] before a measurement has run:
/// `error == -1` means not yet measured.
pub const UNMEASURED: f64 = -1.0;

impl Conversion {
    pub fn error(&self) -> f64 {
        f64::from_bits(self.error_bits.load(Ordering::Relaxed))
    }

    pub fn cost(&self) -> f64 {
        f64::from_bits(self.cost_bits.load(Ordering::Relaxed))
    }

    pub fn pixels_processed(&self) -> u64 {
        self.pixels_processed.load(Ordering::Relaxed)
    }

    pub fn set_measurement(&self, error: f64, cost: f64) {
        self.error_bits.store(error.to_bits(), Ordering::Relaxed);
        self.cost_bits.store(cost.to_bits(), Ordering::Relaxed);
    }

    pub fn record_pixels(&self, n: u64) {
        self.pixels_processed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn is_measured(&self) -> bool {
        self.error() != UNMEASURED
    }
}

/// Everything needed to register a new edge: id, data, allow-collision,
/// and which of linear/plane/planar function shape applies.
pub struct ConversionSpec {
    pub id: u32,
    pub name: String,
    pub source: GraphNode,
    pub destination: GraphNode,
    pub function: ConversionFn,
    pub data: Option<Arc<dyn Any + Send + Sync>>,
    pub allow_collision: bool,
}

#[derive(Default)]
pub struct Graph {
    conversions: SlotMap<ConversionKey, Conversion>,
    by_name: HashMap<String, ConversionKey>,
    outgoing: HashMap<GraphNode, Vec<ConversionKey>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one edge, applying the collision policy.
    pub fn register(&mut self, spec: ConversionSpec) -> ConversionHandle {
        if spec.allow_collision {
            if let Some(existing) = self.find_identical(spec.source, spec.destination) {
                return existing;
            }
        }

        let name = self.unique_name(spec.name);
        let key = self.conversions.insert(Conversion {
            id: spec.id,
            name: name.clone(),
            source: spec.source,
            destination: spec.destination,
            function: spec.function,
            data: spec.data,
            error_bits: AtomicU64::new(UNMEASURED.to_bits()),
            cost_bits: AtomicU64::new(0f64.to_bits()),
            pixels_processed: AtomicU64::new(0),
        });
        self.by_name.insert(name, key);
        self.outgoing.entry(spec.source).or_default().push(key);
        ConversionHandle(key)
    }

    fn find_identical(&self, source: GraphNode, destination: GraphNode) -> Option<ConversionHandle> {
        self.outgoing.get(&source)?.iter().find_map(|&key| {
            let c = &self.conversions[key];
            (c.destination == destination).then_some(ConversionHandle(key))
        })
    }

    fn unique_name(&self, base: String) -> String {
        if !self.by_name.contains_key(&base) {
            return base;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{base}#{n}");
            if !self.by_name.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    pub fn get(&self, handle: ConversionHandle) -> &Conversion {
        &self.conversions[handle.0]
    }

    /// Outgoing edges of `node`, in registration order.
    pub fn outgoing(&self, node: GraphNode) -> impl Iterator<Item = ConversionHandle> + '_ {
        self.outgoing
            .get(&node)
            .into_iter()
            .flatten()
            .map(|&key| ConversionHandle(key))
    }

    pub fn by_name(&self, name: &str) -> Option<ConversionHandle> {
        self.by_name.get(name).map(|&key| ConversionHandle(key))
    }

    pub fn len(&self) -> usize {
        self.conversions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::NumericType;
    use crate::registry::Registry;

    fn noop(_: &[u8], _: &mut [u8], _: usize) {}

    #[test]
    fn collisions_are_auto_suffixed_by_default() {
        let mut types: Registry<NumericType> = Registry::new();
        let u8t = types.insert(NumericType {
            id: 0,
            name: "u8".into(),
            bits: 8,
            kind: crate::entity::NumKind::Integer,
            min: 0.0,
            max: 255.0,
        });
        let f32t = types.insert(NumericType {
            id: 0,
            name: "float".into(),
            bits: 32,
            kind: crate::entity::NumKind::Float,
            min: 0.0,
            max: 1.0,
        });

        let mut g = Graph::new();
        let a = g.register(ConversionSpec {
            id: 0,
            name: "u8-float".into(),
            source: GraphNode::Type(u8t),
            destination: GraphNode::Type(f32t),
            function: ConversionFn::Linear(noop),
            data: None,
            allow_collision: false,
        });
        let b = g.register(ConversionSpec {
            id: 0,
            name: "u8-float".into(),
            source: GraphNode::Type(u8t),
            destination: GraphNode::Type(f32t),
            function: ConversionFn::Linear(noop),
            data: None,
            allow_collision: false,
        });
        assert_ne!(a, b);
        assert_eq!(g.outgoing(GraphNode::Type(u8t)).count(), 2);
    }

    #[test]
    fn allow_collision_returns_pre_existing_edge() {
        let mut types: Registry<NumericType> = Registry::new();
        let u8t = types.insert(NumericType {
            id: 0,
            name: "u8".into(),
            bits: 8,
            kind: crate::entity::NumKind::Integer,
            min: 0.0,
            max: 255.0,
        });
        let f32t = types.insert(NumericType {
            id: 0,
            name: "float".into(),
            bits: 32,
            kind: crate::entity::NumKind::Float,
            min: 0.0,
            max: 1.0,
        });

        let mut g = Graph::new();
        let a = g.register(ConversionSpec {
            id: 0,
            name: "u8-float".into(),
            source: GraphNode::Type(u8t),
            destination: GraphNode::Type(f32t),
            function: ConversionFn::Linear(noop),
            data: None,
            allow_collision: false,
        });
        let b = g.register(ConversionSpec {
            id: 0,
            name: "u8-float-again".into(),
            source: GraphNode::Type(u8t),
            destination: GraphNode::Type(f32t),
            function: ConversionFn::Linear(noop),
            data: None,
            allow_collision: true,
        });
        assert_eq!(a, b);
        assert_eq!(g.outgoing(GraphNode::Type(u8t)).count(), 1);
    }

    #[test]
    fn error_starts_unmeasured() {
        let mut types: Registry<NumericType> = Registry::new();
        let u8t = types.insert(NumericType {
            id: 0,
            name: "u8".into(),
            bits: 8,
            kind: crate::entity::NumKind::Integer,
            min: 0.0,
            max: 255.0,
        });
        let mut g = Graph::new();
        let h = g.register(ConversionSpec {
            id: 0,
            name: "id".into(),
            source: GraphNode::Type(u8t),
            destination: GraphNode::Type(u8t),
            function: ConversionFn::Linear(noop),
            data: None,
            allow_collision: false,
        });
        assert!(!g.get(h).is_measured());
        assert_eq!(g.get(h).error(), UNMEASURED);
    }
}
