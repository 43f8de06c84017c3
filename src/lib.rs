//! A universal pixel-format conversion library: register numeric types,
//! components, color models, color spaces, and pixel formats, then ask for
//! a [`fish::Fish`] converting between any two registered formats.
//!
//! ```no_run
//! use pixelfish::Babl;
//!
//! let babl = Babl::new();
//! let rgba_u8 = babl.format("rgba-u8").unwrap();
//! let rgba_double = babl.format("rgba-double").unwrap();
//! let fish = babl.fish(rgba_u8, rgba_double);
//! let input = vec![255u8, 0, 0, 255];
//! let out = fish.process(&babl, &input, 1);
//! assert_eq!(out.len(), 32);
//! ```

pub mod builtin;
pub mod cache;
pub mod context;
pub mod corpus;
pub mod entity;
pub mod error;
pub mod fish;
pub mod graph;
pub mod measure;
pub mod reference;
pub mod registry;
pub mod search;

pub use context::{Babl, Config, Quality};
pub use error::{BablError, Result};
pub use fish::Fish;
pub use registry::Handle;
