//! Error taxonomy.
//!
//! Programmer errors (unknown option, id/name collisions, missing
//! conversions for a registered type pair) are distinguished from
//! recoverable misses (no path found, unknown format name) only by which
//! constructor raises them; both are plain `Result` values here. A
//! "log and abort" policy for programmer errors is left to the caller
//! (`.expect(...)`); this library never aborts from within its own code.

use core::fmt;

/// Everything that can go wrong while building or looking up entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BablError {
    /// A builder received an option name it does not recognize.
    UnknownOption {
        constructor: &'static str,
        option: &'static str,
    },
    /// A builder received a value of the wrong kind for an option.
    TypeMismatch {
        constructor: &'static str,
        expected: &'static str,
    },
    /// Two entities were registered with the same non-zero id but different
    /// names.
    IdNameCollision {
        id: u32,
        existing: String,
        requested: String,
    },
    /// No conversion path exists between two formats at the active
    /// tolerance (a recoverable miss; `Babl::fish` never returns this since
    /// it always falls back to the reference converter, but builders that
    /// eagerly resolve companion conversions can).
    NoConversionPath { from: String, to: String },
    /// A format/model/space/type name was not found in the registry.
    UnknownFormat { name: String },
    /// A builder was missing a required field (e.g. no conversion function
    /// of any kind was supplied).
    MissingOption {
        constructor: &'static str,
        option: &'static str,
    },
}

impl fmt::Display for BablError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownOption { constructor, option } => {
                write!(f, "{constructor}: unknown option `{option}`")
            }
            Self::TypeMismatch { constructor, expected } => {
                write!(f, "{constructor}: expected a value of type {expected}")
            }
            Self::IdNameCollision { id, existing, requested } => write!(
                f,
                "id {id} already registered under name `{existing}`, refusing to rebind to `{requested}`"
            ),
            Self::NoConversionPath { from, to } => {
                write!(f, "no conversion path from `{from}` to `{to}`")
            }
            Self::UnknownFormat { name } => write!(f, "unknown format `{name}`"),
            Self::MissingOption { constructor, option } => {
                write!(f, "{constructor}: missing required option `{option}`")
            }
        }
    }
}

impl std::error::Error for BablError {}

pub type Result<T> = core::result::Result<T, BablError>;
