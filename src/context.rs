//! The `Babl` context: owns every registry, the conversion graph, and the
//! fish cache.
//!
//! There is no process-wide singleton forced on callers: [`Babl::new`]
//! builds an independent context,
//! and [`Babl::default_context`] lazily builds one shared instance for
//! callers happy with the ambient default (mirroring how `env_logger::init`
//! is typically called once and then ignored).

use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

use log::debug;

use crate::cache::FishCache;
use crate::entity::{ColorModel, ColorSpace, Component, NumericType, PixelFormat};
use crate::error::{BablError, Result};
use crate::fish::Fish;
use crate::graph::Graph;
use crate::registry::{Handle, Registry};

/// Runtime configuration, normally taken from the environment but
/// overridable for tests.
#[derive(Debug, Clone)]
pub struct Config {
    /// `BABL_PATH_LENGTH`: default depth bound for path search.
    pub path_length: u32,
    /// `BABL_TOLERANCE`: maximum acceptable measured error for a path.
    pub tolerance: f64,
    /// `BABL_DEBUG_CONVERSIONS`: log every conversion considered during search.
    pub debug_conversions: bool,
    /// `BABL_INSTRUMENT`: record per-conversion pixel counters (always
    /// tracked internally; this only controls whether they get logged).
    pub instrument: bool,
    /// `BABL_REFERENCE_NOFLOAT`: force the double-precision reference path
    /// even when the float shortcut would apply.
    pub reference_nofloat: bool,
    /// Resolved cache directory (`XDG_CACHE_HOME` / `HOME` / temp dir).
    pub cache_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            path_length: 4,
            tolerance: 4.7e-6,
            debug_conversions: false,
            instrument: false,
            reference_nofloat: false,
            cache_dir: None,
        }
    }
}

impl Config {
    /// Read overrides from the environment, falling back to the hard-coded
    /// defaults above.
    pub fn from_env() -> Self {
        let mut cfg = Config::default();
        if let Ok(v) = env::var("BABL_PATH_LENGTH") {
            if let Ok(n) = v.parse::<u32>() {
                cfg.path_length = n.clamp(1, 8);
            }
        }
        if let Ok(v) = env::var("BABL_TOLERANCE") {
            if let Ok(t) = v.parse::<f64>() {
                cfg.tolerance = t;
            }
        }
        cfg.debug_conversions = env_flag("BABL_DEBUG_CONVERSIONS");
        cfg.instrument = env_flag("BABL_INSTRUMENT");
        cfg.reference_nofloat = env_flag("BABL_REFERENCE_NOFLOAT");
        cfg.cache_dir = resolve_cache_dir();
        cfg
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name).map(|v| v != "0" && !v.is_empty()).unwrap_or(false)
}

/// `XDG_CACHE_HOME/babl` → `$HOME/.cache/babl` → a subdirectory of the
/// system temp dir. Hand-rolled rather than pulling in `dirs` (see
/// DESIGN.md).
fn resolve_cache_dir() -> Option<PathBuf> {
    if let Ok(xdg) = env::var("XDG_CACHE_HOME") {
        if !xdg.is_empty() {
            return Some(PathBuf::from(xdg).join("babl"));
        }
    }
    if let Ok(home) = env::var("HOME") {
        if !home.is_empty() {
            return Some(PathBuf::from(home).join(".cache").join("babl"));
        }
    }
    Some(env::temp_dir().join("babl-cache"))
}

/// Conversion quality as a closed enum rather than stringly-typed tags.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Quality {
    /// Whatever the active `Config::tolerance` says.
    Default,
    Exact,
    Precise,
    Fast,
    Glitch,
    /// An explicit tolerance overriding the context default.
    Tolerance(f64),
}

impl Quality {
    pub fn tolerance(self, base: f64) -> f64 {
        match self {
            Quality::Default => base,
            Quality::Exact => 1e-10,
            Quality::Precise => 1e-5,
            Quality::Fast => 1e-3,
            Quality::Glitch => 1e-2,
            Quality::Tolerance(t) => t,
        }
    }
}

/// The top-level context: every registry, the conversion graph, the fish
/// cache, and the mutexes guarding concurrent mutation.
pub struct Babl {
    pub(crate) types: Registry<NumericType>,
    pub(crate) components: Registry<Component>,
    pub(crate) models: Registry<ColorModel>,
    pub(crate) spaces: Registry<ColorSpace>,
    pub(crate) formats: Registry<PixelFormat>,
    pub(crate) graph: Graph,
    /// Guards format/model/space/type registration, not needed for the
    /// read-only lookups that dominate steady-state use.
    format_mutex: Mutex<()>,
    /// Guards cache mutation and path search; doubles as the search
    /// serialization point since both the reference converter and the
    /// path search are pure functions of already-registered state and
    /// need no lock of their own.
    search_mutex: Mutex<()>,
    cache: Mutex<FishCache>,
    pub(crate) config: Config,
    next_id: AtomicU64,
    /// Counts how many times [`Babl::fast_fish`] actually ran path search
    /// rather than returning a cache hit or the identity shortcut. Exposed
    /// so callers (and tests) can observe "did this repeat `fish()` call
    /// avoid search" without needing `BABL_DEBUG_CONVERSIONS` logging.
    search_invocations: AtomicU64,
}

impl Babl {
    /// Build a fresh, independent context with every built-in entity and
    /// conversion registered.
    pub fn new() -> Self {
        Self::with_config(Config::from_env())
    }

    pub fn with_config(config: Config) -> Self {
        let cache = FishCache::load(config.cache_dir.as_deref(), config.tolerance);
        let mut babl = Babl {
            types: Registry::new(),
            components: Registry::new(),
            models: Registry::new(),
            spaces: Registry::new(),
            formats: Registry::new(),
            graph: Graph::new(),
            format_mutex: Mutex::new(()),
            search_mutex: Mutex::new(()),
            cache: Mutex::new(cache),
            config,
            next_id: AtomicU64::new(1),
            search_invocations: AtomicU64::new(0),
        };
        crate::builtin::register_all(&mut babl);
        babl
    }

    /// A process-wide default context, built once on first use.
    pub fn default_context() -> &'static Babl {
        static DEFAULT: OnceLock<Babl> = OnceLock::new();
        DEFAULT.get_or_init(Babl::new)
    }

    pub(crate) fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed) as u32
    }

    // --- lookups -------------------------------------------------------

    pub fn format(&self, name: &str) -> Option<Handle<PixelFormat>> {
        self.formats.lookup(name)
    }

    pub fn model(&self, name: &str) -> Option<Handle<ColorModel>> {
        self.models.lookup(name)
    }

    pub fn space(&self, name: &str) -> Option<Handle<ColorSpace>> {
        self.spaces.lookup(name)
    }

    pub fn numeric_type(&self, name: &str) -> Option<Handle<NumericType>> {
        self.types.lookup(name)
    }

    pub fn format_or_err(&self, name: &str) -> Result<Handle<PixelFormat>> {
        self.format(name).ok_or_else(|| BablError::UnknownFormat { name: name.to_owned() })
    }

    /// Bytes occupied by one pixel of `format`; callers use this to size
    /// their own input/output buffers before calling [`Fish::process`].
    pub fn format_bytes_per_pixel(&self, format: Handle<PixelFormat>) -> usize {
        self.formats.get(format).bytes_per_pixel
    }

    // --- registration (format_mutex held) --------------------------------

    pub fn register_type(&mut self, ty: NumericType) -> Handle<NumericType> {
        let _guard = self.format_mutex.lock().unwrap();
        self.types.insert(ty)
    }

    pub fn register_component(&mut self, c: Component) -> Handle<Component> {
        let _guard = self.format_mutex.lock().unwrap();
        self.components.insert(c)
    }

    pub fn register_model(&mut self, m: ColorModel) -> Handle<ColorModel> {
        let _guard = self.format_mutex.lock().unwrap();
        self.models.insert(m)
    }

    pub fn register_space(&mut self, s: ColorSpace) -> Handle<ColorSpace> {
        let _guard = self.format_mutex.lock().unwrap();
        self.spaces.insert(s)
    }

    pub fn register_format(&mut self, f: PixelFormat) -> Handle<PixelFormat> {
        let _guard = self.format_mutex.lock().unwrap();
        self.formats.insert(f)
    }

    pub fn register_conversion(&mut self, spec: crate::graph::ConversionSpec) -> crate::graph::ConversionHandle {
        let _guard = self.format_mutex.lock().unwrap();
        self.graph.register(spec)
    }

    // --- dispatch --------------------------------------------------------

    /// Build (or retrieve from cache) a [`Fish`] converting `src` to `dst`
    /// at the context's default tolerance.
    pub fn fish(&self, src: Handle<PixelFormat>, dst: Handle<PixelFormat>) -> Fish {
        self.fast_fish(src, dst, Quality::Default)
    }

    /// Same as [`Babl::fish`] but with an explicit [`Quality`].
    pub fn fast_fish(&self, src: Handle<PixelFormat>, dst: Handle<PixelFormat>, quality: Quality) -> Fish {
        let tolerance = quality.tolerance(self.config.tolerance);

        if src == dst {
            return Fish::memcpy(src, self.formats.get(src).bytes_per_pixel);
        }

        {
            let cache = self.cache.lock().unwrap();
            if let Some(hit) = cache.lookup(self, src, dst, tolerance) {
                return hit;
            }
        }

        let _guard = self.search_mutex.lock().unwrap();
        // Re-check: another thread may have populated the cache while we
        // waited for the lock. Best-effort, not authoritative.
        {
            let cache = self.cache.lock().unwrap();
            if let Some(hit) = cache.lookup(self, src, dst, tolerance) {
                return hit;
            }
        }

        if self.config.debug_conversions {
            debug!("searching for a path {src:?} -> {dst:?} at tolerance {tolerance}");
        }

        self.search_invocations.fetch_add(1, Ordering::Relaxed);
        let fish = crate::search::find_fish(self, src, dst, tolerance, self.config.path_length);
        let mut cache = self.cache.lock().unwrap();
        cache.insert(self, src, dst, tolerance, fish.clone());
        fish
    }

    /// Persist the in-memory cache to disk, if a cache directory is
    /// configured.
    pub fn flush_cache(&self) -> std::io::Result<()> {
        let cache = self.cache.lock().unwrap();
        cache.store(self.config.cache_dir.as_deref(), self.config.tolerance)
    }

    /// How many times [`Babl::fish`]/[`Babl::fast_fish`] actually invoked
    /// path search on this context, rather than hitting the cache or the
    /// identity shortcut.
    pub fn search_invocations(&self) -> u64 {
        self.search_invocations.load(Ordering::Relaxed)
    }
}

impl Default for Babl {
    fn default() -> Self {
        Babl::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_maps_to_tighter_tolerances() {
        assert!(Quality::Exact.tolerance(1e-3) < Quality::Fast.tolerance(1e-3));
    }

    #[test]
    fn resolve_cache_dir_never_panics() {
        let _ = resolve_cache_dir();
    }
}
