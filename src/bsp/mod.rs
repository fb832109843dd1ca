//! The node builder proper: everything between "lumps in" and
//! "lumps out".
//!
//! The submodules follow the pipeline order: [`load`] fills the
//! [`store::Level`], [`analyse`] canonicalises it, [`build`] recurses
//! with [`picker`]/[`split`]/[`superblock`] underneath, [`finalise`]
//! cleans the tree up, [`blockmap`]/[`reject`] add the acceleration
//! lumps, and [`save`] writes everything back through [`crate::wad`].
//! [`driver`] orchestrates the whole dance per level.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

pub mod analyse;
pub mod blockmap;
pub mod build;
pub mod driver;
pub mod finalise;
pub mod load;
pub mod picker;
pub mod reject;
pub mod save;
pub mod split;
pub mod store;
pub mod superblock;

/// Factor used when none is given on the command line.
pub const DEFAULT_FACTOR: i32 = 11;

/// How one run of the builder is configured.  Threaded explicitly
/// through the driver, analyser, picker and recursor.
#[derive(Clone, Debug)]
pub struct BuildInfo {
    /// Cost multiplier for seg splits (valid range 1..=32).
    pub factor: i32,

    /// GL spec version: 1, 2 (default), 3 or 5.
    pub spec_version: u8,

    pub no_reject: bool,
    pub mini_warnings: bool,
    pub force_hexen: bool,

    /// Merge duplicate sidedefs (`-pack`).
    pub pack_sides: bool,
    /// Merge duplicate vertices (`-mergevert`).
    pub merge_vert: bool,
    /// Skip pruning of linedefs/sidedefs (`-noprune`).
    pub no_prune: bool,
    /// Also prune unused sectors (`-prunesec`).
    pub prune_sect: bool,

    pub no_normal: bool,
    pub force_normal: bool,
    /// Output is a GWA companion: only GL lumps are produced.
    pub gwa_mode: bool,

    /// Reuse original nodes as partition hints when building GL-only.
    pub fast: bool,

    /// Maximum number of blockmap cells (1000..=64000).
    pub block_limit: i32,

    /// Tolerate blockmap offsets past 65535 (legacy engines corrupt).
    pub allow_blockmap_overflow: bool,
}

impl Default for BuildInfo {
    fn default() -> BuildInfo {
        BuildInfo {
            factor: DEFAULT_FACTOR,
            spec_version: 2,
            no_reject: false,
            mini_warnings: false,
            force_hexen: false,
            pack_sides: false,
            merge_vert: false,
            no_prune: false,
            prune_sect: false,
            no_normal: false,
            force_normal: false,
            gwa_mode: false,
            fast: false,
            block_limit: 16_000,
            allow_blockmap_overflow: false,
        }
    }
}

impl BuildInfo {
    /// Clamp out-of-range values back to their defaults, reporting each
    /// correction.  Mirrors the "bad args are fixed, not fatal" rule.
    pub fn sanitise(&mut self) -> Vec<String> {
        let mut fixed = Vec::new();

        if !(1..=32).contains(&self.factor) {
            fixed.push(format!(
                "factor {} out of range (1..32), using {}",
                self.factor, DEFAULT_FACTOR
            ));
            self.factor = DEFAULT_FACTOR;
        }

        if !matches!(self.spec_version, 1 | 2 | 3 | 5) {
            fixed.push(format!(
                "spec version {} unsupported, using 2",
                self.spec_version
            ));
            self.spec_version = 2;
        }

        if !(1000..=64_000).contains(&self.block_limit) {
            fixed.push(format!(
                "block limit {} out of range (1000..64000), using 16000",
                self.block_limit
            ));
            self.block_limit = 16_000;
        }

        if self.no_normal && self.force_normal {
            fixed.push("both -normal and -nonormal given, keeping -normal".into());
            self.no_normal = false;
        }

        fixed
    }
}

/// Two-way channel with the host: the cancel flag is the only datum
/// another thread may legitimately write.
#[derive(Clone, Debug, Default)]
pub struct Comms {
    cancelled: Arc<AtomicBool>,
}

impl Comms {
    pub fn new() -> Comms {
        Comms::default()
    }

    /// May be called from any thread (e.g. a UI).
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Host callbacks: diagnostics and the keep-the-UI-alive ticker.
/// Never called from tight inner loops, only between passes.
pub trait Log {
    fn msg(&self, _text: &str) {}
    fn verbose(&self, _text: &str) {}
    fn warn(&self, _text: &str) {}
    /// Minor warnings, shown only when `mini_warnings` is on.
    fn mini_warn(&self, _text: &str) {}
    fn ticker(&self) {}
}

/// Discards everything; handy default and test double.
pub struct NullLog;

impl Log for NullLog {}

/// Prints to stdout/stderr the way the command-line front end wants.
pub struct StdLog {
    pub quiet: bool,
    pub show_mini: bool,
}

impl Log for StdLog {
    fn msg(&self, text: &str) {
        println!("{text}");
    }

    fn verbose(&self, text: &str) {
        if !self.quiet {
            println!("{text}");
        }
    }

    fn warn(&self, text: &str) {
        eprintln!("Warning: {text}");
    }

    fn mini_warn(&self, text: &str) {
        if self.show_mini {
            eprintln!("Warning: {text}");
        }
    }
}

/// Everything the pipeline needs to see, bundled so signatures stay flat.
pub struct Ctx<'a> {
    pub info: &'a BuildInfo,
    pub comms: &'a Comms,
    pub log: &'a dyn Log,
}

impl Ctx<'_> {
    #[inline]
    pub fn cancelled(&self) -> bool {
        self.comms.cancelled()
    }
}

bitflags::bitflags! {
    /// Output-format limits a level ran into.  "Soft" limits only break
    /// the original engine; "hard" ones break every port.  Accumulated
    /// per level and reported at the end of the run.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Limits: u32 {
        const VERTEXES  = 1 << 0;
        const SECTORS   = 1 << 1;
        const SIDEDEFS  = 1 << 2;
        const LINEDEFS  = 1 << 3;
        const SEGS      = 1 << 4;
        const SSECTORS  = 1 << 5;
        const NODES     = 1 << 6;
        const GL_VERT   = 1 << 7;
        const GL_SEGS   = 1 << 8;
        const GL_SSECT  = 1 << 9;
        const GL_NODES  = 1 << 10;
        const BAD_SIDE  = 1 << 11;
        const BMAP_TRUNC = 1 << 12;
        const BMAP_OVERFLOW = 1 << 13;
    }
}

/// Per-level accumulation of limit problems.
#[derive(Debug, Clone, Default)]
pub struct LevelLimits {
    pub soft: Limits,
    pub hard: Limits,
    /// Limits that forced a silent V5 format switch.
    pub v5_switch: Limits,
}

impl LevelLimits {
    pub fn mark_soft(&mut self, limit: Limits) {
        self.soft |= limit;
    }

    pub fn mark_hard(&mut self, limit: Limits) {
        self.hard |= limit;
    }

    pub fn mark_v5(&mut self, limit: Limits) {
        self.v5_switch |= limit;
    }
}

/// Single result type for the whole builder.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("build cancelled")]
    Cancelled,

    #[error("load error: {0}")]
    Load(String),

    #[error("blockmap offset table overflowed 16 bits")]
    BlockmapOverflow,

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Wad(#[from] crate::wad::WadError),
}

impl BuildError {
    pub fn internal(text: impl Into<String>) -> BuildError {
        BuildError::Internal(text.into())
    }

    pub fn load(text: impl Into<String>) -> BuildError {
        BuildError::Load(text.into())
    }
}

pub type BuildResult<T> = Result<T, BuildError>;

/*============================== Tests ================================*/
