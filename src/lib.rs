//! GL-friendly BSP node builder for Doom-engine levels.
//!
//! Give it a WAD, get the same WAD back with freshly compiled SEGS,
//! SSECTORS, NODES, BLOCKMAP and REJECT lumps plus the `GL_xxx`
//! section (GL segs carry the minisegs an OpenGL renderer needs).
//!
//! ```no_run
//! use glnodes_rs::{BuildInfo, Comms, Driver, StdLog, Wad};
//!
//! let mut wad = Wad::from_file("doom.wad")?;
//! let log = StdLog { quiet: false, show_mini: false };
//! let mut driver = Driver::new(BuildInfo::default(), Comms::new(), &log);
//! driver.run(&mut wad)?;
//! wad.write_to_file("doom-built.wad")?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod bsp;
pub mod geom;
pub mod wad;

pub use bsp::driver::{Driver, LevelReport, RunSummary};
pub use bsp::{BuildError, BuildInfo, Comms, Log, NullLog, StdLog};
pub use wad::{Wad, WadError};
