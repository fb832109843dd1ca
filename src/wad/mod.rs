pub mod archive;
pub mod raw;

pub use archive::{Lump, Wad, WadError, WadKind, name_str};
