//! Raw on-disk record layouts for every lump the builder touches.
//!
//! All fields are little-endian on disk; decoding/encoding goes through
//! **bincode 2** with fixed-int little-endian config, so each struct
//! here mirrors the wire layout byte for byte (`#[repr(C)]`, no padding).

use bincode::{Decode, Encode, config, decode_from_slice, encode_into_slice};

/// `0xFFFF` means "absent" in sidedef / vertex / partner references.
pub const NO_INDEX: u16 = 0xFFFF;

/// Two-sided linedef flag (bit 2).
pub const LINEFLAG_TWO_SIDED: u16 = 0x0004;

/// Lower-unpegged linedef flag, applied to two-sided polyobj lines.
pub const LINEFLAG_LOWER_UNPEG: u16 = 0x0010;

/// Hexen line specials that spawn polyobjs.
pub const HEXTYPE_POLY_START: u16 = 1;
pub const HEXTYPE_POLY_EXPLICIT: u16 = 5;

/// Hexen / ZDoom polyobj thing types.
pub const PO_ANCHOR_TYPE: u16 = 3000;
pub const PO_SPAWN_TYPE: u16 = 3001;
pub const PO_SPAWNCRUSH_TYPE: u16 = 3002;
pub const ZDOOM_PO_ANCHOR_TYPE: u16 = 9300;
pub const ZDOOM_PO_SPAWN_TYPE: u16 = 9301;
pub const ZDOOM_PO_SPAWNCRUSH_TYPE: u16 = 9302;

/*---------------------------- map lumps ------------------------------*/

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Decode, Encode)]
pub struct RawVertex {
    pub x: i16,
    pub y: i16,
}

/// V2/V5 GL vertex: 16.16 fixed point.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Decode, Encode)]
pub struct RawV2Vertex {
    pub x: i32,
    pub y: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Decode, Encode)]
pub struct RawLinedef {
    pub start: u16,
    pub end: u16,
    pub flags: u16,
    pub line_type: u16,
    pub tag: i16,
    pub right: u16,
    pub left: u16,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Decode, Encode)]
pub struct RawHexenLinedef {
    pub start: u16,
    pub end: u16,
    pub flags: u16,
    pub line_type: u8,
    pub args: [u8; 5],
    pub right: u16,
    pub left: u16,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Decode, Encode)]
pub struct RawSidedef {
    pub x_offset: i16,
    pub y_offset: i16,
    pub upper_tex: [u8; 8],
    pub lower_tex: [u8; 8],
    pub mid_tex: [u8; 8],
    pub sector: u16,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Decode, Encode)]
pub struct RawSector {
    pub floor_h: i16,
    pub ceil_h: i16,
    pub floor_tex: [u8; 8],
    pub ceil_tex: [u8; 8],
    pub light: u16,
    pub special: u16,
    pub tag: i16,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Decode, Encode)]
pub struct RawThing {
    pub x: i16,
    pub y: i16,
    pub angle: i16,
    pub thing_type: u16,
    pub options: u16,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Decode, Encode)]
pub struct RawHexenThing {
    pub tid: i16,
    pub x: i16,
    pub y: i16,
    pub height: i16,
    pub angle: i16,
    pub thing_type: u16,
    pub options: u16,
    pub special: u8,
    pub args: [u8; 5],
}

/*---------------------------- BSP lumps ------------------------------*/

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Decode, Encode)]
pub struct RawSeg {
    pub start: u16,
    pub end: u16,
    pub angle: u16,
    pub linedef: u16,
    pub flip: u16,
    pub dist: u16,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Decode, Encode)]
pub struct RawGlSeg {
    pub start: u16,
    pub end: u16,
    pub linedef: u16,
    pub side: u16,
    pub partner: u16,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Decode, Encode)]
pub struct RawV3Seg {
    pub start: u32,
    pub end: u32,
    pub linedef: u16,
    pub side: u16,
    pub partner: u32,
}

/// On-disk bbox order is top, bottom, left, right.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Decode, Encode)]
pub struct RawBbox {
    pub maxy: i16,
    pub miny: i16,
    pub minx: i16,
    pub maxx: i16,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Decode, Encode)]
pub struct RawNode {
    pub x: i16,
    pub y: i16,
    pub dx: i16,
    pub dy: i16,
    pub b1: RawBbox,
    pub b2: RawBbox,
    pub right: u16,
    pub left: u16,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Decode, Encode)]
pub struct RawV5Node {
    pub x: i16,
    pub y: i16,
    pub dx: i16,
    pub dy: i16,
    pub b1: RawBbox,
    pub b2: RawBbox,
    pub right: u32,
    pub left: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Decode, Encode)]
pub struct RawSubsec {
    pub num: u16,
    pub first: u16,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Decode, Encode)]
pub struct RawV3Subsec {
    pub num: u32,
    pub first: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Decode, Encode)]
pub struct RawBlockmapHeader {
    pub x_origin: i16,
    pub y_origin: i16,
    pub x_blocks: u16,
    pub y_blocks: u16,
}

/*------------------------- de/encode helpers -------------------------*/

fn wire_config() -> impl config::Config {
    config::standard()
        .with_fixed_int_encoding()
        .with_little_endian()
}

/// Decode a whole lump into a vector of fixed-size records.
/// Returns `None` when the lump length is not a record multiple.
pub fn decode_lump<T: Decode<()>>(bytes: &[u8]) -> Option<Vec<T>> {
    let elem = std::mem::size_of::<T>();

    if elem == 0 || bytes.len() % elem != 0 {
        return None;
    }

    let cfg = wire_config();
    let mut out = Vec::with_capacity(bytes.len() / elem);
    let mut slice = bytes;

    while !slice.is_empty() {
        let (val, read) = decode_from_slice::<T, _>(slice, cfg).ok()?;
        out.push(val);
        slice = &slice[read..];
    }
    Some(out)
}

/// Append one record to a lump under construction.
pub fn encode_record<T: Encode>(out: &mut Vec<u8>, val: &T) {
    let elem = std::mem::size_of::<T>();
    let at = out.len();
    out.resize(at + elem, 0);

    // encoding a fixed-size record into an exact-size slice cannot fail
    let written = encode_into_slice(val, &mut out[at..], wire_config())
        .expect("fixed-size record encode");
    debug_assert_eq!(written, elem);
}

/*============================== Tests ================================*/
