//! Arena-owned level entities with stable indices.
//!
//! Everything in a level lives in one of the `Vec` arenas below and is
//! referenced *by index* everywhere else -- never by address.  Indices
//! stay stable for the lifetime of a level; pruning passes that drop
//! entities rebuild the arena and remap the (few) referencing fields
//! before any segs exist.  Cross-linked structures (wall-tip fans,
//! reject rings, superblock seg lists) are expressed as index links.

use bitflags::bitflags;
use glam::DVec2;

use crate::geom;

pub type VertexId = usize;
pub type LinedefId = usize;
pub type SidedefId = usize;
pub type SectorId = usize;
pub type ThingId = usize;
pub type SegId = usize;
pub type SubsecId = usize;
pub type NodeId = usize;
pub type StaleNodeId = usize;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LinedefFlags: u16 {
        const IMPASSABLE      = 0x0001;
        const BLOCK_MONSTERS  = 0x0002;
        const TWO_SIDED       = 0x0004;
        const UPPER_UNPEGGED  = 0x0010;
        const LOWER_UNPEGGED  = 0x0020;
        const SECRET          = 0x0040;
        const BLOCK_SOUND     = 0x0080;
        const NOT_ON_MAP      = 0x0200;
        const ALREADY_ON_MAP  = 0x1000;

        const _ = !0;   // preserve unknown bits across the rewrite
    }
}

/*--------------------------- wall tips -------------------------------*/

/// A (wall, vertex) incidence.  `left` is the sector on the side of
/// increasing angles, `right` on the side of decreasing angles; either
/// may be `None` for one-sided walls or void.
#[derive(Clone, Copy, Debug)]
pub struct WallTip {
    pub angle: f64,
    pub left: Option<SectorId>,
    pub right: Option<SectorId>,
}

/*--------------------------- map entities ----------------------------*/

#[derive(Clone, Debug)]
pub struct Vertex {
    pub pos: DVec2,

    /// Output index (within the normal or the GL vertex namespace).
    pub index: usize,
    /// Split vertices go into the GL namespace.
    pub is_gl: bool,

    pub ref_count: i32,

    /// Canonical duplicate, `None` when this vertex is itself canonical.
    pub equiv: Option<VertexId>,

    /// Wall-tip fan, kept sorted by ascending angle.
    pub tips: Vec<WallTip>,

    /// Rounded-integer twin used when normal and GL output are built
    /// together (the twin goes into the normal VERTEXES lump).
    pub normal_dup: Option<VertexId>,
}

#[derive(Clone, Debug)]
pub struct Linedef {
    pub start: VertexId,
    pub end: VertexId,

    pub right: Option<SidedefId>,
    pub left: Option<SidedefId>,

    pub flags: LinedefFlags,
    pub line_type: u16,
    pub tag: i16,
    /// Hexen specials (args); all zero for Doom-format maps.
    pub args: [u8; 5],

    pub two_sided: bool,
    pub is_precious: bool,
    pub zero_len: bool,
    pub self_ref: bool,
    pub window_effect: bool,
    /// Member of a polyobj (set during polyobj discovery).
    pub polyobj: bool,

    /// Overlapping twin: the earlier linedef covering the same span.
    pub overlap: Option<LinedefId>,

    pub index: usize,
}

#[derive(Clone, Debug)]
pub struct Sidedef {
    pub sector: Option<SectorId>,

    pub x_offset: i16,
    pub y_offset: i16,

    pub upper_tex: [u8; 8],
    pub lower_tex: [u8; 8],
    pub mid_tex: [u8; 8],

    pub ref_count: i32,
    pub equiv: Option<SidedefId>,

    /// Sidedefs on special lines are never merged.
    pub on_special: bool,

    pub index: usize,
}

#[derive(Clone, Debug)]
pub struct Sector {
    pub floor_h: i16,
    pub ceil_h: i16,

    pub floor_tex: [u8; 8],
    pub ceil_tex: [u8; 8],

    pub light: u16,
    pub special: u16,
    pub tag: i16,

    /// Tag in [900,1000): segs from other sectors may share a subsector.
    pub coalesce: bool,

    pub ref_count: i32,
    pub has_polyobj: bool,

    pub warned_unclosed: bool,
    pub warned_facing: Option<SectorId>,

    /// Reject grouping: group id plus a ring of sectors in the group.
    pub rej_group: usize,
    pub rej_next: SectorId,
    pub rej_prev: SectorId,

    pub index: usize,
}

#[derive(Clone, Copy, Debug)]
pub struct Thing {
    pub x: i16,
    pub y: i16,
    pub angle: i16,
    pub thing_type: u16,
    pub options: u16,
    pub index: usize,
}

/*--------------------------- BSP entities ----------------------------*/

#[derive(Clone, Debug)]
pub struct Seg {
    pub start: VertexId,
    pub end: VertexId,

    /// `None` for minisegs.
    pub linedef: Option<LinedefId>,
    /// Adjacent sector; `None` for invalid sidedefs and void minisegs.
    pub sector: Option<SectorId>,

    /// 0 = right of the linedef, 1 = left.
    pub side: u16,

    /// Opposite-side seg; strictly one-to-one.
    pub partner: Option<SegId>,

    /// Output index, assigned at finalisation.
    pub index: Option<usize>,

    /// Became zero-length under integer rounding.
    pub degenerate: bool,

    /// Superblock currently holding this seg.
    pub block: Option<super::superblock::SuperId>,

    /// Next seg in whichever intrusive list owns this seg.
    pub next: Option<SegId>,

    /// Linedef this seg originally comes from; for minisegs this is the
    /// partition's linedef.
    pub source_line: Option<LinedefId>,

    // precomputed for fast distance checks
    pub psx: f64,
    pub psy: f64,
    pub pex: f64,
    pub pey: f64,
    pub pdx: f64,
    pub pdy: f64,
    pub p_length: f64,
    pub p_angle: f64,
    pub p_perp: f64,
    pub p_para: f64,
}

impl Seg {
    /// Perpendicular distance from `(x, y)` to this seg's line.
    /// Positive = right side.
    #[inline]
    pub fn perp_dist(&self, x: f64, y: f64) -> f64 {
        (x * self.pdy - y * self.pdx + self.p_perp) / self.p_length
    }

    /// Distance along this seg's line, zero at the seg's start point.
    #[inline]
    pub fn para_dist(&self, x: f64, y: f64) -> f64 {
        (x * self.pdx + y * self.pdy + self.p_para) / self.p_length
    }
}

#[derive(Clone, Debug)]
pub struct Subsec {
    /// Head of the seg list (clockwise after finalisation).
    pub seg_list: Option<SegId>,
    pub seg_count: usize,
    pub index: usize,
    /// Approximate centre.
    pub mid: DVec2,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Bbox {
    pub minx: i32,
    pub miny: i32,
    pub maxx: i32,
    pub maxy: i32,
}

impl Bbox {
    pub fn empty() -> Bbox {
        Bbox {
            minx: i16::MAX as i32,
            miny: i16::MAX as i32,
            maxx: i16::MIN as i32,
            maxy: i16::MIN as i32,
        }
    }

    pub fn add_point(&mut self, x: f64, y: f64) {
        self.minx = self.minx.min(x.floor() as i32);
        self.miny = self.miny.min(y.floor() as i32);
        self.maxx = self.maxx.max(x.ceil() as i32);
        self.maxy = self.maxy.max(y.ceil() as i32);
    }
}

/// A node child is *either* an inner node or a subsector leaf.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BspChild {
    Node(NodeId),
    Subsec(SubsecId),
}

#[derive(Clone, Copy, Debug)]
pub struct Child {
    pub child: BspChild,
    pub bounds: Bbox,
}

#[derive(Clone, Debug)]
pub struct Node {
    pub x: i32,
    pub y: i32,
    pub dx: i32,
    pub dy: i32,

    pub right: Child,
    pub left: Child,

    /// Assigned in post-order when the NODES lump is written.
    pub index: Option<usize>,

    /// Partition length >= 30000: emitted dx/dy are halved.
    pub too_long: bool,
}

/// An original node read back for the fast GL-only path.
#[derive(Clone, Copy, Debug, Default)]
pub struct StaleNode {
    pub x: i32,
    pub y: i32,
    pub dx: i32,
    pub dy: i32,
    pub right: Option<StaleNodeId>,
    pub left: Option<StaleNodeId>,
}

/// A Hexen polyobj discovered during analysis.
#[derive(Clone, Debug)]
pub struct Polyobj {
    pub tag: i16,
    pub seq_type: u8,
    pub anchor_x: i16,
    pub anchor_y: i16,
    /// Member linedefs in discovery order.
    pub lines: Vec<LinedefId>,
}

/*--------------------------- the store -------------------------------*/

/// Everything a single level owns; torn down en masse at level end.
#[derive(Debug, Default)]
pub struct Level {
    pub verts: Vec<Vertex>,
    pub lines: Vec<Linedef>,
    pub sides: Vec<Sidedef>,
    pub sectors: Vec<Sector>,
    pub things: Vec<Thing>,

    pub segs: Vec<Seg>,
    pub subsecs: Vec<Subsec>,
    pub nodes: Vec<Node>,
    pub stale_nodes: Vec<StaleNode>,
    pub polyobjs: Vec<Polyobj>,

    /// Count of vertices in the normal (non-GL) namespace.
    pub num_normal_vert: usize,
    /// Count of vertices in the GL namespace.
    pub num_gl_vert: usize,
    /// Segs that reached a subsector in the last renumber pass.
    pub num_complete_seg: usize,

    pub doing_normal: bool,
    pub doing_hexen: bool,
}

impl Level {
    pub fn new() -> Level {
        Level::default()
    }

    /*----------------------- constructors ----------------------------*/

    pub fn new_vertex(&mut self, pos: DVec2) -> VertexId {
        let id = self.verts.len();
        self.verts.push(Vertex {
            pos,
            index: 0,
            is_gl: false,
            ref_count: 0,
            equiv: None,
            tips: Vec::new(),
            normal_dup: None,
        });
        id
    }

    pub fn new_seg(&mut self) -> SegId {
        let id = self.segs.len();
        self.segs.push(Seg {
            start: 0,
            end: 0,
            linedef: None,
            sector: None,
            side: 0,
            partner: None,
            index: None,
            degenerate: false,
            block: None,
            next: None,
            source_line: None,
            psx: 0.0,
            psy: 0.0,
            pex: 0.0,
            pey: 0.0,
            pdx: 0.0,
            pdy: 0.0,
            p_length: 0.0,
            p_angle: 0.0,
            p_perp: 0.0,
            p_para: 0.0,
        });
        id
    }

    pub fn new_subsec(&mut self) -> SubsecId {
        let id = self.subsecs.len();
        self.subsecs.push(Subsec {
            seg_list: None,
            seg_count: 0,
            index: id,
            mid: DVec2::ZERO,
        });
        id
    }

    pub fn new_node(&mut self, node: Node) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(node);
        id
    }

    /*------------------------- seg helpers ---------------------------*/

    /// Fill in the precomputed fields (`p_length`, `p_perp`, ...).
    /// A zero-length seg is an integrity violation.
    pub fn recompute_seg(&mut self, seg_id: SegId) -> Result<(), super::BuildError> {
        let (s, e) = {
            let seg = &self.segs[seg_id];
            (self.verts[seg.start].pos, self.verts[seg.end].pos)
        };

        let seg = &mut self.segs[seg_id];
        seg.psx = s.x;
        seg.psy = s.y;
        seg.pex = e.x;
        seg.pey = e.y;
        seg.pdx = e.x - s.x;
        seg.pdy = e.y - s.y;

        seg.p_length = geom::compute_dist(seg.pdx, seg.pdy);
        seg.p_angle = geom::compute_angle(seg.pdx, seg.pdy);

        if seg.p_length <= 0.0 {
            return Err(super::BuildError::internal(format!(
                "seg #{seg_id} has zero length"
            )));
        }

        seg.p_perp = seg.psy * seg.pdx - seg.psx * seg.pdy;
        seg.p_para = -seg.psx * seg.pdx - seg.psy * seg.pdy;
        Ok(())
    }

    /// Walk an intrusive seg list.
    pub fn iter_seg_list(&self, head: Option<SegId>) -> SegListIter<'_> {
        SegListIter { level: self, cur: head }
    }
}

pub struct SegListIter<'a> {
    level: &'a Level,
    cur: Option<SegId>,
}

impl Iterator for SegListIter<'_> {
    type Item = SegId;

    fn next(&mut self) -> Option<SegId> {
        let id = self.cur?;
        self.cur = self.level.segs[id].next;
        Some(id)
    }
}

/*============================== Tests ================================*/
