//! Hierarchical axis-aligned buckets of segs.
//!
//! Each block halves along its longer axis down to 256x256-unit
//! leaves; a seg lives at the shallowest block whose midline it
//! straddles.  Subtree totals of real/mini segs let the partition
//! picker price a whole block in O(1) when it lies fully on one side.
//!
//! Blocks are pooled: freed blocks go on a free list and are reused
//! for the rest of the run.

use super::store::{Bbox, Level, SegId};
use crate::geom::{DIST_EPSILON, IFFY_LEN};

pub type SuperId = usize;

#[derive(Clone, Debug, Default)]
pub struct SuperBlock {
    pub parent: Option<SuperId>,

    /// Pseudo-inclusive map bounds: (x,y) inside iff x1 <= x < x2.
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,

    /// Sub-blocks; `[0]` has the lower coordinates.
    pub subs: [Option<SuperId>; 2],

    /// Seg totals for this whole subtree.
    pub real_num: i32,
    pub mini_num: i32,

    /// Segs owned by exactly this block (intrusive list via `Seg::next`).
    pub segs: Option<SegId>,
}

impl SuperBlock {
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.x2 - self.x1 <= 256 && self.y2 - self.y1 <= 256
    }
}

/// Pool with a quick-alloc free list; lives for the whole driver run.
#[derive(Debug, Default)]
pub struct SuperPool {
    blocks: Vec<SuperBlock>,
    free: Vec<SuperId>,
}

impl SuperPool {
    pub fn new() -> SuperPool {
        SuperPool::default()
    }

    pub fn alloc(&mut self) -> SuperId {
        match self.free.pop() {
            Some(id) => {
                self.blocks[id] = SuperBlock::default();
                id
            }
            None => {
                self.blocks.push(SuperBlock::default());
                self.blocks.len() - 1
            }
        }
    }

    #[inline]
    pub fn block(&self, id: SuperId) -> &SuperBlock {
        &self.blocks[id]
    }

    #[inline]
    pub fn block_mut(&mut self, id: SuperId) -> &mut SuperBlock {
        &mut self.blocks[id]
    }

    /// Return a block (and its subtree) to the free list.  Any segs
    /// still linked in are abandoned; that only happens on cancel.
    pub fn free_block(&mut self, id: SuperId) {
        self.blocks[id].segs = None;

        for sub in self.blocks[id].subs {
            if let Some(sub) = sub {
                self.free_block(sub);
            }
        }
        self.blocks[id].subs = [None, None];
        self.free.push(id);
    }

    /// Number of blocks currently pooled (free + live).
    pub fn capacity(&self) -> usize {
        self.blocks.len()
    }
}

/// Insert `seg` into the subtree rooted at `block_id`, descending as
/// long as one half fully contains it.
pub fn add_seg(pool: &mut SuperPool, level: &mut Level, block_id: SuperId, seg_id: SegId) {
    let is_real = level.segs[seg_id].linedef.is_some();
    let (sx, sy, ex, ey) = {
        let seg = &level.segs[seg_id];
        (seg.psx, seg.psy, seg.pex, seg.pey)
    };

    let mut cur = block_id;

    loop {
        {
            let block = pool.block_mut(cur);
            if is_real {
                block.real_num += 1;
            } else {
                block.mini_num += 1;
            }
        }

        let (x1, y1, x2, y2, leaf) = {
            let b = pool.block(cur);
            (b.x1, b.y1, b.x2, b.y2, b.is_leaf())
        };

        if leaf {
            let block = pool.block_mut(cur);
            level.segs[seg_id].next = block.segs;
            level.segs[seg_id].block = Some(cur);
            block.segs = Some(seg_id);
            return;
        }

        let x_mid = (x1 + x2) / 2;
        let y_mid = (y1 + y2) / 2;

        let (p1, p2) = if x2 - x1 >= y2 - y1 {
            (sx >= x_mid as f64, ex >= x_mid as f64)
        } else {
            (sy >= y_mid as f64, ey >= y_mid as f64)
        };

        let child = match (p1, p2) {
            (true, true) => 1,
            (false, false) => 0,
            _ => {
                // straddles the midline: this is its home
                let block = pool.block_mut(cur);
                level.segs[seg_id].next = block.segs;
                level.segs[seg_id].block = Some(cur);
                block.segs = Some(seg_id);
                return;
            }
        };

        if pool.block(cur).subs[child].is_none() {
            let sub = pool.alloc();
            {
                let b = pool.block_mut(sub);
                b.parent = Some(cur);

                if x2 - x1 >= y2 - y1 {
                    b.x1 = if child == 1 { x_mid } else { x1 };
                    b.y1 = y1;
                    b.x2 = if child == 1 { x2 } else { x_mid };
                    b.y2 = y2;
                } else {
                    b.x1 = x1;
                    b.y1 = if child == 1 { y_mid } else { y1 };
                    b.x2 = x2;
                    b.y2 = if child == 1 { y2 } else { y_mid };
                }
            }
            pool.block_mut(cur).subs[child] = Some(sub);
        }

        cur = pool.block(cur).subs[child].unwrap();
    }
}

/// A seg owned by `block_id` was split in place: every block from here
/// to the root now holds one more seg.
pub fn seg_was_split(pool: &mut SuperPool, level: &Level, block_id: SuperId, seg_id: SegId) {
    let is_real = level.segs[seg_id].linedef.is_some();
    let mut cur = Some(block_id);

    while let Some(id) = cur {
        let block = pool.block_mut(id);
        if is_real {
            block.real_num += 1;
        } else {
            block.mini_num += 1;
        }
        cur = block.parent;
    }
}

fn point_on_line_side(part: &super::store::Seg, x: f64, y: f64) -> i32 {
    let perp = part.perp_dist(x, y);

    if perp.abs() <= DIST_EPSILON {
        return 0;
    }
    if perp < 0.0 { -1 } else { 1 }
}

/// Relationship between a whole block and the partition line:
/// -1 left, +1 right, 0 when the line cuts the (inflated) box.
pub fn box_on_line_side(pool: &SuperPool, block_id: SuperId, part: &super::store::Seg) -> i32 {
    let b = pool.block(block_id);

    let x1 = b.x1 as f64 - IFFY_LEN * 1.5;
    let y1 = b.y1 as f64 - IFFY_LEN * 1.5;
    let x2 = b.x2 as f64 + IFFY_LEN * 1.5;
    let y2 = b.y2 as f64 + IFFY_LEN * 1.5;

    let (mut p1, mut p2);

    if part.pdx == 0.0 {
        // vertical partition
        p1 = if x1 > part.psx { 1 } else { -1 };
        p2 = if x2 > part.psx { 1 } else { -1 };

        if part.pdy < 0.0 {
            p1 = -p1;
            p2 = -p2;
        }
    } else if part.pdy == 0.0 {
        // horizontal partition
        p1 = if y1 < part.psy { 1 } else { -1 };
        p2 = if y2 < part.psy { 1 } else { -1 };

        if part.pdx < 0.0 {
            p1 = -p1;
            p2 = -p2;
        }
    } else if part.pdx * part.pdy > 0.0 {
        // positive slope: check the two off-diagonal corners
        p1 = point_on_line_side(part, x1, y2);
        p2 = point_on_line_side(part, x2, y1);
    } else {
        // negative slope
        p1 = point_on_line_side(part, x1, y1);
        p2 = point_on_line_side(part, x2, y2);
    }

    if p1 == p2 { p1 } else { 0 }
}

/// Bounding box of every seg in the subtree.
pub fn find_limits(pool: &SuperPool, level: &Level, block_id: SuperId, bbox: &mut Bbox) {
    let b = pool.block(block_id);

    let mut cur = b.segs;
    while let Some(seg_id) = cur {
        let seg = &level.segs[seg_id];
        bbox.add_point(seg.psx, seg.psy);
        bbox.add_point(seg.pex, seg.pey);
        cur = seg.next;
    }

    for sub in b.subs.into_iter().flatten() {
        find_limits(pool, level, sub, bbox);
    }
}

/*============================== Tests ================================*/
