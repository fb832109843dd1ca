//! Initial seg creation and the recursive node builder.

use super::blockmap::Grid;
use super::picker;
use super::split::{self, Intersection};
use super::store::{
    Bbox, BspChild, Child, Level, LinedefId, Node, SegId, SidedefId, StaleNodeId, SubsecId,
};
use super::superblock::{self, SuperId, SuperPool};
use super::{BuildResult, Ctx, LevelLimits, Limits};
use crate::geom;

fn create_one_seg(
    level: &mut Level,
    ctx: &Ctx,
    limits: &mut LevelLimits,
    line: LinedefId,
    start: usize,
    end: usize,
    side_id: SidedefId,
    side_num: u16,
) -> BuildResult<SegId> {
    let sector = level.sides[side_id].sector;

    if sector.is_none() {
        ctx.log
            .warn(&format!("Bad sidedef on linedef #{line} (missing sector)"));
        limits.mark_soft(Limits::BAD_SIDE);
    }

    let seg = level.new_seg();
    {
        let s = &mut level.segs[seg];
        s.start = start;
        s.end = end;
        s.linedef = Some(line);
        s.side = side_num;
        s.sector = sector;
        s.partner = None;
        s.source_line = Some(line);
    }
    level.recompute_seg(seg)?;
    Ok(seg)
}

/// Create the initial segs, one or two per usable linedef, and install
/// them in a root superblock sized to the blockmap grid rounded up to
/// a power of two.
pub fn create_segs(
    level: &mut Level,
    pool: &mut SuperPool,
    grid: &Grid,
    ctx: &Ctx,
    limits: &mut LevelLimits,
) -> BuildResult<SuperId> {
    ctx.log.verbose("Creating Segs...");

    let block = pool.alloc();
    {
        let b = pool.block_mut(block);
        b.x1 = grid.x;
        b.y1 = grid.y;
        b.x2 = grid.x + 128 * geom::round_pow2(grid.w);
        b.y2 = grid.y + 128 * geom::round_pow2(grid.h);
    }

    for line_id in 0..level.lines.len() {
        let line = level.lines[line_id].clone();

        if line.zero_len || line.overlap.is_some() {
            continue;
        }

        let s = level.verts[line.start].pos;
        let e = level.verts[line.end].pos;

        if ((s.x - e.x).abs() >= 10_000.0 || (s.y - e.y).abs() >= 10_000.0)
            && geom::compute_dist(s.x - e.x, s.y - e.y) >= 30_000.0
        {
            ctx.log
                .warn(&format!("Linedef #{line_id} is VERY long, it may cause problems"));
        }

        let right = match line.right {
            Some(side) => {
                let seg = create_one_seg(
                    level, ctx, limits, line_id, line.start, line.end, side, 0,
                )?;
                superblock::add_seg(pool, level, block, seg);
                Some(seg)
            }
            None => {
                ctx.log
                    .warn(&format!("Linedef #{line_id} has no right sidedef!"));
                None
            }
        };

        if let Some(side) = line.left {
            let left = create_one_seg(
                level, ctx, limits, line_id, line.end, line.start, side, 1,
            )?;
            superblock::add_seg(pool, level, block, left);

            if let Some(right) = right {
                // partner segs: one-to-one, split together
                level.segs[left].partner = Some(right);
                level.segs[right].partner = Some(left);
            }
        } else {
            if line.two_sided {
                ctx.log
                    .warn(&format!("Linedef #{line_id} is 2s but has no left sidedef"));
                level.lines[line_id].two_sided = false;
            }

            // the "one-sided window" trick: give the back a miniseg
            if line.window_effect {
                if let Some(right) = right {
                    let left = level.new_seg();
                    {
                        let l = &mut level.segs[left];
                        l.start = line.end;
                        l.end = line.start;
                        l.side = 1;
                        l.linedef = None;
                        l.sector = None;
                        l.source_line = Some(line_id);
                    }
                    level.recompute_seg(left)?;
                    superblock::add_seg(pool, level, block, left);

                    // a miniseg partnered with a real seg -- strange
                    // but exactly what the trick needs
                    level.segs[left].partner = Some(right);
                    level.segs[right].partner = Some(left);
                }
            }
        }
    }

    Ok(block)
}

fn determine_middle(level: &mut Level, sub: SubsecId) {
    let mut mid_x = 0.0;
    let mut mid_y = 0.0;
    let mut total = 0;

    let mut cur = level.subsecs[sub].seg_list;
    while let Some(seg_id) = cur {
        let seg = &level.segs[seg_id];
        mid_x += seg.psx + seg.pex;
        mid_y += seg.psy + seg.pey;
        total += 2;
        cur = seg.next;
    }

    if total > 0 {
        level.subsecs[sub].mid = glam::dvec2(mid_x / total as f64, mid_y / total as f64);
    }
}

fn gather_segs(level: &mut Level, pool: &mut SuperPool, sub: SubsecId, block: SuperId) -> BuildResult<()> {
    while let Some(cur) = pool.block(block).segs {
        pool.block_mut(block).segs = level.segs[cur].next;

        level.segs[cur].next = level.subsecs[sub].seg_list;
        level.segs[cur].block = None;
        level.subsecs[sub].seg_list = Some(cur);
    }

    for num in 0..2 {
        if let Some(sub_block) = pool.block(block).subs[num] {
            gather_segs(level, pool, sub, sub_block)?;

            if pool.block(sub_block).segs.is_some() {
                return Err(super::BuildError::internal("subsector sub-block not empty"));
            }
            pool.free_block(sub_block);
            pool.block_mut(block).subs[num] = None;
        }
    }

    let b = pool.block_mut(block);
    b.real_num = 0;
    b.mini_num = 0;
    Ok(())
}

/// Convex leaf: move every seg in the block into a fresh subsector.
fn create_subsec(level: &mut Level, pool: &mut SuperPool, block: SuperId) -> BuildResult<SubsecId> {
    let sub = level.new_subsec();
    gather_segs(level, pool, sub, block)?;
    determine_middle(level, sub);
    Ok(sub)
}

/// Height of the subtree under `child`, for the build report.
pub fn bsp_height(level: &Level, child: BspChild) -> i32 {
    match child {
        BspChild::Subsec(_) => 1,
        BspChild::Node(n) => {
            let node = &level.nodes[n];
            1 + bsp_height(level, node.left.child).max(bsp_height(level, node.right.child))
        }
    }
}

/// Recursively partition the seg set in `block` until convex.
///
/// `stale_nd` carries the matching original node in fast mode; it is
/// propagated down whichever branch corresponds once a stale partition
/// is actually used.
pub fn build_nodes(
    level: &mut Level,
    pool: &mut SuperPool,
    ctx: &Ctx,
    block: SuperId,
    depth: i32,
    stale_nd: Option<StaleNodeId>,
    cuts: &mut Vec<Intersection>,
) -> BuildResult<BspChild> {
    if ctx.cancelled() {
        return Err(super::BuildError::Cancelled);
    }

    let mut stale_nd = stale_nd;
    let mut stale_opposite = false;

    /* no usable partition means we are convex */
    let best = picker::pick_node(pool, level, ctx, block, &mut stale_nd, &mut stale_opposite)?;

    let Some(best) = best else {
        let sub = create_subsec(level, pool, block)?;
        return Ok(BspChild::Subsec(sub));
    };

    let part = level.segs[best].clone();

    /* divide the segs into left and right lists */
    let lefts = pool.alloc();
    let rights = pool.alloc();
    {
        let (x1, y1, x2, y2) = {
            let b = pool.block(block);
            (b.x1, b.y1, b.x2, b.y2)
        };
        for id in [lefts, rights] {
            let b = pool.block_mut(id);
            b.x1 = x1;
            b.y1 = y1;
            b.x2 = x2;
            b.y2 = y2;
        }
    }

    split::separate_segs(level, pool, ctx, block, &part, lefts, rights, cuts)?;

    if pool.block(rights).real_num + pool.block(rights).mini_num == 0 {
        return Err(super::BuildError::internal("separated seg list has no RIGHT side"));
    }
    if pool.block(lefts).real_num + pool.block(lefts).mini_num == 0 {
        return Err(super::BuildError::internal("separated seg list has no LEFT side"));
    }

    split::add_minisegs(level, pool, ctx, &part, lefts, rights, cuts)?;

    /* the partition line comes from the chosen seg's linedef, in the
     * seg's own orientation */
    let line_id = part
        .linedef
        .ok_or_else(|| super::BuildError::internal("partition has no linedef"))?;
    let line = &level.lines[line_id];
    let ls = level.verts[line.start].pos;
    let le = level.verts[line.end].pos;

    let (x, y, dx, dy) = if part.side == 0 {
        (ls.x, ls.y, le.x - ls.x, le.y - ls.y)
    } else {
        (le.x, le.y, ls.x - le.x, ls.y - le.y)
    };

    let (x, y, dx, dy) = (
        geom::round_i(x),
        geom::round_i(y),
        geom::round_i(dx),
        geom::round_i(dy),
    );

    /* a really long partition overflows dx,dy in the NODES lump */
    let mut too_long = false;
    if part.p_length >= 30_000.0 {
        if dx != 0 && dy != 0 && (dx & 1 != 0 || dy & 1 != 0) {
            ctx.log.mini_warn(&format!(
                "Loss of accuracy on VERY long node: ({x},{y}) -> ({},{})",
                x + dx,
                y + dy
            ));
        }
        too_long = true;
    }

    let mut l_bounds = Bbox::empty();
    let mut r_bounds = Bbox::empty();
    superblock::find_limits(pool, level, lefts, &mut l_bounds);
    superblock::find_limits(pool, level, rights, &mut r_bounds);

    let (stale_left, stale_right) = match stale_nd {
        Some(st) => {
            let stale = level.stale_nodes[st];
            if stale_opposite {
                (stale.right, stale.left)
            } else {
                (stale.left, stale.right)
            }
        }
        None => (None, None),
    };

    let left_child = build_nodes(level, pool, ctx, lefts, depth + 1, stale_left, cuts);
    pool.free_block(lefts);
    let left_child = match left_child {
        Ok(c) => c,
        Err(e) => {
            pool.free_block(rights);
            return Err(e);
        }
    };

    let right_child = build_nodes(level, pool, ctx, rights, depth + 1, stale_right, cuts);
    pool.free_block(rights);
    let right_child = right_child?;

    let node = level.new_node(Node {
        x,
        y,
        dx,
        dy,
        right: Child {
            child: right_child,
            bounds: r_bounds,
        },
        left: Child {
            child: left_child,
            bounds: l_bounds,
        },
        index: None,
        too_long,
    });

    Ok(BspChild::Node(node))
}

/*============================== Tests ================================*/

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bsp::blockmap;
    use crate::bsp::load::load_level;
    use crate::bsp::load::tests::{MapLumps, ctx, square_room};
    use crate::bsp::{BuildInfo, Comms, analyse};
    use crate::wad::raw::NO_INDEX;

    pub fn build_map(map: MapLumps, info: &BuildInfo) -> (Level, BspChild) {
        let comms = Comms::new();
        let c = ctx(info, &comms);

        let wad = map.into_wad();
        let mut level = load_level(&wad, 0, &c).unwrap();
        analyse::analyse_level(&mut level, &c).unwrap();

        let grid = blockmap::init_grid(&level, &c);
        let mut pool = SuperPool::new();
        let mut limits = LevelLimits::default();
        let root = create_segs(&mut level, &mut pool, &grid, &c, &mut limits).unwrap();

        let mut cuts = Vec::new();
        let tree = build_nodes(&mut level, &mut pool, &c, root, 0, None, &mut cuts).unwrap();
        pool.free_block(root);
        (level, tree)
    }

    /// 256x256 room cut into two sectors by a two-sided mid line.
    pub fn divided_room() -> MapLumps {
        let mut map = MapLumps::new();
        let lower = map.sector(0, 128, 0);
        let upper = map.sector(32, 128, 0);

        let v00 = map.vertex(0, 0);
        let v10 = map.vertex(256, 0);
        let v0m = map.vertex(0, 128);
        let v1m = map.vertex(256, 128);
        let v01 = map.vertex(0, 256);
        let v11 = map.vertex(256, 256);

        let lo = map.sidedef(lower);
        let up = map.sidedef(upper);

        // lower half boundary, clockwise (right side inward)
        map.linedef(v00, v0m, 1, 0, lo, NO_INDEX);
        map.linedef(v1m, v10, 1, 0, lo, NO_INDEX);
        map.linedef(v10, v00, 1, 0, lo, NO_INDEX);

        // upper half boundary
        map.linedef(v0m, v01, 1, 0, up, NO_INDEX);
        map.linedef(v01, v11, 1, 0, up, NO_INDEX);
        map.linedef(v11, v1m, 1, 0, up, NO_INDEX);

        // the divider: two-sided, pointing west so the upper sector
        // is on its right
        let div_r = map.sidedef(upper);
        let div_l = map.sidedef(lower);
        map.linedef(v1m, v0m, 4, 0, div_r, div_l);

        map.thing(128, 64, 1);
        map
    }

    #[test]
    fn square_room_is_one_leaf() {
        let info = BuildInfo::default();
        let (level, tree) = build_map(square_room(), &info);

        assert!(matches!(tree, BspChild::Subsec(_)));
        assert_eq!(level.subsecs.len(), 1);
        assert_eq!(level.nodes.len(), 0);
        assert_eq!(level.segs.len(), 4);
        assert_eq!(level.subsecs[0].seg_count, 0); // counted at finalise

        let segs: Vec<_> = level.iter_seg_list(level.subsecs[0].seg_list).collect();
        assert_eq!(segs.len(), 4);
    }

    #[test]
    fn divided_room_builds_one_node() {
        let info = BuildInfo::default();
        let (level, tree) = build_map(divided_room(), &info);

        let BspChild::Node(root) = tree else {
            panic!("expected a node root");
        };

        assert_eq!(level.nodes.len(), 1);
        assert_eq!(level.subsecs.len(), 2);

        // both children are leaves
        let node = &level.nodes[root];
        assert!(matches!(node.right.child, BspChild::Subsec(_)));
        assert!(matches!(node.left.child, BspChild::Subsec(_)));

        // the partition runs along the divider at y=128
        assert_eq!(node.y, 128);
        assert_eq!(node.dy, 0);

        // eight real segs, no minisegs were needed
        assert_eq!(level.segs.len(), 8);
        assert!(level.segs.iter().all(|s| s.linedef.is_some()));

        // child bounds cover each half
        let (lo, hi) = (node.right.bounds, node.left.bounds);
        assert_eq!(lo.miny.min(hi.miny), 0);
        assert_eq!(lo.maxy.max(hi.maxy), 256);

        assert_eq!(bsp_height(&level, tree), 2);
    }

    #[test]
    fn wall_crossing_partition_splits_segs() {
        // same divided room, but the side walls are single linedefs
        // from corner to corner, so the partition must split them
        let mut map = MapLumps::new();
        let lower = map.sector(0, 128, 0);
        let upper = map.sector(32, 128, 0);

        let v00 = map.vertex(0, 0);
        let v10 = map.vertex(256, 0);
        let v0m = map.vertex(0, 128);
        let v1m = map.vertex(256, 128);
        let v01 = map.vertex(0, 256);
        let v11 = map.vertex(256, 256);

        let lo = map.sidedef(lower);
        let up = map.sidedef(upper);
        // full-height west wall: lower sector on the right for the
        // bottom half -- build it as one line per half anyway for the
        // sidedef sectors, but make the east wall a single long line
        map.linedef(v00, v0m, 1, 0, lo, NO_INDEX);
        map.linedef(v0m, v01, 1, 0, up, NO_INDEX);
        map.linedef(v01, v11, 1, 0, up, NO_INDEX);
        // east wall in one piece, crossing the divider line
        map.linedef(v11, v10, 1, 0, up, NO_INDEX);
        map.linedef(v10, v00, 1, 0, lo, NO_INDEX);

        let div_r = map.sidedef(upper);
        let div_l = map.sidedef(lower);
        map.linedef(v1m, v0m, 4, 0, div_r, div_l);

        map.thing(128, 64, 1);

        let info = BuildInfo::default();
        let (level, tree) = build_map(map, &info);

        assert!(matches!(tree, BspChild::Node(_)));
        assert_eq!(level.subsecs.len(), 2);

        // 7 initial segs, the east wall split in two -> 8
        assert_eq!(level.segs.iter().filter(|s| s.linedef.is_some()).count(), 8);

        // the split created one GL vertex
        assert_eq!(level.num_gl_vert, 1);
        assert!(level.verts.iter().any(|v| v.is_gl));
    }

    #[test]
    fn cancelled_build_unwinds() {
        let info = BuildInfo::default();
        let comms = Comms::new();
        let c = ctx(&info, &comms);

        let wad = divided_room().into_wad();
        let mut level = load_level(&wad, 0, &c).unwrap();
        analyse::analyse_level(&mut level, &c).unwrap();

        let grid = blockmap::init_grid(&level, &c);
        let mut pool = SuperPool::new();
        let mut limits = LevelLimits::default();
        let root = create_segs(&mut level, &mut pool, &grid, &c, &mut limits).unwrap();

        comms.cancel();
        let mut cuts = Vec::new();
        let err = build_nodes(&mut level, &mut pool, &c, root, 0, None, &mut cuts).unwrap_err();
        assert!(matches!(err, crate::bsp::BuildError::Cancelled));
    }

    #[test]
    fn very_long_partition_sets_too_long() {
        // a huge hall needing one partition; the divider is 35000 long
        let mut map = MapLumps::new();
        let a = map.sector(0, 128, 0);
        let b = map.sector(16, 128, 0);

        let v00 = map.vertex(-17500, 0);
        let v10 = map.vertex(17500, 0);
        let v0m = map.vertex(-17500, 128);
        let v1m = map.vertex(17500, 128);
        let v01 = map.vertex(-17500, 256);
        let v11 = map.vertex(17500, 256);

        let lo = map.sidedef(a);
        let up = map.sidedef(b);

        map.linedef(v00, v0m, 1, 0, lo, NO_INDEX);
        map.linedef(v1m, v10, 1, 0, lo, NO_INDEX);
        map.linedef(v10, v00, 1, 0, lo, NO_INDEX);
        map.linedef(v0m, v01, 1, 0, up, NO_INDEX);
        map.linedef(v01, v11, 1, 0, up, NO_INDEX);
        map.linedef(v11, v1m, 1, 0, up, NO_INDEX);

        let div_r = map.sidedef(b);
        let div_l = map.sidedef(a);
        map.linedef(v1m, v0m, 4, 0, div_r, div_l);

        let info = BuildInfo::default();
        let (level, tree) = build_map(map, &info);

        let BspChild::Node(root) = tree else {
            panic!("expected a node root");
        };
        assert!(level.nodes[root].too_long);
    }
}
