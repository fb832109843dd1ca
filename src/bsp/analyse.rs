//! Level canonicalisation: duplicate detection, pruning, wall-tip
//! fans, overlap / window-effect detection and polyobj discovery.
//!
//! The passes must run in the order `analyse_level` calls them; later
//! passes lean on invariants the earlier ones establish (e.g. wall
//! tips are only correct after vertices have been merged).

use glam::DVec2;

use super::store::{
    Level, LinedefFlags, LinedefId, Polyobj, SectorId, SegId, VertexId,
};
use super::{BuildResult, Ctx};
use crate::geom::{self, ANG_EPSILON, DIST_EPSILON};
use crate::wad::raw::{
    HEXTYPE_POLY_EXPLICIT, HEXTYPE_POLY_START, PO_ANCHOR_TYPE, PO_SPAWN_TYPE, PO_SPAWNCRUSH_TYPE,
    ZDOOM_PO_ANCHOR_TYPE, ZDOOM_PO_SPAWN_TYPE, ZDOOM_PO_SPAWNCRUSH_TYPE,
};

/// Size of the box checked around a polyobj spawn point.
const POLY_BOX_SZ: f64 = 10.0;

/*---------------------- duplicate detection --------------------------*/

/// Map every vertex that shares (truncated) coordinates with an
/// earlier one to that canonical vertex via the equivalence pointer.
pub fn detect_duplicate_vertices(level: &mut Level) {
    let mut order: Vec<VertexId> = (0..level.verts.len()).collect();
    order.sort_by_key(|&v| {
        let p = level.verts[v].pos;
        (p.x as i32, p.y as i32, v)
    });

    for w in order.windows(2) {
        let (a, b) = (w[0], w[1]);
        let pa = level.verts[a].pos;
        let pb = level.verts[b].pos;

        if pa.x as i32 == pb.x as i32 && pa.y as i32 == pb.y as i32 {
            level.verts[b].equiv = level.verts[a].equiv.or(Some(a));
        }
    }
}

type SidedefKey = (
    bool,
    Option<SectorId>,
    i16,
    i16,
    [u8; 8],
    [u8; 8],
    [u8; 8],
);

fn sidedef_key(level: &Level, s: usize) -> SidedefKey {
    let sd = &level.sides[s];
    (
        sd.on_special,
        sd.sector,
        sd.x_offset,
        sd.y_offset,
        sd.upper_tex,
        sd.lower_tex,
        sd.mid_tex,
    )
}

/// Same idea for sidedefs.  Sidedefs on special lines never merge
/// (they might scroll or switch textures).
pub fn detect_duplicate_sidedefs(level: &mut Level) {
    let mut order: Vec<usize> = (0..level.sides.len()).collect();
    order.sort_by_key(|&s| (sidedef_key(level, s), s));

    for w in order.windows(2) {
        let (a, b) = (w[0], w[1]);

        if level.sides[a].on_special || level.sides[b].on_special {
            continue;
        }
        if sidedef_key(level, a) == sidedef_key(level, b) {
            level.sides[b].equiv = level.sides[a].equiv.or(Some(a));
        }
    }
}

/*--------------------------- pruning ---------------------------------*/

/// Chase equivalence pointers on every linedef and drop the
/// zero-length ones.
pub fn prune_linedefs(level: &mut Level, ctx: &Ctx) -> BuildResult<()> {
    let old_num = level.lines.len();
    let mut kept = Vec::with_capacity(old_num);

    for id in 0..level.lines.len() {
        let mut line = level.lines[id].clone();

        while let Some(e) = level.verts[line.start].equiv {
            level.verts[line.start].ref_count -= 1;
            line.start = e;
            level.verts[line.start].ref_count += 1;
        }
        while let Some(e) = level.verts[line.end].equiv {
            level.verts[line.end].ref_count -= 1;
            line.end = e;
            level.verts[line.end].ref_count += 1;
        }

        while let Some(e) = line.right.and_then(|s| level.sides[s].equiv) {
            level.sides[line.right.unwrap()].ref_count -= 1;
            line.right = Some(e);
            level.sides[e].ref_count += 1;
        }
        while let Some(e) = line.left.and_then(|s| level.sides[s].equiv) {
            level.sides[line.left.unwrap()].ref_count -= 1;
            line.left = Some(e);
            level.sides[e].ref_count += 1;
        }

        if line.zero_len {
            level.verts[line.start].ref_count -= 1;
            level.verts[line.end].ref_count -= 1;
            continue;
        }

        line.index = kept.len();
        kept.push(line);
    }

    if kept.len() < old_num {
        ctx.log.verbose(&format!(
            "Pruned {} zero-length linedefs",
            old_num - kept.len()
        ));
    }

    if kept.is_empty() {
        return Err(super::BuildError::load("couldn't find any Linedefs"));
    }

    level.lines = kept;
    Ok(())
}

/// Drop vertices nothing references any more and renumber the rest.
pub fn prune_vertices(level: &mut Level, ctx: &Ctx) -> BuildResult<()> {
    let old_num = level.verts.len();
    let mut remap: Vec<Option<VertexId>> = vec![None; old_num];
    let mut kept = Vec::with_capacity(old_num);
    let mut unused = 0;

    for (i, v) in level.verts.iter().enumerate() {
        if v.ref_count < 0 {
            return Err(super::BuildError::internal(format!(
                "vertex #{i} ref_count is {}",
                v.ref_count
            )));
        }
        if v.ref_count == 0 {
            if v.equiv.is_none() {
                unused += 1;
            }
            continue;
        }

        let mut v = v.clone();
        v.index = kept.len();
        v.equiv = None;
        remap[i] = Some(kept.len());
        kept.push(v);
    }

    if kept.len() < old_num {
        let dup_num = old_num - kept.len() - unused;
        if unused > 0 {
            ctx.log.verbose(&format!(
                "Pruned {unused} unused vertices (normal if nodes were built before)"
            ));
        }
        if dup_num > 0 {
            ctx.log.verbose(&format!("Pruned {dup_num} duplicate vertices"));
        }
    }

    if kept.is_empty() {
        return Err(super::BuildError::load("couldn't find any Vertices"));
    }

    level.verts = kept;

    for line in &mut level.lines {
        line.start = remap[line.start]
            .ok_or_else(|| super::BuildError::internal("line kept a pruned vertex"))?;
        line.end = remap[line.end]
            .ok_or_else(|| super::BuildError::internal("line kept a pruned vertex"))?;
    }

    level.num_normal_vert = level.verts.len();
    Ok(())
}

/// Drop unreferenced sidedefs and renumber.
pub fn prune_sidedefs(level: &mut Level, ctx: &Ctx) -> BuildResult<()> {
    let old_num = level.sides.len();
    let mut remap: Vec<Option<usize>> = vec![None; old_num];
    let mut kept = Vec::with_capacity(old_num);
    let mut unused = 0;

    for (i, s) in level.sides.iter().enumerate() {
        if s.ref_count < 0 {
            return Err(super::BuildError::internal(format!(
                "sidedef #{i} ref_count is {}",
                s.ref_count
            )));
        }
        if s.ref_count == 0 {
            if s.equiv.is_none() {
                unused += 1;
            }
            remap[i] = None;
            continue;
        }

        let mut s = s.clone();
        s.index = kept.len();
        s.equiv = None;
        remap[i] = Some(kept.len());
        kept.push(s);
    }

    // dropped sidedefs release their sector reference
    for (i, s) in level.sides.iter().enumerate() {
        if remap[i].is_none() && s.ref_count == 0 {
            if let Some(sec) = s.sector {
                level.sectors[sec].ref_count -= 1;
            }
        }
    }

    if kept.len() < old_num {
        let dup_num = old_num - kept.len() - unused;
        if unused > 0 {
            ctx.log.verbose(&format!("Pruned {unused} unused sidedefs"));
        }
        if dup_num > 0 {
            ctx.log.verbose(&format!("Pruned {dup_num} duplicate sidedefs"));
        }
    }

    if kept.is_empty() {
        return Err(super::BuildError::load("couldn't find any Sidedefs"));
    }

    level.sides = kept;

    for line in &mut level.lines {
        line.right = line.right.and_then(|s| remap[s]);
        line.left = line.left.and_then(|s| remap[s]);
    }
    Ok(())
}

/// Drop unreferenced sectors and renumber.
pub fn prune_sectors(level: &mut Level, ctx: &Ctx) -> BuildResult<()> {
    let old_num = level.sectors.len();
    let mut remap: Vec<Option<SectorId>> = vec![None; old_num];
    let mut kept = Vec::with_capacity(old_num);

    for (i, s) in level.sectors.iter().enumerate() {
        if s.ref_count < 0 {
            return Err(super::BuildError::internal(format!(
                "sector #{i} ref_count is {}",
                s.ref_count
            )));
        }
        if s.ref_count == 0 {
            continue;
        }

        let mut s = s.clone();
        s.index = kept.len();
        remap[i] = Some(kept.len());
        kept.push(s);
    }

    if kept.len() < old_num {
        ctx.log
            .verbose(&format!("Pruned {} unused sectors", old_num - kept.len()));
    }

    if kept.is_empty() {
        return Err(super::BuildError::load("couldn't find any Sectors"));
    }

    level.sectors = kept;

    // fix the ring ids too; reject rebuilds them anyway
    for (i, s) in level.sectors.iter_mut().enumerate() {
        s.rej_group = i;
        s.rej_next = i;
        s.rej_prev = i;
    }

    for side in &mut level.sides {
        side.sector = side.sector.and_then(|s| remap[s]);
    }
    Ok(())
}

/*--------------------------- wall tips -------------------------------*/

/// Insert a tip into the vertex's fan, keeping ascending angle order.
pub fn vertex_add_wall_tip(
    level: &mut Level,
    vert: VertexId,
    dx: f64,
    dy: f64,
    left: Option<SectorId>,
    right: Option<SectorId>,
) {
    let angle = geom::compute_angle(dx, dy);
    let tips = &mut level.verts[vert].tips;

    let at = tips
        .iter()
        .position(|t| angle + ANG_EPSILON < t.angle)
        .unwrap_or(tips.len());

    tips.insert(at, super::store::WallTip { angle, left, right });
}

/// Build the wall-tip fan on every vertex.
pub fn calculate_wall_tips(level: &mut Level) {
    for id in 0..level.lines.len() {
        let line = &level.lines[id];
        let (start, end) = (line.start, line.end);
        let left = line.left.and_then(|s| level.sides[s].sector);
        let right = line.right.and_then(|s| level.sides[s].sector);

        let p1 = level.verts[start].pos;
        let p2 = level.verts[end].pos;
        let d = p2 - p1;

        vertex_add_wall_tip(level, start, d.x, d.y, left, right);
        vertex_add_wall_tip(level, end, -d.x, -d.y, right, left);
    }
}

/// Is the direction `(dx, dy)` out of `vert` open space?  Returns the
/// sector it opens into, or `None` when a wall lies exactly there or
/// the direction faces void.
pub fn vertex_check_open(level: &Level, vert: VertexId, dx: f64, dy: f64) -> Option<SectorId> {
    let angle = geom::compute_angle(dx, dy);
    let tips = &level.verts[vert].tips;

    for tip in tips {
        let diff = (tip.angle - angle).abs();
        if diff < ANG_EPSILON || diff > 360.0 - ANG_EPSILON {
            // a wall lies in the exact direction
            return None;
        }
    }

    for (i, tip) in tips.iter().enumerate() {
        if angle + ANG_EPSILON < tip.angle {
            // direction is on the RIGHT side of this tip
            return tip.right;
        }
        if i + 1 == tips.len() {
            // past the largest angle: LEFT side of the last tip
            return tip.left;
        }
    }

    None
}

/// Vertex created where a seg is split; carries correct wall tips and,
/// when normal + GL output are built together, an integer twin.
pub fn new_vertex_from_split_seg(level: &mut Level, ctx: &Ctx, seg_id: SegId, x: f64, y: f64) -> VertexId {
    let (pdx, pdy, sector, partner_sector, ref_count) = {
        let seg = &level.segs[seg_id];
        let partner_sector = seg.partner.and_then(|p| level.segs[p].sector);
        (
            seg.pdx,
            seg.pdy,
            seg.sector,
            partner_sector,
            if seg.partner.is_some() { 4 } else { 2 },
        )
    };

    let vert = level.new_vertex(DVec2::new(x, y));
    level.verts[vert].ref_count = ref_count;

    if level.doing_normal && ctx.info.spec_version == 1 {
        level.verts[vert].index = level.num_normal_vert;
        level.num_normal_vert += 1;
    } else {
        level.verts[vert].index = level.num_gl_vert;
        level.verts[vert].is_gl = true;
        level.num_gl_vert += 1;
    }

    vertex_add_wall_tip(level, vert, -pdx, -pdy, sector, partner_sector);
    vertex_add_wall_tip(level, vert, pdx, pdy, partner_sector, sector);

    if level.doing_normal && ctx.info.spec_version != 1 {
        let dup = level.new_vertex(DVec2::new(x, y));
        level.verts[dup].ref_count = ref_count;
        level.verts[dup].index = level.num_normal_vert;
        level.num_normal_vert += 1;

        level.verts[vert].normal_dup = Some(dup);
    }

    vert
}

/// Replacement end vertex for a seg whose rounded endpoints coincide:
/// walk unit steps along the delta until the integer position differs.
/// No wall tips (only used after node building).
pub fn new_vertex_degenerate(
    level: &mut Level,
    start: VertexId,
    end: VertexId,
) -> BuildResult<VertexId> {
    let s = level.verts[start].pos;
    let e = level.verts[end].pos;
    let delta = e - s;
    let dlen = geom::compute_dist(delta.x, delta.y);

    if dlen == 0.0 {
        return Err(super::BuildError::internal("degenerate vertex: bad delta"));
    }

    let vert = level.new_vertex(s);
    level.verts[vert].ref_count = level.verts[start].ref_count;

    if level.doing_normal {
        level.verts[vert].index = level.num_normal_vert;
        level.num_normal_vert += 1;
    } else {
        level.verts[vert].index = level.num_gl_vert;
        level.verts[vert].is_gl = true;
        level.num_gl_vert += 1;
    }

    let step = delta / dlen;
    let mut pos = s;

    while geom::round_i(pos.x) == geom::round_i(s.x) && geom::round_i(pos.y) == geom::round_i(s.y) {
        pos += step;
    }
    level.verts[vert].pos = pos;

    Ok(vert)
}

/*------------------------ overlap detection --------------------------*/

/// Which endpoint is "lowest" (left-most, bottom-most when vertical):
/// false = start, true = end.
fn line_vertex_lowest(level: &Level, line: LinedefId) -> bool {
    let s = level.verts[level.lines[line].start].pos;
    let e = level.verts[level.lines[line].end].pos;

    !((s.x as i32) < (e.x as i32) || (s.x as i32 == e.x as i32 && (s.y as i32) < (e.y as i32)))
}

fn line_low_high(level: &Level, line: LinedefId) -> ((i32, i32), (i32, i32)) {
    let l = &level.lines[line];
    let (lo, hi) = if line_vertex_lowest(level, line) {
        (l.end, l.start)
    } else {
        (l.start, l.end)
    };
    let lo = level.verts[lo].pos;
    let hi = level.verts[hi].pos;
    ((lo.x as i32, lo.y as i32), (hi.x as i32, hi.y as i32))
}

/// Pairs of linedefs covering the same span get linked via `overlap`.
/// Partial overlaps are not detected.
pub fn detect_overlapping_lines(level: &mut Level, ctx: &Ctx) {
    let mut order: Vec<LinedefId> = (0..level.lines.len()).collect();
    order.sort_by_key(|&l| (line_low_high(level, l).0, l));

    let mut count = 0;

    for i in 0..order.len().saturating_sub(1) {
        for j in i + 1..order.len() {
            let (lo_i, hi_i) = line_low_high(level, order[i]);
            let (lo_j, hi_j) = line_low_high(level, order[j]);

            if lo_i != lo_j {
                break;
            }
            if hi_i == hi_j {
                let a = order[i];
                let b = order[j];
                level.lines[b].overlap = level.lines[a].overlap.or(Some(a));
                count += 1;
            }
        }
    }

    if count > 0 {
        ctx.log
            .verbose(&format!("Detected {count} overlapped linedefs"));
    }
}

/*---------------------- window effect detection ----------------------*/

fn count_wall_tips(level: &Level, vert: VertexId) -> (usize, usize) {
    let mut one_sided = 0;
    let mut two_sided = 0;

    for tip in &level.verts[vert].tips {
        if tip.left.is_none() || tip.right.is_none() {
            one_sided += 1;
        } else {
            two_sided += 1;
        }
    }
    (one_sided, two_sided)
}

/// Cast a ray from the line's midpoint (horizontally or vertically,
/// whichever crosses the line more squarely) and check whether the
/// nearest thing behind the line's back is an open sector.
fn test_for_window_effect(level: &mut Level, ctx: &Ctx, line_id: LinedefId) {
    let (mx, my, dx, dy) = {
        let l = &level.lines[line_id];
        let s = level.verts[l.start].pos;
        let e = level.verts[l.end].pos;
        ((s.x + e.x) / 2.0, (s.y + e.y) / 2.0, e.x - s.x, e.y - s.y)
    };

    let cast_horiz = dx.abs() < dy.abs();

    let mut best_dist = 999999.0;
    let mut best_open = false;

    for i in 0..level.lines.len() {
        if i == line_id {
            continue;
        }
        let n = &level.lines[i];
        if n.zero_len || n.overlap.is_some() {
            continue;
        }

        let s = level.verts[n.start].pos;
        let e = level.verts[n.end].pos;
        let (dx2, dy2) = (e.x - s.x, e.y - s.y);

        let (dist, hit_side) = if cast_horiz {
            if dy2.abs() < DIST_EPSILON {
                continue;
            }
            if s.y.max(e.y) < my - DIST_EPSILON || s.y.min(e.y) > my + DIST_EPSILON {
                continue;
            }

            let dist = (s.x + (my - s.y) * dx2 / dy2) - mx;
            if (dy > 0.0) == (dist > 0.0) {
                continue;
            }

            let hit_side = if (dy > 0.0) == (dy2 > 0.0) { n.right } else { n.left };
            (dist.abs(), hit_side)
        } else {
            if dx2.abs() < DIST_EPSILON {
                continue;
            }
            if s.x.max(e.x) < mx - DIST_EPSILON || s.x.min(e.x) > mx + DIST_EPSILON {
                continue;
            }

            let dist = (s.y + (mx - s.x) * dy2 / dx2) - my;
            if (dx > 0.0) != (dist > 0.0) {
                continue;
            }

            let hit_side = if (dx > 0.0) == (dx2 > 0.0) { n.right } else { n.left };
            (dist.abs(), hit_side)
        };

        if dist < DIST_EPSILON {
            // too close, probably overlapping lines
            continue;
        }

        if dist < best_dist {
            best_dist = dist;
            best_open = hit_side
                .and_then(|s| level.sides[s].sector)
                .is_some();
        }
    }

    if best_open {
        level.lines[line_id].window_effect = true;
        ctx.log.mini_warn(&format!(
            "Linedef #{line_id} is one-sided but faces into a sector"
        ));
    }
}

/// One-sided lines whose vertices carry an odd number of one-sided
/// tips are candidates for the "one-sided window" trick.
pub fn detect_window_effects(level: &mut Level, ctx: &Ctx) {
    for i in 0..level.lines.len() {
        let l = &level.lines[i];
        if l.two_sided || l.zero_len || l.overlap.is_some() || l.right.is_none() {
            continue;
        }

        let (start, end) = (l.start, l.end);

        let (one, two) = count_wall_tips(level, start);
        if one % 2 == 1 && one + two > 1 {
            test_for_window_effect(level, ctx, i);
            continue;
        }

        let (one, two) = count_wall_tips(level, end);
        if one % 2 == 1 && one + two > 1 {
            test_for_window_effect(level, ctx, i);
        }
    }
}

/*------------------------- polyobj handling --------------------------*/

/// True when the (integer-truncated) line touches the box.
fn line_in_box(level: &Level, line: LinedefId, x1: f64, y1: f64, x2: f64, y2: f64) -> bool {
    let l = &level.lines[line];
    let s = level.verts[l.start].pos;
    let e = level.verts[l.end].pos;
    geom::line_touches_box(x1, y1, x2, y2, s.x, s.y, e.x, e.y)
}

/// Mark every line of `sector` as precious so the polyobj's home
/// cannot be carved up.
fn mark_polyobj_sector(level: &mut Level, sector: Option<SectorId>) {
    let Some(sector) = sector else { return };

    if level.sectors[sector].has_polyobj {
        return;
    }
    level.sectors[sector].has_polyobj = true;

    for i in 0..level.lines.len() {
        let touches = {
            let l = &level.lines[i];
            let on_right = l.right.and_then(|s| level.sides[s].sector) == Some(sector);
            let on_left = l.left.and_then(|s| level.sides[s].sector) == Some(sector);
            on_right || on_left
        };
        if touches {
            level.lines[i].is_precious = true;
        }
    }
}

/// Work out which sector contains a polyobj spawn spot and mark it.
fn mark_polyobj_point(level: &mut Level, ctx: &Ctx, x: f64, y: f64) {
    // awkward case first: the spot sits on (or very near) a linedef
    let bmin_x = x - POLY_BOX_SZ;
    let bmin_y = y - POLY_BOX_SZ;
    let bmax_x = x + POLY_BOX_SZ;
    let bmax_y = y + POLY_BOX_SZ;

    let mut inside_count = 0;

    for i in 0..level.lines.len() {
        if line_in_box(level, i, bmin_x, bmin_y, bmax_x, bmax_y) {
            let left = level.lines[i].left.and_then(|s| level.sides[s].sector);
            let right = level.lines[i].right.and_then(|s| level.sides[s].sector);
            mark_polyobj_sector(level, left);
            mark_polyobj_sector(level, right);
            inside_count += 1;
        }
    }

    if inside_count > 0 {
        return;
    }

    // cast a horizontal ray and take the closest crossing linedef
    let mut best_dist = 999999.0;
    let mut best_match: Option<LinedefId> = None;

    for i in 0..level.lines.len() {
        let l = &level.lines[i];
        let p1 = level.verts[l.start].pos;
        let p2 = level.verts[l.end].pos;

        if (p2.y - p1.y).abs() < DIST_EPSILON {
            continue;
        }
        if (y > p1.y + DIST_EPSILON && y > p2.y + DIST_EPSILON)
            || (y < p1.y - DIST_EPSILON && y < p2.y - DIST_EPSILON)
        {
            continue;
        }

        let x_cut = p1.x + (p2.x - p1.x) * (y - p1.y) / (p2.y - p1.y) - x;

        if x_cut.abs() < f64::abs(best_dist) {
            best_match = Some(i);
            best_dist = x_cut;
        }
    }

    let Some(best) = best_match else {
        ctx.log.warn(&format!("Bad polyobj thing at ({x:.0},{y:.0})"));
        return;
    };

    let (y1, y2) = {
        let l = &level.lines[best];
        (level.verts[l.start].pos.y, level.verts[l.end].pos.y)
    };

    let side = if (y1 > y2) == (best_dist > 0.0) {
        level.lines[best].right
    } else {
        level.lines[best].left
    };
    let sector = side.and_then(|s| level.sides[s].sector);

    if sector.is_none() {
        ctx.log
            .warn(&format!("Invalid polyobj thing at ({x:.0},{y:.0})"));
        return;
    }

    mark_polyobj_sector(level, sector);
}

/// Chain PO_LINE_START lines head-to-tail by shared vertex position.
fn collect_polyobj_lines(level: &mut Level, start_line: LinedefId) -> Vec<LinedefId> {
    level.lines[start_line].line_type = 0;
    level.lines[start_line].args[0] = 0;

    let mut list = vec![start_line];
    let mut visited = vec![false; level.lines.len()];
    visited[start_line] = true;

    let mut cursor = level.verts[level.lines[start_line].end].pos;

    loop {
        let mut advanced = false;

        for i in 0..level.lines.len() {
            if visited[i] || level.lines[i].polyobj {
                continue;
            }

            let v1 = level.verts[level.lines[i].start].pos;
            if (v1.x - cursor.x).abs() < DIST_EPSILON && (v1.y - cursor.y).abs() < DIST_EPSILON {
                visited[i] = true;
                list.push(i);
                cursor = level.verts[level.lines[i].end].pos;
                advanced = true;
                break;
            }
        }

        if !advanced {
            return list;
        }
    }
}

/// Turn a collected line list into a polyobj record: the lines become
/// precious members, and two-sided members get bottom unpegging (the
/// hexen.exe column-drawer quirk).
fn create_polyobj(
    level: &mut Level,
    lines: Vec<LinedefId>,
    tag: i16,
    seq_type: u8,
    anchor_x: i16,
    anchor_y: i16,
) {
    for &l in &lines {
        let line = &mut level.lines[l];
        line.polyobj = true;
        line.is_precious = true;

        if line.left.is_some() {
            line.flags |= LinedefFlags::LOWER_UNPEGGED;
        }
    }

    level.polyobjs.push(Polyobj {
        tag,
        seq_type,
        anchor_x,
        anchor_y,
        lines,
    });
}

/// Find the lines of the polyobj with `tag`, via PO_LINE_START chains
/// or explicitly numbered PO_LINE_EXPLICIT lines.
fn find_and_create_polyobj(
    level: &mut Level,
    ctx: &Ctx,
    tag: i16,
    anchor_x: i16,
    anchor_y: i16,
) -> bool {
    // first look for a PO_LINE_START linedef carrying this tag
    for i in 0..level.lines.len() {
        let l = &level.lines[i];
        if l.polyobj || l.line_type != HEXTYPE_POLY_START || l.args[0] as i16 != tag {
            continue;
        }

        let seq_type = {
            let raw = level.lines[i].args[2];
            if raw >= 10 { 0 } else { raw }
        };

        let lines = collect_polyobj_lines(level, i);
        if lines.is_empty() {
            return false;
        }
        create_polyobj(level, lines, tag, seq_type, anchor_x, anchor_y);
        return true;
    }

    // fall back to explicitly ordered lines
    let mut collected: Vec<LinedefId> = Vec::new();

    for n in 1usize.. {
        let mut found = false;

        for i in 0..level.lines.len() {
            let l = &level.lines[i];
            if l.polyobj || l.line_type != HEXTYPE_POLY_EXPLICIT || l.args[0] as i16 != tag {
                continue;
            }

            if l.args[1] == 0 {
                ctx.log.warn(&format!(
                    "Linedef missing (probably #{n}) in explicit polyobj (tag {tag})"
                ));
                return false;
            }

            if l.args[1] as usize == n {
                collected.push(i);
                level.lines[i].line_type = 0;
                level.lines[i].args[0] = 0;
                found = true;
            }
        }

        if !found {
            break;
        }
    }

    if collected.is_empty() {
        return false;
    }

    // a skipped order number means lines with the tag remain unclaimed
    let leftovers = (0..level.lines.len()).any(|i| {
        let l = &level.lines[i];
        l.line_type == HEXTYPE_POLY_EXPLICIT && l.args[0] as i16 == tag
    });
    if leftovers {
        ctx.log
            .warn(&format!("Linedef missing in explicit polyobj (tag {tag})"));
        return false;
    }

    let seq_type = {
        let raw = level.lines[collected[0]].args[3];
        if raw >= 10 { 0 } else { raw }
    };
    create_polyobj(level, collected, tag, seq_type, anchor_x, anchor_y);
    true
}

/// Hexen-only: find polyobj anchors and spawn spots, group the member
/// lines, and protect the sectors the polyobjs live in.
pub fn detect_polyobjs(level: &mut Level, ctx: &Ctx) {
    // any polyobj line specials at all?
    if !level
        .lines
        .iter()
        .any(|l| l.line_type == HEXTYPE_POLY_START || l.line_type == HEXTYPE_POLY_EXPLICIT)
    {
        return;
    }

    // Doom thing types 3001/3002 clash with Hexen's: only treat them as
    // polyobj spawners when no ZDoom-style spawner is present.
    let zdoom_style = level.things.iter().any(|t| {
        t.thing_type == ZDOOM_PO_SPAWN_TYPE || t.thing_type == ZDOOM_PO_SPAWNCRUSH_TYPE
    });

    let (anchor, spawn, spawncrush) = if zdoom_style {
        (ZDOOM_PO_ANCHOR_TYPE, ZDOOM_PO_SPAWN_TYPE, ZDOOM_PO_SPAWNCRUSH_TYPE)
    } else {
        (PO_ANCHOR_TYPE, PO_SPAWN_TYPE, PO_SPAWNCRUSH_TYPE)
    };

    for t in 0..level.things.len() {
        let thing = level.things[t];

        if thing.thing_type == anchor {
            find_and_create_polyobj(level, ctx, thing.angle, thing.x, thing.y);
        } else if thing.thing_type == spawn || thing.thing_type == spawncrush {
            mark_polyobj_point(level, ctx, thing.x as f64, thing.y as f64);
        }
    }
}

/*------------------------ the full pipeline --------------------------*/

/// Run every analysis pass in the required order.
pub fn analyse_level(level: &mut Level, ctx: &Ctx) -> BuildResult<()> {
    if ctx.cancelled() {
        return Err(super::BuildError::Cancelled);
    }

    if level.doing_normal {
        if ctx.info.pack_sides {
            detect_duplicate_sidedefs(level);
        }
        if ctx.info.merge_vert {
            detect_duplicate_vertices(level);
        }
        if !ctx.info.no_prune {
            prune_linedefs(level, ctx)?;
        }

        // always prune vertices, otherwise dead split vertices from a
        // previous build keep accumulating
        prune_vertices(level, ctx)?;

        if !ctx.info.no_prune {
            prune_sidedefs(level, ctx)?;
        }
        if ctx.info.prune_sect {
            prune_sectors(level, ctx)?;
        }
    }

    calculate_wall_tips(level);

    if level.doing_hexen {
        detect_polyobjs(level, ctx);
    }

    detect_overlapping_lines(level, ctx);
    detect_window_effects(level, ctx);
    Ok(())
}

/*============================== Tests ================================*/
