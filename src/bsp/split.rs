//! Dividing segs around a chosen partition, collecting the cut points,
//! and stitching paired minisegs across the open gaps.
//!
//! The side taxonomy here must match the partition picker exactly --
//! both routines classify segs the same way or the tree goes wrong.

use super::analyse::{new_vertex_from_split_seg, vertex_check_open};
use super::store::{Level, SectorId, Seg, SegId, VertexId};
use super::superblock::{self, SuperId, SuperPool};
use super::{BuildResult, Ctx};
use crate::geom::DIST_EPSILON;

/// A cut point on the partition line.
#[derive(Clone, Copy, Debug)]
pub struct Intersection {
    pub vertex: VertexId,

    /// Signed distance along the partition, zero at its start point.
    pub along_dist: f64,

    /// Cut made through a self-referencing linedef.
    pub self_ref: bool,

    /// Sector open before/after the vertex (along the partition
    /// direction); `None` means that side is void or walled off.
    pub before: Option<SectorId>,
    pub after: Option<SectorId>,
}

/// Record a cut at `vert`, keeping the list sorted by `along_dist`.
/// At most one intersection per vertex per partition.
pub fn add_intersection(
    cuts: &mut Vec<Intersection>,
    level: &Level,
    vert: VertexId,
    part: &Seg,
    self_ref: bool,
) {
    if cuts.iter().any(|c| c.vertex == vert) {
        return;
    }

    let pos = level.verts[vert].pos;
    let cut = Intersection {
        vertex: vert,
        along_dist: part.para_dist(pos.x, pos.y),
        self_ref,
        before: vertex_check_open(level, vert, -part.pdx, -part.pdy),
        after: vertex_check_open(level, vert, part.pdx, part.pdy),
    };

    let at = cuts
        .iter()
        .position(|c| cut.along_dist < c.along_dist)
        .unwrap_or(cuts.len());
    cuts.insert(at, cut);
}

/// Where `cur` crosses the partition.  Takes the horizontal/vertical
/// fast paths when it can; otherwise interpolates along `cur` by the
/// ratio of the perpendicular distances.
fn compute_intersection(cur: &Seg, part: &Seg, perp_c: f64, perp_d: f64) -> (f64, f64) {
    // horizontal partition against vertical seg
    if part.pdy == 0.0 && cur.pdx == 0.0 {
        return (cur.psx, part.psy);
    }

    // vertical partition against horizontal seg
    if part.pdx == 0.0 && cur.pdy == 0.0 {
        return (part.psx, cur.psy);
    }

    let ds = perp_c / (perp_c - perp_d);

    let x = if cur.pdx == 0.0 { cur.psx } else { cur.psx + cur.pdx * ds };
    let y = if cur.pdy == 0.0 { cur.psy } else { cur.psy + cur.pdy * ds };

    (x, y)
}

/// Split `old_seg` at `(x, y)`.  The old seg keeps its start vertex and
/// is truncated; the returned seg is the cut-off tail.  A partnered seg
/// is split at the same vertex and the halves are cross-linked; the new
/// partner half is inserted right after the partner in its list so
/// later iteration still reaches it.
pub fn split_seg(
    level: &mut Level,
    pool: &mut SuperPool,
    ctx: &Ctx,
    old_seg: SegId,
    x: f64,
    y: f64,
) -> BuildResult<SegId> {
    if let Some(block) = level.segs[old_seg].block {
        superblock::seg_was_split(pool, level, block, old_seg);
    }

    let new_vert = new_vertex_from_split_seg(level, ctx, old_seg, x, y);

    let new_seg = level.new_seg();
    level.segs[new_seg] = level.segs[old_seg].clone();
    level.segs[new_seg].next = None;

    level.segs[old_seg].end = new_vert;
    level.recompute_seg(old_seg)?;

    level.segs[new_seg].start = new_vert;
    level.recompute_seg(new_seg)?;

    let partner = level.segs[old_seg].partner;
    if let Some(partner) = partner {
        if let Some(block) = level.segs[partner].block {
            superblock::seg_was_split(pool, level, block, partner);
        }

        let new_partner = level.new_seg();
        level.segs[new_partner] = level.segs[partner].clone();

        // keep the one-to-one pairing valid
        level.segs[new_seg].partner = Some(new_partner);
        level.segs[new_partner].partner = Some(new_seg);

        level.segs[partner].start = new_vert;
        level.recompute_seg(partner)?;

        level.segs[new_partner].end = new_vert;
        level.recompute_seg(new_partner)?;

        // splice into the partner's list, directly after it
        level.segs[partner].next = Some(new_partner);
    }

    Ok(new_seg)
}

/// Route one seg to the left list, the right list, or both halves of a
/// split.  Follows the same taxonomy as partition evaluation.
pub fn divide_one_seg(
    level: &mut Level,
    pool: &mut SuperPool,
    ctx: &Ctx,
    cur: SegId,
    part: &Seg,
    lefts: SuperId,
    rights: SuperId,
    cuts: &mut Vec<Intersection>,
) -> BuildResult<()> {
    let (mut a, mut b, self_ref, start, end, pdx, pdy) = {
        let seg = &level.segs[cur];
        (
            part.perp_dist(seg.psx, seg.psy),
            part.perp_dist(seg.pex, seg.pey),
            seg.linedef
                .map(|l| level.lines[l].self_ref)
                .unwrap_or(false),
            seg.start,
            seg.end,
            seg.pdx,
            seg.pdy,
        )
    };

    if level.segs[cur].source_line.is_some() && level.segs[cur].source_line == part.source_line {
        a = 0.0;
        b = 0.0;
    }

    /* collinear with the partition */
    if a.abs() <= DIST_EPSILON && b.abs() <= DIST_EPSILON {
        add_intersection(cuts, level, start, part, self_ref);
        add_intersection(cuts, level, end, part, self_ref);

        // direction decides the side
        if pdx * part.pdx + pdy * part.pdy < 0.0 {
            superblock::add_seg(pool, level, lefts, cur);
        } else {
            superblock::add_seg(pool, level, rights, cur);
        }
        return Ok(());
    }

    /* wholly on the right */
    if a > -DIST_EPSILON && b > -DIST_EPSILON {
        if a < DIST_EPSILON {
            add_intersection(cuts, level, start, part, self_ref);
        } else if b < DIST_EPSILON {
            add_intersection(cuts, level, end, part, self_ref);
        }

        superblock::add_seg(pool, level, rights, cur);
        return Ok(());
    }

    /* wholly on the left */
    if a < DIST_EPSILON && b < DIST_EPSILON {
        if a > -DIST_EPSILON {
            add_intersection(cuts, level, start, part, self_ref);
        } else if b > -DIST_EPSILON {
            add_intersection(cuts, level, end, part, self_ref);
        }

        superblock::add_seg(pool, level, lefts, cur);
        return Ok(());
    }

    /* opposite signs: split it */

    let (x, y) = compute_intersection(&level.segs[cur], part, a, b);
    let new_seg = split_seg(level, pool, ctx, cur, x, y)?;

    // the truncated seg now ends at the cut vertex
    let cut_vert = level.segs[cur].end;
    add_intersection(cuts, level, cut_vert, part, self_ref);

    if a < 0.0 {
        superblock::add_seg(pool, level, lefts, cur);
        superblock::add_seg(pool, level, rights, new_seg);
    } else {
        superblock::add_seg(pool, level, rights, cur);
        superblock::add_seg(pool, level, lefts, new_seg);
    }

    Ok(())
}

/// Empty `block` (and its subtree) through [`divide_one_seg`], freeing
/// the drained sub-blocks as it goes.
pub fn separate_segs(
    level: &mut Level,
    pool: &mut SuperPool,
    ctx: &Ctx,
    block: SuperId,
    part: &Seg,
    lefts: SuperId,
    rights: SuperId,
    cuts: &mut Vec<Intersection>,
) -> BuildResult<()> {
    while let Some(cur) = pool.block(block).segs {
        pool.block_mut(block).segs = level.segs[cur].next;
        level.segs[cur].block = None;
        level.segs[cur].next = None;

        divide_one_seg(level, pool, ctx, cur, part, lefts, rights, cuts)?;
    }

    for num in 0..2 {
        if let Some(sub) = pool.block(block).subs[num] {
            separate_segs(level, pool, ctx, sub, part, lefts, rights, cuts)?;

            if pool.block(sub).segs.is_some() {
                return Err(super::BuildError::internal("separated sub-block not empty"));
            }
            pool.free_block(sub);
            pool.block_mut(block).subs[num] = None;
        }
    }

    let b = pool.block_mut(block);
    b.real_num = 0;
    b.mini_num = 0;
    Ok(())
}

/// Walk the sorted cut list and close every open->open gap with a pair
/// of cross-linked minisegs.  Consumes the list (it is reused for the
/// next partition).
pub fn add_minisegs(
    level: &mut Level,
    pool: &mut SuperPool,
    ctx: &Ctx,
    part: &Seg,
    lefts: SuperId,
    rights: SuperId,
    cuts: &mut Vec<Intersection>,
) -> BuildResult<()> {
    if cuts.is_empty() {
        return Ok(());
    }

    /* step 1: merge cuts that (nearly) coincide */

    let mut i = 0;
    while i + 1 < cuts.len() {
        let len = cuts[i + 1].along_dist - cuts[i].along_dist;

        if len < -0.1 {
            return Err(super::BuildError::internal(format!(
                "bad order in intersect list: {:.3} > {:.3}",
                cuts[i].along_dist,
                cuts[i + 1].along_dist
            )));
        }

        if len > 0.2 {
            i += 1;
            continue;
        }

        if len > DIST_EPSILON {
            let p = level.verts[cuts[i].vertex].pos;
            ctx.log.mini_warn(&format!(
                "Skipping very short seg (len={len:.3}) near ({:.1},{:.1})",
                p.x, p.y
            ));
        }

        let next = cuts[i + 1];
        let cur = &mut cuts[i];

        if cur.self_ref && !next.self_ref {
            if cur.before.is_some() && next.before.is_some() {
                cur.before = next.before;
            }
            if cur.after.is_some() && next.after.is_some() {
                cur.after = next.after;
            }
            cur.self_ref = false;
        }

        if cur.before.is_none() {
            cur.before = next.before;
        }
        if cur.after.is_none() {
            cur.after = next.after;
        }

        cuts.remove(i + 1);
    }

    /* step 2: emit a miniseg pair across every open gap */

    for i in 0..cuts.len().saturating_sub(1) {
        let cur = cuts[i];
        let next = cuts[i + 1];

        if cur.after.is_none() && next.before.is_none() {
            continue;
        }

        // nasty OPEN/CLOSED and CLOSED/OPEN transitions
        if let (Some(sec), None) = (cur.after, next.before) {
            if !cur.self_ref && !level.sectors[sec].warned_unclosed {
                let a = level.verts[cur.vertex].pos;
                let b = level.verts[next.vertex].pos;
                ctx.log.mini_warn(&format!(
                    "Sector #{sec} is unclosed near ({:.1},{:.1})",
                    (a.x + b.x) / 2.0,
                    (a.y + b.y) / 2.0
                ));
                level.sectors[sec].warned_unclosed = true;
            }
            continue;
        }
        if let (None, Some(sec)) = (cur.after, next.before) {
            if !next.self_ref && !level.sectors[sec].warned_unclosed {
                let a = level.verts[cur.vertex].pos;
                let b = level.verts[next.vertex].pos;
                ctx.log.mini_warn(&format!(
                    "Sector #{sec} is unclosed near ({:.1},{:.1})",
                    (a.x + b.x) / 2.0,
                    (a.y + b.y) / 2.0
                ));
                level.sectors[sec].warned_unclosed = true;
            }
            continue;
        }

        /* definite open space here */

        let mut after = cur.after;
        if cur.after != next.before {
            if !cur.self_ref && !next.self_ref {
                let a = level.verts[cur.vertex].pos;
                let b = level.verts[next.vertex].pos;
                ctx.log.mini_warn(&format!(
                    "Sector mismatch: #{} ({:.1},{:.1}) != #{} ({:.1},{:.1})",
                    cur.after.unwrap(),
                    a.x,
                    a.y,
                    next.before.unwrap(),
                    b.x,
                    b.y
                ));
            }

            // prefer the non-self-referencing sector
            if cur.self_ref && !next.self_ref {
                after = next.before;
                cuts[i].after = next.before;
            }
        }

        let seg = level.new_seg();
        let buddy = level.new_seg();

        {
            let s = &mut level.segs[seg];
            s.start = cur.vertex;
            s.end = next.vertex;
            s.partner = Some(buddy);
            s.sector = after;
            s.source_line = part.linedef;
        }
        {
            let b = &mut level.segs[buddy];
            b.start = next.vertex;
            b.end = cur.vertex;
            b.partner = Some(seg);
            b.sector = after;
            b.source_line = part.linedef;
        }

        level.recompute_seg(seg)?;
        level.recompute_seg(buddy)?;

        superblock::add_seg(pool, level, rights, seg);
        superblock::add_seg(pool, level, lefts, buddy);
    }

    // everything goes back on the quick-alloc list
    cuts.clear();
    Ok(())
}

/*============================== Tests ================================*/

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bsp::load::tests::ctx;
    use crate::bsp::{BuildInfo, Comms};
    use glam::dvec2;

    fn seg_between(
        level: &mut Level,
        a: (f64, f64),
        b: (f64, f64),
        line: Option<usize>,
    ) -> SegId {
        let va = level.new_vertex(dvec2(a.0, a.1));
        let vb = level.new_vertex(dvec2(b.0, b.1));
        let s = level.new_seg();
        level.segs[s].start = va;
        level.segs[s].end = vb;
        level.segs[s].linedef = line;
        level.segs[s].source_line = line;
        level.recompute_seg(s).unwrap();
        s
    }

    #[test]
    fn intersection_list_stays_sorted() {
        let mut level = Level::new();
        let part = seg_between(&mut level, (0.0, 0.0), (100.0, 0.0), None);
        let part = level.segs[part].clone();

        let mut cuts = Vec::new();
        for x in [70.0, 10.0, 40.0] {
            let v = level.new_vertex(dvec2(x, 0.0));
            add_intersection(&mut cuts, &level, v, &part, false);
        }

        let dists: Vec<f64> = cuts.iter().map(|c| c.along_dist).collect();
        assert_eq!(dists, vec![10.0, 40.0, 70.0]);

        // same vertex again is a no-op
        let first = cuts[0].vertex;
        add_intersection(&mut cuts, &level, first, &part, false);
        assert_eq!(cuts.len(), 3);
    }

    #[test]
    fn crossing_fast_paths() {
        let mut level = Level::new();
        let part = seg_between(&mut level, (50.0, -100.0), (50.0, 100.0), None);
        let horiz = seg_between(&mut level, (0.0, 10.0), (100.0, 10.0), None);

        let p = level.segs[part].clone();
        let h = level.segs[horiz].clone();
        let a = p.perp_dist(h.psx, h.psy);
        let b = p.perp_dist(h.pex, h.pey);

        let (x, y) = compute_intersection(&h, &p, a, b);
        assert_eq!((x, y), (50.0, 10.0));

        // diagonal case
        let diag = seg_between(&mut level, (0.0, 0.0), (100.0, 100.0), None);
        let d = level.segs[diag].clone();
        let a = p.perp_dist(d.psx, d.psy);
        let b = p.perp_dist(d.pex, d.pey);
        let (x, y) = compute_intersection(&d, &p, a, b);
        assert!((x - 50.0).abs() < 1e-9);
        assert!((y - 50.0).abs() < 1e-9);
    }

    #[test]
    fn split_preserves_partner_invariant() {
        let info = BuildInfo::default();
        let comms = Comms::new();
        let c = ctx(&info, &comms);

        let mut level = Level::new();
        level.doing_normal = true;
        // minimal sector so the split vertex walltips have something
        let right = seg_between(&mut level, (0.0, 0.0), (128.0, 0.0), Some(0));
        let left = {
            let s = level.new_seg();
            level.segs[s].start = level.segs[right].end;
            level.segs[s].end = level.segs[right].start;
            level.segs[s].side = 1;
            level.segs[s].linedef = Some(0);
            level.segs[s].source_line = Some(0);
            level.recompute_seg(s).unwrap();
            s
        };
        level.segs[right].partner = Some(left);
        level.segs[left].partner = Some(right);

        let mut pool = SuperPool::new();
        let new_half = split_seg(&mut level, &mut pool, &c, right, 64.0, 0.0).unwrap();

        // old pair still partnered, new pair cross-linked
        let new_partner = level.segs[new_half].partner.unwrap();
        assert_eq!(level.segs[new_partner].partner, Some(new_half));
        assert_eq!(level.segs[right].partner, Some(left));
        assert_eq!(level.segs[left].partner, Some(right));

        // all four halves meet at the same split vertex
        let v = level.segs[right].end;
        assert_eq!(level.segs[new_half].start, v);
        assert_eq!(level.segs[left].start, v);
        assert_eq!(level.segs[new_partner].end, v);

        // the new partner half is linked right after the partner
        assert_eq!(level.segs[left].next, Some(new_partner));

        // lengths add up
        assert_eq!(level.segs[right].p_length, 64.0);
        assert_eq!(level.segs[new_half].p_length, 64.0);
    }

    #[test]
    fn close_cuts_merge() {
        let info = BuildInfo::default();
        let comms = Comms::new();
        let c = ctx(&info, &comms);

        let mut level = Level::new();
        // one sector for the gap to open into
        level.sectors.push(crate::bsp::store::Sector {
            floor_h: 0,
            ceil_h: 128,
            floor_tex: [0; 8],
            ceil_tex: [0; 8],
            light: 160,
            special: 0,
            tag: 0,
            coalesce: false,
            ref_count: 1,
            has_polyobj: false,
            warned_unclosed: false,
            warned_facing: None,
            rej_group: 0,
            rej_next: 0,
            rej_prev: 0,
            index: 0,
        });

        let part = seg_between(&mut level, (0.0, 0.0), (100.0, 0.0), None);
        let part = level.segs[part].clone();

        let va = level.new_vertex(dvec2(10.0, 0.0));
        let vb = level.new_vertex(dvec2(10.05, 0.0)); // within merge range
        let vc = level.new_vertex(dvec2(90.0, 0.0));

        let mut cuts = vec![
            Intersection {
                vertex: va,
                along_dist: 10.0,
                self_ref: false,
                before: None,
                after: Some(0),
            },
            Intersection {
                vertex: vb,
                along_dist: 10.05,
                self_ref: false,
                before: Some(0),
                after: Some(0),
            },
            Intersection {
                vertex: vc,
                along_dist: 90.0,
                self_ref: false,
                before: Some(0),
                after: None,
            },
        ];

        let mut pool = SuperPool::new();
        let lefts = pool.alloc();
        let rights = pool.alloc();
        for b in [lefts, rights] {
            pool.block_mut(b).x2 = 256;
            pool.block_mut(b).y2 = 256;
        }

        add_minisegs(&mut level, &mut pool, &c, &part, lefts, rights, &mut cuts).unwrap();

        // the pair across the open gap: one seg each side
        assert_eq!(pool.block(rights).mini_num, 1);
        assert_eq!(pool.block(lefts).mini_num, 1);
        assert!(cuts.is_empty());

        // minisegs are partnered and carry the open sector
        let r = pool.block(rights).segs.unwrap();
        let l = pool.block(lefts).segs.unwrap();
        assert_eq!(level.segs[r].partner, Some(l));
        assert_eq!(level.segs[l].partner, Some(r));
        assert_eq!(level.segs[r].sector, Some(0));
        assert!(level.segs[r].linedef.is_none());
    }
}
