//! Post-build sweeps over the finished tree: clockwise seg ordering,
//! miniseg stripping for the legacy lumps, and integer round-off.
//!
//! These cannot run during `build_nodes`: splitting a partnered seg
//! inserts the new half into the partner's list, usually in the wrong
//! place order-wise.

use smallvec::SmallVec;

use super::analyse::new_vertex_degenerate;
use super::store::{Level, SegId, SubsecId};
use super::{BuildResult, Ctx};
use crate::geom::{self, ANG_EPSILON};

fn collect_list(level: &Level, sub: SubsecId) -> SmallVec<[SegId; 32]> {
    level.iter_seg_list(level.subsecs[sub].seg_list).collect()
}

fn relink_list(level: &mut Level, sub: SubsecId, segs: &[SegId]) {
    level.subsecs[sub].seg_list = None;
    for &id in segs.iter().rev() {
        level.segs[id].next = level.subsecs[sub].seg_list;
        level.subsecs[sub].seg_list = Some(id);
    }
}

/// Sort the subsector's segs into clockwise order around its middle
/// (descending angle), then rotate so a real, preferably
/// non-self-referencing seg comes first -- the engine reads the sector
/// off that one.
fn clockwise_order(level: &mut Level, sub: SubsecId) {
    let mut array = collect_list(level, sub);
    let total = array.len();
    let mid = level.subsecs[sub].mid;

    // the now famous "double bubble" sort
    let mut i = 0;
    while i + 1 < total {
        let a = &level.segs[array[i]];
        let b = &level.segs[array[i + 1]];

        let angle1 = geom::compute_angle(a.psx - mid.x, a.psy - mid.y);
        let angle2 = geom::compute_angle(b.psx - mid.x, b.psy - mid.y);

        if angle1 + ANG_EPSILON < angle2 {
            array.swap(i, i + 1);
            if i > 0 {
                i -= 1;
            }
        } else {
            i += 1;
        }
    }

    let mut first = 0;
    let mut score = -1;

    for (i, &id) in array.iter().enumerate() {
        let seg = &level.segs[id];
        let cur_score = match seg.linedef {
            None => 0,
            Some(l) if level.lines[l].self_ref => 1,
            Some(_) => 2,
        };

        if cur_score > score {
            first = i;
            score = cur_score;
        }
    }

    let rotated: SmallVec<[SegId; 32]> =
        (0..total).map(|i| array[(i + first) % total]).collect();
    relink_list(level, sub, &rotated);
}

fn renumber_subsec_segs(level: &mut Level, sub: SubsecId) {
    let segs = collect_list(level, sub);

    level.subsecs[sub].seg_count = segs.len();
    for id in segs {
        level.segs[id].index = Some(level.num_complete_seg);
        level.num_complete_seg += 1;
    }
}

fn sanity_check_closed(level: &Level, ctx: &Ctx, sub: SubsecId) {
    let segs = collect_list(level, sub);
    let mut gaps = 0;

    for (i, &id) in segs.iter().enumerate() {
        let cur = &level.segs[id];
        let next = &level.segs[segs[(i + 1) % segs.len()]];

        if cur.pex != next.psx || cur.pey != next.psy {
            gaps += 1;
        }
    }

    if gaps > 0 {
        let mid = level.subsecs[sub].mid;
        ctx.log.mini_warn(&format!(
            "Subsector #{sub} near ({:.1},{:.1}) is not closed ({gaps} gaps, {} segs)",
            mid.x,
            mid.y,
            segs.len()
        ));
    }
}

fn sanity_check_same_sector(level: &mut Level, ctx: &Ctx, sub: SubsecId) {
    let segs = collect_list(level, sub);

    // find a suitable seg for comparison
    let compare = segs.iter().copied().find(|&id| {
        level.segs[id]
            .sector
            .map(|s| !level.sectors[s].coalesce)
            .unwrap_or(false)
    });
    let Some(compare) = compare else { return };
    let base = level.segs[compare].sector.unwrap();

    for &id in &segs {
        if id == compare {
            continue;
        }
        let Some(sector) = level.segs[id].sector else {
            continue;
        };
        if sector == base {
            continue;
        }

        // other sectors may share the subsector when tagged 900..999
        if level.sectors[sector].coalesce {
            continue;
        }

        if level.sectors[base].warned_facing == Some(sector) {
            continue;
        }
        level.sectors[base].warned_facing = Some(sector);

        let mid = level.subsecs[sub].mid;
        if let Some(line) = level.segs[id].linedef {
            ctx.log.mini_warn(&format!(
                "Sector #{base} has sidedef facing #{sector} (line #{line}) near ({:.0},{:.0})",
                mid.x, mid.y
            ));
        } else {
            ctx.log.mini_warn(&format!(
                "Sector #{base} has sidedef facing #{sector} near ({:.0},{:.0})",
                mid.x, mid.y
            ));
        }
    }
}

fn sanity_check_has_real_seg(level: &Level, sub: SubsecId) -> BuildResult<()> {
    let has_real = level
        .iter_seg_list(level.subsecs[sub].seg_list)
        .any(|id| level.segs[id].linedef.is_some());

    if has_real {
        Ok(())
    } else {
        Err(super::BuildError::internal(format!(
            "subsector #{sub} has no real seg"
        )))
    }
}

/// Order every subsector clockwise, assign the final seg indices, and
/// run the sanity checks.
pub fn clockwise_bsp_tree(level: &mut Level, ctx: &Ctx) -> BuildResult<()> {
    ctx.log.ticker();
    level.num_complete_seg = 0;

    for sub in 0..level.subsecs.len() {
        clockwise_order(level, sub);
        renumber_subsec_segs(level, sub);

        sanity_check_closed(level, ctx, sub);
        sanity_check_same_sector(level, ctx, sub);
        sanity_check_has_real_seg(level, sub)?;
    }
    Ok(())
}

/// Strip the minisegs out of every subsector for the legacy NODES
/// output, and re-index the survivors.
pub fn normalise_bsp_tree(level: &mut Level, ctx: &Ctx) -> BuildResult<()> {
    ctx.log.ticker();
    level.num_complete_seg = 0;

    for sub in 0..level.subsecs.len() {
        let segs = collect_list(level, sub);
        let mut kept: SmallVec<[SegId; 32]> = SmallVec::new();

        for id in segs {
            if level.segs[id].linedef.is_some() {
                level.segs[id].index = None;
                kept.push(id);
            } else {
                level.segs[id].index = None;
                level.segs[id].next = None;
            }
        }

        if kept.is_empty() {
            return Err(super::BuildError::internal(format!(
                "subsector #{sub} normalised to being empty"
            )));
        }

        relink_list(level, sub, &kept);
        renumber_subsec_segs(level, sub);
    }
    Ok(())
}

fn round_off_subsector(level: &mut Level, sub: SubsecId) -> BuildResult<()> {
    let segs = collect_list(level, sub);

    let mut last_real_degen: Option<SegId> = None;
    let mut real_total = 0;

    // first pass: switch to the integer twins, count the degenerates
    for &id in &segs {
        if let Some(dup) = level.verts[level.segs[id].start].normal_dup {
            level.segs[id].start = dup;
        }
        if let Some(dup) = level.verts[level.segs[id].end].normal_dup {
            level.segs[id].end = dup;
        }

        let s = level.verts[level.segs[id].start].pos;
        let e = level.verts[level.segs[id].end].pos;

        if geom::round_i(s.x) == geom::round_i(e.x) && geom::round_i(s.y) == geom::round_i(e.y) {
            level.segs[id].degenerate = true;
            if level.segs[id].linedef.is_some() {
                last_real_degen = Some(id);
            }
            continue;
        }

        if level.segs[id].linedef.is_some() {
            real_total += 1;
        }
    }

    // hopefully rare: every real seg collapsed.  Manufacture an end
    // vertex one rounding step away so one survives.
    if real_total == 0 {
        let Some(degen) = last_real_degen else {
            return Err(super::BuildError::internal(format!(
                "subsector #{sub} rounded off with no real segs"
            )));
        };

        let (start, end) = (level.segs[degen].start, level.segs[degen].end);
        let new_end = new_vertex_degenerate(level, start, end)?;
        level.segs[degen].end = new_end;
        level.segs[degen].degenerate = false;
    }

    // second pass: drop the collapsed ones
    let mut kept: SmallVec<[SegId; 32]> = SmallVec::new();
    for &id in &segs {
        if level.segs[id].degenerate {
            level.segs[id].index = None;
            level.segs[id].next = None;
        } else {
            level.segs[id].index = None;
            kept.push(id);
        }
    }

    if kept.is_empty() {
        return Err(super::BuildError::internal(format!(
            "subsector #{sub} rounded off to being empty"
        )));
    }

    relink_list(level, sub, &kept);
    Ok(())
}

/// Swap split vertices for their rounded-integer twins and drop segs
/// that collapse to a point under the rounding.
pub fn round_off_bsp_tree(level: &mut Level, ctx: &Ctx) -> BuildResult<()> {
    ctx.log.ticker();
    level.num_complete_seg = 0;

    for sub in 0..level.subsecs.len() {
        round_off_subsector(level, sub)?;
        renumber_subsec_segs(level, sub);
    }
    Ok(())
}

/*============================== Tests ================================*/
