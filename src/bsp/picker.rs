//! Partition selection: score every candidate seg against the current
//! seg set and keep the cheapest.
//!
//! The cost model penalises splits (much more so through precious
//! linedefs), near misses and cuts close to a seg end, imbalance
//! between the sides, and (slightly) diagonal partitions.  Superblocks
//! let whole boxes on one side of the candidate be priced in O(1).

use super::store::{Level, Seg, SegId, StaleNodeId};
use super::superblock::{self, SuperId, SuperPool};
use super::{BuildResult, Ctx};
use crate::geom::{DIST_EPSILON, IFFY_LEN};

/// Extra multiplier for splitting a precious linedef.
pub const PRECIOUS_MULTIPLY: i32 = 100;

/// Minimum real segs before a stale node is worth trying.
pub const SEG_REUSE_THRESHOLD: i32 = 200;

#[derive(Clone, Copy, Debug, Default)]
struct EvalInfo {
    cost: i64,
    splits: i32,
    iffy: i32,
    near_miss: i32,

    real_left: i32,
    real_right: i32,
    mini_left: i32,
    mini_right: i32,
}

/// Walk the superblock tree scoring `part` against every seg.
/// Returns `true` when the running cost already exceeds `best_cost`.
fn eval_partition_worker(
    pool: &SuperPool,
    level: &Level,
    block_id: SuperId,
    part: &Seg,
    factor: i32,
    best_cost: i64,
    info: &mut EvalInfo,
) -> bool {
    // price the whole block at once when it is entirely on one side
    match superblock::box_on_line_side(pool, block_id, part) {
        n if n < 0 => {
            info.real_left += pool.block(block_id).real_num;
            info.mini_left += pool.block(block_id).mini_num;
            return false;
        }
        n if n > 0 => {
            info.real_right += pool.block(block_id).real_num;
            info.mini_right += pool.block(block_id).mini_num;
            return false;
        }
        _ => {}
    }

    let factor = factor as i64;

    let mut cur = pool.block(block_id).segs;
    while let Some(seg_id) = cur {
        let check = &level.segs[seg_id];
        cur = check.next;

        // bad segs are caught early before wasting more work
        if info.cost > best_cost {
            return true;
        }

        let is_real = check.linedef.is_some();
        let add_left = |info: &mut EvalInfo| {
            if is_real {
                info.real_left += 1;
            } else {
                info.mini_left += 1;
            }
        };
        let add_right = |info: &mut EvalInfo| {
            if is_real {
                info.real_right += 1;
            } else {
                info.mini_right += 1;
            }
        };

        let (a, b) = if check.source_line.is_some() && check.source_line == part.source_line {
            (0.0, 0.0)
        } else {
            (
                part.perp_dist(check.psx, check.psy),
                part.perp_dist(check.pex, check.pey),
            )
        };
        let (fa, fb) = (a.abs(), b.abs());

        /* collinear with the partition: direction decides the side */
        if fa <= DIST_EPSILON && fb <= DIST_EPSILON {
            if check.pdx * part.pdx + check.pdy * part.pdy < 0.0 {
                add_left(info);
            } else {
                add_right(info);
            }
            continue;
        }

        // passing through a vertex is normally fine, but the vertex
        // may sit on a sector that must not be split and the
        // linedef-based checks would miss the sector being cut in half
        if fa <= DIST_EPSILON || fb <= DIST_EPSILON {
            if is_real && level.lines[check.linedef.unwrap()].is_precious {
                info.cost += 40 * factor * PRECIOUS_MULTIPLY as i64;
            }
        }

        /* wholly on the right */
        if a > -DIST_EPSILON && b > -DIST_EPSILON {
            add_right(info);

            if (a >= IFFY_LEN && b >= IFFY_LEN)
                || (a <= DIST_EPSILON && b >= IFFY_LEN)
                || (b <= DIST_EPSILON && a >= IFFY_LEN)
            {
                continue;
            }

            info.near_miss += 1;

            // near misses breed really short minisegs later, so the
            // closer the miss the higher the cost
            let qnty = if a <= DIST_EPSILON || b <= DIST_EPSILON {
                IFFY_LEN / a.max(b)
            } else {
                IFFY_LEN / a.min(b)
            };

            info.cost += (100.0 * factor as f64 * (qnty * qnty - 1.0)) as i64;
            continue;
        }

        /* wholly on the left */
        if a < DIST_EPSILON && b < DIST_EPSILON {
            add_left(info);

            if (a <= -IFFY_LEN && b <= -IFFY_LEN)
                || (a >= -DIST_EPSILON && b <= -IFFY_LEN)
                || (b >= -DIST_EPSILON && a <= -IFFY_LEN)
            {
                continue;
            }

            info.near_miss += 1;

            let qnty = if a >= -DIST_EPSILON || b >= -DIST_EPSILON {
                IFFY_LEN / -a.min(b)
            } else {
                IFFY_LEN / -a.max(b)
            };

            info.cost += (70.0 * factor as f64 * (qnty * qnty - 1.0)) as i64;
            continue;
        }

        /* opposite signs: the partition splits this seg */

        info.splits += 1;

        // tag >= 900 protects deep water / invisible lifts from being
        // chopped up unless every other option is exhausted
        if is_real && level.lines[check.linedef.unwrap()].is_precious {
            info.cost += 100 * factor * PRECIOUS_MULTIPLY as i64;
        } else {
            info.cost += 100 * factor;
        }

        // a cut very close to one end produces a really short seg,
        // one suspected source of slime trails
        if fa < IFFY_LEN || fb < IFFY_LEN {
            info.iffy += 1;

            let qnty = IFFY_LEN / fa.min(fb);
            info.cost += (140.0 * factor as f64 * (qnty * qnty - 1.0)) as i64;
        }
    }

    /* sub-blocks */
    for sub in pool.block(block_id).subs.into_iter().flatten() {
        if eval_partition_worker(pool, level, sub, part, factor as i32, best_cost, info) {
            return true;
        }
    }

    false
}

/// Total cost of `part` as a partition, or `None` when it must be
/// skipped (a side without real segs, or already beaten).
pub fn eval_partition(
    pool: &SuperPool,
    level: &Level,
    block_id: SuperId,
    part: &Seg,
    factor: i32,
    best_cost: i64,
) -> Option<i64> {
    let mut info = EvalInfo::default();

    if eval_partition_worker(pool, level, block_id, part, factor, best_cost, &mut info) {
        return None;
    }

    // a partition that puts everything on one side is useless
    if info.real_left == 0 || info.real_right == 0 {
        return None;
    }

    info.cost += 100 * (info.real_left - info.real_right).abs() as i64;

    // minisegs affect the balance too, to a lesser degree
    info.cost += 50 * (info.mini_left - info.mini_right).abs() as i64;

    // slight preference for purely horizontal/vertical partitions
    if part.pdx != 0.0 && part.pdy != 0.0 {
        info.cost += 25;
    }

    Some(info.cost)
}

/// Search the block tree for a seg lying along the stale node's
/// partition line.  Also reports whether it runs the opposite way.
fn find_seg_from_stale_node(
    pool: &SuperPool,
    level: &Level,
    block_id: SuperId,
    stale: &super::store::StaleNode,
) -> Option<(SegId, bool)> {
    let mut cur = pool.block(block_id).segs;
    while let Some(seg_id) = cur {
        let part = &level.segs[seg_id];
        cur = part.next;

        // minisegs cannot be partitions
        if part.linedef.is_none() {
            continue;
        }

        let fa = part.perp_dist(stale.x as f64, stale.y as f64).abs();
        let fb = part
            .perp_dist((stale.x + stale.dx) as f64, (stale.y + stale.dy) as f64)
            .abs();

        if fa < DIST_EPSILON && fb < DIST_EPSILON {
            let opposite = stale.dx as f64 * part.pdx + stale.dy as f64 * part.pdy < 0.0;
            return Some((seg_id, opposite));
        }
    }

    for sub in pool.block(block_id).subs.into_iter().flatten() {
        if let Some(found) = find_seg_from_stale_node(pool, level, sub, stale) {
            return Some(found);
        }
    }

    None
}

fn pick_node_worker(
    pool: &SuperPool,
    level: &Level,
    ctx: &Ctx,
    part_block: SuperId,
    seg_block: SuperId,
    best: &mut Option<SegId>,
    best_cost: &mut i64,
) -> BuildResult<()> {
    /* try each seg in this block as the partition */
    let mut cur = pool.block(part_block).segs;
    while let Some(seg_id) = cur {
        let part = &level.segs[seg_id];
        cur = part.next;

        if ctx.cancelled() {
            return Err(super::BuildError::Cancelled);
        }

        // minisegs cannot be partitions
        if part.linedef.is_none() {
            continue;
        }

        if let Some(cost) =
            eval_partition(pool, level, seg_block, part, ctx.info.factor, *best_cost)
        {
            // ties keep the earliest candidate
            if cost < *best_cost {
                *best_cost = cost;
                *best = Some(seg_id);
            }
        }
    }

    for sub in pool.block(part_block).subs.into_iter().flatten() {
        pick_node_worker(pool, level, ctx, sub, seg_block, best, best_cost)?;
    }

    Ok(())
}

/// Find the best partition seg for the current seg set, or `None` when
/// the set is convex.  A usable stale node short-circuits the search;
/// an unusable one is cleared so descendants fall back to the picker.
pub fn pick_node(
    pool: &SuperPool,
    level: &Level,
    ctx: &Ctx,
    block_id: SuperId,
    stale_nd: &mut Option<StaleNodeId>,
    stale_opposite: &mut bool,
) -> BuildResult<Option<SegId>> {
    ctx.log.ticker();

    // optional fast path when rebuilding GL nodes only: the original
    // nodes are usually decent partitions, and reusing them saves
    // heaps of time on large levels
    if let Some(st) = *stale_nd {
        if pool.block(block_id).real_num >= SEG_REUSE_THRESHOLD {
            let stale = level.stale_nodes[st];

            if let Some((best, opposite)) = find_seg_from_stale_node(pool, level, block_id, &stale)
            {
                let part = &level.segs[best];
                if eval_partition(pool, level, block_id, part, ctx.info.factor, i64::MAX)
                    .is_some()
                {
                    *stale_opposite = opposite;
                    return Ok(Some(best));
                }
            }
        }
    }

    *stale_nd = None;

    let mut best = None;
    let mut best_cost = i64::MAX;

    pick_node_worker(pool, level, ctx, block_id, block_id, &mut best, &mut best_cost)?;

    Ok(best)
}

/*============================== Tests ================================*/
