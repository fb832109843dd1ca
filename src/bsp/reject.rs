//! REJECT generation: union groups of mutually reachable sectors and
//! emit the bit matrix.
//!
//! Only very basic processing: sightlines are not traced, we just
//! find the isolated islands of sectors.  Sight cannot pass a linedef
//! lacking the two-sided flag (the standard engine refuses), so those
//! do not join groups.

use super::store::Level;
use super::Ctx;

/// Put each sector into its own group.
fn init_reject(level: &mut Level) {
    for (i, sec) in level.sectors.iter_mut().enumerate() {
        sec.rej_group = i;
        sec.rej_next = i;
        sec.rej_prev = i;
    }
}

/// For every proper two-sided linedef, merge the two sector groups.
fn group_sectors(level: &mut Level) {
    for i in 0..level.lines.len() {
        let line = &level.lines[i];

        let (Some(right), Some(left)) = (line.right, line.left) else {
            continue;
        };
        if !line.two_sided {
            continue;
        }

        let (Some(sec1), Some(sec2)) = (
            level.sides[right].sector,
            level.sides[left].sector,
        ) else {
            continue;
        };
        if sec1 == sec2 {
            continue;
        }

        if level.sectors[sec1].rej_group == level.sectors[sec2].rej_group {
            continue;
        }

        // absorb the larger group id into the smaller; sector numbers
        // generally rise over the linedef list, so this keeps the
        // relabelling cheap
        let (sec1, sec2) = if level.sectors[sec1].rej_group > level.sectors[sec2].rej_group {
            (sec2, sec1)
        } else {
            (sec1, sec2)
        };

        let new_group = level.sectors[sec1].rej_group;

        // relabel everything in the second ring
        level.sectors[sec2].rej_group = new_group;
        let mut tmp = level.sectors[sec2].rej_next;
        while tmp != sec2 {
            level.sectors[tmp].rej_group = new_group;
            tmp = level.sectors[tmp].rej_next;
        }

        // splice the rings together
        let next1 = level.sectors[sec1].rej_next;
        let next2 = level.sectors[sec2].rej_next;

        level.sectors[next1].rej_prev = sec2;
        level.sectors[next2].rej_prev = sec1;

        level.sectors[sec1].rej_next = next2;
        level.sectors[sec2].rej_next = next1;
    }
}

fn create_matrix(level: &Level) -> Vec<u8> {
    let num = level.sectors.len();
    let mut matrix = vec![0u8; (num * num + 7) / 8];

    for view in 0..num {
        for target in 0..view {
            if level.sectors[view].rej_group == level.sectors[target].rej_group {
                continue;
            }

            // two bits at a time keeps the matrix symmetric
            let p1 = view * num + target;
            let p2 = target * num + view;

            matrix[p1 >> 3] |= 1 << (p1 & 7);
            matrix[p2 >> 3] |= 1 << (p2 & 7);
        }
    }

    matrix
}

/// Build the REJECT lump.
pub fn build_reject(level: &mut Level, ctx: &Ctx) -> Vec<u8> {
    ctx.log.ticker();

    init_reject(level);
    group_sectors(level);

    let matrix = create_matrix(level);
    ctx.log.verbose("Added simple reject lump");
    matrix
}

/*============================== Tests ================================*/

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bsp::load::load_level;
    use crate::bsp::load::tests::{MapLumps, ctx};
    use crate::bsp::{BuildInfo, Comms};
    use crate::wad::raw::NO_INDEX;

    fn bit(matrix: &[u8], num: usize, i: usize, j: usize) -> bool {
        let p = i * num + j;
        matrix[p >> 3] & (1 << (p & 7)) != 0
    }

    fn add_box(map: &mut MapLumps, sector: u16, x0: i16, y0: i16, size: i16) {
        let sd: Vec<u16> = (0..4).map(|_| map.sidedef(sector)).collect();
        let v = [
            map.vertex(x0, y0),
            map.vertex(x0 + size, y0),
            map.vertex(x0 + size, y0 + size),
            map.vertex(x0, y0 + size),
        ];
        map.linedef(v[0], v[3], 1, 0, sd[0], NO_INDEX);
        map.linedef(v[3], v[2], 1, 0, sd[1], NO_INDEX);
        map.linedef(v[2], v[1], 1, 0, sd[2], NO_INDEX);
        map.linedef(v[1], v[0], 1, 0, sd[3], NO_INDEX);
    }

    #[test]
    fn disconnected_rooms_cannot_see_each_other() {
        let mut map = MapLumps::new();
        let a = map.sector(0, 128, 0);
        let b = map.sector(0, 128, 0);
        add_box(&mut map, a, 0, 0, 128);
        add_box(&mut map, b, 512, 0, 128);
        map.thing(64, 64, 1);

        let info = BuildInfo::default();
        let comms = Comms::new();
        let c = ctx(&info, &comms);
        let mut level = load_level(&map.into_wad(), 0, &c).unwrap();

        let matrix = build_reject(&mut level, &c);
        assert_eq!(matrix.len(), 1); // ceil(4/8)

        assert!(bit(&matrix, 2, 0, 1));
        assert!(bit(&matrix, 2, 1, 0)); // symmetric
        assert!(!bit(&matrix, 2, 0, 0)); // diagonal clear
        assert!(!bit(&matrix, 2, 1, 1));
    }

    #[test]
    fn connected_sectors_share_a_group() {
        // two sectors joined by a two-sided line
        let mut map = MapLumps::new();
        let a = map.sector(0, 128, 0);
        let b = map.sector(32, 128, 0);

        let v00 = map.vertex(0, 0);
        let v10 = map.vertex(128, 0);
        let v0m = map.vertex(0, 128);
        let v1m = map.vertex(128, 128);
        let v01 = map.vertex(0, 256);
        let v11 = map.vertex(128, 256);

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
        let comms = Comms::new();
        let c = ctx(&info, &comms);
        let mut level = load_level(&map.into_wad(), 0, &c).unwrap();

        let matrix = build_reject(&mut level, &c);
        assert!(matrix.iter().all(|&b| b == 0));

        assert_eq!(level.sectors[0].rej_group, level.sectors[1].rej_group);
    }

    #[test]
    fn two_sided_flag_is_required() {
        // the joining line lacks the TWO_SIDED flag: groups stay apart
        let mut map = MapLumps::new();
        let a = map.sector(0, 128, 0);
        let b = map.sector(32, 128, 0);

        let v0m = map.vertex(0, 128);
        let v1m = map.vertex(128, 128);
        let div_r = map.sidedef(b);
        let div_l = map.sidedef(a);
        map.linedef(v1m, v0m, 1, 0, div_r, div_l); // flags = impassable only

        let info = BuildInfo::default();
        let comms = Comms::new();
        let c = ctx(&info, &comms);
        let mut level = load_level(&map.into_wad(), 0, &c).unwrap();

        let matrix = build_reject(&mut level, &c);
        assert!(bit(&matrix, 2, 0, 1));
        assert!(bit(&matrix, 2, 1, 0));
    }

    #[test]
    fn grouping_is_transitive() {
        // sectors 0-1 joined, 1-2 joined: all three in one group
        let mut map = MapLumps::new();
        let s0 = map.sector(0, 128, 0);
        let s1 = map.sector(0, 128, 0);
        let s2 = map.sector(0, 128, 0);

        let a = map.vertex(0, 0);
        let b = map.vertex(64, 0);
        let c_ = map.vertex(128, 0);
        let d = map.vertex(192, 0);

        let r01 = map.sidedef(s0);
        let l01 = map.sidedef(s1);
        map.linedef(a, b, 4, 0, r01, l01);

        let r12 = map.sidedef(s1);
        let l12 = map.sidedef(s2);
        map.linedef(c_, d, 4, 0, r12, l12);

        let info = BuildInfo::default();
        let comms = Comms::new();
        let c = ctx(&info, &comms);
        let mut level = load_level(&map.into_wad(), 0, &c).unwrap();

        let matrix = build_reject(&mut level, &c);
        assert!(matrix.iter().all(|&v| v == 0));

        let g = level.sectors[0].rej_group;
        assert_eq!(level.sectors[1].rej_group, g);
        assert_eq!(level.sectors[2].rej_group, g);

        // the ring visits all three sectors
        let mut seen = vec![0usize];
        let mut cur = level.sectors[0].rej_next;
        while cur != 0 {
            seen.push(cur);
            cur = level.sectors[cur].rej_next;
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2]);
    }
}
