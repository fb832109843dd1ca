//! BLOCKMAP generation: rasterise every linedef into a 128x128-unit
//! grid, share identical block-lists, and emit the packed lump.

use byteorder::{LittleEndian as LE, WriteBytesExt};

use super::store::{Bbox, Level};
use super::{BuildResult, Ctx, LevelLimits, Limits};
use crate::geom;
use crate::wad::raw::{RawBlockmapHeader, encode_record};

/// Offset value marking a block as a duplicate of a later one.
const DUMMY_DUP: usize = usize::MAX;

/// Blockmap origin and cell dimensions.
#[derive(Clone, Copy, Debug)]
pub struct Grid {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

/// One cell's line list plus the rolling checksum used to cheapen
/// duplicate detection.
#[derive(Clone, Debug, PartialEq, Eq)]
struct BlockList {
    xor: u16,
    lines: Vec<u16>,
}

impl BlockList {
    fn new() -> BlockList {
        BlockList {
            xor: 0x1234,
            lines: Vec::new(),
        }
    }

    fn add(&mut self, line_index: u16) {
        self.xor = self.xor.rotate_left(4) ^ line_index;
        self.lines.push(line_index);
    }
}

fn find_blockmap_limits(level: &Level) -> Bbox {
    let mut bbox = Bbox::empty();

    for line in &level.lines {
        if line.zero_len {
            continue;
        }
        let s = level.verts[line.start].pos;
        let e = level.verts[line.end].pos;
        bbox.add_point(s.x, s.y);
        bbox.add_point(e.x, e.y);
    }
    bbox
}

/// Work out the grid origin and size from the map bounds.  The origin
/// is rounded down to a multiple of 8 (vanilla convention).
pub fn init_grid(level: &Level, ctx: &Ctx) -> Grid {
    let bbox = find_blockmap_limits(level);

    ctx.log.msg(&format!(
        "Map goes from ({},{}) to ({},{})",
        bbox.minx, bbox.miny, bbox.maxx, bbox.maxy
    ));

    let x = bbox.minx - (bbox.minx & 0x7);
    let y = bbox.miny - (bbox.miny & 0x7);

    Grid {
        x,
        y,
        w: (bbox.maxx - x) / 128 + 1,
        h: (bbox.maxy - y) / 128 + 1,
    }
}

/// Shrink both dimensions by 12.5% until the cell count fits, then
/// re-centre the grid over the map.
fn truncate_grid(grid: &mut Grid, block_limit: i32, ctx: &Ctx, limits: &mut LevelLimits) {
    let orig_w = grid.w;
    let orig_h = grid.h;

    while grid.w * grid.h > block_limit {
        grid.w -= grid.w / 8;
        grid.h -= grid.h / 8;
    }

    ctx.log.warn(&format!(
        "Blockmap too large!  Truncated to {}x{} blocks",
        grid.w, grid.h
    ));
    limits.mark_soft(Limits::BMAP_TRUNC);

    grid.x += (grid.w - orig_w) * 128 / 2;
    grid.y += (grid.h - orig_h) * 128 / 2;
}

struct BlockmapBuilder {
    grid: Grid,
    cells: Vec<Option<BlockList>>,
}

impl BlockmapBuilder {
    fn add(&mut self, blk_num: usize, line_index: u16) {
        self.cells[blk_num]
            .get_or_insert_with(BlockList::new)
            .add(line_index);
    }

    fn add_line(&mut self, level: &Level, line_id: usize) {
        let line = &level.lines[line_id];
        let s = level.verts[line.start].pos;
        let e = level.verts[line.end].pos;

        let (x1, y1, x2, y2) = (s.x as i32, s.y as i32, e.x as i32, e.y as i32);
        let line_index = line_id as u16;

        let mut bx1 = (x1.min(x2) - self.grid.x) / 128;
        let mut by1 = (y1.min(y2) - self.grid.y) / 128;
        let mut bx2 = (x1.max(x2) - self.grid.x) / 128;
        let mut by2 = (y1.max(y2) - self.grid.y) / 128;

        // clamp against a truncated grid
        bx1 = bx1.max(0);
        by1 = by1.max(0);
        bx2 = bx2.min(self.grid.w - 1);
        by2 = by2.min(self.grid.h - 1);

        if bx2 < bx1 || by2 < by1 {
            return;
        }

        // purely horizontal / purely vertical lines cover their whole
        // cell range
        if by1 == by2 {
            for bx in bx1..=bx2 {
                self.add((by1 * self.grid.w + bx) as usize, line_index);
            }
            return;
        }
        if bx1 == bx2 {
            for by in by1..=by2 {
                self.add((by * self.grid.w + bx1) as usize, line_index);
            }
            return;
        }

        // diagonals: clip against each candidate cell
        for by in by1..=by2 {
            for bx in bx1..=bx2 {
                let minx = (self.grid.x + bx * 128) as f64;
                let miny = (self.grid.y + by * 128) as f64;

                if geom::line_touches_box(
                    minx,
                    miny,
                    minx + 127.0,
                    miny + 127.0,
                    x1 as f64,
                    y1 as f64,
                    x2 as f64,
                    y2 as f64,
                ) {
                    self.add((by * self.grid.w + bx) as usize, line_index);
                }
            }
        }
    }
}

/// Build and pack the BLOCKMAP lump for the level.
pub fn build_blockmap(
    level: &Level,
    grid: Grid,
    ctx: &Ctx,
    limits: &mut LevelLimits,
) -> BuildResult<Vec<u8>> {
    let mut grid = grid;

    if grid.w * grid.h > ctx.info.block_limit {
        truncate_grid(&mut grid, ctx.info.block_limit, ctx, limits);
    }

    let block_count = (grid.w * grid.h) as usize;

    let mut builder = BlockmapBuilder {
        grid,
        cells: vec![None; block_count],
    };

    ctx.log.ticker();

    for line_id in 0..level.lines.len() {
        if level.lines[line_id].zero_len {
            continue;
        }
        builder.add_line(level, line_id);
    }

    /* compression: sort the cells so identical lists sit together,
     * then share one copy of each run */

    let mut dups: Vec<usize> = (0..block_count).collect();
    dups.sort_by(|&a, &b| {
        let (a, b) = (&builder.cells[a], &builder.cells[b]);
        match (a, b) {
            (None, None) => std::cmp::Ordering::Equal,
            (None, Some(_)) => std::cmp::Ordering::Less,
            (Some(_), None) => std::cmp::Ordering::Greater,
            (Some(a), Some(b)) => a
                .lines
                .len()
                .cmp(&b.lines.len())
                .then(a.xor.cmp(&b.xor))
                .then(a.lines.cmp(&b.lines)),
        }
    });

    let mut ptrs = vec![0usize; block_count];
    let mut dup_order = dups.clone();

    let mut cur_offset = 4 + block_count + 2;
    let orig_header = 4 + block_count;
    let mut orig_size = orig_header;
    let new_header = cur_offset;
    let mut new_size = new_header;

    for i in 0..block_count {
        let blk_num = dups[i];

        let Some(list) = &builder.cells[blk_num] else {
            // all empty blocks share the null blocklist
            ptrs[blk_num] = 4 + block_count;
            dup_order[i] = DUMMY_DUP;
            orig_size += 2;
            continue;
        };

        let count = 2 + list.lines.len();

        let same_as_next = i + 1 < block_count
            && builder.cells[dups[i + 1]].as_ref() == Some(list);

        if same_as_next {
            // only the last of a run of duplicates is written out
            ptrs[blk_num] = cur_offset;
            dup_order[i] = DUMMY_DUP;
            orig_size += count;
            continue;
        }

        ptrs[blk_num] = cur_offset;
        cur_offset += count;
        orig_size += count;
        new_size += count;
    }

    if cur_offset > 65535 {
        limits.mark_hard(Limits::BMAP_OVERFLOW);

        if !ctx.info.allow_blockmap_overflow {
            return Err(super::BuildError::BlockmapOverflow);
        }
        ctx.log
            .warn("Blockmap has OVERFLOWED!  May cause problems or even crash");
    }

    let compression = if orig_size > new_size {
        (orig_size - new_size) * 100 / orig_size
    } else {
        0
    };

    /* write the lump */

    let mut lump = Vec::with_capacity(new_size * 2);

    encode_record(&mut lump, &RawBlockmapHeader {
        x_origin: grid.x as i16,
        y_origin: grid.y as i16,
        x_blocks: grid.w as u16,
        y_blocks: grid.h as u16,
    });

    for &ptr in &ptrs {
        if ptr == 0 {
            return Err(super::BuildError::internal("blockmap offset not set"));
        }
        lump.write_u16::<LE>(ptr as u16).unwrap();
    }

    // the shared null blocklist
    lump.write_u16::<LE>(0x0000).unwrap();
    lump.write_u16::<LE>(0xFFFF).unwrap();

    for i in 0..block_count {
        let blk_num = dup_order[i];
        if blk_num == DUMMY_DUP {
            continue;
        }

        let list = builder.cells[blk_num]
            .as_ref()
            .ok_or_else(|| super::BuildError::internal("blockmap block is empty"))?;

        lump.write_u16::<LE>(0x0000).unwrap();
        for &idx in &list.lines {
            lump.write_u16::<LE>(idx).unwrap();
        }
        lump.write_u16::<LE>(0xFFFF).unwrap();
    }

    ctx.log.msg(&format!(
        "Completed blockmap building (compression: {compression}%)"
    ));

    Ok(lump)
}

/*============================== Tests ================================*/

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bsp::load::load_level;
    use crate::bsp::load::tests::{MapLumps, ctx, square_room};
    use crate::bsp::{BuildInfo, Comms};
    use crate::wad::raw::NO_INDEX;
    use byteorder::ReadBytesExt;
    use std::io::Cursor;

    fn level_of(map: MapLumps) -> Level {
        let info = BuildInfo::default();
        let comms = Comms::new();
        load_level(&map.into_wad(), 0, &ctx(&info, &comms)).unwrap()
    }

    /// Decode the lump back into per-cell line lists.
    fn decompress(lump: &[u8]) -> (Grid, Vec<Vec<u16>>) {
        let mut cur = Cursor::new(lump);
        let x = cur.read_i16::<LE>().unwrap() as i32;
        let y = cur.read_i16::<LE>().unwrap() as i32;
        let w = cur.read_u16::<LE>().unwrap() as i32;
        let h = cur.read_u16::<LE>().unwrap() as i32;

        let count = (w * h) as usize;
        let offsets: Vec<u16> = (0..count)
            .map(|_| cur.read_u16::<LE>().unwrap())
            .collect();

        let mut cells = Vec::with_capacity(count);
        for off in offsets {
            let mut at = off as usize * 2;
            let zero = u16::from_le_bytes([lump[at], lump[at + 1]]);
            assert_eq!(zero, 0, "blocklist must start with 0x0000");
            at += 2;

            let mut lines = Vec::new();
            loop {
                let v = u16::from_le_bytes([lump[at], lump[at + 1]]);
                at += 2;
                if v == 0xFFFF {
                    break;
                }
                lines.push(v);
            }
            cells.push(lines);
        }

        (Grid { x, y, w, h }, cells)
    }

    #[test]
    fn origin_is_eight_aligned() {
        let mut map = MapLumps::new();
        let s = map.sector(0, 128, 0);
        let sd = map.sidedef(s);
        let a = map.vertex(-37, 13);
        let b = map.vertex(200, 100);
        map.linedef(a, b, 1, 0, sd, NO_INDEX);

        let level = level_of(map);
        let info = BuildInfo::default();
        let comms = Comms::new();
        let grid = init_grid(&level, &ctx(&info, &comms));

        assert_eq!(grid.x % 8, 0);
        assert_eq!(grid.y % 8, 0);
        assert!(grid.x <= -37 && grid.x > -45);
    }

    #[test]
    fn square_room_blockmap_roundtrip() {
        let level = level_of(square_room());
        let info = BuildInfo::default();
        let comms = Comms::new();
        let c = ctx(&info, &comms);

        let grid = init_grid(&level, &c);
        assert_eq!((grid.w, grid.h), (3, 3));

        let mut limits = LevelLimits::default();
        let lump = build_blockmap(&level, grid, &c, &mut limits).unwrap();
        let (grid2, cells) = decompress(&lump);

        assert_eq!((grid2.w, grid2.h), (3, 3));
        assert_eq!(cells.len(), 9);

        // west wall (line 0, x=0) must appear in every west-column cell
        for by in 0..3 {
            assert!(cells[(by * 3) as usize].contains(&0));
        }

        // centre cell holds no lines
        assert!(cells[4].is_empty());

        // every non-zero-length line appears somewhere
        for idx in 0..level.lines.len() as u16 {
            assert!(cells.iter().any(|c| c.contains(&idx)));
        }
    }

    #[test]
    fn empty_cells_share_the_null_list() {
        let level = level_of(square_room());
        let info = BuildInfo::default();
        let comms = Comms::new();
        let c = ctx(&info, &comms);

        let grid = init_grid(&level, &c);
        let mut limits = LevelLimits::default();
        let lump = build_blockmap(&level, grid, &c, &mut limits).unwrap();

        let mut cur = Cursor::new(&lump[8..]);
        let offsets: Vec<u16> = (0..9).map(|_| cur.read_u16::<LE>().unwrap()).collect();

        // the single empty cell points at the shared null list, which
        // sits directly after the offset table
        assert_eq!(offsets[4] as usize, 4 + 9);
    }

    #[test]
    fn identical_cells_share_storage() {
        // one vertical line spanning three cells: all three lists are
        // the singleton {0} and must be stored exactly once
        let mut map = MapLumps::new();
        let s = map.sector(0, 128, 0);
        let sd = map.sidedef(s);
        let a = map.vertex(8, 0);
        let b = map.vertex(8, 383);
        map.linedef(a, b, 1, 0, sd, NO_INDEX);

        let level = level_of(map);
        let info = BuildInfo::default();
        let comms = Comms::new();
        let c = ctx(&info, &comms);

        let grid = init_grid(&level, &c);
        assert_eq!((grid.w, grid.h), (1, 3));

        let mut limits = LevelLimits::default();
        let lump = build_blockmap(&level, grid, &c, &mut limits).unwrap();

        let mut cur = Cursor::new(&lump[8..]);
        let offsets: Vec<u16> = (0..3).map(|_| cur.read_u16::<LE>().unwrap()).collect();

        assert_eq!(offsets[0], offsets[1]);
        assert_eq!(offsets[1], offsets[2]);

        // header (4) + offsets (3) + null (2) + one list (2 + 1)
        assert_eq!(lump.len(), (4 + 3 + 2 + 3) * 2);

        let (_, cells) = decompress(&lump);
        assert!(cells.iter().all(|c| c == &vec![0u16]));
    }

    #[test]
    fn diagonal_lines_only_touch_crossed_cells() {
        let mut map = MapLumps::new();
        let s = map.sector(0, 128, 0);
        let sd = map.sidedef(s);
        // diagonal from corner to corner of a 384x384 area
        let a = map.vertex(0, 0);
        let b = map.vertex(383, 383);
        map.linedef(a, b, 1, 0, sd, NO_INDEX);

        let level = level_of(map);
        let info = BuildInfo::default();
        let comms = Comms::new();
        let c = ctx(&info, &comms);

        let grid = init_grid(&level, &c);
        let mut limits = LevelLimits::default();
        let lump = build_blockmap(&level, grid, &c, &mut limits).unwrap();
        let (_, cells) = decompress(&lump);

        // the diagonal crosses exactly the 3 cells on its path
        let touched = cells.iter().filter(|c| !c.is_empty()).count();
        assert_eq!(touched, 3);
    }

    #[test]
    fn truncation_keeps_grid_within_limit() {
        let mut map = MapLumps::new();
        let s = map.sector(0, 128, 0);
        let sd = map.sidedef(s);
        let a = map.vertex(-8000, -8000);
        let b = map.vertex(8000, 8000);
        map.linedef(a, b, 1, 0, sd, NO_INDEX);

        let level = level_of(map);
        let info = BuildInfo {
            block_limit: 1000,
            ..BuildInfo::default()
        };
        let comms = Comms::new();
        let c = ctx(&info, &comms);

        let grid = init_grid(&level, &c);
        assert!(grid.w * grid.h > 1000);

        let mut limits = LevelLimits::default();
        let lump = build_blockmap(&level, grid, &c, &mut limits).unwrap();
        let (grid2, _) = decompress(&lump);

        assert!(grid2.w * grid2.h <= 1000);
        assert!(limits.soft.contains(Limits::BMAP_TRUNC));
    }
}
