//! Writing the compiled level back out: canonical map lumps, the
//! classic SEGS/SSECTORS/NODES family, and the GL_xxx family with its
//! V2/V3/V5 escalations.

use super::finalise;
use super::store::{BspChild, Level, NodeId, SegId};
use super::{BuildResult, Ctx, LevelLimits, Limits};
use crate::geom::{self, Adler32};
use crate::wad::raw::{
    self, NO_INDEX, RawGlSeg, RawHexenLinedef, RawLinedef, RawNode, RawSector, RawSeg, RawSidedef,
    RawSubsec, RawV2Vertex, RawV3Seg, RawV3Subsec, RawV5Node, RawVertex, encode_record,
};
use crate::wad::Wad;

const V2_MAGIC: &[u8; 4] = b"gNd2";
const V3_MAGIC: &[u8; 4] = b"gNd3";
const V5_MAGIC: &[u8; 4] = b"gNd5";

/// 16-bit vertex reference; GL vertices get the top bit.
fn vertex_index_16(level: &Level, v: usize) -> u16 {
    let vert = &level.verts[v];
    if vert.is_gl {
        (vert.index as u16) | 0x8000
    } else {
        vert.index as u16
    }
}

/// 32-bit variant used by V5 lumps.
fn vertex_index_32(level: &Level, v: usize) -> u32 {
    let vert = &level.verts[v];
    if vert.is_gl {
        (vert.index as u32) | 0x8000_0000
    } else {
        vert.index as u32
    }
}

/// Every seg that reached a subsector, in output order.
fn sorted_segs(level: &Level) -> Vec<SegId> {
    let mut segs: Vec<SegId> = (0..level.segs.len())
        .filter(|&i| level.segs[i].index.is_some())
        .collect();
    segs.sort_by_key(|&i| level.segs[i].index.unwrap());
    segs
}

fn seg_dist(level: &Level, seg_id: SegId) -> u16 {
    let seg = &level.segs[seg_id];
    let line = &level.lines[seg.linedef.unwrap()];

    let from = if seg.side != 0 { line.end } else { line.start };
    let f = level.verts[from].pos;
    let s = level.verts[seg.start].pos;

    geom::compute_dist(s.x - f.x, s.y - f.y).ceil() as i32 as u16
}

/*------------------------- map lump writers --------------------------*/

pub fn put_vertices(level: &Level, do_gl: bool, limits: &mut LevelLimits) -> BuildResult<Vec<u8>> {
    let mut lump = Vec::new();
    let mut count = 0;

    for vert in &level.verts {
        if vert.is_gl != do_gl {
            continue;
        }
        encode_record(&mut lump, &RawVertex {
            x: geom::round_i(vert.pos.x) as i16,
            y: geom::round_i(vert.pos.y) as i16,
        });
        count += 1;
    }

    let expected = if do_gl {
        level.num_gl_vert
    } else {
        level.num_normal_vert
    };
    if count != expected {
        return Err(super::BuildError::internal(format!(
            "put_vertices miscounted ({count} != {expected})"
        )));
    }

    if level.doing_normal && !do_gl && count > 65534 {
        limits.mark_hard(Limits::VERTEXES);
    } else if count > 32767 {
        limits.mark_soft(if do_gl { Limits::GL_VERT } else { Limits::VERTEXES });
    }

    Ok(lump)
}

pub fn put_v2_vertices(level: &Level, do_v5: bool, limits: &mut LevelLimits) -> BuildResult<Vec<u8>> {
    let mut lump = Vec::new();
    lump.extend_from_slice(if do_v5 { V5_MAGIC } else { V2_MAGIC });

    let mut count = 0;
    for vert in &level.verts {
        if !vert.is_gl {
            continue;
        }
        encode_record(&mut lump, &RawV2Vertex {
            x: (vert.pos.x * 65536.0) as i32,
            y: (vert.pos.y * 65536.0) as i32,
        });
        count += 1;
    }

    if count != level.num_gl_vert {
        return Err(super::BuildError::internal(format!(
            "put_v2_vertices miscounted ({count} != {})",
            level.num_gl_vert
        )));
    }

    if count > 32767 {
        limits.mark_soft(Limits::GL_VERT);
    }

    Ok(lump)
}

pub fn put_sectors(level: &Level, limits: &mut LevelLimits) -> Vec<u8> {
    let mut lump = Vec::new();

    for sec in &level.sectors {
        encode_record(&mut lump, &RawSector {
            floor_h: sec.floor_h,
            ceil_h: sec.ceil_h,
            floor_tex: sec.floor_tex,
            ceil_tex: sec.ceil_tex,
            light: sec.light,
            special: sec.special,
            tag: sec.tag,
        });
    }

    if level.sectors.len() > 65534 {
        limits.mark_hard(Limits::SECTORS);
    } else if level.sectors.len() > 32767 {
        limits.mark_soft(Limits::SECTORS);
    }

    lump
}

pub fn put_sidedefs(level: &Level, limits: &mut LevelLimits) -> Vec<u8> {
    let mut lump = Vec::new();

    for side in &level.sides {
        encode_record(&mut lump, &RawSidedef {
            x_offset: side.x_offset,
            y_offset: side.y_offset,
            upper_tex: side.upper_tex,
            lower_tex: side.lower_tex,
            mid_tex: side.mid_tex,
            sector: side
                .sector
                .map(|s| level.sectors[s].index as u16)
                .unwrap_or(NO_INDEX),
        });
    }

    if level.sides.len() > 65534 {
        limits.mark_hard(Limits::SIDEDEFS);
    } else if level.sides.len() > 32767 {
        limits.mark_soft(Limits::SIDEDEFS);
    }

    lump
}

pub fn put_linedefs(level: &Level, limits: &mut LevelLimits) -> Vec<u8> {
    let mut lump = Vec::new();

    for line in &level.lines {
        encode_record(&mut lump, &RawLinedef {
            start: level.verts[line.start].index as u16,
            end: level.verts[line.end].index as u16,
            flags: line.flags.bits(),
            line_type: line.line_type,
            tag: line.tag,
            right: line
                .right
                .map(|s| level.sides[s].index as u16)
                .unwrap_or(NO_INDEX),
            left: line
                .left
                .map(|s| level.sides[s].index as u16)
                .unwrap_or(NO_INDEX),
        });
    }

    if level.lines.len() > 65534 {
        limits.mark_hard(Limits::LINEDEFS);
    } else if level.lines.len() > 32767 {
        limits.mark_soft(Limits::LINEDEFS);
    }

    lump
}

pub fn put_linedefs_hexen(level: &Level, limits: &mut LevelLimits) -> Vec<u8> {
    let mut lump = Vec::new();

    for line in &level.lines {
        encode_record(&mut lump, &RawHexenLinedef {
            start: level.verts[line.start].index as u16,
            end: level.verts[line.end].index as u16,
            flags: line.flags.bits(),
            line_type: line.line_type as u8,
            args: line.args,
            right: line
                .right
                .map(|s| level.sides[s].index as u16)
                .unwrap_or(NO_INDEX),
            left: line
                .left
                .map(|s| level.sides[s].index as u16)
                .unwrap_or(NO_INDEX),
        });
    }

    if level.lines.len() > 65534 {
        limits.mark_hard(Limits::LINEDEFS);
    } else if level.lines.len() > 32767 {
        limits.mark_soft(Limits::LINEDEFS);
    }

    lump
}

/*------------------------- BSP lump writers --------------------------*/

pub fn put_segs(level: &Level, limits: &mut LevelLimits) -> BuildResult<Vec<u8>> {
    let mut lump = Vec::new();
    let mut count = 0;

    for seg_id in sorted_segs(level) {
        let seg = &level.segs[seg_id];

        // minisegs and degenerates stay out of the classic lump
        if seg.linedef.is_none() || seg.degenerate {
            continue;
        }

        encode_record(&mut lump, &RawSeg {
            start: vertex_index_16(level, seg.start),
            end: vertex_index_16(level, seg.end),
            angle: geom::angle_to_bam(seg.p_angle),
            linedef: level.lines[seg.linedef.unwrap()].index as u16,
            flip: seg.side,
            dist: seg_dist(level, seg_id),
        });
        count += 1;
    }

    if count != level.num_complete_seg {
        return Err(super::BuildError::internal(format!(
            "put_segs miscounted ({count} != {})",
            level.num_complete_seg
        )));
    }

    if count > 65534 {
        limits.mark_hard(Limits::SEGS);
    } else if count > 32767 {
        limits.mark_soft(Limits::SEGS);
    }

    Ok(lump)
}

pub fn put_gl_segs(level: &Level, limits: &mut LevelLimits) -> BuildResult<Vec<u8>> {
    let mut lump = Vec::new();
    let mut count = 0;

    for seg_id in sorted_segs(level) {
        let seg = &level.segs[seg_id];

        if seg.degenerate {
            continue;
        }

        encode_record(&mut lump, &RawGlSeg {
            start: vertex_index_16(level, seg.start),
            end: vertex_index_16(level, seg.end),
            linedef: seg
                .linedef
                .map(|l| level.lines[l].index as u16)
                .unwrap_or(NO_INDEX),
            side: seg.side,
            partner: seg
                .partner
                .and_then(|p| level.segs[p].index)
                .map(|i| i as u16)
                .unwrap_or(NO_INDEX),
        });
        count += 1;
    }

    if count != level.num_complete_seg {
        return Err(super::BuildError::internal(format!(
            "put_gl_segs miscounted ({count} != {})",
            level.num_complete_seg
        )));
    }

    if count > 65534 {
        return Err(super::BuildError::internal("too many GL segs for V2 format"));
    }
    if count > 32767 {
        limits.mark_soft(Limits::GL_SEGS);
    }

    Ok(lump)
}

pub fn put_v3_segs(level: &Level, do_v5: bool) -> BuildResult<Vec<u8>> {
    let mut lump = Vec::new();
    if !do_v5 {
        lump.extend_from_slice(V3_MAGIC);
    }

    let mut count = 0;
    for seg_id in sorted_segs(level) {
        let seg = &level.segs[seg_id];

        if seg.degenerate {
            continue;
        }

        let (start, end) = if do_v5 {
            (vertex_index_32(level, seg.start), vertex_index_32(level, seg.end))
        } else {
            (
                level.verts[seg.start].index as u32,
                level.verts[seg.end].index as u32,
            )
        };

        encode_record(&mut lump, &RawV3Seg {
            start,
            end,
            linedef: seg
                .linedef
                .map(|l| level.lines[l].index as u16)
                .unwrap_or(NO_INDEX),
            side: seg.side,
            partner: seg
                .partner
                .and_then(|p| level.segs[p].index)
                .map(|i| i as u32)
                .unwrap_or(0xFFFF_FFFF),
        });
        count += 1;
    }

    if count != level.num_complete_seg {
        return Err(super::BuildError::internal(format!(
            "put_v3_segs miscounted ({count} != {})",
            level.num_complete_seg
        )));
    }

    Ok(lump)
}

pub fn put_subsecs(level: &Level, do_gl: bool, limits: &mut LevelLimits) -> BuildResult<Vec<u8>> {
    let mut lump = Vec::new();

    for sub in &level.subsecs {
        let first = sub
            .seg_list
            .and_then(|s| level.segs[s].index)
            .ok_or_else(|| super::BuildError::internal("subsector head seg has no index"))?;

        encode_record(&mut lump, &RawSubsec {
            num: sub.seg_count as u16,
            first: first as u16,
        });
    }

    if level.subsecs.len() > 32767 {
        limits.mark_hard(if do_gl { Limits::GL_SSECT } else { Limits::SSECTORS });
    }

    Ok(lump)
}

pub fn put_v3_subsecs(level: &Level, do_v5: bool, limits: &mut LevelLimits) -> BuildResult<Vec<u8>> {
    let mut lump = Vec::new();
    if !do_v5 {
        lump.extend_from_slice(V3_MAGIC);
    }

    for sub in &level.subsecs {
        let first = sub
            .seg_list
            .and_then(|s| level.segs[s].index)
            .ok_or_else(|| super::BuildError::internal("subsector head seg has no index"))?;

        encode_record(&mut lump, &RawV3Subsec {
            num: sub.seg_count as u32,
            first: first as u32,
        });
    }

    if !do_v5 && level.subsecs.len() > 32767 {
        limits.mark_hard(Limits::GL_SSECT);
    }

    Ok(lump)
}

fn raw_bbox(b: &super::store::Bbox) -> raw::RawBbox {
    raw::RawBbox {
        maxy: b.maxy as i16,
        miny: b.miny as i16,
        minx: b.minx as i16,
        maxx: b.maxx as i16,
    }
}

fn child_ref_16(level: &Level, child: BspChild) -> BuildResult<u16> {
    match child {
        BspChild::Node(n) => level.nodes[n]
            .index
            .map(|i| i as u16)
            .ok_or_else(|| super::BuildError::internal("bad child pointer in node")),
        BspChild::Subsec(s) => Ok(level.subsecs[s].index as u16 | 0x8000),
    }
}

fn child_ref_32(level: &Level, child: BspChild) -> BuildResult<u32> {
    match child {
        BspChild::Node(n) => level.nodes[n]
            .index
            .map(|i| i as u32)
            .ok_or_else(|| super::BuildError::internal("bad child pointer in node")),
        BspChild::Subsec(s) => Ok(level.subsecs[s].index as u32 | 0x8000_0000),
    }
}

fn put_one_node(
    level: &mut Level,
    node_id: NodeId,
    do_v5: bool,
    lump: &mut Vec<u8>,
    cur_index: &mut usize,
) -> BuildResult<()> {
    // children first: post-order keeps every child index below its
    // parent's
    let (right, left) = {
        let node = &level.nodes[node_id];
        (node.right.child, node.left.child)
    };

    if let BspChild::Node(r) = right {
        put_one_node(level, r, do_v5, lump, cur_index)?;
    }
    if let BspChild::Node(l) = left {
        put_one_node(level, l, do_v5, lump, cur_index)?;
    }

    level.nodes[node_id].index = Some(*cur_index);
    *cur_index += 1;

    let node = &level.nodes[node_id];
    let div = if node.too_long { 2 } else { 1 };

    if do_v5 {
        encode_record(lump, &RawV5Node {
            x: node.x as i16,
            y: node.y as i16,
            dx: (node.dx / div) as i16,
            dy: (node.dy / div) as i16,
            b1: raw_bbox(&node.right.bounds),
            b2: raw_bbox(&node.left.bounds),
            right: child_ref_32(level, node.right.child)?,
            left: child_ref_32(level, node.left.child)?,
        });
    } else {
        encode_record(lump, &RawNode {
            x: node.x as i16,
            y: node.y as i16,
            dx: (node.dx / div) as i16,
            dy: (node.dy / div) as i16,
            b1: raw_bbox(&node.right.bounds),
            b2: raw_bbox(&node.left.bounds),
            right: child_ref_16(level, node.right.child)?,
            left: child_ref_16(level, node.left.child)?,
        });
    }

    Ok(())
}

pub fn put_nodes(
    level: &mut Level,
    root: BspChild,
    do_v5: bool,
    limits: &mut LevelLimits,
) -> BuildResult<Vec<u8>> {
    let mut lump = Vec::new();
    let mut cur_index = 0;

    if let BspChild::Node(root) = root {
        put_one_node(level, root, do_v5, &mut lump, &mut cur_index)?;
    }

    if cur_index != level.nodes.len() {
        return Err(super::BuildError::internal(format!(
            "put_nodes miscounted ({cur_index} != {})",
            level.nodes.len()
        )));
    }

    if !do_v5 && cur_index > 32767 {
        limits.mark_hard(Limits::NODES);
    }

    Ok(lump)
}

/*--------------------------- whole level -----------------------------*/

/// Checksum over the (current) VERTEXES + LINEDEFS lumps, stored in
/// the GL marker so hosts can spot a stale GWA.
fn gl_checksum(wad: &Wad, marker: usize) -> u32 {
    let mut crc = Adler32::new();

    for name in ["VERTEXES", "LINEDEFS"] {
        if let Some(idx) = wad.find_level_lump(marker, name) {
            crc.add_block(&wad.lump(idx).data);
        }
    }
    crc.finish()
}

/// Write every output lump for the level.  Runs the round-off /
/// normalise sweeps at the points the formats require them.
pub fn save_level(
    level: &mut Level,
    wad: &mut Wad,
    marker: usize,
    root: BspChild,
    ctx: &Ctx,
    limits: &mut LevelLimits,
) -> BuildResult<()> {
    let force_v3 = ctx.info.spec_version == 3;
    let mut force_v5 = ctx.info.spec_version == 5;

    // V1 output rounds everything to integers up front
    if ctx.info.spec_version == 1 {
        finalise::round_off_bsp_tree(level, ctx)?;
    }

    /* GL lumps */

    if level.num_normal_vert > 32767 || level.num_gl_vert > 32767 {
        if ctx.info.spec_version < 3 {
            force_v5 = true;
            limits.mark_v5(Limits::VERTEXES | Limits::GL_SEGS);
        }
    }
    if sorted_segs(level).len() > 65534 {
        if ctx.info.spec_version < 3 {
            force_v5 = true;
            limits.mark_v5(Limits::GL_SSECT | Limits::GL_SEGS);
        }
    }
    if level.nodes.len() > 32767 {
        if ctx.info.spec_version < 5 {
            force_v5 = true;
            limits.mark_v5(Limits::GL_NODES);
        }
    }

    let gl_vert = if ctx.info.spec_version == 1 {
        put_vertices(level, true, limits)?
    } else {
        put_v2_vertices(level, force_v5, limits)?
    };

    let gl_segs = if force_v3 || force_v5 {
        put_v3_segs(level, force_v5)?
    } else {
        put_gl_segs(level, limits)?
    };

    let gl_ssect = if force_v3 || force_v5 {
        put_v3_subsecs(level, force_v5, limits)?
    } else {
        put_subsecs(level, true, limits)?
    };

    let gl_nodes = put_nodes(level, root, force_v5, limits)?;

    /* normal lumps */

    if level.doing_normal {
        if ctx.info.spec_version != 1 {
            finalise::round_off_bsp_tree(level, ctx)?;
        }
        finalise::normalise_bsp_tree(level, ctx)?;

        let vertexes = put_vertices(level, false, limits)?;
        wad.set_level_lump(marker, "VERTEXES", vertexes);
        wad.set_level_lump(marker, "SECTORS", put_sectors(level, limits));
        wad.set_level_lump(marker, "SIDEDEFS", put_sidedefs(level, limits));

        if level.doing_hexen {
            wad.set_level_lump(marker, "LINEDEFS", put_linedefs_hexen(level, limits));
        } else {
            wad.set_level_lump(marker, "LINEDEFS", put_linedefs(level, limits));
        }

        wad.set_level_lump(marker, "SEGS", put_segs(level, limits)?);
        wad.set_level_lump(marker, "SSECTORS", put_subsecs(level, false, limits)?);
        wad.set_level_lump(marker, "NODES", put_nodes(level, root, false, limits)?);
    }

    /* the GL section goes after the level span */

    let checksum = gl_checksum(wad, marker);
    let gl_marker = wad.set_gl_marker(marker, format!("CHECKSUM=0x{checksum:08x}").into_bytes());

    wad.set_gl_lump(gl_marker, "GL_VERT", gl_vert);
    wad.set_gl_lump(gl_marker, "GL_SEGS", gl_segs);
    wad.set_gl_lump(gl_marker, "GL_SSECT", gl_ssect);
    wad.set_gl_lump(gl_marker, "GL_NODES", gl_nodes);
    wad.set_gl_lump(gl_marker, "GL_PVS", Vec::new());

    Ok(())
}

/*============================== Tests ================================*/

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bsp::build::tests::{build_map, divided_room};
    use crate::bsp::load::tests::{ctx, square_room};
    use crate::bsp::{BuildInfo, Comms};

    fn finalised(map: crate::bsp::load::tests::MapLumps, info: &BuildInfo) -> (Level, BspChild) {
        let (mut level, tree) = build_map(map, info);
        let comms = Comms::new();
        finalise::clockwise_bsp_tree(&mut level, &ctx(info, &comms)).unwrap();
        (level, tree)
    }

    #[test]
    fn seg_records_encode_angle_and_dist() {
        let info = BuildInfo::default();
        let (level, _) = finalised(square_room(), &info);
        let mut limits = LevelLimits::default();

        let lump = put_segs(&level, &mut limits).unwrap();
        let records: Vec<RawSeg> = raw::decode_lump(&lump).unwrap();
        assert_eq!(records.len(), 4);

        for rec in &records {
            // whole-wall segs start at their linedef start
            assert_eq!(rec.dist, 0);
            assert_eq!(rec.flip, 0);
            // square walls are axis-aligned: angles are multiples of 90
            assert_eq!(rec.angle % 16384, 0);
        }
    }

    #[test]
    fn gl_segs_record_partners() {
        let info = BuildInfo::default();
        let (level, _) = finalised(divided_room(), &info);
        let mut limits = LevelLimits::default();

        let lump = put_gl_segs(&level, &mut limits).unwrap();
        let records: Vec<RawGlSeg> = raw::decode_lump(&lump).unwrap();
        assert_eq!(records.len(), 8);

        // the divider pair points at each other
        let partnered: Vec<(usize, &RawGlSeg)> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.partner != NO_INDEX)
            .collect();
        assert_eq!(partnered.len(), 2);

        let (i, a) = partnered[0];
        let (j, b) = partnered[1];
        assert_eq!(a.partner as usize, j);
        assert_eq!(b.partner as usize, i);
    }

    #[test]
    fn node_lump_is_post_order() {
        let info = BuildInfo::default();
        let (mut level, tree) = finalised(divided_room(), &info);
        let mut limits = LevelLimits::default();

        let lump = put_nodes(&mut level, tree, false, &mut limits).unwrap();
        let records: Vec<RawNode> = raw::decode_lump(&lump).unwrap();
        assert_eq!(records.len(), 1);

        let root = &records[0];
        // both children are subsectors
        assert!(root.right & 0x8000 != 0);
        assert!(root.left & 0x8000 != 0);
        assert_ne!(root.right, root.left);
    }

    #[test]
    fn leaf_root_writes_empty_nodes_lump() {
        let info = BuildInfo::default();
        let (mut level, tree) = finalised(square_room(), &info);
        let mut limits = LevelLimits::default();

        assert!(matches!(tree, BspChild::Subsec(_)));
        let lump = put_nodes(&mut level, tree, false, &mut limits).unwrap();
        assert!(lump.is_empty());
    }

    #[test]
    fn v2_vertices_carry_magic_and_fixed_point() {
        let info = BuildInfo::default();
        // the L room forces a split, so a GL vertex exists
        let (level, _) = finalised(
            crate::bsp::finalise::tests::l_shaped_room(),
            &info,
        );
        let mut limits = LevelLimits::default();

        let lump = put_v2_vertices(&level, false, &mut limits).unwrap();
        assert_eq!(&lump[0..4], b"gNd2");

        let body: Vec<RawV2Vertex> = raw::decode_lump(&lump[4..]).unwrap();
        assert_eq!(body.len(), level.num_gl_vert);

        // 16.16 fixed point: whole-unit coordinates have empty low words
        for v in &body {
            assert_eq!(v.x & 0xFFFF, 0);
        }
    }

    #[test]
    fn canonical_map_lumps_roundtrip() {
        let info = BuildInfo::default();
        let comms = Comms::new();
        let c = ctx(&info, &comms);
        let wad = square_room().into_wad();
        let level = crate::bsp::load::load_level(&wad, 0, &c).unwrap();
        let mut limits = LevelLimits::default();

        // without any analysis, serialising the store reproduces the
        // input lumps byte for byte
        let vertexes = put_vertices(&level, false, &mut limits).unwrap();
        let sectors = put_sectors(&level, &mut limits);
        let sidedefs = put_sidedefs(&level, &mut limits);
        let linedefs = put_linedefs(&level, &mut limits);

        let orig = |name: &str| wad.lump(wad.find_level_lump(0, name).unwrap()).data.clone();
        assert_eq!(vertexes, orig("VERTEXES"));
        assert_eq!(sectors, orig("SECTORS"));
        assert_eq!(sidedefs, orig("SIDEDEFS"));
        assert_eq!(linedefs, orig("LINEDEFS"));
    }
}
