//! Map-lump decoding into the level store.
//!
//! Doom and Hexen record layouts are both handled; the Hexen variant is
//! selected by the presence of a BEHAVIOR lump (or forced by config).

use glam::dvec2;

use super::store::{Level, Linedef, LinedefFlags, Sector, Sidedef, StaleNode, Thing};
use super::{BuildResult, Ctx};
use crate::geom::DIST_EPSILON;
use crate::wad::raw::{
    self, NO_INDEX, RawHexenLinedef, RawHexenThing, RawLinedef, RawNode, RawSector, RawSidedef,
    RawThing, RawVertex,
};
use crate::wad::Wad;

/// Decode the named lump, failing the level when it is absent, empty or
/// not a whole number of records.
fn decode_required<T: bincode::Decode<()>>(
    wad: &Wad,
    marker: usize,
    name: &str,
) -> BuildResult<Vec<T>> {
    let idx = wad
        .find_level_lump(marker, name)
        .ok_or_else(|| super::BuildError::load(format!("couldn't find any {name}")))?;

    let data = &wad.lump(idx).data;
    let records = raw::decode_lump::<T>(data)
        .ok_or_else(|| super::BuildError::load(format!("truncated {name} lump")))?;

    if records.is_empty() {
        return Err(super::BuildError::load(format!("couldn't find any {name}")));
    }
    Ok(records)
}

fn get_vertices(level: &mut Level, wad: &Wad, marker: usize) -> BuildResult<()> {
    for raw in decode_required::<RawVertex>(wad, marker, "VERTEXES")? {
        let id = level.new_vertex(dvec2(raw.x as f64, raw.y as f64));
        level.verts[id].index = id;
    }

    level.num_normal_vert = level.verts.len();
    level.num_gl_vert = 0;
    level.num_complete_seg = 0;
    Ok(())
}

fn get_sectors(level: &mut Level, wad: &Wad, marker: usize) -> BuildResult<()> {
    for (i, raw) in decode_required::<RawSector>(wad, marker, "SECTORS")?
        .into_iter()
        .enumerate()
    {
        level.sectors.push(Sector {
            floor_h: raw.floor_h,
            ceil_h: raw.ceil_h,
            floor_tex: raw.floor_tex,
            ceil_tex: raw.ceil_tex,
            light: raw.light,
            special: raw.special,
            tag: raw.tag,
            coalesce: (900..1000).contains(&raw.tag),
            ref_count: 0,
            has_polyobj: false,
            warned_unclosed: false,
            warned_facing: None,
            rej_group: i,
            rej_next: i,
            rej_prev: i,
            index: i,
        });
    }
    Ok(())
}

fn get_sidedefs(level: &mut Level, wad: &Wad, marker: usize) -> BuildResult<()> {
    for (i, raw) in decode_required::<RawSidedef>(wad, marker, "SIDEDEFS")?
        .into_iter()
        .enumerate()
    {
        let sector = match raw.sector {
            NO_INDEX => None,
            s if (s as usize) < level.sectors.len() => Some(s as usize),
            _ => None,
        };

        if let Some(s) = sector {
            level.sectors[s].ref_count += 1;
        }

        level.sides.push(Sidedef {
            sector,
            x_offset: raw.x_offset,
            y_offset: raw.y_offset,
            upper_tex: raw.upper_tex,
            lower_tex: raw.lower_tex,
            mid_tex: raw.mid_tex,
            ref_count: 0,
            equiv: None,
            on_special: false,
            index: i,
        });
    }
    Ok(())
}

/// The sentinel and anything past the sidedef count mean "absent".
fn safe_sidedef(level: &Level, num: u16) -> Option<usize> {
    if num == NO_INDEX || num as usize >= level.sides.len() {
        return None;
    }
    Some(num as usize)
}

fn attach_line_sides(level: &mut Level, line: &mut Linedef, right: u16, left: u16) {
    line.right = safe_sidedef(level, right);
    line.left = safe_sidedef(level, left);

    for side in [line.right, line.left].into_iter().flatten() {
        level.sides[side].ref_count += 1;
        level.sides[side].on_special |= line.line_type > 0;
    }

    line.self_ref = match (line.left, line.right) {
        (Some(l), Some(r)) => level.sides[l].sector == level.sides[r].sector,
        _ => false,
    };
}

fn check_line_vertices(level: &Level, raw_start: u16, raw_end: u16, i: usize) -> BuildResult<()> {
    if raw_start as usize >= level.verts.len() || raw_end as usize >= level.verts.len() {
        return Err(super::BuildError::load(format!(
            "linedef #{i} references missing vertex"
        )));
    }
    Ok(())
}

fn get_linedefs(level: &mut Level, wad: &Wad, marker: usize) -> BuildResult<()> {
    for (i, raw) in decode_required::<RawLinedef>(wad, marker, "LINEDEFS")?
        .into_iter()
        .enumerate()
    {
        check_line_vertices(level, raw.start, raw.end, i)?;
        let (start, end) = (raw.start as usize, raw.end as usize);

        level.verts[start].ref_count += 1;
        level.verts[end].ref_count += 1;

        let zero_len = (level.verts[start].pos.x - level.verts[end].pos.x).abs() < DIST_EPSILON
            && (level.verts[start].pos.y - level.verts[end].pos.y).abs() < DIST_EPSILON;

        let mut line = Linedef {
            start,
            end,
            right: None,
            left: None,
            flags: LinedefFlags::from_bits_retain(raw.flags),
            line_type: raw.line_type,
            tag: raw.tag,
            args: [0; 5],
            two_sided: raw.flags & raw::LINEFLAG_TWO_SIDED != 0,
            is_precious: (900..1000).contains(&raw.tag),
            zero_len,
            self_ref: false,
            window_effect: false,
            polyobj: false,
            overlap: None,
            index: i,
        };

        attach_line_sides(level, &mut line, raw.right, raw.left);
        level.lines.push(line);
    }
    Ok(())
}

fn get_linedefs_hexen(level: &mut Level, wad: &Wad, marker: usize) -> BuildResult<()> {
    for (i, raw) in decode_required::<RawHexenLinedef>(wad, marker, "LINEDEFS")?
        .into_iter()
        .enumerate()
    {
        check_line_vertices(level, raw.start, raw.end, i)?;
        let (start, end) = (raw.start as usize, raw.end as usize);

        level.verts[start].ref_count += 1;
        level.verts[end].ref_count += 1;

        let zero_len = (level.verts[start].pos.x - level.verts[end].pos.x).abs() < DIST_EPSILON
            && (level.verts[start].pos.y - level.verts[end].pos.y).abs() < DIST_EPSILON;

        let mut line = Linedef {
            start,
            end,
            right: None,
            left: None,
            flags: LinedefFlags::from_bits_retain(raw.flags),
            line_type: raw.line_type as u16,
            tag: 0,
            args: raw.args,
            two_sided: raw.flags & raw::LINEFLAG_TWO_SIDED != 0,
            is_precious: false, // polyobj discovery marks these later
            zero_len,
            self_ref: false,
            window_effect: false,
            polyobj: false,
            overlap: None,
            index: i,
        };

        attach_line_sides(level, &mut line, raw.right, raw.left);
        level.lines.push(line);
    }
    Ok(())
}

fn get_things(level: &mut Level, wad: &Wad, marker: usize, ctx: &Ctx) {
    // a map without things is unplayable but not our problem
    let Some(idx) = wad.find_level_lump(marker, "THINGS") else {
        ctx.log.warn("couldn't find any Things");
        return;
    };

    let Some(records) = raw::decode_lump::<RawThing>(&wad.lump(idx).data) else {
        ctx.log.warn("truncated THINGS lump");
        return;
    };

    for (i, raw) in records.into_iter().enumerate() {
        level.things.push(Thing {
            x: raw.x,
            y: raw.y,
            angle: raw.angle,
            thing_type: raw.thing_type,
            options: raw.options,
            index: i,
        });
    }
}

fn get_things_hexen(level: &mut Level, wad: &Wad, marker: usize, ctx: &Ctx) {
    let Some(idx) = wad.find_level_lump(marker, "THINGS") else {
        ctx.log.warn("couldn't find any Things");
        return;
    };

    let Some(records) = raw::decode_lump::<RawHexenThing>(&wad.lump(idx).data) else {
        ctx.log.warn("truncated THINGS lump");
        return;
    };

    for (i, raw) in records.into_iter().enumerate() {
        level.things.push(Thing {
            x: raw.x,
            y: raw.y,
            angle: raw.angle,
            thing_type: raw.thing_type,
            options: raw.options,
            index: i,
        });
    }
}

fn get_stale_nodes(level: &mut Level, wad: &Wad, marker: usize) {
    let Some(idx) = wad.find_level_lump(marker, "NODES") else {
        return;
    };

    let Some(records) = raw::decode_lump::<RawNode>(&wad.lump(idx).data) else {
        return;
    };

    if records.len() < 5 {
        return;
    }

    let count = records.len();
    let child = |v: u16| -> Option<usize> {
        // subsector references (high bit) are of no use here
        if v & 0x8000 != 0 || v as usize >= count {
            None
        } else {
            Some(v as usize)
        }
    };

    for raw in records {
        level.stale_nodes.push(StaleNode {
            x: raw.x as i32,
            y: raw.y as i32,
            dx: raw.dx as i32,
            dy: raw.dy as i32,
            right: child(raw.right),
            left: child(raw.left),
        });
    }
}

/// Populate a fresh [`Level`] from the map at `marker`.
pub fn load_level(wad: &Wad, marker: usize, ctx: &Ctx) -> BuildResult<Level> {
    let mut level = Level::new();

    let normal_exists = wad.has_normal_nodes(marker);

    level.doing_normal = !ctx.info.gwa_mode
        && (ctx.info.force_normal || (!ctx.info.no_normal && !normal_exists));
    level.doing_hexen =
        wad.find_level_lump(marker, "BEHAVIOR").is_some() || ctx.info.force_hexen;

    for name in wad.duplicate_level_lumps(marker) {
        ctx.log.warn(&format!("duplicate {name} lump in level"));
    }

    get_vertices(&mut level, wad, marker)?;
    get_sectors(&mut level, wad, marker)?;
    get_sidedefs(&mut level, wad, marker)?;

    if level.doing_hexen {
        get_linedefs_hexen(&mut level, wad, marker)?;
        get_things_hexen(&mut level, wad, marker, ctx);
    } else {
        get_linedefs(&mut level, wad, marker)?;
        get_things(&mut level, wad, marker, ctx);
    }

    ctx.log.verbose(&format!(
        "Loaded {} vertices, {} sectors, {} sides, {} lines, {} things",
        level.verts.len(),
        level.sectors.len(),
        level.sides.len(),
        level.lines.len(),
        level.things.len()
    ));

    if ctx.info.fast
        && !level.doing_normal
        && normal_exists
        && level.sectors.len() > 5
        && level.lines.len() > 100
    {
        ctx.log.verbose("Using original nodes to speed things up");
        get_stale_nodes(&mut level, wad, marker);
    }

    Ok(level)
}

/*============================== Tests ================================*/
