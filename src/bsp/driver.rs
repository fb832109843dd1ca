//! Per-level orchestration and the whole-run loop:
//! Load -> Analyse -> Build -> Finalise -> Write, then a consolidated
//! report of every limit the maps ran into.

use super::split::Intersection;
use super::store::{BspChild, Level};
use super::superblock::SuperPool;
use super::{
    BuildError, BuildInfo, BuildResult, Comms, Ctx, LevelLimits, Log, analyse, blockmap, build,
    finalise, load, reject, save,
};
use crate::wad::{Wad, name_str};

/// What happened to one level.
#[derive(Debug)]
pub struct LevelReport {
    pub name: String,
    pub built: bool,
    pub limits: LevelLimits,
    /// Present when the level was abandoned.
    pub error: Option<String>,
}

/// Outcome of a whole run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub reports: Vec<LevelReport>,
}

impl RunSummary {
    pub fn levels_built(&self) -> usize {
        self.reports.iter().filter(|r| r.built).count()
    }

    pub fn levels_failed(&self) -> usize {
        self.reports.len() - self.levels_built()
    }
}

/// Owns the long-lived state of a run: configuration, the cancel
/// channel, and the quick-alloc pools that persist across levels.
pub struct Driver<'a> {
    info: BuildInfo,
    comms: Comms,
    log: &'a dyn Log,

    pool: SuperPool,
    cuts: Vec<Intersection>,
}

impl<'a> Driver<'a> {
    pub fn new(mut info: BuildInfo, comms: Comms, log: &'a dyn Log) -> Driver<'a> {
        for fix in info.sanitise() {
            log.warn(&fix);
        }

        Driver {
            info,
            comms,
            log,
            pool: SuperPool::new(),
            cuts: Vec::new(),
        }
    }

    /// Compile one level in place.
    fn handle_level(
        &mut self,
        wad: &mut Wad,
        marker: usize,
        limits: &mut LevelLimits,
    ) -> BuildResult<()> {
        // built from the individual fields so the quick-alloc pools
        // stay mutably borrowable alongside it
        let ctx = Ctx {
            info: &self.info,
            comms: &self.comms,
            log: self.log,
        };

        if ctx.cancelled() {
            return Err(BuildError::Cancelled);
        }

        let name = name_str(&wad.lump(marker).name).to_owned();
        let mut level = load::load_level(wad, marker, &ctx)?;

        let mut message = if level.doing_normal {
            format!("Building normal and GL nodes on {name}")
        } else {
            format!("Building GL nodes on {name}")
        };
        if level.doing_hexen {
            message.push_str(" (Hexen)");
        }
        ctx.log.msg(&message);

        analyse::analyse_level(&mut level, &ctx)?;

        let grid = blockmap::init_grid(&level, &ctx);

        let seg_list = build::create_segs(&mut level, &mut self.pool, &grid, &ctx, limits)?;

        let stale_root = level.stale_nodes.len().checked_sub(1);

        let tree = build::build_nodes(
            &mut level,
            &mut self.pool,
            &ctx,
            seg_list,
            0,
            stale_root,
            &mut self.cuts,
        );
        self.pool.free_block(seg_list);
        let tree = tree?;

        finalise::clockwise_bsp_tree(&mut level, &ctx)?;

        ctx.log.verbose(&format!(
            "Built {} NODES, {} SSECTORS, {} SEGS, {} VERTEXES",
            level.nodes.len(),
            level.subsecs.len(),
            level.num_complete_seg,
            level.num_normal_vert + level.num_gl_vert
        ));

        if let BspChild::Node(root) = tree {
            ctx.log.verbose(&format!(
                "Heights of left and right subtrees = ({},{})",
                build::bsp_height(&level, level.nodes[root].left.child),
                build::bsp_height(&level, level.nodes[root].right.child)
            ));
        }

        save::save_level(&mut level, wad, marker, tree, &ctx, limits)?;

        if level.doing_normal {
            self.put_reject(&mut level, wad, marker);

            let bmap = blockmap::build_blockmap(&level, grid, &ctx, limits)?;
            wad.set_level_lump(marker, "BLOCKMAP", bmap);
        }

        Ok(())
    }

    fn put_reject(&self, level: &mut Level, wad: &mut Wad, marker: usize) {
        let ctx = Ctx {
            info: &self.info,
            comms: &self.comms,
            log: self.log,
        };

        if self.info.no_reject {
            // an absent REJECT still breaks engines; give them zeros
            if wad.find_level_lump(marker, "REJECT").is_none() {
                let n = level.sectors.len();
                wad.set_level_lump(marker, "REJECT", vec![0; (n * n + 7) / 8]);
            }
            return;
        }

        let matrix = reject::build_reject(level, &ctx);
        wad.set_level_lump(marker, "REJECT", matrix);
    }

    /// Compile every level in the archive.  A failed level is reported
    /// and does not poison its neighbours; internal errors abort.
    pub fn run(&mut self, wad: &mut Wad) -> BuildResult<RunSummary> {
        let mut summary = RunSummary::default();

        // markers are re-discovered each round: writing a level's
        // lumps shifts every directory index after it
        let mut level_no = 0;
        loop {
            let markers = wad.level_indices();
            if level_no >= markers.len() {
                break;
            }
            let marker = markers[level_no];
            level_no += 1;

            if self.comms.cancelled() {
                return Err(BuildError::Cancelled);
            }

            let name = name_str(&wad.lump(marker).name).to_owned();
            let mut limits = LevelLimits::default();

            match self.handle_level(wad, marker, &mut limits) {
                Ok(()) => summary.reports.push(LevelReport {
                    name,
                    built: true,
                    limits,
                    error: None,
                }),
                Err(BuildError::Cancelled) => return Err(BuildError::Cancelled),
                Err(err @ (BuildError::Internal(_) | BuildError::Wad(_))) => return Err(err),
                Err(err) => {
                    self.cuts.clear();
                    self.log.warn(&format!("{name} failed: {err}"));
                    summary.reports.push(LevelReport {
                        name,
                        built: false,
                        limits,
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        self.report_failures(&summary);
        Ok(summary)
    }

    /// End-of-run summary of limit problems, by severity.
    fn report_failures(&self, summary: &RunSummary) {
        let soft: Vec<&LevelReport> = summary
            .reports
            .iter()
            .filter(|r| !r.limits.soft.is_empty())
            .collect();
        let v5: Vec<&LevelReport> = summary
            .reports
            .iter()
            .filter(|r| !r.limits.v5_switch.is_empty())
            .collect();
        let hard: Vec<&LevelReport> = summary
            .reports
            .iter()
            .filter(|r| !r.limits.hard.is_empty())
            .collect();

        if !soft.is_empty() {
            let names: Vec<&str> = soft.iter().map(|r| r.name.as_str()).collect();
            self.log.msg(&format!(
                "Levels {} overflowed the original engine's limits; \
                 they need a limit-removing port",
                names.join(", ")
            ));
        }

        if !v5.is_empty() {
            let names: Vec<&str> = v5.iter().map(|r| r.name.as_str()).collect();
            self.log.msg(&format!(
                "Levels {} were written in V5 GL-nodes format",
                names.join(", ")
            ));
        }

        if !hard.is_empty() {
            let names: Vec<&str> = hard.iter().map(|r| r.name.as_str()).collect();
            self.log.msg(&format!(
                "Levels {} overflowed the node format itself and will not run",
                names.join(", ")
            ));
        }
    }
}

/*============================== Tests ================================*/

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bsp::NullLog;
    use crate::bsp::load::tests::MapLumps;
    use crate::bsp::store::LinedefFlags;
    use crate::wad::raw::{
        self, NO_INDEX, RawHexenLinedef, RawHexenThing, RawNode, RawSeg, RawSubsec, encode_record,
    };

    fn run_wad(mut wad: Wad, info: BuildInfo) -> (Wad, RunSummary) {
        let log = NullLog;
        let mut driver = Driver::new(info, Comms::new(), &log);
        let summary = driver.run(&mut wad).unwrap();
        (wad, summary)
    }

    fn level_lump<'w>(wad: &'w Wad, name: &str) -> &'w [u8] {
        let marker = wad.level_indices()[0];
        &wad.lump(wad.find_level_lump(marker, name).unwrap()).data
    }

    /// Scenario: single triangular room.
    #[test]
    fn triangle_compiles_to_one_leaf() {
        let mut map = MapLumps::new();
        let s = map.sector(0, 128, 0);

        let a = map.vertex(0, 0);
        let b = map.vertex(128, 0);
        let c = map.vertex(0, 128);

        // interior on the right of each line
        for (from, to) in [(a, c), (c, b), (b, a)] {
            let sd = map.sidedef(s);
            map.linedef(from, to, 1, 0, sd, NO_INDEX);
        }
        map.thing(32, 32, 1);

        let (wad, summary) = run_wad(map.into_wad(), BuildInfo::default());
        assert_eq!(summary.levels_built(), 1);

        let subsecs: Vec<RawSubsec> = raw::decode_lump(level_lump(&wad, "SSECTORS")).unwrap();
        assert_eq!(subsecs.len(), 1);
        assert_eq!(subsecs[0].num, 3);

        assert!(level_lump(&wad, "NODES").is_empty());

        let segs: Vec<RawSeg> = raw::decode_lump(level_lump(&wad, "SEGS")).unwrap();
        assert_eq!(segs.len(), 3);

        // blockmap covers 2x2 cells
        let bmap = level_lump(&wad, "BLOCKMAP");
        assert_eq!(u16::from_le_bytes([bmap[4], bmap[5]]), 2);
        assert_eq!(u16::from_le_bytes([bmap[6], bmap[7]]), 2);

        // one sector: a single zero byte of reject
        assert_eq!(level_lump(&wad, "REJECT"), [0u8].as_slice());

        // the GL section exists
        let marker = wad.level_indices()[0];
        let names: Vec<String> = wad
            .lumps()
            .iter()
            .skip(marker)
            .take(17)
            .map(|l| crate::wad::name_str(&l.name).to_owned())
            .collect();
        assert!(names.contains(&"GL_MAP01".to_owned()));
        assert!(names.contains(&"GL_VERT".to_owned()));
        assert!(names.contains(&"GL_PVS".to_owned()));
    }

    /// Scenario: square room with a two-sided divider.
    #[test]
    fn divided_room_produces_one_node() {
        let map = crate::bsp::build::tests::divided_room();
        let (wad, summary) = run_wad(map.into_wad(), BuildInfo::default());
        assert_eq!(summary.levels_built(), 1);

        let nodes: Vec<RawNode> = raw::decode_lump(level_lump(&wad, "NODES")).unwrap();
        assert_eq!(nodes.len(), 1);

        let subsecs: Vec<RawSubsec> = raw::decode_lump(level_lump(&wad, "SSECTORS")).unwrap();
        assert_eq!(subsecs.len(), 2);

        let segs: Vec<RawSeg> = raw::decode_lump(level_lump(&wad, "SEGS")).unwrap();
        assert_eq!(segs.len(), 8);

        // both sectors see each other through the portal
        assert!(level_lump(&wad, "REJECT").iter().all(|&b| b == 0));
    }

    /// Scenario: two rooms with no shared wall.
    #[test]
    fn disconnected_rooms_reject_each_other() {
        let mut map = MapLumps::new();
        for x0 in [0i16, 512] {
            let s = map.sector(0, 128, 0);
            let v = [
                map.vertex(x0, 0),
                map.vertex(x0 + 128, 0),
                map.vertex(x0 + 128, 128),
                map.vertex(x0, 128),
            ];
            for (from, to) in [(v[0], v[3]), (v[3], v[2]), (v[2], v[1]), (v[1], v[0])] {
                let sd = map.sidedef(s);
                map.linedef(from, to, 1, 0, sd, NO_INDEX);
            }
        }
        map.thing(64, 64, 1);

        let (wad, summary) = run_wad(map.into_wad(), BuildInfo::default());
        assert_eq!(summary.levels_built(), 1);

        let subsecs: Vec<RawSubsec> = raw::decode_lump(level_lump(&wad, "SSECTORS")).unwrap();
        assert_eq!(subsecs.len(), 2);

        let reject = level_lump(&wad, "REJECT");
        // bits (0,1) and (1,0) set, diagonal clear
        assert_eq!(reject, [0b0000_0110u8].as_slice());
    }

    /// Scenario: a precious (tag 900) divider is used, never split.
    #[test]
    fn precious_divider_survives_unsplit() {
        let mut map = MapLumps::new();
        let s0 = map.sector(0, 128, 0);
        let s1 = map.sector(16, 128, 0);
        let s2 = map.sector(32, 128, 0);

        let w = 256i16;
        let v00 = map.vertex(0, 0);
        let v10 = map.vertex(w, 0);
        let v0a = map.vertex(0, 128);
        let v1a = map.vertex(w, 128);
        let v0b = map.vertex(0, 256);
        let v1b = map.vertex(w, 256);
        let v01 = map.vertex(0, 384);
        let v11 = map.vertex(w, 384);

        let sd0 = map.sidedef(s0);
        map.linedef(v00, v0a, 1, 0, sd0, NO_INDEX);
        let sd0 = map.sidedef(s0);
        map.linedef(v1a, v10, 1, 0, sd0, NO_INDEX);
        let sd0 = map.sidedef(s0);
        map.linedef(v10, v00, 1, 0, sd0, NO_INDEX);

        let sd1 = map.sidedef(s1);
        map.linedef(v0a, v0b, 1, 0, sd1, NO_INDEX);
        let sd1 = map.sidedef(s1);
        map.linedef(v1b, v1a, 1, 0, sd1, NO_INDEX);

        let sd2 = map.sidedef(s2);
        map.linedef(v0b, v01, 1, 0, sd2, NO_INDEX);
        let sd2 = map.sidedef(s2);
        map.linedef(v01, v11, 1, 0, sd2, NO_INDEX);
        let sd2 = map.sidedef(s2);
        map.linedef(v11, v1b, 1, 0, sd2, NO_INDEX);

        // precious divider between s0 and s1
        let r = map.sidedef(s1);
        let l = map.sidedef(s0);
        map.linedef(v1a, v0a, 4, 900, r, l);
        let precious_line = 8u16;

        // plain divider between s1 and s2
        let r = map.sidedef(s2);
        let l = map.sidedef(s1);
        map.linedef(v1b, v0b, 4, 0, r, l);

        map.thing(128, 64, 1);

        let (wad, summary) = run_wad(map.into_wad(), BuildInfo::default());
        assert_eq!(summary.levels_built(), 1);

        let segs: Vec<RawSeg> = raw::decode_lump(level_lump(&wad, "SEGS")).unwrap();
        let on_precious = segs
            .iter()
            .filter(|s| s.linedef == precious_line)
            .count();

        // both sides intact: exactly one seg per side, never split
        assert_eq!(on_precious, 2);
    }

    /// Scenario: very long partition gets halved deltas on output.
    #[test]
    fn long_node_deltas_are_halved() {
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
        map.linedef(v00, v0m, 1, 0, lo, NO_INDEX);
        let lo = map.sidedef(a);
        map.linedef(v1m, v10, 1, 0, lo, NO_INDEX);
        let lo = map.sidedef(a);
        map.linedef(v10, v00, 1, 0, lo, NO_INDEX);
        let up = map.sidedef(b);
        map.linedef(v0m, v01, 1, 0, up, NO_INDEX);
        let up = map.sidedef(b);
        map.linedef(v01, v11, 1, 0, up, NO_INDEX);
        let up = map.sidedef(b);
        map.linedef(v11, v1m, 1, 0, up, NO_INDEX);

        let r = map.sidedef(b);
        let l = map.sidedef(a);
        map.linedef(v1m, v0m, 4, 0, r, l);

        let (wad, summary) = run_wad(map.into_wad(), BuildInfo::default());
        assert_eq!(summary.levels_built(), 1);

        let nodes: Vec<RawNode> = raw::decode_lump(level_lump(&wad, "NODES")).unwrap();
        assert_eq!(nodes.len(), 1);

        // partition is 35000 long: halved to fit the i16 field
        assert_eq!(nodes[0].dx.abs(), 17500);
        assert_eq!(nodes[0].dy, 0);
    }

    /// Scenario: Hexen polyobj discovery.
    #[test]
    fn hexen_polyobj_lines_become_precious() {
        let mut map = MapLumps::new();
        let inner = map.sector(0, 128, 0);

        // room walls (one-sided)
        let v = [
            map.vertex(-256, -256),
            map.vertex(256, -256),
            map.vertex(256, 256),
            map.vertex(-256, 256),
        ];
        let mut hexen_lines = Vec::new();
        for (from, to) in [(v[0], v[3]), (v[3], v[2]), (v[2], v[1]), (v[1], v[0])] {
            let sd = map.sidedef(inner);
            hexen_lines.push(RawHexenLinedef {
                start: from,
                end: to,
                flags: 1,
                line_type: 0,
                args: [0; 5],
                right: sd,
                left: NO_INDEX,
            });
        }

        // the polyobj square: four chained two-sided lines, the first
        // carrying PO_LINE_START with tag 1 and sequence type 3
        let p = [
            map.vertex(-32, -32),
            map.vertex(32, -32),
            map.vertex(32, 32),
            map.vertex(-32, 32),
        ];
        let chain = [(p[0], p[1]), (p[1], p[2]), (p[2], p[3]), (p[3], p[0])];
        let first_poly_line = hexen_lines.len() as u16;
        for (i, (from, to)) in chain.into_iter().enumerate() {
            let right = map.sidedef(inner);
            let left = map.sidedef(inner);
            hexen_lines.push(RawHexenLinedef {
                start: from,
                end: to,
                flags: 4,
                line_type: if i == 0 { 1 } else { 0 }, // PO_LINE_START
                args: if i == 0 { [1, 0, 3, 0, 0] } else { [0; 5] },
                right,
                left,
            });
        }

        let mut linedefs = Vec::new();
        for l in &hexen_lines {
            encode_record(&mut linedefs, l);
        }
        map.linedefs = linedefs;

        // Hexen things: player start + polyobj anchor with angle = tag 1
        let mut things = Vec::new();
        encode_record(&mut things, &RawHexenThing {
            tid: 0,
            x: -128,
            y: -128,
            height: 0,
            angle: 0,
            thing_type: 1,
            options: 7,
            special: 0,
            args: [0; 5],
        });
        encode_record(&mut things, &RawHexenThing {
            tid: 0,
            x: 0,
            y: 0,
            height: 0,
            angle: 1, // polyobj tag
            thing_type: raw::PO_ANCHOR_TYPE,
            options: 7,
            special: 0,
            args: [0; 5],
        });
        map.things = things;
        map.behavior = Some(vec![0; 16]);

        let wad = map.into_wad();
        let info = BuildInfo::default();
        let comms = Comms::new();
        let log = NullLog;
        let ctx = Ctx {
            info: &info,
            comms: &comms,
            log: &log,
        };

        let mut level = load::load_level(&wad, 0, &ctx).unwrap();
        analyse::analyse_level(&mut level, &ctx).unwrap();

        assert_eq!(level.polyobjs.len(), 1);
        let po = &level.polyobjs[0];
        assert_eq!(po.tag, 1);
        assert_eq!(po.seq_type, 3);
        assert_eq!(po.lines.len(), 4);

        for i in 0..4 {
            let line = &level.lines[first_poly_line as usize + i];
            assert!(line.polyobj);
            assert!(line.is_precious);
            // two-sided members gain bottom unpegging
            assert!(line.flags.contains(LinedefFlags::LOWER_UNPEGGED));
        }
    }

    /// Running the pipeline twice produces byte-identical output.
    #[test]
    fn build_is_deterministic() {
        let make = || {
            let map = crate::bsp::build::tests::divided_room();
            run_wad(map.into_wad(), BuildInfo::default()).0
        };

        let (a, b) = (make(), make());
        for name in ["NODES", "SEGS", "SSECTORS", "BLOCKMAP", "REJECT", "VERTEXES"] {
            assert_eq!(level_lump(&a, name), level_lump(&b, name), "{name} differs");
        }
        assert_eq!(a.to_bytes(), b.to_bytes());
    }

    /// A second full build over already-compiled output still succeeds.
    #[test]
    fn rebuild_over_own_output() {
        let map = crate::bsp::build::tests::divided_room();
        let (wad, _) = run_wad(map.into_wad(), BuildInfo::default());

        // force a rebuild: with nodes present, doing_normal needs -normal
        let info = BuildInfo {
            force_normal: true,
            ..BuildInfo::default()
        };
        let (wad2, summary) = run_wad(wad, info);
        assert_eq!(summary.levels_built(), 1);

        let nodes: Vec<RawNode> = raw::decode_lump(level_lump(&wad2, "NODES")).unwrap();
        assert_eq!(nodes.len(), 1);
    }

    /// A broken level is reported but does not poison its neighbour.
    #[test]
    fn failed_level_does_not_poison_neighbours() {
        let mut good = crate::bsp::build::tests::divided_room();
        good.thing(10, 10, 1);

        let mut lumps = vec![
            crate::wad::Lump::new("MAP01", vec![]),
            crate::wad::Lump::new("THINGS", vec![]),
            crate::wad::Lump::new("LINEDEFS", vec![]), // empty: load error
            crate::wad::Lump::new("SIDEDEFS", vec![0; 30]),
            crate::wad::Lump::new("VERTEXES", vec![0; 8]),
            crate::wad::Lump::new("SECTORS", vec![0; 26]),
        ];
        let good_wad = good.into_wad();
        lumps.extend(good_wad.lumps().iter().cloned());

        // the second MAP01 marker becomes MAP02
        let pos = lumps
            .iter()
            .enumerate()
            .filter(|(_, l)| name_str(&l.name) == "MAP01")
            .map(|(i, _)| i)
            .nth(1)
            .unwrap();
        lumps[pos] = crate::wad::Lump::new("MAP02", vec![]);
        let wad = Wad::from_lumps(crate::wad::WadKind::Pwad, lumps);

        let log = NullLog;
        let mut driver = Driver::new(BuildInfo::default(), Comms::new(), &log);
        let mut wad = wad;
        let summary = driver.run(&mut wad).unwrap();

        assert_eq!(summary.reports.len(), 2);
        assert!(!summary.reports[0].built);
        assert!(summary.reports[0].error.is_some());
        assert!(summary.reports[1].built);
    }
}
