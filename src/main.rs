//! Command-line front end for the node builder.
//!
//! ```bash
//! glnodes input.wad -o output.wad
//! ```

use anyhow::{Context, bail};
use clap::Parser;
use std::path::PathBuf;

use glnodes_rs::{BuildInfo, Comms, Driver, StdLog, Wad};

#[derive(Parser, Debug)]
#[command(name = "glnodes", version, about = "GL-friendly BSP node builder")]
struct Args {
    /// Input WAD file.
    input: PathBuf,

    /// Output WAD file (defaults to rewriting the input).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Cost multiplier for seg splits (1..32).
    #[arg(long, default_value_t = glnodes_rs::bsp::DEFAULT_FACTOR)]
    factor: i32,

    /// GL spec version to write: 1, 2, 3 or 5.
    #[arg(short = 'v', long = "spec", default_value_t = 2)]
    spec_version: u8,

    /// Don't build a new REJECT lump.
    #[arg(long)]
    noreject: bool,

    /// Print less.
    #[arg(short, long)]
    quiet: bool,

    /// Show minor warnings too.
    #[arg(short = 'w', long)]
    warnings: bool,

    /// Merge duplicate sidedefs.
    #[arg(long)]
    pack: bool,

    /// Merge duplicate vertices.
    #[arg(long)]
    mergevert: bool,

    /// Skip pruning of unused linedefs/sidedefs.
    #[arg(long)]
    noprune: bool,

    /// Also prune unused sectors.
    #[arg(long)]
    prunesec: bool,

    /// Force rebuilding the normal nodes even when present.
    #[arg(long = "normal")]
    force_normal: bool,

    /// Never write normal nodes, GL lumps only.
    #[arg(long = "nonormal")]
    no_normal: bool,

    /// Treat the output as a GWA companion (GL lumps only).
    #[arg(long)]
    forcegwa: bool,

    /// Treat the maps as Hexen format even without BEHAVIOR.
    #[arg(long)]
    hexen: bool,

    /// Reuse original nodes to speed up GL-only builds.
    #[arg(long)]
    fast: bool,

    /// Maximum number of blockmap cells (1000..64000).
    #[arg(long, default_value_t = 16_000)]
    maxblock: i32,

    /// Accept a blockmap whose offsets overflow 16 bits.
    #[arg(long)]
    allow_blockmap_overflow: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.spec_version == 4 {
        bail!("spec version 4 does not exist (use 3 or 5)");
    }

    let info = BuildInfo {
        factor: args.factor,
        spec_version: args.spec_version,
        no_reject: args.noreject,
        mini_warnings: args.warnings,
        force_hexen: args.hexen,
        pack_sides: args.pack,
        merge_vert: args.mergevert,
        no_prune: args.noprune,
        prune_sect: args.prunesec,
        no_normal: args.no_normal,
        force_normal: args.force_normal,
        gwa_mode: args.forcegwa,
        fast: args.fast,
        block_limit: args.maxblock,
        allow_blockmap_overflow: args.allow_blockmap_overflow,
    };

    let log = StdLog {
        quiet: args.quiet,
        show_mini: args.warnings,
    };

    let mut wad = Wad::from_file(&args.input)
        .with_context(|| format!("opening {}", args.input.display()))?;

    let comms = Comms::new();
    let mut driver = Driver::new(info, comms, &log);
    let summary = driver.run(&mut wad)?;

    let output = args.output.as_ref().unwrap_or(&args.input);
    wad.write_to_file(output)
        .with_context(|| format!("writing {}", output.display()))?;

    if !args.quiet {
        println!(
            "Built {} level(s), {} failed",
            summary.levels_built(),
            summary.levels_failed()
        );
    }

    if summary.levels_failed() > 0 {
        std::process::exit(1);
    }
    Ok(())
}
