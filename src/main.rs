use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::path::PathBuf;

use relay_sim::simulation::{LayoutFile, SimWorld};

#[derive(Parser)]
#[command(name = "relay_sim")]
#[command(about = "Headless relay circuit simulation")]
struct Cli {
    /// Number of simulation ticks to run
    #[arg(long, default_value = "100")]
    ticks: u32,

    /// Time delta per tick in seconds
    #[arg(long, default_value = "0.1")]
    delta: f32,

    /// Seed for the random lever flips
    #[arg(long)]
    seed: Option<u64>,

    /// Load this layout instead of the demo interlocking
    #[arg(long)]
    layout: Option<PathBuf>,

    /// Save the layout to this file before running
    #[arg(long)]
    save: Option<PathBuf>,

    /// Only print the final state
    #[arg(long)]
    quiet: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let base = match cli.seed {
        Some(seed) => SimWorld::new_with_seed(seed),
        None => SimWorld::new(),
    };
    let mut world = match &cli.layout {
        Some(path) => {
            let layout = LayoutFile::load(path)?;
            SimWorld::build_from_layout(base, &layout)?
        }
        None => SimWorld::build_demo_world(base).context("Failed to build the demo interlocking")?,
    };

    if let Some(path) = &cli.save {
        world.to_layout().save(path)?;
        info!("Saved layout to {}", path.display());
    }

    run_headless(&mut world, cli.ticks, cli.delta, cli.quiet);
    Ok(())
}

/// Run the simulation, flipping a random lever every simulated second
fn run_headless(world: &mut SimWorld, ticks: u32, delta: f32, quiet: bool) {
    println!("Running relay simulation in headless mode...");
    println!("Ticks: {}, Delta: {}s", ticks, delta);

    // Calculate how many ticks equal 1 second of simulation time
    let ticks_per_second = (1.0 / delta).ceil().max(1.0) as u32;
    println!();

    if !quiet {
        println!("Initial state:");
        world.print_summary();
        println!();
    }

    let mut tick = 0;
    while tick < ticks {
        if let Some((lever, position)) = world.random_lever_flip() {
            println!("Lever '{}' moved to {}", lever, position);
        }

        let ticks_to_run = ticks_per_second.min(ticks - tick);
        for _ in 0..ticks_to_run {
            tick += 1;
            world.tick(delta);
        }

        let frames = world.bridge.take_outbound();
        for frame in &frames {
            println!("Bridge: {:?}", frame);
        }

        if !quiet {
            println!("--- After tick {} ({:.1}s simulated time) ---", tick, tick as f32 * delta);
            world.print_summary();
            println!();
        }
    }

    println!("=== Final State ===");
    world.print_summary();
}
