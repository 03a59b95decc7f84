//! Demonstration harness: builds a grid of devices running firmware type 1,
//! seeds one corner with a newer version, and runs the simulation until the
//! network converges or a generous tick budget runs out.

use anyhow::{Context, Result};
use gossip_sim::prelude::*;
use log::info;
use serde::Deserialize;

/// Scenario parameters for the demonstration run, loadable from a RON file
/// so the binary can be re-parameterized without recompiling.
#[derive(Debug, Clone, Deserialize)]
struct ScenarioConfig {
    grid_width: usize,
    grid_height: usize,
    firmware_chunks: usize,
    link_reliability: f64,
    seed: u64,
    max_ticks: u64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            grid_width: 4,
            grid_height: 4,
            firmware_chunks: 8,
            link_reliability: 0.95,
            seed: 1,
            max_ticks: 5_000,
        }
    }
}

impl ScenarioConfig {
    fn load(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario config at {path}"))?;
        ron::from_str(&contents).with_context(|| format!("failed to parse scenario config at {path}"))
    }
}

fn grid_adjacency(width: usize, height: usize) -> AdjacencyList {
    let id = |x: usize, y: usize| y * width + x;
    let mut adj = AdjacencyList::new();
    for y in 0..height {
        for x in 0..width {
            let mut neighbors = Vec::new();
            if x > 0 {
                neighbors.push(id(x - 1, y));
            }
            if x + 1 < width {
                neighbors.push(id(x + 1, y));
            }
            if y > 0 {
                neighbors.push(id(x, y - 1));
            }
            if y + 1 < height {
                neighbors.push(id(x, y + 1));
            }
            adj.insert(id(x, y), neighbors);
        }
    }
    adj
}

fn main() -> Result<()> {
    env_logger::init();

    let config = std::env::args()
        .nth(1)
        .map(|path| ScenarioConfig::load(&path))
        .transpose()?
        .unwrap_or_default();

    info!(
        "building {}x{} grid, {} ticks budget, seed {}",
        config.grid_width, config.grid_height, config.max_ticks, config.seed
    );

    let adjacency = grid_adjacency(config.grid_width, config.grid_height);
    let old_firmware = Firmware::complete(1, 0, config.firmware_chunks);
    let new_firmware = Firmware::complete(1, 1, config.firmware_chunks);

    let seed_override = NodeOverrides {
        running_firmware: Some(new_firmware),
        ..Default::default()
    };

    let mut sim = SimulationBuilder::new()
        .from_adjacency_list(adjacency)
        .with_default_running_firmware(old_firmware)
        .with_default_link_reliability(config.link_reliability)
        .with_node_overrides(0, seed_override)
        .with_shuffle(true)
        .with_seed(config.seed)
        .with_debug(true)
        .build()
        .context("failed to build simulation")?;

    let max_ticks = config.max_ticks;
    sim.run_until(|devs, now| now >= max_ticks || devices_converged(devs));

    let converged = sim.has_converged();
    info!("stopped at tick {} (converged: {converged})", sim.now());

    let snapshots: Vec<_> = sim.devices.iter().map(|d| d.metrics().snapshot()).collect();
    println!("{}", serde_json::to_string_pretty(&snapshots)?);

    Ok(())
}
