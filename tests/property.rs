//! Randomized-topology property test: across many independently-generated
//! graphs, reliabilities, and firmware sizes, the network must still reach
//! convergence and no device may ever be observed regressing to an older
//! firmware version along the way.

mod support;

use gossip_sim::prelude::*;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

#[test]
fn randomized_graphs_terminate_and_never_downgrade() -> anyhow::Result<()> {
    const TRIALS: u64 = 12;

    for trial in 0..TRIALS {
        let mut gen_rng = StdRng::seed_from_u64(10_000 + trial);
        let n: usize = gen_rng.gen_range(4..=12);
        let p: f64 = gen_rng.gen_range(0.15..=0.5);
        let reliability: f64 = gen_rng.gen_range(0.51..=1.0);
        let chunks: usize = gen_rng.gen_range(1..=64);

        let adjacency = support::erdos_renyi(n, p, &mut gen_rng);

        let mut sim = SimulationBuilder::new()
            .from_adjacency_list(adjacency)
            .with_default_running_firmware(Firmware::complete(1, 0, chunks))
            .with_node_overrides(
                0,
                NodeOverrides {
                    running_firmware: Some(Firmware::complete(1, 1, chunks)),
                    ..Default::default()
                },
            )
            .with_default_link_reliability(reliability)
            .with_shuffle(true)
            .with_seed(20_000 + trial)
            .build()?;

        let mut max_seen = vec![0u32; n];
        sim.run_until(|devs, now| {
            for (i, d) in devs.iter().enumerate() {
                assert!(
                    d.running_firmware.version >= max_seen[i],
                    "trial {trial} (n={n} p={p} reliability={reliability} chunks={chunks}): \
                     device {i} regressed from version {} to {}",
                    max_seen[i],
                    d.running_firmware.version
                );
                max_seen[i] = max_seen[i].max(d.running_firmware.version);
            }
            now >= 20_000 || devices_converged(devs)
        });

        assert!(
            devices_converged(&sim.devices),
            "trial {trial} (n={n} p={p} reliability={reliability} chunks={chunks}) \
             failed to converge within 20000 ticks"
        );
        for d in &sim.devices {
            assert_eq!(
                d.running_firmware.version, 1,
                "trial {trial}: a connected network must converge on the newest version"
            );
        }
    }

    Ok(())
}
