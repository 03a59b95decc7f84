//! Properties about the simulator's resource model: delivery delay,
//! request-in-flight suppression, and bounded-queue behavior under loss.

mod support;

use gossip_sim::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

#[test]
fn a_message_is_never_delivered_on_the_tick_it_was_sent() {
    let mut rng = StdRng::seed_from_u64(11);
    let clock = std::rc::Rc::new(std::cell::RefCell::new(Clock::new()));
    let view = ClockView::new(clock.clone());
    let read = ReadEnd::new(view.clone(), None);
    let write = read.writer_for(0, 1.0);

    let msg = Message::Request {
        proto: Proto {
            from_device: 0,
            chunk_size: 1,
            chunks: 1,
            fw_size: 1,
        },
        dsc: ChunkDescriptor {
            fw_type: 1,
            version: 1,
            chunk_id: 0,
        },
    };

    write.write(msg, &mut rng);
    assert!(read.try_read().is_none(), "same-tick read must not see the message");
    clock.borrow_mut().tick();
    assert!(read.try_read().is_some(), "message becomes visible one tick later");
}

#[test]
fn convergence_is_robust_to_lossy_links() -> anyhow::Result<()> {
    let mut sim = SimulationBuilder::new()
        .from_adjacency_list(support::grid(4, 4))
        .with_default_running_firmware(Firmware::complete(1, 0, 6))
        .with_node_overrides(
            0,
            NodeOverrides {
                running_firmware: Some(Firmware::complete(1, 1, 6)),
                ..Default::default()
            },
        )
        .with_default_link_reliability(0.6)
        .with_shuffle(true)
        .with_seed(77)
        .build()?;

    sim.run_until(|devs, now| now >= 10_000 || devices_converged(devs));

    assert!(
        devices_converged(&sim.devices),
        "a 4x4 grid should still converge within 10000 ticks even at 60% link reliability"
    );
    Ok(())
}

#[test]
fn bounded_queues_keep_running_even_under_heavy_overflow() -> anyhow::Result<()> {
    let mut sim = SimulationBuilder::new()
        .from_adjacency_list(support::grid(3, 3))
        .with_default_running_firmware(Firmware::complete(1, 0, 10))
        .with_node_overrides(
            0,
            NodeOverrides {
                running_firmware: Some(Firmware::complete(1, 1, 10)),
                ..Default::default()
            },
        )
        .with_bounded_queues(Some(2))
        .with_shuffle(true)
        .with_seed(4)
        .build()?;

    sim.run_until(|devs, now| now >= 3_000 || devices_converged(devs));

    for d in &sim.devices {
        assert!(d.input_queue_len() <= 2, "queue must never exceed its configured capacity");
    }
    Ok(())
}
