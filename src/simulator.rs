//! Builds a network of [`Device`]s from an adjacency list and ticks them
//! forward, either to a fixed tick count or until a caller-supplied stop
//! condition holds.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;
use log::info;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::clock::{Clock, ClockView, Tick};
use crate::device::{Device, DEFAULT_PROGRESS_TIMEOUT};
use crate::error::BuildError;
use crate::firmware::Firmware;
use crate::io::ReadEnd;
use crate::message::{DeviceId, DeviceType, Version};

/// A directed neighbor map: `node -> [neighbors it can write to]`. Two
/// nodes that can both reach each other appear on both sides.
pub type AdjacencyList = HashMap<DeviceId, Vec<DeviceId>>;

/// Per-node overrides applied on top of the builder's defaults.
#[derive(Debug, Clone, Default)]
pub struct NodeOverrides {
    pub running_firmware: Option<Firmware>,
    pub msg_success_rate: Option<f64>,
    pub progress_timeout: Option<Tick>,
    pub different_fw_type_cache_size: Option<usize>,
}

/// A callback invoked once per tick (before it runs) with a read-only view
/// of every device - for progress printing, recording, or interactive
/// step-through during development.
pub type Watcher = Box<dyn FnMut(&[Device])>;

/// Ticks every device once per round, optionally visiting them in a
/// shuffled order to avoid baking in adjacency-list iteration order as an
/// implicit scheduling priority.
pub struct Simulator {
    clock: Rc<RefCell<Clock>>,
    clock_view: ClockView,
    pub devices: Vec<Device>,
    shuffle: bool,
    rng: StdRng,
    watcher: Option<Watcher>,
}

impl Simulator {
    fn new(clock: Rc<RefCell<Clock>>, devices: Vec<Device>, shuffle: bool, seed: u64) -> Self {
        let clock_view = ClockView::new(clock.clone());
        Self {
            clock,
            clock_view,
            devices,
            shuffle,
            rng: StdRng::seed_from_u64(seed),
            watcher: None,
        }
    }

    pub fn now(&self) -> Tick {
        self.clock_view.now()
    }

    pub fn attach_watcher(&mut self, watcher: Watcher) {
        self.watcher = Some(watcher);
    }

    pub fn detach_watcher(&mut self) {
        self.watcher = None;
    }

    pub fn run_for(&mut self, ticks: Tick) {
        let start_at = self.now();
        self.run_until(|_, now| now - start_at >= ticks);
    }

    /// Runs until `stop_condition(devices, now)` is true, evaluated before
    /// each round (so it also sees the final state once satisfied).
    pub fn run_until(&mut self, mut stop_condition: impl FnMut(&[Device], Tick) -> bool) {
        loop {
            if stop_condition(&self.devices, self.now()) {
                break;
            }
            if let Some(w) = self.watcher.as_mut() {
                w(&self.devices);
            }

            if self.shuffle {
                let mut order: Vec<usize> = (0..self.devices.len()).collect();
                order.shuffle(&mut self.rng);
                for i in order {
                    self.devices[i].tick(&mut self.rng);
                }
            } else {
                for device in self.devices.iter_mut() {
                    device.tick(&mut self.rng);
                }
            }

            self.clock.borrow_mut().tick();
        }

        if let Some(w) = self.watcher.as_mut() {
            w(&self.devices);
        }
    }

    /// True once no device has an upgrade in flight and, within each
    /// firmware type, every device agrees on the same running version.
    pub fn has_converged(&self) -> bool {
        devices_converged(&self.devices)
    }
}

/// True once no device has an upgrade in flight and, within each firmware
/// type, every device agrees on the same running version.
pub fn devices_converged(devices: &[Device]) -> bool {
    if devices.iter().any(|d| d.upgrading()) {
        return false;
    }
    let mut version_by_type: HashMap<DeviceType, Version> = HashMap::new();
    for d in devices {
        let v = d.running_firmware.version;
        match version_by_type.get(&d.dev_type) {
            Some(&seen) if seen != v => return false,
            _ => {
                version_by_type.insert(d.dev_type, v);
            }
        }
    }
    true
}

/// Fluent construction of a [`Simulator`] from an adjacency list plus
/// defaults and per-node overrides, mirroring how the rest of this crate's
/// types are assembled through chained `with_*` calls.
pub struct SimulationBuilder {
    adjacency: Option<AdjacencyList>,
    overrides: HashMap<DeviceId, NodeOverrides>,
    default_running_firmware: Option<Firmware>,
    default_device_type: DeviceType,
    default_link_reliability: f64,
    progress_timeout: Tick,
    queues_max_len: Option<usize>,
    different_fw_type_cache_size: Option<usize>,
    shuffle: bool,
    debug: bool,
    seed: u64,
}

impl Default for SimulationBuilder {
    fn default() -> Self {
        Self {
            adjacency: None,
            overrides: HashMap::new(),
            default_running_firmware: None,
            default_device_type: 0,
            default_link_reliability: 1.0,
            progress_timeout: DEFAULT_PROGRESS_TIMEOUT,
            queues_max_len: None,
            different_fw_type_cache_size: None,
            shuffle: false,
            debug: false,
            seed: 0,
        }
    }
}

impl SimulationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_adjacency_list(mut self, adjacency: AdjacencyList) -> Self {
        self.adjacency = Some(adjacency);
        self
    }

    pub fn with_default_running_firmware(mut self, firmware: Firmware) -> Self {
        self.default_running_firmware = Some(firmware);
        self
    }

    pub fn with_default_device_type(mut self, device_type: DeviceType) -> Self {
        self.default_device_type = device_type;
        self
    }

    pub fn with_default_link_reliability(mut self, reliability: f64) -> Self {
        self.default_link_reliability = reliability;
        self
    }

    pub fn with_progress_timeout(mut self, timeout: Tick) -> Self {
        self.progress_timeout = timeout;
        self
    }

    pub fn with_bounded_queues(mut self, maxlen: Option<usize>) -> Self {
        self.queues_max_len = maxlen;
        self
    }

    pub fn with_different_fw_type_cache_size(mut self, size: Option<usize>) -> Self {
        self.different_fw_type_cache_size = size;
        self
    }

    pub fn with_node_overrides(mut self, node: DeviceId, overrides: NodeOverrides) -> Self {
        self.overrides.insert(node, overrides);
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn build(self) -> Result<Simulator, BuildError> {
        let adjacency = self.adjacency.as_ref().ok_or(BuildError::MissingTopology)?;
        if self.default_running_firmware.is_none()
            && self.overrides.values().all(|o| o.running_firmware.is_none())
        {
            return Err(BuildError::MissingDefaultFirmware);
        }

        for (node, neighbors) in adjacency {
            for n in neighbors {
                if !adjacency.contains_key(n) {
                    return Err(BuildError::UnknownNode(*n));
                }
                if n == node {
                    return Err(BuildError::SelfLoop(*node));
                }
            }
        }

        let clock = Rc::new(RefCell::new(Clock::new()));
        let view = || ClockView::new(clock.clone());

        let mut nodes: Vec<DeviceId> = adjacency.keys().copied().collect();
        nodes.sort_unstable();

        let reads: HashMap<DeviceId, ReadEnd> = nodes
            .iter()
            .map(|&n| (n, ReadEnd::new(view(), self.queues_max_len)))
            .collect();

        let default_firmware = self.default_running_firmware.clone().unwrap_or_else(|| {
            Firmware::empty(self.default_device_type, 0, 0)
        });

        let mut devices = Vec::with_capacity(nodes.len());
        for &node in &nodes {
            let overrides = self.overrides.get(&node).cloned().unwrap_or_default();
            let running_firmware = overrides.running_firmware.clone().unwrap_or_else(|| default_firmware.clone());
            let reliability = overrides.msg_success_rate.unwrap_or(self.default_link_reliability);
            let progress_timeout = overrides.progress_timeout.unwrap_or(self.progress_timeout);
            let cache_size = overrides
                .different_fw_type_cache_size
                .or(self.different_fw_type_cache_size);

            let mut neighbor_writers = IndexMap::new();
            for &neighbor in &adjacency[&node] {
                let writer = reads[&neighbor].writer_for(node, reliability);
                neighbor_writers.insert(neighbor, writer);
            }

            let dev_type = running_firmware.fw_type;
            let input_queue = reads[&node].clone();

            devices.push(Device::new(
                node,
                dev_type,
                input_queue,
                neighbor_writers,
                running_firmware,
                view(),
                progress_timeout,
                cache_size,
                self.debug,
            ));
        }

        info!("built simulation with {} devices, seed {}", devices.len(), self.seed);
        Ok(Simulator::new(clock, devices, self.shuffle, self.seed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(n: usize) -> AdjacencyList {
        let mut adj = AdjacencyList::new();
        for i in 0..n {
            let mut neighbors = Vec::new();
            if i > 0 {
                neighbors.push(i - 1);
            }
            if i + 1 < n {
                neighbors.push(i + 1);
            }
            adj.insert(i, neighbors);
        }
        adj
    }

    #[test]
    fn build_fails_without_topology() {
        let result = SimulationBuilder::new()
            .with_default_running_firmware(Firmware::complete(1, 0, 1))
            .build();
        assert!(matches!(result, Err(BuildError::MissingTopology)));
    }

    #[test]
    fn build_fails_without_default_firmware() {
        let result = SimulationBuilder::new().from_adjacency_list(chain(3)).build();
        assert!(matches!(result, Err(BuildError::MissingDefaultFirmware)));
    }

    #[test]
    fn same_seed_same_topology_converges_deterministically() {
        let build = || {
            SimulationBuilder::new()
                .from_adjacency_list(chain(4))
                .with_default_running_firmware(Firmware::complete(1, 0, 2))
                .with_node_overrides(
                    0,
                    NodeOverrides {
                        running_firmware: Some(Firmware::complete(1, 1, 2)),
                        ..Default::default()
                    },
                )
                .with_seed(99)
                .build()
                .unwrap()
        };

        let mut sim_a = build();
        let mut sim_b = build();
        sim_a.run_until(|devs, _| devs.iter().all(|d| !d.upgrading() && d.running_firmware.version == 1));
        sim_b.run_until(|devs, _| devs.iter().all(|d| !d.upgrading() && d.running_firmware.version == 1));
        assert_eq!(sim_a.now(), sim_b.now());
    }
}
