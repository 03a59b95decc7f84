//! The gossip/epidemic firmware-dissemination protocol itself: per-device
//! state, message handling, and the periodic/timeout-driven behavior that
//! runs whether or not a message arrived this tick.

use indexmap::IndexMap;
use log::debug;
use rand::rngs::StdRng;

use crate::clock::{ClockView, Tick};
use crate::firmware::{ChunkPayload, Firmware};
use crate::io::{ReadEnd, WriteEnd, WriteOutcome};
use crate::message::{ChunkDescriptor, DeviceId, DeviceType, FwType, Message, Proto, Version};
use crate::metrics::Metrics;
use crate::store::{RecentlySeenStore, RequestStore};

/// Default interval, in ticks, at which a device re-announces the chunk it
/// is currently running, and the baseline used to derive the dedup-store
/// TTLs that key off it.
pub const DEFAULT_PERIODIC_ANNOUNCE: Tick = 100;

/// Default number of ticks without forward progress before a stalled
/// upgrade re-requests its first missing chunk.
pub const DEFAULT_PROGRESS_TIMEOUT: Tick = 100;

struct OngoingUpgrade {
    fw_type: FwType,
    version: Version,
    proto: Proto,
    last_progress: i64,
    candidate_firmware: Firmware,
}

impl OngoingUpgrade {
    fn new(fw_type: FwType, version: Version, proto: Proto) -> Self {
        Self {
            fw_type,
            version,
            proto,
            last_progress: -1,
            candidate_firmware: Firmware::empty(fw_type, version, proto.chunks),
        }
    }
}

/// One device in the network: its current firmware, any upgrade in
/// progress, its dedup/in-flight bookkeeping, and its link to neighbors.
///
/// All neighbors of a device share a single input queue - per-link loss is
/// modelled on the write side ([`WriteEnd`]), not the read side, since a
/// real device cannot tell which neighbor a dropped message came from.
pub struct Device {
    pub dev_id: DeviceId,
    pub dev_type: DeviceType,
    clock: ClockView,
    input_queue: ReadEnd,
    neighbors: IndexMap<DeviceId, WriteEnd>,
    pub running_firmware: Firmware,
    ongoing_upgrade: Option<OngoingUpgrade>,
    periodic_announce: Tick,
    last_periodic_announce: i64,
    progress_timeout: Tick,
    diff_announces_seen: RecentlySeenStore<ChunkDescriptor>,
    in_flight_requests: RequestStore<ChunkDescriptor>,
    datas_seen: RecentlySeenStore<ChunkDescriptor>,
    metrics: Metrics,
    debug: bool,
}

impl Device {
    /// Fixed per-message chunk-size unit this protocol speaks. Messages
    /// whose header advertises a different chunk size are rejected on
    /// sight - they belong to an incompatible protocol revision.
    pub const CHUNK_SIZE: usize = 1;

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dev_id: DeviceId,
        dev_type: DeviceType,
        input_queue: ReadEnd,
        neighbors: IndexMap<DeviceId, WriteEnd>,
        running_firmware: Firmware,
        clock: ClockView,
        progress_timeout: Tick,
        different_fw_type_cache_size: Option<usize>,
        debug: bool,
    ) -> Self {
        let periodic_announce = DEFAULT_PERIODIC_ANNOUNCE;
        Self {
            dev_id,
            dev_type,
            diff_announces_seen: RecentlySeenStore::new(
                clock.clone(),
                periodic_announce / 2,
                different_fw_type_cache_size,
            ),
            in_flight_requests: RequestStore::new(clock.clone(), progress_timeout / 2, None),
            datas_seen: RecentlySeenStore::new(
                clock.clone(),
                progress_timeout / 2,
                different_fw_type_cache_size,
            ),
            clock,
            input_queue,
            neighbors,
            running_firmware,
            ongoing_upgrade: None,
            periodic_announce,
            last_periodic_announce: -(periodic_announce as i64),
            progress_timeout,
            metrics: Metrics::new(),
            debug,
        }
    }

    /// True while a firmware upgrade is in progress (an [`OngoingUpgrade`]
    /// exists) - the chunks gathered so far have not yet replaced
    /// `running_firmware`.
    pub fn upgrading(&self) -> bool {
        self.ongoing_upgrade.is_some()
    }

    /// `(chunks_gathered, total_chunks)` of the upgrade in progress, if any.
    pub fn upgrade_progress(&self) -> Option<(usize, usize)> {
        self.ongoing_upgrade.as_ref().map(|u| {
            let total = u.candidate_firmware.data_size();
            let missing = u.candidate_firmware.get_missing_chunks().len();
            (total - missing, total)
        })
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn input_queue_len(&self) -> usize {
        self.input_queue.len()
    }

    /// Advances this device by one tick: runs the periodic announcer and
    /// the stall-timeout handler, then processes at most one inbound
    /// message (strict one-message-per-tick, matching the queue's
    /// one-message-per-pop contract).
    pub fn tick(&mut self, rng: &mut StdRng) {
        self.periodic_running_firmware_announcer(rng);
        self.upgrade_process_timeout_handler(rng);

        if let Some(msg) = self.try_receive_message() {
            let consumed = self.on_before_message(&msg, rng);
            if !consumed {
                match &msg {
                    Message::Announce { .. } => self.on_announce_message(&msg, rng),
                    Message::Request { .. } => self.on_request_message(&msg, rng),
                    Message::Data { .. } => self.on_data_message(&msg, rng),
                }
            }
        }

        self.sync_metrics();
    }

    /// Pre-dispatch handling shared by every message type: protocol-version
    /// rejection, foreign-type dedup/relay, and same-type passthrough.
    /// Returns `true` if the message was fully handled here and should not
    /// reach the type-specific handler.
    fn on_before_message(&mut self, m: &Message, rng: &mut StdRng) -> bool {
        if m.proto().chunk_size != Self::CHUNK_SIZE {
            return true;
        }

        if let Message::Data { proto, dsc, data } = m {
            let (proto, dsc, data) = (*proto, *dsc, *data);
            if dsc.fw_type != self.dev_type {
                if self.datas_seen.recently_seen(&dsc) {
                    return true;
                }
                self.datas_seen.mark_recently_seen(dsc);
            }
            // Runs for every Data message, not only foreign-typed ones,
            // so that devices waiting on a chunk of their own type are
            // fanned out to as soon as it arrives, not just rebroadcast.
            self.satisfy_pending_requesters(dsc, proto, data, rng);
            if dsc.fw_type != self.dev_type {
                return true;
            }
        }

        if m.dsc().fw_type == self.dev_type {
            return false;
        }

        match m {
            Message::Announce { proto, dsc } => {
                if !self.diff_announces_seen.recently_seen(dsc) {
                    self.diff_announces_seen.mark_recently_seen(*dsc);
                    self.announce_chunk(*dsc, *proto, &[proto.from_device], rng);
                }
                true
            }
            Message::Request { proto, dsc } => {
                self.request_chunk_for_device(proto.from_device, *dsc, *proto, rng);
                true
            }
            Message::Data { .. } => unreachable!("foreign-type Data is handled above"),
        }
    }

    fn on_announce_message(&mut self, m: &Message, rng: &mut StdRng) {
        let (proto, dsc) = match m {
            Message::Announce { proto, dsc } => (*proto, *dsc),
            _ => return,
        };
        if dsc.version <= self.running_firmware.version {
            return;
        }

        if !self.upgrading() {
            self.ongoing_upgrade = Some(OngoingUpgrade::new(dsc.fw_type, dsc.version, proto));
        }

        let ongoing_version = self.ongoing_upgrade.as_ref().unwrap().version;
        if dsc.version != ongoing_version {
            // We only chase one version at a time; a newer announce
            // arriving mid-upgrade is ignored until this one completes.
            return;
        }

        if self
            .ongoing_upgrade
            .as_ref()
            .unwrap()
            .candidate_firmware
            .is_chunk_present(dsc.chunk_id)
        {
            return;
        }

        self.request_chunk_from_device(proto.from_device, dsc, proto, rng);
        self.ongoing_upgrade.as_mut().unwrap().last_progress = self.clock.now() as i64;
    }

    fn on_request_message(&mut self, m: &Message, rng: &mut StdRng) {
        let (proto, dsc) = match m {
            Message::Request { proto, dsc } => (*proto, *dsc),
            _ => return,
        };

        if dsc.version == self.running_firmware.version {
            if !self.running_firmware.is_chunk_present(dsc.chunk_id) {
                return;
            }
            let payload = self.running_firmware.data[dsc.chunk_id].expect("checked present");
            self.send_data(dsc, proto.from_device, proto, payload, rng);
            let fw = self.running_firmware.clone();
            self.announce_next_chunk_to_device(dsc, proto, proto.from_device, &fw, rng);
            return;
        }

        if !self.upgrading() {
            return;
        }

        let ongoing_version = self.ongoing_upgrade.as_ref().unwrap().version;
        if dsc.version != ongoing_version {
            return;
        }

        let chunk_present = self
            .ongoing_upgrade
            .as_ref()
            .unwrap()
            .candidate_firmware
            .is_chunk_present(dsc.chunk_id);

        if !chunk_present {
            let valid_chunk_id = self
                .ongoing_upgrade
                .as_ref()
                .unwrap()
                .candidate_firmware
                .is_valid_chunk_id(dsc.chunk_id);
            if !valid_chunk_id {
                return;
            }

            // We want this chunk too - sink the duplicate request and let
            // our own request join the same in-flight broadcast.
            self.request_chunk_for_device(proto.from_device, dsc, proto, rng);
            let self_id = self.dev_id;
            self.request_chunk_for_device(self_id, dsc, proto, rng);
            return;
        }

        let payload = self
            .ongoing_upgrade
            .as_ref()
            .unwrap()
            .candidate_firmware
            .data[dsc.chunk_id]
            .expect("checked present");
        self.send_data(dsc, proto.from_device, proto, payload, rng);
        let fw = self.ongoing_upgrade.as_ref().unwrap().candidate_firmware.clone();
        self.announce_next_chunk_to_device(dsc, proto, proto.from_device, &fw, rng);
    }

    fn on_data_message(&mut self, m: &Message, rng: &mut StdRng) {
        let (proto, dsc, data) = match m {
            Message::Data { proto, dsc, data } => (*proto, *dsc, *data),
            _ => return,
        };

        if !self.upgrading() {
            return;
        }

        let rejected = {
            let u = self.ongoing_upgrade.as_ref().unwrap();
            dsc.version != u.version
                || !u.candidate_firmware.is_valid_chunk_id(dsc.chunk_id)
                || u.candidate_firmware.is_chunk_present(dsc.chunk_id)
        };
        if rejected {
            return;
        }

        let now = self.clock.now() as i64;
        let u = self.ongoing_upgrade.as_mut().unwrap();
        u.candidate_firmware.set_chunk(dsc.chunk_id, data);
        u.last_progress = now;

        let dev_id = self.dev_id;
        self.in_flight_requests.mark_request_in_flight_for(&dsc, dev_id, false);

        self.announce_chunk(dsc, proto, &[proto.from_device], rng);

        if self.ongoing_upgrade.as_ref().unwrap().candidate_firmware.is_complete() {
            self.commit_upgrade();
        }
    }

    fn commit_upgrade(&mut self) {
        if let Some(u) = self.ongoing_upgrade.take() {
            debug!(
                "device {} committed upgrade: fw_type={} version={}",
                self.dev_id, u.fw_type, u.version
            );
            self.running_firmware = u.candidate_firmware;
        }
    }

    fn upgrade_process_timeout_handler(&mut self, rng: &mut StdRng) {
        let now = self.clock.now() as i64;
        let stalled = match &self.ongoing_upgrade {
            Some(u) => now - u.last_progress > self.progress_timeout as i64,
            None => false,
        };
        if !stalled {
            return;
        }

        let (fw_type, version, proto, first_missing) = {
            let u = self.ongoing_upgrade.as_ref().unwrap();
            (
                u.fw_type,
                u.version,
                u.proto,
                u.candidate_firmware.get_first_missing_chunk(),
            )
        };

        if let Some(chunk_id) = first_missing {
            debug!(
                "device {} stalled on fw_type={} version={}, re-requesting chunk {}",
                self.dev_id, fw_type, version, chunk_id
            );
            let dsc = ChunkDescriptor {
                fw_type,
                version,
                chunk_id,
            };
            let self_id = self.dev_id;
            self.request_chunk_for_device(self_id, dsc, proto, rng);
        }

        self.ongoing_upgrade.as_mut().unwrap().last_progress = self.clock.now() as i64;
    }

    fn periodic_running_firmware_announcer(&mut self, rng: &mut StdRng) {
        let now = self.clock.now() as i64;
        if now - self.last_periodic_announce <= self.periodic_announce as i64 {
            return;
        }

        let r = &self.running_firmware;
        let proto = Proto {
            from_device: self.dev_id,
            chunk_size: Self::CHUNK_SIZE,
            chunks: r.data_size().div_ceil(Self::CHUNK_SIZE),
            fw_size: r.data_size(),
        };
        let dsc = ChunkDescriptor {
            fw_type: r.fw_type,
            version: r.version,
            chunk_id: 0,
        };

        self.announce_chunk(dsc, proto, &[], rng);
        self.last_periodic_announce = self.clock.now() as i64;
    }

    fn announce_chunk(&mut self, dsc: ChunkDescriptor, proto: Proto, exclude_devices: &[DeviceId], rng: &mut StdRng) {
        self.broadcast_message(Message::Announce { proto, dsc }, exclude_devices, rng);
    }

    fn announce_chunk_to_device(&mut self, dsc: ChunkDescriptor, proto: Proto, device: DeviceId, rng: &mut StdRng) {
        self.send_message(device, Message::Announce { proto, dsc }, rng);
    }

    /// Announces the next chunk the firmware holds after `current_dsc`'s
    /// chunk id, if any - used so a request for one chunk also advertises
    /// the next one the requester will probably want.
    fn announce_next_chunk_to_device(
        &mut self,
        current_dsc: ChunkDescriptor,
        proto: Proto,
        device: DeviceId,
        firmware: &Firmware,
        rng: &mut StdRng,
    ) {
        if let Some(next_chunk_id) = firmware.get_next_chunk_present(current_dsc.chunk_id) {
            let dsc = ChunkDescriptor {
                chunk_id: next_chunk_id,
                ..current_dsc
            };
            self.announce_chunk_to_device(dsc, proto, device, rng);
        }
    }

    fn request_chunk_from_device(&mut self, from_device: DeviceId, dsc: ChunkDescriptor, proto: Proto, rng: &mut StdRng) {
        let in_flight = self.in_flight_requests.is_request_in_flight_for_anybody(&dsc);
        let dev_id = self.dev_id;
        self.in_flight_requests.mark_request_in_flight_for(&dsc, dev_id, true);

        if !in_flight {
            self.send_message(from_device, Message::Request { proto, dsc }, rng);
        }
    }

    fn request_chunk_for_device(&mut self, for_device: DeviceId, dsc: ChunkDescriptor, proto: Proto, rng: &mut StdRng) {
        let in_flight = self.in_flight_requests.is_request_in_flight_for_anybody(&dsc);
        self.in_flight_requests.mark_request_in_flight_for(&dsc, for_device, true);

        if !in_flight {
            self.broadcast_message(Message::Request { proto, dsc }, &[for_device], rng);
        }
    }

    fn send_data(&mut self, dsc: ChunkDescriptor, device: DeviceId, proto: Proto, data: ChunkPayload, rng: &mut StdRng) {
        self.send_message(device, Message::Data { proto, dsc, data }, rng);
    }

    /// Fans an arriving chunk out to every device with a live in-flight
    /// request for it (besides ourselves), clearing their in-flight flag
    /// as they're satisfied.
    fn satisfy_pending_requesters(&mut self, dsc: ChunkDescriptor, proto: Proto, data: ChunkPayload, rng: &mut StdRng) {
        let self_id = self.dev_id;
        let requesters = self.in_flight_requests.get_requesters(&dsc);
        let msg = Message::Data { proto, dsc, data };
        for dst in requesters.into_iter().filter(|&d| d != self_id) {
            self.in_flight_requests.mark_request_in_flight_for(&dsc, dst, false);
            self.send_message(dst, msg.clone(), rng);
        }
    }

    /// The single choke-point every outbound message passes through -
    /// where send/loss/overflow instrumentation is recorded. All four
    /// counters (sent/received/lost/overflowed) are gated behind `debug`,
    /// matching the builder's `with_debug` toggle for recording overhead.
    fn send_message(&mut self, device_id: DeviceId, msg: Message, rng: &mut StdRng) {
        if self.debug {
            self.metrics.record_sent(&msg);
        }
        let Some(writer) = self.neighbors.get(&device_id) else {
            return;
        };
        match writer.write(msg.clone(), rng) {
            WriteOutcome::Lost => {
                if self.debug {
                    self.metrics.record_lost(&msg);
                }
            }
            WriteOutcome::Delivered { evicted: Some((_, evicted_msg)) } => {
                if self.debug {
                    self.metrics.record_overflow(&evicted_msg);
                }
            }
            WriteOutcome::Delivered { evicted: None } => {}
        }
    }

    fn broadcast_message(&mut self, msg: Message, exclude_devices: &[DeviceId], rng: &mut StdRng) {
        let targets: Vec<DeviceId> = self
            .neighbors
            .keys()
            .copied()
            .filter(|d| !exclude_devices.contains(d))
            .collect();
        for device_id in targets {
            self.send_message(device_id, msg.clone(), rng);
        }
    }

    fn try_receive_message(&mut self) -> Option<Message> {
        let (writer_id, msg) = self.input_queue.try_read()?;
        let msg = msg.with_from_device(writer_id);
        if self.debug {
            self.metrics.record_received(&msg);
        }
        Some(msg)
    }

    fn sync_metrics(&mut self) {
        self.metrics.observe_input_queue(self.input_queue.max_used());
        self.metrics
            .observe_diff_announces_seen(self.diff_announces_seen.max_used());
        self.metrics.observe_datas_seen(self.datas_seen.max_used());
        self.metrics
            .observe_in_flight_requests(self.in_flight_requests.max_used());
    }
}
