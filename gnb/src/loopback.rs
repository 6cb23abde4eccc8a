//! DL/UL loopback of one DRB between a gNB and a UE protocol stack
//!
//! Both sides run a PDCP and an RLC entity. Every slot the inter-slice
//! scheduler ranks the RAN slices, the MAC pulls RLC PDUs for the granted
//! RBs and the PDUs cross a lossy air interface to the peer. PUSCH data
//! reaches the gNB k2 slots after the grant.

use crate::config::{LoopbackConfig, SimulationConfig};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use common::{bytes_to_hex, Lcid, RbId, SlotPoint, TimerManager, UeIndex};
use interfaces::channel::{notification_channel, NotificationReceiver, NotificationSender};
use interfaces::pdcp::{
    PdcpRxUpperControlNotifier, PdcpRxUpperDataNotifier, PdcpTxUpperControlNotifier,
};
use interfaces::rlc::{
    RlcBufferState, RlcRxLowerLayerInterface, RlcRxUpperLayerDataNotifier,
    RlcTxLowerLayerInterface, RlcTxLowerLayerNotifier, RlcTxUpperLayerControlNotifier,
    RlcTxUpperLayerDataNotifier,
};
use layers::mac::slicing::{InterSliceScheduler, RanSliceId, SliceLcConfig, SliceUeConfig};
use layers::observer::{PduDirection, ProtocolObserver};
use layers::pdcp::{PdcpConfig, PdcpEntity, PdcpEntityNotifiers, PdcpRxMetrics, PdcpTxMetrics};
use layers::rlc::{
    create_rlc_entity, RlcConfig, RlcEntity, RlcNotifiers, RlcRxEntity, RlcRxMetrics,
    RlcTxEntity, RlcTxMetrics,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

const LOOPBACK_UE: UeIndex = UeIndex(0);

/// End of the simulated radio link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Gnb,
    Ue,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Gnb => write!(f, "gNB"),
            Side::Ue => write!(f, "UE"),
        }
    }
}

/// Notification raised by one of the entities of a side
#[derive(Debug)]
enum BearerEvent {
    /// RLC Rx reassembled a PDCP PDU
    RlcSdu(Bytes),
    /// PDCP Rx delivered an SDU
    PdcpSdu(Bytes),
    Transmitted(u32),
    Delivered(u32),
    Retransmitted(u32),
    DeliveredRetransmitted(u32),
    BufferStateChanged,
    BufferState(RlcBufferState),
    Failure(&'static str),
}

/// Every notifier of one side, queueing into the side's event channel
struct EventNotifier {
    side: Side,
    tx: NotificationSender<BearerEvent>,
}

impl EventNotifier {
    fn push(&self, event: BearerEvent) {
        if self.tx.send(event).is_err() {
            warn!("{}: Dropping notification, loopback is gone", self.side);
        }
    }
}

impl RlcRxUpperLayerDataNotifier for EventNotifier {
    fn on_new_sdu(&self, sdu: Bytes) {
        self.push(BearerEvent::RlcSdu(sdu));
    }
}

impl RlcTxUpperLayerDataNotifier for EventNotifier {
    fn on_transmitted_sdu(&self, max_tx_pdcp_sn: u32, _desired_buf_size: u32) {
        self.push(BearerEvent::Transmitted(max_tx_pdcp_sn));
    }

    fn on_delivered_sdu(&self, max_deliv_pdcp_sn: u32) {
        self.push(BearerEvent::Delivered(max_deliv_pdcp_sn));
    }

    fn on_retransmitted_sdu(&self, max_retx_pdcp_sn: u32) {
        self.push(BearerEvent::Retransmitted(max_retx_pdcp_sn));
    }

    fn on_delivered_retransmitted_sdu(&self, max_deliv_retx_pdcp_sn: u32) {
        self.push(BearerEvent::DeliveredRetransmitted(max_deliv_retx_pdcp_sn));
    }
}

impl RlcTxUpperLayerControlNotifier for EventNotifier {
    fn on_protocol_failure(&self) {
        self.push(BearerEvent::Failure("RLC protocol failure"));
    }

    fn on_max_retx(&self) {
        self.push(BearerEvent::Failure("RLC max retransmissions reached"));
    }
}

impl RlcTxLowerLayerNotifier for EventNotifier {
    fn on_buffer_state_changed(&self) {
        self.push(BearerEvent::BufferStateChanged);
    }

    fn on_buffer_state_update(&self, bs: RlcBufferState) {
        self.push(BearerEvent::BufferState(bs));
    }
}

impl PdcpRxUpperDataNotifier for EventNotifier {
    fn on_new_sdu(&self, sdu: Bytes) {
        self.push(BearerEvent::PdcpSdu(sdu));
    }
}

impl PdcpRxUpperControlNotifier for EventNotifier {
    fn on_protocol_failure(&self) {
        self.push(BearerEvent::Failure("PDCP Rx protocol failure"));
    }

    fn on_integrity_failure(&self) {
        self.push(BearerEvent::Failure("PDCP integrity failure"));
    }

    fn on_max_count_reached(&self) {
        self.push(BearerEvent::Failure("PDCP Rx max COUNT reached"));
    }
}

impl PdcpTxUpperControlNotifier for EventNotifier {
    fn on_protocol_failure(&self) {
        self.push(BearerEvent::Failure("PDCP Tx protocol failure"));
    }

    fn on_max_count_reached(&self) {
        self.push(BearerEvent::Failure("PDCP Tx max COUNT reached"));
    }
}

/// Traces every PDCP and RLC PDU of one side as a hex dump
struct PduTracer {
    side: Side,
}

impl ProtocolObserver for PduTracer {
    fn on_pdcp_pdu(&self, ue: UeIndex, rb: RbId, dir: PduDirection, pdu: &[u8]) {
        trace!("ue={} {} {}: PDCP {:?} [{}]", ue, rb, self.side, dir, bytes_to_hex(pdu));
    }

    fn on_rlc_pdu(&self, ue: UeIndex, rb: RbId, dir: PduDirection, pdu: &[u8]) {
        trace!("ue={} {} {}: RLC {:?} [{}]", ue, rb, self.side, dir, bytes_to_hex(pdu));
    }
}

/// Counters of one side
#[derive(Debug, Clone, Serialize)]
pub struct NodeMetrics {
    pub pdcp_tx: PdcpTxMetrics,
    pub pdcp_rx: PdcpRxMetrics,
    pub rlc_tx: RlcTxMetrics,
    pub rlc_rx: RlcRxMetrics,
    /// Last buffer state reported to the MAC
    pub pending_bytes: u32,
    pub failures: u64,
}

/// PDCP over RLC stack of one side. Everything runs in one context, so PDCP
/// and RLC share a timer service.
struct LoopbackNode {
    side: Side,
    pdcp: PdcpEntity,
    rlc: RlcEntity,
    timers: TimerManager,
    events: NotificationReceiver<BearerEvent>,
    last_bs: RlcBufferState,
    failures: u64,
}

impl LoopbackNode {
    fn new(
        side: Side,
        rb_id: RbId,
        pdcp_cfg: PdcpConfig,
        rlc_cfg: &RlcConfig,
    ) -> anyhow::Result<Self> {
        let timers = TimerManager::new();
        let (tx, events) = notification_channel();
        let notifier = Arc::new(EventNotifier { side, tx });

        let mut rlc = create_rlc_entity(
            LOOPBACK_UE,
            rb_id,
            rlc_cfg,
            RlcNotifiers {
                rx_upper_dn: notifier.clone(),
                tx_upper_dn: notifier.clone(),
                tx_upper_cn: notifier.clone(),
                tx_lower_dn: notifier.clone(),
            },
            &timers,
            &timers,
        )?;
        let mut pdcp = PdcpEntity::new(
            LOOPBACK_UE,
            rb_id,
            pdcp_cfg,
            PdcpEntityNotifiers {
                rx_upper_dn: notifier.clone(),
                rx_upper_cn: notifier.clone(),
                tx_lower_dn: rlc.tx_upper.clone(),
                tx_upper_cn: notifier,
            },
            &timers,
        )?;
        if tracing::enabled!(tracing::Level::TRACE) {
            let tracer: Arc<dyn ProtocolObserver> = Arc::new(PduTracer { side });
            rlc.set_observer(tracer.clone());
            pdcp.set_observer(tracer);
        }

        Ok(Self {
            side,
            pdcp,
            rlc,
            timers,
            events,
            last_bs: RlcBufferState::default(),
            failures: 0,
        })
    }

    /// Advance the timer service by 1 ms and route the expired timers
    fn tick(&mut self) {
        for id in self.timers.tick() {
            let handled = self.pdcp.handle_timer_expiry(id)
                || self.rlc.tx.handle_timer_expiry(id)
                || self.rlc.rx.handle_timer_expiry(id);
            if !handled {
                trace!("{}: Expired timer {:?} has no owner", self.side, id);
            }
        }
    }

    /// Handle queued notifications until none is left. Returns the SDUs PDCP delivered.
    fn process_events(&mut self) -> Vec<Bytes> {
        let mut sdus = Vec::new();
        loop {
            let events = self.events.drain();
            if events.is_empty() {
                break;
            }
            for event in events {
                match event {
                    BearerEvent::RlcSdu(pdu) => self.pdcp.handle_pdu(pdu),
                    BearerEvent::PdcpSdu(sdu) => sdus.push(sdu),
                    BearerEvent::Transmitted(sn) => {
                        self.pdcp.tx().handle_transmit_notification(sn)
                    }
                    BearerEvent::Delivered(sn) => self.pdcp.tx().handle_delivery_notification(sn),
                    BearerEvent::Retransmitted(sn) => {
                        self.pdcp.tx().handle_retransmit_notification(sn)
                    }
                    BearerEvent::DeliveredRetransmitted(sn) => {
                        self.pdcp.tx().handle_delivery_retransmitted_notification(sn)
                    }
                    BearerEvent::BufferStateChanged => self.rlc.tx.update_mac_buffer_state(),
                    BearerEvent::BufferState(bs) => self.last_bs = bs,
                    BearerEvent::Failure(cause) => {
                        warn!("{}: {}", self.side, cause);
                        self.failures += 1;
                    }
                }
            }
        }
        sdus
    }

    fn pending_bytes(&mut self) -> u32 {
        self.rlc.tx.get_buffer_state().pending_bytes
    }

    /// Fill a grant of `grant_bytes` with RLC PDUs
    fn pull_pdus(&mut self, grant_bytes: usize) -> Vec<Bytes> {
        let mut pdus = Vec::new();
        let mut remaining = grant_bytes;
        while remaining > 0 {
            let mut buf = BytesMut::zeroed(remaining);
            let len = self.rlc.tx.pull_pdu(&mut buf);
            if len == 0 {
                break;
            }
            buf.truncate(len);
            remaining -= len;
            pdus.push(buf.freeze());
        }
        pdus
    }

    fn metrics(&mut self) -> NodeMetrics {
        NodeMetrics {
            pdcp_tx: self.pdcp.tx().metrics().clone(),
            pdcp_rx: self.pdcp.rx().metrics().clone(),
            rlc_tx: self.rlc.tx.metrics(),
            rlc_rx: self.rlc.rx.metrics(),
            pending_bytes: self.last_bs.pending_bytes,
            failures: self.failures,
        }
    }
}

/// Loopback counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoopbackStats {
    pub slots: u64,
    pub dl_sdus_offered: u64,
    /// SDUs delivered by the UE PDCP
    pub dl_sdus_received: u64,
    /// Echoed SDUs delivered by the gNB PDCP
    pub ul_sdus_received: u64,
    /// SDUs delivered with an id not above the previous one
    pub out_of_order_sdus: u64,
    pub dl_pdus_lost: u64,
    pub ul_pdus_lost: u64,
    pub dl_rbs: u64,
    pub ul_rbs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SliceReport {
    pub id: RanSliceId,
    pub avg_pdsch_rbs: f32,
    pub avg_pusch_rbs: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoopbackReport {
    pub slot: String,
    pub stats: LoopbackStats,
    pub gnb: NodeMetrics,
    pub ue: NodeMetrics,
    pub slices: Vec<SliceReport>,
}

pub struct Loopback {
    sim: SimulationConfig,
    gnb: LoopbackNode,
    ue: LoopbackNode,
    scheduler: InterSliceScheduler,
    nof_crbs: u32,
    slot: SlotPoint,
    slots_per_ms: u32,
    rng: StdRng,
    next_sdu_id: u64,
    last_dl_id: Option<u64>,
    last_ul_id: Option<u64>,
    /// MAC PDUs granted on PUSCH, keyed by the slot they arrive in
    ul_in_flight: Vec<(SlotPoint, Vec<Bytes>)>,
    stats: LoopbackStats,
}

fn div_ceil(value: u32, divisor: u32) -> u32 {
    (value + divisor - 1) / divisor
}

/// Id of a generated SDU, carried in its first 8 bytes
fn sdu_id(sdu: &Bytes) -> Option<u64> {
    (sdu.len() >= 8).then(|| sdu.slice(..8).get_u64())
}

impl Loopback {
    pub fn new(cfg: &LoopbackConfig) -> anyhow::Result<Self> {
        cfg.validate()?;
        let rb_id = RbId::Drb(cfg.bearer.drb_id);
        let mut gnb = LoopbackNode::new(Side::Gnb, rb_id, cfg.bearer.pdcp.clone(), &cfg.bearer.rlc)?;
        let mut ue = LoopbackNode::new(Side::Ue, rb_id, cfg.bearer.mirrored_pdcp(), &cfg.bearer.rlc)?;

        let security = &cfg.bearer.security;
        if security.enabled() {
            let sec_cfg = security.as_config()?;
            for node in [&mut gnb, &mut ue] {
                node.pdcp
                    .configure_security(sec_cfg.clone(), security.integrity, security.ciphering)?;
            }
            info!(
                "{}: Security configured. integrity={} ciphering={}",
                rb_id, security.integrity, security.ciphering
            );
        }

        let cell = cfg.cell.slice_cell_config()?;
        let scs = cell.scs;
        let nof_crbs = cell.nof_crbs;
        let mut scheduler = InterSliceScheduler::new(cell, &cfg.rrm_policies()?)?;
        scheduler.add_ue(&SliceUeConfig {
            ue_index: LOOPBACK_UE,
            logical_channels: vec![SliceLcConfig {
                lcid: Lcid(cfg.bearer.lcid),
                lc_group: 1,
                rrm_policy: cfg.bearer_rrm_policy()?,
            }],
            cfg_complete: true,
            in_fallback: false,
        });

        let rng = match cfg.simulation.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        info!(
            "{}: Loopback ready. rlc={} nof_crbs={} scs={:?} slices={}",
            rb_id,
            cfg.bearer.rlc.mode(),
            nof_crbs,
            scs,
            scheduler.nof_slices()
        );
        Ok(Self {
            sim: cfg.simulation.clone(),
            gnb,
            ue,
            scheduler,
            nof_crbs,
            slot: SlotPoint::new(scs, 0, 0),
            slots_per_ms: scs.slots_per_frame() / 10,
            rng,
            next_sdu_id: 0,
            last_dl_id: None,
            last_ul_id: None,
            ul_in_flight: Vec::new(),
            stats: LoopbackStats::default(),
        })
    }

    pub fn stats(&self) -> &LoopbackStats {
        &self.stats
    }

    /// Change the DL load while running
    pub fn set_sdus_per_ms(&mut self, sdus_per_ms: u32) {
        self.sim.sdus_per_ms = sdus_per_ms;
    }

    /// Run 1 ms of simulated time: new DL traffic, the slots of the
    /// millisecond and one timer tick on both sides
    pub fn run_ms(&mut self) {
        self.generate_traffic();
        for _ in 0..self.slots_per_ms {
            self.run_slot();
        }
        self.gnb.tick();
        self.ue.tick();
        self.process_events();
    }

    fn generate_traffic(&mut self) {
        for _ in 0..self.sim.sdus_per_ms {
            let mut sdu = BytesMut::with_capacity(self.sim.sdu_size);
            sdu.put_u64(self.next_sdu_id);
            sdu.put_bytes(self.next_sdu_id as u8, self.sim.sdu_size - 8);
            self.next_sdu_id += 1;
            self.stats.dl_sdus_offered += 1;
            self.gnb.pdcp.handle_sdu(sdu.freeze());
        }
        self.process_events();
    }

    fn run_slot(&mut self) {
        let slot = self.slot;
        self.scheduler.slot_indication(slot);
        self.deliver_pusch(slot);
        self.schedule_dl();
        self.schedule_ul();
        self.process_events();
        self.stats.slots += 1;
        self.slot += 1;
    }

    fn lost(&mut self) -> bool {
        self.sim.loss_probability > 0.0 && self.rng.gen_bool(self.sim.loss_probability)
    }

    fn schedule_dl(&mut self) {
        let bytes_per_prb = self.sim.bytes_per_prb;
        let mut cell_rbs_left = self.nof_crbs;
        while let Some(candidate) = self.scheduler.get_next_dl_candidate() {
            let Some(slice) = self.scheduler.slice(candidate.id) else {
                continue;
            };
            if !slice.ues().contains(LOOPBACK_UE) {
                continue;
            }
            let slice_rbs_left = candidate.max_rbs.saturating_sub(slice.pdsch_rb_count());
            let pending = self.gnb.pending_bytes();
            let rbs = slice_rbs_left
                .min(cell_rbs_left)
                .min(div_ceil(pending, bytes_per_prb));
            if rbs == 0 {
                continue;
            }

            let pdus = self.gnb.pull_pdus((rbs * bytes_per_prb) as usize);
            let used: usize = pdus.iter().map(Bytes::len).sum();
            if used == 0 {
                continue;
            }
            let used_rbs = div_ceil(used as u32, bytes_per_prb);
            if let Some(slice) = self.scheduler.slice_mut(candidate.id) {
                slice.store_pdsch_grant(used_rbs, candidate.slot);
            }
            cell_rbs_left -= used_rbs;
            self.stats.dl_rbs += u64::from(used_rbs);
            debug!(
                "slot={} slice={}: PDSCH grant rbs={} pdus={} bytes={}",
                candidate.slot,
                candidate.id,
                used_rbs,
                pdus.len(),
                used
            );

            for pdu in pdus {
                if self.lost() {
                    self.stats.dl_pdus_lost += 1;
                    continue;
                }
                self.ue.rlc.rx.handle_pdu(pdu);
            }
        }
    }

    /// RBs granted on `pusch_slot` over all slices
    fn cell_pusch_rbs(&self, pusch_slot: SlotPoint) -> u32 {
        (0..self.scheduler.nof_slices())
            .filter_map(|i| self.scheduler.slice(RanSliceId(i as u8)))
            .map(|slice| slice.nof_pusch_rbs_allocated(pusch_slot))
            .sum()
    }

    fn schedule_ul(&mut self) {
        let bytes_per_prb = self.sim.bytes_per_prb;
        while let Some(candidate) = self.scheduler.get_next_ul_candidate() {
            let cell_rbs_left = self.nof_crbs.saturating_sub(self.cell_pusch_rbs(candidate.slot));
            let Some(slice) = self.scheduler.slice(candidate.id) else {
                continue;
            };
            if !slice.ues().contains(LOOPBACK_UE) {
                continue;
            }
            let slice_rbs_left = candidate
                .max_rbs
                .saturating_sub(slice.nof_pusch_rbs_allocated(candidate.slot));
            let pending = self.ue.pending_bytes();
            let rbs = slice_rbs_left
                .min(cell_rbs_left)
                .min(div_ceil(pending, bytes_per_prb));
            if rbs == 0 {
                continue;
            }

            let pdus = self.ue.pull_pdus((rbs * bytes_per_prb) as usize);
            let used: usize = pdus.iter().map(Bytes::len).sum();
            if used == 0 {
                continue;
            }
            let used_rbs = div_ceil(used as u32, bytes_per_prb);
            if let Some(slice) = self.scheduler.slice_mut(candidate.id) {
                slice.store_pusch_grant(used_rbs, candidate.slot);
            }
            self.stats.ul_rbs += u64::from(used_rbs);
            debug!(
                "slot={} slice={}: PUSCH grant rbs={} pdus={} bytes={}",
                candidate.slot,
                candidate.id,
                used_rbs,
                pdus.len(),
                used
            );
            self.ul_in_flight.push((candidate.slot, pdus));
        }
    }

    /// Hand the PUSCH data due in `slot` to the gNB
    fn deliver_pusch(&mut self, slot: SlotPoint) {
        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.ul_in_flight)
            .into_iter()
            .partition(|(pusch_slot, _)| *pusch_slot - slot <= 0);
        self.ul_in_flight = pending;
        for pdu in due.into_iter().flat_map(|(_, pdus)| pdus) {
            if self.lost() {
                self.stats.ul_pdus_lost += 1;
                continue;
            }
            self.gnb.rlc.rx.handle_pdu(pdu);
        }
    }

    fn process_events(&mut self) {
        loop {
            let dl_sdus = self.ue.process_events();
            let ul_sdus = self.gnb.process_events();
            if dl_sdus.is_empty() && ul_sdus.is_empty() {
                break;
            }
            for sdu in dl_sdus {
                self.stats.dl_sdus_received += 1;
                if !Self::in_order(&mut self.last_dl_id, &sdu) {
                    self.stats.out_of_order_sdus += 1;
                }
                if self.sim.echo {
                    self.ue.pdcp.handle_sdu(sdu);
                }
            }
            for sdu in ul_sdus {
                self.stats.ul_sdus_received += 1;
                if !Self::in_order(&mut self.last_ul_id, &sdu) {
                    self.stats.out_of_order_sdus += 1;
                }
            }
        }
    }

    fn in_order(last: &mut Option<u64>, sdu: &Bytes) -> bool {
        let Some(id) = sdu_id(sdu) else {
            return false;
        };
        let ordered = last.map_or(true, |last| id > last);
        *last = Some(id);
        ordered
    }

    pub fn report(&mut self) -> LoopbackReport {
        let slices = (0..self.scheduler.nof_slices())
            .filter_map(|i| self.scheduler.slice(RanSliceId(i as u8)))
            .map(|slice| SliceReport {
                id: slice.id,
                avg_pdsch_rbs: slice.average_pdsch_rbs_per_slot(),
                avg_pusch_rbs: slice.average_pusch_rbs_per_slot(),
            })
            .collect();
        LoopbackReport {
            slot: self.slot.to_string(),
            stats: self.stats.clone(),
            gnb: self.gnb.metrics(),
            ue: self.ue.metrics(),
            slices,
        }
    }

    /// Run on a 1 ms tokio interval until `duration_ms` elapsed, or forever
    pub async fn run(&mut self, duration_ms: Option<u64>) {
        let mut interval = tokio::time::interval(Duration::from_millis(1));
        interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
        let mut elapsed_ms = 0u64;
        loop {
            interval.tick().await;
            self.run_ms();
            elapsed_ms += 1;

            if self.sim.metrics_period_ms > 0 && elapsed_ms % self.sim.metrics_period_ms == 0 {
                match serde_json::to_string(&self.report()) {
                    Ok(json) => info!("Metrics: {}", json),
                    Err(e) => warn!("Cannot serialize metrics: {}", e),
                }
            }
            if duration_ms.is_some_and(|d| elapsed_ms >= d) {
                break;
            }
        }
    }

    pub fn stop(&mut self) {
        self.gnb.rlc.stop();
        self.ue.rlc.stop();
    }
}
