//! PDCP Rx/Tx delivery properties

use bytes::{BufMut, Bytes, BytesMut};
use common::{RbId, TimerManager, UeIndex};
use interfaces::pdcp::{
    PdcpRxUpperControlNotifier, PdcpRxUpperDataNotifier, PdcpTxLowerNotifier,
    PdcpTxUpperControlNotifier,
};
use layers::pdcp::pdu::write_data_pdu_header;
use layers::pdcp::{
    PdcpConfig, PdcpEntityRx, PdcpEntityTx, PdcpRbType, PdcpRlcMode, PdcpRxState, PdcpSnSize,
};
use layers::security::SecurityDirection;
use proptest::prelude::*;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Sink {
    sdus: Mutex<Vec<Bytes>>,
    pdus: Mutex<Vec<Bytes>>,
}

impl Sink {
    fn delivered(&self) -> Vec<u32> {
        self.sdus
            .lock()
            .unwrap()
            .iter()
            .map(|sdu| u32::from(sdu[0]))
            .collect()
    }
}

impl PdcpRxUpperDataNotifier for Sink {
    fn on_new_sdu(&self, sdu: Bytes) {
        self.sdus.lock().unwrap().push(sdu);
    }
}

impl PdcpRxUpperControlNotifier for Sink {
    fn on_protocol_failure(&self) {}
    fn on_integrity_failure(&self) {}
    fn on_max_count_reached(&self) {}
}

impl PdcpTxLowerNotifier for Sink {
    fn on_new_pdu(&self, pdu: Bytes, _is_retx: bool) {
        self.pdus.lock().unwrap().push(pdu);
    }
    fn on_discard_pdu(&self, _pdcp_sn: u32) {}
}

impl PdcpTxUpperControlNotifier for Sink {
    fn on_protocol_failure(&self) {}
    fn on_max_count_reached(&self) {}
}

fn config() -> PdcpConfig {
    PdcpConfig::drb(PdcpRlcMode::Am, PdcpSnSize::Size12, SecurityDirection::Downlink)
}

fn rx_entity() -> (PdcpEntityRx, Arc<Sink>, TimerManager) {
    let timers = TimerManager::new();
    let sink = Arc::new(Sink::default());
    let rx = PdcpEntityRx::new(
        UeIndex(0),
        RbId::Drb(1),
        config().rx,
        sink.clone(),
        sink.clone(),
        &timers,
    )
    .unwrap();
    (rx, sink, timers)
}

/// Data PDU of COUNT `count` whose payload is the COUNT itself
fn data_pdu(count: u32) -> Bytes {
    let mut buf = BytesMut::new();
    write_data_pdu_header(&mut buf, PdcpRbType::Drb, PdcpSnSize::Size12, count & 0xfff);
    buf.put_u8(count as u8);
    buf.freeze()
}

fn tick(rx: &mut PdcpEntityRx, timers: &TimerManager, ms: u32) {
    for _ in 0..ms {
        for id in timers.tick() {
            rx.handle_timer_expiry(id);
        }
    }
}

fn assert_state_invariants(prev: PdcpRxState, st: PdcpRxState) -> Result<(), TestCaseError> {
    prop_assert!(st.rx_deliv >= prev.rx_deliv, "rx_deliv went back: {:?} -> {:?}", prev, st);
    prop_assert!(st.rx_deliv <= st.rx_next, "rx_deliv beyond rx_next: {:?}", st);
    Ok(())
}

#[test]
fn prop_rx_delivers_in_order_at_most_once() {
    proptest!(|(counts in proptest::collection::vec(0u32..64, 1..128))| {
        let (mut rx, sink, timers) = rx_entity();
        let mut prev = rx.state();
        for count in &counts {
            rx.handle_pdu(data_pdu(*count));
            let st = rx.state();
            assert_state_invariants(prev, st)?;
            prev = st;

            let delivered = sink.delivered();
            prop_assert!(
                delivered.windows(2).all(|w| w[0] < w[1]),
                "delivery out of order or duplicated: {:?}",
                delivered
            );
        }

        // t-Reordering skips every gap, so all distinct COUNTs come out
        tick(&mut rx, &timers, 200);
        assert_state_invariants(prev, rx.state())?;
        let mut expected = counts.clone();
        expected.sort_unstable();
        expected.dedup();
        prop_assert_eq!(sink.delivered(), expected);
        prop_assert!(!rx.is_reordering_timer_running());
    });
}

#[test]
fn prop_consecutive_counts_need_no_timer() {
    proptest!(|(n in 1u32..100)| {
        let (mut rx, sink, _timers) = rx_entity();
        for count in 0..n {
            rx.handle_pdu(data_pdu(count));
            prop_assert!(!rx.is_reordering_timer_running());
        }
        prop_assert_eq!(sink.delivered(), (0..n).collect::<Vec<_>>());
        prop_assert_eq!(rx.state().rx_deliv, n);
    });
}

#[test]
fn prop_gap_is_skipped_after_t_reordering() {
    proptest!(|(gap in 1u32..20, after in 1u32..20)| {
        let (mut rx, sink, timers) = rx_entity();
        // COUNT `gap` .. are received, 0 .. gap never arrive
        for count in gap..gap + after {
            rx.handle_pdu(data_pdu(count));
        }
        prop_assert!(sink.delivered().is_empty());
        prop_assert!(rx.is_reordering_timer_running());

        tick(&mut rx, &timers, 34);
        prop_assert!(sink.delivered().is_empty());
        tick(&mut rx, &timers, 1);
        prop_assert_eq!(sink.delivered(), (gap..gap + after).collect::<Vec<_>>());
        prop_assert_eq!(rx.metrics().num_t_reordering_timeouts, 1);

        // the skipped COUNTs are stale now
        rx.handle_pdu(data_pdu(0));
        prop_assert_eq!(sink.delivered().len(), after as usize);
    });
}

#[test]
fn test_rx_reorders_single_gap() {
    let (mut rx, sink, _timers) = rx_entity();
    rx.handle_pdu(data_pdu(0));
    assert_eq!(sink.delivered(), vec![0]);

    rx.handle_pdu(data_pdu(2));
    assert_eq!(sink.delivered(), vec![0]);
    assert!(rx.is_reordering_timer_running());
    assert_eq!(rx.state().rx_reord, 3);

    rx.handle_pdu(data_pdu(1));
    assert_eq!(sink.delivered(), vec![0, 1, 2]);
    assert!(!rx.is_reordering_timer_running());
    assert_eq!(rx.state().rx_deliv, 3);
}

#[test]
fn test_tx_drops_when_rlc_queue_is_full() {
    let timers = TimerManager::new();
    let sink = Arc::new(Sink::default());
    let mut cfg = config().tx;
    cfg.custom.rlc_sdu_queue = 4;
    let mut tx =
        PdcpEntityTx::new(UeIndex(0), RbId::Drb(1), cfg, sink.clone(), sink.clone(), &timers)
            .unwrap();

    for _ in 0..5 {
        tx.handle_sdu(Bytes::from_static(b"sdu"));
    }
    assert_eq!(sink.pdus.lock().unwrap().len(), 4);
    assert_eq!(tx.metrics().num_dropped_sdus, 1);
    assert_eq!(tx.state().tx_next, 4);

    // one transmit notification frees room for one SDU
    tx.handle_transmit_notification(0);
    tx.handle_sdu(Bytes::from_static(b"sdu"));
    assert_eq!(sink.pdus.lock().unwrap().len(), 5);
    assert_eq!(tx.metrics().num_dropped_sdus, 1);
}

#[test]
fn test_tx_metrics_serialize() {
    let timers = TimerManager::new();
    let sink = Arc::new(Sink::default());
    let mut tx = PdcpEntityTx::new(
        UeIndex(0),
        RbId::Drb(1),
        config().tx,
        sink.clone(),
        sink.clone(),
        &timers,
    )
    .unwrap();
    tx.handle_sdu(Bytes::from_static(b"abc"));

    let json = serde_json::to_value(tx.metrics()).unwrap();
    assert_eq!(json["num_sdus"], 1);
    assert_eq!(json["num_sdu_bytes"], 3);
    assert_eq!(json["num_pdus"], 1);
    assert_eq!(json["num_pdu_bytes"], 5);
}
