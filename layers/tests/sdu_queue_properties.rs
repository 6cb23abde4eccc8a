//! Property tests for the RLC SDU queue against a sequential model

use bytes::Bytes;
use layers::rlc::sdu_queue::{RlcSdu, RlcSduQueue};
use proptest::prelude::*;
use std::collections::{HashMap, VecDeque};

const CAPACITY: u32 = 8;

#[derive(Debug, Clone)]
enum Op {
    Write(u32),
    Discard(u32),
    Read,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u32..32).prop_map(Op::Write),
        2 => (0u32..32).prop_map(Op::Discard),
        2 => Just(Op::Read),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Live(u32),
    Discarded,
}

/// Slot occupancy and FIFO order of the queue
#[derive(Default)]
struct Model {
    slots: HashMap<u32, Slot>,
    fifo: VecDeque<u32>,
}

impl Model {
    fn write(&mut self, sn: u32) -> bool {
        let slot = sn % CAPACITY;
        if self.slots.contains_key(&slot) {
            return false;
        }
        self.slots.insert(slot, Slot::Live(sn));
        self.fifo.push_back(sn);
        true
    }

    fn discard(&mut self, sn: u32) -> bool {
        let slot = sn % CAPACITY;
        if self.slots.get(&slot) == Some(&Slot::Live(sn)) {
            self.slots.insert(slot, Slot::Discarded);
            return true;
        }
        false
    }

    fn read(&mut self) -> Option<u32> {
        while let Some(sn) = self.fifo.pop_front() {
            if self.slots.remove(&(sn % CAPACITY)) == Some(Slot::Live(sn)) {
                return Some(sn);
            }
        }
        None
    }

    fn live(&self) -> u32 {
        self.slots
            .values()
            .filter(|s| matches!(s, Slot::Live(_)))
            .count() as u32
    }
}

fn sdu(sn: u32) -> RlcSdu {
    RlcSdu::new(Bytes::from(vec![sn as u8; 10]), false, Some(sn))
}

#[test]
fn prop_queue_matches_slot_model() {
    proptest!(|(ops in proptest::collection::vec(op(), 1..200))| {
        let queue = RlcSduQueue::new(CAPACITY, 1 << 20);
        let mut model = Model::default();
        for op in ops {
            match op {
                Op::Write(sn) => prop_assert_eq!(queue.write(sdu(sn)), model.write(sn)),
                Op::Discard(sn) => prop_assert_eq!(queue.try_discard(sn), model.discard(sn)),
                Op::Read => {
                    let read = queue.read().and_then(|sdu| sdu.pdcp_sn);
                    prop_assert_eq!(read, model.read());
                }
            }
            let live = model.live();
            prop_assert_eq!(queue.state().n_sdus, live);
            prop_assert_eq!(queue.state().n_bytes, live * 10);
        }
    });
}

#[test]
fn prop_discard_succeeds_once() {
    proptest!(|(sns in proptest::collection::hash_set(0u32..1000, 1..8))| {
        let queue = RlcSduQueue::new(1024, 1 << 20);
        for sn in &sns {
            prop_assert!(queue.write(sdu(*sn)));
        }
        for sn in &sns {
            prop_assert!(queue.try_discard(*sn));
            prop_assert!(!queue.try_discard(*sn));
        }
        prop_assert_eq!(queue.state().n_sdus, 0);
        // discarded SDUs stay in the ring until the reader drops them
        prop_assert!(!queue.is_empty());
        prop_assert!(queue.read().is_none());
        prop_assert!(queue.is_empty());
    });
}

#[test]
fn prop_slot_is_exclusive_until_read() {
    proptest!(|(sn in 0u32..1000, laps in 1u32..4)| {
        let queue = RlcSduQueue::new(CAPACITY, 1 << 20);
        prop_assert!(queue.write(sdu(sn)));
        let alias = sn + laps * CAPACITY;
        prop_assert!(!queue.write(sdu(alias)));

        // a discarded SDU keeps its slot until the reader drops it
        prop_assert!(queue.try_discard(sn));
        prop_assert!(!queue.write(sdu(alias)));
        prop_assert!(queue.read().is_none());
        prop_assert!(queue.write(sdu(alias)));
        prop_assert_eq!(queue.read().and_then(|s| s.pdcp_sn), Some(alias));
    });
}
