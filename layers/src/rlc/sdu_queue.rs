//! Lock-free RLC SDU queue
//!
//! FIFO of SDUs written by the upper context and read by the lower context.
//! SDUs carrying a PDCP SN occupy slot `pdcp_sn % capacity` until they are
//! read, which lets the upper context discard them in place. Discarded SDUs
//! stay in the ring and are dropped by the reader.

use bytes::Bytes;
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, error};

const STATE_FREE: u32 = u32::MAX;
const STATE_DISCARDED: u32 = u32::MAX - 1;

/// SDU handed from PDCP (or RRC) to an RLC Tx entity
#[derive(Debug, Clone)]
pub struct RlcSdu {
    pub buf: Bytes,
    /// The SDU is a PDCP retransmission
    pub is_retx: bool,
    pub pdcp_sn: Option<u32>,
    pub time_of_arrival: Instant,
}

impl RlcSdu {
    pub fn new(buf: Bytes, is_retx: bool, pdcp_sn: Option<u32>) -> Self {
        Self {
            buf,
            is_retx,
            pdcp_sn,
            time_of_arrival: Instant::now(),
        }
    }
}

/// Number of SDUs and bytes queued and not discarded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SduQueueState {
    pub n_sdus: u32,
    pub n_bytes: u32,
}

impl fmt::Display for SduQueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queued_sdus={} queued_bytes={}", self.n_sdus, self.n_bytes)
    }
}

/// Bounded single-producer single-consumer ring
struct SpscRing<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    /// Next position to read, written by the consumer only
    head: CachePadded<AtomicUsize>,
    /// Next position to write, written by the producer only
    tail: CachePadded<AtomicUsize>,
}

// Values move between the producer and the consumer thread; slot access is
// ordered by the head/tail release/acquire pairs.
unsafe impl<T: Send> Send for SpscRing<T> {}
unsafe impl<T: Send> Sync for SpscRing<T> {}

impl<T> SpscRing<T> {
    fn new(capacity: usize) -> Self {
        let slots = (0..capacity.max(1))
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect();
        Self {
            slots,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head)
    }

    /// # Safety
    /// Only one thread may act as producer at a time.
    unsafe fn push(&self, value: T) -> Result<(), T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) >= self.capacity() {
            return Err(value);
        }
        let slot = &self.slots[tail % self.capacity()];
        (*slot.get()).write(value);
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// # Safety
    /// Only one thread may act as consumer at a time.
    unsafe fn pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let slot = &self.slots[head % self.capacity()];
        let value = (*slot.get()).assume_init_read();
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(value)
    }

    /// # Safety
    /// Only the consumer may call this, and the reference must not outlive the next `pop`.
    unsafe fn peek(&self) -> Option<&T> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let slot = &self.slots[head % self.capacity()];
        Some((*slot.get()).assume_init_ref())
    }
}

impl<T> Drop for SpscRing<T> {
    fn drop(&mut self) {
        // &mut self: no other thread can hold a role
        while unsafe { self.pop() }.is_some() {}
    }
}

/// Exclusive claim of the producer or consumer role
struct Claim<'a>(&'a AtomicBool);

impl<'a> Claim<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| Claim(flag))
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// SPSC SDU queue with discard by PDCP SN and a byte budget
pub struct RlcSduQueue {
    capacity: u32,
    byte_limit: u32,
    ring: SpscRing<RlcSdu>,
    sdu_states: Box<[AtomicU32]>,
    sdu_sizes: Box<[AtomicU32]>,
    /// Upper 32 bits: number of SDUs. Lower 32 bits: number of bytes.
    state: AtomicU64,
    producer: AtomicBool,
    consumer: AtomicBool,
}

impl fmt::Debug for RlcSduQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RlcSduQueue")
            .field("capacity", &self.capacity)
            .field("byte_limit", &self.byte_limit)
            .field("state", &self.state())
            .finish()
    }
}

impl RlcSduQueue {
    pub fn new(capacity: u32, byte_limit: u32) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            byte_limit,
            ring: SpscRing::new(capacity as usize),
            sdu_states: (0..capacity).map(|_| AtomicU32::new(STATE_FREE)).collect(),
            sdu_sizes: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
            state: AtomicU64::new(0),
            producer: AtomicBool::new(false),
            consumer: AtomicBool::new(false),
        }
    }

    fn slot(&self, pdcp_sn: u32) -> usize {
        (pdcp_sn % self.capacity) as usize
    }

    fn state_add(&self, sdu_size: u32) {
        self.state
            .fetch_add((1u64 << 32) | u64::from(sdu_size), Ordering::Relaxed);
    }

    fn state_sub(&self, sdu_size: u32) {
        self.state
            .fetch_sub((1u64 << 32) | u64::from(sdu_size), Ordering::Relaxed);
    }

    /// Append an SDU. Fails if the byte budget would be exceeded, the SN slot
    /// is taken (by a live or discarded SDU) or the ring is full.
    pub fn write(&self, sdu: RlcSdu) -> bool {
        let Some(_producer) = Claim::acquire(&self.producer) else {
            error!("SDU queue write while another producer is active");
            return false;
        };

        let st = self.state();
        let sdu_size = sdu.buf.len() as u32;
        if u64::from(sdu_size) + u64::from(st.n_bytes) >= u64::from(self.byte_limit) {
            return false;
        }

        let pdcp_sn = sdu.pdcp_sn;
        if let Some(sn) = pdcp_sn {
            let idx = self.slot(sn);
            let held = self.sdu_states[idx].load(Ordering::Acquire);
            if held != STATE_FREE {
                debug!("SDU queue failed to enqueue pdcp_sn={}. Slot holds {}", sn, held);
                return false;
            }
            // Only the producer moves a slot away from FREE
            self.sdu_sizes[idx].store(sdu_size, Ordering::Relaxed);
            self.sdu_states[idx].store(sn, Ordering::Release);
        }

        // SAFETY: the producer claim is held
        if unsafe { self.ring.push(sdu) }.is_err() {
            debug!("SDU queue failed to enqueue pdcp_sn={:?}. Queue is full", pdcp_sn);
            if let Some(sn) = pdcp_sn {
                self.sdu_states[self.slot(sn)].store(STATE_FREE, Ordering::Release);
            }
            return false;
        }
        self.state_add(sdu_size);
        true
    }

    /// Mark the SDU with `pdcp_sn` as discarded. Succeeds at most once per written SDU.
    pub fn try_discard(&self, pdcp_sn: u32) -> bool {
        let idx = self.slot(pdcp_sn);
        match self.sdu_states[idx].compare_exchange(
            pdcp_sn,
            STATE_DISCARDED,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => {
                self.state_sub(self.sdu_sizes[idx].load(Ordering::Relaxed));
                true
            }
            Err(STATE_DISCARDED) => {
                debug!("SDU queue cannot discard pdcp_sn={}. Slot is already discarded", pdcp_sn);
                false
            }
            Err(STATE_FREE) => {
                debug!("SDU queue cannot discard pdcp_sn={}. Slot is free", pdcp_sn);
                false
            }
            Err(held) => {
                debug!("SDU queue cannot discard pdcp_sn={}. Slot holds {}", pdcp_sn, held);
                false
            }
        }
    }

    /// Release the slot of a popped SDU. Returns false if it had been discarded.
    fn check_and_release(&self, sdu: &RlcSdu) -> bool {
        let Some(sn) = sdu.pdcp_sn else {
            self.state_sub(sdu.buf.len() as u32);
            return true;
        };
        let idx = self.slot(sn);
        let size = self.sdu_sizes[idx].load(Ordering::Relaxed);
        match self.sdu_states[idx].swap(STATE_FREE, Ordering::AcqRel) {
            held if held == sn => {
                self.state_sub(size);
                true
            }
            STATE_DISCARDED => false,
            held => {
                error!("SDU queue released pdcp_sn={} but slot held {}", sn, held);
                false
            }
        }
    }

    fn is_valid(&self, sdu: &RlcSdu) -> bool {
        match sdu.pdcp_sn {
            Some(sn) => self.sdu_states[self.slot(sn)].load(Ordering::Acquire) == sn,
            None => true,
        }
    }

    /// Pop the next SDU that was not discarded
    pub fn read(&self) -> Option<RlcSdu> {
        let Some(_consumer) = Claim::acquire(&self.consumer) else {
            error!("SDU queue read while another consumer is active");
            return None;
        };
        loop {
            // SAFETY: the consumer claim is held
            let sdu = unsafe { self.ring.pop() }?;
            if self.check_and_release(&sdu) {
                return Some(sdu);
            }
        }
    }

    /// Inspect the next SDU that was not discarded. Discarded SDUs at the head are dropped.
    pub fn front<R>(&self, f: impl FnOnce(&RlcSdu) -> R) -> Option<R> {
        let Some(_consumer) = Claim::acquire(&self.consumer) else {
            return None;
        };
        loop {
            // SAFETY: the consumer claim is held and the reference is dropped before any pop
            let valid = match unsafe { self.ring.peek() } {
                None => return None,
                Some(sdu) => self.is_valid(sdu),
            };
            if valid {
                // SAFETY: as above
                return unsafe { self.ring.peek() }.map(f);
            }
            // SAFETY: as above
            if let Some(sdu) = unsafe { self.ring.pop() } {
                self.check_and_release(&sdu);
            }
        }
    }

    pub fn state(&self) -> SduQueueState {
        let packed = self.state.load(Ordering::Relaxed);
        SduQueueState {
            n_sdus: (packed >> 32) as u32,
            n_bytes: packed as u32,
        }
    }

    pub fn size_sdus(&self) -> u32 {
        self.state().n_sdus
    }

    pub fn size_bytes(&self) -> u32 {
        self.state().n_bytes
    }

    /// True if the ring holds nothing, not even discarded SDUs
    pub fn is_empty(&self) -> bool {
        self.ring.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.ring.len() >= self.ring.capacity()
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sdu(sn: Option<u32>, len: usize) -> RlcSdu {
        RlcSdu::new(Bytes::from(vec![0xab; len]), false, sn)
    }

    #[test]
    fn test_fifo_order_and_state() {
        let q = RlcSduQueue::new(8, 1000);
        assert!(q.write(sdu(Some(0), 10)));
        assert!(q.write(sdu(None, 5)));
        assert!(q.write(sdu(Some(1), 20)));
        assert_eq!(q.state(), SduQueueState { n_sdus: 3, n_bytes: 35 });

        assert_eq!(q.read().unwrap().pdcp_sn, Some(0));
        assert_eq!(q.read().unwrap().pdcp_sn, None);
        assert_eq!(q.read().unwrap().pdcp_sn, Some(1));
        assert!(q.read().is_none());
        assert_eq!(q.state(), SduQueueState::default());
        assert!(q.is_empty());
    }

    #[test]
    fn test_slot_collision_rejected() {
        let q = RlcSduQueue::new(4, 1000);
        assert!(q.write(sdu(Some(1), 1)));
        assert!(!q.write(sdu(Some(5), 1)));
        assert!(q.write(sdu(Some(2), 1)));
        assert_eq!(q.size_sdus(), 2);
    }

    #[test]
    fn test_discard_is_idempotent() {
        let q = RlcSduQueue::new(4, 1000);
        assert!(q.write(sdu(Some(3), 7)));
        assert!(q.try_discard(3));
        assert!(!q.try_discard(3));
        assert_eq!(q.state(), SduQueueState::default());
        assert!(!q.is_empty());

        // Slot stays blocked until the reader drops the discarded SDU
        assert!(!q.write(sdu(Some(7), 1)));
        assert!(q.read().is_none());
        assert!(q.is_empty());
        assert!(q.write(sdu(Some(7), 1)));
    }

    #[test]
    fn test_discard_unknown_sn() {
        let q = RlcSduQueue::new(4, 1000);
        assert!(!q.try_discard(1));
        assert!(q.write(sdu(Some(1), 1)));
        assert!(!q.try_discard(5));
        assert!(q.try_discard(1));
    }

    #[test]
    fn test_byte_limit() {
        let q = RlcSduQueue::new(8, 10);
        assert!(q.write(sdu(None, 5)));
        assert!(!q.write(sdu(None, 5)));
        assert!(q.write(sdu(None, 4)));
    }

    #[test]
    fn test_full_ring_releases_slot() {
        let q = RlcSduQueue::new(2, 1000);
        assert!(q.write(sdu(None, 1)));
        assert!(q.write(sdu(None, 1)));
        assert!(q.is_full());
        assert!(!q.write(sdu(Some(1), 1)));
        q.read();
        assert!(q.write(sdu(Some(1), 1)));
    }

    #[test]
    fn test_front_skips_discarded() {
        let q = RlcSduQueue::new(4, 1000);
        assert!(q.write(sdu(Some(0), 1)));
        assert!(q.write(sdu(Some(1), 2)));
        assert!(q.try_discard(0));
        assert_eq!(q.front(|s| s.pdcp_sn), Some(Some(1)));
        assert_eq!(q.front(|s| s.buf.len()), Some(2));
        assert!(q.write(sdu(Some(4), 1)));
        assert!(q.try_discard(1));
        assert!(q.try_discard(4));
        assert_eq!(q.front(|s| s.pdcp_sn), None);
        assert!(q.is_empty());
    }

    #[test]
    fn test_concurrent_producer_consumer() {
        let q = Arc::new(RlcSduQueue::new(64, u32::MAX));
        let producer = {
            let q = q.clone();
            std::thread::spawn(move || {
                let mut sn = 0;
                while sn < 10_000 {
                    if q.write(sdu(Some(sn), 1)) {
                        if sn % 3 == 0 {
                            q.try_discard(sn);
                        }
                        sn += 1;
                    } else {
                        std::thread::yield_now();
                    }
                }
            })
        };

        let mut received = Vec::new();
        while received.last() != Some(&9_998) {
            match q.read() {
                Some(s) => received.push(s.pdcp_sn.unwrap()),
                None => std::thread::yield_now(),
            }
        }
        producer.join().unwrap();
        while let Some(s) = q.read() {
            received.push(s.pdcp_sn.unwrap());
        }

        assert!(received.windows(2).all(|w| w[0] < w[1]));
        // Discards can lose the race against the reader, never the reverse
        assert!(received.iter().filter(|sn| *sn % 3 != 0).count() == 6_666);
        assert_eq!(q.state(), SduQueueState::default());
    }
}
