//! Data Channel
//!
//! Three fixed-size payload slots per direction. A slot's status word records
//! both its phase and which side owns it:
//!
//! ```text
//!   Idle | own(consumer)  --producer claims-->  Write | own(producer)
//!   Write | own(producer) --payload copied-->   Recv  | own(producer)
//!   Recv  | own(producer) --consumer copies-->  Idle  | own(consumer)
//! ```
//!
//! Each transition is a single aligned word store, and only the side named by
//! the current status may perform the next one. A status word outside these
//! three combinations is a protocol violation.
//!
//! # Slot layout
//! | Offset | Field |
//! |---|---|
//! | 0x00 | status |
//! | 0x04 | sequence number |
//! | 0x08 | payload length |
//! | 0x10 | payload (`PACKET_SIZE_MAX` bytes) |

use alloc::vec::Vec;

use crate::io::IoMem;
use crate::{IpcError, Result, Side};

/// Slots per direction
pub const SLOT_COUNT: usize = 3;

/// Largest payload a slot carries
pub const PACKET_SIZE_MAX: usize = 272;

const SLOT_STATUS: usize = 0x00;
const SLOT_SEQ: usize = 0x04;
const SLOT_LEN: usize = 0x08;
const SLOT_PAYLOAD: usize = 0x10;

/// Bytes one slot occupies
pub const SLOT_SIZE: usize = SLOT_PAYLOAD + PACKET_SIZE_MAX;

// Channel header: producer-owned next sequence number
const NEXT_SEQ: usize = 0x00;
const SLOTS: usize = 0x10;

/// Bytes one channel occupies in SRAM
pub const CHANNEL_SIZE: usize = SLOTS + SLOT_COUNT * SLOT_SIZE;

const OWNER_SHIFT: u32 = 3;
const PHASE_MASK: u32 = (1 << OWNER_SHIFT) - 1;

static_assertions::const_assert!(PACKET_SIZE_MAX % 4 == 0);

/// Which way a channel carries payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ApToChub,
    ChubToAp,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::ApToChub, Direction::ChubToAp];

    /// Side that fills slots
    pub const fn producer(self) -> Side {
        match self {
            Direction::ApToChub => Side::Ap,
            Direction::ChubToAp => Side::Chub,
        }
    }

    /// Side that drains slots
    pub const fn consumer(self) -> Side {
        self.producer().peer()
    }

    /// Short label used in logs and dumps
    pub const fn label(self) -> &'static str {
        match self {
            Direction::ApToChub => "a2c",
            Direction::ChubToAp => "c2a",
        }
    }
}

/// Slot phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SlotState {
    Idle = 0,
    Write = 0x1,
    Recv = 0x2,
}

/// Decoded slot status word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotStatus {
    pub state: SlotState,
    pub owner: Side,
}

impl SlotStatus {
    pub const fn new(state: SlotState, owner: Side) -> Self {
        Self { state, owner }
    }

    pub const fn raw(self) -> u32 {
        self.state as u32 | (self.owner.owner_bits() << OWNER_SHIFT)
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        let state = match raw & PHASE_MASK {
            0 => SlotState::Idle,
            0x1 => SlotState::Write,
            0x2 => SlotState::Recv,
            _ => return None,
        };
        let owner = match raw >> OWNER_SHIFT {
            b if b == Side::Ap.owner_bits() => Side::Ap,
            b if b == Side::Chub.owner_bits() => Side::Chub,
            _ => return None,
        };
        Some(Self { state, owner })
    }
}

/// Payload taken out of a slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub slot: usize,
    pub seq: u32,
    pub payload: Vec<u8>,
}

/// Accessor for one direction's slots
pub struct DataChannel<'a> {
    mem: &'a dyn IoMem,
    base: usize,
    dir: Direction,
}

impl<'a> DataChannel<'a> {
    pub fn new(mem: &'a dyn IoMem, base: usize, dir: Direction) -> Self {
        Self { mem, base, dir }
    }

    pub fn direction(&self) -> Direction {
        self.dir
    }

    fn slot(&self, index: usize) -> usize {
        self.base + SLOTS + index * SLOT_SIZE
    }

    fn idle(&self) -> u32 {
        SlotStatus::new(SlotState::Idle, self.dir.consumer()).raw()
    }

    fn writing(&self) -> u32 {
        SlotStatus::new(SlotState::Write, self.dir.producer()).raw()
    }

    fn ready(&self) -> u32 {
        SlotStatus::new(SlotState::Recv, self.dir.producer()).raw()
    }

    /// Every slot back to `Idle | own(consumer)`, sequence counter to zero
    pub fn reset(&self) {
        self.mem.write32(self.base + NEXT_SEQ, 0);
        for i in 0..SLOT_COUNT {
            let slot = self.slot(i);
            self.mem.write32(slot + SLOT_SEQ, 0);
            self.mem.write32(slot + SLOT_LEN, 0);
            self.mem.write32(slot + SLOT_STATUS, self.idle());
        }
    }

    /// Raw status word of `slot`
    pub fn raw_status(&self, slot: usize) -> u32 {
        self.mem.read32(self.slot(slot) + SLOT_STATUS)
    }

    /// Decoded status of `slot`
    ///
    /// # Errors
    /// `ProtocolViolation` if the word is not one of the three legal
    /// combinations for this direction.
    pub fn status(&self, slot: usize) -> Result<SlotStatus> {
        let raw = self.raw_status(slot);
        if raw == self.idle() || raw == self.writing() || raw == self.ready() {
            if let Some(status) = SlotStatus::from_raw(raw) {
                return Ok(status);
            }
        }
        Err(IpcError::ProtocolViolation { slot, raw })
    }

    /// Validate every slot status
    pub fn check(&self) -> Result<()> {
        for i in 0..SLOT_COUNT {
            self.status(i)?;
        }
        Ok(())
    }

    /// Slots not in the idle state
    pub fn busy_slots(&self) -> usize {
        (0..SLOT_COUNT)
            .filter(|&i| self.raw_status(i) != self.idle())
            .count()
    }

    /// Whether any slot holds a payload waiting for the consumer
    pub fn has_pending(&self) -> bool {
        (0..SLOT_COUNT).any(|i| self.raw_status(i) == self.ready())
    }

    /// Whether a producer would find an idle slot right now
    pub fn has_free_slot(&self) -> bool {
        (0..SLOT_COUNT).any(|i| self.raw_status(i) == self.idle())
    }

    /// Copy `payload` into the first idle slot and hand it to the consumer
    ///
    /// Returns the slot index and the sequence number stamped on it. The
    /// caller announces the slot with the matching data event.
    ///
    /// # Errors
    /// - `WrongSide` if `side` is not this direction's producer
    /// - `PayloadTooLarge` if `payload` exceeds `PACKET_SIZE_MAX`
    /// - `NoFreeSlot` if every slot is in flight
    /// - `ProtocolViolation` if a slot status is illegal
    pub fn write(&self, side: Side, payload: &[u8]) -> Result<(usize, u32)> {
        if side != self.dir.producer() {
            return Err(IpcError::WrongSide { side });
        }
        if payload.len() > PACKET_SIZE_MAX {
            return Err(IpcError::PayloadTooLarge {
                len: payload.len(),
                max: PACKET_SIZE_MAX,
            });
        }

        let mut claimed = None;
        for i in 0..SLOT_COUNT {
            let status = self.status(i)?;
            if status.state == SlotState::Idle {
                claimed = Some(i);
                break;
            }
        }
        let index = claimed.ok_or(IpcError::NoFreeSlot)?;
        let slot = self.slot(index);
        self.mem.write32(slot + SLOT_STATUS, self.writing());

        let seq = self.mem.read32(self.base + NEXT_SEQ);
        self.mem.write32(self.base + NEXT_SEQ, seq.wrapping_add(1));

        self.mem.write_bytes(slot + SLOT_PAYLOAD, payload);
        self.mem.write32(slot + SLOT_LEN, payload.len() as u32);
        self.mem.write32(slot + SLOT_SEQ, seq);
        self.mem.write32(slot + SLOT_STATUS, self.ready());

        Ok((index, seq))
    }

    /// Take the oldest ready payload, returning its slot to the producer
    ///
    /// `Ok(None)` when nothing is ready. Slots still in the `Write` phase are
    /// skipped.
    ///
    /// # Errors
    /// - `WrongSide` if `side` is not this direction's consumer
    /// - `ProtocolViolation` for an illegal status or an oversized length
    pub fn read(&self, side: Side) -> Result<Option<Packet>> {
        if side != self.dir.consumer() {
            return Err(IpcError::WrongSide { side });
        }

        let mut oldest: Option<(usize, u32)> = None;
        for i in 0..SLOT_COUNT {
            if self.status(i)?.state != SlotState::Recv {
                continue;
            }
            let seq = self.mem.read32(self.slot(i) + SLOT_SEQ);
            let older = match oldest {
                None => true,
                Some((_, best)) => (seq.wrapping_sub(best) as i32) < 0,
            };
            if older {
                oldest = Some((i, seq));
            }
        }
        let Some((index, seq)) = oldest else {
            return Ok(None);
        };
        self.read_slot(index, seq).map(Some)
    }

    /// Take the payload of a specific ready slot
    ///
    /// `Ok(None)` if that slot is not ready.
    pub fn read_at(&self, side: Side, index: usize) -> Result<Option<Packet>> {
        if side != self.dir.consumer() {
            return Err(IpcError::WrongSide { side });
        }
        if self.status(index)?.state != SlotState::Recv {
            return Ok(None);
        }
        let seq = self.mem.read32(self.slot(index) + SLOT_SEQ);
        self.read_slot(index, seq).map(Some)
    }

    fn read_slot(&self, index: usize, seq: u32) -> Result<Packet> {
        let slot = self.slot(index);
        let len = self.mem.read32(slot + SLOT_LEN);
        if len as usize > PACKET_SIZE_MAX {
            return Err(IpcError::ProtocolViolation {
                slot: index,
                raw: self.raw_status(index),
            });
        }

        let payload = self.mem.to_vec(slot + SLOT_PAYLOAD, len as usize);
        self.mem.write32(slot + SLOT_STATUS, self.idle());

        Ok(Packet {
            slot: index,
            seq,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::SharedMem;
    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicBool, Ordering};

    fn channel_mem(dir: Direction) -> SharedMem {
        let mem = SharedMem::new(CHANNEL_SIZE);
        DataChannel::new(&mem, 0, dir).reset();
        mem
    }

    #[test]
    fn test_status_encoding() {
        let s = SlotStatus::new(SlotState::Recv, Side::Chub);
        assert_eq!(s.raw(), 0x2 | (0x2 << 3));
        assert_eq!(SlotStatus::from_raw(s.raw()), Some(s));
        assert_eq!(SlotStatus::from_raw(0x3 | (1 << 3)), None);
        assert_eq!(SlotStatus::from_raw(0x1 | (3 << 3)), None);
    }

    #[test]
    fn test_reset_leaves_slots_with_consumer() {
        let mem = channel_mem(Direction::ApToChub);
        let ch = DataChannel::new(&mem, 0, Direction::ApToChub);
        for i in 0..SLOT_COUNT {
            assert_eq!(
                ch.status(i).unwrap(),
                SlotStatus::new(SlotState::Idle, Side::Chub)
            );
        }
        assert_eq!(ch.busy_slots(), 0);
    }

    #[test]
    fn test_write_then_read() {
        let mem = channel_mem(Direction::ApToChub);
        let ch = DataChannel::new(&mem, 0, Direction::ApToChub);

        let (slot, seq) = ch.write(Side::Ap, b"hello chub").unwrap();
        assert_eq!((slot, seq), (0, 0));
        assert_eq!(
            ch.status(0).unwrap(),
            SlotStatus::new(SlotState::Recv, Side::Ap)
        );
        assert!(ch.has_pending());

        let pkt = ch.read(Side::Chub).unwrap().unwrap();
        assert_eq!(pkt.payload, b"hello chub");
        assert_eq!(pkt.seq, 0);
        assert_eq!(ch.busy_slots(), 0);
        assert!(ch.read(Side::Chub).unwrap().is_none());
    }

    #[test]
    fn test_wrong_side_rejected() {
        let mem = channel_mem(Direction::ChubToAp);
        let ch = DataChannel::new(&mem, 0, Direction::ChubToAp);

        assert_eq!(
            ch.write(Side::Ap, b"x"),
            Err(IpcError::WrongSide { side: Side::Ap })
        );
        assert_eq!(ch.read(Side::Chub), Err(IpcError::WrongSide { side: Side::Chub }));
    }

    #[test]
    fn test_payload_limits() {
        let mem = channel_mem(Direction::ApToChub);
        let ch = DataChannel::new(&mem, 0, Direction::ApToChub);

        let max = [0x5a; PACKET_SIZE_MAX];
        ch.write(Side::Ap, &max).unwrap();
        assert_eq!(
            ch.write(Side::Ap, &[0; PACKET_SIZE_MAX + 1]),
            Err(IpcError::PayloadTooLarge {
                len: PACKET_SIZE_MAX + 1,
                max: PACKET_SIZE_MAX
            })
        );
        // Rejected write must not have claimed a slot
        assert_eq!(ch.busy_slots(), 1);

        let empty = ch.write(Side::Ap, &[]).unwrap();
        assert_eq!(empty.0, 1);
        assert_eq!(ch.read(Side::Chub).unwrap().unwrap().payload.len(), PACKET_SIZE_MAX);
        assert!(ch.read(Side::Chub).unwrap().unwrap().payload.is_empty());
    }

    #[test]
    fn test_no_free_slot() {
        let mem = channel_mem(Direction::ApToChub);
        let ch = DataChannel::new(&mem, 0, Direction::ApToChub);
        for _ in 0..SLOT_COUNT {
            ch.write(Side::Ap, b"busy").unwrap();
        }
        assert!(!ch.has_free_slot());
        assert_eq!(ch.write(Side::Ap, b"more"), Err(IpcError::NoFreeSlot));
    }

    #[test]
    fn test_read_oldest_first_across_wrap() {
        let mem = channel_mem(Direction::ChubToAp);
        let ch = DataChannel::new(&mem, 0, Direction::ChubToAp);
        mem.write32(NEXT_SEQ, u32::MAX - 1);

        ch.write(Side::Chub, b"a").unwrap();
        ch.write(Side::Chub, b"b").unwrap();
        ch.write(Side::Chub, b"c").unwrap();

        let order: Vec<_> = (0..3)
            .map(|_| ch.read(Side::Ap).unwrap().unwrap().payload)
            .collect();
        assert_eq!(order, [b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_read_at_specific_slot() {
        let mem = channel_mem(Direction::ChubToAp);
        let ch = DataChannel::new(&mem, 0, Direction::ChubToAp);
        ch.write(Side::Chub, b"first").unwrap();
        ch.write(Side::Chub, b"second").unwrap();

        assert!(ch.read_at(Side::Ap, 2).unwrap().is_none());
        let pkt = ch.read_at(Side::Ap, 1).unwrap().unwrap();
        assert_eq!(pkt.payload, b"second");
        assert_eq!(ch.busy_slots(), 1);
    }

    #[test]
    fn test_illegal_status_is_violation() {
        let mem = channel_mem(Direction::ApToChub);
        let ch = DataChannel::new(&mem, 0, Direction::ApToChub);

        // Idle owned by the producer never happens in this direction
        let bogus = SlotStatus::new(SlotState::Idle, Side::Ap).raw();
        mem.write32(SLOTS + SLOT_SIZE + SLOT_STATUS, bogus);

        assert_eq!(
            ch.check(),
            Err(IpcError::ProtocolViolation { slot: 1, raw: bogus })
        );
        assert!(ch.read(Side::Chub).is_err());
    }

    #[test]
    fn test_oversized_length_is_violation() {
        let mem = channel_mem(Direction::ChubToAp);
        let ch = DataChannel::new(&mem, 0, Direction::ChubToAp);
        ch.write(Side::Chub, b"ok").unwrap();
        mem.write32(SLOTS + SLOT_LEN, PACKET_SIZE_MAX as u32 + 4);

        assert!(matches!(
            ch.read(Side::Ap),
            Err(IpcError::ProtocolViolation { slot: 0, .. })
        ));
    }

    #[test]
    fn test_concurrent_ownership_cycle() {
        const PACKETS: u32 = 2000;
        let mem = Arc::new(channel_mem(Direction::ApToChub));
        let done = Arc::new(AtomicBool::new(false));

        let producer = {
            let mem = mem.clone();
            std::thread::spawn(move || {
                let ch = DataChannel::new(&*mem, 0, Direction::ApToChub);
                let mut rng = 0x2545_f491_u32;
                let mut sent = 0;
                while sent < PACKETS {
                    rng ^= rng << 13;
                    rng ^= rng >> 17;
                    rng ^= rng << 5;
                    let len = (rng as usize) % (PACKET_SIZE_MAX + 1);
                    let mut payload = alloc::vec![sent as u8; len];
                    if len >= 4 {
                        payload[..4].copy_from_slice(&sent.to_le_bytes());
                    }
                    match ch.write(Side::Ap, &payload) {
                        Ok(_) => sent += 1,
                        Err(IpcError::NoFreeSlot) => std::thread::yield_now(),
                        Err(e) => panic!("producer: {e}"),
                    }
                }
            })
        };

        let consumer = {
            let mem = mem.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                let ch = DataChannel::new(&*mem, 0, Direction::ApToChub);
                let mut received = 0;
                while received < PACKETS {
                    match ch.read(Side::Chub).unwrap() {
                        Some(pkt) => {
                            // Sequence number and payload must belong together
                            let tag = pkt.seq as u8;
                            if pkt.payload.len() >= 4 {
                                assert_eq!(&pkt.payload[..4], &pkt.seq.to_le_bytes());
                                assert!(pkt.payload[4..].iter().all(|&b| b == tag));
                            } else {
                                assert!(pkt.payload.iter().all(|&b| b == tag));
                            }
                            received += 1;
                        }
                        None => std::thread::yield_now(),
                    }
                }
                done.store(true, Ordering::Release);
            })
        };

        producer.join().unwrap();
        consumer.join().unwrap();
        assert!(done.load(Ordering::Acquire));

        let ch = DataChannel::new(&*mem, 0, Direction::ApToChub);
        ch.check().unwrap();
        assert_eq!(ch.busy_slots(), 0);
    }
}
