//! Mailbox buffer management
//!
//! The mailbox exchanges one frame at a time in each direction through the
//! two mailbox sync manager channels. This module owns a small pool of frame
//! buffers and tracks three roles as indices into the pool: the frame
//! currently in the hardware slot (unread by the master), the most recently
//! acknowledged frame (kept so a repeat request can resend byte-identical
//! content), and frames queued behind a busy slot. At most one frame is in
//! flight at a time; a new inbound service is only fetched once the slot is
//! clear.

use defmt_or_log::{debug, warn};

use drivecat_common::mailbox::{MailboxHeader, MAILBOX_HEADER_SIZE};
use drivecat_common::sync_manager::{SmChannel, SmConfig};
use drivecat_common::traits::EscRegisters;

/// Largest mailbox area supported, in bytes
pub const MAX_MAILBOX_SIZE: usize = 128;

const POOL_SIZE: usize = 4;
const QUEUE_DEPTH: usize = 2;

#[derive(Clone, Copy)]
struct Frame {
    data: [u8; MAX_MAILBOX_SIZE],
    len: u16,
}

impl Frame {
    const fn empty() -> Self {
        Self {
            data: [0; MAX_MAILBOX_SIZE],
            len: 0,
        }
    }
}

/// Outcome of [`Mailbox::submit`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum SubmitOutcome {
    /// The frame was written to the hardware slot
    Sent,
    /// The slot was busy; the frame is queued and will be sent on the next
    /// master read
    Queued,
    /// No buffer or queue slot was free; the caller retries later
    Busy,
}

/// An inbound event from [`Mailbox::fetch`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Inbound {
    /// A new frame; the payload sits at `MAILBOX_HEADER_SIZE..` of the fetch
    /// buffer
    Frame {
        /// Parsed frame header
        header: MailboxHeader,
        /// Payload length in bytes
        payload_len: usize,
    },
    /// A retransmission of the previous request; already handled, dropped
    Duplicate,
    /// The frame could not be parsed; `detail` is the mailbox error code
    Malformed {
        /// Mailbox error detail code
        detail: u16,
    },
}

/// The mailbox buffer pool and role tracking
pub(crate) struct Mailbox {
    pool: [Frame; POOL_SIZE],
    /// Frame currently in the hardware slot, not yet read by the master
    slot: Option<u8>,
    /// Most recently acknowledged frame, kept for the repeat service
    sent: Option<u8>,
    /// Frames waiting for the slot to clear, oldest first
    queued: [Option<u8>; QUEUE_DEPTH],
    running: bool,
    out_address: u16,
    out_length: u16,
    in_address: u16,
    in_length: u16,
    tx_counter: u8,
    last_rx_counter: u8,
    repeats_served: u32,
}

impl Mailbox {
    pub const fn new() -> Self {
        Self {
            pool: [Frame::empty(); POOL_SIZE],
            slot: None,
            sent: None,
            queued: [None; QUEUE_DEPTH],
            running: false,
            out_address: 0,
            out_length: 0,
            in_address: 0,
            in_length: 0,
            tx_counter: 0,
            last_rx_counter: 0,
            repeats_served: 0,
        }
    }

    /// Begin operation with the master's validated channel settings
    pub fn start(&mut self, sm_out: &SmConfig, sm_in: &SmConfig) {
        self.out_address = sm_out.start_address;
        self.out_length = sm_out.length.min(MAX_MAILBOX_SIZE as u16);
        self.in_address = sm_in.start_address;
        self.in_length = sm_in.length.min(MAX_MAILBOX_SIZE as u16);
        self.slot = None;
        self.sent = None;
        self.queued = [None; QUEUE_DEPTH];
        self.tx_counter = 0;
        self.last_rx_counter = 0;
        self.running = true;
    }

    /// Stop operation, dropping all buffered frames
    pub fn stop(&mut self) {
        self.running = false;
        self.slot = None;
        self.sent = None;
        self.queued = [None; QUEUE_DEPTH];
    }

    pub fn running(&self) -> bool {
        self.running
    }

    /// Payload bytes available per frame
    pub fn payload_capacity(&self) -> usize {
        (self.in_length as usize).saturating_sub(MAILBOX_HEADER_SIZE)
    }

    /// True when a frame is in the hardware slot awaiting the master
    pub fn in_flight(&self) -> bool {
        self.slot.is_some()
    }

    /// True when a new response frame can be accepted without queueing
    pub fn idle(&self) -> bool {
        self.running && self.slot.is_none() && self.queued[0].is_none()
    }

    /// Number of repeat requests served since start
    pub fn repeats_served(&self) -> u32 {
        self.repeats_served
    }

    /// Queue a response frame for transmission
    pub fn submit(
        &mut self,
        esc: &mut dyn EscRegisters,
        protocol: u8,
        payload: &[u8],
    ) -> SubmitOutcome {
        if !self.running || payload.len() > self.payload_capacity() {
            return SubmitOutcome::Busy;
        }
        let Some(idx) = self.alloc() else {
            return SubmitOutcome::Busy;
        };
        self.compose(idx, protocol, payload);

        if self.slot.is_none() {
            self.write_slot(esc, idx);
            SubmitOutcome::Sent
        } else if self.queue_back(idx) {
            SubmitOutcome::Queued
        } else {
            SubmitOutcome::Busy
        }
    }

    /// Fetch a frame the master stored in the write mailbox
    ///
    /// Reads the whole area (which clears the channel's full state) and
    /// parses the header. `buf` must hold at least the channel length.
    pub fn fetch(&mut self, esc: &mut dyn EscRegisters, buf: &mut [u8]) -> Inbound {
        let len = self.out_length as usize;
        esc.read(self.out_address, &mut buf[..len]);
        match MailboxHeader::parse(&buf[..len]) {
            Ok((header, payload)) => {
                if header.counter != 0 && header.counter == self.last_rx_counter {
                    debug!("Dropping duplicate mailbox frame (counter {})", header.counter);
                    return Inbound::Duplicate;
                }
                self.last_rx_counter = header.counter;
                Inbound::Frame {
                    header,
                    payload_len: payload.len(),
                }
            }
            Err(e) => {
                warn!("Malformed mailbox frame: {:?}", e);
                Inbound::Malformed { detail: e.detail() }
            }
        }
    }

    /// The master has read the frame in the slot
    ///
    /// The read frame becomes the repeat candidate and the oldest queued
    /// frame, if any, takes the slot. Returns true when the slot is left
    /// clear, meaning a continuation may submit a new frame.
    pub fn on_master_read(&mut self, esc: &mut dyn EscRegisters) -> bool {
        let Some(read) = self.slot.take() else {
            return self.running;
        };
        self.sent = Some(read);
        if let Some(next) = self.queue_pop() {
            self.write_slot(esc, next);
            false
        } else {
            true
        }
    }

    /// The master toggled the repeat request bit
    ///
    /// Resends the most recently acknowledged frame byte-identically. If a
    /// newer, unread frame occupies the hardware slot it is evicted by
    /// toggling the channel and queued to follow the repeated frame. A repeat
    /// request before anything was acknowledged is a no-op.
    pub fn on_repeat_request(&mut self, esc: &mut dyn EscRegisters) {
        let Some(sent) = self.sent else {
            return;
        };
        self.repeats_served = self.repeats_served.wrapping_add(1);
        if let Some(current) = self.slot.take() {
            if current != sent {
                debug!("Evicting unread mailbox frame for repeat");
                esc.disable_sm(SmChannel::MailboxIn);
                esc.enable_sm(SmChannel::MailboxIn);
                self.queue_front(current);
            }
        }
        self.write_slot(esc, sent);
    }

    fn alloc(&self) -> Option<u8> {
        let in_use = |i: u8| {
            self.slot == Some(i)
                || self.sent == Some(i)
                || self.queued.iter().any(|q| *q == Some(i))
        };
        (0..POOL_SIZE as u8).find(|i| !in_use(*i))
    }

    fn compose(&mut self, idx: u8, protocol: u8, payload: &[u8]) {
        self.tx_counter = if self.tx_counter >= 7 {
            1
        } else {
            self.tx_counter + 1
        };
        let header = MailboxHeader {
            length: payload.len() as u16,
            address: 0,
            protocol,
            counter: self.tx_counter,
        };
        let frame = &mut self.pool[idx as usize];
        frame.data.fill(0);
        header.write(&mut frame.data);
        frame.data[MAILBOX_HEADER_SIZE..MAILBOX_HEADER_SIZE + payload.len()]
            .copy_from_slice(payload);
        frame.len = (MAILBOX_HEADER_SIZE + payload.len()) as u16;
    }

    fn write_slot(&mut self, esc: &mut dyn EscRegisters, idx: u8) {
        // The whole area is written so the last byte marks the buffer full
        let len = self.in_length as usize;
        esc.write(self.in_address, &self.pool[idx as usize].data[..len]);
        self.slot = Some(idx);
    }

    fn queue_back(&mut self, idx: u8) -> bool {
        for q in self.queued.iter_mut() {
            if q.is_none() {
                *q = Some(idx);
                return true;
            }
        }
        false
    }

    fn queue_front(&mut self, idx: u8) {
        self.queued.rotate_right(1);
        self.queued[0] = Some(idx);
    }

    fn queue_pop(&mut self) -> Option<u8> {
        let head = self.queued[0].take()?;
        self.queued.rotate_left(1);
        Some(head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivecat_common::al::{AlStatus, AlStatusCode};

    struct MemEsc {
        mem: Vec<u8>,
        toggles: u32,
    }

    impl MemEsc {
        fn new() -> Self {
            Self {
                mem: vec![0; 0x2000],
                toggles: 0,
            }
        }
    }

    impl EscRegisters for MemEsc {
        fn read(&mut self, address: u16, buf: &mut [u8]) {
            let a = address as usize;
            buf.copy_from_slice(&self.mem[a..a + buf.len()]);
        }

        fn write(&mut self, address: u16, data: &[u8]) {
            let a = address as usize;
            self.mem[a..a + data.len()].copy_from_slice(data);
        }

        fn enable_sm(&mut self, _channel: SmChannel) {
            self.toggles += 1;
        }

        fn disable_sm(&mut self, _channel: SmChannel) {}

        fn set_al_status(&mut self, _status: AlStatus, _code: AlStatusCode) {}

        fn set_event_mask(&mut self, _mask: u32) {}
    }

    fn started_mailbox() -> Mailbox {
        let mut mbx = Mailbox::new();
        let sm_out = SmConfig {
            start_address: 0x1000,
            length: 48,
            ..Default::default()
        };
        let sm_in = SmConfig {
            start_address: 0x1080,
            length: 48,
            ..Default::default()
        };
        mbx.start(&sm_out, &sm_in);
        mbx
    }

    fn slot_frame(esc: &mut MemEsc, mbx: &Mailbox) -> Vec<u8> {
        let mut frame = vec![0u8; mbx.in_length as usize];
        esc.read(mbx.in_address, &mut frame);
        frame
    }

    #[test]
    fn test_submit_and_acknowledge() {
        let mut esc = MemEsc::new();
        let mut mbx = started_mailbox();

        assert_eq!(SubmitOutcome::Sent, mbx.submit(&mut esc, 3, &[1, 2, 3]));
        assert!(mbx.in_flight());
        let frame = slot_frame(&mut esc, &mbx);
        let (header, payload) = MailboxHeader::parse(&frame).unwrap();
        assert_eq!(3, header.length);
        assert_eq!(3, header.protocol);
        assert_eq!([1, 2, 3], payload[..3]);

        // Second frame queues behind the busy slot
        assert_eq!(SubmitOutcome::Queued, mbx.submit(&mut esc, 3, &[4]));
        assert!(!mbx.on_master_read(&mut esc));
        let frame = slot_frame(&mut esc, &mbx);
        let (header, payload) = MailboxHeader::parse(&frame).unwrap();
        assert_eq!([4], payload[..1]);
        assert_eq!(1, header.length);
        assert!(mbx.on_master_read(&mut esc));
        assert!(!mbx.in_flight());
    }

    #[test]
    fn test_repeat_before_any_send_is_noop() {
        let mut esc = MemEsc::new();
        let mut mbx = started_mailbox();
        mbx.on_repeat_request(&mut esc);
        assert!(!mbx.in_flight());
        assert_eq!(0, mbx.repeats_served());
    }

    #[test]
    fn test_repeat_resends_identical_content() {
        let mut esc = MemEsc::new();
        let mut mbx = started_mailbox();

        mbx.submit(&mut esc, 3, &[0xAA, 0xBB]);
        mbx.on_master_read(&mut esc);
        let original = slot_frame(&mut esc, &mbx);

        // Clobber the area, then ask for a repeat
        esc.write(mbx.in_address, &vec![0xFF; mbx.in_length as usize]);
        mbx.on_repeat_request(&mut esc);
        assert_eq!(original, slot_frame(&mut esc, &mbx));
        assert_eq!(1, mbx.repeats_served());
    }

    #[test]
    fn test_repeat_evicts_unread_frame_and_requeues_it() {
        let mut esc = MemEsc::new();
        let mut mbx = started_mailbox();

        // First frame gets read, second sits unread in the slot
        mbx.submit(&mut esc, 3, &[0x11]);
        mbx.on_master_read(&mut esc);
        let first = slot_frame(&mut esc, &mbx);
        mbx.submit(&mut esc, 3, &[0x22]);
        let second = slot_frame(&mut esc, &mbx);

        mbx.on_repeat_request(&mut esc);
        // The channel was toggled to evict and the first frame is back
        assert_eq!(1, esc.toggles);
        assert_eq!(first, slot_frame(&mut esc, &mbx));

        // After the master reads the repeat, the evicted frame follows
        mbx.on_master_read(&mut esc);
        assert_eq!(second, slot_frame(&mut esc, &mbx));
    }

    #[test]
    fn test_duplicate_counter_dropped() {
        let mut esc = MemEsc::new();
        let mut mbx = started_mailbox();

        let header = MailboxHeader {
            length: 2,
            address: 0,
            protocol: 3,
            counter: 5,
        };
        let mut frame = [0u8; 48];
        header.write(&mut frame);
        frame[6] = 0xAB;
        esc.write(0x1000, &frame);

        let mut buf = [0u8; MAX_MAILBOX_SIZE];
        assert!(matches!(
            mbx.fetch(&mut esc, &mut buf),
            Inbound::Frame { payload_len: 2, .. }
        ));
        // The same counter again is a retransmission
        esc.write(0x1000, &frame);
        assert_eq!(Inbound::Duplicate, mbx.fetch(&mut esc, &mut buf));

        // Counter 0 is never treated as a duplicate
        let header = MailboxHeader {
            counter: 0,
            ..header
        };
        header.write(&mut frame);
        esc.write(0x1000, &frame);
        assert!(matches!(mbx.fetch(&mut esc, &mut buf), Inbound::Frame { .. }));
        esc.write(0x1000, &frame);
        assert!(matches!(mbx.fetch(&mut esc, &mut buf), Inbound::Frame { .. }));
    }

    #[test]
    fn test_malformed_frame_reports_detail() {
        let mut esc = MemEsc::new();
        let mut mbx = started_mailbox();

        // Length field exceeds the channel size
        let header = MailboxHeader {
            length: 100,
            address: 0,
            protocol: 3,
            counter: 1,
        };
        let mut frame = [0u8; 48];
        header.write(&mut frame);
        esc.write(0x1000, &frame);

        let mut buf = [0u8; MAX_MAILBOX_SIZE];
        assert_eq!(
            Inbound::Malformed {
                detail: drivecat_common::constants::mailbox_errors::SYNTAX
            },
            mbx.fetch(&mut esc, &mut buf)
        );
    }

    #[test]
    fn test_submit_exhaustion_reports_busy() {
        let mut esc = MemEsc::new();
        let mut mbx = started_mailbox();

        assert_eq!(SubmitOutcome::Sent, mbx.submit(&mut esc, 3, &[1]));
        assert_eq!(SubmitOutcome::Queued, mbx.submit(&mut esc, 3, &[2]));
        assert_eq!(SubmitOutcome::Queued, mbx.submit(&mut esc, 3, &[3]));
        assert_eq!(SubmitOutcome::Busy, mbx.submit(&mut esc, 3, &[4]));
    }
}
