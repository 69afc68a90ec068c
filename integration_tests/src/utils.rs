#![allow(dead_code)]
//! Master-side helpers: a minimal SDO client and AL state driver running
//! against the simulated ESC

use drivecat_common::al::AlState;
use drivecat_common::coe::{CoeHeader, CoeService, SegmentHeader, COE_HEADER_SIZE};
use drivecat_common::mailbox::{MailboxHeader, MailboxProtocol, MAILBOX_HEADER_SIZE};
use drivecat_common::sync_manager::{SmChannel, SmConfig};
use drivecat_slave::{Slave, SlaveConfig};

use crate::sim_esc::SimEsc;

/// Configure all four sync manager channels the way a master would
///
/// Process data channels are enabled only when their compiled size is
/// non-zero.
pub fn default_sm_setup(esc: &mut SimEsc, config: &SlaveConfig, rx_bytes: u16, tx_bytes: u16) {
    esc.configure_sm(
        SmChannel::MailboxOut,
        SmConfig {
            start_address: config.mailbox_out_address,
            length: config.mailbox_size,
            control: 0x06,
            status: 0,
            activate: 0x01,
        },
    );
    esc.configure_sm(
        SmChannel::MailboxIn,
        SmConfig {
            start_address: config.mailbox_in_address,
            length: config.mailbox_size,
            control: 0x02,
            status: 0,
            activate: 0x01,
        },
    );
    esc.configure_sm(
        SmChannel::ProcessDataOut,
        SmConfig {
            start_address: config.pd_out_address,
            length: rx_bytes,
            control: 0x04,
            status: 0,
            activate: if rx_bytes > 0 { 0x01 } else { 0x00 },
        },
    );
    esc.configure_sm(
        SmChannel::ProcessDataIn,
        SmConfig {
            start_address: config.pd_in_address,
            length: tx_bytes,
            control: 0x00,
            status: 0,
            activate: if tx_bytes > 0 { 0x01 } else { 0x00 },
        },
    );
}

/// Drives the master side of the wire: AL control writes, mailbox frames,
/// and a small SDO client
pub struct Master {
    counter: u8,
    pub now_us: u64,
    /// Segment data bytes per frame, matching the mailbox configuration
    pub seg_capacity: usize,
}

impl Master {
    pub fn new(config: &SlaveConfig) -> Self {
        Self {
            counter: 0,
            now_us: 0,
            seg_capacity: config.mailbox_size as usize - MAILBOX_HEADER_SIZE - 3,
        }
    }

    /// Advance time one millisecond and run the management loop once
    pub fn step(&mut self, slave: &mut Slave, esc: &mut SimEsc) {
        self.now_us += 1_000;
        slave.process(esc, self.now_us);
    }

    /// Run the management loop for `ms` milliseconds
    pub fn run_for(&mut self, slave: &mut Slave, esc: &mut SimEsc, ms: u32) {
        for _ in 0..ms {
            self.step(slave, esc);
        }
    }

    pub fn request_al_state(&mut self, slave: &mut Slave, esc: &mut SimEsc, state: AlState) {
        esc.master_write_al_control(state as u8);
        self.step(slave, esc);
    }

    /// Request a state with the error acknowledge bit set
    pub fn acknowledge(&mut self, slave: &mut Slave, esc: &mut SimEsc, state: AlState) {
        esc.master_write_al_control(state as u8 | 0x10);
        self.step(slave, esc);
    }

    /// Walk the slave to `target` through the intermediate states
    pub fn goto_state(&mut self, slave: &mut Slave, esc: &mut SimEsc, target: AlState) {
        use AlState::*;
        let ladder = [Init, PreOp, SafeOp, Op];
        let pos = |s: AlState| ladder.iter().position(|x| *x == s).unwrap();
        while slave.al_state() != target {
            let next = if pos(target) > pos(slave.al_state()) {
                ladder[pos(slave.al_state()) + 1]
            } else {
                target
            };
            self.request_al_state(slave, esc, next);
            assert_eq!(next, slave.al_state(), "failed to reach {next}");
        }
    }

    fn next_counter(&mut self) -> u8 {
        self.counter = if self.counter >= 7 { 1 } else { self.counter + 1 };
        self.counter
    }

    /// Send one mailbox frame and collect the response frame, if any
    pub fn mailbox_request(
        &mut self,
        slave: &mut Slave,
        esc: &mut SimEsc,
        protocol: u8,
        payload: &[u8],
    ) -> Option<(MailboxHeader, Vec<u8>)> {
        let mut frame = vec![0u8; MAILBOX_HEADER_SIZE + payload.len()];
        MailboxHeader {
            length: payload.len() as u16,
            address: 0,
            protocol,
            counter: self.next_counter(),
        }
        .write(&mut frame);
        frame[MAILBOX_HEADER_SIZE..].copy_from_slice(payload);
        assert!(esc.master_write_mailbox(&frame), "write mailbox busy");
        self.step(slave, esc);
        self.read_response(slave, esc)
    }

    /// Fetch a pending response frame and let the slave observe the read
    pub fn read_response(
        &mut self,
        slave: &mut Slave,
        esc: &mut SimEsc,
    ) -> Option<(MailboxHeader, Vec<u8>)> {
        let frame = esc.master_read_mailbox()?;
        let (header, payload) = MailboxHeader::parse(&frame).expect("bad response header");
        let payload = payload.to_vec();
        self.step(slave, esc);
        Some((header, payload))
    }

    /// Send an SDO request body and return the SDO response body
    fn sdo_exchange(&mut self, slave: &mut Slave, esc: &mut SimEsc, body: &[u8]) -> Vec<u8> {
        let mut payload = vec![0u8; COE_HEADER_SIZE + body.len()];
        CoeHeader::new(CoeService::SdoRequest).write(&mut payload);
        payload[COE_HEADER_SIZE..].copy_from_slice(body);
        let (header, payload) = self
            .mailbox_request(slave, esc, MailboxProtocol::Coe as u8, &payload)
            .expect("no SDO response");
        assert_eq!(MailboxProtocol::Coe as u8, header.protocol);
        let (coe, body) = CoeHeader::parse(&payload).expect("bad CoE response");
        assert_eq!(Ok(CoeService::SdoResponse), coe.service_type());
        body.to_vec()
    }

    pub fn sdo_download(
        &mut self,
        slave: &mut Slave,
        esc: &mut SimEsc,
        index: u16,
        sub: u8,
        data: &[u8],
    ) -> Result<(), u32> {
        let idx = index.to_le_bytes();
        if data.len() <= 4 {
            let n = (4 - data.len()) as u8;
            let mut body = vec![(1 << 5) | 0x01 | 0x02 | (n << 2), idx[0], idx[1], sub];
            body.extend_from_slice(data);
            body.resize(8, 0);
            let resp = check_abort(&self.sdo_exchange(slave, esc, &body))?.to_vec();
            assert_eq!(3, resp[0] >> 5);
            return Ok(());
        }

        let mut body = vec![(1 << 5) | 0x01, idx[0], idx[1], sub];
        body.extend_from_slice(&(data.len() as u32).to_le_bytes());
        let resp = check_abort(&self.sdo_exchange(slave, esc, &body))?.to_vec();
        assert_eq!(3, resp[0] >> 5);

        let mut toggle = true;
        let mut offset = 0;
        while offset < data.len() {
            let n = (data.len() - offset).min(self.seg_capacity);
            let last = offset + n == data.len();
            let header = SegmentHeader {
                command: 0,
                toggle,
                seg_data_size: if last {
                    SegmentHeader::size_field_for(n)
                } else {
                    0
                },
                last,
            };
            let mut body = vec![header.to_byte()];
            body.extend_from_slice(&data[offset..offset + n]);
            let resp = check_abort(&self.sdo_exchange(slave, esc, &body))?.to_vec();
            let ack = SegmentHeader::from_byte(resp[0]);
            assert_eq!(1, ack.command);
            assert_eq!(toggle, ack.toggle);
            toggle = !toggle;
            offset += n;
        }
        Ok(())
    }

    pub fn sdo_upload(
        &mut self,
        slave: &mut Slave,
        esc: &mut SimEsc,
        index: u16,
        sub: u8,
    ) -> Result<Vec<u8>, u32> {
        let idx = index.to_le_bytes();
        let body = [2 << 5, idx[0], idx[1], sub];
        let resp = check_abort(&self.sdo_exchange(slave, esc, &body))?.to_vec();
        assert_eq!(2, resp[0] >> 5);

        if resp[0] & 0x02 != 0 {
            // Expedited, data embedded in the header
            let n = if resp[0] & 0x01 != 0 {
                4 - ((resp[0] >> 2) & 0x03) as usize
            } else {
                4
            };
            return Ok(resp[4..4 + n].to_vec());
        }

        let total = u32::from_le_bytes(resp[4..8].try_into().unwrap()) as usize;
        if resp.len() > 8 {
            // Normal transfer: the whole value followed the declared size
            return Ok(resp[8..8 + total].to_vec());
        }

        // Segmented transfer
        let mut out = Vec::new();
        let mut toggle = true;
        loop {
            let body = [(3 << 5) | if toggle { 0x10 } else { 0 }];
            let resp = check_abort(&self.sdo_exchange(slave, esc, &body))?.to_vec();
            let seg = SegmentHeader::from_byte(resp[0]);
            assert_eq!(0, seg.command);
            assert_eq!(toggle, seg.toggle);
            let data = &resp[1..];
            let n = seg.data_length(data.len());
            out.extend_from_slice(&data[..n]);
            if seg.last {
                break;
            }
            toggle = !toggle;
        }
        assert_eq!(total, out.len());
        Ok(out)
    }
}

/// Split an SDO response body into data or the abort code it carries
pub fn check_abort(body: &[u8]) -> Result<&[u8], u32> {
    if body[0] >> 5 == 4 {
        Err(u32::from_le_bytes(body[4..8].try_into().unwrap()))
    } else {
        Ok(body)
    }
}
