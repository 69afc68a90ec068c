//! End-to-end tests of the mailbox and SDO server through the simulated ESC

use drivecat_common::coe::{
    info_op, AbortCode, CoeHeader, CoeService, EmergencyFrame, SdoInfoHeader, COE_HEADER_SIZE,
    SDO_INFO_HEADER_SIZE,
};
use drivecat_common::constants::{mailbox_errors, object_ids};
use drivecat_common::mailbox::{MailboxErrorReply, MailboxProtocol};
use drivecat_common::objects::ObjectAccess;

use integration_tests::prelude::*;

fn make_slave(bench: &TestBench, config: SlaveConfig) -> Slave<'static> {
    Slave::new(config, Callbacks::new(), bench.state, bench.emcy, bench.od)
}

fn coe_upload_payload(index: u16, sub: u8) -> Vec<u8> {
    let mut payload = vec![0u8; COE_HEADER_SIZE + 4];
    CoeHeader::new(CoeService::SdoRequest).write(&mut payload);
    let idx = index.to_le_bytes();
    payload[COE_HEADER_SIZE..].copy_from_slice(&[2 << 5, idx[0], idx[1], sub]);
    payload
}

#[test]
fn test_expedited_download_and_upload() {
    let bench = bench();
    let config = SlaveConfig::default();
    let mut esc = SimEsc::new();
    default_sm_setup(&mut esc, &config, 0, 0);
    let mut slave = make_slave(&bench, config);
    let mut master = Master::new(&config);
    master.goto_state(&mut slave, &mut esc, AlState::PreOp);

    master
        .sdo_download(&mut slave, &mut esc, CONTROL_WORD_INDEX, 0, &[0x06, 0x00])
        .unwrap();
    assert_eq!(0x0006, bench.control_word.get_u16());
    assert_eq!(
        vec![0x06, 0x00],
        master
            .sdo_upload(&mut slave, &mut esc, CONTROL_WORD_INDEX, 0)
            .unwrap()
    );

    // Identity object serial, seeded by the bench
    assert_eq!(
        0x1234_5678u32.to_le_bytes().to_vec(),
        master
            .sdo_upload(&mut slave, &mut esc, object_ids::IDENTITY, 4)
            .unwrap()
    );
}

#[test]
fn test_segmented_transfer_roundtrip() {
    let bench = bench();
    // A small mailbox forces the 60-byte value through segments
    let config = SlaveConfig {
        mailbox_size: 32,
        ..Default::default()
    };
    let mut esc = SimEsc::new();
    default_sm_setup(&mut esc, &config, 0, 0);
    let mut slave = make_slave(&bench, config);
    let mut master = Master::new(&config);
    master.goto_state(&mut slave, &mut esc, AlState::PreOp);

    let data: Vec<u8> = (0u8..60).map(|x| x.wrapping_mul(13).wrapping_add(1)).collect();
    master
        .sdo_download(&mut slave, &mut esc, BLOB_INDEX, 0, &data)
        .unwrap();

    let mut readback = vec![0u8; 60];
    bench.blob.read(0, 0, &mut readback).unwrap();
    assert_eq!(data, readback);

    assert_eq!(
        data,
        master
            .sdo_upload(&mut slave, &mut esc, BLOB_INDEX, 0)
            .unwrap()
    );
}

#[test]
fn test_unknown_object_aborts() {
    let bench = bench();
    let config = SlaveConfig::default();
    let mut esc = SimEsc::new();
    default_sm_setup(&mut esc, &config, 0, 0);
    let mut slave = make_slave(&bench, config);
    let mut master = Master::new(&config);
    master.goto_state(&mut slave, &mut esc, AlState::PreOp);

    assert_eq!(
        Err(AbortCode::NoSuchObject as u32),
        master.sdo_upload(&mut slave, &mut esc, 0x7777, 0)
    );
    // The channel stays usable after an abort
    assert!(master
        .sdo_upload(&mut slave, &mut esc, CONTROL_WORD_INDEX, 0)
        .is_ok());
}

#[test]
fn test_unsupported_protocol_gets_error_reply() {
    let bench = bench();
    let config = SlaveConfig::default();
    let mut esc = SimEsc::new();
    default_sm_setup(&mut esc, &config, 0, 0);
    let mut slave = make_slave(&bench, config);
    let mut master = Master::new(&config);
    master.goto_state(&mut slave, &mut esc, AlState::PreOp);

    let (header, payload) = master
        .mailbox_request(&mut slave, &mut esc, MailboxProtocol::Foe as u8, &[0, 0, 0, 0])
        .expect("expected a mailbox error reply");
    assert_eq!(MailboxProtocol::Error as u8, header.protocol);
    let reply = MailboxErrorReply::parse(&payload).unwrap();
    assert_eq!(mailbox_errors::UNSUPPORTED_PROTOCOL, reply.detail);
}

#[test]
fn test_repeat_request_resends_identical_response() {
    let bench = bench();
    let config = SlaveConfig::default();
    let mut esc = SimEsc::new();
    default_sm_setup(&mut esc, &config, 0, 0);
    let mut slave = make_slave(&bench, config);
    let mut master = Master::new(&config);
    master.goto_state(&mut slave, &mut esc, AlState::PreOp);

    let payload = coe_upload_payload(object_ids::IDENTITY, 1);
    let (first_header, first_payload) = master
        .mailbox_request(&mut slave, &mut esc, MailboxProtocol::Coe as u8, &payload)
        .unwrap();

    esc.master_request_repeat();
    master.step(&mut slave, &mut esc);
    assert!(esc.repeat_acknowledged());
    assert_eq!(1, slave.repeats_served());

    let frame = esc.master_read_mailbox().expect("repeated frame");
    let (header, payload) = drivecat_common::mailbox::MailboxHeader::parse(&frame).unwrap();
    assert_eq!(first_header, header);
    assert_eq!(first_payload, payload.to_vec());
}

#[test]
fn test_repeat_request_with_no_history_is_noop() {
    let bench = bench();
    let config = SlaveConfig::default();
    let mut esc = SimEsc::new();
    default_sm_setup(&mut esc, &config, 0, 0);
    let mut slave = make_slave(&bench, config);
    let mut master = Master::new(&config);
    master.goto_state(&mut slave, &mut esc, AlState::PreOp);

    esc.master_request_repeat();
    master.step(&mut slave, &mut esc);
    assert!(esc.repeat_acknowledged());
    assert_eq!(0, slave.repeats_served());
    assert!(esc.master_read_mailbox().is_none());
}

#[test]
fn test_od_list_introspection_with_fragmentation() {
    let bench = bench();
    let config = SlaveConfig {
        mailbox_size: 32,
        ..Default::default()
    };
    let mut esc = SimEsc::new();
    default_sm_setup(&mut esc, &config, 0, 0);
    let mut slave = make_slave(&bench, config);
    let mut master = Master::new(&config);
    master.goto_state(&mut slave, &mut esc, AlState::PreOp);

    let mut payload = vec![0u8; COE_HEADER_SIZE + SDO_INFO_HEADER_SIZE + 2];
    CoeHeader::new(CoeService::SdoInfo).write(&mut payload);
    SdoInfoHeader {
        opcode: info_op::GET_OD_LIST_REQ,
        incomplete: false,
        fragments_left: 0,
    }
    .write(&mut payload[COE_HEADER_SIZE..]);
    payload[COE_HEADER_SIZE + SDO_INFO_HEADER_SIZE..].copy_from_slice(&[1, 0]);

    let (_, resp) = master
        .mailbox_request(&mut slave, &mut esc, MailboxProtocol::Coe as u8, &payload)
        .unwrap();
    let (coe, body) = CoeHeader::parse(&resp).unwrap();
    assert_eq!(Ok(CoeService::SdoInfo), coe.service_type());
    let (header, data) = SdoInfoHeader::parse(body).unwrap();
    assert_eq!(info_op::GET_OD_LIST_RESP, header.opcode);
    assert!(header.incomplete, "the small mailbox must force fragments");
    // First fragment echoes the list type before the indices
    assert_eq!(1, u16::from_le_bytes([data[0], data[1]]));
    let mut indices: Vec<u16> = data[2..]
        .chunks(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();

    // Further fragments arrive as the master drains the mailbox
    loop {
        let (_, resp) = master.read_response(&mut slave, &mut esc).expect("fragment");
        let (_, body) = CoeHeader::parse(&resp).unwrap();
        let (header, data) = SdoInfoHeader::parse(body).unwrap();
        indices.extend(data.chunks(2).map(|c| u16::from_le_bytes([c[0], c[1]])));
        if !header.incomplete {
            break;
        }
    }

    let expected: Vec<u16> = bench.od.iter().map(|e| e.index).collect();
    assert_eq!(expected, indices);
}

#[test]
fn test_emergency_message_delivery() {
    let bench = bench();
    let config = SlaveConfig::default();
    let mut esc = SimEsc::new();
    default_sm_setup(&mut esc, &config, 0, 0);
    let mut slave = make_slave(&bench, config);
    let mut master = Master::new(&config);
    master.goto_state(&mut slave, &mut esc, AlState::PreOp);

    bench.emcy.raise(0x4210, 0x01, [1, 2, 3, 4]);
    master.step(&mut slave, &mut esc);

    let (header, payload) = master.read_response(&mut slave, &mut esc).unwrap();
    assert_eq!(MailboxProtocol::Coe as u8, header.protocol);
    let (coe, body) = CoeHeader::parse(&payload).unwrap();
    assert_eq!(Ok(CoeService::Emergency), coe.service_type());
    let frame = EmergencyFrame::parse(body).unwrap();
    assert_eq!(0x4210, frame.code);
    assert_eq!([1, 2, 3, 4], frame.data);
    assert!(bench.emcy.is_empty());
}

#[test]
fn test_mailbox_stops_outside_preop() {
    let bench = bench();
    let config = SlaveConfig::default();
    let mut esc = SimEsc::new();
    default_sm_setup(&mut esc, &config, 0, 0);
    let mut slave = make_slave(&bench, config);
    let mut master = Master::new(&config);
    master.goto_state(&mut slave, &mut esc, AlState::PreOp);
    master.goto_state(&mut slave, &mut esc, AlState::Init);

    // The mailbox channels are deactivated; the master cannot store a frame
    assert!(esc.sm_pdi_disabled(drivecat_common::sync_manager::SmChannel::MailboxOut));
    assert!(!esc.master_write_mailbox(&[0u8; 16]));
}
