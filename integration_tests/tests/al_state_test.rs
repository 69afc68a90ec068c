//! End-to-end tests of the AL state machine against the simulated ESC

use std::cell::Cell;

use drivecat_common::coe::{CoeHeader, CoeService, EmergencyFrame};
use drivecat_common::sync_manager::{SmChannel, SmConfig};
use drivecat_slave::emergency::codes;
use drivecat_slave::SlaveStateAccess;

use integration_tests::prelude::*;

fn make_slave(bench: &TestBench, config: SlaveConfig) -> Slave<'static> {
    Slave::new(config, Callbacks::new(), bench.state, bench.emcy, bench.od)
}

#[test]
fn test_walk_up_and_down_the_ladder() {
    let bench = bench();
    let config = SlaveConfig::default();
    let mut esc = SimEsc::new();
    default_sm_setup(&mut esc, &config, 0, 0);
    let mut slave = make_slave(&bench, config);
    let mut master = Master::new(&config);

    master.step(&mut slave, &mut esc);
    assert_eq!(AlState::Init, slave.al_state());
    assert_eq!(0x01, esc.al_status());

    master.goto_state(&mut slave, &mut esc, AlState::Op);
    assert_eq!(0x08, esc.al_status());
    assert_eq!(0, esc.al_status_code());
    assert!(bench.state.inputs_active());
    assert!(bench.state.outputs_active());

    // A direct request back to INIT walks down through every state
    master.request_al_state(&mut slave, &mut esc, AlState::Init);
    assert_eq!(AlState::Init, slave.al_state());
    assert_eq!(0x01, esc.al_status());
    assert!(!bench.state.inputs_active());
    assert!(!bench.state.outputs_active());
    assert!(esc.sm_pdi_disabled(SmChannel::ProcessDataOut));
}

#[test]
fn test_transition_matrix() {
    use AlState::*;
    let states = [Init, PreOp, SafeOp, Op];
    let rank = |s: AlState| states.iter().position(|x| *x == s).unwrap();

    for old in states {
        for requested in states {
            let bench = bench();
            let config = SlaveConfig::default();
            let mut esc = SimEsc::new();
            default_sm_setup(&mut esc, &config, 0, 0);
            let mut slave = make_slave(&bench, config);
            let mut master = Master::new(&config);
            master.step(&mut slave, &mut esc);
            master.goto_state(&mut slave, &mut esc, old);

            master.request_al_state(&mut slave, &mut esc, requested);

            let reachable = rank(requested) <= rank(old) || rank(requested) == rank(old) + 1;
            if reachable {
                assert_eq!(
                    requested,
                    slave.al_state(),
                    "{old} -> {requested} should succeed"
                );
                assert_eq!(0, esc.al_status() & 0x10);
            } else {
                assert_eq!(old, slave.al_state(), "{old} -> {requested} should be refused");
                assert_ne!(0, esc.al_status() & 0x10);
                assert_eq!(
                    AlStatusCode::InvalidRequestedStateChange as u16,
                    esc.al_status_code()
                );
            }
        }
    }
}

#[test]
fn test_preop_refused_on_bad_mailbox_config() {
    let bench = bench();
    let config = SlaveConfig::default();
    let mut esc = SimEsc::new();
    default_sm_setup(&mut esc, &config, 0, 0);
    // Master "forgets" to enable the write mailbox channel
    esc.configure_sm(
        SmChannel::MailboxOut,
        SmConfig {
            start_address: config.mailbox_out_address,
            length: config.mailbox_size,
            control: 0x06,
            status: 0,
            activate: 0x00,
        },
    );
    let mut slave = make_slave(&bench, config);
    let mut master = Master::new(&config);

    master.request_al_state(&mut slave, &mut esc, AlState::PreOp);
    assert_eq!(AlState::Init, slave.al_state());
    assert_ne!(0, esc.al_status() & 0x10);
    assert_eq!(
        AlStatusCode::InvalidMailboxConfiguration as u16,
        esc.al_status_code()
    );
    // The refusal queued an emergency; it stays queued until the mailbox runs
    assert_eq!(1, bench.emcy.len());

    // Once the master fixes the settings the same request succeeds
    default_sm_setup(&mut esc, &config, 0, 0);
    master.request_al_state(&mut slave, &mut esc, AlState::PreOp);
    assert_eq!(AlState::PreOp, slave.al_state());
    assert_eq!(0, esc.al_status() & 0x10);
}

#[test]
fn test_safeop_refused_on_pd_length_mismatch() {
    let bench = bench();
    let config = SlaveConfig::default();
    let mut esc = SimEsc::new();
    default_sm_setup(&mut esc, &config, 0, 0);
    let mut slave = make_slave(&bench, config);
    let mut master = Master::new(&config);
    master.goto_state(&mut slave, &mut esc, AlState::PreOp);

    // Map the 2-byte control word as the only output
    let map = ((CONTROL_WORD_INDEX as u32) << 16) | 16;
    master
        .sdo_download(&mut slave, &mut esc, 0x1600, 1, &map.to_le_bytes())
        .unwrap();
    master
        .sdo_download(&mut slave, &mut esc, 0x1600, 0, &[1])
        .unwrap();
    master
        .sdo_download(&mut slave, &mut esc, 0x1C12, 1, &0x1600u16.to_le_bytes())
        .unwrap();
    master
        .sdo_download(&mut slave, &mut esc, 0x1C12, 0, &[1])
        .unwrap();

    // Channel claims 5 bytes but the compiled image is 2
    default_sm_setup(&mut esc, &config, 5, 0);
    master.request_al_state(&mut slave, &mut esc, AlState::SafeOp);
    assert_eq!(AlState::PreOp, slave.al_state());
    assert_eq!(
        AlStatusCode::InvalidOutputConfiguration as u16,
        esc.al_status_code()
    );

    default_sm_setup(&mut esc, &config, 2, 0);
    master.request_al_state(&mut slave, &mut esc, AlState::SafeOp);
    assert_eq!(AlState::SafeOp, slave.al_state());
    assert_eq!(2, bench.state.pdo_image().descriptor().rx_bytes);
}

#[test]
fn test_watchdog_trigger_without_watchdog_refused() {
    let bench = bench();
    let config = SlaveConfig::default();
    let mut esc = SimEsc::new();
    default_sm_setup(&mut esc, &config, 0, 0);
    let mut slave = make_slave(&bench, config);
    let mut master = Master::new(&config);
    master.goto_state(&mut slave, &mut esc, AlState::PreOp);

    let map = ((CONTROL_WORD_INDEX as u32) << 16) | 16;
    master
        .sdo_download(&mut slave, &mut esc, 0x1600, 1, &map.to_le_bytes())
        .unwrap();
    master
        .sdo_download(&mut slave, &mut esc, 0x1600, 0, &[1])
        .unwrap();
    master
        .sdo_download(&mut slave, &mut esc, 0x1C12, 1, &0x1600u16.to_le_bytes())
        .unwrap();
    master
        .sdo_download(&mut slave, &mut esc, 0x1C12, 0, &[1])
        .unwrap();

    // Output channel requests watchdog triggering, but the watchdog value
    // register is zero
    esc.configure_sm(
        SmChannel::ProcessDataOut,
        SmConfig {
            start_address: config.pd_out_address,
            length: 2,
            control: 0x44,
            status: 0,
            activate: 0x01,
        },
    );
    master.request_al_state(&mut slave, &mut esc, AlState::SafeOp);
    assert_eq!(AlState::PreOp, slave.al_state());
    assert_eq!(
        AlStatusCode::InvalidWatchdogConfiguration as u16,
        esc.al_status_code()
    );

    esc.set_watchdog(2498, 100);
    master.request_al_state(&mut slave, &mut esc, AlState::SafeOp);
    assert_eq!(AlState::SafeOp, slave.al_state());
}

#[test]
fn test_enabled_zero_length_input_channel_refused() {
    // Regardless of the address it claims
    for address in [0x1200u16, 0x0000, 0xF000] {
        let bench = bench();
        let config = SlaveConfig::default();
        let mut esc = SimEsc::new();
        default_sm_setup(&mut esc, &config, 0, 0);
        esc.configure_sm(
            SmChannel::ProcessDataIn,
            SmConfig {
                start_address: address,
                length: 0,
                control: 0x00,
                status: 0,
                activate: 0x01,
            },
        );
        let mut slave = make_slave(&bench, config);
        let mut master = Master::new(&config);
        master.goto_state(&mut slave, &mut esc, AlState::PreOp);

        master.request_al_state(&mut slave, &mut esc, AlState::SafeOp);
        assert_eq!(AlState::PreOp, slave.al_state());
        assert_eq!(
            AlStatusCode::InvalidInputConfiguration as u16,
            esc.al_status_code()
        );
    }
}

#[test]
fn test_noop_request_runs_no_callbacks() {
    let bench = bench();
    let config = SlaveConfig::default();
    let mut esc = SimEsc::new();
    default_sm_setup(&mut esc, &config, 0, 0);

    let start_calls = Cell::new(0u32);
    let mut start_mailbox = || {
        start_calls.set(start_calls.get() + 1);
        CallbackResult::Ok
    };
    let callbacks = Callbacks {
        start_mailbox: Some(&mut start_mailbox),
        ..Callbacks::new()
    };
    let mut slave = Slave::new(config, callbacks, bench.state, bench.emcy, bench.od);
    let mut master = Master::new(&config);

    master.goto_state(&mut slave, &mut esc, AlState::PreOp);
    assert_eq!(1, start_calls.get());
    let status_before = esc.al_status();

    // Requesting the state we are already in is a no-op
    master.request_al_state(&mut slave, &mut esc, AlState::PreOp);
    assert_eq!(1, start_calls.get());
    assert_eq!(status_before, esc.al_status());
    assert_eq!(AlState::PreOp, slave.al_state());
}

#[test]
fn test_acknowledge_clears_sticky_error() {
    let bench = bench();
    let config = SlaveConfig::default();
    let mut esc = SimEsc::new();
    default_sm_setup(&mut esc, &config, 0, 0);
    let mut slave = make_slave(&bench, config);
    let mut master = Master::new(&config);
    master.step(&mut slave, &mut esc);

    // Invalid jump sets the error indication
    master.request_al_state(&mut slave, &mut esc, AlState::Op);
    assert_ne!(0, esc.al_status() & 0x10);

    // Re-requesting the current state with the acknowledge bit clears it
    master.acknowledge(&mut slave, &mut esc, AlState::Init);
    assert_eq!(0x01, esc.al_status());
    assert_eq!(0, esc.al_status_code());
}

#[test]
fn test_deferred_transition_completion() {
    let bench = bench();
    let config = SlaveConfig::default();
    let mut esc = SimEsc::new();
    default_sm_setup(&mut esc, &config, 0, 0);

    let mut start_inputs = || CallbackResult::InProgress;
    let callbacks = Callbacks {
        start_inputs: Some(&mut start_inputs),
        ..Callbacks::new()
    };
    let mut slave = Slave::new(config, callbacks, bench.state, bench.emcy, bench.od);
    let mut master = Master::new(&config);
    master.goto_state(&mut slave, &mut esc, AlState::PreOp);

    master.request_al_state(&mut slave, &mut esc, AlState::SafeOp);
    // The status publish is deferred until the application finishes
    assert_eq!(AlState::PreOp, slave.al_state());
    assert!(slave.transition_pending());
    assert!(!bench.state.inputs_active());

    slave.transition_complete(&mut esc, Ok(()));
    assert_eq!(AlState::SafeOp, slave.al_state());
    assert_eq!(0x04, esc.al_status());
    assert!(bench.state.inputs_active());
    assert!(!slave.transition_pending());
}

#[test]
fn test_deferred_transition_failure_stays_put() {
    let bench = bench();
    let config = SlaveConfig::default();
    let mut esc = SimEsc::new();
    default_sm_setup(&mut esc, &config, 0, 0);

    let mut start_inputs = || CallbackResult::InProgress;
    let callbacks = Callbacks {
        start_inputs: Some(&mut start_inputs),
        ..Callbacks::new()
    };
    let mut slave = Slave::new(config, callbacks, bench.state, bench.emcy, bench.od);
    let mut master = Master::new(&config);
    master.goto_state(&mut slave, &mut esc, AlState::PreOp);

    master.request_al_state(&mut slave, &mut esc, AlState::SafeOp);
    slave.transition_complete(&mut esc, Err(AlStatusCode::UnspecifiedError));
    assert_eq!(AlState::PreOp, slave.al_state());
    assert_ne!(0, esc.al_status() & 0x10);
    assert_eq!(AlStatusCode::UnspecifiedError as u16, esc.al_status_code());
}

#[test]
fn test_callback_refusal_refuses_transition() {
    let bench = bench();
    let config = SlaveConfig::default();
    let mut esc = SimEsc::new();
    default_sm_setup(&mut esc, &config, 0, 0);

    let mut start_outputs = || CallbackResult::Failed(AlStatusCode::UnspecifiedError);
    let callbacks = Callbacks {
        start_outputs: Some(&mut start_outputs),
        ..Callbacks::new()
    };
    let mut slave = Slave::new(config, callbacks, bench.state, bench.emcy, bench.od);
    let mut master = Master::new(&config);
    master.goto_state(&mut slave, &mut esc, AlState::SafeOp);

    master.request_al_state(&mut slave, &mut esc, AlState::Op);
    assert_eq!(AlState::SafeOp, slave.al_state());
    assert_eq!(AlStatusCode::UnspecifiedError as u16, esc.al_status_code());
    // Refusing entry to OP leaves the output channel deactivated
    assert!(esc.sm_pdi_disabled(SmChannel::ProcessDataOut));
    assert!(!bench.state.outputs_active());
}

#[test]
fn test_watchdog_expiry_downgrades_op() {
    let bench = bench();
    let config = SlaveConfig::default();
    let mut esc = SimEsc::new();
    default_sm_setup(&mut esc, &config, 0, 0);
    // (2498 + 2) * 40 ns * 100 = 10 ms
    esc.set_watchdog(2498, 100);
    let mut slave = make_slave(&bench, config);
    let mut master = Master::new(&config);
    master.goto_state(&mut slave, &mut esc, AlState::Op);

    // No output data arrives; the watchdog fires after 10 ms
    master.run_for(&mut slave, &mut esc, 15);
    assert_eq!(AlState::SafeOp, slave.al_state());
    assert_ne!(0, esc.al_status() & 0x10);
    assert_eq!(AlStatusCode::SyncManagerWatchdog as u16, esc.al_status_code());
    assert!(!bench.state.outputs_active());
    assert!(esc.sm_pdi_disabled(SmChannel::ProcessDataOut));

    // The fault was also reported through the mailbox as an emergency
    let (_, payload) = master.read_response(&mut slave, &mut esc).unwrap();
    let (coe, body) = CoeHeader::parse(&payload).unwrap();
    assert_eq!(Ok(CoeService::Emergency), coe.service_type());
    let frame = EmergencyFrame::parse(body).unwrap();
    assert_eq!(codes::SM_WATCHDOG, frame.code);
}
