//! Implements the core Slave object
//!

use defmt_or_log::{debug, info, warn};

use drivecat_common::al::{AlControl, AlState, AlStatus, AlStatusCode};
use drivecat_common::constants::{al_events, mailbox_errors, registers};
use drivecat_common::mailbox::{MailboxErrorReply, MailboxProtocol, MAILBOX_HEADER_SIZE};
use drivecat_common::objects::OdEntry;
use drivecat_common::sync_manager::{SmChannel, SmConfig};
use drivecat_common::traits::EscRegisters;

use crate::config::SlaveConfig;
use crate::emergency::{codes, EmcyQueue};
use crate::mailbox::{Inbound, Mailbox, SubmitOutcome, MAX_MAILBOX_SIZE};
use crate::pdo::compile_mappings;
use crate::sdo_server::SdoServer;
use crate::slave_state::{RtFault, SlaveStateAccess};
use crate::sync_manager::{check_sm_settings, SmCheckError, SmCheckScope, SmMode};

/// Result of an application lifecycle callback
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CallbackResult {
    /// The handler completed; the transition proceeds
    Ok,
    /// The handler started asynchronous work; the transition is published
    /// once the application calls [`Slave::transition_complete`]
    InProgress,
    /// The handler refused; the transition is refused with this status code
    Failed(AlStatusCode),
}

/// Signature of a lifecycle callback
pub type LifecycleFn<'a> = dyn FnMut() -> CallbackResult + 'a;

/// Collection of lifecycle callbacks the Slave object can call
///
/// All are optional. A missing callback behaves as one returning
/// [`CallbackResult::Ok`]. The start callbacks of the upward transitions may
/// return [`CallbackResult::InProgress`] when hardware-dependent setup cannot
/// complete synchronously; the stop callbacks of the downward transitions
/// cannot defer or refuse, since a downgrade must always succeed.
#[allow(missing_debug_implementations)]
#[derive(Default)]
pub struct Callbacks<'a> {
    /// The mailbox handler is starting (INIT to PREOP)
    pub start_mailbox: Option<&'a mut LifecycleFn<'a>>,
    /// The mailbox handler is stopping (PREOP to INIT)
    pub stop_mailbox: Option<&'a mut LifecycleFn<'a>>,
    /// Input process data updates are starting (PREOP to SAFEOP); the PDO
    /// mapping has been compiled when this runs
    pub start_inputs: Option<&'a mut LifecycleFn<'a>>,
    /// Input process data updates are stopping (SAFEOP to PREOP)
    pub stop_inputs: Option<&'a mut LifecycleFn<'a>>,
    /// Output process data updates are starting (SAFEOP to OP)
    pub start_outputs: Option<&'a mut LifecycleFn<'a>>,
    /// Output process data updates are stopping (OP to SAFEOP)
    pub stop_outputs: Option<&'a mut LifecycleFn<'a>>,
}

impl Callbacks<'_> {
    /// Create an empty Callbacks struct
    pub const fn new() -> Self {
        Self {
            start_mailbox: None,
            stop_mailbox: None,
            start_inputs: None,
            stop_inputs: None,
            start_outputs: None,
            stop_outputs: None,
        }
    }
}

/// A deferred transition waiting for [`Slave::transition_complete`]
#[derive(Copy, Clone, Debug)]
struct Pending {
    /// The state whose entry is in progress
    next: AlState,
    /// The state the master ultimately requested
    target: AlState,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum StepOutcome {
    Done,
    Pending,
    Refused,
}

fn rank(state: AlState) -> u8 {
    match state {
        AlState::Init | AlState::Boot => 0,
        AlState::PreOp => 1,
        AlState::SafeOp => 2,
        AlState::Op => 3,
    }
}

/// The next single step from `current` towards `target`
fn step_between(current: AlState, target: AlState) -> AlState {
    use AlState::*;
    if rank(target) > rank(current) {
        match current {
            Init | Boot => PreOp,
            PreOp => SafeOp,
            _ => Op,
        }
    } else {
        match current {
            Op => SafeOp,
            SafeOp => PreOp,
            _ => Init,
        }
    }
}

/// The main object representing the slave protocol stack
///
/// # Operation
///
/// The slave is run by polling [`Slave::process`] from the management loop.
/// Each call polls the ESC event state through the register facade, runs any
/// requested AL state transition, services the mailbox and the SDO server,
/// drains queued emergency messages, and ticks the process data watchdog.
/// There is no hard minimum call frequency, but mailbox responses are delayed
/// until the next call. The cyclic exchange itself does not run here; it is
/// driven by [`CyclicTask::exchange`](crate::CyclicTask::exchange) from the
/// application's real-time loop and only communicates with this object
/// through the shared [`SlaveStateAccess`] state.
#[allow(missing_debug_implementations)]
pub struct Slave<'a> {
    config: SlaveConfig,
    callbacks: Callbacks<'a>,
    state: &'a dyn SlaveStateAccess,
    emcy: &'a EmcyQueue,
    od: &'static [OdEntry<'static>],
    mailbox: Mailbox,
    sdo: SdoServer,
    pending: Option<Pending>,
    sm_mode: SmMode,
    repeat_bit: bool,
    wd_threshold_ms: u32,
    wd_counter_ms: u32,
    wd_remainder_us: u32,
    last_process_time_us: u64,
    started: bool,
}

impl<'a> Slave<'a> {
    /// Create a new [`Slave`]
    ///
    /// # Arguments
    ///
    /// * `config` - The resources the firmware provisions for the stack
    /// * `callbacks` - Application lifecycle hooks
    /// * `state` - The shared state object, also handed to the cyclic task
    /// * `emcy` - The emergency queue, shared with the application
    /// * `od` - The object dictionary table
    pub fn new(
        config: SlaveConfig,
        callbacks: Callbacks<'a>,
        state: &'a dyn SlaveStateAccess,
        emcy: &'a EmcyQueue,
        od: &'static [OdEntry<'static>],
    ) -> Self {
        Self {
            config,
            callbacks,
            state,
            emcy,
            od,
            mailbox: Mailbox::new(),
            sdo: SdoServer::new(),
            pending: None,
            sm_mode: SmMode::default(),
            repeat_bit: false,
            wd_threshold_ms: 0,
            wd_counter_ms: 0,
            wd_remainder_us: 0,
            last_process_time_us: 0,
            started: false,
        }
    }

    /// The current AL state
    pub fn al_state(&self) -> AlState {
        self.state.al_status().state
    }

    /// True while a deferred transition awaits
    /// [`transition_complete`](Self::transition_complete)
    pub fn transition_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Number of mailbox repeat requests served
    pub fn repeats_served(&self) -> u32 {
        self.mailbox.repeats_served()
    }

    /// Run periodic processing
    ///
    /// This should be called periodically from the management loop so the
    /// slave can react to AL control writes, serve the mailbox, and supervise
    /// the watchdog.
    ///
    /// # Arguments
    /// - `esc`: The register access facade
    /// - `now_us`: A monotonic time in microseconds, used for the watchdog
    ///   and the SDO protocol timeout
    pub fn process(&mut self, esc: &mut dyn EscRegisters, now_us: u64) {
        if !self.started {
            self.started = true;
            self.last_process_time_us = now_us;
            esc.set_event_mask(
                al_events::AL_CONTROL | al_events::SM0 | al_events::SM1 | al_events::WATCHDOG,
            );
            self.publish(esc, AlState::Init, false, AlStatusCode::NoError);
            info!("Slave stack started in INIT");
        }
        let elapsed = now_us.saturating_sub(self.last_process_time_us) as u32;
        self.last_process_time_us = now_us;

        // Faults latched by the cyclic path downgrade the state machine here,
        // never inside the cycle itself
        if let Some(fault) = self.state.take_rt_fault() {
            self.handle_rt_fault(esc, fault);
        }

        self.tick_watchdog(esc, elapsed);

        let events = esc.read_u32(registers::AL_EVENT_REQUEST);
        if events & al_events::AL_CONTROL != 0 {
            // Reading the register acknowledges the event
            let value = esc.read_u16(registers::AL_CONTROL);
            self.handle_al_control(esc, AlControl::from_register(value as u8));
        }

        if self.mailbox.running() {
            self.service_repeat(esc);
            self.service_read_mailbox(esc);
            self.service_write_mailbox(esc);

            let mut out = [0u8; MAX_MAILBOX_SIZE];
            if let Some(len) = self.sdo.poll(elapsed, &mut out) {
                // Transient mailbox exhaustion drops the timeout abort; the
                // master observes the timeout on its own
                self.mailbox
                    .submit(esc, MailboxProtocol::Coe as u8, &out[..len]);
            }
            self.service_emergencies(esc);
        }
    }

    /// Finish a transition whose lifecycle callback returned
    /// [`CallbackResult::InProgress`]
    ///
    /// On `Ok` the deferred state is published and the transition continues
    /// towards its original target. On `Err` the transition is refused with
    /// the given status code and the slave remains in its previous state.
    pub fn transition_complete(
        &mut self,
        esc: &mut dyn EscRegisters,
        result: Result<(), AlStatusCode>,
    ) {
        let Some(pending) = self.pending.take() else {
            warn!("transition_complete called with no transition pending");
            return;
        };
        match result {
            Ok(()) => {
                match pending.next {
                    AlState::SafeOp => {
                        self.state.set_inputs_active(true);
                        self.wd_counter_ms = 0;
                    }
                    AlState::Op => self.state.set_outputs_active(true),
                    _ => {}
                }
                self.publish(esc, pending.next, false, AlStatusCode::NoError);
                if pending.next != pending.target {
                    self.transition_towards(esc, pending.target);
                }
            }
            Err(code) => {
                warn!("Deferred transition refused by application: {:?}", code);
                match pending.next {
                    AlState::PreOp => {
                        self.sdo.reset();
                        self.mailbox.stop();
                    }
                    AlState::Op => esc.disable_sm(SmChannel::ProcessDataOut),
                    _ => {}
                }
                // The status publish was deferred, so the shared state still
                // names the state we were leaving
                let prev = self.state.al_status().state;
                self.publish(esc, prev, true, code);
            }
        }
    }

    fn handle_al_control(&mut self, esc: &mut dyn EscRegisters, ctl: AlControl) {
        if self.pending.is_some() {
            warn!("AL control write ignored while a transition is pending");
            return;
        }
        let status = self.state.al_status();
        let requested = match ctl.state {
            Ok(state) => state,
            Err(raw) => {
                warn!("Unknown requested AL state {:#x}", raw);
                self.publish(esc, status.state, true, AlStatusCode::UnknownRequestedState);
                return;
            }
        };

        if requested == status.state {
            // A no-op request runs no callbacks and changes nothing, except
            // that the acknowledge bit clears a sticky error indication
            if status.error && ctl.acknowledge {
                self.publish(esc, status.state, false, AlStatusCode::NoError);
            }
            return;
        }

        debug!("AL state change requested: {} -> {}", status.state, requested);
        match (status.state, requested) {
            (_, AlState::Boot) => {
                self.publish(esc, status.state, true, AlStatusCode::BootstrapNotSupported);
            }
            (AlState::Init, AlState::SafeOp | AlState::Op) | (AlState::PreOp, AlState::Op) => {
                self.publish(
                    esc,
                    status.state,
                    true,
                    AlStatusCode::InvalidRequestedStateChange,
                );
            }
            _ => {
                self.transition_towards(esc, requested);
            }
        }
    }

    fn transition_towards(&mut self, esc: &mut dyn EscRegisters, target: AlState) {
        let mut current = self.state.al_status().state;
        while current != target {
            let next = step_between(current, target);
            if rank(next) > rank(current) {
                match self.enter_step(esc, current, next, target) {
                    StepOutcome::Done => current = next,
                    StepOutcome::Pending => {
                        self.pending = Some(Pending { next, target });
                        return;
                    }
                    StepOutcome::Refused => return,
                }
            } else {
                self.leave_step(esc, current, next);
                current = next;
            }
        }
    }

    fn enter_step(
        &mut self,
        esc: &mut dyn EscRegisters,
        current: AlState,
        next: AlState,
        target: AlState,
    ) -> StepOutcome {
        match next {
            AlState::PreOp => self.enter_preop(esc),
            AlState::SafeOp => self.enter_safeop(esc),
            AlState::Op => self.enter_op(esc),
            _ => {
                warn!("Refusing unexpected step {} -> {} (target {})", current, next, target);
                StepOutcome::Refused
            }
        }
    }

    fn leave_step(&mut self, esc: &mut dyn EscRegisters, current: AlState, next: AlState) {
        match current {
            AlState::Op => self.leave_op(esc),
            AlState::SafeOp => self.leave_safeop(esc),
            _ => self.leave_preop(esc),
        }
        self.publish(esc, next, false, AlStatusCode::NoError);
    }

    fn enter_preop(&mut self, esc: &mut dyn EscRegisters) -> StepOutcome {
        let channels = read_channels(esc);
        if let Err(e) =
            check_sm_settings(&channels, SmCheckScope::Mailbox, &self.config, (0, 0))
        {
            warn!("Refusing PREOP: {:?}", e);
            self.raise_sm_emergency(&e);
            self.publish(esc, AlState::Init, true, e.status_code());
            return StepOutcome::Refused;
        }

        self.mailbox.start(
            &channels[SmChannel::MailboxOut as usize],
            &channels[SmChannel::MailboxIn as usize],
        );
        self.sdo.set_frame_capacity(self.mailbox.payload_capacity());
        self.repeat_bit = channels[SmChannel::MailboxIn as usize].repeat_request();
        esc.enable_sm(SmChannel::MailboxOut);
        esc.enable_sm(SmChannel::MailboxIn);

        let result = match &mut self.callbacks.start_mailbox {
            Some(cb) => (cb)(),
            None => CallbackResult::Ok,
        };
        match result {
            CallbackResult::Ok => {
                self.publish(esc, AlState::PreOp, false, AlStatusCode::NoError);
                StepOutcome::Done
            }
            CallbackResult::InProgress => StepOutcome::Pending,
            CallbackResult::Failed(code) => {
                self.sdo.reset();
                self.mailbox.stop();
                self.publish(esc, AlState::Init, true, code);
                StepOutcome::Refused
            }
        }
    }

    fn enter_safeop(&mut self, esc: &mut dyn EscRegisters) -> StepOutcome {
        // The mapping compiles first: the process data channel lengths are
        // validated against the sizes it produces
        let descriptor = match compile_mappings(self.state, self.od, &self.config) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!("Refusing SAFEOP, mapping rejected: {:?}", e);
                self.emcy.raise(
                    codes::PDO_MAPPING,
                    0x01,
                    u32::from(e.code).to_le_bytes(),
                );
                self.publish(esc, AlState::PreOp, true, e.status_code());
                return StepOutcome::Refused;
            }
        };

        let channels = read_channels(esc);
        let mode = match check_sm_settings(
            &channels,
            SmCheckScope::All,
            &self.config,
            (descriptor.rx_bytes, descriptor.tx_bytes),
        ) {
            Ok(mode) => mode,
            Err(e) => {
                warn!("Refusing SAFEOP: {:?}", e);
                self.raise_sm_emergency(&e);
                self.fall_back(esc, &e);
                return StepOutcome::Refused;
            }
        };
        self.sm_mode = mode;
        debug!(
            "SM mode: single_buffer={} watchdog_trigger={}",
            mode.single_buffer, mode.watchdog_required
        );
        self.load_watchdog(esc);
        // The output channel asks for watchdog triggering, but the watchdog
        // registers disable it
        if self.sm_mode.watchdog_required && self.wd_threshold_ms == 0 {
            warn!("Refusing SAFEOP: watchdog trigger required but watchdog disabled");
            self.publish(
                esc,
                AlState::PreOp,
                true,
                AlStatusCode::InvalidWatchdogConfiguration,
            );
            return StepOutcome::Refused;
        }
        esc.enable_sm(SmChannel::ProcessDataOut);
        esc.enable_sm(SmChannel::ProcessDataIn);

        let result = match &mut self.callbacks.start_inputs {
            Some(cb) => (cb)(),
            None => CallbackResult::Ok,
        };
        match result {
            CallbackResult::Ok => {
                self.state.set_inputs_active(true);
                self.wd_counter_ms = 0;
                self.publish(esc, AlState::SafeOp, false, AlStatusCode::NoError);
                StepOutcome::Done
            }
            CallbackResult::InProgress => StepOutcome::Pending,
            CallbackResult::Failed(code) => {
                self.publish(esc, AlState::PreOp, true, code);
                StepOutcome::Refused
            }
        }
    }

    fn enter_op(&mut self, esc: &mut dyn EscRegisters) -> StepOutcome {
        let descriptor = self.state.pdo_image().descriptor();
        if !descriptor.valid {
            esc.disable_sm(SmChannel::ProcessDataOut);
            self.publish(esc, AlState::SafeOp, true, AlStatusCode::InvalidOutputMapping);
            return StepOutcome::Refused;
        }
        let channels = read_channels(esc);
        if let Err(e) = check_sm_settings(
            &channels,
            SmCheckScope::All,
            &self.config,
            (descriptor.rx_bytes, descriptor.tx_bytes),
        ) {
            warn!("Refusing OP: {:?}", e);
            // Refusing entry to OP must leave the output channel disabled so
            // no stale data is exchanged
            esc.disable_sm(SmChannel::ProcessDataOut);
            self.raise_sm_emergency(&e);
            self.fall_back(esc, &e);
            return StepOutcome::Refused;
        }

        let result = match &mut self.callbacks.start_outputs {
            Some(cb) => (cb)(),
            None => CallbackResult::Ok,
        };
        match result {
            CallbackResult::Ok => {
                esc.enable_sm(SmChannel::ProcessDataOut);
                self.state.set_outputs_active(true);
                self.wd_counter_ms = 0;
                self.publish(esc, AlState::Op, false, AlStatusCode::NoError);
                info!("Entered OP");
                StepOutcome::Done
            }
            CallbackResult::InProgress => StepOutcome::Pending,
            CallbackResult::Failed(code) => {
                esc.disable_sm(SmChannel::ProcessDataOut);
                self.publish(esc, AlState::SafeOp, true, code);
                StepOutcome::Refused
            }
        }
    }

    fn leave_op(&mut self, esc: &mut dyn EscRegisters) {
        // Outputs stop being applied before the lower state becomes visible
        self.state.set_outputs_active(false);
        esc.disable_sm(SmChannel::ProcessDataOut);
        let result = match &mut self.callbacks.stop_outputs {
            Some(cb) => (cb)(),
            None => CallbackResult::Ok,
        };
        if result != CallbackResult::Ok {
            warn!("stop_outputs cannot defer or refuse; continuing");
        }
    }

    fn leave_safeop(&mut self, esc: &mut dyn EscRegisters) {
        self.state.set_inputs_active(false);
        self.state.set_outputs_active(false);
        esc.disable_sm(SmChannel::ProcessDataOut);
        esc.disable_sm(SmChannel::ProcessDataIn);
        let result = match &mut self.callbacks.stop_inputs {
            Some(cb) => (cb)(),
            None => CallbackResult::Ok,
        };
        if result != CallbackResult::Ok {
            warn!("stop_inputs cannot defer or refuse; continuing");
        }
        self.state.pdo_image().invalidate();
        self.wd_threshold_ms = 0;
    }

    fn leave_preop(&mut self, esc: &mut dyn EscRegisters) {
        let result = match &mut self.callbacks.stop_mailbox {
            Some(cb) => (cb)(),
            None => CallbackResult::Ok,
        };
        if result != CallbackResult::Ok {
            warn!("stop_mailbox cannot defer or refuse; continuing");
        }
        // An open SDO transaction receives its abort phase before the
        // mailbox goes away
        self.sdo.reset();
        self.mailbox.stop();
        esc.disable_sm(SmChannel::MailboxOut);
        esc.disable_sm(SmChannel::MailboxIn);
    }

    /// Fall back after a refused sync manager check: INIT when a mailbox
    /// channel is unusable, PREOP otherwise
    fn fall_back(&mut self, esc: &mut dyn EscRegisters, e: &SmCheckError) {
        let fallback = e.fallback_state();
        let mut current = self.state.al_status().state;
        while rank(current) > rank(fallback) {
            let next = step_between(current, fallback);
            self.leave_step(esc, current, next);
            current = next;
        }
        self.publish(esc, fallback, true, e.status_code());
    }

    fn raise_sm_emergency(&mut self, e: &SmCheckError) {
        let channel = match e {
            SmCheckError::Mailbox(ch) | SmCheckError::Settings(ch) => *ch as u8,
        };
        self.emcy
            .raise(codes::SM_CONFIGURATION, 0x01, [channel, 0, 0, 0]);
    }

    fn handle_rt_fault(&mut self, esc: &mut dyn EscRegisters, fault: RtFault) {
        warn!("Cyclic path fault: {:?}", fault);
        let (code, index, sub) = match fault {
            RtFault::Conversion { index, sub } => (codes::UNIT_CONVERSION, index, sub),
            RtFault::ObjectAccess { index, sub } => (codes::PDO_MAPPING, index, sub),
        };
        let idx = index.to_le_bytes();
        self.emcy.raise(code, 0x01, [idx[0], idx[1], sub, 0]);
        if self.state.al_status().state == AlState::Op {
            self.transition_towards(esc, AlState::SafeOp);
            self.publish(esc, AlState::SafeOp, true, AlStatusCode::UnspecifiedError);
        }
    }

    fn tick_watchdog(&mut self, esc: &mut dyn EscRegisters, elapsed_us: u32) {
        let state = self.state.al_status().state;
        if self.wd_threshold_ms == 0 || !matches!(state, AlState::SafeOp | AlState::Op) {
            self.wd_counter_ms = 0;
            self.wd_remainder_us = 0;
            return;
        }
        if self.state.take_watchdog_feed() {
            self.wd_counter_ms = 0;
        }
        self.wd_remainder_us += elapsed_us;
        self.wd_counter_ms += self.wd_remainder_us / 1000;
        self.wd_remainder_us %= 1000;

        if self.wd_counter_ms >= self.wd_threshold_ms {
            self.wd_counter_ms = 0;
            match state {
                AlState::Op => {
                    warn!("Process data watchdog expired in OP");
                    self.emcy.raise(codes::SM_WATCHDOG, 0x01, [0; 4]);
                    self.transition_towards(esc, AlState::SafeOp);
                    self.publish(esc, AlState::SafeOp, true, AlStatusCode::SyncManagerWatchdog);
                }
                _ => {
                    // In SAFEOP an expiry only halts output updates
                    self.state.set_outputs_active(false);
                }
            }
        }
    }

    fn load_watchdog(&mut self, esc: &mut dyn EscRegisters) {
        let divider = esc.read_u16(registers::WATCHDOG_DIVIDER);
        let value = esc.read_u16(registers::WATCHDOG_PROCESS_DATA);
        self.wd_threshold_ms = if value == 0 {
            0
        } else {
            // One watchdog increment lasts (divider + 2) ticks of 40 ns
            let ns = (divider as u64 + 2) * 40 * value as u64;
            ((ns / 1_000_000) as u32).max(1)
        };
        debug!("Watchdog threshold: {} ms", self.wd_threshold_ms);
    }

    fn service_repeat(&mut self, esc: &mut dyn EscRegisters) {
        let sm = esc.sm_config(SmChannel::MailboxIn);
        let bit = sm.repeat_request();
        if bit != self.repeat_bit {
            self.repeat_bit = bit;
            debug!("Mailbox repeat requested");
            self.mailbox.on_repeat_request(esc);
            // Acknowledge by mirroring the toggle into the PDI control byte
            let ack = if bit { 0x02 } else { 0x00 };
            esc.write(SmChannel::MailboxIn.register_address() + 7, &[ack]);
        }
    }

    fn service_read_mailbox(&mut self, esc: &mut dyn EscRegisters) {
        if !self.mailbox.in_flight() {
            return;
        }
        let sm = esc.sm_config(SmChannel::MailboxIn);
        if sm.mailbox_full() {
            return;
        }
        // The master fetched the frame; a continuation may use the free slot
        if self.mailbox.on_master_read(esc) {
            let mut out = [0u8; MAX_MAILBOX_SIZE];
            if let Some(len) = self.sdo.continuation(self.od, &mut out) {
                self.mailbox
                    .submit(esc, MailboxProtocol::Coe as u8, &out[..len]);
            }
        }
    }

    fn service_write_mailbox(&mut self, esc: &mut dyn EscRegisters) {
        // Half duplex: a new service is dispatched only once the previous
        // response has been fetched
        if self.mailbox.in_flight() {
            return;
        }
        let sm = esc.sm_config(SmChannel::MailboxOut);
        if !sm.mailbox_full() {
            return;
        }
        let mut frame = [0u8; MAX_MAILBOX_SIZE];
        match self.mailbox.fetch(esc, &mut frame) {
            Inbound::Frame {
                header,
                payload_len,
            } => {
                let payload = &frame[MAILBOX_HEADER_SIZE..MAILBOX_HEADER_SIZE + payload_len];
                self.dispatch(esc, header.protocol, payload);
            }
            Inbound::Duplicate => {}
            Inbound::Malformed { detail } => self.send_mailbox_error(esc, detail),
        }
    }

    /// Route a mailbox frame to its protocol handler
    ///
    /// The match is the capability table of this slave: CoE is the one
    /// protocol it carries, every other nibble earns a mailbox error reply
    /// rather than a silent drop.
    fn dispatch(&mut self, esc: &mut dyn EscRegisters, protocol: u8, payload: &[u8]) {
        match MailboxProtocol::try_from(protocol) {
            Ok(MailboxProtocol::Coe) => {
                let mut out = [0u8; MAX_MAILBOX_SIZE];
                match self.sdo.handle_coe(payload, self.od, &mut out) {
                    Ok(Some(len)) => {
                        self.mailbox
                            .submit(esc, MailboxProtocol::Coe as u8, &out[..len]);
                    }
                    Ok(None) => {}
                    Err(detail) => self.send_mailbox_error(esc, detail),
                }
            }
            Ok(other) => {
                warn!("Unsupported mailbox protocol {:?}", other);
                self.send_mailbox_error(esc, mailbox_errors::UNSUPPORTED_PROTOCOL);
            }
            Err(raw) => {
                warn!("Unknown mailbox protocol nibble {}", raw);
                self.send_mailbox_error(esc, mailbox_errors::UNSUPPORTED_PROTOCOL);
            }
        }
    }

    fn send_mailbox_error(&mut self, esc: &mut dyn EscRegisters, detail: u16) {
        let reply = MailboxErrorReply { detail };
        self.mailbox
            .submit(esc, MailboxProtocol::Error as u8, &reply.to_bytes());
    }

    fn service_emergencies(&mut self, esc: &mut dyn EscRegisters) {
        if !self.mailbox.idle() {
            return;
        }
        if let Some(frame) = self.emcy.pop() {
            let mut out = [0u8; MAX_MAILBOX_SIZE];
            let len = frame.write(&mut out);
            if self.mailbox.submit(esc, MailboxProtocol::Coe as u8, &out[..len])
                == SubmitOutcome::Busy
            {
                // Not an error: the message keeps its place and goes out on a
                // later mailbox cycle
                self.emcy.requeue_front(frame);
            }
        }
    }

    fn publish(
        &mut self,
        esc: &mut dyn EscRegisters,
        state: AlState,
        error: bool,
        code: AlStatusCode,
    ) {
        let status = AlStatus { state, error };
        self.state.publish(status, code);
        esc.set_al_status(status, code);
    }
}

fn read_channels(esc: &mut dyn EscRegisters) -> [SmConfig; 4] {
    SmChannel::ALL.map(|channel| esc.sm_config(channel))
}
