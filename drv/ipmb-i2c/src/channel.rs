// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use ringbuf::{ringbuf_entry, Ringbuf};
use workset::{
    ChannelId, ChannelSelect, Medium, Route, WorkSet, WsFlags, WsHandle,
    WsState,
};

use crate::{
    Control, Event, I2cRegisters, Op, State, Status, TransitionTimer,
    TransportStatus, FILLER,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Trace {
    None,
    Init(u8),
    Status(Status),
    Unknown(u8),
    Start(WsHandle, Op),
    Sla(u8),
    Tx(u8),
    Rx(u8),
    TurnAround,
    Unexpected(Op, State, Status),
    Done(TransportStatus),
    Preempted,
    SlaveNoResources,
    Overflow,
    Received(usize),
    SlaveRead,
    Timeout(Op),
    StaleOwner,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StartError {
    /// The channel is doing something else.
    Busy,
    /// The context is not queued for a master operation.
    NotQueued,
}

pub struct Channel<R> {
    id: ChannelId,
    regs: R,
    state: State,
    op: Op,
    owner: Option<WsHandle>,
    own_address: u8,
    timeout: u64,
    errors: u32,
    tx_count: u32,
    rx_count: u32,
    trace: Ringbuf<Trace, 32>,
}

impl<R: I2cRegisters> Channel<R> {
    pub fn new(id: ChannelId, regs: R, own_address: u8, timeout: u64) -> Self {
        Self {
            id,
            regs,
            state: State::Idle,
            op: Op::IdleSlave,
            owner: None,
            own_address,
            timeout,
            errors: 0,
            tx_count: 0,
            rx_count: 0,
            trace: Ringbuf::new(Trace::None),
        }
    }

    /// Programs our slave address and enables the controller as an
    /// acknowledging slave.
    pub fn init(&mut self) {
        ringbuf_entry!(self.trace, Trace::Init(self.own_address));
        self.regs.clear(Control::STA | Control::STO | Control::SI);
        self.regs.set_own_address(self.own_address, true);
        self.regs.set(Control::I2EN | Control::AA);
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn is_idle(&self) -> bool {
        self.op == Op::IdleSlave && self.owner.is_none()
    }

    pub fn op(&self) -> Op {
        self.op
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn owner(&self) -> Option<WsHandle> {
        self.owner
    }

    pub fn errors(&self) -> u32 {
        self.errors
    }

    pub fn reset_errors(&mut self) {
        self.errors = 0;
    }

    /// Completed master transmissions.
    pub fn tx_count(&self) -> u32 {
        self.tx_count
    }

    /// Frames received, as slave or by master read.
    pub fn rx_count(&self) -> u32 {
        self.rx_count
    }

    pub fn registers(&self) -> &R {
        &self.regs
    }

    pub fn registers_mut(&mut self) -> &mut R {
        &mut self.regs
    }

    pub fn trace(&self) -> &Ringbuf<Trace, 32> {
        &self.trace
    }

    /// Takes ownership of a queued master operation and requests START.
    pub fn start<const N: usize>(
        &mut self,
        h: WsHandle,
        pool: &mut WorkSet<N>,
        timer: &mut impl TransitionTimer,
    ) -> Result<(), StartError> {
        if !self.is_idle() {
            return Err(StartError::Busy);
        }

        let (op, next) = match pool.state(h) {
            Some(WsState::ActiveMasterWrite) => {
                (Op::MasterTransmit, WsState::ActiveMasterWritePending)
            }
            Some(WsState::ActiveMasterRead) => {
                (Op::MasterReceive, WsState::ActiveMasterReadPending)
            }
            _ => return Err(StartError::NotQueued),
        };

        let ctx = pool.get_mut(h).ok_or(StartError::NotQueued)?;
        ctx.len_sent = 0;
        if op == Op::MasterReceive {
            ctx.len_in = 0;
        }
        ctx.attempts = ctx.attempts.saturating_add(1);
        pool.set_state(h, next);

        ringbuf_entry!(self.trace, Trace::Start(h, op));
        self.owner = Some(h);
        self.op = op;
        self.state = State::Starting;
        self.regs.set(Control::STA);
        timer.arm(self.id, self.timeout);
        Ok(())
    }

    /// Advances the state machine by one controller status.
    pub fn on_status<const N: usize>(
        &mut self,
        raw: u8,
        data: u8,
        pool: &mut WorkSet<N>,
        timer: &mut impl TransitionTimer,
    ) -> Option<Event> {
        let Some(status) = Status::from_raw(raw) else {
            ringbuf_entry!(self.trace, Trace::Unknown(raw));
            return self.protocol_error(pool, timer);
        };
        ringbuf_entry!(self.trace, Trace::Status(status));

        match status {
            Status::NoInfo => return None,
            Status::BusError => return self.bus_error(pool, timer),
            _ => (),
        }

        if !self.expected(status) {
            ringbuf_entry!(
                self.trace,
                Trace::Unexpected(self.op, self.state, status)
            );
            return self.protocol_error(pool, timer);
        }

        match status {
            Status::Start | Status::RepeatedStart => {
                self.send_address(status, pool, timer)
            }
            Status::SlaWriteAck | Status::DataSentAck => {
                self.send_next(status, pool, timer)
            }
            Status::SlaWriteNak | Status::DataSentNak | Status::SlaReadNak => {
                self.regs.set(Control::STO | Control::AA);
                self.regs.clear(Control::SI);
                self.finish_master(TransportStatus::Nak, timer)
            }
            Status::ArbitrationLost => {
                // The bus belongs to someone else; stay off it and keep
                // acknowledging our own address.
                self.regs.clear(Control::SI);
                self.finish_master(TransportStatus::ArbitrationLost, timer)
            }
            Status::SlaReadAck | Status::DataReceivedAck => {
                self.receive(status, data, pool, timer)
            }
            Status::DataReceivedNak => {
                if let Some(ctx) = self.owner.and_then(|h| pool.get_mut(h)) {
                    // The last byte, which we NAKed on purpose.
                    let _ = ctx.push_in(data);
                }
                ringbuf_entry!(self.trace, Trace::Rx(data));
                self.rx_count = self.rx_count.wrapping_add(1);
                self.regs.set(Control::STO | Control::AA);
                self.regs.clear(Control::SI);
                self.finish_master(TransportStatus::Success, timer)
            }
            Status::OwnSlaWriteAck
            | Status::ArbLostOwnSlaWrite
            | Status::GeneralCall
            | Status::ArbLostGeneralCall => {
                let event = self.preempt(timer);
                let general_call = matches!(
                    status,
                    Status::GeneralCall | Status::ArbLostGeneralCall
                );
                self.begin_slave_receive(status, general_call, pool, timer);
                event
            }
            Status::SlaveDataAck | Status::GeneralCallDataAck => {
                self.slave_byte(status, data, pool, timer)
            }
            Status::SlaveDataNak | Status::GeneralCallDataNak => {
                // We refused the byte: either nowhere to put the frame, or it
                // outgrew the buffer. Whatever we had is dropped.
                if let Some(h) = self.owner.take() {
                    ringbuf_entry!(self.trace, Trace::Overflow);
                    pool.release(h);
                }
                self.regs.set(Control::AA);
                self.regs.clear(Control::SI);
                self.go_idle(timer);
                None
            }
            Status::StopOrRepeatedStart => {
                let event = self.owner.take().and_then(|h| {
                    let overflowed = pool
                        .get(h)
                        .map(|ctx| ctx.flags.contains(WsFlags::OVERFLOW))?;
                    if overflowed {
                        ringbuf_entry!(self.trace, Trace::Overflow);
                        pool.release(h);
                        return None;
                    }
                    let len = pool.get(h).map(|ctx| ctx.len_in)?;
                    ringbuf_entry!(self.trace, Trace::Received(len));
                    pool.set_state(h, WsState::ActiveIn);
                    self.rx_count = self.rx_count.wrapping_add(1);
                    Some(Event::Received(h))
                });
                self.regs.set(Control::AA);
                self.regs.clear(Control::SI);
                self.go_idle(timer);
                event
            }
            Status::OwnSlaReadAck | Status::ArbLostOwnSlaRead => {
                let event = self.preempt(timer);
                ringbuf_entry!(self.trace, Trace::SlaveRead);
                self.op = Op::SlaveTransmit;
                self.state = State::After(status);
                self.regs.write_data(FILLER);
                self.regs.set(Control::AA);
                self.regs.clear(Control::SI);
                timer.arm(self.id, self.timeout);
                event
            }
            Status::SlaveDataSentAck => {
                self.state = State::After(status);
                self.regs.write_data(FILLER);
                self.regs.set(Control::AA);
                self.regs.clear(Control::SI);
                timer.arm(self.id, self.timeout);
                None
            }
            Status::SlaveDataSentNak | Status::LastByteSentAck => {
                self.regs.set(Control::AA);
                self.regs.clear(Control::SI);
                self.go_idle(timer);
                None
            }
            Status::BusError | Status::NoInfo => None,
        }
    }

    /// The transition timer for this channel expired.
    pub fn on_timeout<const N: usize>(
        &mut self,
        pool: &mut WorkSet<N>,
        timer: &mut impl TransitionTimer,
    ) -> Option<Event> {
        if self.is_idle() && self.state == State::Idle {
            return None;
        }
        ringbuf_entry!(self.trace, Trace::Timeout(self.op));
        self.recover(TransportStatus::Timeout, pool, timer)
    }

    fn expected(&self, status: Status) -> bool {
        use Status::*;

        match (self.op, self.state) {
            (Op::IdleSlave, _) => {
                matches!(status, OwnSlaWriteAck | GeneralCall | OwnSlaReadAck)
            }
            (Op::MasterTransmit | Op::MasterReceive, State::Starting) => {
                matches!(
                    status,
                    Start
                        | RepeatedStart
                        | ArbitrationLost
                        | OwnSlaWriteAck
                        | GeneralCall
                        | OwnSlaReadAck
                )
            }
            (Op::MasterTransmit, State::After(Start | RepeatedStart)) => {
                matches!(
                    status,
                    SlaWriteAck
                        | SlaWriteNak
                        | ArbitrationLost
                        | ArbLostOwnSlaWrite
                        | ArbLostGeneralCall
                        | ArbLostOwnSlaRead
                )
            }
            (Op::MasterTransmit, State::After(SlaWriteAck | DataSentAck)) => {
                matches!(status, DataSentAck | DataSentNak | ArbitrationLost)
            }
            (Op::MasterReceive, State::After(Start | RepeatedStart)) => {
                matches!(
                    status,
                    SlaReadAck
                        | SlaReadNak
                        | ArbitrationLost
                        | ArbLostOwnSlaWrite
                        | ArbLostGeneralCall
                        | ArbLostOwnSlaRead
                )
            }
            // Write-then-read turns around with a repeated START.
            (Op::MasterReceive, State::After(DataSentAck)) => {
                matches!(status, RepeatedStart | ArbitrationLost)
            }
            (Op::MasterReceive, State::After(SlaReadAck | DataReceivedAck)) => {
                matches!(
                    status,
                    DataReceivedAck | DataReceivedNak | ArbitrationLost
                )
            }
            (
                Op::SlaveReceive,
                State::After(OwnSlaWriteAck | ArbLostOwnSlaWrite | SlaveDataAck),
            ) => matches!(status, SlaveDataAck | SlaveDataNak | StopOrRepeatedStart),
            (
                Op::SlaveReceive,
                State::After(
                    GeneralCall | ArbLostGeneralCall | GeneralCallDataAck,
                ),
            ) => matches!(
                status,
                GeneralCallDataAck | GeneralCallDataNak | StopOrRepeatedStart
            ),
            (
                Op::SlaveTransmit,
                State::After(
                    OwnSlaReadAck | ArbLostOwnSlaRead | SlaveDataSentAck,
                ),
            ) => matches!(
                status,
                SlaveDataSentAck | SlaveDataSentNak | LastByteSentAck
            ),
            _ => false,
        }
    }

    fn send_address<const N: usize>(
        &mut self,
        status: Status,
        pool: &mut WorkSet<N>,
        timer: &mut impl TransitionTimer,
    ) -> Option<Event> {
        let op = self.op;
        let Some(ctx) = self.owner.and_then(|h| pool.get_mut(h)) else {
            ringbuf_entry!(self.trace, Trace::StaleOwner);
            return self.protocol_error(pool, timer);
        };

        let sla = match op {
            Op::MasterTransmit => {
                ctx.len_sent = 1;
                ctx.outbuf[0] & !1
            }
            _ => ctx.addr_out | 1,
        };

        ringbuf_entry!(self.trace, Trace::Sla(sla));
        self.state = State::After(status);
        self.regs.write_data(sla);
        self.regs.clear(Control::STA | Control::SI);
        timer.arm(self.id, self.timeout);
        None
    }

    fn send_next<const N: usize>(
        &mut self,
        status: Status,
        pool: &mut WorkSet<N>,
        timer: &mut impl TransitionTimer,
    ) -> Option<Event> {
        let Some(h) = self.owner else {
            return self.protocol_error(pool, timer);
        };
        let Some(ctx) = pool.get_mut(h) else {
            ringbuf_entry!(self.trace, Trace::StaleOwner);
            return self.protocol_error(pool, timer);
        };

        if let Some(b) = ctx.next_out() {
            ringbuf_entry!(self.trace, Trace::Tx(b));
            self.state = State::After(status);
            self.regs.write_data(b);
            self.regs.clear(Control::SI);
            timer.arm(self.id, self.timeout);
            return None;
        }

        if ctx.flags.contains(WsFlags::REPEATED_START) {
            // Register write done; turn the bus around and read back.
            ringbuf_entry!(self.trace, Trace::TurnAround);
            ctx.len_in = 0;
            pool.set_state(h, WsState::ActiveMasterReadPending);
            self.op = Op::MasterReceive;
            self.state = State::After(status);
            self.regs.set(Control::STA);
            self.regs.clear(Control::SI);
            timer.arm(self.id, self.timeout);
            return None;
        }

        self.tx_count = self.tx_count.wrapping_add(1);
        self.regs.set(Control::STO | Control::AA);
        self.regs.clear(Control::SI);
        self.finish_master(TransportStatus::Success, timer)
    }

    fn receive<const N: usize>(
        &mut self,
        status: Status,
        data: u8,
        pool: &mut WorkSet<N>,
        timer: &mut impl TransitionTimer,
    ) -> Option<Event> {
        let Some(ctx) = self.owner.and_then(|h| pool.get_mut(h)) else {
            ringbuf_entry!(self.trace, Trace::StaleOwner);
            return self.protocol_error(pool, timer);
        };

        if status == Status::DataReceivedAck {
            if ctx.push_in(data).is_err() {
                return self.protocol_error(pool, timer);
            }
            ringbuf_entry!(self.trace, Trace::Rx(data));
        }

        // ACK every byte but the last one wanted.
        let remaining = ctx.len_read.max(1).saturating_sub(ctx.len_in);
        if remaining > 1 {
            self.regs.set(Control::AA);
        } else {
            self.regs.clear(Control::AA);
        }
        self.state = State::After(status);
        self.regs.clear(Control::SI);
        timer.arm(self.id, self.timeout);
        None
    }

    fn begin_slave_receive<const N: usize>(
        &mut self,
        status: Status,
        general_call: bool,
        pool: &mut WorkSet<N>,
        timer: &mut impl TransitionTimer,
    ) {
        self.op = Op::SlaveReceive;
        self.state = State::After(status);
        timer.arm(self.id, self.timeout);

        let addr = if general_call { 0 } else { self.own_address };
        let Ok(h) = pool.allocate() else {
            // Nowhere to put it: NAK the data and let the sender retry.
            ringbuf_entry!(self.trace, Trace::SlaveNoResources);
            self.regs.clear(Control::AA | Control::SI);
            return;
        };

        if let Some(ctx) = pool.get_mut(h) {
            ctx.incoming = Route::ipmb(Medium::I2c(ChannelSelect::Fixed(self.id)));
            if general_call {
                ctx.flags |= WsFlags::GENERAL_CALL;
            }
            // The frame starts with the address it was sent to.
            let _ = ctx.push_in(addr);
        }
        self.owner = Some(h);
        self.regs.set(Control::AA);
        self.regs.clear(Control::SI);
    }

    fn slave_byte<const N: usize>(
        &mut self,
        status: Status,
        data: u8,
        pool: &mut WorkSet<N>,
        timer: &mut impl TransitionTimer,
    ) -> Option<Event> {
        let Some(ctx) = self.owner.and_then(|h| pool.get_mut(h)) else {
            ringbuf_entry!(self.trace, Trace::StaleOwner);
            return self.protocol_error(pool, timer);
        };

        let _ = ctx.push_in(data);
        ringbuf_entry!(self.trace, Trace::Rx(data));
        if ctx.has_room() {
            self.regs.set(Control::AA);
        } else {
            // Full: refuse anything further.
            self.regs.clear(Control::AA);
        }
        self.state = State::After(status);
        self.regs.clear(Control::SI);
        timer.arm(self.id, self.timeout);
        None
    }

    /// Ends a master operation we were about to start, or were in the middle
    /// of, because someone else addressed us.
    fn preempt(&mut self, timer: &mut impl TransitionTimer) -> Option<Event> {
        if !matches!(self.op, Op::MasterTransmit | Op::MasterReceive) {
            return None;
        }
        ringbuf_entry!(self.trace, Trace::Preempted);
        self.regs.clear(Control::STA);
        self.finish_master(TransportStatus::ArbitrationLost, timer)
    }

    fn finish_master(
        &mut self,
        status: TransportStatus,
        timer: &mut impl TransitionTimer,
    ) -> Option<Event> {
        ringbuf_entry!(self.trace, Trace::Done(status));
        if status != TransportStatus::Success {
            self.errors = self.errors.saturating_add(1);
        }
        let owner = self.owner.take();
        self.go_idle(timer);
        owner.map(|h| Event::Done(h, status))
    }

    fn go_idle(&mut self, timer: &mut impl TransitionTimer) {
        self.op = Op::IdleSlave;
        self.state = State::Idle;
        self.owner = None;
        timer.disarm(self.id);
    }

    fn bus_error<const N: usize>(
        &mut self,
        pool: &mut WorkSet<N>,
        timer: &mut impl TransitionTimer,
    ) -> Option<Event> {
        self.recover(TransportStatus::BusError, pool, timer)
    }

    fn protocol_error<const N: usize>(
        &mut self,
        pool: &mut WorkSet<N>,
        timer: &mut impl TransitionTimer,
    ) -> Option<Event> {
        self.recover(TransportStatus::StateTransition, pool, timer)
    }

    /// Forces the bus to STOP, drops back to idle slave, and completes
    /// whatever the channel owned with `status`.
    fn recover<const N: usize>(
        &mut self,
        status: TransportStatus,
        pool: &mut WorkSet<N>,
        timer: &mut impl TransitionTimer,
    ) -> Option<Event> {
        self.regs.set(Control::STO | Control::AA);
        self.regs.clear(Control::STA | Control::SI);

        let was_master =
            matches!(self.op, Op::MasterTransmit | Op::MasterReceive);
        if was_master {
            return self.finish_master(status, timer);
        }

        self.errors = self.errors.saturating_add(1);
        if let Some(h) = self.owner.take() {
            // A partial slave frame is worthless.
            pool.release(h);
        }
        self.go_idle(timer);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workset::MessageContext;

    #[derive(Default)]
    struct MockRegs {
        ctrl: Control,
        data: Vec<u8>,
        stops: usize,
        own: Option<(u8, bool)>,
    }

    impl I2cRegisters for MockRegs {
        fn set(&mut self, bits: Control) {
            if bits.contains(Control::STO) {
                self.stops += 1;
            }
            self.ctrl |= bits;
        }
        fn clear(&mut self, bits: Control) {
            self.ctrl &= !bits;
        }
        fn write_data(&mut self, byte: u8) {
            self.data.push(byte);
        }
        fn set_own_address(&mut self, addr: u8, general_call: bool) {
            self.own = Some((addr, general_call));
        }
    }

    #[derive(Default)]
    struct MockTimer {
        armed: Option<u64>,
        arms: usize,
    }

    impl TransitionTimer for MockTimer {
        fn arm(&mut self, _: ChannelId, ticks: u64) {
            self.armed = Some(ticks);
            self.arms += 1;
        }
        fn disarm(&mut self, _: ChannelId) {
            self.armed = None;
        }
    }

    const OWN: u8 = 0x20;
    const TIMEOUT: u64 = 10_000;

    type Pool = WorkSet<2>;

    struct Rig {
        ch: Channel<MockRegs>,
        pool: Pool,
        timer: MockTimer,
    }

    impl Rig {
        fn new() -> Self {
            let mut ch =
                Channel::new(ChannelId::A, MockRegs::default(), OWN, TIMEOUT);
            ch.init();
            Self {
                ch,
                pool: Pool::new(),
                timer: MockTimer::default(),
            }
        }

        fn status(&mut self, raw: u8, data: u8) -> Option<Event> {
            self.ch.on_status(raw, data, &mut self.pool, &mut self.timer)
        }

        fn queue_write(&mut self, frame: &[u8]) -> WsHandle {
            let h = self.pool.allocate().unwrap();
            self.pool.get_mut(h).unwrap().set_outbound(frame).unwrap();
            self.pool.set_state(h, WsState::ActiveMasterWrite);
            h
        }

        fn queue_read(&mut self, addr: u8, len: usize) -> WsHandle {
            let h = self.pool.allocate().unwrap();
            let ctx: &mut MessageContext = self.pool.get_mut(h).unwrap();
            ctx.addr_out = addr;
            ctx.len_read = len;
            self.pool.set_state(h, WsState::ActiveMasterRead);
            h
        }

        fn start(&mut self, h: WsHandle) {
            self.ch.start(h, &mut self.pool, &mut self.timer).unwrap();
        }

        fn regs(&self) -> &MockRegs {
            self.ch.registers()
        }
    }

    #[test]
    fn init_enables_slave() {
        let rig = Rig::new();
        assert_eq!(rig.regs().own, Some((OWN, true)));
        assert!(rig.regs().ctrl.contains(Control::I2EN | Control::AA));
        assert!(rig.ch.is_idle());
    }

    #[test]
    fn two_byte_master_transmit() {
        let mut rig = Rig::new();
        let h = rig.queue_write(&[0x72, 0xAB, 0xCD]);
        rig.start(h);

        assert_eq!(
            rig.pool.state(h),
            Some(WsState::ActiveMasterWritePending)
        );
        assert!(rig.regs().ctrl.contains(Control::STA));
        assert_eq!(rig.timer.armed, Some(TIMEOUT));
        assert_eq!(rig.ch.start(h, &mut rig.pool, &mut rig.timer), Err(StartError::Busy));

        assert_eq!(rig.status(0x08, 0), None);
        assert!(!rig.regs().ctrl.contains(Control::STA));
        assert_eq!(rig.status(0x18, 0), None);
        assert_eq!(rig.status(0x28, 0), None);
        assert_eq!(rig.status(0x28, 0), Some(Event::Done(h, TransportStatus::Success)));

        assert_eq!(rig.regs().data, [0x72, 0xAB, 0xCD]);
        assert_eq!(rig.regs().stops, 1);
        assert!(!rig.regs().ctrl.contains(Control::SI));
        assert!(rig.ch.is_idle());
        assert_eq!(rig.ch.tx_count(), 1);
        assert_eq!(rig.ch.errors(), 0);
        assert_eq!(rig.timer.armed, None);
        assert_eq!(rig.pool.get(h).unwrap().attempts, 1);
    }

    #[test]
    fn address_nak() {
        let mut rig = Rig::new();
        let h = rig.queue_write(&[0x72, 0x01]);
        rig.start(h);

        rig.status(0x08, 0);
        assert_eq!(rig.status(0x20, 0), Some(Event::Done(h, TransportStatus::Nak)));
        assert_eq!(rig.regs().stops, 1);
        assert_eq!(rig.ch.errors(), 1);
        assert!(rig.ch.is_idle());
    }

    #[test]
    fn arbitration_lost_sends_no_stop() {
        let mut rig = Rig::new();
        let h = rig.queue_write(&[0x72, 0x01]);
        rig.start(h);

        rig.status(0x08, 0);
        rig.status(0x18, 0);
        assert_eq!(
            rig.status(0x38, 0),
            Some(Event::Done(h, TransportStatus::ArbitrationLost))
        );
        assert_eq!(rig.regs().stops, 0);
        assert!(rig.ch.is_idle());
    }

    #[test]
    fn lost_arbitration_to_our_own_address() {
        let mut rig = Rig::new();
        let h = rig.queue_write(&[0x72, 0x01]);
        rig.start(h);
        rig.status(0x08, 0);

        // Someone else won and is talking to us.
        assert_eq!(
            rig.status(0x68, OWN),
            Some(Event::Done(h, TransportStatus::ArbitrationLost))
        );
        assert_eq!(rig.ch.op(), Op::SlaveReceive);

        for b in [0x18, 0xC8, 0x81, 0x04, 0x01, 0x7A] {
            assert_eq!(rig.status(0x80, b), None);
        }
        let Some(Event::Received(rx)) = rig.status(0xA0, 0) else {
            panic!("no frame");
        };
        assert_eq!(
            rig.pool.get(rx).unwrap().inbound(),
            [OWN, 0x18, 0xC8, 0x81, 0x04, 0x01, 0x7A]
        );
    }

    #[test]
    fn pending_start_preempted_by_slave_traffic() {
        let mut rig = Rig::new();
        let h = rig.queue_write(&[0x72, 0x01]);
        rig.start(h);

        assert_eq!(
            rig.status(0x60, OWN),
            Some(Event::Done(h, TransportStatus::ArbitrationLost))
        );
        // The START request must not linger.
        assert!(!rig.regs().ctrl.contains(Control::STA));
        assert_eq!(rig.ch.op(), Op::SlaveReceive);
    }

    #[test]
    fn slave_receive() {
        let mut rig = Rig::new();
        assert_eq!(rig.status(0x60, OWN), None);
        assert_eq!(rig.timer.armed, Some(TIMEOUT));
        for b in [1, 2, 3] {
            assert_eq!(rig.status(0x80, b), None);
            assert!(rig.regs().ctrl.contains(Control::AA));
        }

        let Some(Event::Received(h)) = rig.status(0xA0, 0) else {
            panic!("no frame");
        };
        assert_eq!(rig.pool.state(h), Some(WsState::ActiveIn));
        let ctx = rig.pool.get(h).unwrap();
        assert_eq!(ctx.inbound(), [OWN, 1, 2, 3]);
        assert_eq!(ctx.incoming.channel(), Some(ChannelId::A));
        assert!(rig.ch.is_idle());
        assert_eq!(rig.timer.armed, None);
        assert_eq!(rig.ch.rx_count(), 1);
    }

    #[test]
    fn general_call() {
        let mut rig = Rig::new();
        rig.status(0x70, 0);
        rig.status(0x90, 0x55);
        let Some(Event::Received(h)) = rig.status(0xA0, 0) else {
            panic!("no frame");
        };
        let ctx = rig.pool.get(h).unwrap();
        assert!(ctx.flags.contains(WsFlags::GENERAL_CALL));
        assert_eq!(ctx.inbound(), [0, 0x55]);
    }

    #[test]
    fn slave_receive_with_pool_exhausted() {
        let mut rig = Rig::new();
        rig.pool.allocate().unwrap();
        rig.pool.allocate().unwrap();

        assert_eq!(rig.status(0x60, OWN), None);
        assert!(!rig.regs().ctrl.contains(Control::AA));
        assert_eq!(rig.ch.trace().last(), Some(Trace::SlaveNoResources));

        // The sender sees a NAK on its first data byte.
        assert_eq!(rig.status(0x88, 0x18), None);
        assert!(rig.regs().ctrl.contains(Control::AA));
        assert!(rig.ch.is_idle());
        assert_eq!(rig.pool.in_use(), 2);
    }

    #[test]
    fn slave_overflow_is_dropped() {
        let mut rig = Rig::new();
        rig.status(0x60, OWN);
        // One byte of the buffer went to the address.
        for i in 1..workset_len() {
            rig.status(0x80, i as u8);
        }
        assert!(!rig.regs().ctrl.contains(Control::AA));

        assert_eq!(rig.status(0x88, 0xEE), None);
        assert_eq!(rig.pool.in_use(), 0);
        assert!(rig.ch.is_idle());
        assert!(rig.regs().ctrl.contains(Control::AA));
    }

    fn workset_len() -> usize {
        MessageContext::EMPTY.inbuf.len()
    }

    #[test]
    fn slave_transmit_sends_filler() {
        let mut rig = Rig::new();
        rig.status(0xA8, 0);
        rig.status(0xB8, 0);
        rig.status(0xC0, 0);
        assert_eq!(rig.regs().data, [FILLER, FILLER]);
        assert!(rig.ch.is_idle());
        assert_eq!(rig.pool.in_use(), 0);
    }

    #[test]
    fn unexpected_status_recovers() {
        let mut rig = Rig::new();
        let h = rig.queue_write(&[0x72, 0x01]);
        rig.start(h);
        rig.status(0x08, 0);

        // Data received in the middle of a transmit makes no sense.
        assert_eq!(
            rig.status(0x50, 0),
            Some(Event::Done(h, TransportStatus::StateTransition))
        );
        let ctrl = rig.regs().ctrl;
        assert!(ctrl.contains(Control::STO | Control::AA));
        assert!(!ctrl.intersects(Control::STA | Control::SI));
        assert!(rig.ch.is_idle());
        assert_eq!(rig.ch.errors(), 1);
        assert_eq!(
            rig.ch.trace().last(),
            Some(Trace::Done(TransportStatus::StateTransition))
        );
    }

    #[test]
    fn unknown_status_while_slave_frees_context() {
        let mut rig = Rig::new();
        rig.status(0x60, OWN);
        rig.status(0x80, 1);
        assert_eq!(rig.pool.in_use(), 1);

        assert_eq!(rig.status(0x42, 0), None);
        assert_eq!(rig.pool.in_use(), 0);
        assert!(rig.ch.is_idle());
    }

    #[test]
    fn timeout_completes_owner() {
        let mut rig = Rig::new();
        let h = rig.queue_write(&[0x72, 0x01]);
        rig.start(h);
        rig.status(0x08, 0);

        assert_eq!(
            rig.ch.on_timeout(&mut rig.pool, &mut rig.timer),
            Some(Event::Done(h, TransportStatus::Timeout))
        );
        assert!(rig.ch.is_idle());
        assert_eq!(rig.regs().stops, 1);

        // A second, stale, expiry does nothing.
        assert_eq!(rig.ch.on_timeout(&mut rig.pool, &mut rig.timer), None);
    }

    #[test]
    fn master_receive() {
        let mut rig = Rig::new();
        let h = rig.queue_read(0xA0, 3);
        rig.start(h);

        rig.status(0x08, 0);
        assert_eq!(rig.regs().data, [0xA1]);
        rig.status(0x40, 0);
        assert!(rig.regs().ctrl.contains(Control::AA));
        rig.status(0x50, 0x11);
        assert!(rig.regs().ctrl.contains(Control::AA));
        rig.status(0x50, 0x22);
        // Only the last byte is left; NAK it.
        assert!(!rig.regs().ctrl.contains(Control::AA));
        assert_eq!(
            rig.status(0x58, 0x33),
            Some(Event::Done(h, TransportStatus::Success))
        );
        assert_eq!(rig.pool.get(h).unwrap().inbound(), [0x11, 0x22, 0x33]);
    }

    #[test]
    fn write_then_read() {
        let mut rig = Rig::new();
        let h = rig.queue_write(&[0xA0, 0x10]);
        {
            let ctx = rig.pool.get_mut(h).unwrap();
            ctx.flags |= WsFlags::REPEATED_START;
            ctx.addr_out = 0xA0;
            ctx.len_read = 1;
        }
        rig.start(h);

        rig.status(0x08, 0);
        rig.status(0x18, 0);
        rig.status(0x28, 0);
        assert_eq!(rig.ch.op(), Op::MasterReceive);
        assert!(rig.regs().ctrl.contains(Control::STA));
        assert_eq!(rig.regs().stops, 0);

        rig.status(0x10, 0);
        rig.status(0x40, 0);
        assert!(!rig.regs().ctrl.contains(Control::AA));
        assert_eq!(
            rig.status(0x58, 0x99),
            Some(Event::Done(h, TransportStatus::Success))
        );
        assert_eq!(rig.regs().data, [0xA0, 0x10, 0xA1]);
        assert_eq!(rig.pool.get(h).unwrap().inbound(), [0x99]);
    }

    #[test]
    fn bus_error() {
        let mut rig = Rig::new();
        let h = rig.queue_write(&[0x72, 0x01]);
        rig.start(h);
        rig.status(0x08, 0);

        assert_eq!(
            rig.status(0x00, 0),
            Some(Event::Done(h, TransportStatus::BusError))
        );
        assert_eq!(rig.regs().stops, 1);
        assert!(rig.ch.is_idle());
    }

    #[test]
    fn no_info_is_ignored() {
        let mut rig = Rig::new();
        rig.status(0x60, OWN);
        assert_eq!(rig.status(0xF8, 0), None);
        assert_eq!(rig.ch.op(), Op::SlaveReceive);
    }

    #[test]
    fn start_requires_queued_context() {
        let mut rig = Rig::new();
        let h = rig.pool.allocate().unwrap();
        assert_eq!(
            rig.ch.start(h, &mut rig.pool, &mut rig.timer),
            Err(StartError::NotQueued)
        );
    }
}
