// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use callout::Scheduler;
use drv_ipmb_i2c::{
    Channel, Event, I2cRegisters, Selector, StartError, TransitionTimer,
    TransportStatus,
};
use heapless::spsc::Consumer;
use ipmi_types::{
    parse, CompletionCode, Header, Message, NetFn, MAX_REQUEST_DATA,
    MIN_REQUEST_LEN, MSG_BUF_LEN,
};
use ringbuf::{ringbuf_entry, Ringbuf};
use workset::{
    ChannelId, ChannelSelect, ClientFn, Completion, IpmiCallback, Medium,
    Protocol, Route, TransportCallback, WorkSet, WsFlags, WsHandle, WsState,
};

use crate::dispatch::{self, Command, Reply, Request, Response, Services};
use crate::envelope::Envelope;
use crate::handlers::BUILTIN;
use crate::isr::{I2cEvent, Ticker};
use crate::seq::SequenceTable;
use crate::{Config, Error, CALLOUT_COUNT, WS_COUNT};

/// Called for a response no outstanding request claims.
pub type UnsolicitedFn = fn(&Message<'_>);

/// Identity of a scheduled callout.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TimerKey {
    Channel(ChannelId),
    ErrorReset,
    Response(WsHandle),
}

/// What to do when a callout fires.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TimerAction {
    ChannelTimeout(ChannelId),
    ResetErrors,
    ResponseTimeout(WsHandle),
}

pub type Timers = Scheduler<TimerKey, TimerAction, CALLOUT_COUNT>;

/// Gives a channel its transition timer by way of the scheduler.
struct ChannelTimers<'a>(&'a mut Timers);

impl TransitionTimer for ChannelTimers<'_> {
    fn arm(&mut self, channel: ChannelId, ticks: u64) {
        let key = TimerKey::Channel(channel);
        self.0.remove(key);
        // Sized so that this cannot fail; see CALLOUT_COUNT.
        let _ = self.0.add(key, ticks, TimerAction::ChannelTimeout(channel));
    }

    fn disarm(&mut self, channel: ChannelId) {
        self.0.remove(TimerKey::Channel(channel));
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Trace {
    None,
    Start,
    I2c(ChannelId, u8),
    Received(WsHandle),
    Done(WsHandle, TransportStatus),
    Runt(usize),
    BadFrame(ipmi_types::FrameError),
    Request { net_fn: u8, cmd: u8 },
    NoHandler { net_fn: u8, cmd: u8 },
    Failed(CompletionCode),
    Delayed(WsHandle),
    Response { seq: u8, cc: u8 },
    Unsolicited { seq: u8, src: u8 },
    Transmit(WsHandle, ChannelId),
    Busy(ChannelId),
    NotStarted(StartError),
    Loopback(WsHandle),
    LoopbackNoResources,
    Retry(WsHandle, TransportStatus, u8),
    GiveUp(WsHandle, TransportStatus),
    ResponseTimeout(WsHandle),
    Retransmit(WsHandle),
    RelayStale(WsHandle),
    Oversized(WsHandle),
    ErrorsReset,
    Stale(WsHandle),
}

/// A request for [`Ipmc::send_request`].
#[derive(Copy, Clone, Debug)]
pub struct OutboundRequest<'a> {
    pub medium: Medium,
    /// Responder address.
    pub dst: u8,
    pub net_fn: NetFn,
    pub lun: u8,
    pub cmd: u8,
    pub data: &'a [u8],
}

/// How an outbound exchange ended, before it is shown to a callback.
enum Outcome<'a> {
    Response(Message<'a>),
    Read(&'a [u8]),
    Failed(CompletionCode),
}

/// The transport and dispatch engine.
///
/// Owns the message pool, the scheduler and both bus channels. The main
/// loop calls [`Ipmc::run_once`] forever; interrupt handlers feed it through
/// the event queue and the ticker.
pub struct Ipmc<'q, R, const Q: usize> {
    config: Config,
    pool: WorkSet<WS_COUNT>,
    timers: Timers,
    channels: [Channel<R>; 2],
    selector: Selector,
    seq: SequenceTable,
    commands: &'static [Command],
    unsolicited: Option<UnsolicitedFn>,
    events: Consumer<'q, I2cEvent, Q>,
    ticker: &'q Ticker,
    last_tick: u32,
    trace: Ringbuf<Trace, 64>,
}

impl<'q, R: I2cRegisters, const Q: usize> Ipmc<'q, R, Q> {
    pub fn new(
        config: Config,
        regs: [R; 2],
        commands: &'static [Command],
        events: Consumer<'q, I2cEvent, Q>,
        ticker: &'q Ticker,
    ) -> Self {
        let [a, b] = regs;
        let timeout = config.transition_timeout;
        Self {
            channels: [
                Channel::new(ChannelId::A, a, config.own_address, timeout),
                Channel::new(ChannelId::B, b, config.own_address, timeout),
            ],
            selector: Selector::new(config.policy),
            config,
            pool: WorkSet::new(),
            timers: Scheduler::new(),
            seq: SequenceTable::new(),
            commands,
            unsolicited: None,
            events,
            ticker,
            last_tick: ticker.count(),
            trace: Ringbuf::new(Trace::None),
        }
    }

    /// Brings up both channels and starts housekeeping.
    pub fn start(&mut self) {
        ringbuf_entry!(self.trace, Trace::Start);
        for ch in &mut self.channels {
            ch.init();
        }
        self.last_tick = self.ticker.count();
        self.arm_error_reset();
    }

    pub fn set_unsolicited(&mut self, f: UnsolicitedFn) {
        self.unsolicited = Some(f);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &WorkSet<WS_COUNT> {
        &self.pool
    }

    pub fn channel(&self, id: ChannelId) -> &Channel<R> {
        &self.channels[id.index()]
    }

    pub fn channel_mut(&mut self, id: ChannelId) -> &mut Channel<R> {
        &mut self.channels[id.index()]
    }

    pub fn sequences(&self) -> &SequenceTable {
        &self.seq
    }

    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    pub fn trace(&self) -> &Ringbuf<Trace, 64> {
        &self.trace
    }

    /// One pass of the main loop.
    pub fn run_once(&mut self) {
        self.process_work_list();
        self.process_callout_queue();
    }

    /// Handles every captured bus event, then dispatches the oldest inbound
    /// message and starts the oldest queued outbound one.
    pub fn process_work_list(&mut self) {
        while let Some(ev) = self.events.dequeue() {
            ringbuf_entry!(self.trace, Trace::I2c(ev.channel, ev.status));
            let event = self.channels[ev.channel.index()].on_status(
                ev.status,
                ev.data,
                &mut self.pool,
                &mut ChannelTimers(&mut self.timers),
            );
            self.handle_event(event);
        }

        if let Some(h) = self.pool.oldest(WsState::ActiveIn) {
            self.dispatch(h);
        }

        if let Some(h) = self.pool.find(|state, _| {
            matches!(
                state,
                WsState::ActiveMasterWrite | WsState::ActiveMasterRead
            )
        }) {
            self.transmit(h);
        }
    }

    /// Brings the scheduler up to date with the ticker and fires at most one
    /// due callout.
    pub fn process_callout_queue(&mut self) {
        let now = self.ticker.count();
        let elapsed = now.wrapping_sub(self.last_tick);
        self.last_tick = now;
        self.timers.advance(u64::from(elapsed));

        let Some(due) = self.timers.take_due() else {
            return;
        };
        match due.callback {
            TimerAction::ChannelTimeout(id) => {
                let event = self.channels[id.index()].on_timeout(
                    &mut self.pool,
                    &mut ChannelTimers(&mut self.timers),
                );
                self.handle_event(event);
            }
            TimerAction::ResetErrors => {
                ringbuf_entry!(self.trace, Trace::ErrorsReset);
                for ch in &mut self.channels {
                    ch.reset_errors();
                }
                self.arm_error_reset();
            }
            TimerAction::ResponseTimeout(h) => self.response_timeout(h),
        }
        self.timers.retire(due);
    }

    /// Sends an IPMB request. `done` is called exactly once with the
    /// response or the reason there is none. Returns the sequence number.
    pub fn send_request(
        &mut self,
        req: &OutboundRequest<'_>,
        done: ClientFn,
    ) -> Result<u8, Error> {
        if !req.net_fn.is_request() {
            return Err(Error::NotARequest);
        }
        if req.data.len() > MAX_REQUEST_DATA {
            return Err(Error::TooLong);
        }

        let seq = self.seq.allocate().ok_or(Error::NoSequence)?;
        let Ok(h) = self.pool.allocate() else {
            self.seq.free(seq);
            return Err(Error::NoResources);
        };

        let header = Header {
            dst: req.dst,
            net_fn: req.net_fn,
            dst_lun: req.lun,
            src: self.config.own_address,
            seq,
            src_lun: 0,
            cmd: req.cmd,
        };
        let installed = Envelope::build(req.medium, &header, req.data)
            .ok()
            .and_then(|env| {
                let ctx = self.pool.get_mut(h)?;
                env.install(ctx).ok()?;
                ctx.seq_out = seq;
                ctx.transport_done = TransportCallback::AwaitResponse;
                ctx.ipmi_done = IpmiCallback::Client(done);
                Some(())
            });
        if installed.is_none() {
            self.pool.release(h);
            self.seq.free(seq);
            return Err(Error::TooLong);
        }

        self.pool.set_state(h, WsState::ActiveMasterWrite);
        Ok(seq)
    }

    /// Reads `len` raw bytes from the device at `addr`, first writing
    /// `prefix` (typically a register offset) if it is not empty. `done`
    /// gets the bytes, with no sequence number.
    pub fn read_device(
        &mut self,
        channel: ChannelSelect,
        addr: u8,
        prefix: &[u8],
        len: usize,
        done: ClientFn,
    ) -> Result<(), Error> {
        if len == 0 || len > MSG_BUF_LEN || prefix.len() >= MSG_BUF_LEN {
            return Err(Error::TooLong);
        }
        let h = self.pool.allocate().map_err(|_| Error::NoResources)?;
        let Some(ctx) = self.pool.get_mut(h) else {
            return Err(Error::Stale);
        };

        ctx.outgoing = Route {
            protocol: Protocol::Raw,
            medium: Medium::I2c(channel),
        };
        ctx.addr_out = addr;
        ctx.len_read = len;
        ctx.transport_done = TransportCallback::Deliver;
        ctx.ipmi_done = IpmiCallback::Client(done);

        let state = if prefix.is_empty() {
            WsState::ActiveMasterRead
        } else {
            ctx.outbuf[0] = addr;
            ctx.outbuf[1..=prefix.len()].copy_from_slice(prefix);
            ctx.len_out = prefix.len() + 1;
            ctx.flags |= WsFlags::REPEATED_START;
            WsState::ActiveMasterWrite
        };
        self.pool.set_state(h, state);
        Ok(())
    }

    /// Completes a request whose handler returned [`Reply::Delayed`].
    pub fn finish_delayed(
        &mut self,
        origin: WsHandle,
        code: CompletionCode,
        data: &[u8],
    ) -> Result<(), Error> {
        if self.pool.state(origin) != Some(WsState::ActiveInPending) {
            ringbuf_entry!(self.trace, Trace::Stale(origin));
            return Err(Error::Stale);
        }
        self.respond(origin, code, data)
    }

    fn arm_error_reset(&mut self) {
        let period = self.config.error_reset_period;
        if period != 0 {
            self.timers.remove(TimerKey::ErrorReset);
            let _ = self.timers.add(
                TimerKey::ErrorReset,
                period,
                TimerAction::ResetErrors,
            );
        }
    }

    fn handle_event(&mut self, event: Option<Event>) {
        match event {
            Some(Event::Received(h)) => {
                ringbuf_entry!(self.trace, Trace::Received(h));
            }
            Some(Event::Done(h, status)) => self.transport_done(h, status),
            None => (),
        }
    }

    fn dispatch(&mut self, h: WsHandle) {
        // Work from a copy so handlers are free to use the pool.
        let mut frame = [0u8; MSG_BUF_LEN];
        let (len, medium) = match self.pool.get(h) {
            Some(ctx) => {
                let inbound = ctx.inbound();
                frame[..inbound.len()].copy_from_slice(inbound);
                (inbound.len(), ctx.incoming.medium)
            }
            None => return,
        };
        let frame = &frame[..len];

        let peeked = match Header::peek(frame) {
            Some(header) if len >= MIN_REQUEST_LEN => header,
            _ => {
                // Too short to answer.
                ringbuf_entry!(self.trace, Trace::Runt(len));
                self.pool.release(h);
                return;
            }
        };

        if peeked.net_fn.is_response() {
            self.process_response(h, frame);
        } else {
            self.process_request(h, peeked, frame, medium);
        }
    }

    fn process_request(
        &mut self,
        h: WsHandle,
        peeked: Header,
        frame: &[u8],
        medium: Medium,
    ) {
        let msg = match parse(frame) {
            Ok(msg) => msg,
            Err(e) => {
                ringbuf_entry!(self.trace, Trace::BadFrame(e));
                let _ = self.respond_to(
                    h,
                    &peeked,
                    CompletionCode::InvalidDataField,
                    &[],
                );
                return;
            }
        };

        let net_fn = msg.header.net_fn;
        let cmd = msg.header.cmd;
        ringbuf_entry!(
            self.trace,
            Trace::Request {
                net_fn: net_fn.raw(),
                cmd
            }
        );

        let Some(handler) =
            dispatch::lookup(self.commands, BUILTIN, net_fn, cmd)
        else {
            ringbuf_entry!(
                self.trace,
                Trace::NoHandler {
                    net_fn: net_fn.raw(),
                    cmd
                }
            );
            let _ = self.respond_to(
                h,
                &msg.header,
                CompletionCode::InvalidCommand,
                &[],
            );
            return;
        };

        let req = Request {
            header: msg.header,
            data: msg.body,
            handle: h,
            medium,
        };
        let mut rsp = Response::new();
        let result = {
            let mut svc = Services::new(
                &self.config,
                &mut self.pool,
                &mut self.seq,
                h,
            );
            handler(&mut svc, &req, &mut rsp)
        };

        match result {
            Ok(Reply::Done) => {
                let _ = self.respond_to(
                    h,
                    &msg.header,
                    CompletionCode::Success,
                    rsp.as_slice(),
                );
            }
            Ok(Reply::Delayed) => {
                ringbuf_entry!(self.trace, Trace::Delayed(h));
                self.pool.set_state(h, WsState::ActiveInPending);
            }
            Err(cc) => {
                ringbuf_entry!(self.trace, Trace::Failed(cc));
                let _ = self.respond_to(h, &msg.header, cc, &[]);
            }
        }
    }

    fn process_response(&mut self, h: WsHandle, frame: &[u8]) {
        // The frame is ours now; its context is not needed.
        self.pool.release(h);

        let msg = match parse(frame) {
            Ok(msg) => msg,
            Err(e) => {
                ringbuf_entry!(self.trace, Trace::BadFrame(e));
                return;
            }
        };
        let seq = msg.header.seq;
        let cc = msg.body.first().copied().unwrap_or(0xff);

        let req = self.pool.find_by_seq(seq, Some(h)).filter(|&req| {
            // Same command from the device we asked.
            self.pool.get(req).is_some_and(|ctx| {
                let sent = ctx.outbound();
                sent.first() == Some(&msg.header.src)
                    && sent.get(5) == Some(&msg.header.cmd)
            })
        });

        match req {
            Some(req) => {
                ringbuf_entry!(self.trace, Trace::Response { seq, cc });
                self.complete(req, Outcome::Response(msg));
            }
            None => {
                ringbuf_entry!(
                    self.trace,
                    Trace::Unsolicited {
                        seq,
                        src: msg.header.src
                    }
                );
                if let Some(f) = self.unsolicited {
                    f(&msg);
                }
            }
        }
    }

    /// Queues a response to the request held in `h`, reusing the context.
    fn respond(
        &mut self,
        h: WsHandle,
        code: CompletionCode,
        data: &[u8],
    ) -> Result<(), Error> {
        let header = self
            .pool
            .get(h)
            .and_then(|ctx| Header::peek(ctx.inbound()))
            .ok_or(Error::Stale)?;
        self.respond_to(h, &header, code, data)
    }

    /// Queues `code` and `data` as the response to `request`. A response
    /// that does not fit a frame goes back as a bare
    /// `CannotReturnRequestedBytes`, and `TooLong` is returned.
    fn respond_to(
        &mut self,
        h: WsHandle,
        request: &Header,
        code: CompletionCode,
        data: &[u8],
    ) -> Result<(), Error> {
        let header = request.response();
        let mut body = [0u8; MSG_BUF_LEN];
        body[0] = code.into();
        let len = match body.get_mut(1..=data.len()) {
            Some(rest) => {
                rest.copy_from_slice(data);
                Some(data.len() + 1)
            }
            None => None,
        };

        let Some(ctx) = self.pool.get_mut(h) else {
            return Err(Error::Stale);
        };
        let medium = ctx.incoming.medium;
        let installed = len
            .and_then(|len| {
                Envelope::build(medium, &header, &body[..len]).ok()
            })
            .and_then(|env| env.install(ctx).ok());

        let result = if installed.is_some() {
            Ok(())
        } else {
            ringbuf_entry!(self.trace, Trace::Oversized(h));
            let bare: [u8; 1] =
                [CompletionCode::CannotReturnRequestedBytes.into()];
            let fallback = Envelope::build(medium, &header, &bare)
                .ok()
                .and_then(|env| env.install(ctx).ok());
            if fallback.is_none() {
                self.pool.release(h);
                return Err(Error::TooLong);
            }
            Err(Error::TooLong)
        };

        let Some(ctx) = self.pool.get_mut(h) else {
            return Err(Error::Stale);
        };
        ctx.transport_done = TransportCallback::Release;
        ctx.ipmi_done = IpmiCallback::Discard;
        ctx.attempts = 0;
        self.pool.set_state(h, WsState::ActiveMasterWrite);
        result
    }

    fn transmit(&mut self, h: WsHandle) {
        let Some(medium) = self.pool.get(h).map(|ctx| ctx.outgoing.medium)
        else {
            return;
        };

        let id = match medium {
            Medium::Loopback => {
                self.loopback(h);
                return;
            }
            Medium::I2c(ChannelSelect::Fixed(id)) => id,
            Medium::I2c(ChannelSelect::Auto) => {
                let errors =
                    [self.channels[0].errors(), self.channels[1].errors()];
                self.selector.select(errors)
            }
        };

        let ch = &mut self.channels[id.index()];
        if !ch.is_idle() {
            ringbuf_entry!(self.trace, Trace::Busy(id));
            // To the back of the queue; let something else have a go.
            if let Some(state) = self.pool.state(h) {
                self.pool.set_state(h, state);
            }
            return;
        }

        ringbuf_entry!(self.trace, Trace::Transmit(h, id));
        if let Err(e) =
            ch.start(h, &mut self.pool, &mut ChannelTimers(&mut self.timers))
        {
            ringbuf_entry!(self.trace, Trace::NotStarted(e));
        }
    }

    /// Delivers an outbound frame to our own inbound path.
    fn loopback(&mut self, h: WsHandle) {
        ringbuf_entry!(self.trace, Trace::Loopback(h));
        self.pool.set_state(h, WsState::ActiveMasterWritePending);

        let Ok(copy) = self.pool.allocate() else {
            ringbuf_entry!(self.trace, Trace::LoopbackNoResources);
            if let Some(ctx) = self.pool.get_mut(h) {
                ctx.attempts = ctx.attempts.saturating_add(1);
            }
            return self.transport_done(h, TransportStatus::NoResources);
        };

        let mut frame = [0u8; MSG_BUF_LEN];
        let len = match self.pool.get_mut(h) {
            Some(ctx) => {
                ctx.attempts = ctx.attempts.saturating_add(1);
                let out = ctx.outbound();
                frame[..out.len()].copy_from_slice(out);
                out.len()
            }
            None => 0,
        };

        if let Some(ctx) = self.pool.get_mut(copy) {
            ctx.incoming = Route::ipmb(Medium::Loopback);
            for &b in &frame[..len] {
                let _ = ctx.push_in(b);
            }
        }
        self.pool.set_state(copy, WsState::ActiveIn);
        self.transport_done(h, TransportStatus::Success);
    }

    /// A channel (or the loopback) finished with `h`.
    fn transport_done(&mut self, h: WsHandle, status: TransportStatus) {
        ringbuf_entry!(self.trace, Trace::Done(h, status));
        let Some(state) = self.pool.state(h) else {
            return;
        };
        if !matches!(
            state,
            WsState::ActiveMasterWritePending | WsState::ActiveMasterReadPending
        ) {
            ringbuf_entry!(self.trace, Trace::Stale(h));
            return;
        }
        let Some(ctx) = self.pool.get_mut(h) else {
            return;
        };

        if status != TransportStatus::Success {
            let attempts = ctx.attempts;
            if status.is_retryable() && attempts < self.config.max_attempts {
                ringbuf_entry!(self.trace, Trace::Retry(h, status, attempts));
                ctx.len_sent = 0;
                ctx.len_in = 0;
                let requeue = if ctx.len_out > 0 {
                    WsState::ActiveMasterWrite
                } else {
                    WsState::ActiveMasterRead
                };
                self.pool.set_state(h, requeue);
            } else {
                ringbuf_entry!(self.trace, Trace::GiveUp(h, status));
                self.complete(
                    h,
                    Outcome::Failed(CompletionCode::DestinationUnavailable),
                );
            }
            return;
        }

        let done = ctx.transport_done;
        match done {
            TransportCallback::Release => {
                self.pool.release(h);
            }
            TransportCallback::AwaitResponse => {
                self.pool.set_state(h, WsState::ActiveMasterWriteSuccess);
                let key = TimerKey::Response(h);
                self.timers.remove(key);
                let _ = self.timers.add(
                    key,
                    self.config.response_timeout,
                    TimerAction::ResponseTimeout(h),
                );
            }
            TransportCallback::Deliver => {
                let mut data = [0u8; MSG_BUF_LEN];
                let inbound = ctx.inbound();
                let len = inbound.len();
                data[..len].copy_from_slice(inbound);
                self.complete(h, Outcome::Read(&data[..len]));
            }
        }
    }

    fn response_timeout(&mut self, h: WsHandle) {
        if self.pool.state(h) != Some(WsState::ActiveMasterWriteSuccess) {
            return;
        }
        ringbuf_entry!(self.trace, Trace::ResponseTimeout(h));

        let attempts =
            self.pool.get(h).map(|ctx| ctx.attempts).unwrap_or(u8::MAX);
        if attempts < self.config.max_attempts {
            // Same sequence number. An answer is matched only while the
            // latest copy is waiting on one.
            ringbuf_entry!(self.trace, Trace::Retransmit(h));
            if let Some(ctx) = self.pool.get_mut(h) {
                ctx.len_sent = 0;
            }
            self.pool.set_state(h, WsState::ActiveMasterWrite);
        } else {
            self.complete(
                h,
                Outcome::Failed(CompletionCode::DestinationUnavailable),
            );
        }
    }

    /// Reports the end of an outbound exchange and frees its context and
    /// sequence number.
    fn complete(&mut self, h: WsHandle, outcome: Outcome<'_>) {
        let Some(ctx) = self.pool.get(h) else {
            return;
        };
        let callback = ctx.ipmi_done;
        let bridged = ctx.bridged;
        let seq =
            (ctx.outgoing.protocol == Protocol::Ipmb).then_some(ctx.seq_out);

        self.timers.remove(TimerKey::Response(h));
        if let Some(seq) = seq {
            self.seq.free(seq);
        }
        self.pool.release(h);

        match callback {
            IpmiCallback::Discard => (),
            IpmiCallback::Client(f) => {
                let completion = match &outcome {
                    Outcome::Response(msg) => Completion {
                        seq,
                        code: msg
                            .completion_code()
                            .unwrap_or(CompletionCode::Unspecified),
                        data: msg.response_data(),
                    },
                    Outcome::Read(data) => Completion {
                        seq,
                        code: CompletionCode::Success,
                        data,
                    },
                    Outcome::Failed(code) => Completion {
                        seq,
                        code: *code,
                        data: &[],
                    },
                };
                f(&completion);
            }
            IpmiCallback::Relay => {
                if let Some(origin) = bridged {
                    self.relay_to_origin(origin, &outcome);
                }
            }
        }
    }

    /// Answers a bridged request with what came back from the far side.
    fn relay_to_origin(&mut self, origin: WsHandle, outcome: &Outcome<'_>) {
        if self.pool.state(origin) != Some(WsState::ActiveInPending) {
            ringbuf_entry!(self.trace, Trace::RelayStale(origin));
            return;
        }

        let _ = match outcome {
            // Our own completion code, then theirs and their data.
            Outcome::Response(msg) => {
                self.respond(origin, CompletionCode::Success, msg.body)
            }
            Outcome::Read(_) => {
                self.respond(origin, CompletionCode::Unspecified, &[])
            }
            Outcome::Failed(code) => self.respond(origin, *code, &[]),
        };
    }
}
