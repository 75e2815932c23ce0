// Host module session
//
// A `HostMod` is one participant on the debug interconnect. It obtains its
// DI address from the host controller, performs register accesses on debug
// modules and exchanges event packets with them.
//
// Once connected, a background I/O worker owns the receive side of the
// transport. It routes register responses to the caller waiting for them,
// reassembles multi-packet events and hands events either to a registered
// handler or to the event queue read by [`HostMod::event_receive`].
//
// All requests take `&mut self`, so at most one register access is in
// flight per session. Share a session between threads by wrapping it in a
// `Mutex`.

use crate::config::SessionConfig;
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use osd_core::reg::{
    MOD_CS, MOD_CS_ACTIVE_BIT, MOD_EVENT_DEST, MOD_TYPE, MOD_VENDOR, MOD_VERSION, SCM_LOCAL_ADDR,
    SCM_MAX_PKT_LEN, SCM_NUM_MOD,
};
use osd_core::{
    diaddr_build, diaddr_subnet, payload_words_for, EventSubtype, ModuleDescriptor, OsdError,
    Packet, PacketType, RegSubtype, RegWidth, Result,
};
use osd_transport::{Frames, Transport, MGMT_DIADDR_REQUEST, MSG_TYPE_DATA, MSG_TYPE_MGMT};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Callback for events of one (module, event class) pair
///
/// Handlers run on the I/O worker thread and must not register or remove
/// handlers themselves.
pub type EventHandler = Box<dyn FnMut(Packet) + Send>;

type HandlerMap = HashMap<(u16, EventSubtype), EventHandler>;

/// Result quality of a bulk operation
#[derive(Debug)]
pub enum Outcome {
    Complete,
    /// Some targets failed; carries an `OsdError::PartialResult`
    Partial(OsdError),
}

impl Outcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, Outcome::Complete)
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            Outcome::Complete => Ok(()),
            Outcome::Partial(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingRequest {
    peer: u16,
    expected: RegSubtype,
    /// `None` for blocking requests
    deadline: Option<Instant>,
}

#[derive(Default)]
struct WorkerShared {
    stop: AtomicBool,
    pending: Mutex<Option<PendingRequest>>,
    failure: Mutex<Option<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct IoWorker {
    shared: Arc<WorkerShared>,
    handle: JoinHandle<()>,
    responses: Receiver<Packet>,
    events: Receiver<Packet>,
}

impl IoWorker {
    fn spawn(
        transport: Arc<dyn Transport>,
        handlers: Arc<Mutex<HandlerMap>>,
        diaddr: u16,
        poll_interval: Duration,
    ) -> Result<Self> {
        let (resp_tx, responses) = unbounded();
        let (event_tx, events) = unbounded();
        let shared = Arc::new(WorkerShared::default());

        let mut router = Router {
            shared: Arc::clone(&shared),
            handlers,
            responses: resp_tx,
            events: event_tx,
            partial: HashMap::new(),
            discarding: HashSet::new(),
        };
        let handle = thread::Builder::new()
            .name(format!("osd-io-{}", diaddr))
            .spawn(move || router.run(transport.as_ref(), poll_interval))?;

        Ok(IoWorker {
            shared,
            handle,
            responses,
            events,
        })
    }

    fn stop(self) {
        self.shared.stop.store(true, Ordering::Release);
        if self.handle.join().is_err() {
            error!("I/O worker panicked");
        }
    }

    /// Error reported to callers once the worker is gone
    fn failure(&self) -> OsdError {
        let reason = lock(&self.shared.failure)
            .clone()
            .unwrap_or_else(|| "I/O worker stopped".to_string());
        OsdError::transport_failure(reason)
    }
}

/// Receive-side packet routing, runs on the I/O worker thread
struct Router {
    shared: Arc<WorkerShared>,
    handlers: Arc<Mutex<HandlerMap>>,
    responses: Sender<Packet>,
    events: Sender<Packet>,
    /// Events under reassembly, keyed by source address
    partial: HashMap<u16, Packet>,
    /// Sources whose current event is dropped up to its EV_LAST
    discarding: HashSet<u16>,
}

impl Router {
    fn run(&mut self, transport: &dyn Transport, poll_interval: Duration) {
        debug!("I/O worker started");
        while !self.shared.stop.load(Ordering::Acquire) {
            match transport.receive(Some(poll_interval)) {
                Ok(Some(frames)) => self.handle_message(frames),
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, "Receiving from host controller failed, stopping I/O worker");
                    *lock(&self.shared.failure) = Some(e.to_string());
                    break;
                }
            }
        }
        debug!("I/O worker stopped");
    }

    fn handle_message(&mut self, frames: Frames) {
        let msg_type = frames.first().map(Vec::as_slice);
        if msg_type == Some(MSG_TYPE_MGMT) {
            debug!(frames = frames.len(), "Ignoring management message");
            return;
        }
        if msg_type != Some(MSG_TYPE_DATA) || frames.len() != 2 {
            warn!(frames = frames.len(), "Dropping message of unknown shape");
            return;
        }

        let pkg = match Packet::from_frame(&frames[1]) {
            Ok(pkg) => pkg,
            Err(e) => {
                warn!(error = %e, "Dropping malformed packet");
                return;
            }
        };
        trace!("Received packet\n{}", pkg);
        self.route(pkg);
    }

    fn route(&mut self, pkg: Packet) {
        match pkg.packet_type() {
            PacketType::Event => {
                if let Some(event) = self.reassemble(pkg) {
                    self.deliver_event(event);
                }
            }
            PacketType::Reg if pkg.reg_subtype().map_or(false, RegSubtype::is_response) => {
                self.route_response(pkg)
            }
            _ => self.enqueue(pkg),
        }
    }

    fn route_response(&self, pkg: Packet) {
        let pending = *lock(&self.shared.pending);
        match pending {
            Some(req) if req.peer == pkg.src() => {
                trace!(src = pkg.src(), expected = ?req.expected, "Routing register response");
                let _ = self.responses.send(pkg);
            }
            Some(req) => {
                debug!(src = pkg.src(), pending = req.peer, "Queueing response from another module");
                self.enqueue(pkg);
            }
            None => warn!(
                src = pkg.src(),
                type_sub = pkg.type_sub(),
                "Dropping unsolicited register response"
            ),
        }
    }

    /// Merge EV_CONT packets per source until the closing EV_LAST arrives
    fn reassemble(&mut self, pkg: Packet) -> Option<Packet> {
        let src = pkg.src();
        match pkg.event_subtype() {
            Some(EventSubtype::Cont) => {
                if self.discarding.contains(&src) {
                    return None;
                }
                let merged = match self.partial.remove(&src) {
                    Some(head) => head.combine(&pkg),
                    None => Ok(pkg),
                };
                match merged {
                    Ok(head) => {
                        self.partial.insert(src, head);
                    }
                    Err(e) => {
                        error!(src, error = %e, "Dropping oversized event");
                        self.discarding.insert(src);
                    }
                }
                None
            }
            Some(EventSubtype::Last) => {
                if self.discarding.remove(&src) {
                    debug!(src, "End of dropped event");
                    return None;
                }
                let Some(head) = self.partial.remove(&src) else {
                    return Some(pkg);
                };
                let complete = head.combine(&pkg).and_then(|mut event| {
                    event.set_type_sub(EventSubtype::Last as u8)?;
                    Ok(event)
                });
                match complete {
                    Ok(event) => Some(event),
                    Err(e) => {
                        error!(src, error = %e, "Dropping oversized event");
                        None
                    }
                }
            }
            _ => Some(pkg),
        }
    }

    fn deliver_event(&mut self, pkg: Packet) {
        if let Some(class) = pkg.event_subtype() {
            let mut handlers = lock(&self.handlers);
            if let Some(handler) = handlers.get_mut(&(pkg.src(), class)) {
                handler(pkg);
                return;
            }
        }
        self.enqueue(pkg);
    }

    fn enqueue(&self, pkg: Packet) {
        if self.events.send(pkg).is_err() {
            debug!("Event queue closed, dropping packet");
        }
    }
}

/// A session on the debug interconnect
pub struct HostMod {
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    state: SessionState,
    diaddr: Option<u16>,
    worker: Option<IoWorker>,
    handlers: Arc<Mutex<HandlerMap>>,
    /// Packets taken off the event queue while waiting for one source
    held: VecDeque<Packet>,
    /// Cached maximum event payload per subnet
    max_event_words: HashMap<u16, u32>,
}

impl HostMod {
    pub fn new<T: Transport + 'static>(transport: T, config: SessionConfig) -> Self {
        HostMod {
            transport: Arc::new(transport),
            config,
            state: SessionState::Disconnected,
            diaddr: None,
            worker: None,
            handlers: Arc::new(Mutex::new(HashMap::new())),
            held: VecDeque::new(),
            max_event_words: HashMap::new(),
        }
    }

    /// Create a session configured from the environment
    pub fn with_env_config<T: Transport + 'static>(transport: T) -> Self {
        Self::new(transport, SessionConfig::global().clone())
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// DI address assigned by the host controller
    pub fn diaddr(&self) -> Result<u16> {
        self.diaddr.ok_or(OsdError::NotConnected)
    }

    /// Connect to the host controller and obtain a DI address
    pub fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.state = SessionState::Connecting;
        match self.establish() {
            Ok(diaddr) => {
                self.diaddr = Some(diaddr);
                self.state = SessionState::Connected;
                info!(diaddr, "Connected to host controller");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Connecting to host controller failed");
                self.teardown();
                Err(e)
            }
        }
    }

    fn establish(&mut self) -> Result<u16> {
        let timeout = self.config.receive_timeout;
        let transport = Arc::get_mut(&mut self.transport)
            .ok_or_else(|| OsdError::transport_failure("transport is still in use"))?;
        transport.connect()?;

        self.transport.send(&[MSG_TYPE_MGMT, MGMT_DIADDR_REQUEST])?;
        let reply = self.transport.receive(Some(timeout))?.ok_or_else(|| {
            OsdError::transport_failure(format!(
                "no DI address assigned within {}ms",
                timeout.as_millis()
            ))
        })?;
        let diaddr = parse_diaddr_reply(&reply)?;

        self.worker = Some(IoWorker::spawn(
            Arc::clone(&self.transport),
            Arc::clone(&self.handlers),
            diaddr,
            self.config.poll_interval,
        )?);
        Ok(diaddr)
    }

    /// Stop the I/O worker and close the transport. Idempotent.
    pub fn disconnect(&mut self) {
        if self.state == SessionState::Disconnected {
            return;
        }
        self.state = SessionState::Disconnecting;
        info!(diaddr = ?self.diaddr, "Disconnecting from host controller");
        self.teardown();
    }

    fn teardown(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
        match Arc::get_mut(&mut self.transport) {
            Some(transport) => {
                if let Err(e) = transport.disconnect() {
                    warn!(error = %e, "Closing transport failed");
                }
            }
            None => warn!("Transport still shared, leaving it open"),
        }
        self.diaddr = None;
        self.held.clear();
        self.max_event_words.clear();
        self.state = SessionState::Disconnected;
    }

    /// Tear the session down after errors that leave it unusable
    fn check_fatal<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_session_fatal() && self.is_connected() {
                error!(error = %e, "Session-fatal error, disconnecting");
                self.state = SessionState::Disconnecting;
                self.teardown();
            }
        }
        result
    }

    fn connected_worker(&self) -> Result<&IoWorker> {
        match (&self.worker, self.state) {
            (Some(worker), SessionState::Connected) => Ok(worker),
            _ => Err(OsdError::NotConnected),
        }
    }

    fn timeout_error(&self) -> OsdError {
        OsdError::Timeout {
            duration_ms: self.config.receive_timeout.as_millis() as u64,
        }
    }

    fn send_packet(&self, pkg: &Packet) -> Result<()> {
        trace!("Sending packet\n{}", pkg);
        let frame = pkg.to_frame();
        self.transport.send(&[MSG_TYPE_DATA, frame.as_slice()])?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn request(
        &mut self,
        peer: u16,
        reg_addr: u16,
        subtype: RegSubtype,
        expected: RegSubtype,
        wr_data: &[u16],
        response_words: usize,
        blocking: bool,
    ) -> Result<Packet> {
        let result = self.exchange(
            peer,
            reg_addr,
            subtype,
            expected,
            wr_data,
            response_words,
            blocking,
        );
        self.check_fatal(result)
    }

    #[allow(clippy::too_many_arguments)]
    fn exchange(
        &self,
        peer: u16,
        reg_addr: u16,
        subtype: RegSubtype,
        expected: RegSubtype,
        wr_data: &[u16],
        response_words: usize,
        blocking: bool,
    ) -> Result<Packet> {
        let diaddr = self.diaddr()?;
        let worker = self.connected_worker()?;

        while let Ok(stale) = worker.responses.try_recv() {
            warn!(src = stale.src(), "Discarding stale register response");
        }

        let mut payload = Vec::with_capacity(1 + wr_data.len());
        payload.push(reg_addr);
        payload.extend_from_slice(wr_data);
        let req = Packet::new_reg(peer, diaddr, subtype, payload)?;

        let pending = PendingRequest {
            peer,
            expected,
            deadline: (!blocking).then(|| Instant::now() + self.config.receive_timeout),
        };
        *lock(&worker.shared.pending) = Some(pending);
        let response = self
            .send_packet(&req)
            .and_then(|()| self.await_response(worker, pending.deadline));
        *lock(&worker.shared.pending) = None;
        let response = response?;

        let got = response.reg_subtype().ok_or_else(|| {
            OsdError::protocol_violation(format!("invalid register response {}", response.type_sub()))
        })?;
        let error_subtype = if pending.expected == RegSubtype::RespWriteSuccess {
            RegSubtype::RespWriteError
        } else {
            RegSubtype::RespReadError
        };
        if got == error_subtype {
            return Err(OsdError::DeviceError {
                addr: peer,
                reg_addr,
            });
        }
        if got != pending.expected {
            return Err(OsdError::protocol_violation(format!(
                "module {} answered register {:#06x} with {:?}, expected {:?}",
                peer, reg_addr, got, pending.expected
            )));
        }
        if response.payload().len() != response_words {
            return Err(OsdError::protocol_violation(format!(
                "register response from module {} carries {} words, expected {}",
                peer,
                response.payload().len(),
                response_words
            )));
        }
        Ok(response)
    }

    fn await_response(&self, worker: &IoWorker, deadline: Option<Instant>) -> Result<Packet> {
        match deadline {
            None => worker.responses.recv().map_err(|_| worker.failure()),
            Some(deadline) => worker.responses.recv_deadline(deadline).map_err(|e| match e {
                RecvTimeoutError::Timeout => self.timeout_error(),
                RecvTimeoutError::Disconnected => worker.failure(),
            }),
        }
    }

    /// Read a register of `size_bits` (16, 32, 64 or 128) from module `peer`
    ///
    /// Non-blocking reads fail with `Timeout` after the configured receive
    /// timeout; blocking reads wait indefinitely.
    pub fn reg_read(&mut self, peer: u16, reg_addr: u16, size_bits: u32, blocking: bool) -> Result<u128> {
        let width = RegWidth::from_bits(size_bits)?;
        debug!(peer, reg_addr, size_bits, "Issuing register read");
        let resp = self.request(
            peer,
            reg_addr,
            RegSubtype::read_request(width),
            RegSubtype::read_success(width),
            &[],
            width.words(),
            blocking,
        )?;
        Ok(words_to_value(resp.payload()))
    }

    pub fn reg_write(
        &mut self,
        peer: u16,
        reg_addr: u16,
        value: u128,
        size_bits: u32,
        blocking: bool,
    ) -> Result<()> {
        let width = RegWidth::from_bits(size_bits)?;
        if width.bits() < 128 && value >> width.bits() != 0 {
            return Err(OsdError::invalid_argument(format!(
                "value {:#x} does not fit into a {} bit register",
                value, size_bits
            )));
        }
        let words = value_to_words(value, width);
        debug!(peer, reg_addr, size_bits, value = %format_args!("{:#x}", value), "Issuing register write");
        self.request(
            peer,
            reg_addr,
            RegSubtype::write_request(width),
            RegSubtype::RespWriteSuccess,
            &words,
            0,
            blocking,
        )?;
        Ok(())
    }

    pub fn reg_read16(&mut self, peer: u16, reg_addr: u16) -> Result<u16> {
        Ok(self.reg_read(peer, reg_addr, 16, false)? as u16)
    }

    pub fn reg_write16(&mut self, peer: u16, reg_addr: u16, value: u16) -> Result<()> {
        self.reg_write(peer, reg_addr, value as u128, 16, false)
    }

    /// Set or clear a single register bit
    ///
    /// This is a read followed by a write, not an atomic operation: another
    /// host module writing the same register in between loses its update.
    pub fn reg_setbit(
        &mut self,
        peer: u16,
        reg_addr: u16,
        bit: u32,
        value: bool,
        size_bits: u32,
        blocking: bool,
    ) -> Result<()> {
        let width = RegWidth::from_bits(size_bits)?;
        if bit >= width.bits() {
            return Err(OsdError::invalid_argument(format!(
                "bit {} is outside a {} bit register",
                bit, size_bits
            )));
        }
        let current = self.reg_read(peer, reg_addr, size_bits, blocking)?;
        let updated = if value {
            current | (1u128 << bit)
        } else {
            current & !(1u128 << bit)
        };
        self.reg_write(peer, reg_addr, updated, size_bits, blocking)
    }

    /// Read the identification registers of a debug module
    pub fn mod_describe(&mut self, peer: u16) -> Result<ModuleDescriptor> {
        let vendor = self.reg_read16(peer, MOD_VENDOR)?;
        let module_type = self.reg_read16(peer, MOD_TYPE)?;
        let version = self.reg_read16(peer, MOD_VERSION)?;
        Ok(ModuleDescriptor {
            addr: peer,
            vendor,
            module_type,
            version,
        })
    }

    /// Describe all debug modules of a subnet
    ///
    /// Modules that cannot be described are skipped and reported through a
    /// `Partial` outcome; session-fatal errors abort the enumeration.
    pub fn get_modules(&mut self, subnet: u16) -> Result<(Vec<ModuleDescriptor>, Outcome)> {
        let scm = diaddr_build(subnet, SCM_LOCAL_ADDR)?;
        let num_mod = self.reg_read16(scm, SCM_NUM_MOD)?;
        debug!(subnet, num_mod, "Enumerating debug modules");

        let mut modules = Vec::with_capacity(num_mod as usize);
        let mut failed = Vec::new();
        let mut first_error = None;
        for local in 0..num_mod {
            let addr = diaddr_build(subnet, local)?;
            match self.mod_describe(addr) {
                Ok(desc) => {
                    debug!(module = %desc, "Found debug module");
                    modules.push(desc);
                }
                Err(e) if e.is_session_fatal() => return Err(e),
                Err(e) => {
                    warn!(addr, error = %e, "Unable to describe debug module");
                    failed.push(addr);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        let outcome = match first_error {
            None => Outcome::Complete,
            Some(first) => Outcome::Partial(OsdError::PartialResult {
                failed,
                first: Box::new(first),
            }),
        };
        Ok((modules, outcome))
    }

    /// Direct events of module `peer` to this session
    pub fn set_event_dest(&mut self, peer: u16, blocking: bool) -> Result<()> {
        let diaddr = self.diaddr()?;
        self.reg_write(peer, MOD_EVENT_DEST, diaddr as u128, 16, blocking)
    }

    /// Start or stop event generation of module `peer`
    pub fn set_event_active(&mut self, peer: u16, enabled: bool, blocking: bool) -> Result<()> {
        self.reg_setbit(peer, MOD_CS, MOD_CS_ACTIVE_BIT, enabled, 16, blocking)
    }

    /// Largest event payload (in words) accepted on the subnet of `peer`
    pub fn get_max_event_words(&mut self, peer: u16) -> Result<u32> {
        if let Some(max_pkt_len) = self.config.max_pkt_len_words {
            return event_words_for(max_pkt_len).ok_or_else(|| {
                OsdError::invalid_argument(format!(
                    "configured packet length {} leaves no room for a payload",
                    max_pkt_len
                ))
            });
        }

        let subnet = diaddr_subnet(peer);
        if let Some(&words) = self.max_event_words.get(&subnet) {
            return Ok(words);
        }
        let scm = diaddr_build(subnet, SCM_LOCAL_ADDR)?;
        let max_pkt_len = self.reg_read16(scm, SCM_MAX_PKT_LEN)?;
        let words = event_words_for(max_pkt_len).ok_or_else(|| {
            OsdError::protocol_violation(format!(
                "SCM of subnet {} reports a maximum packet length of {} words",
                subnet, max_pkt_len
            ))
        });
        let words = self.check_fatal(words)?;
        debug!(subnet, words, "Maximum event payload");
        self.max_event_words.insert(subnet, words);
        Ok(words)
    }

    /// Send an event packet; the source address is used as given
    pub fn event_send(&mut self, pkg: &Packet) -> Result<()> {
        if pkg.packet_type() != PacketType::Event {
            return Err(OsdError::invalid_argument(format!(
                "event_send needs an EVENT packet, got {}",
                pkg.packet_type()
            )));
        }
        let result = self.connected_worker().and_then(|_| self.send_packet(pkg));
        self.check_fatal(result)
    }

    /// Take the next packet from the event queue
    ///
    /// Events with a registered handler never reach the queue.
    pub fn event_receive(&mut self, blocking: bool) -> Result<Packet> {
        let result = self.next_event(blocking);
        self.check_fatal(result)
    }

    /// Take the next event packet sent by `src`
    ///
    /// Packets from other sources stay queued, in arrival order, for
    /// [`HostMod::event_receive`].
    pub fn event_receive_from(&mut self, src: u16, blocking: bool) -> Result<Packet> {
        let result = self.next_event_from(src, blocking);
        self.check_fatal(result)
    }

    fn next_event(&mut self, blocking: bool) -> Result<Packet> {
        self.connected_worker()?;
        if let Some(pkg) = self.held.pop_front() {
            return Ok(pkg);
        }
        self.pull_event(self.deadline(blocking))
    }

    fn next_event_from(&mut self, src: u16, blocking: bool) -> Result<Packet> {
        self.connected_worker()?;
        let wanted = |pkg: &Packet| pkg.src() == src && pkg.packet_type() == PacketType::Event;
        let held_pos = self.held.iter().position(wanted);
        if let Some(pkg) = held_pos.and_then(|pos| self.held.remove(pos)) {
            return Ok(pkg);
        }

        let deadline = self.deadline(blocking);
        loop {
            let pkg = self.pull_event(deadline)?;
            if wanted(&pkg) {
                return Ok(pkg);
            }
            debug!(src = pkg.src(), waiting_for = src, "Holding back packet");
            self.held.push_back(pkg);
        }
    }

    fn deadline(&self, blocking: bool) -> Option<Instant> {
        (!blocking).then(|| Instant::now() + self.config.receive_timeout)
    }

    fn pull_event(&self, deadline: Option<Instant>) -> Result<Packet> {
        let worker = self.connected_worker()?;
        match deadline {
            None => worker.events.recv().map_err(|_| worker.failure()),
            Some(deadline) => worker.events.recv_deadline(deadline).map_err(|e| match e {
                RecvTimeoutError::Timeout => self.timeout_error(),
                RecvTimeoutError::Disconnected => worker.failure(),
            }),
        }
    }

    /// Route events of `class` from `module_addr` to `handler`
    ///
    /// Returns the handler previously registered for the same key.
    pub fn register_handler<F>(
        &self,
        module_addr: u16,
        class: EventSubtype,
        handler: F,
    ) -> Option<EventHandler>
    where
        F: FnMut(Packet) + Send + 'static,
    {
        lock(&self.handlers).insert((module_addr, class), Box::new(handler))
    }

    pub fn unregister_handler(&self, module_addr: u16, class: EventSubtype) -> bool {
        lock(&self.handlers).remove(&(module_addr, class)).is_some()
    }
}

impl Drop for HostMod {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn parse_diaddr_reply(reply: &Frames) -> Result<u16> {
    match reply.as_slice() {
        [msg_type, addr] if msg_type.as_slice() == MSG_TYPE_MGMT => std::str::from_utf8(addr)
            .ok()
            .and_then(|s| s.trim_end_matches('\0').trim().parse().ok())
            .ok_or_else(|| {
                OsdError::transport_failure(format!(
                    "invalid DI address {:?}",
                    String::from_utf8_lossy(addr)
                ))
            }),
        _ => Err(OsdError::transport_failure(
            "unexpected reply to the DI address request",
        )),
    }
}

/// Event payload words left by a maximum packet length of `max_pkt_len`
fn event_words_for(max_pkt_len: u16) -> Option<u32> {
    payload_words_for(max_pkt_len as usize)
        .ok()
        .filter(|&words| words > 0)
        .map(|words| words as u32)
}

/// Register words are ordered least significant first
fn words_to_value(words: &[u16]) -> u128 {
    words
        .iter()
        .rev()
        .fold(0, |acc, &word| (acc << 16) | word as u128)
}

fn value_to_words(value: u128, width: RegWidth) -> Vec<u16> {
    (0..width.words())
        .map(|i| (value >> (16 * i)) as u16)
        .collect()
}
