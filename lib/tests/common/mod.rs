// Simulated debug system behind a loopback transport
//
// Subnet 0 holds an SCM (local 0), a MAM with 4 KiB of memory (local 1), an
// STM (local 2) and a CTM (local 3). The host module is assigned HOST_DIADDR
// in subnet 1. Shared with the trace client tests of osd-client.
#![allow(dead_code)]

use osd::mam::packetize_transfer;
use osd::reg::*;
use osd::{
    EventSubtype, HostMod, Packet, PacketType, RegSubtype, SessionConfig, MODULE_TYPE_STD_CTM,
    MODULE_TYPE_STD_MAM, MODULE_TYPE_STD_SCM, MODULE_TYPE_STD_STM, MODULE_VENDOR_OSD,
};
use osd_transport::{pair, Frames, LoopbackPeer, MGMT_DIADDR_REQUEST, MSG_TYPE_DATA, MSG_TYPE_MGMT};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const HOST_DIADDR: u16 = 0x0403;
pub const SCM: u16 = 0;
pub const MAM: u16 = 1;
pub const STM: u16 = 2;
pub const CTM: u16 = 3;
pub const MAM_BASE: u64 = 0x8000_0000;
pub const MAM_SIZE: usize = 4096;
pub const MAX_PKT_LEN: u16 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRecord {
    pub write: bool,
    pub burst: bool,
    pub sync: bool,
    pub selsize: u8,
    pub addr: u64,
}

struct SimState {
    regs: HashMap<(u16, u16), u16>,
    /// Modules answering every access with an error response
    failing: HashSet<u16>,
    /// Modules that never answer
    silent: HashSet<u16>,
    /// Modules answering reads with a write response
    confused: HashSet<u16>,
    memory: Vec<u8>,
    pending_transfer: Vec<u8>,
    transfers: Vec<TransferRecord>,
    events: Vec<Packet>,
}

impl SimState {
    fn new() -> Self {
        let mut regs = HashMap::new();
        for (addr, module_type) in [
            (SCM, MODULE_TYPE_STD_SCM),
            (MAM, MODULE_TYPE_STD_MAM),
            (STM, MODULE_TYPE_STD_STM),
            (CTM, MODULE_TYPE_STD_CTM),
        ] {
            regs.insert((addr, MOD_VENDOR), MODULE_VENDOR_OSD);
            regs.insert((addr, MOD_TYPE), module_type);
            regs.insert((addr, MOD_VERSION), 0);
            regs.insert((addr, MOD_CS), 0);
            regs.insert((addr, MOD_EVENT_DEST), 0);
        }
        regs.insert((SCM, SCM_SYSTEM_VENDOR_ID), 0x0002);
        regs.insert((SCM, SCM_SYSTEM_DEVICE_ID), 0x0042);
        regs.insert((SCM, SCM_NUM_MOD), 4);
        regs.insert((SCM, SCM_MAX_PKT_LEN), MAX_PKT_LEN);
        regs.insert((SCM, SCM_SYSRST), 0);

        regs.insert((MAM, MAM_AW), 32);
        regs.insert((MAM, MAM_DW), 32);
        regs.insert((MAM, MAM_REGIONS), 1);
        let size = MAM_SIZE as u64;
        for w in 0..4 {
            regs.insert((MAM, mam_region_baseaddr(0, w)), (MAM_BASE >> (16 * w)) as u16);
            regs.insert((MAM, mam_region_memsize(0, w)), (size >> (16 * w)) as u16);
        }

        regs.insert((STM, STM_VALWIDTH), 32);
        regs.insert((CTM, CTM_ADDR_WIDTH), 32);
        regs.insert((CTM, CTM_DATA_WIDTH), 32);

        SimState {
            regs,
            failing: HashSet::new(),
            silent: HashSet::new(),
            confused: HashSet::new(),
            memory: vec![0; MAM_SIZE],
            pending_transfer: Vec::new(),
            transfers: Vec::new(),
            events: Vec::new(),
        }
    }

    fn handle(&mut self, frames: &Frames) -> Vec<Frames> {
        if frames[0] == MSG_TYPE_MGMT && frames[1] == MGMT_DIADDR_REQUEST {
            return vec![vec![MSG_TYPE_MGMT.to_vec(), HOST_DIADDR.to_string().into_bytes()]];
        }
        let pkg = Packet::from_frame(&frames[1]).unwrap();
        let replies = match pkg.packet_type() {
            PacketType::Reg => self.handle_reg(&pkg),
            PacketType::Event => self.handle_event(pkg),
            _ => vec![],
        };
        replies
            .iter()
            .map(|p| vec![MSG_TYPE_DATA.to_vec(), p.to_frame()])
            .collect()
    }

    fn handle_reg(&mut self, req: &Packet) -> Vec<Packet> {
        let addr = req.dest();
        let reg = req.payload()[0];
        if self.silent.contains(&addr) {
            return vec![];
        }
        let code = req.type_sub();
        let (subtype, payload) = if self.confused.contains(&addr) {
            (RegSubtype::RespWriteSuccess, vec![])
        } else if code < 4 {
            match self.regs.get(&(addr, reg)) {
                Some(&value) if !self.failing.contains(&addr) => {
                    let mut words = vec![0; 1 << code];
                    words[0] = value;
                    (RegSubtype::from_u8(code | 0b1000).unwrap(), words)
                }
                _ => (RegSubtype::RespReadError, vec![]),
            }
        } else if self.failing.contains(&addr) {
            (RegSubtype::RespWriteError, vec![])
        } else {
            self.regs.insert((addr, reg), req.payload()[1]);
            (RegSubtype::RespWriteSuccess, vec![])
        };
        vec![Packet::new_reg(req.src(), addr, subtype, payload).unwrap()]
    }

    fn handle_event(&mut self, pkg: Packet) -> Vec<Packet> {
        if pkg.dest() != MAM {
            self.events.push(pkg);
            return vec![];
        }
        self.pending_transfer
            .extend(pkg.payload().iter().flat_map(|w| w.to_be_bytes()));
        if pkg.event_subtype() != Some(EventSubtype::Last) {
            return vec![];
        }
        let transfer = std::mem::take(&mut self.pending_transfer);
        self.execute_transfer(&transfer, pkg.src())
    }

    fn execute_transfer(&mut self, t: &[u8], host: u16) -> Vec<Packet> {
        let aw = self.regs[&(MAM, MAM_AW)] as usize / 8;
        let dw = self.regs[&(MAM, MAM_DW)] as usize / 8;
        let record = TransferRecord {
            write: t[0] & 0x80 != 0,
            burst: t[0] & 0x40 != 0,
            sync: t[0] & 0x20 != 0,
            selsize: t[1],
            addr: t[2..2 + aw].iter().fold(0u64, |acc, &b| acc << 8 | b as u64),
        };
        self.transfers.push(record);

        let offset = (record.addr - MAM_BASE) as usize;
        let len = if record.burst { record.selsize as usize * dw } else { dw };
        if record.write {
            let data = &t[2 + aw..2 + aw + len];
            if record.burst {
                self.memory[offset..offset + len].copy_from_slice(data);
            } else {
                for lane in 0..dw {
                    if record.selsize & (1 << lane) != 0 {
                        self.memory[offset + lane] = data[lane];
                    }
                }
            }
            if record.sync {
                return vec![Packet::new_event(host, MAM, EventSubtype::Last, vec![]).unwrap()];
            }
            vec![]
        } else {
            let max_words = self.regs[&(SCM, SCM_MAX_PKT_LEN)] as usize - 3;
            let data = self.memory[offset..offset + len].to_vec();
            packetize_transfer(&data, host, MAM, max_words).unwrap()
        }
    }
}

pub struct SimDevice {
    peer: LoopbackPeer,
    state: Arc<Mutex<SimState>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SimDevice {
    pub fn start(peer: LoopbackPeer) -> Self {
        let state = Arc::new(Mutex::new(SimState::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let (peer, state, stop) = (peer.clone(), Arc::clone(&state), Arc::clone(&stop));
            thread::spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    let frames = match peer.receive(Some(Duration::from_millis(10))) {
                        Ok(Some(frames)) => frames,
                        Ok(None) => continue,
                        Err(_) => break,
                    };
                    let replies = state.lock().unwrap().handle(&frames);
                    for reply in replies {
                        if peer.send(reply).is_err() {
                            return;
                        }
                    }
                }
            })
        };
        SimDevice {
            peer,
            state,
            stop,
            handle: Some(handle),
        }
    }

    pub fn reg(&self, addr: u16, reg: u16) -> Option<u16> {
        self.state.lock().unwrap().regs.get(&(addr, reg)).copied()
    }

    pub fn set_reg(&self, addr: u16, reg: u16, value: u16) {
        self.state.lock().unwrap().regs.insert((addr, reg), value);
    }

    pub fn fail_module(&self, addr: u16) {
        self.state.lock().unwrap().failing.insert(addr);
    }

    pub fn silence_module(&self, addr: u16) {
        self.state.lock().unwrap().silent.insert(addr);
    }

    pub fn confuse_module(&self, addr: u16) {
        self.state.lock().unwrap().confused.insert(addr);
    }

    pub fn memory(&self, offset: usize, len: usize) -> Vec<u8> {
        self.state.lock().unwrap().memory[offset..offset + len].to_vec()
    }

    pub fn fill_memory(&self, offset: usize, data: &[u8]) {
        self.state.lock().unwrap().memory[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn take_transfers(&self) -> Vec<TransferRecord> {
        std::mem::take(&mut self.state.lock().unwrap().transfers)
    }

    pub fn events(&self) -> Vec<Packet> {
        self.state.lock().unwrap().events.clone()
    }

    /// Send a packet to the host as if a debug module emitted it
    pub fn inject(&self, pkg: &Packet) {
        self.peer
            .send(vec![MSG_TYPE_DATA.to_vec(), pkg.to_frame()])
            .unwrap();
    }

    /// Emit an event from debug module `src` to the host
    pub fn emit(&self, src: u16, subtype: EventSubtype, payload: Vec<u16>) {
        self.inject(&Packet::new_event(HOST_DIADDR, src, subtype, payload).unwrap());
    }
}

impl Drop for SimDevice {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub fn test_config() -> SessionConfig {
    SessionConfig::default().with_receive_timeout(Duration::from_millis(200))
}

pub fn connect_with(config: SessionConfig) -> (HostMod, SimDevice) {
    let (transport, peer) = pair();
    let device = SimDevice::start(peer);
    let mut hostmod = HostMod::new(transport, config);
    hostmod.connect().unwrap();
    (hostmod, device)
}

pub fn connect() -> (HostMod, SimDevice) {
    connect_with(test_config())
}

/// Poll `cond` for up to a second
pub fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(1);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Test pattern that differs at every offset of a 256 byte window
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed)).collect()
}
