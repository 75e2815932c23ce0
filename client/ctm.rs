// Core Trace Module client
//
// A CTM observes the program counter of a CPU core and emits one event per
// control flow change. Combined with a symbol table the events describe
// function entries and exits.
use super::{check_width, payload_mismatch, timestamp, words_to_u64};
use osd::reg::{CTM_ADDR_WIDTH, CTM_DATA_WIDTH};
use osd::{EventSubtype, HostMod, Packet, Result, MODULE_TYPE_STD_CTM, MODULE_VENDOR_OSD};
use std::fmt;
use tracing::{debug, warn};

/// Widths of a core trace module, read from its registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CtmDescriptor {
    pub module_addr: u16,
    pub addr_width_bits: u16,
    pub data_width_bits: u16,
}

impl CtmDescriptor {
    /// Verify that `module_addr` is an OSD CTM and read its widths
    pub fn read(hostmod: &mut HostMod, module_addr: u16) -> Result<Self> {
        hostmod
            .mod_describe(module_addr)?
            .expect(MODULE_VENDOR_OSD, MODULE_TYPE_STD_CTM, 0)?;

        let addr_width = hostmod.reg_read16(module_addr, CTM_ADDR_WIDTH)?;
        let data_width = hostmod.reg_read16(module_addr, CTM_DATA_WIDTH)?;
        let desc = CtmDescriptor {
            module_addr,
            addr_width_bits: check_width(module_addr, "ADDR_WIDTH", addr_width)?,
            data_width_bits: check_width(module_addr, "DATA_WIDTH", data_width)?,
        };
        debug!(module = module_addr, "{}", desc);
        Ok(desc)
    }

    fn addr_words(&self) -> usize {
        self.addr_width_bits as usize / 16
    }

    /// Payload words of a trace event: timestamp, npc, pc and 5 flag bits
    pub fn event_payload_words(&self) -> usize {
        (32 + 2 * self.addr_width_bits as usize + 5 + 15) / 16
    }
}

impl fmt::Display for CtmDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CTM at {:#06x}: address width {} bits, data width {} bits",
            self.module_addr, self.addr_width_bits, self.data_width_bits
        )
    }
}

/// A single control flow change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CtmTrace {
    pub timestamp: u32,
    /// Program counter after the change
    pub npc: u64,
    /// Program counter before the change
    pub pc: u64,
    pub mode: u8,
    pub is_ret: bool,
    pub is_call: bool,
    pub is_modechange: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtmEvent {
    /// The module dropped `lost` events
    Overflow { lost: u16 },
    Trace(CtmTrace),
}

impl CtmEvent {
    pub fn decode(desc: &CtmDescriptor, pkg: &Packet) -> Result<Self> {
        let payload = pkg.payload();
        if pkg.event_subtype() == Some(EventSubtype::Overflow) {
            return match payload {
                [lost] => Ok(CtmEvent::Overflow { lost: *lost }),
                _ => Err(payload_mismatch("CTM overflow", payload.len(), 1)),
            };
        }

        let expected = desc.event_payload_words();
        if payload.len() != expected {
            return Err(payload_mismatch("CTM", payload.len(), expected));
        }
        let aw = desc.addr_words();
        let flags = payload[2 + 2 * aw];
        Ok(CtmEvent::Trace(CtmTrace {
            timestamp: timestamp(payload),
            npc: words_to_u64(&payload[2..2 + aw]),
            pc: words_to_u64(&payload[2 + aw..2 + 2 * aw]),
            mode: (flags & 0b11) as u8,
            is_ret: flags & (1 << 2) != 0,
            is_call: flags & (1 << 3) != 0,
            is_modechange: flags & (1 << 4) != 0,
        }))
    }
}

/// Function symbols sorted by start address
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: Vec<(u64, String)>,
}

impl SymbolTable {
    /// Build a table; of several symbols at one address the first is kept
    pub fn new<S: Into<String>>(symbols: impl IntoIterator<Item = (u64, S)>) -> Self {
        let mut symbols: Vec<(u64, String)> = symbols
            .into_iter()
            .map(|(addr, name)| (addr, name.into()))
            .collect();
        symbols.sort_by_key(|(addr, _)| *addr);
        symbols.dedup_by_key(|(addr, _)| *addr);
        SymbolTable { symbols }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    fn index_of(&self, addr: u64) -> Option<usize> {
        self.symbols
            .partition_point(|(start, _)| *start <= addr)
            .checked_sub(1)
    }

    /// Symbol with the greatest start address not above `addr`
    pub fn lookup(&self, addr: u64) -> Option<&str> {
        self.index_of(addr).map(|i| self.symbols[i].1.as_str())
    }

    /// Symbol starting exactly at `addr`
    pub fn exact(&self, addr: u64) -> Option<&str> {
        self.symbols
            .binary_search_by_key(&addr, |(start, _)| *start)
            .ok()
            .map(|i| self.symbols[i].1.as_str())
    }
}

/// Turns CTM events into human readable trace lines
#[derive(Debug, Clone, Default)]
pub struct CoreTraceFormatter {
    symbols: SymbolTable,
}

impl CoreTraceFormatter {
    pub fn new(symbols: SymbolTable) -> Self {
        CoreTraceFormatter { symbols }
    }

    /// Format one event; `None` if the event yields no line
    ///
    /// Without symbols every trace event is printed raw. With symbols only
    /// mode changes, calls into known functions and returns that leave a
    /// function are printed.
    pub fn format(&self, event: &CtmEvent) -> Option<String> {
        let t = match event {
            CtmEvent::Overflow { lost } => return Some(format!("Overflow, missed {} events", lost)),
            CtmEvent::Trace(t) => t,
        };

        if self.symbols.is_empty() {
            return Some(format!(
                "{:08x} {} {} {} {} {:016x} {:016x}",
                t.timestamp,
                t.is_modechange as u8,
                t.is_call as u8,
                t.is_ret as u8,
                t.mode,
                t.pc,
                t.npc
            ));
        }

        if t.is_modechange {
            return Some(format!("{:08x} change mode to {}", t.timestamp, t.mode));
        }
        if t.is_call || t.is_ret {
            if let Some(name) = self.symbols.exact(t.npc) {
                return Some(format!("{:08x} enter {}", t.timestamp, name));
            }
        }
        if t.is_ret {
            let to = self.symbols.index_of(t.npc);
            if let Some(from) = self.symbols.index_of(t.pc) {
                if Some(from) != to {
                    return Some(format!("{:08x} leave {}", t.timestamp, self.symbols.symbols[from].1));
                }
            }
        }
        None
    }

    /// Event handler decoding and formatting the packets of one CTM
    ///
    /// Register the result with `HostMod::register_handler` for the module's
    /// `Last` events, and a second one built from a clone for `Overflow`.
    /// Lines are passed to `sink`.
    pub fn into_handler(
        self,
        desc: CtmDescriptor,
        mut sink: impl FnMut(String) + Send + 'static,
    ) -> impl FnMut(Packet) + Send + 'static {
        move |pkg| match CtmEvent::decode(&desc, &pkg) {
            Ok(event) => {
                if let Some(line) = self.format(&event) {
                    sink(line);
                }
            }
            Err(e) => warn!(module = desc.module_addr, "Dropping CTM event: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osd::OsdError;

    fn desc(aw: u16) -> CtmDescriptor {
        CtmDescriptor {
            module_addr: 5,
            addr_width_bits: aw,
            data_width_bits: 32,
        }
    }

    fn trace_packet(payload: Vec<u16>) -> Packet {
        Packet::new_event(0x0400, 5, EventSubtype::Last, payload).unwrap()
    }

    fn trace(npc: u64, pc: u64, flags: u8) -> CtmEvent {
        CtmEvent::Trace(CtmTrace {
            timestamp: 0x10,
            npc,
            pc,
            mode: flags & 0b11,
            is_ret: flags & 0b100 != 0,
            is_call: flags & 0b1000 != 0,
            is_modechange: flags & 0b1_0000 != 0,
        })
    }

    fn symbols() -> SymbolTable {
        SymbolTable::new([(0x200, "bar"), (0x100, "foo"), (0x300, "baz")])
    }

    #[test]
    fn payload_length_per_address_width() {
        assert_eq!(desc(16).event_payload_words(), 5);
        assert_eq!(desc(32).event_payload_words(), 7);
        assert_eq!(desc(64).event_payload_words(), 11);
    }

    #[test]
    fn decode_trace_event() {
        let pkg = trace_packet(vec![0x5678, 0x1234, 0x0104, 0x0000, 0x00f0, 0x0000, 0b1_1001]);
        assert_eq!(
            CtmEvent::decode(&desc(32), &pkg).unwrap(),
            CtmEvent::Trace(CtmTrace {
                timestamp: 0x1234_5678,
                npc: 0x104,
                pc: 0xf0,
                mode: 1,
                is_ret: false,
                is_call: true,
                is_modechange: true,
            })
        );
    }

    #[test]
    fn decode_overflow_and_bad_lengths() {
        let overflow = Packet::new_event(0x0400, 5, EventSubtype::Overflow, vec![12]).unwrap();
        assert_eq!(
            CtmEvent::decode(&desc(32), &overflow).unwrap(),
            CtmEvent::Overflow { lost: 12 }
        );

        let long_overflow = Packet::new_event(0x0400, 5, EventSubtype::Overflow, vec![1, 2]).unwrap();
        assert!(matches!(
            CtmEvent::decode(&desc(32), &long_overflow),
            Err(OsdError::ProtocolViolation { .. })
        ));
        assert!(matches!(
            CtmEvent::decode(&desc(32), &trace_packet(vec![0; 5])),
            Err(OsdError::ProtocolViolation { .. })
        ));
    }

    #[test]
    fn symbol_lookup() {
        let table = symbols();
        assert_eq!(table.len(), 3);
        assert_eq!(table.lookup(0x50), None);
        assert_eq!(table.lookup(0x100), Some("foo"));
        assert_eq!(table.lookup(0x1ff), Some("foo"));
        assert_eq!(table.lookup(0x1000), Some("baz"));
        assert_eq!(table.exact(0x200), Some("bar"));
        assert_eq!(table.exact(0x204), None);
    }

    #[test]
    fn raw_lines_without_symbols() {
        let fmt = CoreTraceFormatter::default();
        assert_eq!(
            fmt.format(&trace(0x200, 0x104, 0b1001)).unwrap(),
            "00000010 0 1 0 1 0000000000000104 0000000000000200"
        );
        assert_eq!(
            fmt.format(&CtmEvent::Overflow { lost: 3 }).unwrap(),
            "Overflow, missed 3 events"
        );
    }

    #[test]
    fn symbolic_lines() {
        let fmt = CoreTraceFormatter::new(symbols());
        assert_eq!(fmt.format(&trace(0x200, 0x104, 0b1000)).unwrap(), "00000010 enter bar");
        assert_eq!(fmt.format(&trace(0x208, 0x104, 0b1000)), None);
        assert_eq!(fmt.format(&trace(0x108, 0x20c, 0b100)).unwrap(), "00000010 leave bar");
        assert_eq!(fmt.format(&trace(0x204, 0x20c, 0b100)), None);
        assert_eq!(
            fmt.format(&trace(0, 0, 0b1_0011)).unwrap(),
            "00000010 change mode to 3"
        );
    }

    #[test]
    fn handler_formats_packets() {
        let lines = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = std::sync::Arc::clone(&lines);
        let mut handler = CoreTraceFormatter::new(symbols())
            .into_handler(desc(16), move |line| sink.lock().unwrap().push(line));

        handler(trace_packet(vec![0x20, 0, 0x300, 0x104, 0b1000]));
        handler(trace_packet(vec![0; 3]));
        assert_eq!(*lines.lock().unwrap(), vec!["00000020 enter baz".to_string()]);
    }
}
