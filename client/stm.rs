// System Trace Module client
//
// Software running on the target writes (id, value) pairs to the STM, which
// forwards them as trace events. Id 4 carries one character of printf-style
// output.
use super::{check_width, payload_mismatch, timestamp, words_to_u64};
use osd::reg::STM_VALWIDTH;
use osd::{EventSubtype, HostMod, Packet, Result, MODULE_TYPE_STD_STM, MODULE_VENDOR_OSD};
use std::fmt;
use tracing::{debug, warn};

pub const STM_PRINT_EVENT_ID: u16 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StmDescriptor {
    pub module_addr: u16,
    pub value_width_bits: u16,
}

impl StmDescriptor {
    /// Verify that `module_addr` is an OSD STM and read its value width
    pub fn read(hostmod: &mut HostMod, module_addr: u16) -> Result<Self> {
        hostmod
            .mod_describe(module_addr)?
            .expect(MODULE_VENDOR_OSD, MODULE_TYPE_STD_STM, 0)?;

        let width = hostmod.reg_read16(module_addr, STM_VALWIDTH)?;
        let desc = StmDescriptor {
            module_addr,
            value_width_bits: check_width(module_addr, "VALWIDTH", width)?,
        };
        debug!(module = module_addr, "{}", desc);
        Ok(desc)
    }

    /// Payload words of a trace event: timestamp, id and value
    pub fn event_payload_words(&self) -> usize {
        (32 + 16 + self.value_width_bits as usize + 15) / 16
    }
}

impl fmt::Display for StmDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "STM at {:#06x}: value width {} bits",
            self.module_addr, self.value_width_bits
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StmTrace {
    pub timestamp: u32,
    pub id: u16,
    pub value: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StmEvent {
    Overflow { lost: u16 },
    Trace(StmTrace),
}

impl StmEvent {
    pub fn decode(desc: &StmDescriptor, pkg: &Packet) -> Result<Self> {
        let payload = pkg.payload();
        if pkg.event_subtype() == Some(EventSubtype::Overflow) {
            return match payload {
                [lost] => Ok(StmEvent::Overflow { lost: *lost }),
                _ => Err(payload_mismatch("STM overflow", payload.len(), 1)),
            };
        }

        let expected = desc.event_payload_words();
        if payload.len() != expected {
            return Err(payload_mismatch("STM", payload.len(), expected));
        }
        Ok(StmEvent::Trace(StmTrace {
            timestamp: timestamp(payload),
            id: payload[2],
            value: words_to_u64(&payload[3..]),
        }))
    }

    pub fn is_print_event(&self) -> bool {
        matches!(self, StmEvent::Trace(t) if t.id == STM_PRINT_EVENT_ID)
    }
}

/// Collects print events into lines
#[derive(Debug, Default)]
pub struct PrintBuffer {
    line: Vec<u8>,
}

impl PrintBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the character of a print event; returns the line it completes
    pub fn push(&mut self, event: &StmEvent) -> Option<String> {
        let StmEvent::Trace(t) = event else {
            return None;
        };
        if t.id != STM_PRINT_EVENT_ID {
            return None;
        }
        let Ok(byte) = u8::try_from(t.value) else {
            warn!(value = t.value, "Print event value is not a character");
            return None;
        };
        if byte == b'\n' {
            let line = String::from_utf8_lossy(&self.line).into_owned();
            self.line.clear();
            return Some(line);
        }
        self.line.push(byte);
        None
    }

    /// Take an unterminated line
    pub fn flush(&mut self) -> Option<String> {
        if self.line.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.line).into_owned();
        self.line.clear();
        Some(line)
    }

    /// Event handler printing the output of one STM line by line
    pub fn into_handler(
        mut self,
        desc: StmDescriptor,
        mut sink: impl FnMut(String) + Send + 'static,
    ) -> impl FnMut(Packet) + Send + 'static {
        move |pkg| match StmEvent::decode(&desc, &pkg) {
            Ok(event) => {
                if let Some(line) = self.push(&event) {
                    sink(line);
                }
            }
            Err(e) => warn!(module = desc.module_addr, "Dropping STM event: {}", e),
        }
    }
}
