// client: protocol clients for the trace debug modules, built on a HostMod session
use osd::{HostMod, OsdError, Result};
use tracing::debug;

pub mod ctm;
pub mod stm;

pub use ctm::{CoreTraceFormatter, CtmDescriptor, CtmEvent, CtmTrace, SymbolTable};
pub use stm::{PrintBuffer, StmDescriptor, StmEvent, StmTrace};

/// Route the events of `module` to this session and enable event generation
pub fn start_tracing(hostmod: &mut HostMod, module: u16) -> Result<()> {
    hostmod.set_event_dest(module, false)?;
    hostmod.set_event_active(module, true, false)?;
    debug!(module, "Tracing started");
    Ok(())
}

/// Disable event generation of `module`
///
/// A module too busy to answer in time is treated as stopped.
pub fn stop_tracing(hostmod: &mut HostMod, module: u16) -> Result<()> {
    match hostmod.set_event_active(module, false, false) {
        Ok(()) | Err(OsdError::Timeout { .. }) => {
            debug!(module, "Tracing stopped");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

// Width registers of trace modules hold 16, 32 or 64
fn check_width(module: u16, register: &str, bits: u16) -> Result<u16> {
    match bits {
        16 | 32 | 64 => Ok(bits),
        _ => Err(OsdError::wrong_module(
            module,
            format!("{} register holds invalid width {}", register, bits),
        )),
    }
}

// Multi-word values are sent least significant word first
fn words_to_u64(words: &[u16]) -> u64 {
    words
        .iter()
        .rev()
        .fold(0, |acc, &word| (acc << 16) | word as u64)
}

fn timestamp(payload: &[u16]) -> u32 {
    (payload[1] as u32) << 16 | payload[0] as u32
}

fn payload_mismatch(module: &str, got: usize, expected: usize) -> OsdError {
    OsdError::protocol_violation(format!(
        "{} event carries {} payload words, expected {}",
        module, got, expected
    ))
}
