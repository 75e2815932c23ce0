// Transport abstraction - allows pluggable message-oriented backends
use std::io::Result;
use std::time::Duration;

/// One transport message, made of one or more frames
pub type Frames = Vec<Vec<u8>>;

/// First frame of a message carrying a packet
pub const MSG_TYPE_DATA: &[u8] = b"D";
/// First frame of a management message
pub const MSG_TYPE_MGMT: &[u8] = b"M";
/// Management request for a DI address, answered with the decimal address
pub const MGMT_DIADDR_REQUEST: &[u8] = b"DIADDR_REQUEST";

/// Connection to a debug host controller (dealer side)
///
/// Messages between the two ends must arrive complete and in order.
/// `send` and `receive` take `&self` so one thread can block in `receive`
/// while others send.
pub trait Transport: Send + Sync {
    fn connect(&mut self) -> Result<()>;
    fn disconnect(&mut self) -> Result<()>;
    fn send(&self, frames: &[&[u8]]) -> Result<()>;
    /// Wait for the next message; `Ok(None)` when `timeout` expires first.
    /// `None` waits indefinitely.
    fn receive(&self, timeout: Option<Duration>) -> Result<Option<Frames>>;
}
