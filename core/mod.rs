// Core module: packet codec, wire constants and types (NO I/O dependencies)
pub mod error;
pub mod packet;
pub mod reg;
pub mod types;

pub use error::*;
pub use packet::*;
pub use types::*;
