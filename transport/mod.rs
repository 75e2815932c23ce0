// Transport module: abstract message transport plus an in-process loopback
pub mod loopback;
pub mod traits;

pub use loopback::{pair, LoopbackPeer, LoopbackTransport};
pub use traits::*;
