// Host-side library for the Open SoC Debug interconnect
//
// A `HostMod` session connects to the host controller through a `Transport`
// and talks to the debug modules of the target. The `mam` and `scm` modules
// implement the memory access and subnet control protocols on top of it.
pub mod config;
pub mod hostmod;
pub mod mam;
pub mod scm;

pub use config::SessionConfig;
pub use hostmod::{EventHandler, HostMod, Outcome, SessionState};
pub use mam::{MemoryDescriptor, Region};
pub use scm::SubnetInfo;

pub use osd_core::*;
pub use osd_transport::{LoopbackPeer, LoopbackTransport, Transport};
