// In-process transport: a pair of crossbeam channels
use crate::traits::{Frames, Transport};
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::io::{Error, ErrorKind, Result};
use std::time::Duration;

/// Host side of a loopback connection
pub struct LoopbackTransport {
    to_peer: Sender<Frames>,
    from_peer: Receiver<Frames>,
    connected: bool,
}

/// Device side of a loopback connection, e.g. a simulated host controller
#[derive(Clone)]
pub struct LoopbackPeer {
    to_host: Sender<Frames>,
    from_host: Receiver<Frames>,
}

/// Create a connected host/peer pair
pub fn pair() -> (LoopbackTransport, LoopbackPeer) {
    let (to_peer, from_host) = unbounded();
    let (to_host, from_peer) = unbounded();
    (
        LoopbackTransport {
            to_peer,
            from_peer,
            connected: false,
        },
        LoopbackPeer { to_host, from_host },
    )
}

fn peer_gone() -> Error {
    Error::new(ErrorKind::BrokenPipe, "loopback peer closed")
}

fn recv_with_timeout(rx: &Receiver<Frames>, timeout: Option<Duration>) -> Result<Option<Frames>> {
    match timeout {
        None => rx.recv().map(Some).map_err(|_| peer_gone()),
        Some(t) => match rx.recv_timeout(t) {
            Ok(frames) => Ok(Some(frames)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(peer_gone()),
        },
    }
}

impl Transport for LoopbackTransport {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    fn send(&self, frames: &[&[u8]]) -> Result<()> {
        if !self.connected {
            return Err(Error::new(ErrorKind::NotConnected, "Not connected"));
        }
        let msg = frames.iter().map(|f| f.to_vec()).collect();
        self.to_peer.send(msg).map_err(|_| peer_gone())
    }

    fn receive(&self, timeout: Option<Duration>) -> Result<Option<Frames>> {
        if !self.connected {
            return Err(Error::new(ErrorKind::NotConnected, "Not connected"));
        }
        recv_with_timeout(&self.from_peer, timeout)
    }
}

impl LoopbackPeer {
    pub fn send(&self, frames: Frames) -> Result<()> {
        self.to_host.send(frames).map_err(|_| peer_gone())
    }

    pub fn receive(&self, timeout: Option<Duration>) -> Result<Option<Frames>> {
        recv_with_timeout(&self.from_host, timeout)
    }

    /// Non-blocking receive; `Ok(None)` if nothing is pending
    pub fn try_receive(&self) -> Result<Option<Frames>> {
        match self.from_host.try_recv() {
            Ok(frames) => Ok(Some(frames)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(peer_gone()),
        }
    }
}
