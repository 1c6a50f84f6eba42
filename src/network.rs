use crossbeam_channel::{Receiver, Sender};
use log::*;
use thiserror::Error;

use crate::error::Result;

pub mod dpnic;
pub mod net_3c503;
pub mod net_dp8390;
pub mod net_ne2000;
pub mod net_wd8003;

#[cfg(test)]
pub(crate) mod testing;

pub use dpnic::Dpnic;

// network.h

/// Link state as seen by the host side of the NIC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Up,
    Down,
    /// Down for a while, comes back up on its own (after a restore or
    /// when the network attachment was changed).
    DownResume,
}

/// Failures reported by the network transport.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum XmitError {
    #[error("transport busy, try again later")]
    TryAgain,
    #[error("network is down")]
    NetDown,
    #[error("no buffer space")]
    NoBufferSpace,
    #[error("out of memory")]
    NoMemory,
}

/// The network transport below the NIC (host backend).
pub trait NetworkUp: Send {
    /// Grabs the transmit path. `TryAgain` defers the frame until the
    /// transport calls `Dpnic::xmit_pending`.
    fn begin_xmit(&mut self) -> std::result::Result<(), XmitError> {
        Ok(())
    }

    /// Hands out a buffer able to hold at least `cb_min` bytes.
    fn alloc_buf(&mut self, cb_min: usize) -> std::result::Result<Vec<u8>, XmitError> {
        Ok(vec![0; cb_min])
    }

    fn send_buf(&mut self, frame: Vec<u8>) -> std::result::Result<(), XmitError>;

    fn end_xmit(&mut self) {}

    fn notify_link_changed(&mut self, _state: LinkState) {}
}

/// ISA interrupt controller.
pub trait IsaIrq: Send {
    fn set_irq(&mut self, irq: u8, level: bool);
}

/// ISA DMA controller, only wired up for the 3C503.
pub trait IsaDma: Send {
    fn set_dreq(&mut self, channel: u8, level: bool);
    /// Asks the controller to run pending transfers. The controller must
    /// not call `Dpnic::dma_transfer` from inside this call.
    fn schedule(&mut self);
    /// Current mode register of `channel`.
    fn channel_mode(&self, channel: u8) -> u8;
    /// Device to memory; returns the number of bytes moved.
    fn write_memory(&mut self, channel: u8, buf: &[u8], pos: u32) -> u32;
    /// Memory to device; returns the number of bytes moved.
    fn read_memory(&mut self, channel: u8, buf: &mut [u8], pos: u32) -> u32;
}

/// One Ethernet frame in flight between the NIC and the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub data: Vec<u8>,
}

impl Packet {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Transport side of a pair of packet queues. Frames the guest sends end
/// up in the host's TX queue.
pub struct QueueTransport {
    tx: Sender<Packet>,
    link: Sender<LinkState>,
}

/// Host side of a pair of packet queues.
pub struct QueueHost {
    tx: Receiver<Packet>,
    rx: (Sender<Packet>, Receiver<Packet>),
    link: Receiver<LinkState>,
}

/// Creates a connected transport/host pair.
pub fn network_queue() -> (QueueTransport, QueueHost) {
    let (tx_send, tx_recv) = crossbeam_channel::unbounded();
    let (link_send, link_recv) = crossbeam_channel::unbounded();

    (
        QueueTransport {
            tx: tx_send,
            link: link_send,
        },
        QueueHost {
            tx: tx_recv,
            rx: crossbeam_channel::unbounded(),
            link: link_recv,
        },
    )
}

impl NetworkUp for QueueTransport {
    fn send_buf(&mut self, frame: Vec<u8>) -> std::result::Result<(), XmitError> {
        trace!("network_tx: {} bytes", frame.len());
        self.tx
            .send(Packet { data: frame })
            .map_err(|_| XmitError::NetDown)
    }

    fn notify_link_changed(&mut self, state: LinkState) {
        let _ = self.link.send(state);
    }
}

impl QueueHost {
    /// Queues a frame for delivery to the NIC.
    pub fn network_queue_put(&self, data: &[u8]) {
        let _ = self.rx.0.send(Packet {
            data: data.to_vec(),
        });
    }

    /// Drops every frame still waiting for the NIC.
    pub fn network_queue_clear(&self) {
        while self.rx.1.try_recv().is_ok() {}
    }

    pub fn rx_pending(&self) -> usize {
        self.rx.1.len()
    }

    /// Next frame the guest transmitted.
    pub fn network_tx(&self) -> Option<Packet> {
        self.tx.try_recv().ok()
    }

    /// Every frame the guest transmitted so far.
    pub fn transmitted(&self) -> Vec<Packet> {
        self.tx.try_iter().collect()
    }

    /// Link state changes reported by the NIC, oldest first.
    pub fn link_changes(&self) -> Vec<LinkState> {
        self.link.try_iter().collect()
    }

    /// Delivers queued frames to the NIC, waiting up to `wait_ms` for ring
    /// space before each one. Returns the number of frames handed over.
    pub fn network_rx_queue(&self, nic: &Dpnic, wait_ms: u32) -> Result<usize> {
        let mut delivered = 0;

        while !self.rx.1.is_empty() {
            nic.wait_receive_avail(wait_ms)?;
            match self.rx.1.try_recv() {
                Ok(pkt) => {
                    nic.receive(&pkt.data);
                    delivered += 1;
                }
                Err(_) => break,
            }
        }

        Ok(delivered)
    }
}
