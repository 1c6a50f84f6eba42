pub mod network;

pub mod device;
pub mod error;
pub mod thread;
pub mod timer;
pub mod ui;

pub use error::{NicError, Result};
pub use network::Dpnic;

pub mod prelude {
    pub use crate::device::*;
    pub use crate::error::*;
    pub use crate::network::{
        network_queue, IsaDma, IsaIrq, LinkState, NetworkUp, Packet, QueueHost, QueueTransport,
        XmitError,
    };
    pub use crate::thread::*;
    pub use crate::timer::*;
    pub use crate::ui::*;

    pub use crate::Dpnic;
}
