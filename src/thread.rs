use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use crate::device::VmState;
use crossbeam_channel::{Receiver, Sender};

/// Auto-reset event used to wake a thread waiting for receive buffer space.
///
/// Lives outside the device lock: the waiter sleeps on it without holding
/// the lock, the device side only ever signals it.
pub struct RxSpaceEvent {
    signal: Sender<()>,
    wait: Receiver<()>,
    maybe_out_of_space: AtomicBool,
    vm_state: AtomicU8,
}

impl RxSpaceEvent {
    pub fn new(vm_state: VmState) -> Self {
        let (signal, wait) = crossbeam_channel::bounded(1);

        RxSpaceEvent {
            signal,
            wait,
            maybe_out_of_space: AtomicBool::new(false),
            vm_state: AtomicU8::new(vm_state as u8),
        }
    }

    /// Posts the event; a pending post is not duplicated.
    pub fn signal(&self) {
        let _ = self.signal.try_send(());
    }

    /// Returns true if the event was posted before the timeout expired.
    pub fn wait_millis(&self, millis: u32) -> bool {
        self.wait
            .recv_timeout(Duration::from_millis(u64::from(millis)))
            .is_ok()
    }

    pub fn set_maybe_out_of_space(&self, value: bool) -> bool {
        self.maybe_out_of_space.swap(value, Ordering::AcqRel)
    }

    pub fn maybe_out_of_space(&self) -> bool {
        self.maybe_out_of_space.load(Ordering::Acquire)
    }

    pub fn vm_state(&self) -> VmState {
        VmState::from_u8(self.vm_state.load(Ordering::Acquire))
    }

    pub fn set_vm_state(&self, state: VmState) {
        self.vm_state.store(state as u8, Ordering::Release);
    }
}
