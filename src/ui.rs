use bitflags::bitflags;

// ui.h

bitflags! {
    /// Activity bits of the network status icon.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LedFlags: u32 {
        const READING = 1 << 0;
        const WRITING = 1 << 1;
        const ERROR = 1 << 2;
    }
}

/// Status LED of the NIC (LUN #0).
///
/// `asserted` latches every bit ever lit until the status bar consumes it,
/// `actual` is the current level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusLed {
    pub asserted: LedFlags,
    pub actual: LedFlags,
}

impl StatusLed {
    /// Lights `flags` in both the latched and current state.
    pub fn light(&mut self, flags: LedFlags) {
        self.asserted |= flags;
        self.actual |= flags;
    }

    /// Turns `flags` off in the current state only.
    pub fn dim(&mut self, flags: LedFlags) {
        self.actual.remove(flags);
    }

    /// Returns and clears the latched bits.
    pub fn take_asserted(&mut self) -> LedFlags {
        std::mem::take(&mut self.asserted)
    }
}
