/*
*		DP8390 based ISA network card: one device instance.
*
*		Owns the register state of the core and the board logic,
*		routes host port and memory accesses to them, and runs the
*		link state machine.
*/
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::*;

use crate::device::{DeviceConfig, DeviceType, MacAddr, VmState};
use crate::error::{NicError, Result};
use crate::network::net_3c503::{ElGa, Elnk503};
use crate::network::net_dp8390::*;
use crate::network::net_ne2000::{Ne1000, Ne2000};
use crate::network::net_wd8003::{Wd8003, Wd8013, WdCtrl1, WdCtrl2};
use crate::network::{IsaDma, IsaIrq, LinkState, NetworkUp};
use crate::thread::RxSpaceEvent;
use crate::timer::RestoreTimer;
use crate::ui::{LedFlags, StatusLed};

/* Delay between link restore attempts while the guest is not looking. */
const LINK_RESTORE_POSTPONE_MS: u32 = 1500;

/* Longest single sleep in wait_receive_avail. */
const RX_WAIT_SLICE_MS: u32 = 666;

pub(crate) fn oem_variant(device_type: DeviceType) -> Box<dyn OemVariant> {
    match device_type {
        DeviceType::Ne1000 => Box::new(Ne1000),
        DeviceType::Ne2000 => Box::new(Ne2000),
        DeviceType::Wd8003 => Box::new(Wd8003),
        DeviceType::Wd8013 => Box::new(Wd8013),
        DeviceType::Elnk503 => Box::new(Elnk503),
    }
}

/// Everything protected by the device lock.
pub struct DpNicState {
    pub(crate) core: Dp8390Core,
    pub(crate) oem: Box<dyn OemVariant>,
    pub(crate) config: DeviceConfig,
    pub(crate) layout: IoPortLayout,

    pub(crate) prom: [u8; PROM_SIZE],
    pub(crate) local_ram: Box<[u8; MEM_SIZE]>,
    /* Last frame that went through loopback. */
    pub(crate) loop_buf: Vec<u8>,

    /* WD80x3 control registers */
    pub(crate) ctrl1: WdCtrl1,
    pub(crate) ctrl2: WdCtrl2,
    /* 3C503 Gate Array */
    pub(crate) ga: ElGa,

    pub(crate) isa_irq: u8,
    /* Configured DMA channel, if usable. */
    pub(crate) isa_dma: Option<u8>,
    /* Channel the guest selected through IDCFR. */
    pub(crate) el_isa_dma: u8,
    pub(crate) nic_irq_active: bool,

    pub(crate) link_up: bool,
    pub(crate) link_temp_down: bool,
    pub(crate) driver_attached: bool,
    pub(crate) link_down_reported: u32,
    pub(crate) link_restore_postponed: u32,

    pub(crate) led: StatusLed,

    pub(crate) drv: Option<Box<dyn NetworkUp>>,
    pub(crate) irq_line: Box<dyn IsaIrq>,
    pub(crate) dma: Option<Box<dyn IsaDma>>,
    pub(crate) timer: Box<dyn RestoreTimer>,
    pub(crate) rx_event: Arc<RxSpaceEvent>,
}

/// A DP8390 based network card.
///
/// All entry points take the device lock; none of them may be called from
/// inside a collaborator callback.
pub struct Dpnic {
    state: Mutex<DpNicState>,
    rx_event: Arc<RxSpaceEvent>,
}

impl DpNicState {
    pub(crate) fn dpnic_hard_reset(&mut self) {
        self.prom = [0; PROM_SIZE];
        self.oem.build_prom(&self.config.prom_mac(), &mut self.prom);

        if self.oem.device_type() == DeviceType::Elnk503 {
            self.el_hard_reset();
        }

        self.local_ram.fill(0);
        self.core = Dp8390Core::default();
        self.dp8390_core_reset();
    }

    /*
    * Take the link down for a while if it is up, so the guest notices a
    * possibly changed network after a restore or a replumb.
    */
    fn dpnic_temp_link_down(&mut self) {
        if self.link_up {
            self.link_temp_down = true;
            self.link_down_reported = 0;
            self.link_restore_postponed = 0;
            self.led.light(LedFlags::ERROR);
            if let Err(e) = self.timer.set_millis(self.config.link_up_delay_ms) {
                warn!("DPNIC: failed to arm link restore timer: {}", e);
            }
        }
    }

    pub(crate) fn dpnic_timer_restore(&mut self) {
        if self.link_down_reported <= MAX_LINKDOWN_REPORTED
            && self.link_restore_postponed <= MAX_LINKRST_POSTPONED
        {
            /* The guest has not seen the link drop yet. */
            match self.timer.set_millis(LINK_RESTORE_POSTPONE_MS) {
                Ok(()) => {
                    self.link_restore_postponed += 1;
                    debug!(
                        "DPNIC: link restore postponed ({})",
                        self.link_restore_postponed
                    );
                    return;
                }
                Err(e) => warn!("DPNIC: failed to re-arm link restore timer: {}", e),
            }
        }

        self.link_temp_down = false;
        if self.link_up {
            info!("DPNIC: The link is back up again after the restore.");
            self.led.dim(LedFlags::ERROR);
        }
    }

    fn dpnic_set_link_state(&mut self, state: LinkState) -> Result<()> {
        if state == LinkState::DownResume {
            self.dpnic_temp_link_down();
            return Ok(());
        }

        let link_up = state == LinkState::Up;
        if link_up != self.link_up {
            info!(
                "DPNIC: Link is {}",
                if link_up { "up" } else { "down" }
            );
            self.link_up = link_up;
            self.link_down_reported = 0;
            self.link_restore_postponed = 0;
            self.led.light(LedFlags::ERROR);

            if link_up {
                self.link_temp_down = true;
                self.timer.set_millis(self.config.link_up_delay_ms)?;
            }

            if let Some(drv) = self.drv.as_mut() {
                drv.notify_link_changed(state);
            }
        }
        Ok(())
    }

    fn dpnic_link_state(&self) -> LinkState {
        if self.link_up && !self.link_temp_down {
            LinkState::Up
        } else if !self.link_up {
            LinkState::Down
        } else {
            LinkState::DownResume
        }
    }

    fn dpnic_reset(&mut self) {
        if self.link_temp_down {
            self.link_down_reported = 0x1000;
            self.link_restore_postponed = 0x1000;
            self.timer.stop();
            self.dpnic_timer_restore();
        }
        self.dpnic_hard_reset();
    }

    /* Board specific port handlers. */
    fn nic_port_read(&mut self, reg: u8) -> u16 {
        match self.oem.device_type() {
            DeviceType::Ne1000 | DeviceType::Ne2000 => self.ne_io_read(reg),
            DeviceType::Wd8003 | DeviceType::Wd8013 => u16::from(self.wd_io_read(reg)),
            DeviceType::Elnk503 => u16::from(self.el_ga_io_read(reg)),
        }
    }

    fn nic_port_write(&mut self, reg: u8, val: u16) {
        match self.oem.device_type() {
            DeviceType::Ne1000 | DeviceType::Ne2000 => self.ne_io_write(reg, val),
            DeviceType::Wd8003 | DeviceType::Wd8013 => self.wd_io_write(reg, val as u8),
            DeviceType::Elnk503 => self.el_ga_io_write(reg, val as u8),
        }
    }

    fn dpnic_io_read(&mut self, port: u16, size: usize) -> Result<u32> {
        if size != 1 && size != 2 {
            return Err(NicError::UnsupportedAccessSize { port, size });
        }
        let word = size == 2;

        let val = if self.layout.core.contains(&port) {
            let reg = (port - self.layout.core.start) as u8;
            let lo = self.dp8390_core_read(reg);
            let hi = if word && reg < 0x0f {
                self.dp8390_core_read(reg + 1)
            } else {
                0
            };
            make_u16(lo, hi)
        } else if self.layout.nic.contains(&port) {
            let reg = (port - self.layout.nic.start) as u8;
            if word && self.oem.nic_word_io() {
                self.nic_port_read(reg)
            } else {
                let lo = self.nic_port_read(reg) as u8;
                let hi = if word && reg < 0x0f {
                    self.nic_port_read(reg + 1) as u8
                } else {
                    0
                };
                make_u16(lo, hi)
            }
        } else {
            return Err(NicError::UnmappedPort(port));
        };

        trace!("DPNIC: read port {:#x} size {} -> {:#06x}", port, size, val);
        Ok(u32::from(val))
    }

    fn dpnic_io_write(&mut self, port: u16, val: u32, size: usize) -> Result<()> {
        if size != 1 && size != 2 {
            return Err(NicError::UnsupportedAccessSize { port, size });
        }
        let word = size == 2;
        let val = val as u16;
        trace!("DPNIC: write port {:#x} size {} <- {:#06x}", port, size, val);

        if self.layout.core.contains(&port) {
            let reg = (port - self.layout.core.start) as u8;
            self.dp8390_core_write(reg, lo(val));
            if word {
                self.dp8390_core_write(reg + 1, hi(val));
            }
        } else if self.layout.nic.contains(&port) {
            let reg = (port - self.layout.nic.start) as u8;
            if word && self.oem.nic_word_io() {
                self.nic_port_write(reg, val);
            } else {
                self.nic_port_write(reg, u16::from(lo(val)));
                if word {
                    if reg < 0x0f {
                        self.nic_port_write(reg + 1, u16::from(hi(val)));
                    } else {
                        debug!("DPNIC: word write past board ports at {:#x}", port);
                    }
                }
            }
        } else {
            return Err(NicError::UnmappedPort(port));
        }
        Ok(())
    }

    /* Shared memory window offsets covered by an access. */
    fn shared_mem_range(&self, addr: u32, len: usize) -> Result<Range<u32>> {
        let window = self.layout.shared_mem.clone().ok_or(NicError::NoSharedMemory)?;
        let end = addr.checked_add(len as u32).ok_or(NicError::UnmappedMemory(addr))?;

        if addr < window.start || end > window.end {
            return Err(NicError::UnmappedMemory(addr));
        }
        Ok(addr - window.start..end - window.start)
    }

    fn dpnic_mem_read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        let range = self.shared_mem_range(addr, buf.len())?;

        for (off, b) in range.zip(buf.iter_mut()) {
            *b = match self.oem.device_type() {
                DeviceType::Elnk503 => self.el_mem_read(off),
                _ => self.wd_mem_read(off),
            };
        }
        Ok(())
    }

    fn dpnic_mem_write(&mut self, addr: u32, buf: &[u8]) -> Result<()> {
        let range = self.shared_mem_range(addr, buf.len())?;

        for (off, &b) in range.zip(buf.iter()) {
            match self.oem.device_type() {
                DeviceType::Elnk503 => self.el_mem_write(off, b),
                _ => self.wd_mem_write(off, b),
            }
        }
        Ok(())
    }
}

impl Dpnic {
    /// Creates a card and puts it through a hard reset.
    ///
    /// `dma` is only used by the 3C503; `drv` may be attached later.
    pub fn new(
        config: DeviceConfig,
        irq_line: Box<dyn IsaIrq>,
        timer: Box<dyn RestoreTimer>,
        dma: Option<Box<dyn IsaDma>>,
        drv: Option<Box<dyn NetworkUp>>,
    ) -> Result<Self> {
        config.validate()?;

        let oem = oem_variant(config.device_type);
        let layout = oem.io_port_layout(config.io_base, config.mem_base, config.shared_mem_size());
        let isa_dma = config.isa_dma();

        if config.device_type == DeviceType::Elnk503 {
            match isa_dma {
                Some(ch) => info!("3Com503: Enabling 3C503 DMA on channel {}", ch),
                None => info!("3Com503: Disabling 3C503 DMA"),
            }
        }

        let rx_event = Arc::new(RxSpaceEvent::new(VmState::Created));
        let mut state = DpNicState {
            core: Dp8390Core::default(),
            oem,
            layout,
            prom: [0; PROM_SIZE],
            local_ram: Box::new([0; MEM_SIZE]),
            loop_buf: Vec::with_capacity(MAX_FRAME),
            ctrl1: WdCtrl1::empty(),
            ctrl2: WdCtrl2::empty(),
            ga: ElGa::default(),
            isa_irq: config.irq,
            isa_dma,
            el_isa_dma: 0,
            nic_irq_active: false,
            link_up: config.cable_connected,
            link_temp_down: false,
            driver_attached: drv.is_some(),
            link_down_reported: 0,
            link_restore_postponed: 0,
            led: StatusLed::default(),
            drv,
            irq_line,
            dma,
            timer,
            rx_event: Arc::clone(&rx_event),
            config,
        };
        state.dpnic_hard_reset();

        info!(
            "DPNIC: {} at {:#x}, IRQ {}, MAC {}",
            state.config.device_type,
            state.config.io_base,
            state.config.irq,
            state.config.mac
        );
        if let Some(mem) = &state.layout.shared_mem {
            info!("DPNIC: shared memory at {:#x}-{:#x}", mem.start, mem.end - 1);
        }

        Ok(Dpnic {
            state: Mutex::new(state),
            rx_event,
        })
    }

    fn lock(&self) -> MutexGuard<'_, DpNicState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut DpNicState) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn device_type(&self) -> DeviceType {
        self.lock().config.device_type
    }

    /// Ports and memory the card decodes.
    pub fn io_port_layout(&self) -> IoPortLayout {
        self.lock().layout.clone()
    }

    /// Port read of `size` bytes (1 or 2).
    pub fn io_port_read(&self, port: u16, size: usize) -> Result<u32> {
        self.lock().dpnic_io_read(port, size)
    }

    /// Port write of `size` bytes (1 or 2).
    pub fn io_port_write(&self, port: u16, val: u32, size: usize) -> Result<()> {
        self.lock().dpnic_io_write(port, val, size)
    }

    /// Read from the shared memory window (WD80x3, 3C503).
    pub fn mem_read(&self, addr: u32, buf: &mut [u8]) -> Result<()> {
        self.lock().dpnic_mem_read(addr, buf)
    }

    /// Write to the shared memory window (WD80x3, 3C503).
    pub fn mem_write(&self, addr: u32, buf: &[u8]) -> Result<()> {
        self.lock().dpnic_mem_write(addr, buf)
    }

    /// 3C503 DMA channel handler; returns the new position.
    pub fn dma_transfer(&self, channel: u8, pos: u32, len: u32) -> u32 {
        self.lock().el_dma_transfer(channel, pos, len)
    }

    /// Frame arriving from the network.
    pub fn receive(&self, frame: &[u8]) {
        let mut state = self.lock();

        if frame.len() > 50 {
            state.led.light(LedFlags::READING);
        }
        state.dp8390_receive_locked(frame);
        state.led.dim(LedFlags::READING);
    }

    /// Waits up to `millis` for room in the receive ring. Returns
    /// `Interrupted` if the VM stopped running meanwhile.
    pub fn wait_receive_avail(&self, millis: u32) -> Result<()> {
        if self.lock().dp8390_can_receive() {
            return Ok(());
        }
        /* Don't wait; the frame will be dropped if the ring is full. */
        if millis == 0 {
            return Ok(());
        }

        let mut rc = Err(NicError::Interrupted);
        let mut millis = millis;
        self.rx_event.set_maybe_out_of_space(true);

        while self.rx_event.vm_state().is_running() {
            if self.lock().dp8390_can_receive() {
                rc = Ok(());
                break;
            }
            trace!("DPNIC: waiting {} ms for receive buffer space", millis);
            millis = millis.min(RX_WAIT_SLICE_MS);
            self.rx_event.wait_millis(millis);
        }

        self.rx_event.set_maybe_out_of_space(false);
        rc
    }

    /// The transport has buffers again; retry a deferred transmit.
    pub fn xmit_pending(&self) {
        self.lock().dp8390_xmit_packet();
    }

    /// Link restore timer expired.
    pub fn timer_restore(&self) {
        self.lock().dpnic_timer_restore();
    }

    pub fn link_state(&self) -> LinkState {
        self.lock().dpnic_link_state()
    }

    pub fn set_link_state(&self, state: LinkState) -> Result<()> {
        self.lock().dpnic_set_link_state(state)
    }

    /// Station address from the PROM.
    pub fn mac(&self) -> MacAddr {
        let state = self.lock();
        let mut mac = [0; 6];
        mac.copy_from_slice(&state.prom[..6]);
        MacAddr(mac)
    }

    /// Machine reset.
    pub fn reset(&self) {
        self.lock().dpnic_reset();
    }

    pub fn suspend(&self) {
        self.set_vm_state(VmState::Suspended);
    }

    pub fn power_off(&self) {
        self.set_vm_state(VmState::PoweredOff);
    }

    /// Tracks the VM run state; leaving the running states wakes up a
    /// receiver waiting for buffer space.
    pub fn set_vm_state(&self, vm_state: VmState) {
        self.rx_event.set_vm_state(vm_state);
        if !vm_state.is_running() {
            self.rx_event.signal();
        }
    }

    pub fn attach(&self, drv: Box<dyn NetworkUp>) {
        let mut state = self.lock();
        state.drv = Some(drv);
        state.driver_attached = true;
        /* The network may have changed. */
        state.dpnic_temp_link_down();
    }

    pub fn detach(&self) {
        let mut state = self.lock();
        state.drv = None;
        state.driver_attached = false;
    }

    /// Called after the device state was restored from a saved state.
    pub fn state_loaded(&self) {
        self.lock().dpnic_temp_link_down();
    }

    /// Status LED, LUN #0 only.
    pub fn query_status_led(&self, lun: u32) -> Result<StatusLed> {
        if lun != 0 {
            return Err(NicError::LunNotFound(lun));
        }
        Ok(self.lock().led)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::testing::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn ne_prom_carries_signature() {
        let rig = rig(DeviceType::Ne2000);
        let prom = rig.nic.with_state(|s| s.prom);

        assert_eq!(prom[..6], MAC);
        assert_eq!(prom[0x10..0x16], MAC);
        assert_eq!(prom[0x0e..0x10], *b"WW");
        assert_eq!(prom[0x1e..0x20], *b"BB");
        assert_eq!(rig.nic.mac(), MacAddr(MAC));
    }

    #[test]
    fn rejects_odd_access_sizes_and_foreign_ports() {
        let rig = rig(DeviceType::Ne2000);

        assert!(matches!(
            rig.nic.io_port_read(0x300, 4),
            Err(NicError::UnsupportedAccessSize { port: 0x300, size: 4 })
        ));
        assert!(matches!(
            rig.nic.io_port_write(0x300, 0, 0),
            Err(NicError::UnsupportedAccessSize { .. })
        ));
        assert!(matches!(
            rig.nic.io_port_read(0x2ff, 1),
            Err(NicError::UnmappedPort(0x2ff))
        ));
        assert!(matches!(
            rig.nic.mem_read(0xd0000, &mut [0; 4]),
            Err(NicError::NoSharedMemory)
        ));
    }

    #[test]
    fn status_led_only_on_lun_zero() {
        let rig = rig(DeviceType::Ne2000);

        assert!(rig.nic.query_status_led(0).is_ok());
        assert!(matches!(
            rig.nic.query_status_led(1),
            Err(NicError::LunNotFound(1))
        ));
    }

    #[test]
    fn link_comes_back_after_delay() {
        let rig = rig(DeviceType::Ne2000);
        rig.nic.set_link_state(LinkState::Down).unwrap();
        assert_eq!(rig.nic.link_state(), LinkState::Down);
        assert_eq!(rig.host.link_changes(), vec![LinkState::Down]);

        rig.nic.set_link_state(LinkState::Up).unwrap();
        assert_eq!(rig.nic.link_state(), LinkState::DownResume);
        assert_eq!(rig.timer.take(), Some(crate::device::LINK_UP_DELAY_DEFAULT));
        assert!(rig
            .nic
            .query_status_led(0)
            .unwrap()
            .actual
            .contains(LedFlags::ERROR));

        /* Nobody tried to transmit, so the restore gets postponed. */
        for _ in 0..=MAX_LINKRST_POSTPONED {
            rig.nic.timer_restore();
            assert_eq!(rig.timer.take(), Some(LINK_RESTORE_POSTPONE_MS));
            assert_eq!(rig.nic.link_state(), LinkState::DownResume);
        }

        rig.nic.timer_restore();
        assert_eq!(rig.timer.take(), None);
        assert_eq!(rig.nic.link_state(), LinkState::Up);
        assert!(!rig
            .nic
            .query_status_led(0)
            .unwrap()
            .actual
            .contains(LedFlags::ERROR));
        assert_eq!(rig.host.link_changes(), vec![LinkState::Up]);
    }

    #[test]
    fn restore_is_immediate_once_guest_saw_link_down() {
        let rig = rig(DeviceType::Ne2000);
        rig.start(0x46, 0x80, 0x00);
        rig.nic.set_link_state(LinkState::DownResume).unwrap();
        assert_eq!(rig.nic.link_state(), LinkState::DownResume);
        assert!(rig.timer.take().is_some());
        /* DownResume is not reported to the transport. */
        assert!(rig.host.link_changes().is_empty());

        for _ in 0..=MAX_LINKDOWN_REPORTED {
            rig.transmit(0x40, 60);
        }
        rig.nic.timer_restore();
        assert_eq!(rig.timer.take(), None);
        assert_eq!(rig.nic.link_state(), LinkState::Up);
    }

    #[test]
    fn reset_ends_temporary_link_down() {
        let rig = rig(DeviceType::Ne2000);
        rig.nic.state_loaded();
        assert_eq!(rig.nic.link_state(), LinkState::DownResume);

        rig.nic.reset();
        assert_eq!(rig.nic.link_state(), LinkState::Up);
        assert_eq!(rig.timer.armed(), None);
    }

    #[test]
    fn detached_driver_means_link_down() {
        let rig = rig(DeviceType::Ne2000);
        rig.start(0x46, 0x80, 0x00);
        rig.nic.detach();

        rig.nic.receive(&test_frame(MAC, 64));
        assert_eq!(rig.curr(), 0x46);
        rig.transmit(0x40, 60);
        assert_eq!(rig.inb(DPR_P0_TSR), Tsr::COL.bits());

        let (transport, _host) = crate::network::network_queue();
        rig.nic.attach(Box::new(transport));
        assert_eq!(rig.nic.link_state(), LinkState::DownResume);
    }

    #[test]
    fn full_ring_blocks_until_bnry_moves() {
        let rig = Arc::new(rig(DeviceType::Ne2000));
        rig.start(0x40, 0x60, 0x00);
        /* CURR just behind BNRY: 2 pages free. */
        rig.outb(DPR_P0_BNRY, 0x50);
        rig.set_curr(0x4e);
        assert!(rig.nic.with_state(|s| !s.dp8390_can_receive()));

        /* Zero timeout never waits. */
        assert!(rig.nic.wait_receive_avail(0).is_ok());

        let waiter = {
            let rig = Arc::clone(&rig);
            thread::spawn(move || rig.nic.wait_receive_avail(10_000))
        };
        thread::sleep(Duration::from_millis(20));
        rig.outb(DPR_P0_BNRY, 0x5f);

        assert!(waiter.join().unwrap().is_ok());
        assert!(rig.nic.with_state(|s| s.dp8390_can_receive()));
        assert!(!rig.nic.with_state(|s| s.rx_event.maybe_out_of_space()));
    }

    #[test]
    fn suspend_interrupts_receive_wait() {
        let rig = Arc::new(rig(DeviceType::Ne2000));
        rig.start(0x40, 0x60, 0x00);
        rig.outb(DPR_P0_BNRY, 0x50);
        rig.set_curr(0x4f);

        let waiter = {
            let rig = Arc::clone(&rig);
            thread::spawn(move || rig.nic.wait_receive_avail(10_000))
        };
        thread::sleep(Duration::from_millis(20));
        rig.nic.suspend();

        assert!(matches!(waiter.join().unwrap(), Err(NicError::Interrupted)));
    }

    #[test]
    fn small_rings_are_never_throttled() {
        let rig = rig(DeviceType::Ne2000);
        rig.start(0x40, 0x48, 0x00);
        rig.set_curr(0x47);
        rig.outb(DPR_P0_BNRY, 0x47);

        assert!(rig.nic.with_state(|s| s.dp8390_can_receive()));
    }

    #[test]
    fn host_queue_feeds_the_ring() {
        let rig = rig(DeviceType::Ne2000);
        rig.start(0x46, 0x80, 0x00);

        rig.host.network_queue_put(&test_frame(MAC, 64));
        rig.host.network_queue_put(&test_frame(MAC, 64));
        assert_eq!(rig.host.network_rx_queue(&rig.nic, 100).unwrap(), 2);
        assert_eq!(rig.curr(), 0x48);
        assert_eq!(rig.host.rx_pending(), 0);
    }

    #[test]
    fn reading_frames_lights_led() {
        let rig = rig(DeviceType::Ne2000);
        rig.start(0x46, 0x80, 0x00);
        rig.nic.with_state(|s| s.led.take_asserted());

        rig.nic.receive(&test_frame(MAC, 40));
        assert_eq!(rig.nic.with_state(|s| s.led.take_asserted()), LedFlags::empty());
        rig.nic.receive(&test_frame(MAC, 64));
        let led = rig.nic.query_status_led(0).unwrap();
        assert_eq!(led.asserted, LedFlags::READING);
        assert_eq!(led.actual, LedFlags::empty());
    }
}
