/*
*		Test harness: a card wired to recording stand-ins for the
*		interrupt controller, the DMA controller, the restore timer and
*		the network transport.
*/
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::device::{DeviceConfig, DeviceType, MacAddr, VmState};
use crate::network::net_dp8390::*;
use crate::network::{network_queue, Dpnic, IsaDma, IsaIrq, NetworkUp, QueueHost, XmitError};
use crate::timer::ManualTimer;

pub(crate) const MAC: [u8; 6] = [0x52, 0x54, 0x00, 0x12, 0x34, 0x56];

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Records every IRQ line change.
#[derive(Debug, Clone, Default)]
pub(crate) struct IrqProbe {
    events: Arc<Mutex<Vec<(u8, bool)>>>,
}

impl IrqProbe {
    pub(crate) fn events(&self) -> Vec<(u8, bool)> {
        locked(&self.events).clone()
    }

    /// Current level of `irq`; lines never touched are low.
    pub(crate) fn level(&self, irq: u8) -> bool {
        locked(&self.events)
            .iter()
            .rev()
            .find(|&&(line, _)| line == irq)
            .map_or(false, |&(_, level)| level)
    }
}

impl IsaIrq for IrqProbe {
    fn set_irq(&mut self, irq: u8, level: bool) {
        locked(&self.events).push((irq, level));
    }
}

#[derive(Debug, Default)]
struct DmaState {
    dreq: Vec<(u8, bool)>,
    scheduled: usize,
    mode: u8,
    mode_queries: Vec<u8>,
    memory: Vec<u8>,
}

/// DMA controller with a flat guest memory starting at transfer position 0.
#[derive(Debug, Clone, Default)]
pub(crate) struct DmaProbe {
    state: Arc<Mutex<DmaState>>,
}

impl DmaProbe {
    pub(crate) fn dreq(&self) -> Vec<(u8, bool)> {
        locked(&self.state).dreq.clone()
    }

    pub(crate) fn scheduled(&self) -> usize {
        locked(&self.state).scheduled
    }

    pub(crate) fn set_mode(&self, mode: u8) {
        locked(&self.state).mode = mode;
    }

    /// Channels whose mode register was read, oldest first.
    pub(crate) fn mode_queries(&self) -> Vec<u8> {
        locked(&self.state).mode_queries.clone()
    }

    pub(crate) fn memory(&self) -> Vec<u8> {
        locked(&self.state).memory.clone()
    }

    pub(crate) fn set_memory(&self, data: &[u8]) {
        locked(&self.state).memory = data.to_vec();
    }
}

impl IsaDma for DmaProbe {
    fn set_dreq(&mut self, channel: u8, level: bool) {
        locked(&self.state).dreq.push((channel, level));
    }

    fn schedule(&mut self) {
        locked(&self.state).scheduled += 1;
    }

    fn channel_mode(&self, channel: u8) -> u8 {
        let mut state = locked(&self.state);
        state.mode_queries.push(channel);
        state.mode
    }

    fn write_memory(&mut self, _channel: u8, buf: &[u8], pos: u32) -> u32 {
        let mut state = locked(&self.state);
        let pos = pos as usize;

        if state.memory.len() < pos + buf.len() {
            state.memory.resize(pos + buf.len(), 0);
        }
        state.memory[pos..pos + buf.len()].copy_from_slice(buf);
        buf.len() as u32
    }

    fn read_memory(&mut self, _channel: u8, buf: &mut [u8], pos: u32) -> u32 {
        let state = locked(&self.state);
        let src = state.memory.get(pos as usize..).unwrap_or(&[]);
        let n = src.len().min(buf.len());

        buf[..n].copy_from_slice(&src[..n]);
        n as u32
    }
}

#[derive(Debug, Default)]
struct FlakyState {
    busy: bool,
    fail: Option<XmitError>,
    sent: Vec<Vec<u8>>,
}

/// Transport that can refuse the transmit path or fail sends.
pub(crate) struct FlakyTransport {
    state: Arc<Mutex<FlakyState>>,
}

#[derive(Clone)]
pub(crate) struct FlakyProbe {
    state: Arc<Mutex<FlakyState>>,
}

impl FlakyTransport {
    pub(crate) fn new() -> (FlakyTransport, FlakyProbe) {
        let state = Arc::new(Mutex::new(FlakyState::default()));
        (
            FlakyTransport {
                state: Arc::clone(&state),
            },
            FlakyProbe { state },
        )
    }
}

impl FlakyProbe {
    pub(crate) fn set_busy(&self, busy: bool) {
        locked(&self.state).busy = busy;
    }

    pub(crate) fn fail_with(&self, err: Option<XmitError>) {
        locked(&self.state).fail = err;
    }

    pub(crate) fn sent(&self) -> Vec<Vec<u8>> {
        locked(&self.state).sent.clone()
    }
}

impl NetworkUp for FlakyTransport {
    fn begin_xmit(&mut self) -> std::result::Result<(), XmitError> {
        if locked(&self.state).busy {
            Err(XmitError::TryAgain)
        } else {
            Ok(())
        }
    }

    fn send_buf(&mut self, frame: Vec<u8>) -> std::result::Result<(), XmitError> {
        let mut state = locked(&self.state);
        let fail = state.fail;
        match fail {
            Some(err) => Err(err),
            None => {
                state.sent.push(frame);
                Ok(())
            }
        }
    }
}

/// A frame for `dst` from a fixed source, with a counting payload.
pub(crate) fn test_frame(dst: [u8; 6], len: usize) -> Vec<u8> {
    let mut frame: Vec<u8> = (0..len).map(|i| i as u8).collect();
    frame[..6].copy_from_slice(&dst);
    frame[6..12].copy_from_slice(&[0x02, 0xaa, 0xbb, 0xcc, 0xdd, 0xee]);
    frame
}

pub(crate) struct Rig {
    pub(crate) nic: Dpnic,
    pub(crate) irq: IrqProbe,
    pub(crate) dma: DmaProbe,
    pub(crate) timer: ManualTimer,
    pub(crate) host: QueueHost,
}

fn build(config: DeviceConfig, drv: Box<dyn NetworkUp>, host: QueueHost) -> Rig {
    init_logging();

    let irq = IrqProbe::default();
    let dma = DmaProbe::default();
    let timer = ManualTimer::new();
    let nic = Dpnic::new(
        config,
        Box::new(irq.clone()),
        Box::new(timer.clone()),
        Some(Box::new(dma.clone())),
        Some(drv),
    )
    .expect("test configuration is valid");
    nic.set_vm_state(VmState::Running);

    Rig {
        nic,
        irq,
        dma,
        timer,
        host,
    }
}

pub(crate) fn rig_with(config: DeviceConfig) -> Rig {
    let (transport, host) = network_queue();
    build(config, Box::new(transport), host)
}

pub(crate) fn rig(device_type: DeviceType) -> Rig {
    rig_with(DeviceConfig::new(device_type, MacAddr(MAC)))
}

pub(crate) fn rig_with_transport(device_type: DeviceType, drv: Box<dyn NetworkUp>) -> Rig {
    let (_, host) = network_queue();
    build(DeviceConfig::new(device_type, MacAddr(MAC)), drv, host)
}

impl Rig {
    fn core_port(&self, reg: u8) -> u16 {
        self.nic.io_port_layout().core.start + u16::from(reg)
    }

    fn nic_port(&self, reg: u8) -> u16 {
        self.nic.io_port_layout().nic.start + u16::from(reg)
    }

    pub(crate) fn outb(&self, reg: u8, val: u8) {
        self.nic
            .io_port_write(self.core_port(reg), u32::from(val), 1)
            .unwrap();
    }

    pub(crate) fn inb(&self, reg: u8) -> u8 {
        self.nic.io_port_read(self.core_port(reg), 1).unwrap() as u8
    }

    pub(crate) fn outw(&self, reg: u8, val: u16) {
        self.nic
            .io_port_write(self.core_port(reg), u32::from(val), 2)
            .unwrap();
    }

    pub(crate) fn inw(&self, reg: u8) -> u16 {
        self.nic.io_port_read(self.core_port(reg), 2).unwrap() as u16
    }

    pub(crate) fn nic_outb(&self, reg: u8, val: u8) {
        self.nic
            .io_port_write(self.nic_port(reg), u32::from(val), 1)
            .unwrap();
    }

    pub(crate) fn nic_inb(&self, reg: u8) -> u8 {
        self.nic.io_port_read(self.nic_port(reg), 1).unwrap() as u8
    }

    pub(crate) fn nic_outw(&self, reg: u8, val: u16) {
        self.nic
            .io_port_write(self.nic_port(reg), u32::from(val), 2)
            .unwrap();
    }

    pub(crate) fn nic_inw(&self, reg: u8) -> u16 {
        self.nic.io_port_read(self.nic_port(reg), 2).unwrap() as u16
    }

    /// The usual driver init sequence, ending with the NIC started and
    /// an empty ring.
    pub(crate) fn start(&self, pstart: u8, pstop: u8, rcr: u8) {
        self.outb(DPR_CR, 0x21);
        self.outb(DPR_P0_CNTR1, 0x48); /* DCR */
        self.outb(DPR_P0_RBCR0, 0);
        self.outb(DPR_P0_RBCR1, 0);
        self.outb(DPR_P0_RSR, rcr); /* RCR */
        self.outb(DPR_P0_CNTR0, 0); /* TCR */
        self.outb(DPR_P0_CLDA0, pstart); /* PSTART */
        self.outb(DPR_P0_CLDA1, pstop); /* PSTOP */
        self.outb(DPR_P0_BNRY, pstart);
        self.outb(DPR_P0_ISR, 0xff);
        self.outb(DPR_P0_CNTR2, 0x1f); /* IMR */

        self.outb(DPR_CR, 0x61);
        for (i, &b) in self.nic.mac().0.iter().enumerate() {
            self.outb(1 + i as u8, b);
        }
        self.outb(DPR_P1_CURR, pstart);
        for reg in 8..16 {
            self.outb(reg, 0);
        }
        self.outb(DPR_CR, 0x22);
    }

    pub(crate) fn curr(&self) -> u8 {
        self.nic.with_state(|s| s.core.curr)
    }

    pub(crate) fn set_curr(&self, curr: u8) {
        self.outb(DPR_CR, 0x62);
        self.outb(DPR_P1_CURR, curr);
        self.outb(DPR_CR, 0x22);
    }

    pub(crate) fn transmit(&self, tpsr: u8, len: u16) {
        self.outb(DPR_P0_TSR, tpsr); /* TPSR */
        self.outb(DPR_P0_NCR, lo(len)); /* TBCR0 */
        self.outb(DPR_P0_FIFO, hi(len)); /* TBCR1 */
        self.outb(DPR_CR, 0x26);
    }

    pub(crate) fn setup_remote_dma(&self, addr: u16, len: u16, rd: u8) {
        self.outb(DPR_P0_CRDA0, lo(addr)); /* RSAR0 */
        self.outb(DPR_P0_CRDA1, hi(addr)); /* RSAR1 */
        self.outb(DPR_P0_RBCR0, lo(len));
        self.outb(DPR_P0_RBCR1, hi(len));
        self.outb(DPR_CR, (rd << 3) | 0x02);
    }

    /// Remote write through the byte wide data port.
    pub(crate) fn dma_write(&self, addr: u16, data: &[u8]) {
        self.setup_remote_dma(addr, data.len() as u16, DP_CR_RDMA_WR);
        for &b in data {
            self.nic_outb(0, b);
        }
    }

    pub(crate) fn dma_read(&self, addr: u16, len: usize) -> Vec<u8> {
        self.setup_remote_dma(addr, len as u16, DP_CR_RDMA_RD);
        (0..len).map(|_| self.nic_inb(0)).collect()
    }

    pub(crate) fn ram(&self, ofs: usize, len: usize) -> Vec<u8> {
        self.nic.with_state(|s| s.local_ram[ofs..ofs + len].to_vec())
    }
}
