/*
*		Emulation of the National Semiconductor DP8390 Network
*		Interface Controller core shared by the NE1000/NE2000, the
*		WD8003/WD8013 and the 3Com 3C503 EtherLink II.
*
*		Register file, receive ring, transmit and loopback paths,
*		remote DMA bookkeeping and interrupt aggregation. The board
*		specific address decoding lives behind `OemVariant`.
*/
use std::ops::Range;

use bitflags::bitflags;
use log::*;
use once_cell::sync::Lazy;

use crate::device::{DeviceType, MacAddr};
use crate::network::dpnic::DpNicState;
use crate::network::net_3c503::{Gacfr, Gacr, Streg};
use crate::network::XmitError;
use crate::ui::LedFlags;

/* Maximum frame size we are willing to transmit. */
pub const MAX_FRAME: usize = 1536;

/* Size of the local RAM. */
pub const MEM_SIZE: usize = 16384;
pub const MEM_MASK: u16 = (MEM_SIZE - 1) as u16;

pub const PROM_SIZE: usize = 32;

/* Transmits failing with a pretended collision before we stop trying. */
pub const MAX_LINKDOWN_REPORTED: u32 = 3;
/* How many times the link restore may be postponed. */
pub const MAX_LINKRST_POSTPONED: u32 = 3;

/* Remote DMA commands (CR.RD). */
pub const DP_CR_RDMA_INVL: u8 = 0; /* Invalid value */
pub const DP_CR_RDMA_RD: u8 = 1; /* Remote read */
pub const DP_CR_RDMA_WR: u8 = 2; /* Remote write */
pub const DP_CR_RDMA_SP: u8 = 3; /* Send packet */
pub const DP_CR_RDMA_ABRT: u8 = 4; /* Abort/complete remote DMA */

/* Page 0 register offsets. */
pub const DPR_CR: u8 = 0x00;
pub const DPR_P0_CLDA0: u8 = 0x01; /* read; PSTART on write */
pub const DPR_P0_CLDA1: u8 = 0x02; /* read; PSTOP on write */
pub const DPR_P0_BNRY: u8 = 0x03;
pub const DPR_P0_TSR: u8 = 0x04; /* read; TPSR on write */
pub const DPR_P0_NCR: u8 = 0x05; /* read; TBCR0 on write */
pub const DPR_P0_FIFO: u8 = 0x06; /* read; TBCR1 on write */
pub const DPR_P0_ISR: u8 = 0x07;
pub const DPR_P0_CRDA0: u8 = 0x08; /* read; RSAR0 on write */
pub const DPR_P0_CRDA1: u8 = 0x09; /* read; RSAR1 on write */
pub const DPR_P0_RBCR0: u8 = 0x0a;
pub const DPR_P0_RBCR1: u8 = 0x0b;
pub const DPR_P0_RSR: u8 = 0x0c; /* read; RCR on write */
pub const DPR_P0_CNTR0: u8 = 0x0d; /* read; TCR on write */
pub const DPR_P0_CNTR1: u8 = 0x0e; /* read; DCR on write */
pub const DPR_P0_CNTR2: u8 = 0x0f; /* read; IMR on write */

pub const DPR_P1_CURR: u8 = 0x07;

bitflags! {
    /* Command Register - 00h read/write */
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Cr: u8 {
        const STP = 0x01; /* STP - software reset */
        const STA = 0x02; /* STA - start the NIC */
        const TXP = 0x04; /* TXP - transmit packet */
        const RD = 0x38;  /* RD0-RD2 - remote DMA command */
        const PS = 0xc0;  /* PS0,PS1 - page select */
    }

    /* Interrupt Status Register - 07h read/write; the IMR shares the layout */
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Isr: u8 {
        const PRX = 0x01; /* packet received with no errors */
        const PTX = 0x02; /* packet transmitted with no errors */
        const RXE = 0x04; /* receive error */
        const TXE = 0x08; /* transmit error */
        const OVW = 0x10; /* receive buffer overwrite warning */
        const CNT = 0x20; /* tally counter MSB set */
        const RDC = 0x40; /* remote DMA complete */
        const RST = 0x80; /* reset status */
    }

    /* Data Configuration Register - 0eh write */
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Dcr: u8 {
        const WTS = 0x01; /* word transfer select */
        const BOS = 0x02; /* byte order select */
        const LAS = 0x04; /* long address select */
        const LS = 0x08;  /* loopback select (0 = loopback) */
        const ARM = 0x10; /* auto-initialize remote */
        const FT = 0x60;  /* FIFO threshold */
    }

    /* Transmit Configuration Register - 0dh write */
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Tcr: u8 {
        const CRC = 0x01;  /* inhibit CRC */
        const LB = 0x06;   /* loopback control */
        const ATD = 0x08;  /* auto transmit disable */
        const OFST = 0x10; /* collision offset enable */
    }

    /* Transmit Status Register - 04h read */
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Tsr: u8 {
        const PTX = 0x01; /* packet transmitted */
        const DFR = 0x02; /* non-deferred transmission (reserved) */
        const COL = 0x04; /* transmit collided */
        const ABT = 0x08; /* aborted, excessive collisions */
        const CRS = 0x10; /* carrier sense lost */
        const FU = 0x20;  /* FIFO underrun */
        const CDH = 0x40; /* CD heartbeat failure */
        const OWC = 0x80; /* out of window collision */
    }

    /* Receive Configuration Register - 0ch write */
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Rcr: u8 {
        const SEP = 0x01; /* save errored packets */
        const AR = 0x02;  /* accept runt packets */
        const AB = 0x04;  /* accept broadcast */
        const AM = 0x08;  /* accept multicast */
        const PRO = 0x10; /* promiscuous physical */
        const MON = 0x20; /* monitor mode */
    }

    /* Receive Status Register - 0ch read */
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Rsr: u8 {
        const PRX = 0x01; /* packet received intact */
        const CRC = 0x02; /* CRC error */
        const FAE = 0x04; /* frame alignment error */
        const FO = 0x08;  /* FIFO overrun */
        const MPA = 0x10; /* missed packet */
        const PHY = 0x20; /* physical/multicast address */
        const DIS = 0x40; /* receiver disabled */
        const DFR = 0x80; /* deferring */
    }
}

impl Cr {
    pub fn rd(self) -> u8 {
        (self.bits() >> 3) & 7
    }

    pub fn set_rd(&mut self, rd: u8) {
        *self = Cr::from_bits_retain((self.bits() & !0x38) | ((rd & 7) << 3));
    }

    pub fn ps(self) -> u8 {
        self.bits() >> 6
    }

    pub fn set_ps(&mut self, ps: u8) {
        *self = Cr::from_bits_retain((self.bits() & !0xc0) | ((ps & 3) << 6));
    }
}

impl Dcr {
    /* FIFO threshold in bytes: 2, 4, 8 or 12 words. */
    pub fn ft(self) -> u8 {
        (self.bits() >> 5) & 3
    }

    pub fn set_ft(&mut self, ft: u8) {
        *self = Dcr::from_bits_retain((self.bits() & !0x60) | ((ft & 3) << 5));
    }
}

impl Tcr {
    pub fn lb(self) -> u8 {
        (self.bits() >> 1) & 3
    }

    pub fn set_lb(&mut self, lb: u8) {
        *self = Tcr::from_bits_retain((self.bits() & !0x06) | ((lb & 3) << 1));
    }
}

#[inline]
pub(crate) fn lo(v: u16) -> u8 {
    v as u8
}

#[inline]
pub(crate) fn hi(v: u16) -> u8 {
    (v >> 8) as u8
}

#[inline]
pub(crate) fn make_u16(lo: u8, hi: u8) -> u16 {
    u16::from(lo) | (u16::from(hi) << 8)
}

#[inline]
pub(crate) fn set_lo(v: &mut u16, lo: u8) {
    *v = (*v & 0xff00) | u16::from(lo);
}

#[inline]
pub(crate) fn set_hi(v: &mut u16, hi: u8) {
    *v = (*v & 0x00ff) | (u16::from(hi) << 8);
}

/// The internal FIFO. Only the loopback path leaves anything in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Fifo {
    pub rp: u8,
    pub wp: u8,
    pub data: [u8; 8],
}

impl Fifo {
    pub fn push(&mut self, val: u8) {
        self.data[usize::from(self.wp & 7)] = val;
        self.wp = self.wp.wrapping_add(1);
    }

    pub fn pop(&mut self) -> u8 {
        let val = self.data[usize::from(self.rp & 7)];
        self.rp = self.rp.wrapping_add(1);
        val
    }
}

/// DP8390 register file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Dp8390Core {
    /* Page 0 */
    pub cr: Cr,
    pub isr: Isr,
    pub imr: Isr,
    pub dcr: Dcr,
    pub tcr: Tcr,
    pub tsr: Tsr,
    pub rcr: Rcr,
    pub rsr: Rsr,

    pub clda: u16,  /* 01,02h read ; current local DMA address */
    pub pstart: u8, /* 01h write ; page start */
    pub pstop: u8,  /* 02h write ; page stop */
    pub bnry: u8,   /* 03h read/write ; boundary pointer */
    pub tpsr: u8,   /* 04h write ; transmit page start */
    pub ncr: u8,    /* 05h read ; number of collisions */
    pub tbcr: u16,  /* 05,06h write ; transmit byte count */
    pub rsar: u16,  /* 08,09h write ; remote start address */
    pub crda: u16,  /* 08,09h read ; current remote DMA address */
    pub rbcr: u16,  /* 0a,0bh write ; remote byte count */
    pub cntr0: u8,  /* 0dh read ; frame alignment errors */
    pub cntr1: u8,  /* 0eh read ; CRC errors */
    pub cntr2: u8,  /* 0fh read ; missed packets */

    /* Page 1: 01-06h PAR, 08-0fh MAR; 07h is CURR */
    pub pg1: [u8; 16],
    pub curr: u8,

    /* Page 2 */
    pub rnxtpp: u8, /* 03h ; remote next packet pointer */
    pub lnxtpp: u8, /* 05h ; local next packet pointer */

    pub fifo: Fifo,
}

/// Result of running a destination address through the receive filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddrMatch {
    pub padr: bool,
    pub bcast: bool,
    pub mcast: bool,
    pub prom: bool,
    /// The destination was a multicast one and RCR.AM was set, whether
    /// or not it passed the hash filter.
    pub mc_type: bool,
}

impl AddrMatch {
    pub fn accepted(&self) -> bool {
        self.padr || self.bcast || self.mcast || self.prom
    }

    /// RSR.PHY: accepted broadcast, or any enabled multicast.
    pub fn phy(&self) -> bool {
        self.bcast || self.mc_type
    }
}

impl Dp8390Core {
    pub fn par(&self) -> &[u8] {
        &self.pg1[1..7]
    }

    pub fn mar(&self) -> &[u8] {
        &self.pg1[8..16]
    }

    /// Runs the four address filters in hardware order; the first match
    /// wins and the later ones are not evaluated.
    pub fn match_address(&self, frame: &[u8]) -> AddrMatch {
        let mut m = AddrMatch::default();
        let dst = &frame[..6];
        let multicast = dst[0] & 1 != 0;

        m.padr = dst == self.par();
        if m.padr {
            return m;
        }

        m.bcast = self.rcr.contains(Rcr::AB) && dst == [0xff; 6];
        if m.bcast {
            return m;
        }

        if self.rcr.contains(Rcr::AM) && multicast {
            m.mc_type = true;
            let idx = mcast_index(dst);
            m.mcast = self.pg1[8 + idx / 8] & (1 << (idx & 7)) != 0;
            trace!("DP8390: multicast index {} -> {}", idx, m.mcast);
            if m.mcast {
                return m;
            }
        }

        m.prom = self.rcr.contains(Rcr::PRO) && !multicast;
        m
    }
}

/*
* CRC-32 table for the AUTODIN II polynomial
*   x^32 + x^26 + x^23 + x^22 + x^16 +
*   x^12 + x^11 + x^10 + x^8 + x^7 + x^5 + x^4 + x^2 + x^1 + 1
* in its bit-reversed form.
*/
static CRC_TABLE: Lazy<[u32; 256]> = Lazy::new(|| {
    let mut table = [0u32; 256];
    for (n, entry) in table.iter_mut().enumerate() {
        let mut c = n as u32;
        for _ in 0..8 {
            c = if c & 1 != 0 { (c >> 1) ^ 0xedb8_8320 } else { c >> 1 };
        }
        *entry = c;
    }
    table
});

pub fn crc32_update(mut crc: u32, data: &[u8]) -> u32 {
    for &b in data {
        crc = (crc >> 8) ^ CRC_TABLE[((crc ^ u32::from(b)) & 0xff) as usize];
    }
    crc
}

/// Ethernet FCS of `data`.
pub fn dp8390_fcs(data: &[u8]) -> u32 {
    !crc32_update(0xffff_ffff, data)
}

/*
* Return the 6-bit index into the multicast address register.
*
* The chip takes the top 6 bits of the CRC. Our CRC runs LSB first, so
* the same bits are the bottom 6, in reverse order.
*/
pub fn mcast_index(dst: &[u8]) -> usize {
    let crc = crc32_update(0xffff_ffff, &dst[..6]);
    let frag = crc & 63;
    let mut rev = 0;

    for i in 0..6 {
        rev |= ((frag >> i) & 1) * (0x20 >> i);
    }
    rev as usize
}

/// Where a local (chip side) address lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalAddr {
    /// Offset into local RAM.
    Ram(usize),
    /// Not decoded to RAM; carries the masked address.
    Unmapped(u16),
}

/// Host resources claimed by a board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoPortLayout {
    /// DP8390 registers.
    pub core: Range<u16>,
    /// Board specific ports (NE data/reset, WD control/PROM, 3C503 Gate Array).
    pub nic: Range<u16>,
    /// Shared memory window, WD and 3C503 only.
    pub shared_mem: Option<Range<u32>>,
}

/// What differs between the boards built around the DP8390.
pub trait OemVariant: Send {
    fn device_type(&self) -> DeviceType;

    /// Maps a DP8390 local address into local RAM.
    fn decode_local_address(&self, addr: u16) -> LocalAddr;

    /// Fills the station address PROM; `prom` arrives zeroed.
    fn build_prom(&self, mac: &MacAddr, prom: &mut [u8; PROM_SIZE]);

    fn io_port_layout(&self, io_base: u16, mem_base: u32, mem_size: u32) -> IoPortLayout;

    /// Whether word accesses to the board ports reach the board as one
    /// 16-bit transfer instead of two byte accesses.
    fn nic_word_io(&self) -> bool {
        false
    }
}

impl DpNicState {
    pub(crate) fn is_link_up(&self) -> bool {
        self.driver_attached && !self.link_temp_down && self.link_up
    }

    /// Raise or lower the ISA line, IRQ 2 is wired to 9 on AT buses.
    pub(crate) fn set_isa_irq(&mut self, irq: u8, level: bool) {
        let irq = if irq == 2 { 9 } else { irq };
        if irq != 0 {
            self.irq_line.set_irq(irq, level);
        }
    }

    pub(crate) fn dp8390_update_irq(&mut self) {
        let core = &mut self.core;

        /* ISR.CNT mirrors the top bits of the tally counters. */
        core.isr
            .set(Isr::CNT, core.cntr0 & core.cntr1 & core.cntr2 & 0x80 != 0);
        let core_irq = !(core.isr & core.imr).is_empty();

        /* Gate Array sources; all clear on boards without one. */
        let dtc = self.ga.streg.contains(Streg::DTC);
        let tcm = self.ga.gacfr.contains(Gacfr::TCM);
        let nim = self.ga.gacfr.contains(Gacfr::NIM);
        self.ga.ga_irq = dtc && !tcm;
        let nic_irq = (core_irq && !nim) || self.ga.ga_irq;

        if nic_irq != self.nic_irq_active {
            trace!(
                "DP8390: IRQ {} -> {} (core={}, ga={})",
                self.isa_irq,
                nic_irq,
                core_irq,
                self.ga.ga_irq
            );
            self.set_isa_irq(self.isa_irq, nic_irq);
            self.nic_irq_active = nic_irq;
        }
    }

    /// Software reset, DP8390 datasheet section 11.0.
    pub(crate) fn dp8390_core_reset(&mut self) {
        let core = &mut self.core;

        core.cr.remove(Cr::TXP | Cr::STA);
        core.cr.insert(Cr::STP);
        core.cr.set_rd(DP_CR_RDMA_ABRT);
        core.isr.insert(Isr::RST);
        core.imr = Isr::empty();
        core.dcr.remove(Dcr::LAS);
        core.tcr.set_lb(0);
        core.fifo = Fifo::default();

        self.dp8390_update_irq();
    }

    /// Wake up a receiver waiting for ring space, if there is one.
    pub(crate) fn dp8390_kick_receive(&mut self) {
        if self.rx_event.maybe_out_of_space() {
            trace!("DP8390: poking receive thread");
            self.rx_event.signal();
        }
    }

    /* Local RAM accesses never cross a 256-byte page. */
    fn clip_to_page(addr: u16, len: usize) -> usize {
        len.min(256 - usize::from(lo(addr)))
    }

    pub(crate) fn dp_local_ram_read_buf(&self, addr: u16, dst: &mut [u8]) {
        let cb = Self::clip_to_page(addr, dst.len());

        match self.oem.decode_local_address(addr) {
            LocalAddr::Ram(ofs) if ofs + cb <= MEM_SIZE => {
                dst[..cb].copy_from_slice(&self.local_ram[ofs..ofs + cb]);
            }
            _ => warn!("DP8390: ignoring read at addr={:04x} cb={}", addr, cb),
        }
    }

    pub(crate) fn dp_local_ram_write_buf(&mut self, addr: u16, src: &[u8]) {
        let cb = Self::clip_to_page(addr, src.len());

        match self.oem.decode_local_address(addr) {
            LocalAddr::Ram(ofs) if ofs + cb <= MEM_SIZE => {
                self.local_ram[ofs..ofs + cb].copy_from_slice(&src[..cb]);
            }
            _ => warn!("DP8390: ignoring write at addr={:04x} cb={}", addr, cb),
        }
    }

    /*
    * Copy a buffer into the receive ring at CLDA, a page at a time.
    *
    * After every page CLDA wraps from PSTOP to PSTART; landing on BNRY
    * is an overflow and ends the copy right there.
    */
    pub(crate) fn dp8390_receive_buf(&mut self, rsr: &mut Rsr, mut src: &[u8], last: bool) {
        while !src.is_empty() {
            let cb_page = 256 - usize::from(lo(self.core.clda));
            let cb_write = cb_page.min(src.len());

            self.dp_local_ram_write_buf(self.core.clda, &src[..cb_write]);

            /* The last fragment rounds CLDA up to the next page. */
            let advance = if last && cb_write == src.len() {
                cb_page
            } else {
                cb_write
            };
            self.core.clda = self.core.clda.wrapping_add(advance as u16);

            if hi(self.core.clda) == self.core.pstop {
                set_hi(&mut self.core.clda, self.core.pstart);
            }

            if hi(self.core.clda) == self.core.bnry {
                self.core.isr.insert(Isr::OVW | Isr::RST);
                rsr.insert(Rsr::MPA);
                debug!(
                    "DP8390: PSTART={:02x}00 PSTOP={:02x}00 BNRY={:02x}00 CURR={:02x}00 -- overflow!",
                    self.core.pstart, self.core.pstop, self.core.bnry, self.core.curr
                );
                break;
            }
            src = &src[cb_write..];
        }
    }

    /// Store an incoming frame in the receive ring.
    pub(crate) fn dp8390_receive_locked(&mut self, frame: &[u8]) {
        if !self.rx_event.vm_state().is_running() {
            trace!("DP8390: VM not running, dropping frame");
            return;
        }
        if !self.is_link_up() {
            trace!("DP8390: link down, dropping frame");
            return;
        }
        if !self.core.cr.contains(Cr::STA) || self.core.cr.contains(Cr::STP) {
            trace!("DP8390: receiver disabled, dropping frame");
            return;
        }
        /* Not even a runt without 8 bytes. */
        if frame.len() < 8 {
            trace!("DP8390: dropping {} byte frame", frame.len());
            return;
        }
        if frame.len() > MAX_FRAME {
            warn!(
                "DP8390: Received illegal giant frame ({} bytes) -> signaling error",
                frame.len()
            );
            self.core.rsr = Rsr::FO;
            self.core.isr.insert(Isr::RXE);
            self.dp8390_update_irq();
            return;
        }

        let m = self.core.match_address(frame);
        if !m.accepted() {
            trace!("DP8390: frame did not pass address filter, size={}", frame.len());
            return;
        }
        trace!("DP8390: frame passed address filter {:?}, size={}", m, frame.len());

        let mut rsr = Rsr::empty();
        if m.phy() {
            rsr.insert(Rsr::PHY);
        }

        if self.core.rcr.contains(Rcr::MON) {
            rsr.insert(Rsr::MPA);
            if self.core.cntr2 <= 192 {
                self.core.cntr2 += 1;
            }
        } else {
            /* Runts are padded to the 60 byte minimum. */
            let mut runt = [0u8; 60];
            let src = if frame.len() < runt.len() {
                runt[..frame.len()].copy_from_slice(frame);
                &runt[..]
            } else {
                frame
            };

            /* Leave room for the packet header. */
            self.core.clda = make_u16(4, self.core.curr);
            self.dp8390_receive_buf(&mut rsr, src, false);

            /* No FCS from the transport, so make one up. */
            if !rsr.contains(Rsr::MPA) {
                let fcs = 0x0bad_f00du32.to_le_bytes();
                self.dp8390_receive_buf(&mut rsr, &fcs, true);
            }

            if !rsr.intersects(Rsr::CRC | Rsr::FAE | Rsr::FO | Rsr::MPA) {
                rsr.insert(Rsr::PRX);
                self.core.isr.insert(Isr::PRX);
            } else {
                self.core.isr.insert(Isr::RXE);
            }

            if rsr.contains(Rsr::PRX) {
                if lo(self.core.clda) != 0 {
                    self.core.clda = make_u16(0, hi(self.core.clda).wrapping_add(1));
                }

                let next_ptr = hi(self.core.clda);
                let byte_cnt = (src.len() + 4) as u16;
                let header = [rsr.bits(), next_ptr, lo(byte_cnt), hi(byte_cnt)];

                self.core.clda = make_u16(0, self.core.curr);
                self.dp_local_ram_write_buf(self.core.clda, &header);
                self.core.clda = self.core.clda.wrapping_add(header.len() as u16);
                self.core.curr = next_ptr;
            }
        }

        self.core.rsr = rsr;
        trace!(
            "DP8390: receive done, CURR={:02x}00 RSR={:02x} ISR={:02x}",
            self.core.curr,
            self.core.rsr.bits(),
            self.core.isr.bits()
        );
        self.dp8390_update_irq();
    }

    /// Room for at least one more full frame in the ring?
    pub(crate) fn dp8390_can_receive(&self) -> bool {
        let core = &self.core;

        /* A stopped receiver drops everything anyway. Rings under 4K
         * are not worth throttling for. */
        if !core.cr.contains(Cr::STA) || core.cr.contains(Cr::STP) {
            return true;
        }
        if u16::from(core.pstart) + 16 > u16::from(core.pstop) {
            return true;
        }

        let (pstart, pstop) = (i32::from(core.pstart), i32::from(core.pstop));
        let (bnry, curr) = (i32::from(core.bnry), i32::from(core.curr));
        let free_pages = if bnry <= curr {
            pstop - pstart - (curr - bnry)
        } else {
            bnry - curr
        } as u16;
        trace!("DP8390: {} free pages", free_pages);

        /* Six pages hold a maximum size frame plus header. */
        free_pages >= 6
    }

    pub(crate) fn dp8390_start_transmit(&mut self) {
        self.core.tsr = Tsr::empty();
        self.core.ncr = 0;
        self.dp8390_xmit_packet();
    }

    /// Transmit the pending frame, holding the transport's xmit lock.
    pub(crate) fn dp8390_xmit_packet(&mut self) {
        if let Some(drv) = self.drv.as_mut() {
            if let Err(e) = drv.begin_xmit() {
                debug!("DP8390: transport busy ({}), transmit deferred", e);
                return;
            }
        }

        self.dp8390_async_xmit_locked();

        if let Some(drv) = self.drv.as_mut() {
            drv.end_xmit();
        }
    }

    fn dp8390_async_xmit_locked(&mut self) {
        /* Transmit may have been cancelled while it was deferred. */
        if !self.core.cr.contains(Cr::TXP) {
            debug!("DP8390: CR.TXP is off, nothing to send");
            return;
        }

        let link_up = self.is_link_up();
        if link_up || self.link_down_reported <= MAX_LINKDOWN_REPORTED {
            let loopback = self.core.tcr.lb() != 0;
            let mut cb = usize::from(self.core.tbcr);
            let adr = make_u16(0, self.core.tpsr);
            trace!("DP8390: transmit cb={} adr={:04x}", cb, adr);

            if link_up || loopback {
                if cb <= MAX_FRAME {
                    /* Only every other byte makes it through. */
                    if loopback && self.core.dcr.contains(Dcr::WTS) {
                        cb /= 2;
                        debug!("DP8390: loopback with DCR.WTS set -> cb={}", cb);
                    }

                    let rc = if loopback {
                        self.dp8390_xmit_loopback(adr, cb)
                    } else {
                        let alloc = match self.drv.as_mut() {
                            Some(drv) => drv.alloc_buf(cb),
                            None => Err(XmitError::NetDown),
                        };
                        match alloc {
                            Ok(mut buf) => {
                                buf.resize(cb, 0);
                                self.dp8390_xmit_read(adr, &mut buf, false);
                                self.dp8390_xmit_send_buf(buf)
                            }
                            Err(XmitError::TryAgain) => {
                                debug!("DP8390: no transmit buffer, try again later");
                                return;
                            }
                            Err(e) => Err(e),
                        }
                    };

                    match rc {
                        Ok(()) => {
                            self.core.tsr.insert(Tsr::PTX);
                            self.core.isr.insert(Isr::PTX);
                        }
                        Err(e) => {
                            debug!("DP8390: transmit failed: {}", e);
                            /* Pretend there was a collision. */
                            self.core.tsr.insert(Tsr::COL);
                            self.core.isr.insert(Isr::TXE);
                        }
                    }
                } else {
                    /* The chip itself does not care about frame length. */
                    warn!(
                        "DP8390: Attempt to transmit illegal giant frame ({} bytes) -> signaling error",
                        cb
                    );
                    self.core.tsr.insert(Tsr::OWC);
                    self.core.isr.insert(Isr::TXE);
                }
            } else {
                self.core.tsr.insert(Tsr::COL);
                self.core.isr.insert(Isr::TXE);
                self.link_down_reported += 1;
            }

            self.core.cr.remove(Cr::TXP);
            self.core.tbcr = 0;
            trace!(
                "DP8390: TSR={:02x} ISR={:02x}",
                self.core.tsr.bits(),
                self.core.isr.bits()
            );
        }

        self.dp8390_update_irq();
        self.dp8390_kick_receive();
    }

    /// Copy an outgoing frame from local RAM.
    pub(crate) fn dp8390_xmit_read(&self, adr: u16, dst: &mut [u8], loopback: bool) {
        let ofs = match self.oem.decode_local_address(adr) {
            LocalAddr::Ram(ofs) => ofs,
            LocalAddr::Unmapped(ofs) => {
                debug!("DP8390: transmit from undecoded address {:04x}", adr);
                usize::from(ofs)
            }
        };

        if !loopback {
            if ofs + dst.len() <= MEM_SIZE {
                dst.copy_from_slice(&self.local_ram[ofs..ofs + dst.len()]);
            } else {
                dst.fill(0xee);
            }
            return;
        }

        /* With DCR.WTS, DCR.BOS picks the odd or the even bytes. */
        let wts = self.core.dcr.contains(Dcr::WTS);
        let step = if wts { 2 } else { 1 };
        let mut src = ofs;
        if wts && !self.core.dcr.contains(Dcr::BOS) {
            src += 1;
        }

        for d in dst.iter_mut() {
            if src < MEM_SIZE {
                *d = self.local_ram[src];
                src += step;
            } else {
                *d = 0xee;
            }
        }
    }

    fn dp8390_xmit_send_buf(&mut self, frame: Vec<u8>) -> Result<(), XmitError> {
        if frame.len() > 70 {
            self.led.light(LedFlags::WRITING);
        }

        let rc = match self.drv.as_mut() {
            Some(drv) => drv.send_buf(frame),
            None => Err(XmitError::NetDown),
        };

        self.led.dim(LedFlags::WRITING);
        rc
    }

    fn dp8390_xmit_loopback(&mut self, adr: u16, cb: usize) -> Result<(), XmitError> {
        let mut buf = std::mem::take(&mut self.loop_buf);
        buf.clear();
        buf.resize(cb, 0);
        self.dp8390_xmit_read(adr, &mut buf, true);
        self.loop_buf = buf;

        self.led.light(LedFlags::READING);
        self.dp8390_loopback_receive();
        self.led.dim(LedFlags::READING);
        Ok(())
    }

    /*
    * Loopback is the strangest part of the chip. TCR.CRC decides which
    * side owns the CRC logic: with CRC inhibited the receiver checks the
    * FCS and runs the address filter, otherwise the receiver always sees
    * a CRC error. The FIFO is left holding the tail of the frame followed
    * by the length.
    */
    fn dp8390_loopback_receive(&mut self) {
        let pktlen = self.loop_buf.len();
        let mut rsr = Rsr::empty();

        debug!(
            "DP8390: loopback DCR={:02x} LB={} TCR={:02x} RCR={:02x}, {} bytes",
            self.core.dcr.bits(),
            self.core.tcr.lb(),
            self.core.tcr.bits(),
            self.core.rcr.bits(),
            pktlen
        );

        /* The receiving side ignores anything under 8 bytes. */
        if pktlen < 8 {
            return;
        }

        match self.core.tcr.lb() {
            1 => self.core.tsr.insert(Tsr::CDH | Tsr::CRS), /* internal */
            2 => self.core.tsr.insert(Tsr::CDH),            /* through serializer */
            _ => {}                                         /* external */
        }

        let crc_inhibit = self.core.tcr.contains(Tcr::CRC);
        let fcslen = if crc_inhibit && pktlen > 4 {
            pktlen - 4
        } else {
            pktlen
        };
        let fcs = dp8390_fcs(&self.loop_buf[..fcslen]).to_le_bytes();
        trace!("DP8390: loopback FCS {:02x?}", fcs);

        /* The write pointer restarts with every frame, the read pointer does not. */
        self.core.fifo.wp = 0;

        if crc_inhibit {
            let mut good_fcs = true;

            for i in 0..8 {
                let b = self.loop_buf[i];
                self.core.fifo.push(b);
            }

            let m = self.core.match_address(&self.loop_buf);
            if m.accepted() {
                good_fcs = self.loop_buf[pktlen - 4..] == fcs;
                for i in 8..pktlen {
                    let b = self.loop_buf[i];
                    self.core.fifo.push(b);
                }
            } else {
                /* Only for a non-matching address. */
                rsr.insert(Rsr::PRX);
            }

            if m.phy() {
                rsr.insert(Rsr::PHY);
            }
            if !good_fcs {
                rsr.insert(Rsr::CRC);
            }
        } else {
            rsr.insert(Rsr::CRC);
            for i in 0..pktlen {
                let b = self.loop_buf[i];
                self.core.fifo.push(b);
            }
            for b in fcs {
                self.core.fifo.push(b);
            }
        }

        /* High byte of the length goes in twice. */
        let len = pktlen as u16;
        self.core.fifo.push(lo(len));
        self.core.fifo.push(hi(len));
        self.core.fifo.push(hi(len));

        if rsr.contains(Rsr::CRC) {
            self.core.isr.insert(Isr::RXE);
        }
        self.core.rsr = rsr;
    }

    pub(crate) fn dp8390_core_read(&mut self, ofs: u8) -> u8 {
        /* The 3C503 can map the PROM over the core registers. */
        if self.ga.gacr.contains(Gacr::EALO) {
            return self.prom[usize::from(ofs % 0x0f)];
        } else if self.ga.gacr.contains(Gacr::EAHI) {
            return self.prom[16 + usize::from(ofs % 0x0f)];
        }

        if ofs == DPR_CR {
            return self.core.cr.bits();
        }

        let core = &mut self.core;
        match core.cr.ps() {
            0 => match ofs {
                DPR_P0_CLDA0 => lo(core.clda),
                DPR_P0_CLDA1 => hi(core.clda),
                DPR_P0_BNRY => core.bnry,
                DPR_P0_TSR => core.tsr.bits(),
                DPR_P0_NCR => core.ncr,
                DPR_P0_FIFO => core.fifo.pop(),
                DPR_P0_ISR => core.isr.bits(),
                DPR_P0_CRDA0 => lo(core.crda),
                DPR_P0_CRDA1 => hi(core.crda),
                DPR_P0_RSR => core.rsr.bits(),
                /* Tally counters clear on read. */
                DPR_P0_CNTR0 => {
                    let val = std::mem::take(&mut core.cntr0);
                    self.dp8390_update_irq();
                    val
                }
                DPR_P0_CNTR1 => {
                    let val = std::mem::take(&mut core.cntr1);
                    self.dp8390_update_irq();
                    val
                }
                DPR_P0_CNTR2 => {
                    let val = std::mem::take(&mut core.cntr2);
                    self.dp8390_update_irq();
                    val
                }
                _ => 0,
            },
            1 => match ofs {
                DPR_P1_CURR => core.curr,
                _ => core.pg1[usize::from(ofs & 0x0f)],
            },
            /* Page 2 reads back the page 0 write-only registers. */
            2 => match ofs {
                0x01 => core.pstart,
                0x02 => core.pstop,
                0x03 => core.rnxtpp,
                0x04 => core.tpsr,
                0x05 => core.lnxtpp,
                0x06 | 0x07 => 0,
                0x0c => core.rcr.bits(),
                0x0d => core.tcr.bits(),
                0x0e => core.dcr.bits(),
                0x0f => core.imr.bits(),
                _ => 0,
            },
            _ => {
                debug!("DP8390: reading page 3 register {:x}", ofs);
                0
            }
        }
    }

    fn dp8390_write_cr(&mut self, val: u8) {
        let ncr = Cr::from_bits_retain(val);
        trace!("DP8390: wrote {:02x} to CR (was {:02x})", val, self.core.cr.bits());

        if ncr.contains(Cr::STP) != self.core.cr.contains(Cr::STP) {
            if ncr.contains(Cr::STP) {
                /* Stop, i.e. software reset. */
                self.core.cr.insert(Cr::STP);
                self.core.isr.insert(Isr::RST);
            } else {
                self.core.cr.remove(Cr::STP);
                if ncr.contains(Cr::STA) {
                    self.core.cr.insert(Cr::STA);
                }
                if self.core.cr.contains(Cr::STA) {
                    self.core.isr.remove(Isr::RST);
                }
            }
            self.dp8390_kick_receive();
        }

        /* STA is sticky; only a reset clears it. */
        if ncr.contains(Cr::STA) && !self.core.cr.contains(Cr::STA) {
            self.core.cr.insert(Cr::STA);
            self.core.isr.remove(Isr::RST);
            self.dp8390_kick_receive();
        }

        if ncr.contains(Cr::TXP) && !self.core.cr.contains(Cr::TXP) {
            self.core.cr.insert(Cr::TXP);
            self.dp8390_start_transmit();
        }

        /* Zero cannot be written to RD. */
        let mut rd = ncr.rd();
        if rd == DP_CR_RDMA_INVL {
            rd = DP_CR_RDMA_ABRT;
        }

        if rd != self.core.cr.rd() {
            if rd & DP_CR_RDMA_ABRT != 0 {
                debug!(
                    "DP8390: RDMA abort, RD={} RSAR={:04x} RBCR={:04x} CRDA={:04x}",
                    rd, self.core.rsar, self.core.rbcr, self.core.crda
                );
            } else if rd == DP_CR_RDMA_SP {
                /* Send Packet: set up a remote read of the frame at BNRY. */
                let mut header = [0u8; 4];
                let bnry = self.core.bnry;
                self.dp_local_ram_read_buf(make_u16(0, bnry), &mut header);
                self.core.crda = make_u16(0, bnry);
                self.core.rbcr = u16::from_le_bytes([header[2], header[3]]);
                debug!(
                    "DP8390: RDMA send packet, CRDA={:04x} RBCR={:04x}",
                    self.core.crda, self.core.rbcr
                );
            } else {
                debug!(
                    "DP8390: RDMA RD={} RSAR={:04x} RBCR={:04x}",
                    rd, self.core.rsar, self.core.rbcr
                );
            }
            self.core.cr.set_rd(rd);
        }

        self.core.cr.set_ps(ncr.ps());
    }

    pub(crate) fn dp8390_core_write(&mut self, ofs: u8, val: u8) {
        let mut update_irq = false;
        trace!(
            "DP8390: page={} reg={:x} val={:02x}",
            self.core.cr.ps(),
            ofs,
            val
        );

        if ofs == DPR_CR {
            self.dp8390_write_cr(val);
            return;
        }
        if ofs > 0x0f {
            debug!("DP8390: write past the register file, ofs={:x}", ofs);
            return;
        }

        match self.core.cr.ps() {
            0 => match ofs {
                0x01 => {
                    self.core.pstart = val;
                    self.core.curr = val;
                }
                0x02 => self.core.pstop = val,
                DPR_P0_BNRY => {
                    if self.core.bnry != val {
                        self.core.bnry = val;
                        /* Probably made room in the ring. */
                        self.dp8390_kick_receive();
                    }
                }
                0x04 => self.core.tpsr = val,
                0x05 => set_lo(&mut self.core.tbcr, val),
                0x06 => set_hi(&mut self.core.tbcr, val),
                DPR_P0_ISR => {
                    /* Writing 1 clears a bit, except RST. */
                    self.core.isr = Isr::from_bits_retain(self.core.isr.bits() & (!val | 0x80));
                    update_irq = true;
                }
                /* Novell's ODI driver expects RSAR to show up in CRDA. */
                0x08 => {
                    set_lo(&mut self.core.rsar, val);
                    set_lo(&mut self.core.crda, val);
                }
                0x09 => {
                    set_hi(&mut self.core.rsar, val);
                    set_hi(&mut self.core.crda, val);
                }
                DPR_P0_RBCR0 => set_lo(&mut self.core.rbcr, val),
                DPR_P0_RBCR1 => set_hi(&mut self.core.rbcr, val),
                0x0c => {
                    self.core.rcr = Rcr::from_bits_retain(val);
                    let mon = self.core.rcr.contains(Rcr::MON);
                    self.core.rsr.set(Rsr::DIS, mon);
                }
                0x0d => self.core.tcr = Tcr::from_bits_retain(val),
                0x0e => {
                    self.core.dcr = Dcr::from_bits_retain(val);
                    trace!(
                        "DP8390: DCR={:02x} wts={} ft={}",
                        val,
                        self.core.dcr.contains(Dcr::WTS),
                        self.core.dcr.ft()
                    );
                }
                0x0f => {
                    self.core.imr = Isr::from_bits_retain(val & 0x7f);
                    update_irq = true;
                }
                _ => {}
            },
            1 => match ofs {
                DPR_P1_CURR => self.core.curr = val,
                _ => self.core.pg1[usize::from(ofs)] = val,
            },
            2 => match ofs {
                0x01 => set_lo(&mut self.core.clda, val),
                0x02 => set_hi(&mut self.core.clda, val),
                0x03 => self.core.rnxtpp = val,
                0x05 => self.core.lnxtpp = val,
                0x06 | 0x07 => {}
                _ => debug!(
                    "DP8390: writing unimplemented register: page 2, ofs={:x}, val={:02x}",
                    ofs, val
                ),
            },
            _ => debug!(
                "DP8390: writing page 3 register: ofs={:x}, val={:02x}",
                ofs, val
            ),
        }

        if update_irq {
            self.dp8390_update_irq();
        }
    }
}
