/*
*		3Com 3C503 EtherLink II.
*
*		The DP8390 is mapped at the I/O base; either half of the
*		station address PROM can be mapped over it instead. The custom
*		Gate Array sits at I/O base + 400h and handles the shared memory
*		window, programmed I/O, ISA DMA, and IRQ/DRQ selection.
*/
use bitflags::bitflags;
use log::*;

use crate::device::{DeviceType, MacAddr};
use crate::network::dpnic::DpNicState;
use crate::network::net_dp8390::*;

/* Gate Array revision reported in STREG. */
pub const ELNKII_GA_REV: u8 = 1;

/* Gate Array register offsets. */
pub const GAR_PSTR: u8 = 0; /* Page start */
pub const GAR_PSPR: u8 = 1; /* Page stop */
pub const GAR_DQTR: u8 = 2; /* DRQ timer */
pub const GAR_R_BCFR: u8 = 3; /* Base configuration (read-only) */
pub const GAR_R_PCFR: u8 = 4; /* PROM configuration (read-only) */
pub const GAR_GACFR: u8 = 5; /* GA configuration */
pub const GAR_GACR: u8 = 6; /* GA control */
pub const GAR_STREG: u8 = 7; /* GA status */
pub const GAR_IDCFR: u8 = 8; /* Interrupt/DMA configuration */
pub const GAR_DAMSB: u8 = 9; /* DMA address MSB */
pub const GAR_DALSB: u8 = 10; /* DMA address LSB */
pub const GAR_VPTR2: u8 = 11; /* Vector pointer 2 */
pub const GAR_VPTR1: u8 = 12; /* Vector pointer 1 */
pub const GAR_VPTR0: u8 = 13; /* Vector pointer 0 */
pub const GAR_RFMSB: u8 = 14; /* Register file access MSB */
pub const GAR_RFLSB: u8 = 15; /* Register file access LSB */

/* I/O bases and memory bases selectable by jumper, in BCFR/PCFR bit order. */
const EL_IO_BASES: [u16; 8] = [0x2e0, 0x2a0, 0x280, 0x250, 0x350, 0x330, 0x310, 0x300];
const EL_MEM_BASES: [u32; 4] = [0xdc000, 0xd8000, 0xcc000, 0xc8000];

/* ISA DMA transfer types, from the channel mode register. */
const DTYPE_WRITE: u8 = 1; /* device to memory */

bitflags! {
    /* Gate Array Configuration Register */
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Gacfr: u8 {
        const MBS = 0x07;  /* memory bank select */
        const RSEL = 0x08; /* RAM select */
        const TEST = 0x10; /* makes GA counters run 10x faster */
        const OWS = 0x20;  /* 0 wait state for shared memory */
        const TCM = 0x40;  /* terminal count mask for DMA */
        const NIM = 0x80;  /* NIC interrupt mask */
    }

    /* Gate Array Control Register */
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Gacr: u8 {
        const RST = 0x01;   /* hard reset GA */
        const XSEL = 0x02;  /* transceiver select */
        const EALO = 0x04;  /* window low 16 bytes of PROM to I/O space */
        const EAHI = 0x08;  /* window high 16 bytes of PROM to I/O space */
        const SHARE = 0x10; /* enable interrupt sharing */
        const DBSEL = 0x20; /* double buffer select for FIFOs */
        const DDIR = 0x40;  /* DMA direction (1 = host to adapter) */
        const START = 0x80; /* start DMA controller */
    }

    /* Gate Array Status Register */
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Streg: u8 {
        const REV = 0x07;   /* GA revision */
        const DIP = 0x08;   /* DMA in progress */
        const DTC = 0x10;   /* DMA terminal count */
        const OFLW = 0x20;  /* overflow */
        const UFLW = 0x40;  /* underflow */
        const DPRDY = 0x80; /* data port ready */
    }

    /* Gate Array Interrupt/DMA Configuration Register */
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Idcfr: u8 {
        const DRQ1 = 0x01;
        const DRQ2 = 0x02;
        const DRQ3 = 0x04;
        const IRQ2 = 0x10;
        const IRQ3 = 0x20;
        const IRQ4 = 0x40;
        const IRQ5 = 0x80;
    }
}

impl Idcfr {
    /// Lowest selected IRQ wins; selecting none is valid.
    pub fn irq(self) -> u8 {
        [(Idcfr::IRQ2, 2), (Idcfr::IRQ3, 3), (Idcfr::IRQ4, 4), (Idcfr::IRQ5, 5)]
            .into_iter()
            .find(|&(bit, _)| self.contains(bit))
            .map_or(0, |(_, irq)| irq)
    }

    /// Lowest selected DRQ wins; selecting none is valid.
    pub fn drq(self) -> u8 {
        [(Idcfr::DRQ1, 1), (Idcfr::DRQ2, 2), (Idcfr::DRQ3, 3)]
            .into_iter()
            .find(|&(bit, _)| self.contains(bit))
            .map_or(0, |(_, drq)| drq)
    }
}

/// Gate Array register state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ElGa {
    pub pstr: u8,
    pub pspr: u8,
    pub dqtr: u8,
    pub bcfr: u8,
    pub pcfr: u8,
    pub gacfr: Gacfr,
    pub gacr: Gacr,
    pub streg: Streg,
    pub idcfr: Idcfr,
    pub damsb: u8,
    pub dalsb: u8,
    pub vptr2: u8,
    pub vptr1: u8,
    pub vptr0: u8,
    /* Current DMA address, loaded from DAMSB/DALSB on start. */
    pub cdadr: u16,
    pub ga_irq: bool,
}

/// 3Com 3C503, 8K shared RAM at local 2000h.
#[derive(Debug, Clone, Copy, Default)]
pub struct Elnk503;

impl OemVariant for Elnk503 {
    fn device_type(&self) -> DeviceType {
        DeviceType::Elnk503
    }

    /* Only 14 bits of address are decoded. */
    fn decode_local_address(&self, addr: u16) -> LocalAddr {
        let addr = addr & 0x3fff;
        if addr >= 0x2000 {
            LocalAddr::Ram(usize::from(addr - 0x2000))
        } else {
            LocalAddr::Unmapped(addr)
        }
    }

    fn build_prom(&self, mac: &MacAddr, prom: &mut [u8; PROM_SIZE]) {
        prom[..6].copy_from_slice(&mac.0);
    }

    fn io_port_layout(&self, io_base: u16, mem_base: u32, mem_size: u32) -> IoPortLayout {
        IoPortLayout {
            core: io_base..io_base + 0x10,
            nic: io_base + 0x400..io_base + 0x410,
            shared_mem: Some(mem_base..mem_base + mem_size),
        }
    }
}

impl DpNicState {
    pub(crate) fn el_hard_reset(&mut self) {
        self.ga = ElGa::default();

        /* Jumper settings as seen by software. */
        if let Some(i) = EL_IO_BASES.iter().position(|&b| b == self.config.io_base) {
            self.ga.bcfr = 1 << i;
        }
        if let Some(i) = EL_MEM_BASES.iter().position(|&b| b == self.config.mem_base) {
            self.ga.pcfr = 0x80 >> i;
        }
    }

    fn el_soft_reset(&mut self) {
        debug!("3Com503: resetting Gate Array");

        /* Most GA registers are zeroed. */
        self.ga.pstr = 0;
        self.ga.pspr = 0;
        self.ga.dqtr = 0;
        self.el_write_gacfr(0);
        self.ga.streg = Streg::from_bits_retain(ELNKII_GA_REV);
        self.ga.vptr0 = 0;
        self.ga.vptr1 = 0;
        self.ga.vptr2 = 0;
        self.ga.dalsb = 0;
        self.ga.damsb = 0;
        self.el_write_idcfr(0);
        /* Low bit set means in reset. */
        self.ga.gacr = Gacr::from_bits_retain(0x0b);
        self.ga.ga_irq = false;

        self.dp8390_core_reset();
    }

    fn el_write_idcfr(&mut self, val: u8) {
        let idcfr = Idcfr::from_bits_retain(val);

        let (old_irq, new_irq) = (self.isa_irq, idcfr.irq());
        if old_irq != new_irq {
            debug!("3Com503: switching IRQ {} -> {}", old_irq, new_irq);
            /* Move an active interrupt along. */
            if self.nic_irq_active {
                self.set_isa_irq(old_irq, false);
                self.set_isa_irq(new_irq, true);
            }
            self.isa_irq = new_irq;
        }

        let new_drq = idcfr.drq();
        if self.el_isa_dma != new_drq {
            debug!("3Com503: switching DRQ {} -> {}", self.el_isa_dma, new_drq);
            self.el_isa_dma = new_drq;
        }

        self.ga.idcfr = idcfr;
    }

    fn el_write_gacfr(&mut self, val: u8) {
        let gacfr = Gacfr::from_bits_retain(val);
        let nim = gacfr.contains(Gacfr::NIM);

        if nim != self.ga.gacfr.contains(Gacfr::NIM) && self.nic_irq_active {
            debug!(
                "3Com503: {} active IRQ",
                if nim { "masking" } else { "unmasking" }
            );
            self.set_isa_irq(self.isa_irq, !nim);
        }
        if gacfr.contains(Gacfr::RSEL) != self.ga.gacfr.contains(Gacfr::RSEL) {
            debug!(
                "3Com503: RSEL={} MBS={}",
                gacfr.contains(Gacfr::RSEL),
                (gacfr & Gacfr::MBS).bits()
            );
        }

        self.ga.gacfr = gacfr;
    }

    /// The guest picked the channel the DMA controller was set up with.
    fn el_dma_channel(&self) -> Option<u8> {
        self.isa_dma.filter(|&ch| ch == self.el_isa_dma)
    }

    fn el_write_gacr(&mut self, val: u8) {
        let gacr = Gacr::from_bits_retain(val);

        if gacr.contains(Gacr::RST) != self.ga.gacr.contains(Gacr::RST) {
            /* Coming out of reset only clears RST; the 3C503 diagnostics check this. */
            if gacr.contains(Gacr::RST) {
                self.el_soft_reset();
            } else {
                self.ga.gacr.remove(Gacr::RST);
            }
            return;
        }

        /* Data port is ready for as long as a transfer is started. */
        if gacr.contains(Gacr::START) {
            self.ga.cdadr = make_u16(self.ga.dalsb, self.ga.damsb);
            debug!(
                "3Com503: DMA started, ddir={} cdadr={:04x}",
                gacr.contains(Gacr::DDIR),
                self.ga.cdadr
            );
            self.ga.streg.insert(Streg::DPRDY | Streg::DIP);
            self.ga.streg.remove(Streg::DTC);
        } else {
            self.ga.streg.remove(Streg::DPRDY | Streg::DIP);
        }

        if let Some(ch) = self.el_dma_channel() {
            let dprdy = self.ga.streg.contains(Streg::DPRDY);
            if let Some(dma) = self.dma.as_mut() {
                dma.set_dreq(ch, dprdy);
                if dprdy {
                    dma.schedule();
                }
                debug!("3Com503: DREQ for channel {} set to {}", ch, dprdy);
            }
        }

        self.ga.gacr = gacr;
        trace!(
            "3Com503: GACR={:02x} ealo={} eahi={}",
            val,
            gacr.contains(Gacr::EALO),
            gacr.contains(Gacr::EAHI)
        );
    }

    /* Step CDADR, wrapping from PSPR back to PSTR. */
    fn el_ga_advance(&mut self) {
        let ga = &mut self.ga;

        ga.cdadr = ga.cdadr.wrapping_add(1);
        if hi(ga.cdadr) == ga.pspr && ga.pspr != ga.pstr {
            trace!(
                "3Com503: GA DMA wrap, cdadr={:04x} PSPR={:02x}00 PSTR={:02x}00",
                ga.cdadr,
                ga.pspr,
                ga.pstr
            );
            set_hi(&mut ga.cdadr, ga.pstr);
        }
    }

    fn el_ga_data_write(&mut self, val: u8) {
        /* Only when started in download mode. */
        if !self.ga.gacr.contains(Gacr::START | Gacr::DDIR) {
            return;
        }

        if let LocalAddr::Ram(ofs) = self.oem.decode_local_address(self.ga.cdadr) {
            self.local_ram[ofs] = val;
        }
        self.el_ga_advance();
    }

    fn el_ga_data_read(&mut self) -> u8 {
        /* Only when started in upload mode. */
        if !self.ga.gacr.contains(Gacr::START) || self.ga.gacr.contains(Gacr::DDIR) {
            return 0xcd;
        }

        let val = match self.oem.decode_local_address(self.ga.cdadr) {
            LocalAddr::Ram(ofs) => self.local_ram[ofs],
            LocalAddr::Unmapped(_) => 0xcd,
        };
        self.el_ga_advance();
        val
    }

    pub(crate) fn el_ga_io_write(&mut self, reg: u8, val: u8) {
        trace!("3Com503: GA write reg={:x} val={:02x}", reg, val);

        match reg & 0x0f {
            GAR_PSTR => self.ga.pstr = val,
            GAR_PSPR => self.ga.pspr = val,
            GAR_DQTR => self.ga.dqtr = val,
            GAR_GACFR => self.el_write_gacfr(val),
            GAR_GACR => self.el_write_gacr(val),
            GAR_STREG => {
                /* Any write clears the GA interrupt. */
                self.ga.streg.remove(Streg::DTC);
                self.ga.ga_irq = false;
                self.dp8390_update_irq();
            }
            GAR_IDCFR => self.el_write_idcfr(val),
            GAR_DAMSB => self.ga.damsb = val,
            GAR_DALSB => self.ga.dalsb = val,
            GAR_VPTR2 => self.ga.vptr2 = val,
            GAR_VPTR1 => self.ga.vptr1 = val,
            GAR_VPTR0 => self.ga.vptr0 = val,
            GAR_RFMSB | GAR_RFLSB => self.el_ga_data_write(val),
            /* BCFR and PCFR are read-only. */
            _ => {}
        }
    }

    pub(crate) fn el_ga_io_read(&mut self, reg: u8) -> u8 {
        let reg = reg & 0x0f;
        if reg >= GAR_RFMSB {
            return self.el_ga_data_read();
        }

        let ga = &self.ga;
        let val = match reg {
            GAR_PSTR => ga.pstr,
            GAR_PSPR => ga.pspr,
            GAR_DQTR => ga.dqtr,
            GAR_R_BCFR => ga.bcfr,
            GAR_R_PCFR => ga.pcfr,
            GAR_GACFR => ga.gacfr.bits(),
            GAR_GACR => ga.gacr.bits(),
            GAR_STREG => ga.streg.bits(),
            GAR_IDCFR => ga.idcfr.bits(),
            GAR_DAMSB => ga.damsb,
            GAR_DALSB => ga.dalsb,
            GAR_VPTR2 => ga.vptr2,
            GAR_VPTR1 => ga.vptr1,
            GAR_VPTR0 => ga.vptr0,
            _ => 0,
        };

        trace!("3Com503: GA read reg={:x} val={:02x}", reg, val);
        val
    }

    pub(crate) fn el_mem_read(&self, off: u32) -> u8 {
        if self.ga.gacfr.contains(Gacfr::RSEL) {
            self.local_ram[(off & u32::from(MEM_MASK)) as usize]
        } else {
            0xff
        }
    }

    pub(crate) fn el_mem_write(&mut self, off: u32, val: u8) {
        if self.ga.gacfr.contains(Gacfr::RSEL) {
            self.local_ram[(off & u32::from(MEM_MASK)) as usize] = val;
        } else {
            trace!("3Com503: ignoring shared memory write at {:#x}", off);
        }
    }

    /*
    * ISA DMA channel handler. The Gate Array tracks the adapter side
    * address on its own; anything outside local RAM is skipped. Mode and
    * DREQ always refer to the configured channel.
    */
    pub(crate) fn el_dma_transfer(&mut self, channel: u8, pos: u32, len: u32) -> u32 {
        let end = pos.wrapping_add(len);
        let isa_dma = self.isa_dma.unwrap_or(channel);
        let Some(dma) = self.dma.as_mut() else {
            warn!("3Com503: DMA transfer without a DMA controller");
            return end;
        };

        let xfer_type = (dma.channel_mode(isa_dma) & 0x0c) >> 2;
        let mut addr = usize::from(self.ga.cdadr);
        let mut cb = len as usize;
        trace!(
            "3Com503: DMA type={} pos={} len={} cdadr={:04x}",
            xfer_type,
            pos,
            len,
            addr
        );

        if addr < 0x2000 {
            let skip = 0x2000 - addr;
            addr = 0x2000;
            if skip < cb {
                debug!("3Com503: DMA skipping {} bytes", skip);
                cb -= skip;
            } else {
                debug!("3Com503: DMA below local RAM");
                cb = 0;
            }
        }

        let start = addr - 0x2000;
        cb = cb.min(MEM_SIZE.saturating_sub(start));

        if cb != 0 {
            let ddir = self.ga.gacr.contains(Gacr::DDIR);

            if xfer_type == DTYPE_WRITE {
                if !ddir {
                    dma.write_memory(channel, &self.local_ram[start..start + cb], pos);
                } else {
                    debug!("3Com503: DMA write with GACR.DDIR set, ignored");
                }
            } else if ddir {
                dma.read_memory(channel, &mut self.local_ram[start..start + cb], pos);
            } else {
                debug!("3Com503: DMA read with GACR.DDIR clear, ignored");
            }
        }

        /* Drop DREQ and signal terminal count. */
        dma.set_dreq(isa_dma, false);
        self.ga.streg.insert(Streg::DTC);
        self.ga.ga_irq = true;
        self.dp8390_update_irq();

        end
    }
}
