/*
*		Novell NE1000 and NE2000 boards.
*
*		The DP8390 sits at the I/O base, followed by 16 bytes of ASIC
*		ports: a data port used for remote DMA and a reset port. There
*		is no shared memory; local RAM and the station address PROM are
*		only reachable through remote DMA.
*
*		The NE2000 has 8 bytes of data port followed by 8 bytes of
*		reset port. The NE1000 has 4 bytes of each, aliased twice.
*/
use log::*;

use crate::device::{DeviceType, MacAddr};
use crate::network::dpnic::DpNicState;
use crate::network::net_dp8390::*;

/// Novell NE1000, 8-bit, 8K local RAM at 2000h.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ne1000;

/// Novell NE2000, 16-bit, 16K local RAM at 4000h.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ne2000;

fn ne_build_prom(mac: &MacAddr, prom: &mut [u8; PROM_SIZE]) {
    prom[0x00..0x06].copy_from_slice(&mac.0);
    prom[0x10..0x16].copy_from_slice(&mac.0);
    /* Word-wide and byte-wide signatures. */
    prom[0x0e] = b'W';
    prom[0x0f] = b'W';
    prom[0x1e] = b'B';
    prom[0x1f] = b'B';
}

fn ne_io_port_layout(io_base: u16) -> IoPortLayout {
    IoPortLayout {
        core: io_base..io_base + 0x10,
        nic: io_base + 0x10..io_base + 0x20,
        shared_mem: None,
    }
}

impl OemVariant for Ne1000 {
    fn device_type(&self) -> DeviceType {
        DeviceType::Ne1000
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
        ne_build_prom(mac, prom);
    }

    fn io_port_layout(&self, io_base: u16, _mem_base: u32, _mem_size: u32) -> IoPortLayout {
        ne_io_port_layout(io_base)
    }
}

impl OemVariant for Ne2000 {
    fn device_type(&self) -> DeviceType {
        DeviceType::Ne2000
    }

    /* Only 15 bits of address are decoded. */
    fn decode_local_address(&self, addr: u16) -> LocalAddr {
        let addr = addr & 0x7fff;
        if addr >= 0x4000 {
            LocalAddr::Ram(usize::from(addr - 0x4000))
        } else {
            LocalAddr::Unmapped(addr)
        }
    }

    fn build_prom(&self, mac: &MacAddr, prom: &mut [u8; PROM_SIZE]) {
        ne_build_prom(mac, prom);
    }

    fn io_port_layout(&self, io_base: u16, _mem_base: u32, _mem_size: u32) -> IoPortLayout {
        ne_io_port_layout(io_base)
    }

    fn nic_word_io(&self) -> bool {
        true
    }
}

impl DpNicState {
    fn ne_is_ne2000(&self) -> bool {
        self.oem.device_type() == DeviceType::Ne2000
    }

    fn ne_local_ram_write8(&mut self, addr: u16, val: u8) {
        if let LocalAddr::Ram(ofs) = self.oem.decode_local_address(addr) {
            self.local_ram[ofs] = val;
        }
    }

    fn ne_local_ram_write16(&mut self, addr: u16, val: u16) {
        /* The NE1000 has no 16-bit data path. */
        if !self.ne_is_ne2000() {
            return;
        }
        if let LocalAddr::Ram(ofs) = self.oem.decode_local_address(addr & 0x7ffe) {
            self.local_ram[ofs] = lo(val);
            self.local_ram[ofs + 1] = hi(val);
        }
    }

    /*
    * Below the RAM window only the PROM answers, with just 4 address
    * bits decoded. The NE2000 wires bus address bits 1:4 to the PROM.
    */
    fn ne_prom_byte(&self, addr: u16) -> u8 {
        if self.ne_is_ne2000() {
            self.prom[usize::from((addr & 0x1f) >> 1)]
        } else {
            self.prom[usize::from(addr & 0x0f) + 16]
        }
    }

    fn ne_local_ram_read8(&self, addr: u16) -> u8 {
        match self.oem.decode_local_address(addr) {
            LocalAddr::Ram(ofs) => self.local_ram[ofs],
            LocalAddr::Unmapped(addr) => self.ne_prom_byte(addr),
        }
    }

    fn ne_local_ram_read16(&self, addr: u16) -> u16 {
        if !self.ne_is_ne2000() {
            return 0xffff;
        }
        match self.oem.decode_local_address(addr & 0x7ffe) {
            LocalAddr::Ram(ofs) => make_u16(self.local_ram[ofs], self.local_ram[ofs + 1]),
            LocalAddr::Unmapped(addr) => {
                let b = self.ne_prom_byte(addr);
                make_u16(b, b)
            }
        }
    }

    /*
    * The 8390 bumps the address and decreases the byte count by the
    * selected transfer width after every access.
    */
    fn ne_remote_dma_advance(&mut self) {
        let wts = self.core.dcr.contains(Dcr::WTS);
        let core = &mut self.core;

        core.crda = core.crda.wrapping_add(if wts { 2 } else { 1 });
        if hi(core.crda) == core.pstop && core.pstop != core.pstart {
            trace!(
                "NE2000: remote DMA wrap, CRDA={:04x} PSTOP={:02x}00 PSTART={:02x}00",
                core.crda,
                core.pstop,
                core.pstart
            );
            set_hi(&mut core.crda, core.pstart);
        }

        /* Don't overshoot and miss the end with word transfers. */
        core.rbcr = core.rbcr.wrapping_sub(1);
        if wts && core.rbcr != 0 {
            core.rbcr -= 1;
        }

        if core.rbcr == 0 {
            debug!("NE2000: remote DMA complete");
            core.isr.insert(Isr::RDC);
            core.cr.set_rd(0);
            self.dp8390_update_irq();
        }
    }

    fn ne_data_port_write(&mut self, val: u16) {
        /* Ignored unless a remote write is in progress. */
        if self.core.cr.rd() != DP_CR_RDMA_WR {
            return;
        }

        let crda = self.core.crda;
        if self.core.dcr.contains(Dcr::WTS) {
            trace!("NE2000: RDMA16 write {:04x} to local addr {:04x}", val, crda);
            self.ne_local_ram_write16(crda, val);
        } else {
            trace!("NE2000: RDMA8 write {:02x} to local addr {:04x}", val as u8, crda);
            self.ne_local_ram_write8(crda, val as u8);
        }
        self.ne_remote_dma_advance();
    }

    fn ne_data_port_read(&mut self) -> u16 {
        /* Ignored unless a remote read is in progress. */
        if self.core.cr.rd() != DP_CR_RDMA_RD {
            return 0x1234;
        }

        let crda = self.core.crda;
        let val = if self.core.dcr.contains(Dcr::WTS) {
            self.ne_local_ram_read16(crda)
        } else {
            u16::from(self.ne_local_ram_read8(crda))
        };
        trace!("NE2000: RDMA read from local addr {:04x}: {:04x}", crda, val);
        self.ne_remote_dma_advance();
        val
    }

    fn ne_port_reg(&self, reg: u8) -> u8 {
        let reg = reg & 0x0f;
        if self.ne_is_ne2000() {
            reg >> 1
        } else {
            reg
        }
    }

    pub(crate) fn ne_io_write(&mut self, reg: u8, val: u16) {
        trace!("NE2000: write reg={:x} val={:04x}", reg, val);

        if self.ne_port_reg(reg) & 0x04 != 0 {
            debug!("NE2000: reset port written");
            self.dp8390_core_reset();
        } else {
            self.ne_data_port_write(val);
        }
    }

    pub(crate) fn ne_io_read(&mut self, reg: u8) -> u16 {
        let val = if self.ne_port_reg(reg) & 0x04 != 0 {
            0x52
        } else {
            self.ne_data_port_read()
        };
        trace!("NE2000: read reg={:x} val={:04x}", reg, val);
        val
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::testing::*;

    #[test]
    fn decodes_local_ram_windows() {
        assert_eq!(Ne1000.decode_local_address(0x2000), LocalAddr::Ram(0));
        assert_eq!(Ne1000.decode_local_address(0x3fff), LocalAddr::Ram(0x1fff));
        assert_eq!(Ne1000.decode_local_address(0x6123), LocalAddr::Ram(0x0123));
        assert_eq!(Ne1000.decode_local_address(0x1fff), LocalAddr::Unmapped(0x1fff));

        assert_eq!(Ne2000.decode_local_address(0x4000), LocalAddr::Ram(0));
        assert_eq!(Ne2000.decode_local_address(0x4010), LocalAddr::Ram(0x10));
        assert_eq!(Ne2000.decode_local_address(0xc010), LocalAddr::Ram(0x10));
        assert_eq!(Ne2000.decode_local_address(0x3fff), LocalAddr::Unmapped(0x3fff));
    }

    #[test]
    fn remote_dma_round_trip() {
        let rig = rig(DeviceType::Ne2000);
        rig.start(0x46, 0x80, 0x00);
        let data: Vec<u8> = (0..100).map(|i| (i * 3) as u8).collect();

        rig.dma_write(0x4200, &data);
        assert_eq!(rig.inb(DPR_P0_ISR) & Isr::RDC.bits(), Isr::RDC.bits());
        assert_eq!(Cr::from_bits_retain(rig.inb(DPR_CR)).rd(), 0);
        assert_eq!(rig.ram(0x200, 100), data);

        assert_eq!(rig.dma_read(0x4200, 100), data);
    }

    #[test]
    fn single_byte_at_ram_start() {
        let rig = rig(DeviceType::Ne2000);
        rig.start(0x46, 0x80, 0x00);

        rig.dma_write(0x4010, &[0xab]);
        assert_eq!(rig.ram(0x10, 1), vec![0xab]);
        assert_eq!(rig.dma_read(0x4010, 1), vec![0xab]);
    }

    #[test]
    fn word_transfers_move_two_bytes() {
        let rig = rig(DeviceType::Ne2000);
        rig.start(0x46, 0x80, 0x00);
        rig.outb(0x0e, (Dcr::WTS | Dcr::LS).bits() | 0x40);

        rig.setup_remote_dma(0x4300, 4, DP_CR_RDMA_WR);
        rig.nic_outw(0, 0x2211);
        rig.nic_outw(0, 0x4433);
        assert_eq!(rig.ram(0x300, 4), vec![0x11, 0x22, 0x33, 0x44]);
        assert_eq!(rig.inb(DPR_P0_ISR) & Isr::RDC.bits(), Isr::RDC.bits());

        /* Odd count: the last word transfer finishes it. */
        rig.setup_remote_dma(0x4300, 3, DP_CR_RDMA_RD);
        assert_eq!(rig.nic_inw(0), 0x2211);
        assert_eq!(Cr::from_bits_retain(rig.inb(DPR_CR)).rd(), DP_CR_RDMA_RD);
        assert_eq!(rig.nic_inw(0), 0x4433);
        assert_eq!(Cr::from_bits_retain(rig.inb(DPR_CR)).rd(), 0);
    }

    #[test]
    fn prom_reads_below_ram_window() {
        let rig = rig(DeviceType::Ne2000);
        rig.start(0x46, 0x80, 0x00);

        /* NE2000 drivers read the PROM with byte transfers at 0. */
        let prom = rig.dma_read(0x0000, 32);
        let expect: Vec<u8> = (0..32).map(|i| rig.nic.with_state(|s| s.prom[i >> 1])).collect();
        assert_eq!(prom, expect);
        assert_eq!(prom[..2], [MAC[0], MAC[0]]);
        assert_eq!(prom[0x1c..], *b"WWWW");

        /* Word reads double up the PROM byte. */
        rig.outb(0x0e, (Dcr::WTS | Dcr::LS).bits() | 0x40);
        rig.setup_remote_dma(0x0002, 2, DP_CR_RDMA_RD);
        assert_eq!(rig.nic_inw(0), make_u16(MAC[1], MAC[1]));
    }

    #[test]
    fn ne1000_prom_and_ram() {
        let rig = rig(DeviceType::Ne1000);
        rig.start(0x26, 0x40, 0x00);

        let prom = rig.dma_read(0x0000, 16);
        assert_eq!(prom[..6], MAC);
        assert_eq!(prom[0x0e..], *b"BB");

        rig.dma_write(0x2100, &[1, 2, 3]);
        assert_eq!(rig.ram(0x100, 3), vec![1, 2, 3]);
        assert_eq!(rig.dma_read(0x2100, 3), vec![1, 2, 3]);

        /* No word path on the 8-bit board. */
        rig.outb(0x0e, (Dcr::WTS | Dcr::LS).bits() | 0x40);
        rig.setup_remote_dma(0x2100, 2, DP_CR_RDMA_RD);
        assert_eq!(rig.nic_inb(0), 0xff);
        rig.setup_remote_dma(0x2100, 2, DP_CR_RDMA_WR);
        rig.nic_outb(0, 0x99);
        assert_eq!(rig.ram(0x100, 1), vec![1]);
    }

    #[test]
    fn data_port_idle_without_remote_dma() {
        let rig = rig(DeviceType::Ne2000);
        rig.start(0x46, 0x80, 0x00);

        assert_eq!(rig.nic_inw(0), 0x1234);
        rig.nic_outb(0, 0x77);
        assert!(rig.ram(0, MEM_SIZE).iter().all(|&b| b == 0));
    }

    #[test]
    fn remote_dma_wraps_at_pstop() {
        let rig = rig(DeviceType::Ne2000);
        rig.start(0x46, 0x80, 0x00);

        rig.dma_write(0x7ffe, &[0xaa, 0xbb, 0xcc]);
        assert_eq!(rig.ram(0x3ffe, 2), vec![0xaa, 0xbb]);
        assert_eq!(rig.ram(0x0600, 1), vec![0xcc]);
        assert_eq!(rig.inw(DPR_P0_CRDA0), 0x4601);
    }

    #[test]
    fn reset_port_resets_core() {
        let ne2000 = rig(DeviceType::Ne2000);
        ne2000.start(0x46, 0x80, 0x00);

        assert_eq!(ne2000.nic_inb(0x0f), 0x52);
        ne2000.nic_outb(0x0f, 0);
        assert_eq!(ne2000.inb(DPR_CR) & Cr::STP.bits(), Cr::STP.bits());
        assert_eq!(ne2000.inb(DPR_P0_ISR) & Isr::RST.bits(), Isr::RST.bits());

        /* Data and reset ports alias every 8 bytes on the NE1000. */
        let ne1000 = rig(DeviceType::Ne1000);
        ne1000.start(0x26, 0x40, 0x00);
        assert_eq!(ne1000.nic_inb(0x0c), 0x52);
        ne1000.nic_outb(0x04, 0);
        assert_eq!(ne1000.inb(DPR_CR) & Cr::STP.bits(), Cr::STP.bits());
    }
}
