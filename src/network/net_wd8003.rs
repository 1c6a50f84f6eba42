/*
*		Western Digital WD8003E and WD8013EBT EtherCard Plus.
*
*		The board registers and the station address PROM come first in
*		the I/O range, the DP8390 follows 16 bytes in. Local RAM is
*		shared memory in the ISA memory space, 8K on the WD8003 and 16K
*		on the WD8013, enabled through CTRL1.MEME.
*/
use bitflags::bitflags;
use log::*;

use crate::device::{DeviceType, MacAddr};
use crate::network::dpnic::DpNicState;
use crate::network::net_dp8390::*;

/* Board register offsets. */
pub const WDR_CTRL1: u8 = 0; /* Control register 1 */
pub const WDR_ATDET: u8 = 1; /* 16-bit slot detect */
pub const WDR_IOBASE: u8 = 2; /* I/O base register */
pub const WDR_CTRL2: u8 = 5; /* Control register 2 */
pub const WDR_JP: u8 = 6; /* Jumper settings */
pub const WDR_PROM: u8 = 8; /* PROM offset in I/O space */

bitflags! {
    /* WD Control register 1 */
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WdCtrl1: u8 {
        const A13_18 = 0x3f; /* shared memory address bits 13-18 */
        const MEME = 0x40;   /* enable memory access */
        const RESET = 0x80;  /* reset NIC core */
    }

    /* WD Control register 2 */
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WdCtrl2: u8 {
        const A19_23 = 0x1f; /* shared memory address bits 19-23 */
        const MEMW = 0x40;   /* memory width (16-bit wide if set) */
        const M16 = 0x80;    /* allow 16-bit host memory cycles */
    }
}

/// WD8003E, 8K shared RAM.
#[derive(Debug, Clone, Copy, Default)]
pub struct Wd8003;

/// WD8013EBT, 16K shared RAM.
#[derive(Debug, Clone, Copy, Default)]
pub struct Wd8013;

/*
* Only 8 bytes of PROM: the address, a board ID (3 for the 8003E, 5 for
* the 8013EBT) and a checksum making the sum of all eight bytes FFh.
*/
fn wd_build_prom(mac: &MacAddr, board_id: u8, prom: &mut [u8; PROM_SIZE]) {
    prom[..6].copy_from_slice(&mac.0);
    prom[6] = board_id;

    let sum = prom[..7].iter().fold(0u8, |sum, &b| sum.wrapping_add(b));
    prom[7] = 0xff_u8.wrapping_sub(sum);
}

fn wd_io_port_layout(io_base: u16, mem_base: u32, mem_size: u32) -> IoPortLayout {
    IoPortLayout {
        core: io_base + 0x10..io_base + 0x20,
        nic: io_base..io_base + 0x10,
        shared_mem: Some(mem_base..mem_base + mem_size),
    }
}

fn wd_decode_local_address(addr: u16) -> LocalAddr {
    LocalAddr::Ram(usize::from(addr & MEM_MASK))
}

impl OemVariant for Wd8003 {
    fn device_type(&self) -> DeviceType {
        DeviceType::Wd8003
    }

    fn decode_local_address(&self, addr: u16) -> LocalAddr {
        wd_decode_local_address(addr)
    }

    fn build_prom(&self, mac: &MacAddr, prom: &mut [u8; PROM_SIZE]) {
        wd_build_prom(mac, 3, prom);
    }

    fn io_port_layout(&self, io_base: u16, mem_base: u32, mem_size: u32) -> IoPortLayout {
        wd_io_port_layout(io_base, mem_base, mem_size)
    }
}

impl OemVariant for Wd8013 {
    fn device_type(&self) -> DeviceType {
        DeviceType::Wd8013
    }

    fn decode_local_address(&self, addr: u16) -> LocalAddr {
        wd_decode_local_address(addr)
    }

    fn build_prom(&self, mac: &MacAddr, prom: &mut [u8; PROM_SIZE]) {
        wd_build_prom(mac, 5, prom);
    }

    fn io_port_layout(&self, io_base: u16, mem_base: u32, mem_size: u32) -> IoPortLayout {
        wd_io_port_layout(io_base, mem_base, mem_size)
    }
}

impl DpNicState {
    pub(crate) fn wd_io_write(&mut self, reg: u8, val: u8) {
        trace!("WD80x3: write reg={:x} val={:02x}", reg, val);

        match reg & 0x0f {
            WDR_CTRL1 => {
                let nctrl1 = WdCtrl1::from_bits_retain(val);
                if nctrl1.contains(WdCtrl1::MEME) != self.ctrl1.contains(WdCtrl1::MEME) {
                    debug!("WD80x3: CTRL1.MEME={}", nctrl1.contains(WdCtrl1::MEME));
                    self.ctrl1.set(WdCtrl1::MEME, nctrl1.contains(WdCtrl1::MEME));
                }
                if nctrl1.contains(WdCtrl1::RESET) {
                    self.dp8390_core_reset();
                    self.ctrl1 = WdCtrl1::empty();
                }
            }
            WDR_CTRL2 => {
                /* Not used for anything yet. */
                if val != self.ctrl2.bits() {
                    debug!("WD80x3: CTRL2={:02x}, new={:02x}", self.ctrl2.bits(), val);
                    self.ctrl2 = WdCtrl2::from_bits_retain(val);
                }
            }
            /* Most of the WD registers are read-only. */
            _ => {}
        }
    }

    pub(crate) fn wd_io_read(&mut self, reg: u8) -> u8 {
        let reg = reg & 0x0f;

        let val = if reg >= WDR_PROM {
            self.prom[usize::from(reg & 7)]
        } else if self.oem.device_type() == DeviceType::Wd8013 {
            match reg {
                WDR_CTRL1 => self.ctrl1.bits(),
                WDR_ATDET => 1,
                WDR_IOBASE => self.prom[usize::from(WDR_IOBASE)],
                WDR_CTRL2 => self.ctrl2.bits(),
                WDR_JP => 0xa0,
                _ => 0x00,
            }
        } else {
            /* Old boards alias the PROM over unimplemented registers. */
            match reg {
                WDR_CTRL2 => 1,
                WDR_JP => 0xa0,
                _ => self.prom[usize::from(reg & 7)],
            }
        };

        trace!("WD80x3: read reg={:x} val={:02x}", reg, val);
        val
    }

    pub(crate) fn wd_mem_read(&self, off: u32) -> u8 {
        if self.ctrl1.contains(WdCtrl1::MEME) {
            self.local_ram[(off & u32::from(MEM_MASK)) as usize]
        } else {
            0xff
        }
    }

    pub(crate) fn wd_mem_write(&mut self, off: u32, val: u8) {
        if self.ctrl1.contains(WdCtrl1::MEME) {
            self.local_ram[(off & u32::from(MEM_MASK)) as usize] = val;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceConfig, MacAddr};
    use crate::network::testing::*;

    #[test]
    fn prom_checksums_to_ff() {
        for (device_type, board_id) in [(DeviceType::Wd8003, 3), (DeviceType::Wd8013, 5)] {
            let rig = rig(device_type);
            let prom: Vec<u8> = (WDR_PROM..WDR_PROM + 8).map(|r| rig.nic_inb(r)).collect();

            /* WD software wants its own OUI. */
            assert_eq!(prom[..6], [0x00, 0x00, 0xc0, MAC[3], MAC[4], MAC[5]]);
            assert_eq!(prom[6], board_id);
            assert_eq!(prom.iter().fold(0u8, |s, &b| s.wrapping_add(b)), 0xff);
            assert_eq!(rig.nic.mac(), MacAddr(<[u8; 6]>::try_from(&prom[..6]).unwrap()));
        }
    }

    #[test]
    fn register_layout() {
        let rig = rig(DeviceType::Wd8003);
        let layout = rig.nic.io_port_layout();

        assert_eq!(layout.nic, 0x280..0x290);
        assert_eq!(layout.core, 0x290..0x2a0);
        assert_eq!(layout.shared_mem, Some(0xd0000..0xd2000));

        let rig = rig_with(
            DeviceConfig::new(DeviceType::Wd8013, MacAddr(MAC))
                .with_io_base(0x240)
                .with_mem_base(0xcc000),
        );
        let layout = rig.nic.io_port_layout();
        assert_eq!(layout.core, 0x250..0x260);
        assert_eq!(layout.shared_mem, Some(0xcc000..0xd0000));
    }

    #[test]
    fn board_register_reads() {
        let wd8013 = rig(DeviceType::Wd8013);
        wd8013.nic_outb(WDR_CTRL2, 0x41);
        assert_eq!(wd8013.nic_inb(WDR_ATDET), 1);
        assert_eq!(wd8013.nic_inb(WDR_CTRL2), 0x41);
        assert_eq!(wd8013.nic_inb(WDR_JP), 0xa0);
        assert_eq!(wd8013.nic_inb(3), 0);

        let wd8003 = rig(DeviceType::Wd8003);
        assert_eq!(wd8003.nic_inb(WDR_CTRL2), 1);
        assert_eq!(wd8003.nic_inb(WDR_JP), 0xa0);
        assert_eq!(wd8003.nic_inb(3), wd8003.nic_inb(WDR_PROM + 3));
        assert_eq!(wd8003.nic_inb(WDR_CTRL1), 0x00);
    }

    #[test]
    fn shared_memory_needs_meme() {
        let rig = rig(DeviceType::Wd8013);
        let mut buf = [0u8; 4];

        rig.nic.mem_write(0xd0100, &[1, 2, 3, 4]).unwrap();
        rig.nic.mem_read(0xd0100, &mut buf).unwrap();
        assert_eq!(buf, [0xff; 4]);
        assert!(rig.ram(0x100, 4).iter().all(|&b| b == 0));

        rig.nic_outb(WDR_CTRL1, WdCtrl1::MEME.bits() | 0x10);
        assert_eq!(rig.nic_inb(WDR_CTRL1), WdCtrl1::MEME.bits());
        rig.nic.mem_write(0xd0100, &[1, 2, 3, 4]).unwrap();
        rig.nic.mem_read(0xd0100, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(rig.ram(0x100, 4), vec![1, 2, 3, 4]);

        assert!(rig.nic.mem_read(0xd3ffc, &mut buf).is_ok());
        assert!(rig.nic.mem_read(0xd3ffe, &mut [0u8; 3]).is_err());
        assert!(rig.nic.mem_read(0xcffff, &mut [0u8; 1]).is_err());
    }

    #[test]
    fn ctrl1_reset_resets_core() {
        let rig = rig(DeviceType::Wd8003);
        rig.start(0x06, 0x20, 0x00);
        rig.nic_outb(WDR_CTRL1, WdCtrl1::MEME.bits());

        rig.nic_outb(WDR_CTRL1, WdCtrl1::RESET.bits() | WdCtrl1::MEME.bits());
        assert_eq!(rig.inb(DPR_CR) & Cr::STP.bits(), Cr::STP.bits());
        assert_eq!(rig.nic.with_state(|s| s.ctrl1), WdCtrl1::empty());
    }

    #[test]
    fn frames_land_in_shared_memory() {
        let rig = rig(DeviceType::Wd8003);
        rig.start(0x06, 0x20, 0x00);
        rig.nic_outb(WDR_CTRL1, WdCtrl1::MEME.bits());

        let mut frame = vec![0x5a; 64];
        frame[..6].copy_from_slice(&rig.nic.mac().0);
        rig.nic.receive(&frame);

        let mut page = [0u8; 68];
        rig.nic.mem_read(0xd0600, &mut page).unwrap();
        assert_eq!(page[..4], [Rsr::PRX.bits(), 0x07, 68, 0]);
        assert_eq!(page[4..], frame[..]);
    }
}
