use std::fmt;
use std::str::FromStr;

use crate::error::{NicError, Result};
use log::*;

// device.h

/* Valid 3C503 DMA channels. */
pub const ELNKII_MIN_VALID_DMA: u8 = 1;
pub const ELNKII_MAX_VALID_DMA: u8 = 3;

/* Link up delay bounds, in milliseconds. */
pub const LINK_UP_DELAY_DEFAULT: u32 = 5000;
pub const LINK_UP_DELAY_MAX: u32 = 300_000;

/* Configuration keys understood by `DeviceConfig::from_pairs`. */
pub const CONFIG_KEYS: &[&str] = &[
    "MAC",
    "CableConnected",
    "Port",
    "MemBase",
    "IRQ",
    "DMA",
    "DeviceType",
    "LinkUpDelay",
    "LineSpeed",
];

/// Emulated board.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Ne1000 = 0,  /* Novell NE1000 */
    Ne2000 = 1,  /* Novell NE2000 */
    Wd8003 = 2,  /* WD EtherCard Plus */
    Wd8013 = 3,  /* WD EtherCard Plus 16 */
    Elnk503 = 4, /* 3Com 3C503 EtherLink II */
}

impl DeviceType {
    pub fn name(self) -> &'static str {
        match self {
            DeviceType::Ne1000 => "NE1000",
            DeviceType::Ne2000 => "NE2000",
            DeviceType::Wd8003 => "WD8003",
            DeviceType::Wd8013 => "WD8013",
            DeviceType::Elnk503 => "3C503",
        }
    }

    pub fn is_ne(self) -> bool {
        matches!(self, DeviceType::Ne1000 | DeviceType::Ne2000)
    }

    pub fn is_wd(self) -> bool {
        matches!(self, DeviceType::Wd8003 | DeviceType::Wd8013)
    }
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::Ne2000
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeviceType {
    type Err = NicError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NE1000" => Ok(DeviceType::Ne1000),
            "NE2000" => Ok(DeviceType::Ne2000),
            "WD8003" => Ok(DeviceType::Wd8003),
            "WD8013" => Ok(DeviceType::Wd8013),
            "3C503" => Ok(DeviceType::Elnk503),
            _ => Err(NicError::UnsupportedDeviceType(s.to_string())),
        }
    }
}

/// Ethernet station address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_multicast(&self) -> bool {
        self.0[0] & 1 != 0
    }

    /// Replaces the first three bytes with a vendor prefix.
    pub fn with_oui(mut self, oui: [u8; 3]) -> Self {
        self.0[..3].copy_from_slice(&oui);
        self
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(octets: [u8; 6]) -> Self {
        MacAddr(octets)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = NicError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || NicError::InvalidConfigValue {
            key: "MAC",
            value: s.to_string(),
        };
        let mut mac = [0u8; 6];
        let mut parts = s.split(|c| c == ':' || c == '-');
        for byte in mac.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(MacAddr(mac))
    }
}

/// Run state of the virtual machine owning the device.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Created = 0,
    Running = 1,
    RunningLs = 2, /* running with live save in progress */
    Suspended = 3,
    PoweredOff = 4,
}

impl VmState {
    pub fn is_running(self) -> bool {
        matches!(self, VmState::Running | VmState::RunningLs)
    }

    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => VmState::Running,
            2 => VmState::RunningLs,
            3 => VmState::Suspended,
            4 => VmState::PoweredOff,
            _ => VmState::Created,
        }
    }
}

/// ISA resources and link options of one NIC instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub device_type: DeviceType,
    pub mac: MacAddr,
    pub cable_connected: bool,
    pub io_base: u16,
    pub irq: u8,
    pub dma: u8,
    pub mem_base: u32,
    pub link_up_delay_ms: u32,
}

impl DeviceConfig {
    /// Configuration with the board's factory resource assignment.
    pub fn new(device_type: DeviceType, mac: MacAddr) -> Self {
        let (io_base, irq, dma, mem_base) = match device_type {
            DeviceType::Ne1000 | DeviceType::Ne2000 => (0x300, 3, 0, 0),
            DeviceType::Wd8003 | DeviceType::Wd8013 => (0x280, 3, 0, 0xd0000),
            DeviceType::Elnk503 => (0x300, 3, 1, 0xdc000),
        };

        DeviceConfig {
            device_type,
            mac,
            cable_connected: true,
            io_base,
            irq,
            dma,
            mem_base,
            link_up_delay_ms: LINK_UP_DELAY_DEFAULT,
        }
    }

    /// Builds a configuration from `key=value` style pairs, the way the
    /// emulator's device configuration hands them over.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let pairs: Vec<(&str, &str)> = pairs.into_iter().collect();

        if let Some((key, _)) = pairs.iter().find(|(k, _)| !CONFIG_KEYS.contains(k)) {
            return Err(NicError::UnknownConfigKey(key.to_string()));
        }
        let get = |key: &str| pairs.iter().rev().find(|(k, _)| *k == key).map(|(_, v)| *v);

        let device_type = match get("DeviceType") {
            Some(v) => v.parse()?,
            None => DeviceType::default(),
        };
        let mac: MacAddr = get("MAC").ok_or(NicError::MissingMac)?.parse()?;

        let mut config = DeviceConfig::new(device_type, mac);
        if let Some(v) = get("CableConnected") {
            config.cable_connected = parse_bool("CableConnected", v)?;
        }
        if let Some(v) = get("Port") {
            config.io_base = parse_num("Port", v)?;
        }
        if let Some(v) = get("IRQ") {
            config.irq = parse_num("IRQ", v)?;
        }
        if let Some(v) = get("DMA") {
            config.dma = parse_num("DMA", v)?;
        }
        if let Some(v) = get("MemBase") {
            config.mem_base = parse_num("MemBase", v)?;
        }
        if let Some(v) = get("LinkUpDelay") {
            config.link_up_delay_ms = parse_num("LinkUpDelay", v)?;
        }
        config.validate()?;

        Ok(config)
    }

    pub fn with_io_base(mut self, io_base: u16) -> Self {
        self.io_base = io_base;
        self
    }

    pub fn with_irq(mut self, irq: u8) -> Self {
        self.irq = irq;
        self
    }

    pub fn with_dma(mut self, dma: u8) -> Self {
        self.dma = dma;
        self
    }

    pub fn with_mem_base(mut self, mem_base: u32) -> Self {
        self.mem_base = mem_base;
        self
    }

    pub fn with_cable_connected(mut self, connected: bool) -> Self {
        self.cable_connected = connected;
        self
    }

    pub fn with_link_up_delay(mut self, millis: u32) -> Self {
        self.link_up_delay_ms = millis;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.link_up_delay_ms > LINK_UP_DELAY_MAX {
            return Err(NicError::InvalidLinkUpDelay(self.link_up_delay_ms));
        }
        if self.link_up_delay_ms > 5000 || self.link_up_delay_ms < 100 {
            warn!(
                "DPNIC: WARNING! Link up delay is set to {} seconds!",
                self.link_up_delay_ms / 1000
            );
        }
        debug!(
            "DPNIC: Link up delay is set to {} seconds",
            self.link_up_delay_ms / 1000
        );
        Ok(())
    }

    /// Size of the shared memory window, zero for the NE boards.
    pub fn shared_mem_size(&self) -> u32 {
        match self.device_type {
            DeviceType::Ne1000 | DeviceType::Ne2000 => 0,
            DeviceType::Wd8003 | DeviceType::Elnk503 => 8 * 1024,
            DeviceType::Wd8013 => 16 * 1024,
        }
    }

    /// The configured DMA channel if the 3C503 can actually use it.
    pub fn isa_dma(&self) -> Option<u8> {
        if self.device_type == DeviceType::Elnk503
            && (ELNKII_MIN_VALID_DMA..=ELNKII_MAX_VALID_DMA).contains(&self.dma)
        {
            Some(self.dma)
        } else {
            None
        }
    }

    /// Station address as burned into the PROM. WD and 3Com software
    /// insists on seeing the vendor's own prefix.
    pub fn prom_mac(&self) -> MacAddr {
        match self.device_type {
            DeviceType::Wd8003 | DeviceType::Wd8013 => self.mac.with_oui([0x00, 0x00, 0xc0]),
            DeviceType::Elnk503 => self.mac.with_oui([0x02, 0x60, 0x8c]),
            _ => self.mac,
        }
    }
}

fn parse_bool(key: &'static str, v: &str) -> Result<bool> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(NicError::InvalidConfigValue {
            key,
            value: v.to_string(),
        }),
    }
}

fn parse_num<T>(key: &'static str, v: &str) -> Result<T>
where
    T: TryFrom<u64>,
{
    let invalid = || NicError::InvalidConfigValue {
        key,
        value: v.to_string(),
    };
    let n = match v.strip_prefix("0x").or_else(|| v.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => v.parse::<u64>(),
    }
    .map_err(|_| invalid())?;
    T::try_from(n).map_err(|_| invalid())
}
