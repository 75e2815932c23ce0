// Core types used across all debug interconnect components
use crate::error::{OsdError, Result};
use std::fmt;

// DI address layout: 6 subnet bits, 10 local bits
pub const DIADDR_SUBNET_BITS: u32 = 6;
pub const DIADDR_LOCAL_BITS: u32 = 16 - DIADDR_SUBNET_BITS;
pub const DIADDR_SUBNET_MAX: u16 = (1 << DIADDR_SUBNET_BITS) - 1;
pub const DIADDR_LOCAL_MAX: u16 = (1 << DIADDR_LOCAL_BITS) - 1;

pub fn diaddr_subnet(diaddr: u16) -> u16 {
    diaddr >> DIADDR_LOCAL_BITS
}

pub fn diaddr_localaddr(diaddr: u16) -> u16 {
    diaddr & DIADDR_LOCAL_MAX
}

pub fn diaddr_build(subnet: u16, local: u16) -> Result<u16> {
    if subnet > DIADDR_SUBNET_MAX || local > DIADDR_LOCAL_MAX {
        return Err(OsdError::invalid_argument(format!(
            "DI address {}.{} out of range",
            subnet, local
        )));
    }
    Ok((subnet << DIADDR_LOCAL_BITS) | local)
}

// Packet type (FLAGS.TYPE, 2 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Reg = 0,
    Reserved1 = 1,
    Event = 2,
    Reserved2 = 3,
}

impl PacketType {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => PacketType::Reg,
            1 => PacketType::Reserved1,
            2 => PacketType::Event,
            _ => PacketType::Reserved2,
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PacketType::Reg => write!(f, "REG"),
            PacketType::Reserved1 => write!(f, "RES1"),
            PacketType::Event => write!(f, "EVENT"),
            PacketType::Reserved2 => write!(f, "RES2"),
        }
    }
}

/// FLAGS.TYPE_SUB values when TYPE == REG
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RegSubtype {
    ReqRead16 = 0b0000,
    ReqRead32 = 0b0001,
    ReqRead64 = 0b0010,
    ReqRead128 = 0b0011,
    ReqWrite16 = 0b0100,
    ReqWrite32 = 0b0101,
    ReqWrite64 = 0b0110,
    ReqWrite128 = 0b0111,
    RespReadSuccess16 = 0b1000,
    RespReadSuccess32 = 0b1001,
    RespReadSuccess64 = 0b1010,
    RespReadSuccess128 = 0b1011,
    RespReadError = 0b1100,
    RespWriteSuccess = 0b1110,
    RespWriteError = 0b1111,
}

impl RegSubtype {
    pub fn from_u8(val: u8) -> Option<Self> {
        use RegSubtype::*;
        Some(match val {
            0b0000 => ReqRead16,
            0b0001 => ReqRead32,
            0b0010 => ReqRead64,
            0b0011 => ReqRead128,
            0b0100 => ReqWrite16,
            0b0101 => ReqWrite32,
            0b0110 => ReqWrite64,
            0b0111 => ReqWrite128,
            0b1000 => RespReadSuccess16,
            0b1001 => RespReadSuccess32,
            0b1010 => RespReadSuccess64,
            0b1011 => RespReadSuccess128,
            0b1100 => RespReadError,
            0b1110 => RespWriteSuccess,
            0b1111 => RespWriteError,
            _ => return None,
        })
    }

    pub fn read_request(width: RegWidth) -> Self {
        // width index fits 0..=3, always a valid code
        Self::from_u8(width.index()).unwrap_or(RegSubtype::ReqRead16)
    }

    pub fn write_request(width: RegWidth) -> Self {
        Self::from_u8(0b0100 | width.index()).unwrap_or(RegSubtype::ReqWrite16)
    }

    pub fn read_success(width: RegWidth) -> Self {
        Self::from_u8(0b1000 | width.index()).unwrap_or(RegSubtype::RespReadSuccess16)
    }

    /// Responses carry bit 3 set; requests never do
    pub fn is_response(self) -> bool {
        (self as u8) & 0b1000 != 0
    }

    pub fn is_error(self) -> bool {
        matches!(self, RegSubtype::RespReadError | RegSubtype::RespWriteError)
    }
}

/// FLAGS.TYPE_SUB values when TYPE == EVENT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventSubtype {
    /// Last (or only) packet of an event
    Last = 0,
    /// Intermediate packet, more follow
    Cont = 1,
    /// The sender dropped events
    Overflow = 5,
}

impl EventSubtype {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0 => Some(EventSubtype::Last),
            1 => Some(EventSubtype::Cont),
            5 => Some(EventSubtype::Overflow),
            _ => None,
        }
    }
}

// Register access width
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RegWidth {
    Bits16,
    Bits32,
    Bits64,
    Bits128,
}

impl RegWidth {
    pub fn from_bits(size_bits: u32) -> Result<Self> {
        match size_bits {
            16 => Ok(RegWidth::Bits16),
            32 => Ok(RegWidth::Bits32),
            64 => Ok(RegWidth::Bits64),
            128 => Ok(RegWidth::Bits128),
            _ => Err(OsdError::invalid_argument(format!(
                "register width must be 16, 32, 64 or 128 bit, got {}",
                size_bits
            ))),
        }
    }

    pub fn bits(self) -> u32 {
        16 << self.index()
    }

    pub fn words(self) -> usize {
        1 << self.index()
    }

    fn index(self) -> u8 {
        match self {
            RegWidth::Bits16 => 0,
            RegWidth::Bits32 => 1,
            RegWidth::Bits64 => 2,
            RegWidth::Bits128 => 3,
        }
    }
}

// Module vendors
pub const MODULE_VENDOR_UNKNOWN: u16 = 0x0000;
pub const MODULE_VENDOR_OSD: u16 = 0x0001;
pub const MODULE_VENDOR_OPTIMSOC: u16 = 0x0002;
pub const MODULE_VENDOR_LOWRISC: u16 = 0x0003;

// Standard module types
pub const MODULE_TYPE_STD_UNKNOWN: u16 = 0x0000;
pub const MODULE_TYPE_STD_SCM: u16 = 0x0001;
pub const MODULE_TYPE_STD_DEM_UART: u16 = 0x0002;
pub const MODULE_TYPE_STD_MAM: u16 = 0x0003;
pub const MODULE_TYPE_STD_STM: u16 = 0x0004;
pub const MODULE_TYPE_STD_CTM: u16 = 0x0005;

pub fn module_vendor_name(vendor: u16) -> &'static str {
    match vendor {
        MODULE_VENDOR_OSD => "The Open SoC Debug Project",
        MODULE_VENDOR_OPTIMSOC => "The OpTiMSoC Project",
        MODULE_VENDOR_LOWRISC => "LowRISC",
        _ => "UNKNOWN",
    }
}

/// Short name of a module type. Only OSD standard types are known.
pub fn module_type_short_name(vendor: u16, module_type: u16) -> &'static str {
    if vendor != MODULE_VENDOR_OSD {
        return "UNKNOWN";
    }
    match module_type {
        MODULE_TYPE_STD_SCM => "SCM",
        MODULE_TYPE_STD_DEM_UART => "DEM_UART",
        MODULE_TYPE_STD_MAM => "MAM",
        MODULE_TYPE_STD_STM => "STM",
        MODULE_TYPE_STD_CTM => "CTM",
        _ => "UNKNOWN",
    }
}

pub fn module_type_long_name(vendor: u16, module_type: u16) -> &'static str {
    if vendor != MODULE_VENDOR_OSD {
        return "UNKNOWN";
    }
    match module_type {
        MODULE_TYPE_STD_SCM => "Subnet Control Module",
        MODULE_TYPE_STD_DEM_UART => "Device Emulation Module UART",
        MODULE_TYPE_STD_MAM => "Memory Access Module",
        MODULE_TYPE_STD_STM => "System Trace Module",
        MODULE_TYPE_STD_CTM => "Core Trace Module",
        _ => "UNKNOWN",
    }
}

// Identification of a module on the interconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleDescriptor {
    pub addr: u16,
    pub vendor: u16,
    pub module_type: u16,
    pub version: u16,
}

impl ModuleDescriptor {
    pub fn type_short_name(&self) -> &'static str {
        module_type_short_name(self.vendor, self.module_type)
    }

    pub fn type_long_name(&self) -> &'static str {
        module_type_long_name(self.vendor, self.module_type)
    }

    /// Check the module identifies as the given vendor/type/version
    pub fn expect(&self, vendor: u16, module_type: u16, version: u16) -> Result<()> {
        if self.vendor != vendor || self.module_type != module_type || self.version != version {
            return Err(OsdError::wrong_module(
                self.addr,
                format!(
                    "expected {}.{} v{}, found {}.{} v{} ({})",
                    vendor,
                    module_type,
                    version,
                    self.vendor,
                    self.module_type,
                    self.version,
                    self.type_short_name()
                ),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}.{} ({}): {} ({}.{}, v{})",
            diaddr_subnet(self.addr),
            diaddr_localaddr(self.addr),
            self.addr,
            self.type_short_name(),
            self.vendor,
            self.module_type,
            self.version
        )
    }
}
