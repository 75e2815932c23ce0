// Register maps of the debug modules (all registers are 16 bit)

// Base register map, common to all debug modules
pub const MOD_VENDOR: u16 = 0x0000;
pub const MOD_TYPE: u16 = 0x0001;
pub const MOD_VERSION: u16 = 0x0002;
pub const MOD_CS: u16 = 0x0003;
pub const MOD_CS_ACTIVE_BIT: u32 = 0;
pub const MOD_EVENT_DEST: u16 = 0x0004;

// Subnet Control Module
pub const SCM_SYSTEM_VENDOR_ID: u16 = 0x0200;
pub const SCM_SYSTEM_DEVICE_ID: u16 = 0x0201;
pub const SCM_NUM_MOD: u16 = 0x0202;
pub const SCM_MAX_PKT_LEN: u16 = 0x0203;
pub const SCM_SYSRST: u16 = 0x0204;
pub const SCM_SYSRST_SYS_RST_BIT: u32 = 0;
pub const SCM_SYSRST_CPU_RST_BIT: u32 = 1;

/// The SCM always sits at local address 0 of its subnet
pub const SCM_LOCAL_ADDR: u16 = 0;

// Memory Access Module
pub const MAM_AW: u16 = 0x0200;
pub const MAM_DW: u16 = 0x0201;
pub const MAM_REGIONS: u16 = 0x0202;
pub const MAM_MAX_REGIONS: usize = 8;

pub const fn mam_region_baseaddr(region: u16, word: u16) -> u16 {
    0x0280 + 0x10 * region + word
}

pub const fn mam_region_memsize(region: u16, word: u16) -> u16 {
    0x0284 + 0x10 * region + word
}

// System Trace Module
pub const STM_VALWIDTH: u16 = 0x0200;

// Core Trace Module
pub const CTM_ADDR_WIDTH: u16 = 0x0200;
pub const CTM_DATA_WIDTH: u16 = 0x0201;
