// Subnet Control Module client: system identification and reset control
use crate::hostmod::HostMod;
use osd_core::reg::{
    SCM_LOCAL_ADDR, SCM_MAX_PKT_LEN, SCM_SYSRST, SCM_SYSRST_CPU_RST_BIT, SCM_SYSRST_SYS_RST_BIT,
    SCM_SYSTEM_DEVICE_ID, SCM_SYSTEM_VENDOR_ID,
};
use osd_core::{diaddr_build, Result};
use std::fmt;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubnetInfo {
    pub vendor_id: u16,
    pub device_id: u16,
    /// Maximum packet length in data words
    pub max_pkt_len: u16,
}

impl fmt::Display for SubnetInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "vendor {:#06x}, device {:#06x}, max. packet length {} words",
            self.vendor_id, self.device_id, self.max_pkt_len
        )
    }
}

fn scm_addr(subnet: u16) -> Result<u16> {
    diaddr_build(subnet, SCM_LOCAL_ADDR)
}

pub fn get_subnet_info(hostmod: &mut HostMod, subnet: u16) -> Result<SubnetInfo> {
    let scm = scm_addr(subnet)?;
    Ok(SubnetInfo {
        vendor_id: hostmod.reg_read16(scm, SCM_SYSTEM_VENDOR_ID)?,
        device_id: hostmod.reg_read16(scm, SCM_SYSTEM_DEVICE_ID)?,
        max_pkt_len: hostmod.reg_read16(scm, SCM_MAX_PKT_LEN)?,
    })
}

/// Release the CPUs of `subnet` from reset
pub fn cpus_start(hostmod: &mut HostMod, subnet: u16) -> Result<()> {
    info!(subnet, "Starting CPUs");
    hostmod.reg_setbit(scm_addr(subnet)?, SCM_SYSRST, SCM_SYSRST_CPU_RST_BIT, false, 16, true)
}

/// Hold the CPUs of `subnet` in reset
pub fn cpus_stop(hostmod: &mut HostMod, subnet: u16) -> Result<()> {
    info!(subnet, "Stopping CPUs");
    hostmod.reg_setbit(scm_addr(subnet)?, SCM_SYSRST, SCM_SYSRST_CPU_RST_BIT, true, 16, true)
}

/// Assert or release the system reset of `subnet`
pub fn system_reset(hostmod: &mut HostMod, subnet: u16, asserted: bool) -> Result<()> {
    info!(subnet, asserted, "System reset");
    hostmod.reg_setbit(scm_addr(subnet)?, SCM_SYSRST, SCM_SYSRST_SYS_RST_BIT, asserted, 16, true)
}
