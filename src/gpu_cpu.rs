use sysinfo::{CpuExt, System, SystemExt};

use crate::{BatchError, DeviceProperties, Result};

/// Describe the host-emulated accelerator.
///
/// Kernels run on a host worker pool, so each CPU is one compute unit with a
/// single resident block. Only device `0` exists.
pub fn probe_device(id: usize) -> Result<DeviceProperties> {
    if id != 0 {
        return Err(BatchError::Device(format!(
            "device {id} not found, the host backend only exposes device 0"
        )));
    }
    let mut sys = System::new();
    sys.refresh_cpu();
    sys.refresh_memory();
    let compute_units = sys.cpus().len().max(1) as u32;
    let name = sys
        .cpus()
        .first()
        .map(|cpu| cpu.brand().trim().to_string())
        .filter(|brand| !brand.is_empty())
        .unwrap_or_else(|| "host".to_string());
    Ok(DeviceProperties {
        name,
        compute_units,
        max_resident_blocks_per_unit: 1,
        memory_bytes: sys.total_memory(),
    })
}
