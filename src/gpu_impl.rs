use ocl::enums::{DeviceInfo, DeviceInfoResult};
use ocl::{Device as OclDevice, Platform};
use tracing::warn;

use crate::{BatchError, DeviceProperties, Result};

/// Threads per kernel block assumed when deriving block residency from the
/// device's maximum work-group size.
const BLOCK_THREADS: usize = 128;

/// Describe OpenCL device `id` on the default platform.
///
/// If no OpenCL platform is usable the host description is returned instead,
/// so callers do not need to handle a missing runtime differently.
pub fn probe_device(id: usize) -> Result<DeviceProperties> {
    let devices = match OclDevice::list_all(Platform::default()) {
        Ok(devices) if !devices.is_empty() => devices,
        Ok(_) | Err(_) => {
            warn!("no OpenCL device available, falling back to the host backend");
            return super::gpu_cpu::probe_device(id);
        }
    };
    let device = devices.get(id).copied().ok_or_else(|| {
        BatchError::Device(format!("device {id} not found, {} available", devices.len()))
    })?;
    let name = device
        .name()
        .map_err(|e| BatchError::Device(format!("querying device name: {e}")))?;
    let compute_units = match device.info(DeviceInfo::MaxComputeUnits) {
        Ok(DeviceInfoResult::MaxComputeUnits(n)) => n,
        Ok(_) => 1,
        Err(e) => return Err(BatchError::Device(format!("querying compute units: {e}"))),
    };
    let memory_bytes = match device.info(DeviceInfo::GlobalMemSize) {
        Ok(DeviceInfoResult::GlobalMemSize(n)) => n,
        Ok(_) => 0,
        Err(e) => return Err(BatchError::Device(format!("querying memory size: {e}"))),
    };
    let max_wg = device
        .max_wg_size()
        .map_err(|e| BatchError::Device(format!("querying work-group size: {e}")))?;
    Ok(DeviceProperties {
        name,
        compute_units,
        max_resident_blocks_per_unit: (max_wg / BLOCK_THREADS).max(1) as u32,
        memory_bytes,
    })
}
