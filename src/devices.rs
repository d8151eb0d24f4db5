//! Compute device discovery
//!
//! The CPU is always listed. CUDA devices are listed when the crate is built
//! with the `cuda` feature; a missing driver is logged and skipped rather
//! than treated as fatal.

use std::fmt;

#[cfg(feature = "cuda")]
use tracing::warn;

#[cfg(feature = "cuda")]
use crate::error::Error;

/// Kind of compute device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Cpu,
    Cuda,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Cpu => f.write_str("CPU"),
            DeviceKind::Cuda => f.write_str("CUDA"),
        }
    }
}

/// A device that could run the search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: usize,
    pub kind: DeviceKind,
    pub name: String,
    /// Logical cores for a CPU, multiprocessors for a GPU
    pub compute_units: usize,
    pub memory_bytes: Option<u64>,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} [{}] ({} compute units",
            self.id, self.name, self.kind, self.compute_units
        )?;
        if let Some(mem) = self.memory_bytes {
            write!(f, ", {} MiB", mem / (1024 * 1024))?;
        }
        f.write_str(")")
    }
}

/// Every device visible to this build
pub fn list_devices() -> Vec<DeviceInfo> {
    #[cfg_attr(not(feature = "cuda"), allow(unused_mut))]
    let mut devices = vec![cpu_device()];

    #[cfg(feature = "cuda")]
    {
        match cuda_devices(devices.len()) {
            Ok(cuda) => devices.extend(cuda),
            Err(e) => warn!(error = %e, "CUDA devices unavailable"),
        }
    }

    devices
}

fn cpu_device() -> DeviceInfo {
    DeviceInfo {
        id: 0,
        kind: DeviceKind::Cpu,
        name: format!("CPU ({} physical cores)", num_cpus::get_physical()),
        compute_units: num_cpus::get(),
        memory_bytes: None,
    }
}

#[cfg(feature = "cuda")]
fn cuda_devices(first_id: usize) -> crate::error::Result<Vec<DeviceInfo>> {
    use rustacuda::device::DeviceAttribute;
    use rustacuda::prelude::*;

    rustacuda::init(CudaFlags::empty())
        .map_err(|e| Error::Device(format!("failed to initialize CUDA: {}", e)))?;
    let count = Device::num_devices()
        .map_err(|e| Error::Device(format!("failed to count CUDA devices: {}", e)))?;

    let mut devices = Vec::with_capacity(count as usize);
    for i in 0..count {
        let device = Device::get_device(i)
            .map_err(|e| Error::Device(format!("failed to get device {}: {}", i, e)))?;
        let name = device
            .name()
            .map_err(|e| Error::Device(format!("failed to get device name: {}", e)))?;
        let compute_units = device
            .get_attribute(DeviceAttribute::MultiprocessorCount)
            .unwrap_or(1)
            .max(1) as usize;
        let memory_bytes = device.total_memory().ok().map(|m| m as u64);
        devices.push(DeviceInfo {
            id: first_id + i as usize,
            kind: DeviceKind::Cuda,
            name,
            compute_units,
            memory_bytes,
        });
    }
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_is_always_listed() {
        let devices = list_devices();
        assert_eq!(devices[0].kind, DeviceKind::Cpu);
        assert_eq!(devices[0].id, 0);
        assert!(devices[0].compute_units >= 1);
        for (i, d) in devices.iter().enumerate() {
            assert_eq!(d.id, i);
        }
    }

    #[test]
    fn display_includes_memory_when_known() {
        let gpu = DeviceInfo {
            id: 1,
            kind: DeviceKind::Cuda,
            name: "Test GPU".into(),
            compute_units: 20,
            memory_bytes: Some(8 * 1024 * 1024 * 1024),
        };
        assert_eq!(gpu.to_string(), "1: Test GPU [CUDA] (20 compute units, 8192 MiB)");
        assert!(!cpu_device().to_string().contains("MiB"));
    }
}
