//! Device topology: concrete devices and the classes they belong to.

use serde::{Deserialize, Serialize};

use crate::core::error::OrchestratorError;

/// Class name shared by every GPU device.
pub const GPU_CLASS: &str = "cuda";
/// The single CPU device.
pub const CPU_DEVICE: &str = "cpu";

/// Device class of a concrete device: the part before `:`.
///
/// `cuda:1` belongs to `cuda`; `cpu` is its own class.
#[must_use]
pub fn class_of(device: &str) -> &str {
    device.split_once(':').map_or(device, |(class, _)| class)
}

/// Ordered list of concrete devices the pool manages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTopology {
    devices: Vec<String>,
}

impl DeviceTopology {
    /// `cpu` plus `cuda:0 .. cuda:{gpu_count-1}`.
    #[must_use]
    pub fn with_gpus(gpu_count: usize) -> Self {
        let mut devices = Vec::with_capacity(gpu_count + 1);
        devices.push(CPU_DEVICE.to_string());
        devices.extend((0..gpu_count).map(|i| format!("{GPU_CLASS}:{i}")));
        Self { devices }
    }

    /// Explicit device list. Order is the tie-break order for selection.
    #[must_use]
    pub fn from_devices<I, S>(devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = Vec::new();
        for d in devices {
            let d = d.into();
            if !seen.contains(&d) {
                seen.push(d);
            }
        }
        Self { devices: seen }
    }

    /// All concrete devices in stable order.
    #[must_use]
    pub fn devices(&self) -> &[String] {
        &self.devices
    }

    /// Number of concrete devices in `class`.
    #[must_use]
    pub fn class_size(&self, class: &str) -> usize {
        self.devices.iter().filter(|d| class_of(d) == class).count()
    }

    /// Whether `device` is a concrete member of the topology.
    #[must_use]
    pub fn is_concrete(&self, device: &str) -> bool {
        self.devices.iter().any(|d| d == device)
    }

    /// Concrete devices a request for `device` may land on.
    ///
    /// A concrete name resolves to itself; a class name resolves to all of
    /// its members in stable order.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::UnknownDevice`] when nothing matches, which
    /// includes `cuda` on a host without GPUs.
    pub fn resolve(&self, device: &str) -> Result<Vec<String>, OrchestratorError> {
        if self.is_concrete(device) {
            return Ok(vec![device.to_string()]);
        }
        if device.contains(':') {
            return Err(OrchestratorError::UnknownDevice(device.to_string()));
        }
        let members: Vec<String> = self
            .devices
            .iter()
            .filter(|d| class_of(d) == device)
            .cloned()
            .collect();
        if members.is_empty() {
            Err(OrchestratorError::UnknownDevice(device.to_string()))
        } else {
            Ok(members)
        }
    }
}

impl Default for DeviceTopology {
    fn default() -> Self {
        Self::with_gpus(0)
    }
}
