//! Block device configuration

/// Default number of sectors on a device
pub const DEFAULT_TOTAL_SECTORS: u64 = 100;

/// Configuration for a simulated block device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Identifier stamped on every request the device issues
    pub id: u32,

    /// Number of addressable sectors, `[0, total_sectors)`
    pub total_sectors: u64,
}

impl DeviceConfig {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            total_sectors: DEFAULT_TOTAL_SECTORS,
        }
    }

    /// Set the sector count
    pub fn with_total_sectors(mut self, total: u64) -> Self {
        self.total_sectors = total;
        self
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::new(1)
    }
}
