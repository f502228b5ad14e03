/// Represents the physical location where tensor data is stored.
///
/// Values and gradients normally live on the host. Lookup tables may keep their
/// bulk rows on one device and the working copies of touched rows on another;
/// moving a tensor between devices is a blocking copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StorageDevice {
    /// Main system memory. This is the default device.
    #[default]
    CPU,
    /// Accelerator memory. Arithmetic is still executed by the host kernels,
    /// the tag records residency so that transfers stay explicit.
    GPU,
}

impl StorageDevice {
    pub fn is_host(&self) -> bool {
        matches!(self, StorageDevice::CPU)
    }
}
