//! Extension point for out-of-tree hardware/runtime interface adapters.
//!
//! Concrete interfaces (serial, TCP, BLE, AutoInterface) live outside this
//! crate; host runtimes implement these traits and register the resulting
//! driver through `InterfaceManager`.

use crate::hash::AddressHash;

/// Minimal metadata contract for an interface driver.
pub trait InterfaceDriver: Send + Sync {
    /// Stable driver identifier for metrics/config mapping.
    fn driver_id(&self) -> &'static str;

    /// Link MTU supported by this driver.
    fn mtu(&self) -> usize;
}

/// Factory contract used by host runtimes to register external drivers.
pub trait InterfaceDriverFactory: Send + Sync {
    type Driver: InterfaceDriver;

    fn create(&self, local_address: AddressHash) -> Self::Driver;
}
