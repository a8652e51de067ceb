//! Accelerator registry.
//!
//! Host execution needs no setup. Device placement needs an accelerator,
//! installed once per process and shared by every tensor allocated on device
//! afterwards. Each device buffer keeps its own handle to the accelerator that
//! allocated it, so replacing the registered accelerator never strands live
//! buffers.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use ember_ai::backend::{accelerator, install_accelerator};
//! use ember_ai::device::emulated::EmulatedAccelerator;
//!
//! install_accelerator(Arc::new(EmulatedAccelerator::new()));
//! assert_eq!(accelerator().unwrap().name(), "emulated");
//! ```

use std::sync::{Arc, PoisonError, RwLock};

use crate::device::Accelerator;
use crate::error::{Error, Result};

static ACCELERATOR: RwLock<Option<Arc<dyn Accelerator>>> = RwLock::new(None);

/// Registers `acc` as the accelerator for new device allocations.
///
/// Returns the previously installed accelerator, if any.
pub fn install_accelerator(acc: Arc<dyn Accelerator>) -> Option<Arc<dyn Accelerator>> {
    log::debug!("installing accelerator `{}`", acc.name());
    let mut slot = ACCELERATOR.write().unwrap_or_else(PoisonError::into_inner);
    slot.replace(acc)
}

/// Removes the installed accelerator.
pub fn uninstall_accelerator() -> Option<Arc<dyn Accelerator>> {
    let mut slot = ACCELERATOR.write().unwrap_or_else(PoisonError::into_inner);
    let prev = slot.take();
    if let Some(prev) = &prev {
        log::debug!("removed accelerator `{}`", prev.name());
    }
    prev
}

/// Returns the installed accelerator.
///
/// # Errors
/// [`Error::AcceleratorMissing`] when nothing has been installed.
pub fn accelerator() -> Result<Arc<dyn Accelerator>> {
    ACCELERATOR
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .ok_or(Error::AcceleratorMissing)
}

/// Whether an accelerator is installed.
pub fn has_accelerator() -> bool {
    ACCELERATOR
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .is_some()
}
