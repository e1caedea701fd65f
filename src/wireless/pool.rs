//! Radio resource pool
//!
//! A fixed number of hwsim radios is provisioned once, on first use. Slots are
//! handed out lowest-index first so that runs are reproducible.

use crate::error::{Error, Result};
use crate::wireless::RadioEngine;
use tracing::info;

/// Pool of physical wireless radios
#[derive(Debug, Default)]
pub struct RadioPool {
    /// In-use flag per slot; empty until provisioned
    used: Vec<bool>,
    /// Whether the driver has been loaded with `used.len()` radios
    provisioned: bool,
}

impl RadioPool {
    /// Create an unprovisioned pool
    pub fn new() -> Self {
        Self::default()
    }

    /// (Re-)provision exactly `count` radios
    ///
    /// Reloading the driver destroys every radio, so this is refused while any
    /// slot is issued. Calling it again with the current size is a no-op.
    pub fn initialize<E: RadioEngine>(&mut self, engine: &mut E, count: usize) -> Result<()> {
        if self.provisioned && count == self.used.len() {
            return Ok(());
        }

        let in_use = self.in_use();
        if in_use > 0 {
            return Err(Error::PoolResize {
                requested: count,
                in_use,
            });
        }

        info!(count, "provisioning wireless radios");
        engine.provision_radios(count)?;
        self.used = vec![false; count];
        self.provisioned = true;
        Ok(())
    }

    /// Provision with `count` radios unless already provisioned
    pub fn ensure_initialized<E: RadioEngine>(&mut self, engine: &mut E, count: usize) -> Result<()> {
        if self.provisioned {
            return Ok(());
        }
        self.initialize(engine, count)
    }

    /// Take the lowest free slot
    pub fn acquire(&mut self) -> Result<usize> {
        let slot = self
            .used
            .iter()
            .position(|used| !used)
            .ok_or(Error::ResourceExhausted {
                max: self.used.len(),
            })?;
        self.used[slot] = true;
        Ok(slot)
    }

    /// Mark a slot free again
    pub fn release(&mut self, slot: usize) {
        if let Some(used) = self.used.get_mut(slot) {
            *used = false;
        }
    }

    /// Unload every radio and forget the pool
    pub fn teardown<E: RadioEngine>(&mut self, engine: &mut E) -> Result<()> {
        if self.provisioned {
            engine.deprovision_radios()?;
        }
        self.used.clear();
        self.provisioned = false;
        Ok(())
    }

    pub fn is_provisioned(&self) -> bool {
        self.provisioned
    }

    pub fn capacity(&self) -> usize {
        self.used.len()
    }

    pub fn in_use(&self) -> usize {
        self.used.iter().filter(|used| **used).count()
    }

    pub fn free(&self) -> usize {
        self.capacity() - self.in_use()
    }

    pub fn is_used(&self, slot: usize) -> bool {
        self.used.get(slot).copied().unwrap_or(false)
    }
}
