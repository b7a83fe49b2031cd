//! Preview port allocation within the configured range.

use std::collections::HashSet;

use super::control::port_is_bindable;
use crate::error::AppError;

/// Tracks ports held by live (or starting) instances of this process.
#[derive(Debug)]
pub struct PortAllocator {
    base: u16,
    max: u16,
    reserved: HashSet<u16>,
    probe: fn(u16) -> bool,
}

impl PortAllocator {
    pub fn new(base: u16, max: u16) -> Self {
        Self::with_probe(base, max, port_is_bindable)
    }

    pub(crate) fn with_probe(base: u16, max: u16, probe: fn(u16) -> bool) -> Self {
        Self {
            base,
            max,
            reserved: HashSet::new(),
            probe,
        }
    }

    /// Unreserved ports in the order they should be tried: a nonzero
    /// preferred port first, then the range ascending.
    ///
    /// Probing happens outside the registry lock; the caller confirms its
    /// pick with [`try_reserve`](Self::try_reserve).
    pub fn candidates(&self, preferred: Option<u16>) -> Vec<u16> {
        let preferred = preferred.filter(|p| *p != 0 && !self.reserved.contains(p));
        preferred
            .into_iter()
            .chain(
                (self.base..=self.max)
                    .filter(|p| Some(*p) != preferred && !self.reserved.contains(p)),
            )
            .collect()
    }

    /// Reserve `port` unless something else took it since `candidates`.
    pub fn try_reserve(&mut self, port: u16) -> bool {
        self.reserved.insert(port)
    }

    pub fn probe(&self) -> fn(u16) -> bool {
        self.probe
    }

    pub fn exhausted(&self) -> AppError {
        AppError::resource_exhausted(self.base, self.max)
    }

    /// Returns `false` if the port was not reserved.
    pub fn release(&mut self, port: u16) -> bool {
        self.reserved.remove(&port)
    }

    pub fn is_reserved(&self, port: u16) -> bool {
        self.reserved.contains(&port)
    }

    pub fn reserved_count(&self) -> usize {
        self.reserved.len()
    }

    pub fn clear(&mut self) {
        self.reserved.clear();
    }
}
