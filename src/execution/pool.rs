//! Resource reservation pool.
//!
//! The pool tracks the CPU, memory and disk held by running tasks against a
//! fixed [`HostCapacity`]. [`ResourcePool::reserve`] waits until a request
//! fits; the returned [`Reservation`] gives the resources back on drop. A
//! request that exceeds the total capacity can never be satisfied and is
//! rejected immediately instead of waiting forever.

use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::Notify;

use crate::core::resource::{HostCapacity, ResourceRequirements};

/// Errors raised by the pool.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    /// The request is larger than the pool's total capacity.
    #[error("request ({requested}) exceeds capacity ({capacity})")]
    Insufficient {
        requested: ResourceRequirements,
        capacity: HostCapacity,
    },
}

// Wide counters so sums against an unbounded capacity cannot overflow.
#[derive(Debug, Default, Clone, Copy)]
struct Usage {
    cpu: u64,
    memory: u128,
    disk: u128,
}

impl Usage {
    fn fits(&self, request: &ResourceRequirements, capacity: &HostCapacity) -> bool {
        self.cpu + request.cpu_count as u64 <= capacity.cpu_count as u64
            && self.memory + request.memory_bytes as u128 <= capacity.memory_bytes as u128
            && self.disk + request.disk_bytes as u128 <= capacity.disk_bytes as u128
    }

    fn add(&mut self, request: &ResourceRequirements) {
        self.cpu += request.cpu_count as u64;
        self.memory += request.memory_bytes as u128;
        self.disk += request.disk_bytes as u128;
    }

    fn sub(&mut self, request: &ResourceRequirements) {
        self.cpu -= request.cpu_count as u64;
        self.memory -= request.memory_bytes as u128;
        self.disk -= request.disk_bytes as u128;
    }
}

#[derive(Debug)]
struct PoolInner {
    capacity: HostCapacity,
    used: Mutex<Usage>,
    released: Notify,
}

impl PoolInner {
    fn used(&self) -> MutexGuard<'_, Usage> {
        // Usage stays consistent even if a holder panicked.
        self.used.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Shared pool of host resources.
#[derive(Debug, Clone)]
pub struct ResourcePool {
    inner: Arc<PoolInner>,
}

impl ResourcePool {
    /// Create a pool with the given capacity.
    pub fn new(capacity: HostCapacity) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                capacity,
                used: Mutex::new(Usage::default()),
                released: Notify::new(),
            }),
        }
    }

    /// Total capacity.
    pub fn capacity(&self) -> HostCapacity {
        self.inner.capacity
    }

    /// Resources currently reserved, as `(cpus, memory bytes, disk bytes)`.
    pub fn in_use(&self) -> (u64, u128, u128) {
        let used = self.inner.used();
        (used.cpu, used.memory, used.disk)
    }

    /// Fail fast if a request could never fit.
    pub fn check(&self, request: &ResourceRequirements) -> Result<(), PoolError> {
        if self.inner.capacity.admits(request) {
            Ok(())
        } else {
            Err(PoolError::Insufficient {
                requested: *request,
                capacity: self.inner.capacity,
            })
        }
    }

    /// Reserve without waiting. `Ok(None)` means the request does not fit
    /// right now.
    pub fn try_reserve(
        &self,
        request: &ResourceRequirements,
    ) -> Result<Option<Reservation>, PoolError> {
        self.check(request)?;
        let mut used = self.inner.used();
        if !used.fits(request, &self.inner.capacity) {
            return Ok(None);
        }
        used.add(request);
        Ok(Some(Reservation {
            pool: Arc::clone(&self.inner),
            request: *request,
        }))
    }

    /// Reserve, waiting for running tasks to release resources if needed.
    pub async fn reserve(&self, request: &ResourceRequirements) -> Result<Reservation, PoolError> {
        loop {
            // Register for wakeups before checking so a release between the
            // check and the await is not missed.
            let released = self.inner.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if let Some(reservation) = self.try_reserve(request)? {
                return Ok(reservation);
            }
            released.await;
        }
    }
}

/// Resources held by a running task. Released on drop.
#[derive(Debug)]
pub struct Reservation {
    pool: Arc<PoolInner>,
    request: ResourceRequirements,
}

impl Reservation {
    /// The reserved amounts.
    pub fn request(&self) -> &ResourceRequirements {
        &self.request
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.pool.used().sub(&self.request);
        self.pool.released.notify_waiters();
    }
}
