//! Device management: enumeration, selection, worker queues, and memory
//! budget accounting.
//!
//! # Devices
//!
//! [`DeviceManager::discover`] enumerates the compute devices visible to the
//! process.  The host CPU is always device 0; its heap budget is the memory
//! `sysinfo` reports as available and its queue count is the available
//! parallelism.  Callers that want to partition the host (or test selection
//! policy) can construct a manager from explicit [`DeviceInfo`] rows with
//! [`DeviceManager::with_devices`].
//!
//! # Memory budget
//!
//! Every tile reserves its working set through [`ComputeContext::reserve`]
//! before running.  Reservations are RAII: the bytes return to the budget
//! when the [`MemoryReservation`] drops.  A reservation that would exceed the
//! budget fails with [`EngineError::OutOfMemory`], which callers recover from
//! by retrying with a smaller tile.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DeviceSelector;
use crate::error::{EngineError, Result};

/// Budget assumed when the platform reports no memory figures.
const FALLBACK_HEAP_BUDGET: usize = 1024 * 1024 * 1024;

// ─── Device description ─────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Cpu,
}

/// One enumerated compute device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Enumeration index.
    pub index: usize,
    pub name: String,
    pub kind: DeviceKind,
    /// Memory available to the engine on this device, in bytes.
    pub heap_budget_bytes: usize,
    /// Number of independent compute queues (worker threads).
    pub queue_count: usize,
}

// ─── Device manager ─────────────────────────────────────────────────────────

/// Enumerates compute devices and opens [`ComputeContext`]s on them.
#[derive(Clone, Debug)]
pub struct DeviceManager {
    devices: Vec<DeviceInfo>,
}

impl DeviceManager {
    /// Enumerate the devices visible to this process.
    pub fn discover() -> Self {
        let mut sys = sysinfo::System::new();
        sys.refresh_memory();
        let available = sys.available_memory() as usize;
        let total = sys.total_memory() as usize;
        let heap_budget_bytes = match (available, total) {
            (0, 0) => {
                warn!(
                    fallback_mb = FALLBACK_HEAP_BUDGET / (1024 * 1024),
                    "Host memory figures unavailable; using fallback heap budget"
                );
                FALLBACK_HEAP_BUDGET
            }
            (0, total) => total,
            (available, _) => available,
        };
        let queue_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        let cpu = DeviceInfo {
            index: 0,
            name: format!("host-cpu ({})", std::env::consts::ARCH),
            kind: DeviceKind::Cpu,
            heap_budget_bytes,
            queue_count,
        };
        debug!(
            name = %cpu.name,
            heap_budget_mb = cpu.heap_budget_bytes / (1024 * 1024),
            queues = cpu.queue_count,
            "Discovered host device"
        );
        Self { devices: vec![cpu] }
    }

    /// A manager over an explicit device list.  Indices are reassigned to
    /// match list order.
    pub fn with_devices(devices: Vec<DeviceInfo>) -> Self {
        let devices = devices
            .into_iter()
            .enumerate()
            .map(|(index, dev)| DeviceInfo { index, ..dev })
            .collect();
        Self { devices }
    }

    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Heap budget of device `index` in bytes.
    pub fn heap_budget(&self, index: usize) -> Result<usize> {
        self.devices
            .get(index)
            .map(|d| d.heap_budget_bytes)
            .ok_or_else(|| out_of_range(index, self.devices.len()))
    }

    /// Resolve a selector to a device description without opening it.
    pub fn resolve(&self, selector: DeviceSelector) -> Result<&DeviceInfo> {
        if self.devices.is_empty() {
            return Err(EngineError::DeviceUnavailable(
                "no compatible compute device found".into(),
            ));
        }
        match selector {
            DeviceSelector::Index(i) => self
                .devices
                .get(i)
                .ok_or_else(|| out_of_range(i, self.devices.len())),
            DeviceSelector::Cpu => self
                .devices
                .iter()
                .find(|d| d.kind == DeviceKind::Cpu)
                .ok_or_else(|| EngineError::DeviceUnavailable("no CPU device registered".into())),
            DeviceSelector::Auto => {
                // max_by_key keeps the last maximum; iterate in reverse so ties
                // resolve to the lowest index.
                self.devices
                    .iter()
                    .rev()
                    .max_by_key(|d| d.heap_budget_bytes)
                    .ok_or_else(|| {
                        EngineError::DeviceUnavailable("no compatible compute device found".into())
                    })
            }
        }
    }

    /// Open a context on the selected device.
    pub fn select(
        &self,
        selector: DeviceSelector,
        memory_limit: Option<usize>,
    ) -> Result<Arc<ComputeContext>> {
        let info = self.resolve(selector)?.clone();
        ComputeContext::new(info, memory_limit)
    }
}

fn out_of_range(index: usize, count: usize) -> EngineError {
    EngineError::DeviceUnavailable(format!(
        "device index {index} out of range ({count} device(s) visible)"
    ))
}

// ─── Memory accounting ──────────────────────────────────────────────────────

/// Atomic byte counters.  Lock-free reads.
struct MemoryAccounting {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl MemoryAccounting {
    const fn new() -> Self {
        Self {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Add `bytes` if the result stays within `limit`.
    fn try_add(&self, bytes: usize, limit: usize) -> Result<()> {
        let mut current = self.current.load(Ordering::Relaxed);
        loop {
            let would_be = check_budget(limit, current, bytes)?;
            match self.current.compare_exchange_weak(
                current,
                would_be,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    self.peak.fetch_max(would_be, Ordering::Relaxed);
                    return Ok(());
                }
                Err(actual) => current = actual,
            }
        }
    }

    #[inline]
    fn release(&self, bytes: usize) {
        self.current.fetch_sub(bytes, Ordering::AcqRel);
    }

    #[inline]
    fn snapshot(&self) -> (usize, usize) {
        (
            self.current.load(Ordering::Relaxed),
            self.peak.load(Ordering::Relaxed),
        )
    }
}

/// New in-use total if `requested` fits under `limit`.
fn check_budget(limit: usize, current: usize, requested: usize) -> Result<usize> {
    let would_be = current.saturating_add(requested);
    if would_be > limit {
        return Err(EngineError::OutOfMemory {
            limit_bytes: limit,
            current_bytes: current,
            requested_bytes: requested,
        });
    }
    Ok(would_be)
}

// ─── Compute context ────────────────────────────────────────────────────────

/// An opened compute device: worker queues plus memory budget.
///
/// Shared read-only across concurrent tile executions.
pub struct ComputeContext {
    info: DeviceInfo,
    queues: rayon::ThreadPool,
    memory: MemoryAccounting,
    budget: usize,
}

impl ComputeContext {
    pub fn new(info: DeviceInfo, memory_limit: Option<usize>) -> Result<Arc<Self>> {
        let queue_count = info.queue_count.max(1);
        let device_index = info.index;
        let queues = rayon::ThreadPoolBuilder::new()
            .num_threads(queue_count)
            .thread_name(move |i| format!("tilesr-d{device_index}-q{i}"))
            .build()
            .map_err(|err| {
                EngineError::DeviceUnavailable(format!(
                    "failed to create compute queues on device {device_index}: {err}"
                ))
            })?;
        let budget = match memory_limit {
            Some(limit) if limit > info.heap_budget_bytes => {
                warn!(
                    limit_mb = limit / (1024 * 1024),
                    heap_budget_mb = info.heap_budget_bytes / (1024 * 1024),
                    "Memory limit exceeds device heap budget"
                );
                limit
            }
            Some(limit) => limit,
            None => info.heap_budget_bytes,
        };

        info!(
            device = info.index,
            name = %info.name,
            queues = queue_count,
            budget_mb = budget / (1024 * 1024),
            "Compute context ready"
        );

        Ok(Arc::new(Self {
            info,
            queues,
            memory: MemoryAccounting::new(),
            budget,
        }))
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Memory budget in bytes (limit override or device heap budget).
    pub fn heap_budget(&self) -> usize {
        self.budget
    }

    pub fn queue_count(&self) -> usize {
        self.queues.current_num_threads()
    }

    /// Run `op` on this device's queues.  Rayon parallel iterators inside
    /// `op` dispatch onto the device's workers.
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.queues.install(op)
    }

    /// Reserve `bytes` of the device budget until the guard drops.
    pub fn reserve(&self, bytes: usize) -> Result<MemoryReservation<'_>> {
        self.memory.try_add(bytes, self.budget)?;
        Ok(MemoryReservation { ctx: self, bytes })
    }

    /// `(current_bytes, peak_bytes)`.
    pub fn memory_usage(&self) -> (usize, usize) {
        self.memory.snapshot()
    }

    pub fn memory_snapshot(&self) -> MemorySnapshot {
        let (current, peak) = self.memory.snapshot();
        MemorySnapshot {
            current_bytes: current,
            peak_bytes: peak,
            limit_bytes: self.budget,
        }
    }
}

impl std::fmt::Debug for ComputeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeContext")
            .field("info", &self.info)
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

/// Bytes held against a [`ComputeContext`] budget.
#[must_use = "dropping the reservation releases the bytes immediately"]
pub struct MemoryReservation<'a> {
    ctx: &'a ComputeContext,
    bytes: usize,
}

impl MemoryReservation<'_> {
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for MemoryReservation<'_> {
    fn drop(&mut self) {
        self.ctx.memory.release(self.bytes);
    }
}

/// Immutable snapshot of device memory use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemorySnapshot {
    pub current_bytes: usize,
    pub peak_bytes: usize,
    pub limit_bytes: usize,
}

// ─── Tests ──────────────────────────────────────────────────────────────────
