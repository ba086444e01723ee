use crate::{Result, WorkerErr, device::Device};

/// The fixed identity and group membership of a worker.
///
/// Shared behind an `Arc` with the thread-local registry so operations invoked by
/// the worker can reach it while the worker itself is busy dispatching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    worker_id: usize,
    local_worker_id: usize,
    num_workers: usize,
    num_groups: usize,
    default_device: Device,
    ccl: String,
}

impl WorkerInfo {
    /// Creates a new `WorkerInfo`, with `local_worker_id == worker_id`.
    ///
    /// # Arguments
    /// * `worker_id` - The global index of the worker.
    /// * `num_workers` - The total amount of workers.
    /// * `num_groups` - The amount of groups partitioning the workers.
    ///
    /// # Errors
    /// `InvalidIdentity` if the amounts are zero, the groups don't evenly
    /// partition the workers, or the id is not below `num_workers`.
    pub fn new(worker_id: usize, num_workers: usize, num_groups: usize) -> Result<Self> {
        if num_workers == 0 || num_groups == 0 {
            return Self::invalid(format!(
                "num_workers ({num_workers}) and num_groups ({num_groups}) must be positive"
            ));
        }

        if num_workers % num_groups != 0 {
            return Self::invalid(format!(
                "{num_groups} groups can't evenly partition {num_workers} workers"
            ));
        }

        if worker_id >= num_workers {
            return Self::invalid(format!(
                "worker_id {worker_id} is out of range for {num_workers} workers"
            ));
        }

        Ok(Self {
            worker_id,
            local_worker_id: worker_id,
            num_workers,
            num_groups,
            default_device: Device::default(),
            ccl: String::new(),
        })
    }

    /// Scopes the worker to a sub-session, where its local id differs from the global one.
    pub fn with_local_id(mut self, local_worker_id: usize) -> Result<Self> {
        if local_worker_id > self.worker_id {
            return Self::invalid(format!(
                "local_worker_id {local_worker_id} exceeds worker_id {}",
                self.worker_id
            ));
        }

        self.local_worker_id = local_worker_id;
        Ok(self)
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.default_device = device;
        self
    }

    pub(crate) fn set_ccl(&mut self, ccl: &str) {
        self.ccl = ccl.to_string();
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn local_worker_id(&self) -> usize {
        self.local_worker_id
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn num_groups(&self) -> usize {
        self.num_groups
    }

    pub fn default_device(&self) -> Device {
        self.default_device
    }

    /// The name of the collective communication backend, empty if there is none.
    pub fn ccl(&self) -> &str {
        &self.ccl
    }

    pub fn group_size(&self) -> usize {
        self.num_workers / self.num_groups
    }

    /// The index of the group this worker belongs to.
    pub fn group(&self) -> usize {
        self.worker_id / self.group_size()
    }

    /// The position of this worker within its group.
    pub fn rank(&self) -> usize {
        self.worker_id % self.group_size()
    }

    /// Whether this worker must hold the worker-zero data.
    pub fn is_worker_zero(&self) -> bool {
        self.local_worker_id == 0
    }

    fn invalid<T>(detail: String) -> Result<T> {
        Err(WorkerErr::InvalidIdentity(detail))
    }
}
