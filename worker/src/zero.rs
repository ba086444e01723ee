use std::collections::VecDeque;

use comms::value::Tensor;
use parking_lot::Mutex;

/// Data shared between the controller and worker zero.
///
/// It is owned by the controller, worker zero only borrows it while it lives. Host
/// tensors move through a FIFO queue: the controller pushes before a
/// `CopyToWorker0` and pops after a `CopyFromWorker0`.
#[derive(Debug, Default)]
pub struct WorkerZeroData {
    host_arrays: Mutex<VecDeque<Tensor>>,
}

impl WorkerZeroData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_host_array(&self, tensor: Tensor) {
        self.host_arrays.lock().push_back(tensor);
    }

    pub fn pop_host_array(&self) -> Option<Tensor> {
        self.host_arrays.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.host_arrays.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.host_arrays.lock().is_empty()
    }
}
