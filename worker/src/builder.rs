use std::sync::Arc;

use comms::{OnoReceiver, OnoSender};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    DiscoWorker, Result, WorkerErr, collective::Collective, config::WorkerConfig,
    identity::WorkerInfo, ops::OpRegistry, zero::WorkerZeroData,
};

/// Assembles a `DiscoWorker` out of its identity and the collaborators it invokes.
pub struct WorkerBuilder {
    pub(crate) info: WorkerInfo,
    pub(crate) ops: Arc<OpRegistry>,
    pub(crate) collective: Option<Arc<dyn Collective>>,
}

impl WorkerBuilder {
    /// Creates a new `WorkerBuilder` with the builtin operations and no collective backend.
    ///
    /// # Args
    /// * `info` - The identity and group membership of the worker.
    pub fn new(info: WorkerInfo) -> Self {
        Self {
            info,
            ops: Arc::new(OpRegistry::with_builtins()),
            collective: None,
        }
    }

    /// Creates a new `WorkerBuilder` from a process configuration.
    pub fn from_config(cfg: &WorkerConfig) -> Result<Self> {
        let info = WorkerInfo::new(cfg.worker_id, cfg.num_workers, cfg.num_groups)?
            .with_local_id(cfg.local_worker_id)?
            .with_device(cfg.device);

        Ok(Self::new(info))
    }

    pub fn info(&self) -> &WorkerInfo {
        &self.info
    }

    pub fn ops(mut self, ops: Arc<OpRegistry>) -> Self {
        self.ops = ops;
        self
    }

    /// Sets the collective backend of the worker's group.
    ///
    /// # Errors
    /// `InvalidIdentity` if the backend serves a group of a different size.
    pub fn collective(mut self, collective: Arc<dyn Collective>) -> Result<Self> {
        let (expected, got) = (self.info.group_size(), collective.group_size());
        if expected != got {
            return Err(WorkerErr::InvalidIdentity(format!(
                "collective backend serves {got} workers, the group has {expected}"
            )));
        }

        self.collective = Some(collective);
        Ok(self)
    }

    /// Builds the worker over a channel and worker-zero data owned by the caller.
    ///
    /// # Args
    /// * `worker_zero_data` - Only for worker zero.
    /// * `rx` - Receiving end of the controller channel.
    /// * `tx` - Sending end of the controller channel.
    ///
    /// # Returns
    /// A worker ready to be installed and run.
    pub fn build<'a, R, W>(
        self,
        worker_zero_data: Option<&'a WorkerZeroData>,
        rx: &'a mut OnoReceiver<R>,
        tx: &'a mut OnoSender<W>,
    ) -> Result<DiscoWorker<'a, R, W>>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut worker = DiscoWorker::new(self.info, worker_zero_data, rx, tx)?;
        worker.set_ops(self.ops);

        if let Some(collective) = self.collective {
            worker.set_collective(collective);
        }

        Ok(worker)
    }
}
