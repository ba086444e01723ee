use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use log::{error, info};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    runtime,
};

use crate::{Result, builder::WorkerBuilder, zero::WorkerZeroData};

impl WorkerBuilder {
    /// Hosts the worker on a dedicated thread until its main loop terminates.
    ///
    /// The thread owns both ends of the worker's side of the channel and lends them,
    /// with the worker-zero data, to the worker for its whole lifetime. The loop runs
    /// on a current-thread runtime so the worker stays in the thread-local slot it
    /// installs.
    ///
    /// # Args
    /// * `worker_zero_data` - Only for worker zero.
    /// * `rx` - The reader of the worker's side of the channel.
    /// * `tx` - The writer of the worker's side of the channel.
    ///
    /// # Returns
    /// The handle of the hosting thread, yielding the outcome of the main loop.
    pub fn spawn<R, W>(
        self,
        worker_zero_data: Option<Arc<WorkerZeroData>>,
        rx: R,
        tx: W,
    ) -> std::io::Result<JoinHandle<Result<()>>>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let worker_id = self.info.worker_id();

        thread::Builder::new()
            .name(format!("disco-worker-{worker_id}"))
            .spawn(move || -> Result<()> {
                let runtime = runtime::Builder::new_current_thread().enable_all().build()?;
                let (mut rx, mut tx) = comms::channel(rx, tx);

                let mut worker = self.build(worker_zero_data.as_deref(), &mut rx, &mut tx)?;
                let _installed = worker.install()?;

                let res = runtime.block_on(worker.main_loop());
                match &res {
                    Ok(()) => info!(worker_id = worker_id; "hosted worker exited"),
                    Err(e) => error!(worker_id = worker_id; "hosted worker failed: {e}"),
                }

                res
            })
    }
}
