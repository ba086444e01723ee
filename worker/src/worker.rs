use std::{io, sync::Arc};

use comms::{
    OnoReceiver, OnoSender,
    msg::{CollectiveOp, Command, Msg, Reply},
    value::{OpHandle, Tensor, Value},
};
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    Result, WorkerErr,
    collective::Collective,
    identity::WorkerInfo,
    ops::OpRegistry,
    register::RegisterFile,
    registry::{SlotGuard, WorkerSlot},
    zero::WorkerZeroData,
};

/// The lifecycle state of a worker's main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Terminated,
}

/// An execution agent driven by a controller.
///
/// It receives commands through a channel it borrows from its host, executes them
/// against its own register file and replies through the same channel. It never
/// issues commands on its own and never reorders them.
pub struct DiscoWorker<'a, R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    info: Arc<WorkerInfo>,
    worker_zero_data: Option<&'a WorkerZeroData>,
    rx: &'a mut OnoReceiver<R>,
    tx: &'a mut OnoSender<W>,
    ops: Arc<OpRegistry>,
    collective: Option<Arc<dyn Collective>>,
    register_file: RegisterFile,
    state: WorkerState,
}

impl<'a, R, W> DiscoWorker<'a, R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Creates a new worker using the builtin operations and no collective backend.
    ///
    /// # Arguments
    /// * `info` - The identity and group membership of the worker.
    /// * `worker_zero_data` - The data shared with the controller, only for worker zero.
    /// * `rx` - Receiving end of the controller channel.
    /// * `tx` - Sending end of the controller channel.
    ///
    /// # Errors
    /// `InvalidIdentity` if `worker_zero_data` is given to a worker other than
    /// worker zero, or missing for worker zero.
    pub fn new(
        info: WorkerInfo,
        worker_zero_data: Option<&'a WorkerZeroData>,
        rx: &'a mut OnoReceiver<R>,
        tx: &'a mut OnoSender<W>,
    ) -> Result<Self> {
        if info.is_worker_zero() != worker_zero_data.is_some() {
            return Err(WorkerErr::InvalidIdentity(format!(
                "worker-zero data must be given iff local_worker_id is 0, got local_worker_id {}",
                info.local_worker_id()
            )));
        }

        Ok(Self {
            info: Arc::new(info),
            worker_zero_data,
            rx,
            tx,
            ops: Arc::new(OpRegistry::with_builtins()),
            collective: None,
            register_file: RegisterFile::new(),
            state: WorkerState::Running,
        })
    }

    pub(crate) fn set_ops(&mut self, ops: Arc<OpRegistry>) {
        self.ops = ops;
    }

    pub(crate) fn set_collective(&mut self, collective: Arc<dyn Collective>) {
        Arc::make_mut(&mut self.info).set_ccl(collective.name());
        self.collective = Some(collective);
    }

    pub fn info(&self) -> &Arc<WorkerInfo> {
        &self.info
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.register_file
    }

    pub fn worker_zero_data(&self) -> Option<&'a WorkerZeroData> {
        self.worker_zero_data
    }

    /// Installs this worker into the current thread's slot.
    ///
    /// Must be called once, right after construction and before `main_loop`, on the
    /// thread that will run the loop. The returned guard must be kept alive while
    /// the worker runs, dropping it empties the slot.
    pub fn install(&self) -> Result<SlotGuard> {
        Ok(WorkerSlot::get().install(Arc::clone(&self.info))?)
    }

    /// Sets the specific register to a specific value.
    ///
    /// # Errors
    /// `OutOfRange` if `reg_id` is past the end of the register file.
    pub fn set_register(&mut self, reg_id: usize, value: Value) -> Result<()> {
        self.register_file.write(reg_id, value)
    }

    /// Serves commands until a shutdown command arrives or the channel closes.
    ///
    /// # Returns
    /// `Ok(())` on shutdown or channel closure.
    ///
    /// # Errors
    /// A `Protocol` error on an unrecognized or malformed frame and `Io` on a
    /// broken channel. In both cases no further command is served.
    pub async fn main_loop(&mut self) -> Result<()> {
        let worker_id = self.info.worker_id();
        let mut rx_buf: Vec<u32> = Vec::new();

        info!(worker_id = worker_id; "worker main loop started");

        while self.state == WorkerState::Running {
            let cmd = match self.rx.try_recv_into(&mut rx_buf).await {
                Ok(Some(Msg::Control(cmd))) => cmd,
                Ok(Some(other)) => {
                    let kind = other.kind();
                    let err = WorkerErr::Protocol(format!("expected a command, got {kind}"));
                    return self.abort(err).await;
                }
                Ok(None) => {
                    info!(worker_id = worker_id; "channel closed by the controller");
                    self.state = WorkerState::Terminated;
                    break;
                }
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    return self.abort(WorkerErr::Protocol(e.to_string())).await;
                }
                Err(e) => return self.abort(e.into()).await,
            };

            if let Err(e) = self.handle_command(cmd).await {
                return self.abort(e).await;
            }
        }

        info!(worker_id = worker_id; "worker terminated");
        Ok(())
    }

    /// Terminates the loop after an unrecoverable error, telling the controller why if possible.
    async fn abort(&mut self, err: WorkerErr) -> Result<()> {
        warn!(worker_id = self.info.worker_id(); "terminating on unrecoverable error: {err}");
        self.state = WorkerState::Terminated;

        if !matches!(err, WorkerErr::Io(_)) {
            let msg = Msg::Err(err.to_string().into());
            let _ = self.tx.send(&msg).await;
        }

        Err(err)
    }

    async fn handle_command(&mut self, cmd: Command) -> Result<()> {
        debug!(worker_id = self.info.worker_id(); "dispatching {cmd:?}");

        let outcome = match cmd {
            Command::Shutdown => {
                info!(worker_id = self.info.worker_id(); "shutdown received from controller");
                self.state = WorkerState::Terminated;
                return Ok(());
            }
            Command::DownloadTensor { reg_id } => return self.download_tensor(reg_id).await,
            Command::SetRegister { reg_id, value } => {
                self.set_register(reg_id, value).map(|_| Reply::Ack)
            }
            Command::GetRegister { reg_id } => {
                self.register_file.read(reg_id).cloned().map(Reply::Value)
            }
            Command::KillRegister { reg_id } => self.register_file.kill(reg_id).map(|_| Reply::Ack),
            Command::GetOp { name, reg_id } => self.get_op(name, reg_id),
            Command::Invoke { op, args, out } => self.invoke(&op, &args, out),
            Command::CallOp {
                func_reg,
                args,
                out,
            } => self.call_op(func_reg, &args, out),
            Command::Collective(op) => self.collective(op).await,
            Command::UploadTensor { reg_id, shape } => self.upload_tensor(reg_id, shape).await?,
            Command::CopyToWorker0 { reg_id } => self.copy_to_worker_zero(reg_id),
            Command::CopyFromWorker0 { reg_id } => self.copy_from_worker_zero(reg_id),
            Command::SyncWorker => Ok(Reply::Synced {
                worker_id: self.info.worker_id(),
            }),
        };

        self.reply(outcome).await
    }

    /// Sends the outcome of a command back, unrecoverable errors are returned instead.
    async fn reply(&mut self, outcome: Result<Reply>) -> Result<()> {
        match outcome {
            Ok(reply) => self.tx.send(&Msg::Reply(reply)).await?,
            Err(e) if e.is_recoverable() => {
                debug!(worker_id = self.info.worker_id(); "command failed: {e}");
                self.tx.send(&Msg::Err(e.to_string().into())).await?;
            }
            Err(e) => return Err(e),
        }

        Ok(())
    }

    fn get_op(&mut self, name: String, reg_id: usize) -> Result<Reply> {
        if !self.ops.contains(&name) {
            return Err(WorkerErr::UnknownOp(name));
        }

        self.set_register(reg_id, Value::Op(OpHandle::new(name)))?;
        Ok(Reply::Ack)
    }

    fn call_op(&mut self, func_reg: usize, args: &[usize], out: usize) -> Result<Reply> {
        let handle = match self.register_file.read(func_reg)? {
            Value::Op(handle) => handle.clone(),
            other => {
                return Err(WorkerErr::BadOperand {
                    reg_id: func_reg,
                    expected: "op",
                    got: other.kind(),
                });
            }
        };

        self.invoke(handle.name(), args, out)
    }

    fn invoke(&mut self, op: &str, args: &[usize], out: usize) -> Result<Reply> {
        let func = self
            .ops
            .get(op)
            .ok_or_else(|| WorkerErr::UnknownOp(op.to_string()))?;

        let operands = args
            .iter()
            .map(|&reg_id| self.register_file.read(reg_id))
            .collect::<Result<Vec<_>>>()?;

        let result = func(operands.as_slice())?;
        self.set_register(out, result)?;
        Ok(Reply::Ack)
    }

    async fn collective(&mut self, op: CollectiveOp) -> Result<Reply> {
        let backend = self.collective.clone().ok_or(WorkerErr::NoCollective)?;
        let rank = self.info.rank();

        match op {
            CollectiveOp::AllReduce { input, out, reduce } => {
                let tensor = self.read_tensor(input)?.clone();
                let reduced = backend.all_reduce(rank, tensor, reduce).await?;
                self.set_register(out, reduced.into())?;
            }
            CollectiveOp::Broadcast { input, out, root } => {
                let tensor = if rank == root {
                    Some(self.read_tensor(input)?.clone())
                } else {
                    None
                };

                let received = backend.broadcast(rank, root, tensor).await?;
                self.set_register(out, received.into())?;
            }
            CollectiveOp::AllGather { input, out } => {
                let tensor = self.read_tensor(input)?.clone();
                let gathered = backend.all_gather(rank, tensor).await?;
                self.set_register(out, gathered.into())?;
            }
            CollectiveOp::Barrier => backend.barrier(rank).await?,
        }

        Ok(Reply::Ack)
    }

    /// Receives the data frame that follows an `UploadTensor` command.
    ///
    /// The frame is always consumed, so a bad shape is recoverable. A frame of any
    /// other kind leaves the stream misaligned and is returned as an `Err`.
    async fn upload_tensor(&mut self, reg_id: usize, shape: Vec<usize>) -> Result<Result<Reply>> {
        let mut buf: Vec<f32> = Vec::new();

        let data = match self.rx.recv_into(&mut buf).await {
            Ok(Msg::Data(nums)) => nums.to_vec(),
            Ok(other) => {
                return Err(WorkerErr::Protocol(format!(
                    "expected the tensor data frame, got {}",
                    other.kind()
                )));
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                return Err(WorkerErr::Protocol(e.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let outcome = Tensor::new(shape, data)
            .map_err(WorkerErr::from)
            .and_then(|tensor| self.set_register(reg_id, tensor.into()))
            .map(|_| Reply::Ack);

        Ok(outcome)
    }

    async fn download_tensor(&mut self, reg_id: usize) -> Result<()> {
        let outcome = match self.register_file.read(reg_id) {
            Ok(Value::Tensor(tensor)) => {
                self.tx.send(&Msg::Data(tensor.data())).await?;
                return Ok(());
            }
            Ok(other) => Err(WorkerErr::BadOperand {
                reg_id,
                expected: "tensor",
                got: other.kind(),
            }),
            Err(e) => Err(e),
        };

        self.reply(outcome).await
    }

    fn copy_to_worker_zero(&mut self, reg_id: usize) -> Result<Reply> {
        if let Some(zero) = self.worker_zero_data {
            let tensor = zero.pop_host_array().ok_or(WorkerErr::EmptyHostQueue)?;
            self.set_register(reg_id, tensor.into())?;
        }

        Ok(Reply::Ack)
    }

    fn copy_from_worker_zero(&mut self, reg_id: usize) -> Result<Reply> {
        if let Some(zero) = self.worker_zero_data {
            let tensor = self.read_tensor(reg_id)?.clone();
            zero.push_host_array(tensor);
        }

        Ok(Reply::Ack)
    }

    fn read_tensor(&self, reg_id: usize) -> Result<&Tensor> {
        match self.register_file.read(reg_id)? {
            Value::Tensor(tensor) => Ok(tensor),
            other => Err(WorkerErr::BadOperand {
                reg_id,
                expected: "tensor",
                got: other.kind(),
            }),
        }
    }
}
