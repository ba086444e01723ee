use std::{error::Error, fmt, io};

use comms::value::ShapeErr;

use crate::{collective::CollectiveErr, ops::OpErr, registry::RegistryErr};

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Worker runtime failures.
#[derive(Debug)]
pub enum WorkerErr {
    Io(io::Error),
    Protocol(String),
    InvalidConfig(String),
    InvalidIdentity(String),
    Registry(RegistryErr),
    OutOfRange {
        reg_id: usize,
        len: usize,
    },
    BadOperand {
        reg_id: usize,
        expected: &'static str,
        got: &'static str,
    },
    UnknownOp(String),
    Op(OpErr),
    Shape(ShapeErr),
    NoCollective,
    Collective(CollectiveErr),
    EmptyHostQueue,
}

impl WorkerErr {
    /// Whether the failure only affects the current command.
    ///
    /// Recoverable errors are replied to the controller and the main loop continues,
    /// every other error terminates it.
    pub fn is_recoverable(&self) -> bool {
        match self {
            WorkerErr::OutOfRange { .. }
            | WorkerErr::BadOperand { .. }
            | WorkerErr::UnknownOp(_)
            | WorkerErr::Op(_)
            | WorkerErr::Shape(_)
            | WorkerErr::NoCollective
            | WorkerErr::Collective(_)
            | WorkerErr::EmptyHostQueue => true,
            WorkerErr::Io(_)
            | WorkerErr::Protocol(_)
            | WorkerErr::InvalidConfig(_)
            | WorkerErr::InvalidIdentity(_)
            | WorkerErr::Registry(_) => false,
        }
    }
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Io(e) => write!(f, "io error: {e}"),
            WorkerErr::Protocol(detail) => write!(f, "protocol error: {detail}"),
            WorkerErr::InvalidConfig(detail) => write!(f, "invalid config: {detail}"),
            WorkerErr::InvalidIdentity(detail) => write!(f, "invalid worker identity: {detail}"),
            WorkerErr::Registry(e) => write!(f, "registry error: {e}"),
            WorkerErr::OutOfRange { reg_id, len } => {
                write!(f, "register {reg_id} is out of range, the register file holds {len}")
            }
            WorkerErr::BadOperand {
                reg_id,
                expected,
                got,
            } => write!(f, "register {reg_id} holds a {got}, expected a {expected}"),
            WorkerErr::UnknownOp(name) => write!(f, "unknown operation {name:?}"),
            WorkerErr::Op(e) => write!(f, "operation failed: {e}"),
            WorkerErr::Shape(e) => write!(f, "{e}"),
            WorkerErr::NoCollective => f.write_str("the worker has no collective backend"),
            WorkerErr::Collective(e) => write!(f, "collective failed: {e}"),
            WorkerErr::EmptyHostQueue => f.write_str("the worker-zero host queue is empty"),
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Io(e) => Some(e),
            WorkerErr::Registry(e) => Some(e),
            WorkerErr::Op(e) => Some(e),
            WorkerErr::Shape(e) => Some(e),
            WorkerErr::Collective(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WorkerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<RegistryErr> for WorkerErr {
    fn from(value: RegistryErr) -> Self {
        Self::Registry(value)
    }
}

impl From<OpErr> for WorkerErr {
    fn from(value: OpErr) -> Self {
        Self::Op(value)
    }
}

impl From<ShapeErr> for WorkerErr {
    fn from(value: ShapeErr) -> Self {
        Self::Shape(value)
    }
}

impl From<CollectiveErr> for WorkerErr {
    fn from(value: CollectiveErr) -> Self {
        Self::Collective(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<WorkerErr> for io::Error {
    fn from(value: WorkerErr) -> Self {
        match value {
            WorkerErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
