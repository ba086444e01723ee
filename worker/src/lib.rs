pub mod builder;
pub mod collective;
pub mod config;
pub mod device;
pub mod error;
mod host;
pub mod identity;
pub mod ops;
pub mod register;
pub mod registry;
pub mod worker;
pub mod zero;

pub use builder::WorkerBuilder;
pub use error::{Result, WorkerErr};
pub use identity::WorkerInfo;
pub use worker::{DiscoWorker, WorkerState};
pub use zero::WorkerZeroData;
