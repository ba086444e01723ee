pub mod error;
mod session;

pub use error::{OrchestratorError, Result};
pub use session::Session;
