pub mod error;
pub mod utils;

pub use error::{ErrorKind, ExecError, InstallFailure};
