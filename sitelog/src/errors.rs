//! Error types for configuration-surface operations
//!
//! Nothing on the emit path unwinds; the fast path and the queue report
//! recoverable conditions as boolean returns. These errors only surface
//! from the configuration manager.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("a policy is already registered at priority {0}")]
    PriorityOccupied(i32),

    #[error("no policy is registered at priority {0}")]
    UnknownPriority(i32),

    #[error("the policy at priority {0} is not the given instance")]
    PolicyMismatch(i32),
}

pub type Result<T> = std::result::Result<T, Error>;
