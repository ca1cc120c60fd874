//! Result type aliases for claimq.

use crate::ClaimqError;

/// A specialized `Result` type for claimq bootstrap and API operations.
pub type ClaimqResult<T> = Result<T, ClaimqError>;
