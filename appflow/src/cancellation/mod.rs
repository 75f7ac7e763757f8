//! Cooperative cancellation for workflow runs.
//!
//! A run checks its token before every remote call and races it against
//! every poll sleep; a transport cancels the token when its caller goes away.

mod token;

pub use token::{CancelOnDrop, CancellationToken};
