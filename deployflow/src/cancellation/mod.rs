//! Cooperative cancellation of deployments and pipeline executions.

mod token;

pub use token::CancellationToken;
