//! Library surface of the Inflow server, exposed for integration tests.

pub mod errors;
pub mod handlers;
