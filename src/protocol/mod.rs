//! Wire shapes returned to clients and panels.

pub mod responses;

pub use responses::{LoginResponse, ValidateResponse};
