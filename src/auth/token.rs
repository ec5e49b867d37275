//! Token pair model and redacted secret wrapper.

pub mod pair;
pub mod secret;
