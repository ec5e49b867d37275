//! Identity and token models for linked external accounts.

pub mod id;
pub mod token;

pub use id::*;
pub use token::{pair::*, secret::*};
