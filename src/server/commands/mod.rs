//! Command processors, one function per verb.
//!
//! Each module declares the option schemas of its verbs next to the
//! processors that consume them.

pub mod nodes;
pub mod random_access;
pub mod session;
pub mod transfer;

use crate::protocol_core::{Attributes, Response};

use super::connection::Outcome;

pub(crate) fn ok() -> Outcome {
    Outcome::Reply(Response::ok())
}

pub(crate) fn ok_with(attrs: Attributes) -> Outcome {
    Outcome::Reply(Response::Ok(attrs))
}
