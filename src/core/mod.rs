//! Core types: protocol constants, shared error taxonomy and the session
//! context.

pub mod constants;
mod context;
mod error;

pub use context::{Session, SessionContext};
pub use error::{Error, MessageError, Result, StateError};
