//! Event dispatch.
//!
//! Every component reports outward through a [`Dispatcher`]: transports
//! dispatch decoded packets by packet name, the engine re-dispatches them to
//! the application and the message layer dispatches decoded application
//! packets and acknowledgements.

mod dispatcher;

pub use dispatcher::{BoxError, Callback, Dispatcher, Reply, deferred, fallible, handler};
