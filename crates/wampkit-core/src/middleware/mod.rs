//! Connection lifecycle middleware
//!
//! The server holds a single outermost [`ServerMiddleware`]. Each stage wraps
//! exactly one inner stage and decides, per event, whether to handle it,
//! forward it (possibly with a decorated connection) or stop it.
//!
//! Stages are driven from one event-loop task, so every method takes
//! `&mut self` and runs to completion before the next event is delivered.

mod stack;

pub use stack::{MiddlewareLayer, MiddlewareStack};

use crate::connection::ConnectionRef;
use crate::error::{Error, Result};
use bytes::Bytes;

/// A stage in the connection pipeline
pub trait ServerMiddleware: Send {
    /// A connection was opened
    fn on_open(&mut self, connection: &ConnectionRef) -> Result<()>;

    /// Bytes arrived on a connection
    fn on_message(&mut self, connection: &ConnectionRef, data: Bytes) -> Result<()>;

    /// A connection was closed
    fn on_close(&mut self, connection: &ConnectionRef) -> Result<()>;

    /// Processing an event for a connection failed
    fn on_error(&mut self, connection: &ConnectionRef, error: &Error) -> Result<()>;

    /// Periodic timer event
    fn on_tick(&mut self) -> Result<()> {
        Ok(())
    }

    /// WebSocket sub-protocols supported by this stage and the stages it wraps
    fn sub_protocols(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A boxed pipeline stage
pub type BoxedMiddleware = Box<dyn ServerMiddleware>;

impl<M> ServerMiddleware for Box<M>
where
    M: ServerMiddleware + ?Sized,
{
    fn on_open(&mut self, connection: &ConnectionRef) -> Result<()> {
        (**self).on_open(connection)
    }

    fn on_message(&mut self, connection: &ConnectionRef, data: Bytes) -> Result<()> {
        (**self).on_message(connection, data)
    }

    fn on_close(&mut self, connection: &ConnectionRef) -> Result<()> {
        (**self).on_close(connection)
    }

    fn on_error(&mut self, connection: &ConnectionRef, error: &Error) -> Result<()> {
        (**self).on_error(connection, error)
    }

    fn on_tick(&mut self) -> Result<()> {
        (**self).on_tick()
    }

    fn sub_protocols(&self) -> Vec<String> {
        (**self).sub_protocols()
    }
}
