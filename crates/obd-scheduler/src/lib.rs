//! OBD-II Session Scheduling
//!
//! Hosts an [`obd_protocol::ObdClient`] on a single tokio task that
//! serializes stream reads, poll timer ticks and caller requests.

mod handle;
mod session;

pub use handle::ObdHandle;
pub use session::{connect, connect_serial, Connection, StreamSink};
