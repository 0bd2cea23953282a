//! # framecut-backend
//!
//! The render backend service. The editor drives it over a local duplex
//! channel with one JSON request per line; each request either replaces the
//! active clip set or renders one frame of it to a PNG in the temp folder.

pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

pub use protocol::{DraftStructure, Message};
pub use server::{run, serve_connection, ConnectionEnd};
pub use session::{Handled, Session};
