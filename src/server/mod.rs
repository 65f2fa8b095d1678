//! Network transports

pub mod http;
pub mod telnet;

pub use http::{HttpServer, HttpState};
pub use telnet::{TelnetOptions, TelnetServer};
