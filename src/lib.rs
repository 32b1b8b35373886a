//! An SPF (Sender Policy Framework, RFC 7208) evaluation engine.
//!
//! Given an envelope (`Request`): a client IP, a HELO domain and a MAIL FROM
//! address, `query_mailfrom` fetches the sender domain's SPF policy over
//! DNS, compiles it, interprets it against the envelope under a `Server`'s
//! DNS-lookup budgets, and returns a `Response` carrying a typed verdict
//! plus a ready-to-prepend `Received-SPF:` header.
//!
//! ```no_run
//! use std::sync::Arc;
//! use spf::dns::system::SystemResolver;
//! use spf::{query_mailfrom, Request, Server};
//!
//! let resolver = SystemResolver::from_system_conf().unwrap();
//! let server = Server::new(Arc::new(resolver), "mx.receiver.example");
//! let request = Request::new("192.0.2.1".parse().unwrap(), "mail.sender.example", "alice@sender.example");
//! let response = query_mailfrom(&server, &request);
//! println!("{}", response.received_spf.unwrap());
//! ```

pub mod dns;
pub mod error;
pub mod fuzz;
pub mod interpreter;
pub mod record;
pub mod render;
pub mod request;
pub mod response;
pub mod server;
pub mod spf;

pub use error::{ErrorKind, SpfError, SpfResult};
pub use interpreter::{query_fallback, query_mailfrom, query_rcptto};
pub use record::{compile::compile, CompiledRecord};
pub use request::Request;
pub use response::{Reason, Response, Verdict};
pub use server::Server;
