#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(test, deny(rust_2018_idioms))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # callbridge
//!
//! callbridge is a **blocking** HTTP call layer over an asynchronous,
//! callback-driven transport engine.
//!
//! The engine owns the network: protocol negotiation, connection pooling,
//! caching, DNS and TLS. It reports progress by invoking callbacks on its own
//! threads. callbridge turns those callbacks into a synchronous API:
//!
//! - [`Call::execute`] blocks until the response head arrives;
//! - the response body is a pull stream, each read asks the engine for one
//!   more chunk, so the transfer is back-pressured by the reader;
//! - request bodies are written by the application on a worker thread while
//!   the engine pulls them;
//! - interceptors wrap every call, and a call can be canceled from any thread.
//!
//! ## Example
//!
//! ```no_run
//! # fn run(engine: impl callbridge::engine::Engine + 'static) -> Result<(), Box<dyn std::error::Error>> {
//! use std::io::Read;
//! use callbridge::body::Outgoing;
//! use callbridge::client::Client;
//! use callbridge::Request;
//!
//! let client = Client::new(engine);
//! let req = Request::post("https://example.com/upload")
//!     .body(Outgoing::streaming(None, |sink| {
//!         use std::io::Write;
//!         sink.write_all(b"hello ")?;
//!         sink.write_all(b"world")
//!     }))?;
//!
//! let mut res = client.execute(req)?;
//! let mut text = String::new();
//! res.body_mut().read_to_string(&mut text)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Optional Features
//!
//! - `tracing` (default): logs through the [`tracing`] crate, which also
//!   forwards to `log`.
//! - `tokio`: adds `rt::TokioExecutor`, which runs blocking work on a Tokio
//!   runtime's blocking pool.
//!
//! [`tracing`]: https://docs.rs/tracing
//!
//! # Threads
//!
//! Engine callbacks never block: every event is handed over through a
//! bounded channel with `try_send`. Only consumer threads block, and always
//! with a timeout unless one was explicitly disabled.

#[doc(hidden)]
pub use http;

#[doc(no_inline)]
pub use http::{header, HeaderMap, Method, Request, Response, StatusCode, Uri, Version};

pub use crate::client::{Call, CallState, Client};
pub use crate::error::{Error, Result};

#[macro_use]
mod cfg;

#[macro_use]
mod trace;

pub mod body;
pub mod client;
mod common;
pub mod engine;
mod error;
pub mod ext;
#[cfg(test)]
mod mock;
mod proto;
pub mod rt;
pub mod service;
