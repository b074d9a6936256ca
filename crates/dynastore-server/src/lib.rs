//! JSON-over-HTTP front-end for the DynaStore emulator.
//!
//! Exposes the full operation set of the emulated service on a single
//! `POST` endpoint: the operation name is the suffix of the
//! `X-Amz-Target` header, the body is the operation's JSON input, and
//! errors use the `com.amazon.coral.service#...` envelope.

pub mod error;
pub mod protocol;
pub mod server;

pub use server::router;
