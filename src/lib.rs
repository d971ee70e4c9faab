//! # imap-engine
//!
//! Client-side protocol engine for IMAP4rev1 ([RFC 3501](https://www.rfc-editor.org/rfc/rfc3501.html))
//! and common extensions. The engine is transport- and grammar-agnostic: it frames the byte
//! stream, tracks the command-response conversation, and models message identifiers, while
//! leaving TLS/sockets and the response grammar to the caller.
//!
//! Three cores:
//!
//! - [`framing`]: splits the raw byte stream into self-contained frames, handling CRLF edge cases
//!   and IMAP literals (`{N}`, `{N+}`, `{N-}`, `~{N}`).
//! - [`client`]: the command-response state machine, multiplexing APPEND, AUTHENTICATE, and IDLE
//!   with ordinary pipelined traffic.
//! - [`identifier`]: typed UIDs and sequence numbers with a compact set algebra over canonical
//!   ranges.
//!
//! [`codec::ClientCodec`] ties them together behind a byte-in / byte-out contract.
//!
//! Every core is a pure state machine: no I/O, no suspension, no internal recovery. All errors
//! are surfaced to the caller as typed values.

#![deny(missing_debug_implementations)]

pub mod client;
pub mod codec;
pub mod core;
pub mod framing;
pub mod identifier;
pub mod utils;
