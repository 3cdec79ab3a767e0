//! Console chat client that talks to a single peer over TCP, optionally
//! through an authenticating HTTP proxy.
//!
//! Each module focuses on a concrete responsibility:
//!
//! - [`cli`] parses the command-line flags into a [`config::SessionConfig`].
//! - [`session`] holds the state shared between the console and the network:
//!   the continuation flag, the display name and the connection phase.
//! - [`command`] classifies console lines (`/quit`, rename, chat).
//! - [`console`] owns terminal output and runs the read-classify-act loop.
//! - [`handler`] defines the transport callbacks and the session's
//!   implementation of them.
//! - [`controller`] owns the transport for the lifetime of a session.
//! - [`transport`] is the transport contract plus the TCP and HTTP proxy
//!   implementation used by the binary.
//! - [`client`] wires everything together behind one error boundary.
//!
//! Unit tests live next to each module; integration tests drive whole
//! sessions through a scripted transport, a real socket and the binary.

pub mod cli;
pub mod client;
pub mod command;
pub mod config;
pub mod console;
pub mod controller;
pub mod handler;
pub mod session;
pub mod transport;
