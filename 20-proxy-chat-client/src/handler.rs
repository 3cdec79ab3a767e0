//! Event callbacks invoked by the transport.
//!
//! One trait covers every notification a transport produces. The session
//! implements it once, in [`ChatEvents`], which turns events into phase
//! changes on the shared [`Session`] and lines on the [`Console`].

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::command;
use crate::console::Console;
use crate::session::Session;
use crate::transport::{Outbox, Payload, PeerId, TransportError};

/// Receiver for transport notifications. Called from the transport's
/// dispatch task, which may run on any thread.
pub trait EventHandler: Send + Sync {
    /// Outcome of the connect attempt registered with the transport.
    fn on_connect(&self, peer: PeerId, outcome: Result<(), TransportError>);

    /// The connection is gone. `error` is `None` when the peer closed it
    /// cleanly.
    fn on_disconnect(&self, peer: PeerId, error: Option<TransportError>);

    fn on_message(&self, peer: PeerId, message: Result<Payload, TransportError>);

    fn on_send_complete(&self, peer: PeerId, outcome: Result<(), TransportError>);
}

pub struct ChatEvents {
    session: Arc<Session>,
    outbox: Outbox,
    console: Console,
}

impl ChatEvents {
    pub fn new(session: Arc<Session>, outbox: Outbox, console: Console) -> Self {
        Self {
            session,
            outbox,
            console,
        }
    }
}

impl EventHandler for ChatEvents {
    fn on_connect(&self, peer: PeerId, outcome: Result<(), TransportError>) {
        match outcome {
            Ok(()) => {
                // Queue the handshake before publishing `Connected`; the console
                // loop only starts after that, so nothing typed can overtake it.
                let handshake = command::handshake(&self.session.display_name());
                if let Err(error) = self.outbox.push(handshake) {
                    warn!(%peer, %error, "failed to queue handshake");
                }
                if self.session.mark_connected() {
                    info!(%peer, "connected");
                    self.console.print("\nConnected.\n");
                }
            }
            Err(error) => {
                warn!(%peer, %error, "connect failed");
                self.session.close();
                self.console.eprint(&format!("Error connecting. ({error})\n"));
            }
        }
    }

    fn on_disconnect(&self, peer: PeerId, error: Option<TransportError>) {
        match &error {
            Some(error) => info!(%peer, %error, "disconnected with error"),
            None => info!(%peer, "disconnected"),
        }
        self.session.close();
        self.console.eprint("\nServer disconnected. Enter to exit.\n");
    }

    fn on_message(&self, peer: PeerId, message: Result<Payload, TransportError>) {
        match message {
            Ok(payload) => {
                self.console
                    .print(&format!("\n{}\n{}", payload.text(), self.session.prompt()));
            }
            Err(error) => debug!(%peer, %error, "dropping undeliverable message"),
        }
    }

    fn on_send_complete(&self, peer: PeerId, outcome: Result<(), TransportError>) {
        if let Err(error) = outcome {
            warn!(%peer, %error, "send failed");
            self.console.print("Error. Timeout?\n");
        }
    }
}
