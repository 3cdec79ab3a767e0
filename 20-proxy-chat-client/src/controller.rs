//! Ownership of the transport for the lifetime of one session.

use std::{sync::Arc, time::Duration};

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::handler::EventHandler;
use crate::session::Session;
use crate::transport::{Outbox, PeerId, ProxyRoute, Route, Transport, TransportError};

/// How long [`ConnectionController::close`] waits for queued payloads to be
/// written.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Owns the transport handle and forwards the session's requests to it.
///
/// The transport is released exactly once: by [`ConnectionController::close`],
/// by [`ConnectionController::shutdown`] or, failing both, when the controller
/// is dropped.
pub struct ConnectionController {
    transport: Option<Box<dyn Transport>>,
    outbox: Outbox,
    handler: Arc<dyn EventHandler>,
    session: Arc<Session>,
}

impl ConnectionController {
    pub fn new(
        transport: impl Transport,
        outbox: Outbox,
        handler: Arc<dyn EventHandler>,
        session: Arc<Session>,
    ) -> Self {
        Self {
            transport: Some(Box::new(transport)),
            outbox,
            handler,
            session,
        }
    }

    /// Requests a direct connection. The outcome arrives via
    /// [`EventHandler::on_connect`] once dispatch is running.
    pub fn connect_direct(&mut self) {
        info!("connecting directly");
        self.connect(Route::Direct);
    }

    /// Requests a connection through `route`'s proxy. The transport performs
    /// the proxy handshake, including credentials.
    pub fn connect_through_proxy(&mut self, route: ProxyRoute) {
        info!(proxy = %route.proxy, auth = %route.auth, "connecting through proxy");
        self.connect(Route::Proxy(route));
    }

    fn connect(&mut self, route: Route) {
        self.session.begin_connect();
        if let Some(transport) = self.transport.as_mut() {
            transport.connect(route, Arc::clone(&self.handler));
        }
    }

    /// Queues `payload` for delivery without waiting. A queue that is already
    /// closed is reported like any other failed send.
    pub fn send(&self, payload: &str) {
        if let Err(error) = self.outbox.push(payload) {
            self.handler.on_send_complete(PeerId::Unknown, Err(error));
        }
    }

    pub fn run_dispatch(&mut self) -> Result<(), TransportError> {
        match self.transport.as_mut() {
            Some(transport) => transport.run(),
            None => Err(TransportError::NotConnected),
        }
    }

    /// Flushes everything already passed to [`ConnectionController::send`],
    /// then releases the transport. A flush that takes longer than
    /// [`DRAIN_TIMEOUT`] is cut short.
    pub async fn close(&mut self) {
        let Some(mut transport) = self.transport.take() else {
            return;
        };
        if let Some(dispatch) = transport.close() {
            let abort = dispatch.abort_handle();
            match timeout(DRAIN_TIMEOUT, dispatch).await {
                Ok(_) => debug!("outbound queue flushed"),
                Err(_) => {
                    warn!(timeout = ?DRAIN_TIMEOUT, "outbound queue not flushed in time");
                    abort.abort();
                }
            }
        }
        transport.shutdown();
        debug!("transport released");
    }

    pub fn shutdown(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.shutdown();
            debug!("transport released");
        }
    }

    pub fn is_released(&self) -> bool {
        self.transport.is_none()
    }
}

impl Drop for ConnectionController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::config::AuthType;
    use crate::session::Phase;
    use crate::transport::{Endpoint, outbox};

    #[derive(Default)]
    struct Calls {
        routes: Vec<Route>,
        runs: usize,
        closes: usize,
        shutdowns: usize,
        flushed: bool,
    }

    struct Recording(Arc<Mutex<Calls>>);

    impl Transport for Recording {
        fn connect(&mut self, route: Route, _handler: Arc<dyn EventHandler>) {
            self.0.lock().unwrap().routes.push(route);
        }

        fn run(&mut self) -> Result<(), TransportError> {
            self.0.lock().unwrap().runs += 1;
            Ok(())
        }

        fn close(&mut self) -> Option<tokio::task::JoinHandle<()>> {
            self.0.lock().unwrap().closes += 1;
            let calls = Arc::clone(&self.0);
            Some(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                calls.lock().unwrap().flushed = true;
            }))
        }

        fn shutdown(&mut self) {
            self.0.lock().unwrap().shutdowns += 1;
        }
    }

    #[derive(Default)]
    struct SendFailures(Mutex<usize>);

    impl EventHandler for SendFailures {
        fn on_connect(&self, _: PeerId, _: Result<(), TransportError>) {}
        fn on_disconnect(&self, _: PeerId, _: Option<TransportError>) {}
        fn on_message(&self, _: PeerId, _: Result<crate::transport::Payload, TransportError>) {}
        fn on_send_complete(&self, _: PeerId, outcome: Result<(), TransportError>) {
            if outcome.is_err() {
                *self.0.lock().unwrap() += 1;
            }
        }
    }

    fn controller() -> (
        ConnectionController,
        Arc<Mutex<Calls>>,
        Arc<SendFailures>,
        crate::transport::OutboxQueue,
    ) {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let handler = Arc::new(SendFailures::default());
        let (outbox, queue) = outbox();
        let controller = ConnectionController::new(
            Recording(Arc::clone(&calls)),
            outbox,
            handler.clone(),
            Arc::new(Session::new("alice")),
        );
        (controller, calls, handler, queue)
    }

    #[test]
    fn direct_connect_registers_direct_route() {
        let (mut controller, calls, _, _) = controller();
        controller.connect_direct();
        controller.run_dispatch().expect("run");

        let calls = calls.lock().unwrap();
        assert_eq!(calls.routes, vec![Route::Direct]);
        assert_eq!(calls.runs, 1);
        assert_eq!(controller.session.phase(), Phase::Connecting);
    }

    #[test]
    fn proxied_connect_registers_proxy_route() {
        let (mut controller, calls, _, _) = controller();
        let route = ProxyRoute {
            auth: AuthType::Basic,
            proxy: Endpoint::new("10.0.0.1", "3128"),
            user: "u".into(),
            password: "p".into(),
        };
        controller.connect_through_proxy(route.clone());
        assert_eq!(calls.lock().unwrap().routes, vec![Route::Proxy(route)]);
    }

    #[test]
    fn send_is_queued() {
        let (controller, _, handler, mut queue) = controller();
        controller.send("hello");
        assert_eq!(queue.try_next().as_deref(), Some("hello"));
        assert_eq!(*handler.0.lock().unwrap(), 0);
    }

    #[test]
    fn send_after_queue_closed_reports_failure() {
        let (controller, _, handler, queue) = controller();
        drop(queue);
        controller.send("hello");
        assert_eq!(*handler.0.lock().unwrap(), 1);
    }

    #[test]
    fn shutdown_releases_transport_once() {
        let (mut controller, calls, _, _) = controller();
        controller.shutdown();
        controller.shutdown();
        assert!(controller.is_released());
        assert!(matches!(
            controller.run_dispatch(),
            Err(TransportError::NotConnected)
        ));
        drop(controller);
        assert_eq!(calls.lock().unwrap().shutdowns, 1);
    }

    #[tokio::test]
    async fn close_waits_for_flush_then_releases_once() {
        let (mut controller, calls, _, _) = controller();
        controller.close().await;
        controller.close().await;
        controller.shutdown();

        let calls = calls.lock().unwrap();
        assert!(calls.flushed);
        assert_eq!(calls.closes, 1);
        assert_eq!(calls.shutdowns, 1);
        assert!(controller.is_released());
    }

    #[test]
    fn drop_releases_transport() {
        let (controller, calls, _, _) = controller();
        drop(controller);
        assert_eq!(calls.lock().unwrap().shutdowns, 1);
    }
}
