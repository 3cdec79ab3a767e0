use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, BufReader};
use tracing::info;

use crate::{
    config::SessionConfig,
    console::{Console, LoopExit, run_console},
    controller::ConnectionController,
    handler::ChatEvents,
    session::{Phase, Session},
    transport::{self, Outbox, Route, Transport, tcp::TcpTransport},
};

pub const BANNER: &str = "Main client app.: Starting client\n";

pub const COMMANDS: &str = "Available commands: \n    \
    '/quit'      : Quit. \n    \
    '/who'       : List connected users. \n    \
    '/name name' : Change name.\n";

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The connect attempt failed; the console loop never ran.
    ConnectFailed,
    Quit,
    Disconnected,
    EndOfInput,
}

impl From<LoopExit> for SessionEnd {
    fn from(exit: LoopExit) -> Self {
        match exit {
            LoopExit::Quit => SessionEnd::Quit,
            LoopExit::Disconnected => SessionEnd::Disconnected,
            LoopExit::EndOfInput => SessionEnd::EndOfInput,
        }
    }
}

/// Runs one session over TCP against the terminal.
pub async fn run(config: SessionConfig) -> Result<SessionEnd> {
    let (outbox, queue) = transport::outbox();
    let transport = TcpTransport::new(config.endpoint(), queue);
    let mut stdin = BufReader::new(tokio::io::stdin());
    run_with(&config, transport, outbox, &mut stdin, Console::stdio()).await
}

/// Runs one session with the given transport and console.
///
/// `outbox` must feed the queue `transport` drains. Lines already sent are
/// flushed and the transport is released before this returns, whichever way
/// the session ended.
pub async fn run_with<T, R>(
    config: &SessionConfig,
    transport: T,
    outbox: Outbox,
    input: &mut R,
    console: Console,
) -> Result<SessionEnd>
where
    T: Transport,
    R: AsyncBufRead + Unpin,
{
    console.print(BANNER);

    let session = Arc::new(Session::new(config.display_name.clone()));
    let handler = Arc::new(ChatEvents::new(
        Arc::clone(&session),
        outbox.clone(),
        console.clone(),
    ));
    let mut controller = ConnectionController::new(transport, outbox, handler, Arc::clone(&session));

    let result = drive(config, &mut controller, &session, input, &console).await;
    controller.close().await;
    info!(outcome = ?result.as_ref().ok(), "session finished");
    result
}

async fn drive<R>(
    config: &SessionConfig,
    controller: &mut ConnectionController,
    session: &Session,
    input: &mut R,
    console: &Console,
) -> Result<SessionEnd>
where
    R: AsyncBufRead + Unpin,
{
    match config.route() {
        Route::Direct => controller.connect_direct(),
        Route::Proxy(route) => controller.connect_through_proxy(route),
    }
    controller
        .run_dispatch()
        .context("failed to start the transport")?;

    if session.settled().await != Phase::Connected {
        return Ok(if session.was_connected() {
            SessionEnd::Disconnected
        } else {
            SessionEnd::ConnectFailed
        });
    }

    console.print(COMMANDS);

    let exit = run_console(input, session, controller, console)
        .await
        .context("failed to read console input")?;
    Ok(exit.into())
}
