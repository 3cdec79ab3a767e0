//! Console output shared between tasks, and the read-classify-act loop.

use std::{
    io::{self, Write},
    sync::{Arc, Mutex, PoisonError},
};

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

use crate::command::Input;
use crate::controller::ConnectionController;
use crate::session::Session;

const LINE_ENDINGS: &[char] = &['\n', '\r'];

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Handle to the terminal's output and error streams.
///
/// Cloned into the event handler so network events can print while the
/// console loop is waiting for input. Every write is flushed immediately
/// because prompts do not end in a newline.
#[derive(Clone)]
pub struct Console {
    out: SharedWriter,
    err: SharedWriter,
}

impl Console {
    pub fn stdio() -> Self {
        Self::new(io::stdout(), io::stderr())
    }

    pub fn new(out: impl Write + Send + 'static, err: impl Write + Send + 'static) -> Self {
        Self {
            out: Arc::new(Mutex::new(Box::new(out))),
            err: Arc::new(Mutex::new(Box::new(err))),
        }
    }

    /// A console writing into in-memory transcripts.
    pub fn captured() -> (Self, Transcript, Transcript) {
        let out = Transcript::default();
        let err = Transcript::default();
        (Self::new(out.clone(), err.clone()), out, err)
    }

    pub fn print(&self, text: &str) {
        write_flushed(&self.out, text);
    }

    pub fn eprint(&self, text: &str) {
        write_flushed(&self.err, text);
    }
}

fn write_flushed(writer: &SharedWriter, text: &str) {
    let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
    if let Err(error) = writer.write_all(text.as_bytes()).and_then(|()| writer.flush()) {
        warn!(?error, "failed to write to console");
    }
}

/// Cloneable in-memory sink.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Transcript {
    pub fn contents(&self) -> String {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Write for Transcript {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Why the console loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The user typed `/quit`.
    Quit,
    /// The session was ended by the network side.
    Disconnected,
    /// The input stream closed.
    EndOfInput,
}

/// Reads lines until `/quit`, end of input, or the session stops running.
///
/// The continuation flag is checked right after each read, so a disconnect
/// that arrives while the loop is blocked is observed on the next line and
/// that line is not sent.
pub async fn run_console<R>(
    input: &mut R,
    session: &Session,
    controller: &ConnectionController,
    console: &Console,
) -> io::Result<LoopExit>
where
    R: AsyncBufRead + Unpin,
{
    let mut buffer = String::new();

    loop {
        console.print(&session.prompt());

        buffer.clear();
        if input.read_line(&mut buffer).await? == 0 {
            debug!("console input closed");
            return Ok(LoopExit::EndOfInput);
        }

        if !session.is_running() {
            return Ok(LoopExit::Disconnected);
        }

        let line = buffer.trim_end_matches(LINE_ENDINGS);
        match Input::classify(line) {
            Input::Empty => {}
            Input::Quit => {
                console.print("\nExiting.\n");
                session.close();
                return Ok(LoopExit::Quit);
            }
            Input::Rename { name } => {
                session.rename(name);
                controller.send(line);
            }
            Input::Unrecognized => debug!(line, "ignoring unrecognized command"),
            Input::Chat(text) => controller.send(text),
        }

        if !session.is_running() {
            return Ok(LoopExit::Disconnected);
        }
    }
}
