use std::io::{self, Write};

use crossbeam_channel::{Receiver, Sender};
use tracing_subscriber::fmt::MakeWriter;

/// Forwards formatted log records to the server loop, which relays them to
/// the debug console.
#[derive(Clone)]
pub struct DebugConsoleWriter {
    sender: Sender<String>,
}

impl DebugConsoleWriter {
    pub fn new() -> (Self, Receiver<String>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { sender: tx }, rx)
    }
}

impl Write for DebugConsoleWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let message = String::from_utf8_lossy(buf);
        if self.sender.send(message.to_string()).is_err() {
            // Server loop is gone.
            eprint!("{message}");
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for DebugConsoleWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
