//! Native WebSocket client using tungstenite on a background thread.

use super::{Transport, TransportError, TransportEvent};
use crate::protocol::{ClientMessage, ServerMessage};
use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tungstenite::{Message, connect};
use url::Url;

/// Characters of a message shown in log lines.
const LOG_PREVIEW_CHARS: usize = 120;

/// Leading part of a message for logging, cut on a char boundary.
fn preview(text: &str) -> &str {
    match text.char_indices().nth(LOG_PREVIEW_CHARS) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// Commands from the board loop to the socket thread.
enum WsCommand {
    Send(String),
    Close,
}

/// WebSocket transport for native targets.
///
/// The socket lives on its own thread; commands and events cross over
/// mpsc channels so the board loop never blocks on I/O.
pub struct NativeWebSocket {
    open: bool,
    cmd_tx: Option<Sender<WsCommand>>,
    event_rx: Option<Receiver<TransportEvent>>,
    _thread: Option<JoinHandle<()>>,
}

impl NativeWebSocket {
    pub fn new() -> Self {
        Self {
            open: false,
            cmd_tx: None,
            event_rx: None,
            _thread: None,
        }
    }

    fn run(url: String, cmd_rx: Receiver<WsCommand>, event_tx: Sender<TransportEvent>) {
        log::info!("connecting to {url}");
        let (mut socket, response) = match connect(&url) {
            Ok(pair) => pair,
            Err(e) => {
                log::error!("websocket connection failed: {e}");
                let _ = event_tx.send(TransportEvent::Failed(e.to_string()));
                return;
            }
        };
        log::info!("websocket connected, status {}", response.status());
        let _ = event_tx.send(TransportEvent::Opened);

        if let tungstenite::stream::MaybeTlsStream::Plain(tcp) = socket.get_mut() {
            let _ = tcp.set_read_timeout(Some(Duration::from_millis(20)));
            let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
        }

        loop {
            match cmd_rx.try_recv() {
                Ok(WsCommand::Send(text)) => {
                    log::debug!("ws send: {}", preview(&text));
                    if let Err(e) = socket.send(Message::text(text)) {
                        log::error!("websocket send error: {e}");
                        let _ = event_tx.send(TransportEvent::Failed(e.to_string()));
                        return;
                    }
                }
                Ok(WsCommand::Close) => {
                    let _ = socket.close(None);
                    break;
                }
                Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {}
            }

            match socket.read() {
                Ok(Message::Text(text)) => match ServerMessage::from_json(&text) {
                    Ok(message) => {
                        let _ = event_tx.send(TransportEvent::Message(message));
                    }
                    Err(e) => log::warn!("unparseable server message ({e}): {}", preview(&text)),
                },
                Ok(Message::Ping(data)) => {
                    let _ = socket.send(Message::Pong(data));
                }
                Ok(Message::Close(_)) => {
                    log::info!("server closed the connection");
                    break;
                }
                Ok(_) => {}
                Err(tungstenite::Error::Io(ref e))
                    if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    log::error!("websocket read error: {e}");
                    let _ = event_tx.send(TransportEvent::Failed(e.to_string()));
                    return;
                }
            }
        }
        let _ = event_tx.send(TransportEvent::Closed);
    }
}

impl Default for NativeWebSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for NativeWebSocket {
    fn connect(&mut self, url: &str) -> Result<(), TransportError> {
        if self.cmd_tx.is_some() {
            return Err(TransportError::AlreadyConnected);
        }
        let parsed = Url::parse(url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(TransportError::InvalidUrl(format!("unsupported scheme {}", parsed.scheme())));
        }

        let (cmd_tx, cmd_rx) = channel();
        let (event_tx, event_rx) = channel();
        let url = url.to_string();
        let handle = thread::Builder::new()
            .name("lessonboard-ws".into())
            .spawn(move || Self::run(url, cmd_rx, event_tx))
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        self.cmd_tx = Some(cmd_tx);
        self.event_rx = Some(event_rx);
        self._thread = Some(handle);
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(WsCommand::Close);
        }
        self.event_rx = None;
        self._thread = None;
        self.open = false;
    }

    fn send(&mut self, message: &ClientMessage) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotConnected);
        }
        let tx = self.cmd_tx.as_ref().ok_or(TransportError::NotConnected)?;
        let text = message.to_json()?;
        tx.send(WsCommand::Send(text))
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        let mut finished = false;
        if let Some(rx) = &self.event_rx {
            loop {
                match rx.try_recv() {
                    Ok(event) => {
                        match &event {
                            TransportEvent::Opened => self.open = true,
                            TransportEvent::Closed | TransportEvent::Failed(_) => {
                                self.open = false;
                                finished = true;
                            }
                            TransportEvent::Message(_) => {}
                        }
                        events.push(event);
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        if self.open {
                            events.push(TransportEvent::Closed);
                        }
                        self.open = false;
                        finished = true;
                        break;
                    }
                }
            }
        }
        if finished {
            // Allow a fresh connect on the next attempt.
            self.cmd_tx = None;
            self.event_rx = None;
            self._thread = None;
        }
        events
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl Drop for NativeWebSocket {
    fn drop(&mut self) {
        self.disconnect();
    }
}
