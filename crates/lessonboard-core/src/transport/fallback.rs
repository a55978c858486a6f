//! REST state pull, used on page load and whenever the realtime channel
//! cannot deliver state.

use crate::protocol::StateResponse;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http request failed: {0}")]
    Http(String),
    #[error("server answered {0}")]
    Status(u16),
    #[error("failed to decode state: {0}")]
    Decode(String),
    #[error("server reported failure: {0}")]
    Rejected(String),
    #[error("fetch worker stopped")]
    WorkerGone,
}

/// Point-to-point source of the full board log.
pub trait StateSource {
    /// Start a fetch for `lesson_id`. A fetch already in flight is kept.
    fn request_state(&mut self, lesson_id: &str);

    /// Result of the fetch in flight, once it completed.
    fn poll_state(&mut self) -> Option<Result<StateResponse, FetchError>>;

    fn in_flight(&self) -> bool;
}

/// Reject bodies that decoded but report failure.
pub fn check_response(response: StateResponse) -> Result<StateResponse, FetchError> {
    if response.success {
        Ok(response)
    } else {
        Err(FetchError::Rejected(
            response.message.unwrap_or_else(|| "unknown error".to_string()),
        ))
    }
}

#[cfg(not(target_arch = "wasm32"))]
mod http {
    use super::{FetchError, StateSource, check_response};
    use crate::protocol::StateResponse;
    use reqwest::blocking::Client;
    use std::sync::mpsc::{Receiver, TryRecvError, channel};
    use std::thread;
    use std::time::Duration;

    /// Fetches `GET {base}/board/state/{lesson_id}` on a worker thread.
    pub struct HttpStateFetcher {
        base_url: String,
        client: Client,
        pending: Option<Receiver<Result<StateResponse, FetchError>>>,
    }

    impl HttpStateFetcher {
        pub fn new(base_url: impl Into<String>) -> Result<Self, FetchError> {
            let client = Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .map_err(|e| FetchError::Http(e.to_string()))?;
            Ok(Self {
                base_url: base_url.into(),
                client,
                pending: None,
            })
        }

        pub fn state_url(&self, lesson_id: &str) -> String {
            format!("{}/board/state/{}", self.base_url.trim_end_matches('/'), lesson_id)
        }

        fn fetch(client: &Client, url: &str) -> Result<StateResponse, FetchError> {
            let response = client.get(url).send().map_err(|e| FetchError::Http(e.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status(status.as_u16()));
            }
            let body: StateResponse = response.json().map_err(|e| FetchError::Decode(e.to_string()))?;
            check_response(body)
        }
    }

    impl StateSource for HttpStateFetcher {
        fn request_state(&mut self, lesson_id: &str) {
            if self.pending.is_some() {
                return;
            }
            let url = self.state_url(lesson_id);
            let client = self.client.clone();
            let (tx, rx) = channel();
            log::debug!("fetching board state from {url}");
            let spawned = thread::Builder::new()
                .name("lessonboard-fetch".into())
                .spawn(move || {
                    let _ = tx.send(Self::fetch(&client, &url));
                });
            match spawned {
                Ok(_) => self.pending = Some(rx),
                Err(e) => log::error!("failed to spawn state fetch: {e}"),
            }
        }

        fn poll_state(&mut self) -> Option<Result<StateResponse, FetchError>> {
            let rx = self.pending.as_ref()?;
            match rx.try_recv() {
                Ok(result) => {
                    self.pending = None;
                    Some(result)
                }
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => {
                    self.pending = None;
                    Some(Err(FetchError::WorkerGone))
                }
            }
        }

        fn in_flight(&self) -> bool {
            self.pending.is_some()
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use http::HttpStateFetcher;
