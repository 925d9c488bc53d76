use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Result};
use tracing::debug;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// One in-flight source download. The transfer runs on its own thread and
/// hands a finished buffer back through a channel; the supervisor polls it at
/// tick boundaries, so the core never observes concurrent execution.
pub struct SourceFetch {
    url: String,
    rx: Receiver<Result<Vec<u8>, String>>,
}

pub enum FetchPoll {
    Pending,
    Done(Vec<u8>),
    Failed(String),
}

impl SourceFetch {
    pub fn spawn(url: &str) -> Self {
        let (tx, rx) = mpsc::channel();
        let target = url.to_string();
        thread::spawn(move || {
            debug!(target: "fetch", "downloading {target}");
            let result = download(&target).map_err(|err| err.to_string());
            // The receiver may have been dropped by a cancelled slot.
            let _ = tx.send(result);
        });
        Self { url: url.to_string(), rx }
    }

    /// A fetch that completes immediately with the given buffer. Lets tests
    /// and local bootstrap paths skip the network entirely.
    pub fn ready(url: &str, data: Vec<u8>) -> Self {
        let (tx, rx) = mpsc::channel();
        let _ = tx.send(Ok(data));
        Self { url: url.to_string(), rx }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn poll(&self) -> FetchPoll {
        match self.rx.try_recv() {
            Ok(Ok(data)) => FetchPoll::Done(data),
            Ok(Err(message)) => FetchPoll::Failed(message),
            Err(TryRecvError::Empty) => FetchPoll::Pending,
            Err(TryRecvError::Disconnected) => FetchPoll::Failed("fetch thread died".to_string()),
        }
    }
}

fn download(url: &str) -> Result<Vec<u8>> {
    let client = reqwest::blocking::Client::builder().timeout(FETCH_TIMEOUT).build()?;
    let response = client.get(url).send()?;
    let status = response.status();
    if !status.is_success() {
        bail!("{status} while fetching {url}");
    }
    Ok(response.bytes()?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_fetch_completes_on_first_poll() {
        let fetch = SourceFetch::ready("http://example.org/boot.rhai", b"fn Update() {}".to_vec());
        assert_eq!(fetch.url(), "http://example.org/boot.rhai");
        match fetch.poll() {
            FetchPoll::Done(data) => assert_eq!(data, b"fn Update() {}"),
            _ => panic!("ready fetch should complete immediately"),
        }
        // The buffer is handed over exactly once.
        assert!(matches!(fetch.poll(), FetchPoll::Failed(_)));
    }

    #[test]
    fn failed_fetch_surfaces_the_reason() {
        let (tx, rx) = mpsc::channel();
        tx.send(Err("404 Not Found".to_string())).expect("send");
        let fetch = SourceFetch { url: "http://example.org/missing".to_string(), rx };
        match fetch.poll() {
            FetchPoll::Failed(message) => assert!(message.contains("404")),
            _ => panic!("expected a failure"),
        }
    }
}
