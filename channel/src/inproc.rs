//! The `inproc://` bus binding: a name-to-queue registry shared through the
//! `BusContext`, with an mpsc channel per bound endpoint.

use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rill_basics::{Error, Result};

#[derive(Clone, Default)]
pub struct Registry {
    endpoints: Arc<Mutex<HashMap<String, mpsc::Sender<Vec<u8>>>>>,
}

impl Registry {
    /// Binds `name`, failing if it is already taken in this context.
    pub fn bind(&self, name: &str) -> Result<InprocReceiver> {
        let mut endpoints = self.endpoints.lock().unwrap();
        if endpoints.contains_key(name) {
            return Err(Error::config(format!(
                "inproc endpoint {:?} is already bound",
                name
            )));
        }
        let (tx, rx) = mpsc::channel();
        endpoints.insert(name.to_owned(), tx);
        Ok(InprocReceiver {
            name: name.to_owned(),
            rx,
            registry: self.clone(),
        })
    }

    /// Enqueues `frame` for the endpoint named `name`.
    pub fn deliver(&self, name: &str, frame: &[u8]) -> Result<()> {
        let endpoints = self.endpoints.lock().unwrap();
        let tx = endpoints.get(name).ok_or_else(|| {
            Error::network(format!("no inproc endpoint {:?} is bound", name))
        })?;
        tx.send(frame.to_vec())
            .map_err(|_| Error::network(format!("inproc endpoint {:?} is gone", name)))
    }

    fn unbind(&self, name: &str) {
        self.endpoints.lock().unwrap().remove(name);
    }
}

/// The receiving half of a bound `inproc://` endpoint. Unbinds on drop.
pub struct InprocReceiver {
    name: String,
    rx: mpsc::Receiver<Vec<u8>>,
    registry: Registry,
}

impl InprocReceiver {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            // The registry keeps a sender alive for as long as we are bound.
            Err(RecvTimeoutError::Disconnected) => {
                Err(Error::network(format!("endpoint {:?} was unbound", self.name)))
            }
        }
    }
}

impl Drop for InprocReceiver {
    fn drop(&mut self) {
        self.registry.unbind(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_arrive_in_order() {
        let registry = Registry::default();
        let mut rx = registry.bind("x").unwrap();
        registry.deliver("x", b"one").unwrap();
        registry.deliver("x", b"two").unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            Some(b"one".to_vec())
        );
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            Some(b"two".to_vec())
        );
    }

    #[test]
    fn delivery_works_across_threads() {
        use std::thread;

        let registry = Registry::default();
        let mut rx = registry.bind("x").unwrap();

        let remote = registry.clone();
        let t = thread::spawn(move || {
            remote.deliver("x", b"ping").unwrap();
        });

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            Some(b"ping".to_vec())
        );
        t.join().unwrap();
    }
}
