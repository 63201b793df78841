//! The message bus connecting rill nodes.
//!
//! A node binds itself to a string endpoint and gets a [`Bus`]: a handle it
//! can use to ship opaque byte frames to peers by endpoint name and to drain
//! inbound frames with a timeout. Two bindings exist:
//!
//!  * `inproc://<name>` — an in-process registry owned by the shared
//!    [`BusContext`]; used by tests that host several nodes in one process.
//!  * `tcp://<host>:<port>` — real sockets, with a poll loop accepting peer
//!    connections and draining length-prefixed frames.
//!
//! The bus is asynchronous and best-effort: sends to absent peers and broken
//! streams surface as retriable network errors.

#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate slog;

pub mod inproc;
pub mod tcp;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use rill_basics::{Error, Result};

/// A parsed bus endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    /// An in-process endpoint, keyed by name.
    Inproc(String),
    /// A TCP endpoint.
    Tcp(SocketAddr),
}

/// Parses an endpoint string of the form `inproc://name` or
/// `tcp://host:port`.
pub fn parse_endpoint(endpoint: &str) -> Result<Endpoint> {
    if let Some(name) = strip_prefix(endpoint, "inproc://") {
        if name.is_empty() {
            return Err(Error::config(format!("empty inproc endpoint: {:?}", endpoint)));
        }
        return Ok(Endpoint::Inproc(name.to_owned()));
    }
    if let Some(addr) = strip_prefix(endpoint, "tcp://") {
        let addr = addr
            .parse()
            .map_err(|e| Error::config(format!("bad tcp endpoint {:?}: {}", endpoint, e)))?;
        return Ok(Endpoint::Tcp(addr));
    }
    Err(Error::config(format!(
        "unrecognized endpoint {:?} (expected inproc:// or tcp://)",
        endpoint
    )))
}

// str::strip_prefix postdates the compiler floor this workspace targets.
fn strip_prefix<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.starts_with(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

/// The wire envelope carried in every frame.
///
/// `payload` is the pickled tuple, opaque to the bus. The sending node's id
/// and logical time ride along so that the receiver can record networked
/// lineage for the tuple.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub channel: String,
    pub from_node: u64,
    pub from_time: u64,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::serialization(e.to_string()))
    }

    pub fn decode(frame: &[u8]) -> Result<Envelope> {
        bincode::deserialize(frame).map_err(|e| Error::serialization(e.to_string()))
    }
}

/// The shared state behind `inproc://` endpoints.
///
/// Cloning yields another handle onto the same registry; every node in a
/// process is constructed against one context, like nodes in separate
/// processes share a network.
#[derive(Clone, Default)]
pub struct BusContext {
    registry: inproc::Registry,
}

impl BusContext {
    pub fn new() -> Self {
        BusContext::default()
    }

    /// Binds `endpoint` and returns the bus handle for it.
    ///
    /// For `tcp://host:0` the returned bus reports the actual port it bound
    /// through [`Bus::endpoint`].
    pub fn bind(&self, endpoint: &str, log: slog::Logger) -> Result<Bus> {
        let incoming = match parse_endpoint(endpoint)? {
            Endpoint::Inproc(name) => Incoming::Inproc(self.registry.bind(&name)?),
            Endpoint::Tcp(addr) => Incoming::Tcp(tcp::Listener::bind(addr, log.clone())?),
        };
        let endpoint = match incoming {
            Incoming::Inproc(ref i) => format!("inproc://{}", i.name()),
            Incoming::Tcp(ref l) => format!("tcp://{}", l.local_addr()),
        };
        Ok(Bus {
            endpoint,
            incoming,
            ctx: self.clone(),
            remotes: HashMap::new(),
            log,
        })
    }
}

enum Incoming {
    Inproc(inproc::InprocReceiver),
    Tcp(tcp::Listener),
}

/// One node's handle onto the bus: its bound inbound endpoint plus lazily
/// created outbound connections.
pub struct Bus {
    endpoint: String,
    incoming: Incoming,
    ctx: BusContext,
    remotes: HashMap<SocketAddr, tcp::Sender>,
    log: slog::Logger,
}

impl Bus {
    /// The endpoint this bus is bound to, with any wildcard port resolved.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Ships one frame to `dest`, best-effort.
    pub fn send(&mut self, dest: &str, frame: &[u8]) -> Result<()> {
        match parse_endpoint(dest)? {
            Endpoint::Inproc(name) => self.ctx.registry.deliver(&name, frame),
            Endpoint::Tcp(addr) => {
                if !self.remotes.contains_key(&addr) {
                    let sender = tcp::Sender::connect(addr)?;
                    self.remotes.insert(addr, sender);
                }
                let result = self
                    .remotes
                    .get_mut(&addr)
                    .expect("just inserted")
                    .send(frame);
                if result.is_err() {
                    // Drop the broken connection; the next send reconnects.
                    self.remotes.remove(&addr);
                    debug!(self.log, "dropped broken connection"; "peer" => %addr);
                }
                result
            }
        }
    }

    /// Returns the next inbound frame, waiting at most `timeout`.
    ///
    /// `Ok(None)` means the timeout elapsed with nothing to read.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        match self.incoming {
            Incoming::Inproc(ref mut rx) => rx.recv_timeout(timeout),
            Incoming::Tcp(ref mut listener) => listener.recv_timeout(timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> slog::Logger {
        slog::Logger::root(slog::Discard, o!())
    }

    #[test]
    fn parses_endpoints() {
        assert_eq!(
            parse_endpoint("inproc://ping").unwrap(),
            Endpoint::Inproc("ping".to_owned())
        );
        assert_eq!(
            parse_endpoint("tcp://127.0.0.1:9000").unwrap(),
            Endpoint::Tcp("127.0.0.1:9000".parse().unwrap())
        );
        assert!(parse_endpoint("ipc://x").is_err());
        assert!(parse_endpoint("inproc://").is_err());
        assert!(parse_endpoint("tcp://nonsense").is_err());
    }

    #[test]
    fn envelope_round_trips() {
        let envelope = Envelope {
            channel: "c".to_owned(),
            from_node: 42,
            from_time: 7,
            payload: vec![1, 2, 3],
        };
        let frame = envelope.encode().unwrap();
        assert_eq!(Envelope::decode(&frame).unwrap(), envelope);
    }

    #[test]
    fn inproc_send_and_receive() {
        let ctx = BusContext::new();
        let mut a = ctx.bind("inproc://a", log()).unwrap();
        let mut b = ctx.bind("inproc://b", log()).unwrap();

        a.send("inproc://b", b"hello").unwrap();
        let frame = b.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(frame, Some(b"hello".to_vec()));

        // Nothing else is pending.
        let frame = b.recv_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(frame, None);

        // And a never saw its own frame.
        let frame = a.recv_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(frame, None);
    }

    #[test]
    fn inproc_send_to_unbound_peer_is_an_error() {
        let ctx = BusContext::new();
        let mut a = ctx.bind("inproc://a", log()).unwrap();
        assert!(a.send("inproc://nowhere", b"x").is_err());
    }

    #[test]
    fn inproc_rebind_after_drop() {
        let ctx = BusContext::new();
        let a = ctx.bind("inproc://a", log()).unwrap();
        assert!(ctx.bind("inproc://a", log()).is_err());
        drop(a);
        assert!(ctx.bind("inproc://a", log()).is_ok());
    }

    #[test]
    fn contexts_are_isolated() {
        let ctx1 = BusContext::new();
        let ctx2 = BusContext::new();
        let _a = ctx1.bind("inproc://a", log()).unwrap();
        let mut other = ctx2.bind("inproc://b", log()).unwrap();
        assert!(other.send("inproc://a", b"x").is_err());
    }
}
