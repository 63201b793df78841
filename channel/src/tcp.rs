//! The `tcp://` bus binding.
//!
//! Frames are length-prefixed with a network-order u32. Each bound node runs
//! a poll loop that accepts peer connections and drains whole frames;
//! outbound connections are plain blocking streams created on first use.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use byteorder::{ByteOrder, NetworkEndian, WriteBytesExt};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};

use rill_basics::{Error, Result};

const LISTENER: Token = Token(0);
const CONN_OFFSET: usize = 1;

/// The sending half of one outbound connection.
pub struct Sender {
    stream: io::BufWriter<std::net::TcpStream>,
    poisoned: bool,
}

impl Sender {
    pub fn connect(addr: SocketAddr) -> Result<Sender> {
        let stream = std::net::TcpStream::connect(&addr)
            .map_err(|e| Error::network(format!("connect to {} failed: {}", addr, e)))?;
        stream.set_nodelay(true)?;
        Ok(Sender {
            stream: io::BufWriter::new(stream),
            poisoned: false,
        })
    }

    pub fn send(&mut self, frame: &[u8]) -> Result<()> {
        if self.poisoned {
            return Err(Error::network("connection previously failed mid-frame"));
        }
        if let Err(e) = self.send_inner(frame) {
            // A partial write leaves the stream unframeable.
            self.poisoned = true;
            return Err(e.into());
        }
        Ok(())
    }

    fn send_inner(&mut self, frame: &[u8]) -> io::Result<()> {
        self.stream.write_u32::<NetworkEndian>(frame.len() as u32)?;
        self.stream.write_all(frame)?;
        self.stream.flush()
    }
}

#[derive(Debug)]
enum TryRecvError {
    Empty,
    Disconnected,
}

/// Reassembles length-prefixed frames from one nonblocking inbound stream.
struct FramedReader {
    stream: TcpStream,

    // Holds data from the stream that has not yet formed a whole frame.
    buffer: Vec<u8>,
    // Amount of data in `buffer` that is valid.
    buffer_size: usize,
}

impl FramedReader {
    fn new(stream: TcpStream) -> Self {
        FramedReader {
            stream,
            buffer: vec![0; 1024],
            buffer_size: 0,
        }
    }

    fn fill_to(&mut self, target: usize) -> std::result::Result<(), TryRecvError> {
        if self.buffer.len() < target {
            self.buffer.resize(target, 0u8);
        }
        while self.buffer_size < target {
            match self.stream.read(&mut self.buffer[self.buffer_size..target]) {
                Ok(0) => return Err(TryRecvError::Disconnected),
                Ok(n) => self.buffer_size += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Err(TryRecvError::Empty);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(_) => return Err(TryRecvError::Disconnected),
            }
        }
        Ok(())
    }

    fn try_recv(&mut self) -> std::result::Result<Vec<u8>, TryRecvError> {
        let prefix = std::mem::size_of::<u32>();
        self.fill_to(prefix)?;
        let message_size = NetworkEndian::read_u32(&self.buffer[0..prefix]) as usize;
        self.fill_to(prefix + message_size)?;

        let frame = self.buffer[prefix..prefix + message_size].to_vec();
        self.buffer_size = 0;
        Ok(frame)
    }
}

/// The receiving side of a `tcp://` binding: accepts connections and drains
/// frames from all of them.
pub struct Listener {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    local: SocketAddr,
    conns: Vec<Option<FramedReader>>,
    pending: VecDeque<Vec<u8>>,
    log: slog::Logger,
}

impl Listener {
    pub fn bind(addr: SocketAddr, log: slog::Logger) -> Result<Listener> {
        let mut listener = TcpListener::bind(addr)
            .map_err(|e| Error::config(format!("cannot bind {}: {}", addr, e)))?;
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let local = listener.local_addr()?;
        Ok(Listener {
            poll,
            events: Events::with_capacity(32),
            listener,
            local,
            conns: Vec::new(),
            pending: VecDeque::new(),
            log,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Returns the next whole inbound frame, waiting at most `timeout`.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        if let Some(frame) = self.pending.pop_front() {
            return Ok(Some(frame));
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.poll.poll(&mut self.events, Some(remaining)) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            let tokens: Vec<Token> = self.events.iter().map(|e| e.token()).collect();
            for token in tokens {
                if token == LISTENER {
                    self.accept_all()?;
                } else {
                    self.drain_conn(token.0 - CONN_OFFSET);
                }
            }

            if let Some(frame) = self.pending.pop_front() {
                return Ok(Some(frame));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    fn accept_all(&mut self) -> Result<()> {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    let token = Token(self.conns.len() + CONN_OFFSET);
                    self.poll
                        .registry()
                        .register(&mut stream, token, Interest::READABLE)?;
                    debug!(self.log, "accepted peer connection"; "peer" => %peer);
                    self.conns.push(Some(FramedReader::new(stream)));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn drain_conn(&mut self, idx: usize) {
        loop {
            let recv = match self.conns[idx] {
                Some(ref mut conn) => conn.try_recv(),
                None => return,
            };
            match recv {
                Ok(frame) => self.pending.push_back(frame),
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    if let Some(mut conn) = self.conns[idx].take() {
                        let _ = self.poll.registry().deregister(&mut conn.stream);
                    }
                    debug!(self.log, "peer connection closed");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn log() -> slog::Logger {
        slog::Logger::root(slog::Discard, o!())
    }

    fn bind_local() -> Listener {
        Listener::bind("127.0.0.1:0".parse().unwrap(), log()).unwrap()
    }

    #[test]
    fn frames_round_trip() {
        let mut listener = bind_local();
        let mut sender = Sender::connect(listener.local_addr()).unwrap();

        sender.send(b"twelve").unwrap();
        assert_eq!(
            listener.recv_timeout(Duration::from_secs(5)).unwrap(),
            Some(b"twelve".to_vec())
        );

        sender.send(b"sixty-five").unwrap();
        sender.send(b"thirteen").unwrap();
        assert_eq!(
            listener.recv_timeout(Duration::from_secs(5)).unwrap(),
            Some(b"sixty-five".to_vec())
        );
        assert_eq!(
            listener.recv_timeout(Duration::from_secs(5)).unwrap(),
            Some(b"thirteen".to_vec())
        );
    }

    #[test]
    fn timeout_returns_none() {
        let mut listener = bind_local();
        let started = Instant::now();
        let frame = listener.recv_timeout(Duration::from_millis(50)).unwrap();
        assert_eq!(frame, None);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn many_senders_one_listener() {
        let mut listener = bind_local();
        let addr = listener.local_addr();

        let threads: Vec<_> = (0..3u8)
            .map(|i| {
                thread::spawn(move || {
                    let mut sender = Sender::connect(addr).unwrap();
                    sender.send(&[i]).unwrap();
                })
            })
            .collect();

        let mut seen = Vec::new();
        for _ in 0..3 {
            let frame = listener
                .recv_timeout(Duration::from_secs(5))
                .unwrap()
                .expect("frame should arrive");
            seen.push(frame[0]);
        }
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2]);

        for t in threads {
            t.join().unwrap();
        }
    }

    #[test]
    fn empty_frames_are_legal() {
        let mut listener = bind_local();
        let mut sender = Sender::connect(listener.local_addr()).unwrap();
        sender.send(b"").unwrap();
        assert_eq!(
            listener.recv_timeout(Duration::from_secs(5)).unwrap(),
            Some(Vec::new())
        );
    }
}
