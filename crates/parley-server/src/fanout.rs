use std::{
    io::{self, Write},
    net::{Shutdown, TcpStream},
    sync::{Arc, Mutex, PoisonError, mpsc},
    thread,
};

use tracing::warn;

/// Writable half of a connected peer.
///
/// The internal lock serializes whole frames on the socket: a frame written
/// under it never interleaves with another sender's bytes.
pub struct Conn {
    peer: String,
    stream: Mutex<TcpStream>,
}

impl Conn {
    pub fn new(stream: TcpStream) -> Self {
        let peer = stream.peer_addr().map_or_else(|_| "unknown".to_string(), |a| a.to_string());
        Self { peer, stream: Mutex::new(stream) }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Writes the whole buffer under the socket write lock.
    pub fn send(&self, bytes: &[u8]) -> io::Result<()> {
        let mut stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        stream.write_all(bytes)
    }

    pub fn shutdown(&self) {
        let stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = stream.shutdown(Shutdown::Both);
    }
}

type Job = (Arc<Conn>, Arc<[u8]>);

/// Bounded worker pool shipping encoded frames to peers.
///
/// Submission never blocks (the queue is unbounded above the worker count).
/// A failing peer is logged and skipped; it never stalls delivery to the
/// others.
#[derive(Clone)]
pub struct SendPool {
    tx: mpsc::Sender<Job>,
}

impl SendPool {
    pub fn new(workers: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        for i in 0..workers {
            let rx = Arc::clone(&rx);
            thread::Builder::new()
                .name(format!("sender-{i}"))
                .spawn(move || {
                    loop {
                        let job = rx.lock().unwrap_or_else(PoisonError::into_inner).recv();
                        let Ok((conn, bytes)) = job else { break };
                        if let Err(err) = conn.send(&bytes) {
                            warn!(peer = %conn.peer(), %err, "send failed");
                        }
                    }
                })
                .expect("couldn't spawn fanout worker");
        }
        Self { tx }
    }

    pub fn submit(&self, conn: Arc<Conn>, bytes: Arc<[u8]>) {
        if self.tx.send((conn, bytes)).is_err() {
            warn!("fanout pool is gone, dropping frame");
        }
    }
}
