//! Client-side connection and bounded connection pool

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;

use super::ClientError;
use crate::wire::{Payload, reader, writer};

/// One server connection with its buffered codec halves. A connection that
/// saw an I/O failure marks itself inactive and is never pooled again.
pub struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    active: bool,
    authenticated: bool,
}

impl Connection {
    pub async fn dial(addr: &str, dial_timeout: Duration) -> Result<Self, ClientError> {
        let stream = timeout(dial_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::DialTimeout)??;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            active: true,
            authenticated: false,
        })
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn set_authenticated(&mut self, auth: bool) {
        self.authenticated = auth;
    }

    async fn send(&mut self, payload: &Payload) -> Result<(), ClientError> {
        let sent = async {
            writer::write_payload(&mut self.writer, payload).await?;
            self.writer.flush().await
        }
        .await;
        if let Err(e) = sent {
            self.active = false;
            return Err(e.into());
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<Payload, ClientError> {
        match reader::read_payload(&mut self.reader).await {
            Ok(payload) => Ok(payload),
            Err(e) => {
                if !e.is_protocol() {
                    self.active = false;
                }
                Err(e.into())
            }
        }
    }

    /// One request/response exchange. A wire error payload comes back as a
    /// server error.
    pub async fn call(&mut self, request: &Payload) -> Result<Payload, ClientError> {
        self.send(request).await?;
        let reply = self.receive().await?;
        if let Payload::Error(message) = reply {
            return Err(ClientError::Server(message));
        }
        Ok(reply)
    }
}

/// Bounded pool of idle connections to one address. Acquire is
/// non-blocking with a dial fallback; release is non-blocking and closes
/// (drops) the connection when the pool is full or the connection died.
pub struct Pool {
    addr: String,
    dial_timeout: Duration,
    capacity: usize,
    idle: Mutex<VecDeque<Connection>>,
}

impl Pool {
    pub fn new(addr: String, capacity: usize, dial_timeout: Duration) -> Self {
        Self {
            addr,
            dial_timeout,
            capacity,
            idle: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn get(&self) -> Result<Connection, ClientError> {
        if let Some(conn) = self.idle.lock().pop_front() {
            return Ok(conn);
        }
        Connection::dial(&self.addr, self.dial_timeout).await
    }

    pub fn put(&self, conn: Connection) {
        if !conn.active() {
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < self.capacity {
            idle.push_back(conn);
        }
    }

    #[cfg(test)]
    pub(crate) fn idle_len(&self) -> usize {
        self.idle.lock().len()
    }
}
