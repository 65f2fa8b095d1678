//! TCP transport for the binary wire protocol

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::commands::{CommandError, DispatchQueue};
use crate::session::Session;
use crate::store::Storage;
use crate::value::Value;
use crate::wire::{Payload, WireError, reader, writer};

/// Per-connection deadlines. An elapsed read deadline re-arms the loop; an
/// elapsed write deadline closes the connection.
#[derive(Debug, Clone, Copy)]
pub struct TelnetOptions {
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for TelnetOptions {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(5 * 60),
            write_timeout: Duration::from_secs(5),
        }
    }
}

/// TCP listener serving one long-lived request/response connection per
/// task. Requests flow through the queued dispatcher, so mutations commit
/// in dispatch order.
pub struct TelnetServer {
    listener: TcpListener,
    queue: DispatchQueue,
    storage: Arc<Storage>,
    opts: TelnetOptions,
}

impl TelnetServer {
    pub async fn bind(
        addr: &str,
        queue: DispatchQueue,
        storage: Arc<Storage>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            queue,
            storage,
            opts: TelnetOptions::default(),
        })
    }

    pub fn with_options(mut self, opts: TelnetOptions) -> Self {
        self.opts = opts;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop; returns when quit is signaled. Live connections watch
    /// the same channel and drop with it.
    pub async fn serve(self, mut quit: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = quit.changed() => {
                    debug!("telnet listener shutting down");
                    return;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!("accepted connection from {}", peer);
                            let session = Arc::new(Session::new(self.storage.clone()));
                            tokio::spawn(serve_client(
                                stream,
                                session,
                                self.queue.clone(),
                                self.opts,
                                quit.clone(),
                            ));
                        }
                        Err(e) => {
                            warn!("accept failed: {}", e);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                }
            }
        }
    }
}

/// Every request element must be a value payload.
fn request_body(payload: Payload) -> Result<Vec<Value>, WireError> {
    payload
        .into_array()?
        .into_iter()
        .map(|item| item.into_value())
        .collect()
}

async fn write_reply(
    writer: &mut BufWriter<OwnedWriteHalf>,
    payload: &Payload,
    write_timeout: Duration,
) -> io::Result<()> {
    let write = async {
        writer::write_payload(writer, payload).await?;
        writer.flush().await
    };
    timeout(write_timeout, write)
        .await
        .map_err(|_| io::Error::from(io::ErrorKind::TimedOut))?
}

async fn serve_client(
    stream: TcpStream,
    session: Arc<Session>,
    queue: DispatchQueue,
    opts: TelnetOptions,
    mut quit: watch::Receiver<bool>,
) {
    let (read_half, write_half): (OwnedReadHalf, OwnedWriteHalf) = stream.into_split();
    let mut reader_buf = BufReader::new(read_half);
    let mut writer_buf = BufWriter::new(write_half);

    loop {
        let request = tokio::select! {
            _ = quit.changed() => return,
            read = timeout(opts.read_timeout, reader::read_array(&mut reader_buf)) => read,
        };

        let payload = match request {
            // idle deadline: back to the loop to re-arm
            Err(_) => continue,
            Ok(Err(e)) if e.is_protocol() => {
                // framing is unrecoverable mid-stream: report and close
                let _ = write_reply(
                    &mut writer_buf,
                    &Payload::Error(e.to_string()),
                    opts.write_timeout,
                )
                .await;
                return;
            }
            // connection gone or clean EOF
            Ok(Err(_)) => return,
            Ok(Ok(payload)) => payload,
        };

        let body = match request_body(payload) {
            Ok(body) => body,
            Err(e) => {
                // a malformed request keeps the connection
                if write_reply(
                    &mut writer_buf,
                    &Payload::Error(e.to_string()),
                    opts.write_timeout,
                )
                .await
                .is_err()
                {
                    return;
                }
                continue;
            }
        };

        let reply = match queue.dispatch(session.clone(), body).await {
            Ok(payload) => payload,
            Err(CommandError::Quit) => return,
            Err(e) => Payload::Error(e.to_string()),
        };

        if write_reply(&mut writer_buf, &reply, opts.write_timeout).await.is_err() {
            return;
        }
    }
}
