//! Connection handling for the bridge listener.
//!
//! Every accepted connection gets a reader (the accepting worker thread) and
//! a writer thread. The reader splits the byte stream into newline-delimited
//! frames and feeds them to a [`ConnectionAdapter`]; responses travel to the
//! writer over a channel, so delivering a response never blocks the
//! execution thread on the network.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::{Mutex, PoisonError};
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

use crate::connection::{ConnectionAdapter, Flow, ResponseSink};
use crate::dispatch::Dispatcher;
use crate::protocol::Codec;

use super::LISTENER_TARGET;

#[cfg(unix)]
use std::os::unix::net::UnixStream;

/// Stream types accepted by the bridge listener.
pub(crate) enum ConnectionStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl ConnectionStream {
    fn try_clone(&self) -> io::Result<Self> {
        match self {
            Self::Tcp(stream) => stream.try_clone().map(Self::Tcp),
            #[cfg(unix)]
            Self::Unix(stream) => stream.try_clone().map(Self::Unix),
        }
    }

    fn shutdown(&self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Self::Unix(stream) => stream.shutdown(Shutdown::Both),
        }
    }
}

impl Read for ConnectionStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for ConnectionStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Self::Unix(stream) => stream.flush(),
        }
    }
}

/// Handles accepted socket connections.
pub(crate) trait ConnectionHandler: Send + Sync + 'static {
    /// Handles a single connection until it closes. Implementations should
    /// avoid panicking.
    fn handle(&self, stream: ConnectionStream);
}

/// Handler that speaks the bridge protocol over newline-delimited frames.
#[derive(Debug)]
pub(crate) struct BridgeConnectionHandler {
    dispatcher: Dispatcher,
    codec: Codec,
    max_request_bytes: usize,
}

impl BridgeConnectionHandler {
    pub(crate) fn new(dispatcher: Dispatcher, codec: Codec, max_request_bytes: usize) -> Self {
        Self {
            dispatcher,
            codec,
            max_request_bytes,
        }
    }

    fn read_frames(&self, stream: ConnectionStream, adapter: &ConnectionAdapter) {
        let limit = u64::try_from(self.max_request_bytes)
            .unwrap_or(u64::MAX)
            .saturating_add(1);
        let mut reader = BufReader::new(stream);
        let mut frame = Vec::new();
        loop {
            frame.clear();
            match reader.by_ref().take(limit).read_until(b'\n', &mut frame) {
                Ok(0) => {
                    debug!(target: LISTENER_TARGET, connection = %adapter.id(), "peer closed");
                    return;
                }
                Ok(_) => {
                    if !frame.ends_with(b"\n") && frame.len() > self.max_request_bytes {
                        adapter.on_oversized_frame(self.max_request_bytes);
                        return;
                    }
                    if frame.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    if adapter.on_request_bytes(&frame) == Flow::Close {
                        return;
                    }
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => {
                    debug!(
                        target: LISTENER_TARGET,
                        connection = %adapter.id(),
                        %error,
                        "connection read failed"
                    );
                    return;
                }
            }
        }
    }
}

impl ConnectionHandler for BridgeConnectionHandler {
    fn handle(&self, stream: ConnectionStream) {
        let outbound = match stream.try_clone() {
            Ok(outbound) => outbound,
            Err(error) => {
                warn!(target: LISTENER_TARGET, %error, "failed to clone connection stream");
                return;
            }
        };
        let (sender, receiver) = crossbeam_channel::unbounded();
        let writer = match thread::Builder::new()
            .name("conduit-writer".to_owned())
            .spawn(move || run_writer(outbound, &receiver))
        {
            Ok(writer) => writer,
            Err(error) => {
                warn!(target: LISTENER_TARGET, %error, "failed to spawn writer thread");
                return;
            }
        };

        let adapter = ConnectionAdapter::open(
            self.dispatcher.clone(),
            self.codec,
            Box::new(ChannelSink::new(sender)),
        );
        self.read_frames(stream, &adapter);
        adapter.on_close();

        if writer.join().is_err() {
            warn!(target: LISTENER_TARGET, "writer thread panicked");
        }
    }
}

fn run_writer(mut stream: ConnectionStream, frames: &Receiver<Vec<u8>>) {
    for frame in frames {
        if let Err(error) = stream.write_all(&frame).and_then(|()| stream.flush()) {
            debug!(target: LISTENER_TARGET, %error, "connection write failed");
            break;
        }
    }
    if let Err(error) = stream.shutdown()
        && error.kind() != io::ErrorKind::NotConnected
    {
        debug!(target: LISTENER_TARGET, %error, "connection shutdown failed");
    }
}

/// Response sink feeding a connection's writer thread.
struct ChannelSink {
    sender: Mutex<Option<Sender<Vec<u8>>>>,
}

impl ChannelSink {
    fn new(sender: Sender<Vec<u8>>) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }
}

impl ResponseSink for ChannelSink {
    fn send(&self, frame: Vec<u8>) -> bool {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        sender
            .as_ref()
            .is_some_and(|sender| sender.send(frame).is_ok())
    }

    fn close(&self) {
        // Dropping the sender lets the writer drain queued frames and exit.
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
