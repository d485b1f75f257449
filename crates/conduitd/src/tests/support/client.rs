//! Line-oriented protocol client used by the end-to-end scenarios.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use serde_json::Value;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Client writing one request per line and reading one response per line.
pub struct LineClient {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
    unclaimed: HashMap<String, Value>,
}

impl LineClient {
    /// Connects to a bridge listening on `addr`.
    pub fn connect(addr: SocketAddr) -> Self {
        let writer = TcpStream::connect(addr).expect("connect to bridge");
        writer
            .set_read_timeout(Some(READ_TIMEOUT))
            .expect("set read timeout");
        let reader = BufReader::new(writer.try_clone().expect("clone client stream"));
        Self {
            writer,
            reader,
            unclaimed: HashMap::new(),
        }
    }

    /// Writes one request frame.
    pub fn send(&mut self, request: &Value) {
        let mut frame = serde_json::to_vec(request).expect("encode request");
        frame.push(b'\n');
        self.writer.write_all(&frame).expect("write request");
        self.writer.flush().expect("flush request");
    }

    /// Reads the next response line, in arrival order.
    pub fn next_response(&mut self) -> Value {
        let mut line = String::new();
        let read = self.reader.read_line(&mut line).expect("read response");
        assert!(read > 0, "bridge closed the connection");
        serde_json::from_str(&line).expect("response is JSON")
    }

    /// Returns the response for `id`, holding back any others read first.
    pub fn response_for(&mut self, id: u64) -> Value {
        let key = id.to_string();
        if let Some(response) = self.unclaimed.remove(&key) {
            return response;
        }
        loop {
            let response = self.next_response();
            let found = response["id"].to_string();
            if found == key {
                return response;
            }
            self.unclaimed.insert(found, response);
        }
    }

    /// Half-closes the connection so the bridge sees end of stream.
    pub fn disconnect(self) {
        self.writer
            .shutdown(Shutdown::Write)
            .expect("half close client");
    }
}
