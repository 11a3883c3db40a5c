#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tandem::{Server, ServerHandle};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(5);

pub async fn start(server: Server) -> ServerHandle {
    server.bind("127.0.0.1:0").await.unwrap()
}

#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

/// A raw HTTP/1.1 client over one TCP connection.
pub struct Client {
    reader: BufReader<TcpStream>,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            reader: BufReader::new(stream),
        }
    }

    pub async fn send(&mut self, raw: &str) {
        self.reader.get_mut().write_all(raw.as_bytes()).await.unwrap();
    }

    pub async fn get(&mut self, path: &str) -> RawResponse {
        self.send(&format!("GET {} HTTP/1.1\r\nHost: test\r\n\r\n", path)).await;
        self.read_response().await.expect("connection closed before a response")
    }

    /// `None` when the server closed the connection instead of answering.
    pub async fn read_response(&mut self) -> Option<RawResponse> {
        self.read_response_inner(false).await
    }

    pub async fn read_head_response(&mut self) -> Option<RawResponse> {
        self.read_response_inner(true).await
    }

    async fn read_response_inner(&mut self, head_only: bool) -> Option<RawResponse> {
        let mut status_line = String::new();
        let read = timeout(WAIT, self.reader.read_line(&mut status_line)).await.unwrap();
        match read {
            Ok(0) | Err(_) => return None,
            Ok(_) => {}
        }
        let status = status_line.split_whitespace().nth(1).unwrap().parse().unwrap();

        let mut headers = HashMap::new();
        loop {
            let mut line = String::new();
            self.reader.read_line(&mut line).await.unwrap();
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            let (name, value) = line.split_once(':').unwrap();
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }

        let length: usize = headers
            .get("content-length")
            .map(|v| v.parse().unwrap())
            .unwrap_or(0);
        let mut body = vec![0; if head_only { 0 } else { length }];
        self.reader.read_exact(&mut body).await.unwrap();
        Some(RawResponse { status, headers, body })
    }

    /// True once the server has closed its side, within `WAIT`.
    pub async fn is_closed(&mut self) -> bool {
        let mut buf = [0u8; 1];
        match timeout(WAIT, self.reader.read(&mut buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) => true,
            Ok(Ok(_)) | Err(_) => false,
        }
    }
}

/// One request on a fresh connection with `Connection: close`.
pub async fn get(addr: SocketAddr, path: &str) -> RawResponse {
    let mut client = Client::connect(addr).await;
    client
        .send(&format!("GET {} HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n", path))
        .await;
    client.read_response().await.expect("connection closed before a response")
}
