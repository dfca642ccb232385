//! Raw TCP responder for archive bodies that break the declared length
//!
//! wiremock always sends the whole body it is given, so a response that
//! promises more bytes than it delivers needs a socket of its own.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use super::constants::*;

/// What the responder does once the short body is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEnd {
    /// Close the connection
    Close,
    /// Keep the connection open and send nothing more
    Stall,
}

/// Answers every archive request with `Content-Length: declared` followed
/// by only `body`
pub struct ShortBodyServer {
    url: String,
    connections: Arc<AtomicUsize>,
}

impl ShortBodyServer {
    pub async fn start(body: Vec<u8>, declared: usize, end: BodyEnd) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = connections.clone();

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(respond(socket, body.clone(), declared, end));
            }
        });

        Self {
            url: format!("http://{}{}", addr, ARCHIVE_PATH),
            connections,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Connections accepted so far; one per download attempt
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

async fn respond(mut socket: TcpStream, body: Vec<u8>, declared: usize, end: BodyEnd) {
    if !read_request_head(&mut socket).await {
        return;
    }

    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/zip\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        declared
    );
    if socket.write_all(head.as_bytes()).await.is_err() || socket.write_all(&body).await.is_err() {
        return;
    }
    let _ = socket.flush().await;

    match end {
        BodyEnd::Close => {
            let _ = socket.shutdown().await;
        }
        BodyEnd::Stall => tokio::time::sleep(Duration::from_secs(120)).await,
    }
}

/// Read up to the blank line ending the request head
async fn read_request_head(socket: &mut TcpStream) -> bool {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return false,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    true
}
