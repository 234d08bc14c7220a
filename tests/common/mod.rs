//! Local media server for integration tests.
//!
//! Accepts WebSocket connections, decodes every binary message with the
//! crate's own frame decoder and answers the way the real server does: a
//! progress reply after each chunk, a completion reply once a file is whole.

#![allow(dead_code)]

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use snapwire::streaming::Frame;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone, Copy, Default)]
pub struct MockOptions {
    /// Close this many connections right after the handshake
    pub drop_first: usize,
    /// Send a plain text greeting on connect
    pub greet: bool,
}

pub struct MockServer {
    pub addr: SocketAddr,
    frames: Arc<Mutex<Vec<Frame>>>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockServer {
    pub async fn spawn(options: MockOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let frames = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let task = {
            let frames = frames.clone();
            let connections = connections.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let n = connections.fetch_add(1, Ordering::SeqCst);
                    let drop_now = n < options.drop_first;
                    tokio::spawn(serve(stream, frames.clone(), drop_now, options.greet));
                }
            })
        };

        Self {
            addr,
            frames,
            connections,
            task,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/", self.addr)
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(stream: TcpStream, frames: Arc<Mutex<Vec<Frame>>>, drop_now: bool, greet: bool) {
    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };
    if drop_now {
        let _ = ws.close(None).await;
        return;
    }
    if greet {
        let _ = ws.send(Message::Text("connected".into())).await;
    }

    while let Some(Ok(msg)) = ws.next().await {
        match msg {
            Message::Binary(data) => {
                let frame = Frame::decode(Bytes::from(data)).expect("client sent a bad frame");
                let replies = replies_for(&frame);
                frames.lock().unwrap().push(frame);
                for reply in replies {
                    if ws.send(Message::Text(reply)).await.is_err() {
                        return;
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

fn replies_for(frame: &Frame) -> Vec<String> {
    match frame {
        Frame::WholeFile(f) => vec![completion(&f.filename, &f.content_type, f.content.len() as u64)],
        Frame::Chunk(c) => {
            let mut replies = vec![serde_json::json!({
                "filename": c.filename,
                "chunksSended": c.chunk_index,
                "totalChunks": c.total_chunks,
            })
            .to_string()];
            if c.chunk_index == c.total_chunks {
                replies.push(completion(&c.filename, &c.content_type, c.total_size));
            }
            replies
        }
    }
}

fn completion(filename: &str, content_type: &str, size: u64) -> String {
    serde_json::json!({
        "photo": {
            "id": 1,
            "createdAt": "2024-05-01T10:00:00",
            "originalFilename": filename,
            "filePath": format!("/data/{}", filename),
            "contentType": content_type,
            "size": size,
        },
        "message": "File saved",
    })
    .to_string()
}
