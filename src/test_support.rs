//! In-test stand-in for the remote match authority.
//!
//! A real `TcpListener` on an ephemeral port, serving a fixed sequence of
//! canned HTTP responses from a background thread. Good enough for a
//! blocking reqwest client; not a general HTTP server.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub struct StubAuthority {
    port: u16,
    served: Arc<AtomicUsize>,
}

impl StubAuthority {
    /// Start a stub that answers incoming requests with `responses`, in
    /// order, then stops accepting.
    pub fn serving(responses: Vec<Vec<u8>>) -> StubAuthority {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub authority");
        let port = listener.local_addr().unwrap().port();
        let served = Arc::new(AtomicUsize::new(0));

        let counter = served.clone();
        std::thread::spawn(move || {
            for response in responses {
                let Ok((mut stream, _)) = listener.accept() else {
                    return;
                };
                read_request(&mut stream);
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = stream.write_all(&response);
                let _ = stream.flush();
            }
        });

        StubAuthority { port, served }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn requests_served(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }

    /// A port nothing listens on (bound once, then released).
    pub fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind probe");
        listener.local_addr().unwrap().port()
    }

    pub fn json_response(status: u16, body: &str) -> Vec<u8> {
        Self::response(status, "application/json", body.as_bytes())
    }

    pub fn bytes_response(status: u16, body: &[u8]) -> Vec<u8> {
        Self::response(status, "application/octet-stream", body)
    }

    fn response(status: u16, content_type: &str, body: &[u8]) -> Vec<u8> {
        let reason = if status < 400 { "OK" } else { "ERROR" };
        let mut bytes = format!(
            "HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\n\
             Content-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        )
        .into_bytes();
        bytes.extend_from_slice(body);
        bytes
    }
}

/// Drain one request: headers up to the blank line, then `Content-Length`
/// body bytes if any.
fn read_request(stream: &mut std::net::TcpStream) {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte) {
            Ok(1) => head.push(byte[0]),
            _ => return,
        }
    }

    let head = String::from_utf8_lossy(&head);
    let body_len = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())?
        })
        .unwrap_or(0);
    if body_len > 0 {
        let mut body = vec![0u8; body_len];
        let _ = stream.read_exact(&mut body);
    }
}
