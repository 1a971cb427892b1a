//! Minimal HTTP/1.1 server for the scenario tests.
//!
//! Serves static bodies by path. A route can be told to answer its first N
//! requests with 500 before serving the body. Every response closes the
//! connection.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
struct Route {
    body: Vec<u8>,
    failures_left: usize,
    hits: usize,
    /// Pause before each of the four body pieces
    trickle: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct TestServer {
    routes: Arc<Mutex<HashMap<String, Route>>>,
    base: String,
}

impl TestServer {
    /// Starts the server in a background thread. It runs until the process exits.
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().unwrap().port();
        let routes: Arc<Mutex<HashMap<String, Route>>> = Arc::default();
        let shared = Arc::clone(&routes);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let routes = Arc::clone(&shared);
                thread::spawn(move || handle(stream, &routes));
            }
        });
        Self {
            routes,
            base: format!("http://127.0.0.1:{}/", port),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path.trim_start_matches('/'))
    }

    pub fn route(&self, path: &str, body: impl Into<Vec<u8>>) -> &Self {
        self.route_failing(path, body, 0)
    }

    pub fn route_failing(&self, path: &str, body: impl Into<Vec<u8>>, failures: usize) -> &Self {
        self.routes.lock().unwrap().insert(
            normalize(path),
            Route {
                body: body.into(),
                failures_left: failures,
                ..Route::default()
            },
        );
        self
    }

    /// Sends the body in four pieces with `pause` before each one.
    pub fn route_trickle(&self, path: &str, body: impl Into<Vec<u8>>, pause: Duration) -> &Self {
        self.routes.lock().unwrap().insert(
            normalize(path),
            Route {
                body: body.into(),
                trickle: pause,
                ..Route::default()
            },
        );
        self
    }

    /// Requests received for `path`, failed ones included
    pub fn hits(&self, path: &str) -> usize {
        self.routes
            .lock()
            .unwrap()
            .get(&normalize(path))
            .map(|r| r.hits)
            .unwrap_or(0)
    }
}

fn normalize(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}

fn handle(mut stream: TcpStream, routes: &Mutex<HashMap<String, Route>>) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));

    let mut request = Vec::new();
    let mut buf = [0u8; 4096];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }
    let request = String::from_utf8_lossy(&request);
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .split('?')
        .next()
        .unwrap_or("/")
        .to_string();

    let (status, body, trickle) = {
        let mut routes = routes.lock().unwrap();
        match routes.get_mut(&path) {
            Some(route) => {
                route.hits += 1;
                if route.failures_left > 0 {
                    route.failures_left -= 1;
                    ("500 Internal Server Error", Vec::new(), Duration::ZERO)
                } else {
                    ("200 OK", route.body.clone(), route.trickle)
                }
            }
            None => ("404 Not Found", Vec::new(), Duration::ZERO),
        }
    };

    let head = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        body.len()
    );
    let _ = stream.set_nodelay(true);
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.flush();
    if trickle.is_zero() || body.is_empty() {
        let _ = stream.write_all(&body);
    } else {
        for piece in body.chunks(body.len().div_ceil(4)) {
            thread::sleep(trickle);
            if stream.write_all(piece).and_then(|_| stream.flush()).is_err() {
                return;
            }
        }
    }
    let _ = stream.flush();
}
