//! Shared fixtures: gzip bodies and a local Debian mirror on `tiny_http`.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tiny_http::{Header, Method, Response, Server, StatusCode};

pub const SAMPLE_CONTENTS: &str = "\
FILE                                                    LOCATION
usr/bin/a                                               admin/pkg1,utils/pkg2
usr/bin/b                                               admin/pkg1
usr/share/doc/pkg3/read me.txt                          doc/pkg3
";

pub fn gzip(text: &str) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(text.as_bytes()).unwrap();
    enc.finish().unwrap()
}

/// A base URL on which nothing is listening.
pub fn unreachable_mirror() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/debian")
}

/// Accepts connections and then goes quiet.
///
/// With `send_head`, each connection gets a `200` status line, headers
/// promising a large body, and the first bytes of a gzip stream before the
/// server stops writing. Without it the server never answers at all.
pub struct StalledMirror {
    pub base: String,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl StalledMirror {
    pub fn start(send_head: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let base = format!("http://{}/debian", listener.local_addr().unwrap());
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let stop = stop.clone();
            thread::spawn(move || {
                let mut connections = Vec::new();
                while !stop.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((mut stream, _)) => {
                            stream.set_nonblocking(false).unwrap();
                            let mut request = [0u8; 4096];
                            let _ = stream.read(&mut request);
                            if send_head {
                                let head = "HTTP/1.1 200 OK\r\nContent-Length: 1048576\r\nETag: \"slow\"\r\n\r\n";
                                let _ = stream.write_all(head.as_bytes());
                                let _ = stream.write_all(&gzip(SAMPLE_CONTENTS)[..8]);
                                let _ = stream.flush();
                            }
                            // keep the socket open until shutdown
                            connections.push(stream);
                        }
                        Err(_) => thread::sleep(Duration::from_millis(20)),
                    }
                }
            })
        };

        Self {
            base,
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for StalledMirror {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct MirrorState {
    etag: String,
    status: u16,
    body: Vec<u8>,
}

/// Serves `/debian/dists/stable/main/Contents-amd64.gz`, honouring
/// `If-None-Match`, and counts HEAD and GET requests.
pub struct MockMirror {
    pub base: String,
    heads: Arc<AtomicUsize>,
    gets: Arc<AtomicUsize>,
    state: Arc<Mutex<MirrorState>>,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MockMirror {
    pub const PATH: &'static str = "/debian/dists/stable/main/Contents-amd64.gz";

    pub fn start(etag: &str, contents: &str) -> Self {
        let server = Server::http("127.0.0.1:0").expect("http server");
        let base = format!("http://{}/debian", server.server_addr());
        let heads = Arc::new(AtomicUsize::new(0));
        let gets = Arc::new(AtomicUsize::new(0));
        let stop = Arc::new(AtomicBool::new(false));
        let state = Arc::new(Mutex::new(MirrorState {
            etag: etag.to_string(),
            status: 200,
            body: gzip(contents),
        }));

        let handle = {
            let (heads, gets, stop, state) = (heads.clone(), gets.clone(), stop.clone(), state.clone());
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    let req = match server.recv_timeout(Duration::from_millis(50)) {
                        Ok(Some(req)) => req,
                        Ok(None) => continue,
                        Err(_) => break,
                    };
                    let is_head = req.method() == &Method::Head;
                    if is_head {
                        heads.fetch_add(1, Ordering::SeqCst);
                    } else {
                        gets.fetch_add(1, Ordering::SeqCst);
                    }
                    if req.url() != Self::PATH {
                        let _ = req.respond(Response::empty(StatusCode(404)));
                        continue;
                    }

                    let (etag, status, body) = {
                        let s = state.lock().unwrap();
                        (s.etag.clone(), s.status, s.body.clone())
                    };
                    let etag_header = Header::from_bytes("ETag", etag.as_bytes()).expect("etag header");
                    let not_modified = !etag.is_empty()
                        && req
                            .headers()
                            .iter()
                            .any(|h| h.field.equiv("If-None-Match") && h.value.as_str() == etag);

                    if status != 200 {
                        let _ = req.respond(Response::empty(StatusCode(status)));
                    } else if not_modified {
                        let _ = req.respond(Response::empty(StatusCode(304)).with_header(etag_header));
                    } else if is_head {
                        let _ = req.respond(Response::empty(StatusCode(200)).with_header(etag_header));
                    } else {
                        let _ = req.respond(Response::from_data(body).with_header(etag_header));
                    }
                }
            })
        };

        Self {
            base,
            heads,
            gets,
            state,
            stop,
            handle: Some(handle),
        }
    }

    pub fn url(&self) -> String {
        format!("{}/dists/stable/main/Contents-amd64.gz", self.base)
    }

    pub fn heads(&self) -> usize {
        self.heads.load(Ordering::SeqCst)
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Publish new contents under a new entity tag.
    pub fn publish(&self, etag: &str, contents: &str) {
        let mut s = self.state.lock().unwrap();
        s.etag = etag.to_string();
        s.body = gzip(contents);
    }

    /// Answer every request with `status` and no body.
    pub fn fail_with(&self, status: u16) {
        self.state.lock().unwrap().status = status;
    }
}

impl Drop for MockMirror {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
