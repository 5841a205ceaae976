// ===================== http.rs =====================
//! Hand-rolled `multipart/form-data` upload of one stored recording.

use std::{
    io::{self, Read, Write},
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use serde::Deserialize;

use crate::{
    config::Endpoint,
    error::{Error, Result},
    net::{Connection, Transport},
    storage::StorageSink,
};

pub const CHUNK_SIZE: usize = 512;
const MAX_RESPONSE: usize = 2 * 1024;

/// Request line, headers and the multipart envelope for one upload.
/// Only the envelope is held in memory; the file is streamed between
/// `head` and `tail`.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    header: String,
    head: String,
    tail: String,
    file_size: u64,
}

impl UploadRequest {
    pub fn new(endpoint: &Endpoint, filename: &str, file_size: u64, boundary: &str) -> Self {
        let head = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             Content-Type: audio/wav\r\n\r\n"
        );
        let tail = format!("\r\n--{boundary}--\r\n");
        let content_length = head.len() as u64 + file_size + tail.len() as u64;
        let header = format!(
            "POST {path} HTTP/1.1\r\n\
             Host: {host}\r\n\
             Content-Type: multipart/form-data; boundary={boundary}\r\n\
             Content-Length: {content_length}\r\n\
             Connection: close\r\n\r\n",
            path = endpoint.path,
            host = endpoint.host_header(),
        );

        Self { header, head, tail, file_size }
    }

    pub fn header_bytes(&self) -> &[u8] {
        self.header.as_bytes()
    }

    pub fn head_bytes(&self) -> &[u8] {
        self.head.as_bytes()
    }

    pub fn tail_bytes(&self) -> &[u8] {
        self.tail.as_bytes()
    }

    pub fn content_length(&self) -> u64 {
        self.head.len() as u64 + self.file_size + self.tail.len() as u64
    }
}

/// Bounded chunks of a reader until it is exhausted. Ends after the first
/// error, so it is always finite.
pub struct FileChunks<R> {
    src: R,
    done: bool,
}

impl<R: Read> FileChunks<R> {
    pub fn new(src: R) -> Self {
        Self { src, done: false }
    }
}

impl<R: Read> Iterator for FileChunks<R> {
    type Item = io::Result<heapless::Vec<u8, CHUNK_SIZE>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            match self.src.read(&mut buf) {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(n) => {
                    let chunk = heapless::Vec::from_slice(&buf[..n])
                        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "chunk overflow"));
                    return Some(chunk);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// JSON the collector answers with; every field is optional so an error
/// reply (`{"error": ...}`) parses too.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct CollectorReply {
    pub session_id: Option<String>,
    pub bpm: Option<f64>,
    pub beats_grouped: Option<u32>,
    pub duration_sec: Option<f64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UploadReport {
    pub body_bytes_sent: u64,
    pub status: Option<u16>,
    pub response: String,
    pub reply: Option<CollectorReply>,
}

impl UploadReport {
    fn from_response(body_bytes_sent: u64, raw: &[u8]) -> Self {
        let response = String::from_utf8_lossy(raw).into_owned();
        let status = response
            .lines()
            .next()
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|code| code.parse().ok());
        let reply = response
            .split_once("\r\n\r\n")
            .and_then(|(_, body)| serde_json::from_str(body.trim()).ok());

        Self { body_bytes_sent, status, response, reply }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, Some(200..=299))
    }

    /// A status line was read and it is not 2xx.
    pub fn is_rejected(&self) -> bool {
        self.status.is_some() && !self.is_success()
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

// ───────── POST multipart to the collector ─────────
pub fn upload<S, T>(
    sink: &S,
    name: &str,
    endpoint: &Endpoint,
    transport: &mut T,
    boundary: &str,
    response_timeout: Duration,
) -> Result<UploadReport>
where
    S: StorageSink,
    T: Transport,
{
    let file = sink.open_for_read(name)?;
    let file_size = sink.size(&file).map_err(|e| Error::storage(name, e))?;
    let req = UploadRequest::new(endpoint, name, file_size, boundary);
    info!("📤 {name}: {file_size} B, Content-Length {}", req.content_length());

    let mut conn = transport.connect(endpoint).map_err(|e| Error::connection(endpoint, e))?;
    let net_err = |e| Error::connection(endpoint, e);

    debug!("➡️  sending POST + headers");
    conn.write_all(req.header_bytes()).map_err(net_err)?;
    conn.write_all(req.head_bytes()).map_err(net_err)?;
    let mut sent = req.head_bytes().len() as u64;

    for chunk in FileChunks::new(file) {
        let chunk = chunk.map_err(|e| Error::storage(name, e))?;
        conn.write_all(&chunk).map_err(net_err)?;
        sent += chunk.len() as u64;
    }

    conn.write_all(req.tail_bytes()).map_err(net_err)?;
    conn.flush().map_err(net_err)?;
    sent += req.tail_bytes().len() as u64;
    if sent != req.content_length() {
        // file changed size under us; the collector will see a short/long body
        warn!("body {sent} B != Content-Length {}", req.content_length());
    }

    debug!("⏳ waiting for response (up to {response_timeout:?})");
    conn.set_read_timeout(Some(response_timeout)).map_err(net_err)?;
    let mut buf = [0u8; CHUNK_SIZE];
    let first = loop {
        match conn.read(&mut buf) {
            Ok(0) => {
                return Err(net_err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "closed without a response",
                )))
            }
            Ok(n) => break n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_timeout(&e) => return Err(Error::Timeout(response_timeout)),
            Err(e) => return Err(net_err(e)),
        }
    };

    // the rest of the reply gets one more timeout window, then we stop listening
    let deadline = Instant::now() + response_timeout;
    let mut raw = Vec::with_capacity(MAX_RESPONSE);
    raw.extend_from_slice(&buf[..first.min(MAX_RESPONSE)]);
    while raw.len() < MAX_RESPONSE {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            debug!("response drain hit its {response_timeout:?} limit");
            break;
        }
        conn.set_read_timeout(Some(left)).map_err(net_err)?;
        let room = (MAX_RESPONSE - raw.len()).min(CHUNK_SIZE);
        match conn.read(&mut buf[..room]) {
            Ok(0) => break,
            Ok(n) => raw.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                if !is_timeout(&e) {
                    warn!("response drain stopped: {e}");
                }
                break;
            }
        }
    }

    let report = UploadReport::from_response(sent, &raw);
    debug!("🏁 response ({} B): {}", raw.len(), report.response.trim_end());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStorage;
    use std::{
        cell::RefCell,
        io::Cursor,
        rc::Rc,
    };

    const BND: &str = "----------------ESP32BOUNDARY";

    fn ep() -> Endpoint {
        Endpoint { host: "collector.lan".into(), port: 8000, path: "/upload".into() }
    }

    struct Scripted {
        sent: Rc<RefCell<Vec<u8>>>,
        reply: Cursor<Vec<u8>>,
        silent: bool,
        trickle: Option<Duration>,
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.silent {
                return Err(io::Error::from(io::ErrorKind::WouldBlock));
            }
            if let Some(pause) = self.trickle {
                // a peer that never finishes: one byte per pause
                std::thread::sleep(pause);
                buf[0] = b'x';
                return Ok(1);
            }
            self.reply.read(buf)
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.sent.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Connection for Scripted {
        fn set_read_timeout(&mut self, _: Option<Duration>) -> io::Result<()> {
            Ok(())
        }
    }

    struct Once {
        sent: Rc<RefCell<Vec<u8>>>,
        reply: Vec<u8>,
        silent: bool,
        refuse: bool,
        trickle: Option<Duration>,
    }

    impl Once {
        fn replying(reply: &str) -> Self {
            Self {
                sent: Rc::default(),
                reply: reply.as_bytes().to_vec(),
                silent: false,
                refuse: false,
                trickle: None,
            }
        }
    }

    impl Transport for Once {
        type Conn = Scripted;

        fn connect(&mut self, _: &Endpoint) -> io::Result<Scripted> {
            if self.refuse {
                return Err(io::Error::from(io::ErrorKind::ConnectionRefused));
            }
            Ok(Scripted {
                sent: self.sent.clone(),
                reply: Cursor::new(self.reply.clone()),
                silent: self.silent,
                trickle: self.trickle,
            })
        }
    }

    fn store(bytes: &[u8]) -> MemStorage {
        let mut mem = MemStorage::new();
        let mut w = mem.create_for_write("heartbeat.wav").unwrap();
        w.write_all(bytes).unwrap();
        mem.close(w).unwrap();
        mem
    }

    #[test]
    fn request_envelope_is_exact() {
        let req = UploadRequest::new(&ep(), "heartbeat.wav", 64_044, BND);
        assert_eq!(
            req.head_bytes(),
            format!(
                "--{BND}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"heartbeat.wav\"\r\nContent-Type: audio/wav\r\n\r\n"
            )
            .as_bytes()
        );
        assert_eq!(req.tail_bytes(), format!("\r\n--{BND}--\r\n").as_bytes());
        assert_eq!(
            req.content_length(),
            req.head_bytes().len() as u64 + 64_044 + req.tail_bytes().len() as u64
        );

        let header = std::str::from_utf8(req.header_bytes()).unwrap();
        assert!(header.starts_with("POST /upload HTTP/1.1\r\nHost: collector.lan:8000\r\n"));
        assert!(header.contains(&format!("Content-Type: multipart/form-data; boundary={BND}\r\n")));
        assert!(header.contains(&format!("Content-Length: {}\r\n", req.content_length())));
        assert!(header.ends_with("\r\n\r\n"));
    }

    #[test]
    fn empty_file_is_head_plus_tail() {
        let req = UploadRequest::new(&ep(), "heartbeat.wav", 0, BND);
        assert_eq!(req.content_length(), (req.head_bytes().len() + req.tail_bytes().len()) as u64);
    }

    #[test]
    fn chunks_are_bounded_and_cover_the_source() {
        let data: Vec<u8> = (0..1_300u32).map(|i| i as u8).collect();
        let chunks: Vec<_> = FileChunks::new(Cursor::new(data.clone())).map(|c| c.unwrap()).collect();
        assert_eq!(chunks.iter().map(|c| c.len()).collect::<Vec<_>>(), vec![512, 512, 276]);
        assert_eq!(chunks.iter().flat_map(|c| c.iter().copied()).collect::<Vec<u8>>(), data);

        assert_eq!(FileChunks::new(Cursor::new(Vec::new())).count(), 0);
    }

    #[test]
    fn body_on_the_wire_matches_content_length() {
        let payload: Vec<u8> = (0..2_000u32).map(|i| (i * 7) as u8).collect();
        let mem = store(&payload);
        let mut t = Once::replying(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\n\r\n{\"session_id\":\"1a2b3c4d\",\"bpm\":72.0,\"beats_grouped\":12}",
        );

        let report = upload(&mem, "heartbeat.wav", &ep(), &mut t, BND, Duration::from_secs(5)).unwrap();
        let wire = t.sent.borrow().clone();

        let split = wire.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        let (header, body) = wire.split_at(split);
        let req = UploadRequest::new(&ep(), "heartbeat.wav", payload.len() as u64, BND);
        assert_eq!(header, req.header_bytes());
        assert_eq!(body.len() as u64, req.content_length());
        assert_eq!(report.body_bytes_sent, req.content_length());
        assert!(body.starts_with(req.head_bytes()));
        assert!(body.ends_with(req.tail_bytes()));
        assert_eq!(&body[req.head_bytes().len()..body.len() - req.tail_bytes().len()], &payload[..]);

        assert_eq!(report.status, Some(200));
        assert!(report.is_success());
        let reply = report.reply.unwrap();
        assert_eq!(reply.session_id.as_deref(), Some("1a2b3c4d"));
        assert_eq!(reply.bpm, Some(72.0));
    }

    #[test]
    fn collector_error_reply_is_surfaced_not_failed() {
        let mem = store(b"RIFF");
        let mut t = Once::replying("HTTP/1.1 400 Bad Request\r\n\r\n{\"error\":\"Only .wav files are supported\"}");
        let report = upload(&mem, "heartbeat.wav", &ep(), &mut t, BND, Duration::from_secs(5)).unwrap();
        assert_eq!(report.status, Some(400));
        assert!(!report.is_success());
        assert!(report.is_rejected());
        assert_eq!(report.reply.unwrap().error.as_deref(), Some("Only .wav files are supported"));
    }

    #[test]
    fn missing_recording_is_storage_error() {
        let mem = MemStorage::new();
        let mut t = Once::replying("HTTP/1.1 200 OK\r\n\r\n");
        let r = upload(&mem, "heartbeat.wav", &ep(), &mut t, BND, Duration::from_secs(5));
        assert!(matches!(r, Err(Error::Storage { .. })));
        assert!(t.sent.borrow().is_empty());
    }

    #[test]
    fn refused_handshake_is_connection_error() {
        let mem = store(b"RIFF");
        let mut t = Once::replying("");
        t.refuse = true;
        let r = upload(&mem, "heartbeat.wav", &ep(), &mut t, BND, Duration::from_secs(5));
        assert!(matches!(r, Err(Error::Connection { .. })));
    }

    #[test]
    fn silent_collector_times_out_after_full_send() {
        let mem = store(&[0u8; 100]);
        let mut t = Once::replying("");
        t.silent = true;
        let r = upload(&mem, "heartbeat.wav", &ep(), &mut t, BND, Duration::from_secs(5));
        assert!(matches!(r, Err(Error::Timeout(d)) if d == Duration::from_secs(5)));
        assert!(t.sent.borrow().ends_with(format!("--{BND}--\r\n").as_bytes()));
    }

    #[test]
    fn closed_without_answer_is_connection_error() {
        let mem = store(&[0u8; 10]);
        let mut t = Once::replying("");
        let r = upload(&mem, "heartbeat.wav", &ep(), &mut t, BND, Duration::from_secs(5));
        assert!(matches!(r, Err(Error::Connection { .. })));
    }

    #[test]
    fn header_only_recording_uploads_head_header_tail() {
        let mut mem = MemStorage::new();
        let w = crate::wav::ContainerWriter::begin(
            &mut mem,
            "heartbeat.wav",
            16_000,
            0,
            crate::wav::SampleScale { midpoint: 2048, gain: 16 },
        )
        .unwrap();
        w.finish().unwrap();

        let mut t = Once::replying("HTTP/1.1 200 OK\r\n\r\n{}");
        let report = upload(&mem, "heartbeat.wav", &ep(), &mut t, BND, Duration::from_secs(5)).unwrap();

        let req = UploadRequest::new(&ep(), "heartbeat.wav", crate::wav::HEADER_LEN as u64, BND);
        let expected = (req.head_bytes().len() + crate::wav::HEADER_LEN + req.tail_bytes().len()) as u64;
        assert_eq!(req.content_length(), expected);
        assert_eq!(report.body_bytes_sent, expected);

        let wire = t.sent.borrow().clone();
        let split = wire.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        assert_eq!(wire.len() - split, expected as usize);
        assert!(wire[split..].windows(4).any(|w| w == b"RIFF"));
    }

    #[test]
    fn slow_endless_reply_is_cut_off_after_the_timeout() {
        let mem = store(&[0u8; 10]);
        let mut t = Once::replying("");
        t.trickle = Some(Duration::from_millis(20));

        let started = Instant::now();
        let report = upload(&mem, "heartbeat.wav", &ep(), &mut t, BND, Duration::from_millis(100)).unwrap();
        let took = started.elapsed();

        assert!(took < Duration::from_secs(1), "drain ran for {took:?}");
        assert!(!report.response.is_empty());
        assert!(report.response.len() < 20);
    }

    #[test]
    fn fast_endless_reply_stops_at_the_response_cap() {
        let mem = store(&[0u8; 10]);
        let mut t = Once::replying("");
        t.trickle = Some(Duration::ZERO);

        let report = upload(&mem, "heartbeat.wav", &ep(), &mut t, BND, Duration::from_secs(30)).unwrap();
        assert_eq!(report.response.len(), MAX_RESPONSE);
        assert_eq!(report.status, None);
        assert!(!report.is_rejected());
    }
}
