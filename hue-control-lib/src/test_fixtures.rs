//! Local network responders used by the tests.
//!
//! Everything binds to `127.0.0.1` on an ephemeral port, so tests can talk to real
//! sockets without touching the actual network.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::Client;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;

/// Answers the first datagram it receives with each of `replies`, then returns the
/// request text.
pub(crate) async fn udp_responder(replies: Vec<&'static str>) -> (SocketAddr, JoinHandle<String>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let mut buffer = [0u8; 2048];
        let (n, source) = socket.recv_from(&mut buffer).await.unwrap();
        for reply in replies {
            socket.send_to(reply.as_bytes(), source).await.unwrap();
        }
        String::from_utf8_lossy(&buffer[..n]).into_owned()
    });
    (addr, handle)
}

/// A bound UDP socket that never answers.
pub(crate) async fn silent_udp() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").await.unwrap()
}

/// A canned HTTP response.
#[derive(Clone)]
pub(crate) struct Canned {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl Canned {
    pub fn json(body: impl Into<String>) -> Self {
        Canned {
            status: 200,
            content_type: "application/json",
            body: body.into(),
        }
    }

    pub fn xml(body: impl Into<String>) -> Self {
        Canned {
            status: 200,
            content_type: "text/xml",
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Canned {
            status,
            content_type: "text/plain",
            body: String::new(),
        }
    }
}

/// A tiny HTTP/1.1 server answering every request with the same canned response.
///
/// Requests (head and body) are recorded before the response is written. The server task is
/// aborted when the responder is dropped.
pub(crate) struct HttpResponder {
    pub addr: SocketAddr,
    pub requests: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl HttpResponder {
    pub async fn start(canned: Canned) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let canned = canned.clone();
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    serve_one(stream, &canned, &recorded).await;
                });
            }
        });
        HttpResponder {
            addr,
            requests,
            task,
        }
    }

    /// `127.0.0.1:<port>`, usable wherever a bridge address is expected.
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub fn recorded(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for HttpResponder {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_one(
    mut stream: TcpStream,
    canned: &Canned,
    recorded: &Mutex<Vec<String>>,
) -> Option<()> {
    let mut data = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        data.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_head_end(&data) {
            break pos;
        }
    };
    let head = String::from_utf8_lossy(&data[..head_end]).into_owned();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while data.len() < head_end + 4 + content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&chunk[..n]);
    }
    recorded
        .lock()
        .unwrap()
        .push(String::from_utf8_lossy(&data).into_owned());

    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        canned.status,
        reason(canned.status),
        canned.content_type,
        canned.body.len(),
        canned.body
    );
    stream.write_all(response.as_bytes()).await.ok()?;
    stream.shutdown().await.ok()
}

fn find_head_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|window| window == b"\r\n\r\n")
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// An HTTP client that ignores any proxy configured in the environment.
pub(crate) fn test_client() -> Client {
    Client::builder().no_proxy().build().unwrap()
}

/// Polls `condition` every 10 ms for up to two seconds.
pub(crate) async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// A trimmed-down `description.xml` as served by a bridge.
pub(crate) fn bridge_description(serial: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" ?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <specVersion>
    <major>1</major>
    <minor>0</minor>
  </specVersion>
  <URLBase>http://192.168.1.50:80/</URLBase>
  <device>
    <deviceType>urn:schemas-upnp-org:device:Basic:1</deviceType>
    <friendlyName>Philips hue (192.168.1.50)</friendlyName>
    <manufacturer>Royal Philips Electronics</manufacturer>
    <modelName>Philips hue bridge 2015</modelName>
    <modelNumber>BSB002</modelNumber>
    <serialNumber> {serial} </serialNumber>
    <UDN>uuid:2f402f80-da50-11e1-9b23-001788100491</UDN>
    <iconList>
      <icon>
        <mimetype>image/png</mimetype>
        <url>hue_logo_0.png</url>
      </icon>
      <icon>
        <mimetype>image/png</mimetype>
        <url>hue_logo_3.png</url>
      </icon>
    </iconList>
  </device>
</root>"#
    )
}

/// Routes `log` output through the test harness; `RUST_LOG=debug` shows the race.
pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
