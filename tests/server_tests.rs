//! End-to-end coverage of the event loop over real sockets. Each scenario
//! binds a `Server` to an ephemeral port on a background thread, then
//! drives it with a raw `TcpStream`.

use liso::config::Config;
use liso::server::Server;
use std::fs;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

struct TestServer {
    addr: SocketAddr,
    _root: PathBuf,
}

fn spawn_server(cgi_script: Option<&str>) -> TestServer {
    let root = std::env::temp_dir().join(format!(
        "liso-server-test-{}-{}",
        std::process::id(),
        fastrand_token()
    ));
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("index.html"), b"hello").unwrap();

    let cgi_path = root.join("cgi-bin.sh");
    fs::write(&cgi_path, cgi_script.unwrap_or(DEFAULT_CGI_SCRIPT)).unwrap();
    let mut perms = fs::metadata(&cgi_path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&cgi_path, perms).unwrap();

    let args: Vec<String> = vec![
        "0".into(),
        root.join("log").display().to_string(),
        root.join("lock").display().to_string(),
        root.display().to_string(),
        cgi_path.display().to_string(),
    ];
    let config = Config::parse_args(&args).unwrap();
    let mut server = Server::bind(config).unwrap();
    let addr = server.local_http_addr().unwrap();

    std::thread::spawn(move || {
        let _ = server.run();
    });

    TestServer { addr, _root: root }
}

const DEFAULT_CGI_SCRIPT: &str = "#!/bin/sh\n\
    printf 'HTTP/1.1 200 OK\\r\\nContent-Type: text/plain\\r\\nContent-Length: 5\\r\\nConnection: keep-alive\\r\\n\\r\\nhowdy'\n";

fn fastrand_token() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish()
}

fn connect(server: &TestServer) -> TcpStream {
    let stream = TcpStream::connect(server.addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    stream
}

fn read_available(stream: &mut TcpStream) -> Vec<u8> {
    let mut buf = vec![0u8; 65536];
    let mut out = Vec::new();
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                out.extend_from_slice(&buf[..n]);
                if n < buf.len() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => break,
            Err(e) => panic!("read failed: {e}"),
        }
    }
    out
}

// S1: a simple GET gets a 200 and the connection stays open for a second request.
#[test]
fn s1_simple_get_is_200_and_keeps_the_connection_alive() {
    let server = spawn_server(None);
    let mut stream = connect(&server);

    stream.write_all(b"GET /index.html HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
    let resp = read_available(&mut stream);
    let text = String::from_utf8_lossy(&resp);
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.ends_with("hello"));
    assert!(text.contains("Connection: keep-alive"));

    // The socket should still accept a second request on the same connection.
    stream.write_all(b"GET /index.html HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
    let resp2 = read_available(&mut stream);
    assert!(String::from_utf8_lossy(&resp2).starts_with("HTTP/1.1 200 OK\r\n"));
}

// S2: two pipelined GETs arriving in a single write both get answered.
#[test]
fn s2_pipelined_requests_both_get_answered() {
    let server = spawn_server(None);
    let mut stream = connect(&server);

    stream
        .write_all(
            b"GET /index.html HTTP/1.1\r\n\r\nGET /index.html HTTP/1.1\r\nConnection: close\r\n\r\n",
        )
        .unwrap();
    let resp = read_available(&mut stream);
    let count = resp.windows(b"HTTP/1.1 200 OK".len()).filter(|w| *w == b"HTTP/1.1 200 OK").count();
    assert_eq!(count, 2, "both pipelined requests should have been answered");
}

// S3: a missing file is a 404 and the connection closes.
#[test]
fn s3_missing_file_is_404_and_closes() {
    let server = spawn_server(None);
    let mut stream = connect(&server);

    stream.write_all(b"GET /nope.html HTTP/1.1\r\n\r\n").unwrap();
    let resp = read_available(&mut stream);
    assert!(String::from_utf8_lossy(&resp).starts_with("HTTP/1.1 404 Not Found\r\n"));

    // Connection should now be closed server-side.
    let mut probe = [0u8; 1];
    let n = stream.read(&mut probe).unwrap_or(0);
    assert_eq!(n, 0);
}

// S4: a POST with a negative Content-Length is 411 and closes.
#[test]
fn s4_negative_content_length_is_411() {
    let server = spawn_server(None);
    let mut stream = connect(&server);

    stream
        .write_all(b"POST /submit HTTP/1.1\r\nContent-Length: -1\r\n\r\n")
        .unwrap();
    let resp = read_available(&mut stream);
    assert!(String::from_utf8_lossy(&resp).starts_with("HTTP/1.1 411 Length Required\r\n"));
}

// S5: an HTTP/1.0 request line is 505 and closes.
#[test]
fn s5_http_1_0_is_505() {
    let server = spawn_server(None);
    let mut stream = connect(&server);

    stream.write_all(b"GET /index.html HTTP/1.0\r\n\r\n").unwrap();
    let resp = read_available(&mut stream);
    assert!(String::from_utf8_lossy(&resp).starts_with("HTTP/1.1 505 HTTP Version Not Supported\r\n"));
}

// S6: an explicit Connection: close still serves the request before closing.
#[test]
fn s6_connection_close_header_closes_after_one_response() {
    let server = spawn_server(None);
    let mut stream = connect(&server);

    stream
        .write_all(b"GET /index.html HTTP/1.1\r\nConnection: close\r\n\r\n")
        .unwrap();
    let resp = read_available(&mut stream);
    let text = String::from_utf8_lossy(&resp);
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("Connection: close"));

    let mut probe = [0u8; 1];
    let n = stream.read(&mut probe).unwrap_or(0);
    assert_eq!(n, 0);
}

// CGI dispatch end to end: a POST is bridged to the script and its whole
// response is forwarded back verbatim.
#[test]
fn cgi_post_is_bridged_and_forwarded_verbatim() {
    let server = spawn_server(None);
    let mut stream = connect(&server);

    let body = b"field=value";
    let request = format!(
        "POST /cgi-bin.sh HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    stream.write_all(request.as_bytes()).unwrap();
    stream.write_all(body).unwrap();

    let resp = read_available(&mut stream);
    let text = String::from_utf8_lossy(&resp);
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.ends_with("howdy"));
}

// A POST to anything other than the configured CGI script never spawns a
// child: it gets a bare 200 with no body, and the connection stays open.
#[test]
fn post_to_a_non_cgi_target_is_a_bare_200_with_no_body() {
    let server = spawn_server(None);
    let mut stream = connect(&server);

    let body = b"field=value";
    let request = format!(
        "POST /submit HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    stream.write_all(request.as_bytes()).unwrap();
    stream.write_all(body).unwrap();

    let resp = read_available(&mut stream);
    let text = String::from_utf8_lossy(&resp);
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("Content-Length: 0"));
    assert!(text.ends_with("\r\n\r\n"));

    // Still keep-alive: a second request on the same socket is answered.
    stream.write_all(b"GET /index.html HTTP/1.1\r\n\r\n").unwrap();
    let resp2 = read_available(&mut stream);
    assert!(String::from_utf8_lossy(&resp2).starts_with("HTTP/1.1 200 OK\r\n"));
}
