/*
 * server_integration.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * Wire-level integration tests for the Portinaio server. Each test starts a
 * real server on a loopback port, speaks raw HTTP/1.x over a TcpStream, and
 * checks the exact bytes on the wire.
 *
 * Run with:
 *   cargo test -p portinaio_core --test server_integration
 */

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use portinaio_core::{
    Content, Hook, HttpError, Request, Response, Server, ServerConfig,
};

async fn start(configure: impl FnOnce(&Server)) -> (Server, SocketAddr) {
    let mut server = Server::new(ServerConfig::on_port(0));
    configure(&server);
    server.start().await.expect("bind failed");
    let addr = server.local_addr().unwrap();
    (server, addr)
}

/// Send one request and collect the whole reply (connection closed by
/// either side).
async fn roundtrip(addr: SocketAddr, wire: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(wire).await.unwrap();
    stream.shutdown().await.unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    out
}

fn split(wire: &[u8]) -> (String, Vec<u8>) {
    let pos = wire
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("missing header terminator");
    (
        String::from_utf8_lossy(&wire[..pos + 2]).into_owned(),
        wire[pos + 4..].to_vec(),
    )
}

fn header<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines().find_map(|l| {
        let (n, v) = l.split_once(':')?;
        n.eq_ignore_ascii_case(name).then(|| v.trim())
    })
}

/// Echo hook: prints GET fields, POST fields, and file uploads.
fn echo(req: &mut Request) -> Result<Option<Response>, HttpError> {
    let mut out = String::from("GET:\n");
    for (name, values) in req.get_fields().clone().iter() {
        out.push_str(&format_line(name, values));
    }
    if !req.post_fields().is_empty() {
        out.push_str("POST:\n");
        for (name, values) in req.post_fields().iter() {
            out.push_str(&format_line(name, values));
        }
    }
    let uploads: Vec<String> = req
        .file_uploads()
        .map(|(name, u)| format!("{} => {}\n", name, u.filename))
        .collect();
    if !uploads.is_empty() {
        out.push_str("FILES:\n");
        for line in uploads {
            out.push_str(&line);
        }
    }
    Ok(Some(Response::text(out)))
}

fn format_line(name: &str, values: &[String]) -> String {
    let quoted: Vec<String> = values.iter().map(|v| format!("{:?}", v)).collect();
    format!("{} => [{}]\n", name, quoted.join(", "))
}

/// 64 KiB resource where byte i is i mod 256.
fn pattern_64k() -> Vec<u8> {
    (0..65536usize).map(|i| (i % 256) as u8).collect()
}

#[tokio::test]
async fn scenario_404_without_hooks() {
    let (mut server, addr) = start(|_| {}).await;
    let wire = roundtrip(addr, b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    let (head, body) = split(&wire);
    assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert_eq!(
        header(&head, "Content-Type"),
        Some("text/html; charset=utf-8")
    );
    assert_eq!(header(&head, "Connection"), Some("close"));
    assert!(String::from_utf8_lossy(&body).contains("404"));
    server.stop(false).await;
}

#[tokio::test]
async fn scenario_get_echo() {
    let (mut server, addr) = start(|s| {
        s.add_hook(Hook::new(echo).path("/static")).unwrap();
    })
    .await;
    let wire = roundtrip(
        addr,
        b"GET /static?x=y&z=%20&zig=%3D%3d HTTP/1.1\r\nHost: localhost\r\n\r\n",
    )
    .await;
    let (head, body) = split(&wire);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(
        header(&head, "Content-Type"),
        Some("text/plain; charset=utf-8")
    );
    assert_eq!(header(&head, "Content-Length"), Some("41"));
    assert_eq!(
        String::from_utf8_lossy(&body),
        "GET:\nx => [\"y\"]\nz => [\" \"]\nzig => [\"==\"]\n"
    );
    server.stop(false).await;
}

#[tokio::test]
async fn scenario_single_range() {
    let (mut server, addr) = start(|s| {
        s.add_hook(
            Hook::new(|_req: &mut Request| {
                Ok(Some(Response::bytes(
                    "application/octet-stream",
                    pattern_64k(),
                )))
            })
            .path("/64kfile"),
        )
        .unwrap();
    })
    .await;
    let wire = roundtrip(
        addr,
        b"GET /64kfile HTTP/1.1\r\nHost: localhost\r\nRange: bytes=23459-38274\r\n\r\n",
    )
    .await;
    let (head, body) = split(&wire);
    assert!(head.starts_with("HTTP/1.1 206 Partial Content\r\n"));
    assert_eq!(
        header(&head, "Content-Range"),
        Some("bytes 23459-38274/65536")
    );
    assert_eq!(header(&head, "Content-Length"), Some("14816"));
    assert_eq!(body.len(), 14816);
    for (i, &b) in body.iter().enumerate() {
        assert_eq!(b as usize, (163 + i) % 256, "byte {}", i);
    }
    server.stop(false).await;
}

#[tokio::test]
async fn scenario_multipart_byteranges() {
    let (mut server, addr) = start(|s| {
        s.add_hook(
            Hook::new(|_req: &mut Request| {
                Ok(Some(Response::bytes(
                    "application/octet-stream",
                    pattern_64k(),
                )))
            })
            .path("/64kfile"),
        )
        .unwrap();
    })
    .await;
    let wire = roundtrip(
        addr,
        b"GET /64kfile HTTP/1.1\r\nHost: localhost\r\nRange: bytes=65-65,67-67\r\n\r\n",
    )
    .await;
    let (head, body) = split(&wire);
    assert!(head.starts_with("HTTP/1.1 206 Partial Content\r\n"));
    let boundary = header(&head, "Content-Type")
        .and_then(|ct| ct.strip_prefix("multipart/byteranges; boundary="))
        .expect("byteranges content type");
    let expected = format!(
        "--{b}\r\nContent-Range: bytes 65-65/65536\r\n\r\nA\r\n\
         --{b}\r\nContent-Range: bytes 67-67/65536\r\n\r\nC\r\n--{b}--\r\n",
        b = boundary
    );
    assert_eq!(String::from_utf8_lossy(&body), expected);
    assert_eq!(
        header(&head, "Content-Length").unwrap(),
        expected.len().to_string()
    );
    server.stop(false).await;
}

#[tokio::test]
async fn scenario_urlencoded_post() {
    let (mut server, addr) = start(|s| {
        s.add_hook(Hook::new(echo).path("/static")).unwrap();
    })
    .await;
    let body = b"x=y&z=%20&zig=%3D%3d&a[]=1&a%5B%5D=2&%61%5b%5d=3";
    assert_eq!(body.len(), 48);
    let mut wire = format!(
        "POST /static HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\n\
         Content-Type: application/x-www-form-urlencoded\r\n\r\n",
        body.len()
    )
    .into_bytes();
    wire.extend_from_slice(body);
    let reply = roundtrip(addr, &wire).await;
    let (head, reply_body) = split(&reply);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    let text = String::from_utf8_lossy(&reply_body);
    assert!(
        text.contains("a[] => [\"1\", \"2\", \"3\"]"),
        "body was: {}",
        text
    );
    server.stop(false).await;
}

#[tokio::test]
async fn scenario_keep_alive_chunked_and_gentle_stop() {
    let (mut server, addr) = start(|s| {
        s.add_hook(Hook::new(|_req: &mut Request| {
            let mut r = Response::new(200);
            r.headers.content_type = Some("text/plain; charset=utf-8".to_string());
            r.content = Content::dynamic(
                (0..4).map(|i| format!("lazy chunk {}\n", i).into_bytes()),
            );
            Ok(Some(r))
        }))
        .unwrap();
    })
    .await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    for _ in 0..3 {
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        // Read until the chunked terminator.
        let mut collected = Vec::new();
        let mut tmp = vec![0u8; 4096];
        while !collected
            .windows(5)
            .any(|w| w == b"0\r\n\r\n")
        {
            let n = stream.read(&mut tmp).await.unwrap();
            assert!(n > 0, "server closed early");
            collected.extend_from_slice(&tmp[..n]);
        }
        let (head, _) = split(&collected);
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(header(&head, "Transfer-Encoding"), Some("chunked"));
        assert_eq!(header(&head, "Connection"), Some("keep-alive"));
        assert_eq!(header(&head, "Content-Length"), None);
    }

    let begin = Instant::now();
    server.stop(false).await;
    assert!(
        begin.elapsed() <= Duration::from_secs(1),
        "gentle stop took {:?}",
        begin.elapsed()
    );
    let stats = server.stats();
    assert_eq!(stats.active_handlers, 0);
    assert_eq!(stats.keep_alive_handlers, 0);
}

#[tokio::test]
async fn multipart_upload_spills_and_cleans_up() {
    let temp = tempfile::tempdir().unwrap();
    let mut config = ServerConfig::on_port(0);
    config.temp_dir = temp.path().to_path_buf();
    config.store_file_upload_in_file_at_size = 64;

    let mut server = Server::new(config);
    server
        .add_hook(Hook::new(|req: &mut Request| {
            let upload = req.file_upload("doc").expect("upload present");
            assert_eq!(upload.filename, "d.bin");
            assert_eq!(upload.read_all().unwrap(), vec![b'x'; 500]);
            let location = upload
                .disk_path()
                .expect("upload beyond threshold should be on disk")
                .display()
                .to_string();
            Ok(Some(Response::text(location)))
        }))
        .unwrap();
    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();

    let mut body = Vec::new();
    body.extend_from_slice(b"--sep\r\n");
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"doc\"; filename=\"d.bin\"\r\n\r\n",
    );
    body.extend_from_slice(&vec![b'x'; 500]);
    body.extend_from_slice(b"\r\n--sep--\r\n");
    let mut wire = format!(
        "POST /up HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\n\
         Content-Type: multipart/form-data; boundary=sep\r\n\r\n",
        body.len()
    )
    .into_bytes();
    wire.extend_from_slice(&body);

    let reply = roundtrip(addr, &wire).await;
    let (head, reply_body) = split(&reply);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    let temp_path = String::from_utf8_lossy(&reply_body).into_owned();

    // The temp file is removed by the cleanup callback once the response
    // has been written.
    let mut gone = false;
    for _ in 0..50 {
        if !std::path::Path::new(&temp_path).exists() {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(gone, "temp file {} should be deleted", temp_path);
    server.stop(false).await;
}

#[tokio::test]
async fn http10_closes_by_default() {
    let (mut server, addr) = start(|s| {
        s.add_hook(Hook::new(echo)).unwrap();
    })
    .await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.0\r\n\r\n")
        .await
        .unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    let (head, _) = split(&out);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(header(&head, "Connection"), Some("close"));
    server.stop(false).await;
}

#[tokio::test]
async fn brutal_stop_interrupts_idle_connections() {
    let (mut server, addr) = start(|s| {
        s.add_hook(Hook::new(echo)).unwrap();
    })
    .await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: h\r\n\r\n")
        .await
        .unwrap();
    let mut tmp = vec![0u8; 4096];
    let n = stream.read(&mut tmp).await.unwrap();
    assert!(n > 0);

    let begin = Instant::now();
    server.stop(true).await;
    assert!(begin.elapsed() <= Duration::from_secs(1));
    let stats = server.stats();
    assert_eq!(stats.active_handlers, 0);
    assert_eq!(stats.keep_alive_handlers, 0);
}
