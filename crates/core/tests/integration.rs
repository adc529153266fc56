//! Integration tests: full NETCONF sessions over a live TCP socket.
//!
//! Starts the agent on a fixed port, connects with a TCP client, and walks
//! the hello exchange plus each supported operation, in both framing modes.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use netconf::{Server, ServerConfig};

const NS: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";
const SENTINEL: &[u8] = b"]]>]]>";

fn start_server(bind: &str, dir: &tempfile::TempDir) -> Server {
    let config = ServerConfig {
        datastore_path: dir.path().join("config.xml"),
        session_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    let mut server = Server::with_config(bind, config);
    server.start().expect("server start");
    server
}

fn connect(bind: &str) -> TcpStream {
    // The previous session's teardown may still hold the single-session
    // slot for a moment; retry until the hello comes through.
    for _ in 0..50 {
        let stream = TcpStream::connect(bind).expect("connect to agent");
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut first = [0u8; 1];
        match stream.peek(&mut first) {
            Ok(n) if n > 0 => return stream,
            _ => std::thread::sleep(Duration::from_millis(50)),
        }
    }
    panic!("agent never offered a session on {}", bind);
}

/// Read one end-of-message framed message, stripping the sentinel.
fn read_eom(stream: &mut TcpStream) -> String {
    let mut raw: Vec<u8> = Vec::new();
    let mut byte = [0u8; 1];
    while !raw.ends_with(SENTINEL) {
        let n = stream.read(&mut byte).expect("read framed message");
        assert!(n > 0, "connection closed mid-message: {:?}", String::from_utf8_lossy(&raw));
        raw.push(byte[0]);
    }
    raw.truncate(raw.len() - SENTINEL.len());
    String::from_utf8(raw).expect("reply is UTF-8")
}

/// Read one chunked-framed message, reassembling the chunk bodies.
fn read_chunked(stream: &mut TcpStream) -> String {
    let mut raw: Vec<u8> = Vec::new();
    let mut byte = [0u8; 1];
    while !raw.ends_with(b"\n##\n") {
        let n = stream.read(&mut byte).expect("read chunked message");
        assert!(n > 0, "connection closed mid-message");
        raw.push(byte[0]);
    }

    let mut body = Vec::new();
    let mut i = 0;
    while i < raw.len() {
        assert_eq!(raw[i], b'\n', "chunk must start with LF");
        assert_eq!(raw[i + 1], b'#', "chunk must start with LF HASH");
        i += 2;
        if raw[i] == b'#' {
            break;
        }
        let mut len = 0usize;
        while raw[i] != b'\n' {
            len = len * 10 + (raw[i] - b'0') as usize;
            i += 1;
        }
        i += 1;
        body.extend_from_slice(&raw[i..i + len]);
        i += len;
    }
    String::from_utf8(body).expect("reply is UTF-8")
}

fn send_eom(stream: &mut TcpStream, body: &str) {
    stream.write_all(body.as_bytes()).unwrap();
    stream.write_all(SENTINEL).unwrap();
    stream.flush().unwrap();
}

fn send_chunked(stream: &mut TcpStream, body: &str) {
    let frame = format!("\n#{}\n{}\n##\n", body.len(), body);
    stream.write_all(frame.as_bytes()).unwrap();
    stream.flush().unwrap();
}

fn peer_hello(capability: &str) -> String {
    format!(
        "<?xml version='1.0' encoding='UTF-8'?>\
         <hello xmlns=\"{NS}\"><capabilities>\
         <capability>urn:ietf:params:netconf:base:{capability}</capability>\
         </capabilities></hello>"
    )
}

#[test]
fn end_of_message_session_hello_and_close() {
    let dir = tempfile::tempdir().unwrap();
    let bind = "127.0.0.1:18310";
    let mut server = start_server(bind, &dir);

    let mut stream = connect(bind);

    let server_hello = read_eom(&mut stream);
    assert!(
        server_hello.contains("<hello xmlns=\"urn:ietf:params:xml:ns:netconf:base:1.0\">"),
        "greeting: {}",
        server_hello
    );
    assert!(server_hello.contains("<capability>urn:ietf:params:netconf:base:1.1</capability>"));
    assert!(server_hello.contains("<session-id>1</session-id>"));

    send_eom(&mut stream, &peer_hello("1.0"));
    send_eom(
        &mut stream,
        &format!("<rpc message-id=\"1\" xmlns=\"{NS}\"><close-session/></rpc>"),
    );

    let reply = read_eom(&mut stream);
    assert_eq!(
        reply,
        format!(
            "<?xml version='1.0' encoding='UTF-8'?>\
             <rpc-reply message-id=\"1\" xmlns=\"{NS}\"><ok/></rpc-reply>"
        )
    );

    // The agent closes the transport after the reply.
    let mut rest = Vec::new();
    assert_eq!(stream.read_to_end(&mut rest).unwrap(), 0);

    server.stop();
}

#[test]
fn chunked_session_walks_all_operations() {
    let dir = tempfile::tempdir().unwrap();
    let bind = "127.0.0.1:18311";
    let mut server = start_server(bind, &dir);

    let mut stream = connect(bind);
    read_eom(&mut stream);
    send_eom(&mut stream, &peer_hello("1.1"));

    // get-config on the empty datastore
    send_chunked(
        &mut stream,
        &format!(
            "<?xml version='1.0' encoding='UTF-8'?>\
             <rpc message-id=\"101\" xmlns=\"{NS}\">\
             <get-config><source><running/></source></get-config></rpc>"
        ),
    );
    let reply = read_chunked(&mut stream);
    assert!(reply.contains("<rpc-reply message-id=\"101\""), "{}", reply);
    assert!(reply.contains("<data></data>"));

    // copy-config with recognized elements
    send_chunked(
        &mut stream,
        &format!(
            "<rpc message-id=\"102\" xmlns=\"{NS}\"><copy-config>\
             <target><running /></target>\
             <source><config><lcd>hello world</lcd><name>Steve</name><location>here</location></config></source>\
             </copy-config></rpc>"
        ),
    );
    let reply = read_chunked(&mut stream);
    assert!(reply.contains("<ok/>"), "{}", reply);

    // the new configuration reads back verbatim
    send_chunked(
        &mut stream,
        &format!(
            "<rpc message-id=\"103\" xmlns=\"{NS}\">\
             <get-config><source><running/></source></get-config></rpc>"
        ),
    );
    let reply = read_chunked(&mut stream);
    assert!(
        reply.contains(
            "<data><lcd>hello world</lcd><name>Steve</name><location>here</location></data>"
        ),
        "{}",
        reply
    );

    // copy-config with an unrecognized element is refused
    send_chunked(
        &mut stream,
        &format!(
            "<rpc message-id=\"104\" xmlns=\"{NS}\"><copy-config>\
             <target><running /></target>\
             <source><config><lfd>hello world</lfd></config></source>\
             </copy-config></rpc>"
        ),
    );
    let reply = read_chunked(&mut stream);
    assert!(reply.contains("<error-type>rpc</error-type>"), "{}", reply);
    assert!(reply.contains("<error-tag>bad-element</error-tag>"));
    assert!(reply.contains("<error-severity>error</error-severity>"));
    assert!(reply.contains("<error-message>invalid config</error-message>"));

    // the failed replace left the configuration untouched
    send_chunked(
        &mut stream,
        &format!(
            "<rpc message-id=\"105\" xmlns=\"{NS}\">\
             <get-config><source><running/></source></get-config></rpc>"
        ),
    );
    assert!(read_chunked(&mut stream).contains("<lcd>hello world</lcd>"));

    // lock, then a second lock is denied
    let lock = format!(
        "<rpc message-id=\"106\" xmlns=\"{NS}\"><lock><target><running/></target></lock></rpc>"
    );
    send_chunked(&mut stream, &lock);
    assert!(read_chunked(&mut stream).contains("<ok/>"));

    send_chunked(&mut stream, &lock);
    let reply = read_chunked(&mut stream);
    assert!(reply.contains("<error-tag>lock-denied</error-tag>"), "{}", reply);
    assert!(reply.contains("<error-message>lock already taken</error-message>"));

    send_chunked(
        &mut stream,
        &format!(
            "<rpc message-id=\"107\" xmlns=\"{NS}\"><unlock><target><running/></target></unlock></rpc>"
        ),
    );
    assert!(read_chunked(&mut stream).contains("<ok/>"));

    // get returns the configuration plus operational state
    send_chunked(
        &mut stream,
        &format!("<rpc message-id=\"108\" xmlns=\"{NS}\"><get/></rpc>"),
    );
    let reply = read_chunked(&mut stream);
    assert!(reply.contains("<data><lcd>hello world</lcd>"), "{}", reply);
    for element in [
        "update",
        "sysUpTime",
        "globalIP",
        "packetsSent",
        "packetsReceived",
        "failSent",
        "failReceived",
        "octetsSent",
        "octetsReceived",
        "mcastSent",
        "mcastReceived",
    ] {
        assert!(reply.contains(&format!("<{}>", element)), "missing {}", element);
    }
    assert!(reply.contains("<temp unit=\"C\">N/A</temp>"));

    send_chunked(
        &mut stream,
        &format!("<rpc message-id=\"109\" xmlns=\"{NS}\"><close-session/></rpc>"),
    );
    assert!(read_chunked(&mut stream).contains("<ok/>"));

    server.stop();
}

#[test]
fn second_concurrent_connection_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let bind = "127.0.0.1:18312";
    let mut server = start_server(bind, &dir);

    let mut first = connect(bind);
    read_eom(&mut first);

    // While the first session is up, a second connect is closed without a
    // greeting.
    let mut second = TcpStream::connect(bind).expect("second connect");
    second
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let mut buf = Vec::new();
    assert_eq!(
        second.read_to_end(&mut buf).expect("second session read"),
        0,
        "second session must be closed silently"
    );

    // The first session is untouched.
    send_eom(&mut first, &peer_hello("1.0"));
    send_eom(
        &mut first,
        &format!("<rpc message-id=\"1\" xmlns=\"{NS}\"><close-session/></rpc>"),
    );
    assert!(read_eom(&mut first).contains("<ok/>"));

    server.stop();
}

#[test]
fn configuration_persists_across_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let bind = "127.0.0.1:18313";
    let mut server = start_server(bind, &dir);

    let mut stream = connect(bind);
    read_eom(&mut stream);
    send_eom(&mut stream, &peer_hello("1.0"));
    send_eom(
        &mut stream,
        &format!(
            "<rpc message-id=\"1\" xmlns=\"{NS}\"><copy-config>\
             <target><running/></target>\
             <source><config><name>Steve</name></config></source>\
             </copy-config></rpc>"
        ),
    );
    assert!(read_eom(&mut stream).contains("<ok/>"));
    send_eom(
        &mut stream,
        &format!("<rpc message-id=\"2\" xmlns=\"{NS}\"><close-session/></rpc>"),
    );
    read_eom(&mut stream);
    drop(stream);

    // A fresh session still sees the configuration written by the first.
    let mut stream = connect(bind);
    read_eom(&mut stream);
    send_eom(&mut stream, &peer_hello("1.0"));
    send_eom(
        &mut stream,
        &format!(
            "<rpc message-id=\"3\" xmlns=\"{NS}\">\
             <get-config><source><running/></source></get-config></rpc>"
        ),
    );
    let reply = read_eom(&mut stream);
    assert!(
        reply.contains("<data><name>Steve</name></data>"),
        "config lost between sessions: {}",
        reply
    );

    server.stop();
}

#[test]
fn lcd_configuration_reaches_the_device() {
    use netconf::StubDevice;

    let dir = tempfile::tempdir().unwrap();
    let bind = "127.0.0.1:18314";
    let device = Arc::new(StubDevice::new());
    let config = ServerConfig {
        datastore_path: dir.path().join("config.xml"),
        session_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    let mut server = Server::with_device(bind, config, device.clone());
    server.start().expect("server start");

    let mut stream = connect(bind);
    read_eom(&mut stream);
    send_eom(&mut stream, &peer_hello("1.0"));
    send_eom(
        &mut stream,
        &format!(
            "<rpc message-id=\"1\" xmlns=\"{NS}\"><copy-config>\
             <target><running/></target>\
             <source><config><lcd>hello world</lcd></config></source>\
             </copy-config></rpc>"
        ),
    );
    assert!(read_eom(&mut stream).contains("<ok/>"));
    assert_eq!(device.last_text().as_deref(), Some("hello world"));

    server.stop();
}
