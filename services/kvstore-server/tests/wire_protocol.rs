//! Black-box tests driving a live server over loopback TCP, mirroring the
//! six scenarios spec.md §8 lists.

use std::net::SocketAddr;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::sleep;

struct ServerGuard {
    child: Child,
    port: u16,
}

impl Drop for ServerGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn spawn_server(port: u16) -> ServerGuard {
    let child = Command::new(env!("CARGO_BIN_EXE_kvstore-server"))
        .args(["--port", &port.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn kvstore-server binary");
    ServerGuard { child, port }
}

async fn connect(port: u16) -> TcpStream {
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    for _ in 0..50 {
        if let Ok(stream) = TcpStream::connect(addr).await {
            return stream;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("server never came up on port {port}");
}

async fn send(stream: &mut TcpStream, bytes: &[u8]) {
    stream.write_all(bytes).await.unwrap();
}

async fn read_n(stream: &mut TcpStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    stream.read_exact(&mut buf).await.unwrap();
    buf
}

#[tokio::test]
async fn scenario_1_ping_pong() {
    let guard = spawn_server(39001);
    let mut stream = connect(guard.port).await;
    send(&mut stream, b"*1\r\n$4\r\nPING\r\n").await;
    assert_eq!(read_n(&mut stream, 7).await, b"+PONG\r\n");
}

#[tokio::test]
async fn scenario_2_set_then_get() {
    let guard = spawn_server(39002);
    let mut stream = connect(guard.port).await;
    send(&mut stream, b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n").await;
    assert_eq!(read_n(&mut stream, 5).await, b"+OK\r\n");
    send(&mut stream, b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n").await;
    assert_eq!(read_n(&mut stream, 9).await, b"$3\r\nbar\r\n");
}

#[tokio::test]
async fn scenario_3_px_expiry() {
    let guard = spawn_server(39003);
    let mut stream = connect(guard.port).await;
    send(&mut stream, b"*5\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n$2\r\nPX\r\n$2\r\n50\r\n").await;
    assert_eq!(read_n(&mut stream, 5).await, b"+OK\r\n");

    sleep(Duration::from_millis(100)).await;

    send(&mut stream, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n").await;
    assert_eq!(read_n(&mut stream, 5).await, b"$-1\r\n");

    send(&mut stream, b"*2\r\n$6\r\nEXISTS\r\n$1\r\nk\r\n").await;
    assert_eq!(read_n(&mut stream, 4).await, b":0\r\n");
}

#[tokio::test]
async fn scenario_4_exists_counts_present_keys() {
    let guard = spawn_server(39004);
    let mut stream = connect(guard.port).await;
    send(&mut stream, b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n").await;
    read_n(&mut stream, 5).await;
    send(&mut stream, b"*3\r\n$3\r\nSET\r\n$1\r\nc\r\n$1\r\n1\r\n").await;
    read_n(&mut stream, 5).await;

    send(
        &mut stream,
        b"*4\r\n$6\r\nEXISTS\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n",
    )
    .await;
    assert_eq!(read_n(&mut stream, 4).await, b":2\r\n");
}

#[tokio::test]
async fn scenario_5_subscribe_then_publish() {
    let guard = spawn_server(39005);
    let mut subscriber = connect(guard.port).await;
    let mut publisher = connect(guard.port).await;

    send(&mut subscriber, b"*2\r\n$9\r\nSUBSCRIBE\r\n$4\r\nnews\r\n").await;
    let expected_ack = b"*3\r\n$9\r\nsubscribe\r\n$4\r\nnews\r\n:1\r\n";
    let ack = read_n(&mut subscriber, expected_ack.len()).await;
    assert_eq!(ack, expected_ack.as_slice());

    send(
        &mut publisher,
        b"*3\r\n$7\r\nPUBLISH\r\n$4\r\nnews\r\n$5\r\nhello\r\n",
    )
    .await;
    assert_eq!(read_n(&mut publisher, 4).await, b":1\r\n");

    let expected_message = b"*3\r\n$7\r\nmessage\r\n$4\r\nnews\r\n$5\r\nhello\r\n";
    let message = read_n(&mut subscriber, expected_message.len()).await;
    assert_eq!(message, expected_message.as_slice());
}

#[tokio::test]
async fn scenario_6_del_counts_only_present_keys() {
    let guard = spawn_server(39006);
    let mut stream = connect(guard.port).await;
    send(&mut stream, b"*3\r\n$3\r\nSET\r\n$1\r\ny\r\n$1\r\n1\r\n").await;
    read_n(&mut stream, 5).await;

    send(
        &mut stream,
        b"*4\r\n$3\r\nDEL\r\n$1\r\nx\r\n$1\r\ny\r\n$1\r\nz\r\n",
    )
    .await;
    assert_eq!(read_n(&mut stream, 4).await, b":1\r\n");
}

#[tokio::test]
async fn many_concurrent_connections_observe_their_own_writes() {
    let guard = spawn_server(39007);
    let mut handles = Vec::new();
    for _ in 0..100 {
        let port = guard.port;
        handles.push(tokio::spawn(async move {
            let mut stream = connect(port).await;
            send(&mut stream, b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n").await;
            assert_eq!(read_n(&mut stream, 5).await, b"+OK\r\n");
            send(&mut stream, b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n").await;
            assert_eq!(read_n(&mut stream, 9).await, b"$3\r\nbar\r\n");
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
}
