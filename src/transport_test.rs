use super::memory;
use super::*;
use frames::Response;
use serde_json::json;

#[tokio::test]
async fn memory_connect_publishes_a_peer_per_connection() {
    let (connector, mut peers) = memory::channel();

    let first = connector.connect().await.expect("connect");
    let second = connector.connect().await.expect("connect");
    drop((first, second));

    assert!(peers.recv().await.is_some());
    assert!(peers.recv().await.is_some());
    assert_eq!(connector.target(), "memory");
}

#[tokio::test]
async fn memory_frames_flow_both_ways() {
    let (connector, mut peers) = memory::channel();
    let Connection { sink, mut source } = connector.connect().await.expect("connect");
    let mut peer = peers.recv().await.expect("peer");

    sink.send(r#"{"id":1,"cmd":"ping","args":{}}"#.to_owned())
        .await
        .expect("send");
    let request = peer.recv_request().await.expect("request");
    assert_eq!(request.id, 1);
    assert_eq!(request.cmd, "ping");

    assert!(peer.respond(&Response::ok(1, json!("pong"))));
    let text = source.recv().await.expect("recv").expect("frame");
    let value: serde_json::Value = serde_json::from_str(&text).expect("json");
    assert_eq!(value, json!({"id": 1, "result": "pong"}));
}

#[tokio::test]
async fn memory_peer_close_ends_the_source() {
    let (connector, mut peers) = memory::channel();
    let Connection { sink: _sink, mut source } = connector.connect().await.expect("connect");
    let mut peer = peers.recv().await.expect("peer");

    peer.close();
    assert!(!peer.send_text("late"));
    assert_eq!(source.recv().await.expect("recv"), None);
}

#[tokio::test]
async fn memory_sink_close_is_idempotent_and_rejects_sends() {
    let (connector, mut peers) = memory::channel();
    let Connection { sink, source: _source } = connector.connect().await.expect("connect");
    let mut peer = peers.recv().await.expect("peer");

    sink.close().await.expect("close");
    sink.close().await.expect("second close");
    assert!(matches!(
        sink.send("x".to_owned()).await,
        Err(TransportError::Closed)
    ));
    assert_eq!(peer.recv_text().await, None);
}

#[tokio::test]
async fn memory_peer_skips_frames_that_are_not_requests() {
    let (connector, mut peers) = memory::channel();
    let Connection { sink, source: _source } = connector.connect().await.expect("connect");
    let mut peer = peers.recv().await.expect("peer");

    sink.send("garbage".to_owned()).await.expect("send");
    sink.send(r#"{"id":2,"cmd":"x"}"#.to_owned())
        .await
        .expect("send");
    let request = peer.recv_request().await.expect("request");
    assert_eq!(request.id, 2);
}

#[test]
fn ws_connector_reports_its_url() {
    let connector = WsConnector::new("ws://127.0.0.1:3333");
    assert_eq!(connector.target(), "ws://127.0.0.1:3333");
}
