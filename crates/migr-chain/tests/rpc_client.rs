//! JSON-RPC client against a canned single-response HTTP server.

use migr_chain::{Address, BlockTag, ChainClient, ChainError, JsonRpcClient};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serve exactly one request, replying with `reply` as the JSON-RPC body
/// under the request's own id.
/// Returns the URL and a handle yielding the request body that was received.
async fn serve_once(reply: Value) -> (String, tokio::task::JoinHandle<Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let body = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(split) = text.find("\r\n\r\n") {
                let content_length = text[..split]
                    .lines()
                    .find_map(|l| {
                        let lower = l.to_ascii_lowercase();
                        lower
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap())
                    })
                    .unwrap_or(0);
                if buf.len() >= split + 4 + content_length {
                    break buf[split + 4..split + 4 + content_length].to_vec();
                }
            }
            if n == 0 {
                break Vec::new();
            }
        };

        let request: Value = serde_json::from_slice(&body).unwrap();
        let mut reply = reply;
        reply["id"] = request["id"].clone();
        let payload = reply.to_string();
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            payload.len(),
            payload
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        request
    });

    (url, handle)
}

#[tokio::test]
async fn chain_id_is_decoded_from_hex_quantity() {
    let (url, server) = serve_once(json!({"jsonrpc": "2.0", "id": 1, "result": "0x5"})).await;
    let client = JsonRpcClient::new(&url).unwrap();

    assert_eq!(client.chain_id().await.unwrap(), 5);

    let request = server.await.unwrap();
    assert_eq!(request["method"], "eth_chainId");
    assert_eq!(request["jsonrpc"], "2.0");
}

#[tokio::test]
async fn revert_error_object_becomes_reverted() {
    let (url, server) = serve_once(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "error": {"code": 3, "message": "execution reverted", "data": "0x08c379a0"}
    }))
    .await;
    let client = JsonRpcClient::new(&url).unwrap();

    let err = client
        .call(Address::ZERO, Default::default())
        .await
        .unwrap_err();
    match err {
        ChainError::Reverted { data, .. } => assert_eq!(data.as_deref(), Some("0x08c379a0")),
        other => panic!("expected revert, got {other:?}"),
    }

    let request = server.await.unwrap();
    assert_eq!(request["method"], "eth_call");
}

#[tokio::test]
async fn missing_block_is_none() {
    let (url, server) = serve_once(json!({"jsonrpc": "2.0", "id": 1, "result": null})).await;
    let client = JsonRpcClient::new(&url).unwrap();

    assert!(client.block(BlockTag::Number(42)).await.unwrap().is_none());

    let request = server.await.unwrap();
    assert_eq!(request["method"], "eth_getBlockByNumber");
    assert_eq!(request["params"][0], "0x2a");
}

#[tokio::test]
async fn block_header_fields_are_parsed() {
    let hash = format!("0x{}", "11".repeat(32));
    let (url, _server) = serve_once(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": {"number": "0x10", "hash": hash, "timestamp": "0x64"}
    }))
    .await;
    let client = JsonRpcClient::new(&url).unwrap();

    let header = client.block(BlockTag::Finalized).await.unwrap().unwrap();
    assert_eq!(header.number, 16);
    assert_eq!(header.timestamp, 100);
}

#[tokio::test]
async fn node_error_object_becomes_rpc_error() {
    let (url, _server) = serve_once(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "error": {"code": -32601, "message": "the method optimism_syncStatus does not exist"}
    }))
    .await;
    let client = JsonRpcClient::new(&url).unwrap();

    let err = client
        .request::<Value>("optimism_syncStatus", json!([]))
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::Rpc { code: -32601, .. }));
}

#[tokio::test]
async fn unreachable_node_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    let client = JsonRpcClient::new(&url).unwrap();

    let err = client.chain_id().await.unwrap_err();
    assert!(matches!(err, ChainError::Transport(_)), "{err:?}");
}
