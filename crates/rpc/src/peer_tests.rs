// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::auth;
use tokio::net::TcpListener;

/// Minimal scripted server: handshake, then answer every call with its
/// method name, optionally delaying calls whose method starts with "slow".
async fn scripted_server(required_key: Option<AuthKey>) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            let required_key = required_key.clone();
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.into_split();
                let nonce = auth::fresh_nonce();
                let challenge = auth::Challenge { nonce: nonce.clone() };
                wire::write_frame(&mut writer, &wire::encode(&challenge).unwrap())
                    .await
                    .unwrap();
                let hello: auth::Hello =
                    wire::decode(&wire::read_frame(&mut reader).await.unwrap()).unwrap();
                let ok = match (&required_key, &hello.proof) {
                    (Some(key), Some(proof)) => auth::verify_proof(key, &nonce, proof),
                    (Some(_), None) => false,
                    (None, _) => true,
                };
                let welcome = auth::Welcome {
                    ok,
                    detail: (!ok).then(|| "bad proof".to_string()),
                };
                wire::write_frame(&mut writer, &wire::encode(&welcome).unwrap())
                    .await
                    .unwrap();
                if !ok {
                    return;
                }
                let writer = std::sync::Arc::new(tokio::sync::Mutex::new(writer));
                loop {
                    let frame = match wire::read_frame(&mut reader).await {
                        Ok(frame) => frame,
                        Err(_) => return,
                    };
                    let msg: RpcMessage = wire::decode(&frame).unwrap();
                    if let RpcMessage::Call {
                        call_id, method, ..
                    } = msg
                    {
                        let writer = std::sync::Arc::clone(&writer);
                        tokio::spawn(async move {
                            if method.starts_with("slow") {
                                tokio::time::sleep(Duration::from_millis(100)).await;
                            }
                            let reply = RpcMessage::Reply {
                                call_id,
                                result: Some(Value::from(method.as_str())),
                                error: None,
                            };
                            let mut writer = writer.lock().await;
                            let _ = wire::write_frame(
                                &mut *writer,
                                &wire::encode(&reply).unwrap(),
                            )
                            .await;
                        });
                    }
                }
            });
        }
    });
    addr
}

#[tokio::test]
async fn unauthenticated_call_roundtrip() {
    let addr = scripted_server(None).await;
    let peer = Peer::connect(&addr.to_string(), PeerConfig::default())
        .await
        .unwrap();
    let result = peer
        .call("ping", vec![], BTreeMap::new(), None, None)
        .await
        .unwrap();
    assert_eq!(result, Value::from("ping"));
}

#[tokio::test]
async fn authenticated_handshake_succeeds_with_key() {
    let key = AuthKey::new("agent-key");
    let addr = scripted_server(Some(key.clone())).await;
    let peer = Peer::connect(
        &addr.to_string(),
        PeerConfig {
            auth_key: Some(key),
            ..PeerConfig::default()
        },
    )
    .await
    .unwrap();
    let result = peer
        .call("ping", vec![], BTreeMap::new(), None, None)
        .await
        .unwrap();
    assert_eq!(result, Value::from("ping"));
}

#[tokio::test]
async fn wrong_key_is_rejected() {
    let addr = scripted_server(Some(AuthKey::new("right-key"))).await;
    let err = Peer::connect(
        &addr.to_string(),
        PeerConfig {
            auth_key: Some(AuthKey::new("wrong-key")),
            ..PeerConfig::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, PeerError::AuthRejected(_)));
}

#[tokio::test]
async fn missing_proof_is_rejected_when_key_registered() {
    let addr = scripted_server(Some(AuthKey::new("right-key"))).await;
    let err = Peer::connect(&addr.to_string(), PeerConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PeerError::AuthRejected(_)));
}

#[tokio::test]
async fn same_order_key_serialises_calls() {
    let addr = scripted_server(None).await;
    let peer = Peer::connect(&addr.to_string(), PeerConfig::default())
        .await
        .unwrap();

    // A slow call holding the order key delays the fast one behind it.
    let slow = {
        let peer = peer.clone();
        tokio::spawn(async move {
            peer.call("slow-op", vec![], BTreeMap::new(), Some("kernel-1"), None)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let start = std::time::Instant::now();
    peer.call("fast-op", vec![], BTreeMap::new(), Some("kernel-1"), None)
        .await
        .unwrap();
    assert!(
        start.elapsed() >= Duration::from_millis(50),
        "ordered call was not serialised"
    );
    slow.await.unwrap().unwrap();
}

#[tokio::test]
async fn different_order_keys_run_concurrently() {
    let addr = scripted_server(None).await;
    let peer = Peer::connect(&addr.to_string(), PeerConfig::default())
        .await
        .unwrap();

    let slow = {
        let peer = peer.clone();
        tokio::spawn(async move {
            peer.call("slow-op", vec![], BTreeMap::new(), Some("kernel-1"), None)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let start = std::time::Instant::now();
    peer.call("fast-op", vec![], BTreeMap::new(), Some("kernel-2"), None)
        .await
        .unwrap();
    assert!(
        start.elapsed() < Duration::from_millis(80),
        "independent keys must not serialise"
    );
    slow.await.unwrap().unwrap();
}

#[tokio::test]
async fn call_timeout_fires() {
    let addr = scripted_server(None).await;
    let peer = Peer::connect(&addr.to_string(), PeerConfig::default())
        .await
        .unwrap();
    let err = peer
        .call(
            "slow-op",
            vec![],
            BTreeMap::new(),
            None,
            Some(Duration::from_millis(20)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PeerError::Timeout(_)));
}
