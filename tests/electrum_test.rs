//! Gateway behavior against a local fake Electrum server.

use serde_json::{json, Value};
use std::net::SocketAddr;
use tapwallet::electrum::{ChainSource, ElectrumClient};
use tapwallet::types::{ElectrumConfig, PersistenceConfig, Protocol};
use tapwallet::{Address, Network, WalletError};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

/// Spawn a one-connection line server. For every request the handler
/// returns zero or more raw frames to write back.
async fn spawn_server<F>(mut handler: F) -> SocketAddr
where
    F: FnMut(u64, &str, &Value) -> Vec<String> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let request: Value = serde_json::from_str(&line).unwrap();
            let id = request["id"].as_u64().unwrap();
            let method = request["method"].as_str().unwrap().to_string();
            for frame in handler(id, &method, &request["params"]) {
                write_half.write_all(frame.as_bytes()).await.unwrap();
                write_half.write_all(b"\n").await.unwrap();
            }
        }
    });
    addr
}

fn config_for(addr: SocketAddr) -> ElectrumConfig {
    ElectrumConfig {
        host: "127.0.0.1".to_string(),
        port: addr.port(),
        network: Network::Regtest,
        protocol: Protocol::Tcp,
        persistence: PersistenceConfig {
            retry_period_ms: 10,
            max_retry: 1,
            ping_period_ms: 120_000,
        },
        request_timeout_ms: 500,
    }
}

fn version_reply(id: u64) -> String {
    json!({"id": id, "result": ["fake electrum", "1.4"]}).to_string()
}

fn test_address() -> Address {
    Address::p2tr([0x11; 32], Network::Regtest)
}

#[tokio::test]
async fn balance_round_trip() {
    let addr = spawn_server(|id, method, _params| match method {
        "server.version" => vec![version_reply(id)],
        "blockchain.scripthash.get_balance" => {
            vec![json!({"id": id, "result": {"confirmed": 7_777, "unconfirmed": 0}}).to_string()]
        }
        _ => vec![json!({"id": id, "error": {"message": "unexpected method"}}).to_string()],
    })
    .await;

    let client = ElectrumClient::new(config_for(addr));
    let balance = client.script_balance(&test_address()).await.unwrap();
    assert_eq!(balance.confirmed, 7_777);
}

#[tokio::test]
async fn requests_carry_the_electrum_script_hash() {
    let expected =
        tapwallet::electrum::electrum_script_hash(&test_address().script_pubkey());
    let addr = spawn_server(move |id, method, params| match method {
        "server.version" => vec![version_reply(id)],
        "blockchain.scripthash.get_balance" => {
            assert_eq!(params[0].as_str().unwrap(), expected);
            vec![json!({"id": id, "result": {"confirmed": 0, "unconfirmed": 0}}).to_string()]
        }
        _ => vec![],
    })
    .await;

    let client = ElectrumClient::new(config_for(addr));
    client.script_balance(&test_address()).await.unwrap();
}

#[tokio::test]
async fn fee_estimate_converts_btc_per_kb() {
    let addr = spawn_server(|id, method, _| match method {
        "server.version" => vec![version_reply(id)],
        // 0.00002 BTC/kB = 2 sat/vB
        "blockchain.estimatefee" => vec![json!({"id": id, "result": 0.00002}).to_string()],
        _ => vec![],
    })
    .await;

    let client = ElectrumClient::new(config_for(addr));
    assert_eq!(client.estimate_fee_per_vbyte().await.unwrap(), 2);
}

#[tokio::test]
async fn server_error_payload_is_surfaced() {
    let addr = spawn_server(|id, method, _| match method {
        "server.version" => vec![version_reply(id)],
        _ => vec![
            json!({"id": id, "error": {"message": "daemon unavailable"}}).to_string(),
        ],
    })
    .await;

    let client = ElectrumClient::new(config_for(addr));
    match client.estimate_fee_per_vbyte().await {
        Err(WalletError::Rpc(message)) => assert_eq!(message, "daemon unavailable"),
        other => panic!("expected Rpc error, got {:?}", other),
    }
}

#[tokio::test]
async fn malformed_and_unknown_frames_are_discarded() {
    let addr = spawn_server(|id, method, _| match method {
        "server.version" => vec![version_reply(id)],
        "blockchain.estimatefee" => vec![
            // Garbage, then an answer nobody asked for, then the real one.
            "this is not json".to_string(),
            json!({"id": 99_999, "result": 0.5}).to_string(),
            json!({"id": id, "result": 0.00001}).to_string(),
        ],
        _ => vec![],
    })
    .await;

    let client = ElectrumClient::new(config_for(addr));
    assert_eq!(client.estimate_fee_per_vbyte().await.unwrap(), 1);
}

#[tokio::test]
async fn silent_server_times_out_the_request() {
    let addr = spawn_server(|id, method, _| match method {
        "server.version" => vec![version_reply(id)],
        // Never answer anything else.
        _ => vec![],
    })
    .await;

    let client = ElectrumClient::new(config_for(addr));
    assert!(matches!(
        client.estimate_fee_per_vbyte().await,
        Err(WalletError::RequestTimeout)
    ));
}

#[tokio::test]
async fn unreachable_server_fails_initialization() {
    // Bind then drop to get a port nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = config_for(addr);
    config.persistence.max_retry = 2;
    let client = ElectrumClient::new(config);
    assert!(client.script_balance(&test_address()).await.is_err());
}

#[tokio::test]
async fn concurrent_calls_share_one_connection() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let versions = Arc::new(AtomicUsize::new(0));
    let counter = versions.clone();
    let addr = spawn_server(move |id, method, _| match method {
        "server.version" => {
            counter.fetch_add(1, Ordering::SeqCst);
            vec![version_reply(id)]
        }
        "blockchain.estimatefee" => vec![json!({"id": id, "result": 0.00001}).to_string()],
        _ => vec![],
    })
    .await;

    let client = Arc::new(ElectrumClient::new(config_for(addr)));
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.estimate_fee_per_vbyte().await })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), 1);
    }

    // A single handshake: initialization was shared.
    assert_eq!(versions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn broadcast_and_transaction_get_round_trip() {
    use tapwallet::primitives::script::Script;
    use tapwallet::primitives::transaction::{OutPoint, Transaction, TxIn, TxOut};

    let mut tx = Transaction::new();
    tx.input.push(TxIn::new(
        OutPoint::new([0x01; 32], 0),
        Script::new(),
        0xffffffff,
    ));
    tx.output
        .push(TxOut::new(5_000, Script::new_p2tr(&[0x02; 32])));
    let raw_hex = hex::encode(tx.encode().unwrap());
    let txid = tx.txid().unwrap();

    let served_tx = raw_hex.clone();
    let served_txid = txid.clone();
    let addr = spawn_server(move |id, method, _| match method {
        "server.version" => vec![version_reply(id)],
        "blockchain.transaction.broadcast" => {
            vec![json!({"id": id, "result": served_txid}).to_string()]
        }
        "blockchain.transaction.get" => {
            vec![json!({"id": id, "result": served_tx}).to_string()]
        }
        _ => vec![],
    })
    .await;

    let client = ElectrumClient::new(config_for(addr));
    assert_eq!(client.broadcast(&raw_hex).await.unwrap(), txid);
    let fetched = client.transaction_get(&txid).await.unwrap();
    assert_eq!(fetched, tx);
}
