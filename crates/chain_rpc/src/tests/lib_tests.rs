use super::*;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct ScriptedRpc {
    responses: Arc<Mutex<HashMap<String, serde_json::Value>>>,
}

impl ScriptedRpc {
    fn script(&self, query_path: &str, response: serde_json::Value) {
        self.responses
            .lock()
            .expect("responses")
            .insert(query_path.to_string(), response);
    }
}

async fn handle_abci_query(
    State(rpc): State<ScriptedRpc>,
    Json(request): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    assert_eq!(request["method"], "abci_query");
    let path = request["params"]["path"].as_str().unwrap_or_default();
    let scripted = rpc.responses.lock().expect("responses").get(path).cloned();
    Json(scripted.unwrap_or_else(|| {
        rpc_result(6, "could not get vstorage path", None)
    }))
}

async fn spawn_rpc_node(rpc: ScriptedRpc) -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = Router::new()
        .route("/", post(handle_abci_query))
        .with_state(rpc);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

fn rpc_result(code: u32, log: &str, value_b64: Option<String>) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": { "response": { "code": code, "log": log, "value": value_b64 } }
    })
}

fn envelope_b64(inner: &str) -> String {
    let envelope = serde_json::json!({ "value": inner }).to_string();
    STANDARD.encode(envelope)
}

fn cell_b64(height: u64, values: &[&str]) -> String {
    let cell = serde_json::json!({
        "blockHeight": height.to_string(),
        "values": values,
    })
    .to_string();
    envelope_b64(&cell)
}

#[test]
fn storage_cells_decode_string_heights() {
    let cell: StorageCell =
        serde_json::from_str(r#"{"blockHeight":"791","values":["first","second"]}"#)
            .expect("decode cell");

    assert_eq!(cell.block_height, 791);
    assert_eq!(cell.latest(), Some("second"));

    let encoded = serde_json::to_value(&cell).expect("encode cell");
    assert_eq!(encoded["blockHeight"], "791");
}

#[tokio::test]
async fn fetch_decodes_a_written_path() {
    let rpc = ScriptedRpc::default();
    let path = StoragePath::new("published.agoricNames.brand");
    rpc.script(
        &path.query_path(),
        rpc_result(0, "", Some(cell_b64(42, &[r#"[["IST","board0257"]]"#]))),
    );
    let url = spawn_rpc_node(rpc).await;

    let fetcher = RpcStorageFetcher::new(url, "agoriclocal");
    let cell = fetcher
        .fetch_data(&path)
        .await
        .expect("fetch")
        .expect("cell present");

    assert_eq!(cell.block_height, 42);
    assert_eq!(cell.latest(), Some(r#"[["IST","board0257"]]"#));
    assert_eq!(fetcher.chain_id(), "agoriclocal");
}

#[tokio::test]
async fn fetch_maps_node_rejections() {
    let rpc = ScriptedRpc::default();
    let url = spawn_rpc_node(rpc).await;

    let fetcher = RpcStorageFetcher::new(url, "agoriclocal");
    let err = fetcher
        .fetch_data(&StoragePath::new("published.no.such.path"))
        .await
        .expect_err("unscripted path is rejected");

    match err {
        FetchError::Rejected { path, log } => {
            assert_eq!(path, "published.no.such.path");
            assert!(log.contains("could not get vstorage path"));
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn fetch_treats_unwritten_paths_as_absent() {
    let rpc = ScriptedRpc::default();
    let path = StoragePath::new("published.wallet.agoric1empty.current");
    rpc.script(&path.query_path(), rpc_result(0, "", Some(String::new())));
    let url = spawn_rpc_node(rpc).await;

    let fetcher = RpcStorageFetcher::new(url, "agoriclocal");
    let cell = fetcher.fetch_data(&path).await.expect("fetch");
    assert!(cell.is_none());
}

#[tokio::test]
async fn legacy_values_become_single_value_cells() {
    let rpc = ScriptedRpc::default();
    let path = StoragePath::new("published.legacy");
    rpc.script(
        &path.query_path(),
        rpc_result(0, "", Some(envelope_b64("not a stream cell"))),
    );
    let url = spawn_rpc_node(rpc).await;

    let fetcher = RpcStorageFetcher::new(url, "agoriclocal");
    let cell = fetcher
        .fetch_data(&path)
        .await
        .expect("fetch")
        .expect("cell present");

    assert_eq!(cell.block_height, 0);
    assert_eq!(cell.latest(), Some("not a stream cell"));
}

async fn spawn_config_server(config: serde_json::Value) -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = Router::new().route(
        "/network-config",
        get(move || {
            let config = config.clone();
            async move { Json(config) }
        }),
    );
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}/network-config")
}

#[tokio::test]
async fn network_config_requires_rpc_addrs() {
    let url = spawn_config_server(serde_json::json!({
        "chainName": "agoriclocal",
        "rpcAddrs": [],
    }))
    .await;

    let http = reqwest::Client::new();
    let err = fetch_network_config(&http, &url)
        .await
        .expect_err("empty rpc list is unusable");
    match err {
        FetchError::BadNetworkConfig { reason, .. } => {
            assert!(reason.contains("no rpc addresses"));
        }
        other => panic!("expected bad network config, got {other:?}"),
    }
}

#[tokio::test]
async fn network_config_roundtrips_chain_details() {
    let url = spawn_config_server(serde_json::json!({
        "chainName": "agoriclocal",
        "rpcAddrs": ["http://localhost:26657"],
        "apiAddrs": ["http://localhost:1317"],
    }))
    .await;

    let http = reqwest::Client::new();
    let config = fetch_network_config(&http, &url).await.expect("config");

    assert_eq!(config.chain_name, "agoriclocal");
    assert_eq!(config.rpc_addrs, vec!["http://localhost:26657"]);
    assert_eq!(
        config.api_addrs.as_deref(),
        Some(&["http://localhost:1317".to_string()][..])
    );

    let err = fetch_network_config(&http, "not a url")
        .await
        .expect_err("unparseable url");
    assert!(matches!(err, FetchError::BadNetworkConfig { .. }));
}
