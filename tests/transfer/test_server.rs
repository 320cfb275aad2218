use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use xchain_node::constants::{prefix_car_bytes, prefix_piece};
use xchain_node::datasegment::piece::cid_from_commitment;
use xchain_node::datasegment::{Aggregate, PaddedPieceSize, PieceInfo};
use xchain_node::transfer::{router, TransferState};
use xchain_node::TransferRegistry;

/// Serve fixed payload bytes the way the buffer service would.
async fn spawn_payload_server(payload: Vec<u8>) -> String {
    let app = Router::new().route("/get", get(move || async move { payload.clone() }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/get")
}

async fn spawn_transfer_server(state: TransferState) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    format!("http://{addr}")
}

/// Register one aggregate of `target` with a single payload piece and
/// return the server base URL plus the transfer id.
async fn setup(target: u64, piece_size: u64, payload: Vec<u8>) -> (String, u64) {
    let location = spawn_payload_server(payload).await;
    let piece = PieceInfo::new(piece_size, cid_from_commitment(&[9u8; 32]).unwrap());
    let agg = Aggregate::new(PaddedPieceSize(target), vec![prefix_piece(), piece]).unwrap();

    let registry = Arc::new(TransferRegistry::new());
    let id = registry.register(vec![location], Arc::new(agg)).await;

    let state = TransferState {
        registry,
        target_deal_size: target,
    };
    (spawn_transfer_server(state).await, id)
}

#[tokio::test]
async fn head_and_get_agree_on_content_length() {
    let (base, id) = setup(8192, 1024, vec![0xbb; 1016]).await;
    let client = reqwest::Client::new();

    let head = client
        .head(format!("{base}/?id={id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(head.status(), 200);
    assert_eq!(
        head.headers()["content-type"].to_str().unwrap(),
        "application/octet-stream"
    );
    // 8192 - 8192/128 = 8128
    assert_eq!(head.headers()["content-length"].to_str().unwrap(), "8128");

    let get = client.get(format!("{base}/?id={id}")).send().await.unwrap();
    assert_eq!(get.status(), 200);
    let body = get.bytes().await.unwrap();
    assert_eq!(body.len(), 8128);
}

#[tokio::test]
async fn stream_leads_with_the_prefix_car() {
    let (base, id) = setup(8192, 1024, vec![0xbb; 1016]).await;

    let body = reqwest::get(format!("{base}/?id={id}"))
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();

    let prefix = prefix_car_bytes();
    assert_eq!(&body[..prefix.len()], &prefix[..]);
    // prefix piece is zero padded out to its un-padded size
    assert!(body[prefix.len()..254].iter().all(|&b| b == 0));
    // payload piece sits at the un-padded offset of padded offset 1024
    assert_eq!(&body[1016..2032], &[0xbb; 1016][..]);
}

#[tokio::test]
async fn missing_id_is_bad_request() {
    let (base, _id) = setup(2048, 1024, vec![0xbb; 1016]).await;
    let resp = reqwest::get(format!("{base}/")).await.unwrap();
    assert_eq!(resp.status(), 400);
    assert_eq!(resp.text().await.unwrap(), "ID is required");
}

#[tokio::test]
async fn non_integer_id_is_bad_request() {
    let (base, _id) = setup(2048, 1024, vec![0xbb; 1016]).await;
    let resp = reqwest::get(format!("{base}/?id=seven")).await.unwrap();
    assert_eq!(resp.status(), 400);
    assert_eq!(resp.text().await.unwrap(), "Invalid ID");
}

#[tokio::test]
async fn unknown_id_is_not_found() {
    let (base, _id) = setup(2048, 1024, vec![0xbb; 1016]).await;
    let resp = reqwest::get(format!("{base}/?id=99")).await.unwrap();
    assert_eq!(resp.status(), 404);
    assert_eq!(resp.text().await.unwrap(), "No data found");
}

#[tokio::test]
async fn short_buffer_payload_is_zero_padded() {
    // buffer holds fewer bytes than the piece's un-padded size
    let (base, id) = setup(8192, 1024, vec![0xcc; 300]).await;

    let body = reqwest::get(format!("{base}/?id={id}"))
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(body.len(), 8128);
    assert_eq!(&body[1016..1316], &[0xcc; 300][..]);
    assert!(body[1316..2032].iter().all(|&b| b == 0));
}
