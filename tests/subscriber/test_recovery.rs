use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::abi::Token;
use ethers::types::{Address, Log, U256};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use xchain_node::chain::{EventSubscriber, LogSource};
use xchain_node::datasegment::piece::cid_from_commitment;

fn data_ready_log(offer_id: u64, size: u64) -> Log {
    let data = ethers::abi::encode(&[
        Token::Tuple(vec![
            Token::Bytes(cid_from_commitment(&[offer_id as u8; 32]).unwrap().to_bytes()),
            Token::Uint(U256::from(size)),
            Token::String(format!("http://127.0.0.1:1729/get?id={offer_id}")),
            Token::Uint(U256::from(5u64)),
            Token::Address(Address::repeat_byte(0x22)),
        ]),
        Token::Uint(U256::from(offer_id)),
    ]);
    Log {
        data: data.into(),
        ..Default::default()
    }
}

/// One scripted subscription attempt.
enum Script {
    /// The subscription dies with this error after yielding nothing.
    Fail(&'static str),
    /// The subscription yields these logs, then stays open.
    Logs(Vec<Log>),
}

struct ScriptedSource {
    script: Mutex<VecDeque<Script>>,
    // keeps the last subscription's channel open
    hold: Mutex<Option<mpsc::Sender<Result<Log>>>>,
}

impl ScriptedSource {
    fn new(script: Vec<Script>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            hold: Mutex::new(None),
        }
    }
}

#[async_trait]
impl LogSource for ScriptedSource {
    async fn subscribe(&self) -> mpsc::Receiver<Result<Log>> {
        let (tx, rx) = mpsc::channel(16);
        match self.script.lock().await.pop_front() {
            Some(Script::Fail(msg)) => {
                tx.send(Err(anyhow!(msg))).await.ok();
            }
            Some(Script::Logs(logs)) => {
                for log in logs {
                    tx.send(Ok(log)).await.ok();
                }
                *self.hold.lock().await = Some(tx);
            }
            None => {
                // unexpected extra subscription, let the channel close
            }
        }
        rx
    }
}

#[tokio::test]
async fn resubscribes_through_transient_socket_errors() {
    let source = ScriptedSource::new(vec![
        Script::Fail("read tcp 10.0.0.1:34567: connection reset"),
        Script::Fail("read tcp 10.0.0.1:34568: connection reset"),
        Script::Fail("read tcp 10.0.0.1:34569: connection reset"),
        Script::Logs(vec![data_ready_log(1, 1024), data_ready_log(2, 2048)]),
    ]);
    let (events_tx, mut events_rx) = mpsc::channel(16);
    let subscriber = Arc::new(EventSubscriber::new(source, events_tx));
    let cancel = CancellationToken::new();
    let handle = {
        let subscriber = subscriber.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { subscriber.run(cancel).await })
    };

    // normal operation resumes after three re-subscribe cycles
    let first = tokio::time::timeout(Duration::from_secs(2), events_rx.recv())
        .await
        .expect("timeout waiting for event")
        .expect("channel closed");
    assert_eq!(first.offer_id, 1);
    let second = tokio::time::timeout(Duration::from_secs(2), events_rx.recv())
        .await
        .expect("timeout waiting for event")
        .expect("channel closed");
    assert_eq!(second.offer_id, 2);
    assert!(!handle.is_finished());

    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("subscriber did not shut down")
        .expect("subscriber task panicked");
    assert!(result.is_ok());
}

#[tokio::test]
async fn other_subscription_errors_are_fatal() {
    let source = ScriptedSource::new(vec![Script::Fail("i/o timeout")]);
    let (events_tx, _events_rx) = mpsc::channel(16);
    let subscriber = EventSubscriber::new(source, events_tx);
    let cancel = CancellationToken::new();

    let result = tokio::time::timeout(Duration::from_secs(2), subscriber.run(cancel))
        .await
        .expect("subscriber did not terminate");
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("i/o timeout"));
}

#[tokio::test]
async fn undecodable_log_is_fatal() {
    let bad = Log {
        data: vec![0u8; 5].into(),
        ..Default::default()
    };
    let source = ScriptedSource::new(vec![Script::Logs(vec![bad])]);
    let (events_tx, _events_rx) = mpsc::channel(16);
    let subscriber = EventSubscriber::new(source, events_tx);
    let cancel = CancellationToken::new();

    let result = tokio::time::timeout(Duration::from_secs(2), subscriber.run(cancel))
        .await
        .expect("subscriber did not terminate");
    assert!(result.is_err());
}

#[tokio::test]
async fn cancellation_exits_cleanly() {
    let source = ScriptedSource::new(vec![Script::Logs(vec![])]);
    let (events_tx, _events_rx) = mpsc::channel(16);
    let subscriber = Arc::new(EventSubscriber::new(source, events_tx));
    let cancel = CancellationToken::new();
    let handle = {
        let subscriber = subscriber.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { subscriber.run(cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("subscriber did not shut down")
        .expect("subscriber task panicked");
    assert!(result.is_ok());
}
