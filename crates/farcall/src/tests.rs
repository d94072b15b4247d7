//! Tests for call correlation over in-process channel transports.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use rand::seq::SliceRandom;
use serde_json::Value;
use serde_json::json;
use tokio::sync::mpsc;

use farfind::Address;
use farfind::Selection;
use farfind::StaticDiscovery;
use farwire::Codec;
use farwire::FaultKind;
use farwire::Frame;
use farwire::JsonCodec;
use farwire::RemoteFault;
use farwire::Request;
use farwire::RequestId;
use farwire::Response;

use crate::channel::ChannelConnector;
use crate::channel::ChannelTransport;
use crate::responder::serve_connection;
use crate::transport;
use crate::transport::Connector;
use crate::transport::Transport;
use crate::*;

crate::remote_interface! {
    pub trait Calculator => CalculatorClient {
        fn add(&self, a: i64, b: i64) -> i64;
        fn divide(&self, a: i64, b: i64) -> i64;
        fn describe(&self) -> String;
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn calculator_address() -> Address {
    Address::new("calc.internal", 7000)
}

fn discovery() -> Arc<StaticDiscovery> {
    Arc::new(StaticDiscovery::new(Selection::First).with("Calculator", calculator_address()))
}

fn client_with(connector: Arc<dyn Connector>, call_timeout: Duration) -> Client {
    Client::builder()
        .config(ClientConfig::default().call_timeout(call_timeout))
        .discovery(discovery())
        .connector(connector)
        .build()
        .unwrap()
}

fn arg_i64(request: &Request, index: usize) -> i64 {
    request.args.get(index).and_then(Value::as_i64).unwrap_or_default()
}

async fn calculator(request: Request) -> Response {
    match request.method.as_str() {
        "add" => Response::ok(request.id.clone(), json!(arg_i64(&request, 0) + arg_i64(&request, 1))),
        "divide" => match arg_i64(&request, 1) {
            0 => Response::fault(
                request.id,
                RemoteFault::new(FaultKind::Application, "division by zero"),
            ),
            b => Response::ok(request.id.clone(), json!(arg_i64(&request, 0) / b)),
        },
        // deliberately the wrong type for `describe() -> String`
        "describe" => Response::ok(request.id, json!(42)),
        other => Response::fault(
            request.id,
            RemoteFault::new(FaultKind::MethodNotFound, other.to_string()),
        ),
    }
}

/// Serves every accepted channel with the calculator handler.
fn spawn_calculator(mut incoming: mpsc::UnboundedReceiver<(Address, ChannelTransport)>) {
    tokio::spawn(async move {
        let handler = Arc::new(calculator);
        while let Some((_, server)) = incoming.recv().await {
            let transport: Arc<dyn Transport> = Arc::new(server);
            tokio::spawn(serve_connection(transport, Arc::new(JsonCodec), Arc::clone(&handler)));
        }
    });
}

fn decode_call(bytes: &[u8]) -> Request {
    match JsonCodec.decode(bytes).unwrap() {
        Frame::Call(request) => request,
        Frame::Reply(_) => panic!("server received a reply frame"),
    }
}

fn encode_reply(response: Response) -> Vec<u8> {
    JsonCodec.encode(&Frame::Reply(response)).unwrap()
}

/// Waits for the table to drain, bounded.
async fn drained(pending: &PendingCalls) -> bool {
    for _ in 0..200 {
        if pending.is_empty() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

/// A connector whose connect never finishes.
#[derive(Default)]
struct HangingConnector {
    attempts: AtomicUsize,
}

#[async_trait::async_trait]
impl Connector for HangingConnector {
    async fn connect(&self, _address: &Address) -> transport::Result<Box<dyn Transport>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// A peer that accepts the connection but never takes a byte off the wire.
struct StalledTransport {
    closed: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl Transport for StalledTransport {
    async fn send(&self, _payload: &[u8]) -> transport::Result<()> {
        std::future::pending().await
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        std::future::pending().await
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct StalledConnector {
    closed: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl Connector for StalledConnector {
    async fn connect(&self, _address: &Address) -> transport::Result<Box<dyn Transport>> {
        Ok(Box::new(StalledTransport { closed: Arc::clone(&self.closed) }))
    }
}

/// A connector that always refuses.
struct RefusingConnector;

#[async_trait::async_trait]
impl Connector for RefusingConnector {
    async fn connect(&self, address: &Address) -> transport::Result<Box<dyn Transport>> {
        Err(transport::Error::ConnectionLost(format!("{} refused", address)))
    }
}

// ============================================================================
//  PENDING-CALL TABLE
// ============================================================================

#[tokio::test]
async fn test_complete_delivers_once() {
    let table = Arc::new(PendingCalls::new());
    let id = RequestId::from("Calculator-1");
    let waiter = table.register(id.clone(), ConnectionId(1), Duration::from_secs(5)).unwrap();
    assert!(table.contains(&id));

    assert!(table.complete(&id, Response::ok(id.clone(), json!(3))));
    assert!(!table.complete(&id, Response::ok(id.clone(), json!(4))));
    assert!(!table.cancel(&id, CallError::Codec("late".into())));

    let response = waiter.wait().await.unwrap();
    assert_eq!(response.into_outcome(), Ok(json!(3)));
    assert!(table.is_empty());
}

#[tokio::test]
async fn test_cancel_releases_waiter_with_given_error() {
    let table = Arc::new(PendingCalls::new());
    let id = RequestId::from("Calculator-2");
    let waiter = table.register(id.clone(), ConnectionId(1), Duration::from_secs(5)).unwrap();

    let error = CallError::Codec("bad reply".into());
    assert!(table.cancel(&id, error.clone()));
    assert!(!table.complete(&id, Response::ok(id.clone(), Value::Null)));

    assert_eq!(waiter.wait().await.unwrap_err(), error);
    assert!(table.is_empty());
}

#[tokio::test]
async fn test_duplicate_request_id_rejected() {
    let table = Arc::new(PendingCalls::new());
    let id = RequestId::from("Calculator-3");
    let _first = table.register(id.clone(), ConnectionId(1), Duration::from_secs(5)).unwrap();

    let second = table.register(id.clone(), ConnectionId(2), Duration::from_secs(5));
    assert!(matches!(second, Err(CallError::DuplicateRequestId(dup)) if dup == id));
    assert_eq!(table.len(), 1);
}

#[tokio::test]
async fn test_unknown_id_is_discarded() {
    let table = PendingCalls::new();
    let id = RequestId::from("never-sent");
    assert!(!table.complete(&id, Response::ok(id.clone(), Value::Null)));
    assert!(table.is_empty());
}

#[tokio::test]
async fn test_dropped_waiter_removes_entry() {
    let table = Arc::new(PendingCalls::new());
    let id = RequestId::from("Calculator-4");
    let waiter = table.register(id.clone(), ConnectionId(1), Duration::from_secs(5)).unwrap();

    drop(waiter);
    assert!(!table.contains(&id));
}

#[tokio::test]
async fn test_timeout_removes_entry_before_returning() {
    let table = Arc::new(PendingCalls::new());
    let id = RequestId::from("Calculator-5");
    let waiter = table.register(id.clone(), ConnectionId(1), Duration::from_millis(20)).unwrap();

    let err = waiter.wait().await.unwrap_err();
    assert_eq!(err, CallError::CallTimeout { id: id.clone(), after: Duration::from_millis(20) });
    assert!(table.is_empty());

    // a late reply is just dropped
    assert!(!table.complete(&id, Response::ok(id.clone(), json!(1))));
}

#[tokio::test]
async fn test_cancel_connection_only_touches_that_connection() {
    let table = Arc::new(PendingCalls::new());
    let doomed: Vec<_> = (0..3)
        .map(|i| {
            let id = RequestId(format!("doomed-{}", i));
            table.register(id, ConnectionId(1), Duration::from_secs(5)).unwrap()
        })
        .collect();
    let survivor = table
        .register(RequestId::from("survivor"), ConnectionId(2), Duration::from_secs(5))
        .unwrap();

    let released = table.cancel_connection(ConnectionId(1), || CallError::ConnectionLost {
        address: calculator_address(),
        reason: "reset".into(),
    });
    assert_eq!(released, 3);
    assert_eq!(table.len(), 1);
    assert!(table.contains(survivor.id()));

    for waiter in doomed {
        assert!(matches!(waiter.wait().await, Err(CallError::ConnectionLost { .. })));
    }
}

#[tokio::test]
async fn test_complete_and_cancel_race_has_one_winner() {
    for round in 0..50 {
        let table = Arc::new(PendingCalls::new());
        let id = RequestId(format!("race-{}", round));
        let waiter = table.register(id.clone(), ConnectionId(1), Duration::from_secs(5)).unwrap();

        let t1 = Arc::clone(&table);
        let id1 = id.clone();
        let completer = tokio::spawn(async move { t1.complete(&id1, Response::ok(id1.clone(), json!(1))) });
        let t2 = Arc::clone(&table);
        let id2 = id.clone();
        let canceller = tokio::spawn(async move { t2.cancel(&id2, CallError::Codec("lost".into())) });

        let completed = completer.await.unwrap();
        let cancelled = canceller.await.unwrap();
        assert!(completed ^ cancelled, "exactly one of complete/cancel must win");

        match waiter.wait().await {
            Ok(_) => assert!(completed),
            Err(_) => assert!(cancelled),
        }
        assert!(table.is_empty());
    }
}

// ============================================================================
//  REQUEST IDS
// ============================================================================

#[test]
fn test_request_id_is_service_qualified() {
    let id = next_request_id("Calculator");
    assert!(id.as_str().starts_with("Calculator-"));
    assert!(id.as_str().len() > "Calculator-".len());
}

#[tokio::test]
async fn test_request_ids_unique_under_concurrency() {
    let mut tasks = Vec::new();
    for _ in 0..8 {
        tasks.push(tokio::spawn(async {
            (0..500).map(|_| next_request_id("Calculator")).collect::<Vec<_>>()
        }));
    }

    let mut seen = HashSet::new();
    for task in tasks {
        for id in task.await.unwrap() {
            assert!(seen.insert(id), "request id generated twice");
        }
    }
    assert_eq!(seen.len(), 4000);
}

// ============================================================================
//  PROXY CALLS
// ============================================================================

#[tokio::test]
async fn test_proxy_call_returns_result() {
    init_tracing();
    let (connector, incoming) = ChannelConnector::new();
    spawn_calculator(incoming);
    let client = client_with(Arc::new(connector), Duration::from_secs(5));

    let calc: CalculatorClient = client.proxy();
    assert_eq!(calc.add(2, 3).await.unwrap(), 5);
    assert_eq!(calc.divide(9, 3).await.unwrap(), 3);
    assert!(client.pending().is_empty());
}

#[tokio::test]
async fn test_remote_fault_is_propagated() {
    let (connector, incoming) = ChannelConnector::new();
    spawn_calculator(incoming);
    let client = client_with(Arc::new(connector), Duration::from_secs(5));

    let calc: CalculatorClient = client.proxy();
    let err = calc.divide(1, 0).await.unwrap_err();
    let fault = err.remote_fault().expect("remote fault");
    assert_eq!(fault.kind, FaultKind::Application);
    assert_eq!(fault.message, "division by zero");
    assert!(client.pending().is_empty());
}

#[tokio::test]
async fn test_result_type_mismatch() {
    let (connector, incoming) = ChannelConnector::new();
    spawn_calculator(incoming);
    let client = client_with(Arc::new(connector), Duration::from_secs(5));

    let calc: CalculatorClient = client.proxy();
    let err = calc.describe().await.unwrap_err();
    assert!(matches!(err, CallError::ResultType { ref method, .. } if method == "Calculator.describe"));
}

#[tokio::test]
async fn test_request_carries_interface_and_param_types() {
    let (connector, mut incoming) = ChannelConnector::new();
    let client = client_with(Arc::new(connector), Duration::from_secs(5));
    let calc: CalculatorClient = client.proxy();

    let call = tokio::spawn(async move { calc.add(40, 2).await });

    let (address, server) = incoming.recv().await.unwrap();
    assert_eq!(address, calculator_address());
    let request = decode_call(&server.recv().await.unwrap().unwrap());
    assert_eq!(request.interface, "Calculator");
    assert_eq!(request.method, "add");
    assert_eq!(request.args, vec![json!(40), json!(2)]);
    assert_eq!(request.param_types, vec!["i64".to_string(), "i64".to_string()]);
    assert!(request.id.as_str().starts_with("Calculator-"));

    server.send(&encode_reply(Response::ok(request.id, json!(42)))).await.unwrap();
    assert_eq!(call.await.unwrap().unwrap(), 42);
}

#[tokio::test]
async fn test_unknown_service_fails_without_connecting() {
    let (connector, _incoming) = ChannelConnector::new();
    let connector = Arc::new(connector);
    let client = Client::builder()
        .discovery(Arc::new(StaticDiscovery::new(Selection::First)))
        .connector(connector.clone())
        .build()
        .unwrap();

    let calc: CalculatorClient = client.proxy();
    let err = calc.add(1, 1).await.unwrap_err();
    assert!(matches!(err, CallError::AddressResolution { ref service, .. } if service == "Calculator"));
    assert_eq!(connector.connect_count(), 0);
    assert!(client.pending().is_empty());
}

#[test]
fn test_builder_requires_discovery() {
    assert_eq!(Client::builder().build().err(), Some(client::Error::MissingDiscovery));
}

// ============================================================================
//  CORRELATION
// ============================================================================

#[tokio::test]
async fn test_out_of_order_responses_reach_their_callers() {
    init_tracing();
    const CALLS: i64 = 16;

    let (connector, mut incoming) = ChannelConnector::new();
    let client = client_with(Arc::new(connector), Duration::from_secs(5));
    let calc: CalculatorClient = client.proxy();

    let mut calls = Vec::new();
    for i in 0..CALLS {
        let calc = calc.clone();
        calls.push(tokio::spawn(async move { (i, calc.add(i, 1000).await) }));
    }

    // collect every request first, then answer in a shuffled order
    let (_, server) = incoming.recv().await.unwrap();
    let mut requests = Vec::new();
    for _ in 0..CALLS {
        requests.push(decode_call(&server.recv().await.unwrap().unwrap()));
    }
    requests.shuffle(&mut rand::thread_rng());
    for request in requests {
        let sum = arg_i64(&request, 0) + arg_i64(&request, 1);
        server.send(&encode_reply(Response::ok(request.id, json!(sum)))).await.unwrap();
    }

    for call in calls {
        let (i, result) = call.await.unwrap();
        assert_eq!(result.unwrap(), i + 1000);
    }
    assert!(client.pending().is_empty());
}

#[tokio::test]
async fn test_calls_share_one_connection() {
    let (connector, incoming) = ChannelConnector::new();
    spawn_calculator(incoming);
    let connector = Arc::new(connector);
    let client = client_with(connector.clone(), Duration::from_secs(5));
    let calc: CalculatorClient = client.proxy();

    let mut calls = Vec::new();
    for i in 0..20 {
        let calc = calc.clone();
        calls.push(tokio::spawn(async move { calc.add(i, i).await }));
    }
    for call in calls {
        call.await.unwrap().unwrap();
    }

    assert_eq!(connector.connect_count(), 1);
    assert_eq!(client.connections().len(), 1);
}

#[tokio::test]
async fn test_late_response_after_timeout_is_discarded() {
    let (connector, mut incoming) = ChannelConnector::new();
    let client = client_with(Arc::new(connector), Duration::from_millis(50));
    let calc: CalculatorClient = client.proxy();

    let call = tokio::spawn(async move { calc.add(1, 2).await });
    let (_, server) = incoming.recv().await.unwrap();
    let request = decode_call(&server.recv().await.unwrap().unwrap());

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, CallError::CallTimeout { ref id, .. } if *id == request.id));
    assert!(client.pending().is_empty());

    // the connection survives and simply drops the late reply
    server.send(&encode_reply(Response::ok(request.id, json!(3)))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(client.pending().is_empty());
    assert!(client.connections().cached(&calculator_address()).unwrap().is_alive());
}

#[tokio::test]
async fn test_malformed_reply_fails_only_its_call() {
    let (connector, mut incoming) = ChannelConnector::new();
    let client = client_with(Arc::new(connector), Duration::from_secs(5));
    let calc: CalculatorClient = client.proxy();

    let broken = {
        let calc = calc.clone();
        tokio::spawn(async move { calc.add(1, 1).await })
    };
    let (_, server) = incoming.recv().await.unwrap();
    let request = decode_call(&server.recv().await.unwrap().unwrap());

    // both a result and a fault: the envelope is invalid but the id is readable
    let garbage = json!({
        "frame": "reply",
        "id": request.id,
        "result": 2,
        "fault": { "kind": "Internal", "message": "confused" },
    });
    server.send(&serde_json::to_vec(&garbage).unwrap()).await.unwrap();
    assert!(matches!(broken.await.unwrap(), Err(CallError::Codec(_))));

    // the same connection still serves the next call
    let healthy = tokio::spawn(async move { calc.add(2, 2).await });
    let request = decode_call(&server.recv().await.unwrap().unwrap());
    server.send(&encode_reply(Response::ok(request.id, json!(4)))).await.unwrap();
    assert_eq!(healthy.await.unwrap().unwrap(), 4);
}

#[tokio::test]
async fn test_stalled_write_times_out_and_closes_connection() {
    let connector = Arc::new(StalledConnector::default());
    let client = client_with(connector.clone(), Duration::from_millis(100));
    let calc: CalculatorClient = client.proxy();

    let started = tokio::time::Instant::now();
    let err = tokio::time::timeout(Duration::from_secs(2), calc.add(1, 2))
        .await
        .expect("caller left blocked behind a stalled write")
        .unwrap_err();
    assert!(matches!(err, CallError::CallTimeout { after, .. } if after == Duration::from_millis(100)));
    assert!(started.elapsed() < Duration::from_secs(1));

    // the half-written connection is closed and forgotten
    assert!(connector.closed.load(Ordering::SeqCst));
    assert!(client.connections().is_empty());
    assert!(client.pending().is_empty());
}

// ============================================================================
//  CONNECTION LOSS
// ============================================================================

#[tokio::test]
async fn test_connection_loss_releases_every_caller() {
    init_tracing();
    let (connector, mut incoming) = ChannelConnector::new();
    let client = client_with(Arc::new(connector), Duration::from_secs(30));
    let calc: CalculatorClient = client.proxy();

    let mut calls = Vec::new();
    for i in 0..5 {
        let calc = calc.clone();
        calls.push(tokio::spawn(async move { calc.add(i, i).await }));
    }

    let (_, server) = incoming.recv().await.unwrap();
    for _ in 0..5 {
        server.recv().await.unwrap().unwrap();
    }
    drop(server);

    for call in calls {
        let err = tokio::time::timeout(Duration::from_secs(2), call)
            .await
            .expect("caller left blocked")
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, CallError::ConnectionLost { ref address, .. } if *address == calculator_address()));
    }
    assert!(drained(client.pending()).await);
    assert!(client.connections().is_empty());
}

#[tokio::test]
async fn test_reconnects_after_connection_loss() {
    let (connector, mut incoming) = ChannelConnector::new();
    let connector = Arc::new(connector);
    let client = client_with(connector.clone(), Duration::from_secs(5));
    let calc: CalculatorClient = client.proxy();

    let first = {
        let calc = calc.clone();
        tokio::spawn(async move { calc.add(1, 1).await })
    };
    let (_, server) = incoming.recv().await.unwrap();
    server.recv().await.unwrap().unwrap();
    drop(server);
    assert!(matches!(first.await.unwrap(), Err(CallError::ConnectionLost { .. })));

    spawn_calculator(incoming);
    assert_eq!(calc.add(2, 2).await.unwrap(), 4);
    assert_eq!(connector.connect_count(), 2);
}

#[tokio::test]
async fn test_shutdown_fails_in_flight_calls() {
    let (connector, mut incoming) = ChannelConnector::new();
    let client = client_with(Arc::new(connector), Duration::from_secs(30));
    let calc: CalculatorClient = client.proxy();

    let call = tokio::spawn(async move { calc.add(1, 1).await });
    let (_, server) = incoming.recv().await.unwrap();
    server.recv().await.unwrap().unwrap();

    client.shutdown();
    assert!(matches!(call.await.unwrap(), Err(CallError::ConnectionLost { .. })));
    assert!(client.connections().is_empty());
    assert!(client.pending().is_empty());
}

// ============================================================================
//  CONNECTION MANAGER
// ============================================================================

#[tokio::test]
async fn test_concurrent_get_connection_opens_once() {
    let (connector, _incoming) = ChannelConnector::new();
    let connector = Arc::new(connector);
    let manager = Arc::new(ConnectionManager::new(
        connector.clone(),
        Arc::new(JsonCodec),
        Arc::new(PendingCalls::new()),
        Duration::from_secs(1),
    ));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let manager = Arc::clone(&manager);
        tasks.push(tokio::spawn(async move {
            manager.get_connection(&calculator_address()).await.unwrap().id()
        }));
    }

    let mut ids = HashSet::new();
    for task in tasks {
        ids.insert(task.await.unwrap());
    }
    assert_eq!(ids.len(), 1);
    assert_eq!(connector.connect_count(), 1);
    assert_eq!(manager.opening(), 0);
}

#[tokio::test]
async fn test_failed_connect_is_shared_by_concurrent_callers() {
    let connector = Arc::new(HangingConnector::default());
    let manager = Arc::new(ConnectionManager::new(
        connector.clone(),
        Arc::new(JsonCodec),
        Arc::new(PendingCalls::new()),
        Duration::from_millis(200),
    ));

    let started = tokio::time::Instant::now();
    let mut tasks = Vec::new();
    for _ in 0..5 {
        let manager = Arc::clone(&manager);
        tasks.push(tokio::spawn(async move {
            manager.get_connection(&calculator_address()).await
        }));
    }
    for task in tasks {
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, CallError::ConnectionUnavailable { .. }), "got {:?}", err);
    }

    // one attempt, one connect timeout, for all five callers
    assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    assert!(started.elapsed() < Duration::from_millis(600), "took {:?}", started.elapsed());
    assert_eq!(manager.opening(), 0);

    // a settled failure is not remembered
    manager.get_connection(&calculator_address()).await.unwrap_err();
    assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_connect_timeout_is_unavailable() {
    let manager = ConnectionManager::new(
        Arc::new(HangingConnector::default()),
        Arc::new(JsonCodec),
        Arc::new(PendingCalls::new()),
        Duration::from_millis(50),
    );

    let err = manager.get_connection(&calculator_address()).await.unwrap_err();
    assert!(matches!(err, CallError::ConnectionUnavailable { ref address, .. } if *address == calculator_address()));
    assert!(manager.is_empty());
    assert_eq!(manager.opening(), 0);
}

#[tokio::test]
async fn test_refused_connection_is_unavailable() {
    let client = client_with(Arc::new(RefusingConnector), Duration::from_secs(5));
    let calc: CalculatorClient = client.proxy();

    let err = calc.add(1, 1).await.unwrap_err();
    assert!(matches!(err, CallError::ConnectionUnavailable { .. }));
    assert!(client.pending().is_empty());
}
