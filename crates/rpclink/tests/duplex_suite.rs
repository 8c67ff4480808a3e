//! End-to-end tests for two connections talking over an in-memory link.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

use rpclink::connection;
use rpclink::rpcwire::ErrorCode;
use rpclink::rpcwire::ErrorInfo;
use rpclink::rpcwire::Mixed;
use rpclink::rpcwire::Named;
use rpclink::rpcwire::Original;
use rpclink::rpcwire::Positional;
use rpclink::ChannelTransport;
use rpclink::Connection;
use rpclink::HandlerResult;
use rpclink::Registry;

/// Routes test logs through `RUST_LOG`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Serialize)]
struct AddArgs {
    a: i64,
    b: i64,
}

#[derive(Deserialize)]
struct AddReply {
    result: i64,
}

#[derive(Deserialize)]
struct WelcomeArgs {
    name: String,
}

#[derive(Serialize)]
struct WelcomeReply {
    message: String,
}

fn server_registry(notified: Arc<Notify>) -> Registry {
    let mut registry = Registry::new();

    registry
        .register_fn(
            "add",
            |(a, b): (i64, i64)| async move { anyhow::Ok((a + b,)) },
            Named::new(["a", "b"]),
            Named::new(["result"]),
        )
        .expect("register add");

    registry
        .register_fn_with_conn(
            "hello",
            |conn: Connection, (name,): (String,)| async move {
                let greeting = conn
                    .session()
                    .get_cloned::<String>("foo")
                    .ok_or_else(|| anyhow::anyhow!("internal error"))?;
                anyhow::Ok((greeting, name))
            },
            Mixed::new(["name"]),
            Positional::new(),
        )
        .expect("register hello");

    registry
        .register_fn(
            "receive_notification",
            move |(): ()| {
                let notified = Arc::clone(&notified);
                async move {
                    notified.notify_one();
                    anyhow::Ok(())
                }
            },
            Original,
            Original,
        )
        .expect("register receive_notification");

    registry.register_explicit("welcome", |_conn, args: WelcomeArgs| async move {
        anyhow::Ok(WelcomeReply {
            message: format!("Welcome, {}", args.name),
        })
    });

    registry.register_raw("fail", |_conn, _params| async {
        let info = ErrorInfo::custom(1234, "nope").with_data(json!("detail"));
        let result: HandlerResult = Err(info.into());
        result
    });

    registry
}

/// Builds a server and a client over one link and starts serving both.
fn connect(server: Registry, client: Registry) -> (Connection, Connection) {
    let (a, b) = ChannelTransport::pair();

    let server = Connection::builder(a)
        .name("server")
        .registry(Arc::new(server))
        .build()
        .expect("build server");
    let client = Connection::builder(b)
        .name("client")
        .registry(Arc::new(client))
        .build()
        .expect("build client");

    server.session().insert("foo", "Hello".to_string());

    server.spawn_serve();
    client.spawn_serve();

    (client, server)
}

// --- Reference scenarios ---

#[tokio::test]
async fn test_add_with_named_params() {
    init_tracing();
    let (client, _server) = connect(server_registry(Arc::new(Notify::new())), Registry::new());

    let reply: AddReply = client
        .call_explicit("add", &AddArgs { a: 1, b: 2 })
        .await
        .expect("add call");
    assert_eq!(reply.result, 3);
}

#[tokio::test]
async fn test_add_missing_argument_is_zero() {
    init_tracing();
    let (client, _server) = connect(server_registry(Arc::new(Notify::new())), Registry::new());

    let raw = client
        .call_raw("add", Some(json!({"a": 1})))
        .await
        .expect("add call");
    assert_eq!(raw, json!({"result": 1}));
}

#[tokio::test]
async fn test_hello_reads_session() {
    init_tracing();
    let (client, _server) = connect(server_registry(Arc::new(Notify::new())), Registry::new());

    let hello = client
        .proxy::<(String,), (String, String)>("hello", Positional::new(), Positional::new())
        .expect("hello proxy");
    let (greeting, name) = hello.call(("wsrpc".to_string(),)).await.expect("hello call");

    assert_eq!(greeting, "Hello");
    assert_eq!(name, "wsrpc");
}

#[tokio::test]
async fn test_hello_accepts_named_params() {
    init_tracing();
    let (client, _server) = connect(server_registry(Arc::new(Notify::new())), Registry::new());

    let raw = client
        .call_raw("hello", Some(json!({"name": "named"})))
        .await
        .expect("hello call");
    assert_eq!(raw, json!(["Hello", "named"]));
}

#[tokio::test]
async fn test_hello_without_session_value_fails() {
    init_tracing();
    let (client, server) = connect(server_registry(Arc::new(Notify::new())), Registry::new());
    server.session().remove("foo");

    let err = client
        .call_raw("hello", Some(json!(["x"])))
        .await
        .expect_err("hello should fail");
    match err {
        connection::Error::Rpc(info) => {
            assert_eq!(info.kind(), Some(ErrorCode::ApplicationError));
            assert_eq!(info.message, "internal error");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_welcome_through_typed_proxy() {
    init_tracing();
    let (client, _server) = connect(server_registry(Arc::new(Notify::new())), Registry::new());

    let welcome = client
        .proxy::<(String,), (String,)>("welcome", Named::new(["name"]), Named::new(["message"]))
        .expect("welcome proxy");
    let (message,) = welcome.call(("wsrpc".to_string(),)).await.expect("welcome call");

    assert_eq!(message, "Welcome, wsrpc");
}

#[tokio::test]
async fn test_notification_reaches_server() {
    init_tracing();
    let notified = Arc::new(Notify::new());
    let (client, _server) = connect(server_registry(Arc::clone(&notified)), Registry::new());

    let notify = client
        .notifier::<()>("receive_notification", Original)
        .expect("notifier");
    notify.notify(()).await.expect("send notification");

    tokio::time::timeout(Duration::from_secs(5), notified.notified())
        .await
        .expect("server never saw the notification");
}

#[tokio::test]
async fn test_explicit_notification_reaches_server() {
    init_tracing();
    let notified = Arc::new(Notify::new());
    let (client, _server) = connect(server_registry(Arc::clone(&notified)), Registry::new());

    client
        .notify_explicit("receive_notification", &())
        .await
        .expect("send notification");

    tokio::time::timeout(Duration::from_secs(5), notified.notified())
        .await
        .expect("server never saw the notification");
}

// --- Errors ---

#[tokio::test]
async fn test_remote_error_forwarded_verbatim() {
    init_tracing();
    let (client, _server) = connect(server_registry(Arc::new(Notify::new())), Registry::new());

    let err = client.call_raw("fail", None).await.expect_err("fail should fail");
    assert_eq!(
        err,
        connection::Error::Rpc(ErrorInfo::custom(1234, "nope").with_data(json!("detail")))
    );
}

#[tokio::test]
async fn test_unknown_method() {
    init_tracing();
    let (client, _server) = connect(Registry::new(), Registry::new());

    let err = client.call_raw("missing", None).await.expect_err("no such method");
    match err {
        connection::Error::Rpc(info) => assert_eq!(info.kind(), Some(ErrorCode::MethodNotFound)),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_typed_result_mismatch_is_local_codec_error() {
    init_tracing();
    let (client, _server) = connect(server_registry(Arc::new(Notify::new())), Registry::new());

    // add answers with an object, which a positional decoder refuses
    let add = client
        .proxy::<(i64, i64), (i64,)>("add", Named::new(["a", "b"]), Positional::new())
        .expect("add proxy");
    let err = add.call((1, 2)).await.expect_err("result shape mismatch");
    assert!(matches!(err, connection::Error::Codec(_)));
}

// --- Duplex behavior ---

#[tokio::test]
async fn test_nested_call_back_to_caller() {
    init_tracing();

    let mut client_registry = Registry::new();
    client_registry
        .register_fn(
            "double",
            |(x,): (i64,)| async move { anyhow::Ok((x * 2,)) },
            Positional::new(),
            Original,
        )
        .expect("register double");

    let mut server_registry = Registry::new();
    server_registry
        .register_fn_with_conn(
            "double_via_caller",
            |conn: Connection, (x,): (i64,)| async move {
                let double = conn.proxy::<(i64,), (i64,)>("double", Positional::new(), Original)?;
                let (doubled,) = double.call((x,)).await?;
                anyhow::Ok((doubled + 1,))
            },
            Positional::new(),
            Original,
        )
        .expect("register double_via_caller");

    let (client, _server) = connect(server_registry, client_registry);

    let raw = client
        .call_raw("double_via_caller", Some(json!([20])))
        .await
        .expect("nested call");
    assert_eq!(raw, json!(41));
}

#[tokio::test]
async fn test_slow_handler_does_not_block_others() {
    init_tracing();
    let gate = Arc::new(Notify::new());

    let mut registry = Registry::new();
    let slow_gate = Arc::clone(&gate);
    registry.register_raw("slow", move |_conn, _params| {
        let gate = Arc::clone(&slow_gate);
        async move {
            gate.notified().await;
            anyhow::Ok(json!("slow"))
        }
    });
    registry.register_raw("fast", |_conn, _params| async { anyhow::Ok(json!("fast")) });

    let (client, _server) = connect(registry, Registry::new());

    let slow_client = client.clone();
    let slow = tokio::spawn(async move { slow_client.call_raw("slow", None).await });

    let fast = client.call_raw("fast", None).await.expect("fast call");
    assert_eq!(fast, json!("fast"));
    assert!(!slow.is_finished());

    gate.notify_one();
    let slow = slow.await.expect("join").expect("slow call");
    assert_eq!(slow, json!("slow"));
}

#[tokio::test]
async fn test_concurrent_calls_are_correlated() {
    init_tracing();
    let (client, _server) = connect(server_registry(Arc::new(Notify::new())), Registry::new());

    let inputs: Vec<(i64, i64)> = {
        let mut rng = rand::thread_rng();
        (0..64)
            .map(|_| (rng.gen_range(-1000..1000), rng.gen_range(-1000..1000)))
            .collect()
    };

    let mut handles = Vec::new();
    for (a, b) in inputs {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let reply: AddReply = client.call_explicit("add", &AddArgs { a, b }).await?;
            Ok::<_, connection::Error>((a + b, reply.result))
        }));
    }

    for handle in handles {
        let (expected, actual) = handle.await.expect("join").expect("add call");
        assert_eq!(expected, actual);
    }
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn test_nested_calls_under_in_flight_limit() {
    init_tracing();

    let mut client_registry = Registry::new();
    client_registry
        .register_fn(
            "double",
            |(x,): (i64,)| async move { anyhow::Ok((x * 2,)) },
            Positional::new(),
            Original,
        )
        .expect("register double");

    let mut server_registry = Registry::new();
    server_registry
        .register_fn_with_conn(
            "via",
            |conn: Connection, (x,): (i64,)| async move {
                let double = conn.proxy::<(i64,), (i64,)>("double", Positional::new(), Original)?;
                let (doubled,) = double.call((x,)).await?;
                anyhow::Ok((doubled,))
            },
            Positional::new(),
            Original,
        )
        .expect("register via");

    let (a, b) = ChannelTransport::pair();
    let server = Connection::builder(a)
        .registry(Arc::new(server_registry))
        .max_in_flight(1)
        .timeout(Duration::from_secs(2))
        .build()
        .expect("build server");
    let client = Connection::builder(b)
        .registry(Arc::new(client_registry))
        .timeout(Duration::from_secs(5))
        .build()
        .expect("build client");
    server.spawn_serve();
    client.spawn_serve();

    let first = client.call_raw("via", Some(json!([20])));
    let second = client.call_raw("via", Some(json!([21])));
    let (first, second) = tokio::join!(first, second);

    assert_eq!(first.expect("first nested call"), json!(40));
    assert_eq!(second.expect("second nested call"), json!(42));
}

#[tokio::test]
async fn test_bounded_fan_out_still_serves() {
    init_tracing();
    let (a, b) = ChannelTransport::pair();

    let server = Connection::builder(a)
        .registry(Arc::new(server_registry(Arc::new(Notify::new()))))
        .max_in_flight(1)
        .build()
        .expect("build server");
    let client = Connection::new(b, Arc::new(Registry::new()));
    server.spawn_serve();
    client.spawn_serve();

    let first = client.call_raw("add", Some(json!({"a": 1, "b": 1})));
    let second = client.call_raw("add", Some(json!({"a": 2, "b": 2})));
    let (first, second) = tokio::join!(first, second);

    assert_eq!(first.expect("first"), json!({"result": 2}));
    assert_eq!(second.expect("second"), json!({"result": 4}));
}
