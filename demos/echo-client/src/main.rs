//! Starts a local echo service, points a consumer at it and makes a few
//! calls. Run with `RUST_LOG=debug` to watch the pool at work.

use std::collections::HashMap;

use serde_json::json;
use tokio::net::TcpListener;
use wirepool_client::{Consumer, RawConsumerConfig};
use wirepool_common::transport::{read_frame, write_frame};
use wirepool_common::{Framing, Request, Response};

async fn spawn_echo_service() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = Vec::new();
                loop {
                    let Ok(frame) =
                        read_frame(&mut socket, Framing::LengthPrefixed, &mut buf).await
                    else {
                        break;
                    };
                    let Ok(req) = serde_json::from_slice::<Request>(&frame) else {
                        break;
                    };
                    let resp = Response::success(req.id, json!({"echo": req.params}));
                    let encoded = serde_json::to_vec(&resp).unwrap();
                    if write_frame(&mut socket, Framing::LengthPrefixed, &encoded)
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            });
        }
    });
    port
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let port = spawn_echo_service().await;
    tracing::info!(port, "echo service listening");

    let mut raw = RawConsumerConfig::from_json(&format!(
        r#"{{
            "name": "echo-service",
            "protocol": "jsonrpc-tcp-length-check",
            "load_balancer": "round_robin",
            "nodes": [{{"host": "127.0.0.1", "port": {}}}],
            "options": {{"heartbeat": 5, "pool": {{"max_connections": 8}}}}
        }}"#,
        port
    ))?;

    // RPC_ECHO_SERVICE=HOST:PORT redirects the consumer elsewhere.
    let env_keys = HashMap::from([(
        "echo-service".to_string(),
        "RPC_ECHO_SERVICE".to_string(),
    )]);
    raw.apply_env_override(&env_keys)?;

    let consumer = Consumer::start(raw.validate()?)?;

    for i in 0..5 {
        let response = consumer.call("demo.echo", json!({"seq": i})).await?;
        println!(
            "call {} -> success={} result={:?}",
            i, response.success, response.result
        );
    }

    consumer.shutdown();
    Ok(())
}
