//! Manual-run demonstration of the parent side against `demo_worker`.
//! Build both first (`cargo build -p rpc_worker --bin demo_worker`), then
//! point this at the resulting binary:
//!
//! ```text
//! cargo run -p rpc_parent --example demo_parent -- target/debug/demo_worker
//! ```

use std::sync::{Arc, Mutex};

use rpc_parent::{Proxy, ShutdownMode, SpawnOptions, Value};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber_init();

    let worker_path = std::env::args()
        .nth(1)
        .expect("usage: demo_parent <path-to-demo_worker>");

    let options = SpawnOptions::new(worker_path)
        .init_args(vec![Value::Int(0)])
        .build()?;
    let proxy = Proxy::spawn(options).await?;

    let sum = proxy
        .call("add", vec![Value::Int(2).into(), Value::Int(3).into()])
        .await?;
    println!("add(2, 3) = {sum:?}");

    let progress = Arc::new(Mutex::new(Vec::new()));
    let recorded = progress.clone();
    proxy.on(
        "progress",
        Arc::new(move |args: &[Value]| {
            recorded.lock().unwrap().push(args.to_vec());
        }),
    );
    proxy.call("emitProgress", vec![Value::Int(3).into()]).await?;
    println!("progress events seen: {:?}", progress.lock().unwrap());

    println!("counter property: {:?}", proxy.property("counter"));

    proxy.terminate(ShutdownMode::Graceful).await?;
    Ok(())
}

fn tracing_subscriber_init() {
    // Left for an interactive reader to wire up their own `tracing`
    // subscriber; the library itself never installs one.
}
