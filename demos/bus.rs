//! Ints and strings published to a dispatcher whose drain loop runs on a
//! four-worker pool.
//!
//! Run with `RUST_LOG=debug cargo run --example bus` to watch the lifecycle.

use std::sync::Arc;

use pooled_bus::{Dispatcher, DispatcherConfig, PoolConfig, WorkerPool};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let pool = WorkerPool::with_config(PoolConfig::new(4).with_name("demo"))?;
    let bus = Dispatcher::on_pool(&pool, DispatcherConfig::default().with_name("demo-bus"))?;

    bus.subscribe(1, |value: Arc<i32>| {
        println!("Received event of int type with data: {}", value);
    });
    bus.subscribe(2, |text: Arc<String>| {
        println!("Received event of string type with data: {}", text);
    });

    for i in 0..10 {
        bus.publish(1, i)?;
        bus.publish(2, format!("Event {}", i))?;
    }

    let dispatch = bus.shutdown();
    let tasks = pool.shutdown();

    println!("{}", serde_json::to_string_pretty(&dispatch)?);
    println!("{}", serde_json::to_string_pretty(&tasks)?);
    Ok(())
}
