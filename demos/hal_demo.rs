//! HAL Demo - drive the connection broker end to end against simulated
//! devices.
//!
//! This example exercises:
//! 1. Driver registration and availability probing
//! 2. A Modbus RTU session against an in-memory slave
//! 3. An ADB handshake against a mock USB backend
//! 4. Hybrid fallback to an in-process remote endpoint
//!
//! # Run
//!
//! ```bash
//! cargo run --example hal_demo
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::routing::post;
use axum::{Json, Router};
use clap::Parser;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use devhal::broker::ConnectionBroker;
use devhal::codec::adb::AdbMessage;
use devhal::codec::modbus_rtu::RtuFrame;
use devhal::core::logging::{DeviceLogConfig, TracingLogHandler};
use devhal::core::traits::{
    DriverCapabilities, DriverDescriptor, HalEvent, HalEventReceiver, ReadPayload,
    RemoteEndpointConfig, TransportKind,
};
use devhal::drivers::{AdbDriver, ModbusRtuDriver};
use devhal::store::MemoryIdentityStore;
use devhal::transport::mock::{adb_device_info, MockSlave, MockUsbBackend, MockUsbState};
use devhal::Result;

// ============================================================================
// CLI
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "hal_demo", about = "Device HAL demo")]
struct Args {
    /// Enable verbose output, including raw frame dumps
    #[arg(short, long)]
    verbose: bool,
}

// ============================================================================
// Sessions
// ============================================================================

async fn run_modbus_session(broker: &ConnectionBroker, verbose: bool) -> Result<()> {
    // Scripted slave 5: one read response (registers 1 and 2), then the
    // echo for a single-register write of 42 to address 7.
    let read_response = RtuFrame::new(5, 0x03, vec![0x04, 0x00, 0x01, 0x00, 0x02]).encode();
    let write_echo = RtuFrame::new(5, 0x06, vec![0x00, 0x07, 0x00, 0x2A]).encode();
    let slave = MockSlave::new().reply(read_response).reply(write_echo);

    let log_config = DeviceLogConfig {
        log_raw_frames: verbose,
        ..DeviceLogConfig::default()
    };
    let driver = ModbusRtuDriver::new()
        .with_log_handler(Arc::new(TracingLogHandler), log_config)
        .with_channel(slave.spawn());

    let descriptor = DriverDescriptor::new("meter", TransportKind::Native, "1.0.0")
        .with_capabilities(DriverCapabilities::read_write());
    broker.register(descriptor, Some(Box::new(driver))).await?;

    println!("meter available: {}", broker.is_available("meter").await);

    let outcome = broker
        .connect("meter", &json!({ "baudRate": 9600, "slaveId": 5, "timeout": 500 }))
        .await?;
    println!(
        "meter connect data: {}",
        outcome.data.unwrap_or(Value::Null)
    );

    let payload = broker
        .read("meter", &json!({ "address": 0, "quantity": 2 }))
        .await?;
    println!("meter registers: {:?}", payload.as_registers());

    let ack = broker
        .write("meter", &json!({ "address": 7, "value": 42 }))
        .await?;
    println!("meter write ack: {:?}", ack);

    broker.disconnect("meter").await
}

async fn run_adb_session(broker: &ConnectionBroker) -> Result<()> {
    // Mock phone that authorizes immediately and answers one read.
    let phone = adb_device_info(0x04E8, 0x6860, "Galaxy S21");
    let state = MockUsbState::new();
    state.queue_reply(AdbMessage::cnxn("device::")).await;
    state
        .queue_reply(AdbMessage::wrte(1, 1, b"pong".to_vec()))
        .await;
    let backend = MockUsbBackend::new().with_device(phone, Arc::clone(&state));

    let driver = AdbDriver::new(Arc::new(backend))
        .with_identity_store(Arc::new(MemoryIdentityStore::new()));

    let descriptor = DriverDescriptor::new("adb", TransportKind::Native, "1.0.0")
        .with_capabilities(DriverCapabilities::read_write());
    broker.register(descriptor, Some(Box::new(driver))).await?;

    println!("adb available: {}", broker.is_available("adb").await);

    let outcome = broker.connect("adb", &json!({})).await?;
    println!("adb connect data: {}", outcome.data.unwrap_or(Value::Null));

    broker
        .write("adb", &json!({ "command": "shell:input keyevent 26" }))
        .await?;
    let payload = broker.read("adb", &json!({})).await?;
    if let Some(bytes) = payload.as_bytes() {
        println!("adb reply: {}", String::from_utf8_lossy(bytes));
    }

    broker.disconnect("adb").await
}

async fn run_fallback_session(broker: &ConnectionBroker) -> Result<()> {
    // In-process stand-in for a remote HAL bridge.
    let app = Router::new().route(
        "/hal",
        post(|Json(body): Json<Value>| async move {
            Json(json!({ "status": "ok", "echo": body }))
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("http://{}/hal", listener.local_addr()?);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    // The native side points at a serial port that does not exist, so the
    // broker engages the remote fallback.
    let descriptor = DriverDescriptor::new("camera", TransportKind::Hybrid, "1.0.0")
        .with_capabilities(DriverCapabilities::read_write())
        .with_fallback(RemoteEndpointConfig::new(&url));
    broker
        .register(descriptor, Some(Box::new(ModbusRtuDriver::new())))
        .await?;

    let outcome = broker
        .connect("camera", &json!({ "port": "/dev/ttyMISSING0", "slaveId": 1 }))
        .await?;
    println!("camera connected via {}", outcome.method);

    let payload = broker.read("camera", &json!({ "stream": "main" })).await?;
    if let ReadPayload::Json(value) = payload {
        println!("camera remote read: {}", value);
    }

    broker.disconnect("camera").await
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if std::env::var("RUST_LOG").is_err() {
        let level = if args.verbose { "debug" } else { "info" };
        std::env::set_var("RUST_LOG", level);
    }
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let broker = ConnectionBroker::new();
    let events = broker.subscribe();
    let event_task = tokio::spawn(print_events(events));

    run_modbus_session(&broker, args.verbose).await?;
    println!();
    run_adb_session(&broker).await?;
    println!();
    run_fallback_session(&broker).await?;

    println!();
    println!("Final driver status:");
    for snapshot in broker.statuses().await {
        println!(
            "  {:<8} kind={:<7} connected={:<5} fallback={:<5} reads={} writes={} errors={}",
            snapshot.name,
            snapshot.kind.to_string(),
            snapshot.connected,
            snapshot.using_fallback,
            snapshot.stats.read_count,
            snapshot.stats.write_count,
            snapshot.stats.error_count,
        );
    }

    broker.shutdown().await;

    // Let the event printer drain before stopping it.
    tokio::time::sleep(Duration::from_millis(50)).await;
    event_task.abort();
    let _ = event_task.await;

    Ok(())
}

async fn print_events(mut events: HalEventReceiver) {
    loop {
        match events.recv().await {
            Ok(event) => print_event(&event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                eprintln!("Warning: event receiver lagged by {} messages", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_event(event: &HalEvent) {
    match event {
        HalEvent::Registered { driver } => {
            println!("[REGISTERED] {}", driver);
        }
        HalEvent::AvailabilityChanged { driver, available } => {
            println!("[AVAILABLE] {} -> {}", driver, available);
        }
        HalEvent::Connected { driver, method } => {
            println!("[CONNECTED] {} via {}", driver, method);
        }
        HalEvent::FallbackEngaged { driver, reason } => {
            println!("[FALLBACK] {}: {}", driver, reason);
        }
        HalEvent::Disconnected { driver } => {
            println!("[DISCONNECTED] {}", driver);
        }
        HalEvent::OperationFailed {
            driver,
            operation,
            message,
        } => {
            eprintln!("[ERROR] {} {}: {}", driver, operation, message);
        }
    }
}
