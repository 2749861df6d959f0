use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use fieldsim::bridge::LoopbackClient;
use fieldsim::hub::{Channel, HubConfig};
use fieldsim::protocol::ServerMessage;
use fieldsim::{
    RegisterStore, SharedState, SimConfig, SimulationCache, SimulationEngine, SubscriptionHub,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "fieldsimd", about = "Modbus-style field device simulator")]
struct Args {
    /// Web monitor bind host
    #[arg(long)]
    host: Option<String>,

    /// Web monitor bind port
    #[arg(long)]
    port: Option<u16>,

    /// Engine scan period in milliseconds
    #[arg(long)]
    tick_millis: Option<u64>,
}

#[derive(Clone)]
struct AppState {
    hub: Arc<SubscriptionHub>,
    state: Arc<SharedState>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let mut config = SimConfig::default();
    if let Some(host) = args.host {
        config.web_host = host;
    }
    if let Some(port) = args.port {
        config.web_port = port;
    }
    if let Some(tick) = args.tick_millis {
        config.tick_millis = tick;
    }

    println!("🏭  Field Device Simulator");
    println!("==========================");

    let devices = config.device_table();
    let store = Arc::new(RegisterStore::new(devices.iter().map(|d| d.id)));
    let cache = Arc::new(SimulationCache::new(
        config.cache_ttl(),
        config.cache_sweep_interval(),
    ));
    let state = Arc::new(SharedState::new());
    let writer = Arc::new(LoopbackClient::new(
        store.clone(),
        state.clone(),
        cache.clone(),
    ));
    let hub = Arc::new(SubscriptionHub::new(
        state.clone(),
        writer,
        HubConfig {
            max_connections: config.max_connections,
            heartbeat_timeout: config.heartbeat_timeout(),
            liveness_period: config.liveness_period(),
            system_queue_depth: config.system_queue_depth,
        },
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    hub.start(shutdown_rx.clone());

    let engine = SimulationEngine::new(
        devices,
        store,
        cache,
        state.clone(),
        config.tick_period(),
        config.max_errors,
        config.error_window(),
    );
    let engine_state = state.clone();
    let engine_task = tokio::spawn(engine.run(shutdown_rx.clone()));

    tokio::spawn(fieldsim::tasks::poll_device_updates(
        hub.clone(),
        state.clone(),
        config.device_push_period(),
        shutdown_rx.clone(),
    ));
    tokio::spawn(fieldsim::tasks::poll_system_status(
        hub.clone(),
        state.clone(),
        config.system_push_period(),
        shutdown_rx.clone(),
    ));

    let app = Router::new()
        .route("/ws", get(device_ws_handler))
        .route("/ws/system", get(system_ws_handler))
        .route("/api/status", get(api_status))
        .with_state(AppState {
            hub: hub.clone(),
            state: state.clone(),
        });

    let addr = format!("{}:{}", config.web_host, config.web_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    state.set_web_running(true);
    info!(%addr, "web monitor listening");
    println!("📡 Monitor:  ws://{addr}/ws");
    println!("📊 System:   ws://{addr}/ws/system");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    engine_state.set_web_running(false);
    match engine_task.await {
        Ok(Ok(())) => info!("simulation engine stopped cleanly"),
        Ok(Err(err)) => error!(%err, "simulation engine stopped with error"),
        Err(err) => error!(%err, "simulation engine task panicked"),
    }
    println!("👋 Simulator stopped");
    Ok(())
}

async fn device_ws_handler(
    ws: WebSocketUpgrade,
    State(app): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| client_session(socket, app.hub, Channel::Device))
}

async fn system_ws_handler(
    ws: WebSocketUpgrade,
    State(app): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| client_session(socket, app.hub, Channel::System))
}

/// One WebSocket session: register with the pool, pump outbound frames from
/// the pool queue to the socket, feed inbound frames to the hub dispatcher.
async fn client_session(socket: WebSocket, hub: Arc<SubscriptionHub>, channel: Channel) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let conn = match hub.pool(channel).connect(tx) {
        Ok(conn) => conn,
        Err(err) => {
            warn!(%err, "closing new connection");
            let _ = sink.close().await;
            return;
        }
    };

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => hub.dispatch(channel, conn, &text),
            Message::Close(_) => break,
            _ => {}
        }
    }

    hub.pool(channel).disconnect(conn);
    writer.abort();
}

/// Plain HTTP snapshot for dashboards that do not hold a socket open.
async fn api_status(State(app): State<AppState>) -> Json<serde_json::Value> {
    let system = ServerMessage::system_snapshot(&app.state);
    let devices = ServerMessage::device_snapshot(&app.state);
    Json(serde_json::json!({
        "system": system,
        "devices": devices,
    }))
}
