mod protocol;
mod worker;

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::Uri;
use axum::response::Response;
use axum::Router;
use clap::Parser;
use howl::HowlError;
use protocol::Request;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "howl-server", version, about = "Stream Howl annotations over websockets")]
struct Args {
    /// Interface to listen on
    #[arg(long, env = "HOWL_SERVER_INTERFACE", default_value = "0.0.0.0")]
    interface: String,

    /// Port to listen on
    #[arg(long, env = "HOWL_SERVER_PORT", default_value_t = 9879)]
    port: u16,

    /// Seconds a single run may take
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    timeout: u64,
}

#[derive(Clone)]
struct AppState {
    timeout: Duration,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "howl=info,howl_server=info,tower_http=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let state = AppState {
        timeout: Duration::from_secs(args.timeout),
    };
    let app = Router::new()
        .fallback(upgrade)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", args.interface, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("howl annotation server listening on ws://{addr}/");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>, uri: Uri) -> Response {
    let path = uri.path().to_string();
    ws.on_upgrade(move |socket| serve_client(socket, path, state))
}

async fn serve_client(mut socket: WebSocket, path: String, state: AppState) {
    info!(path = %path, "client connected");
    while let Some(message) = socket.recv().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                warn!(path = %path, error = %err, "socket error");
                break;
            }
        };
        let sent = match Request::parse(text.as_str()) {
            Some(request) => run_request(&mut socket, &path, request, state.timeout).await,
            None => send(&mut socket, protocol::bad_request(&path)).await,
        };
        if let Err(err) = sent {
            warn!(path = %path, error = %err, "failed to reply");
            break;
        }
    }
    info!(path = %path, "client disconnected");
}

async fn run_request(
    socket: &mut WebSocket,
    path: &str,
    request: Request,
    timeout: Duration,
) -> Result<(), axum::Error> {
    info!(path, request = %request.describe(), "tracing");
    let mut job = match worker::spawn(request) {
        Ok(job) => job,
        Err(err) => {
            error!(path, error = %err, "failed to start worker");
            return send(socket, protocol::internal_error(path)).await;
        }
    };

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let outcome = loop {
        tokio::select! {
            Some(record) = job.records.recv() => send(socket, protocol::record(path, &record)).await?,
            result = &mut job.done => break Some(result),
            () = &mut deadline => break None,
        }
    };
    while let Ok(record) = job.records.try_recv() {
        send(socket, protocol::record(path, &record)).await?;
    }

    let reply = match outcome {
        Some(Ok(Ok(log))) => protocol::total(path, &log),
        Some(Ok(Err(HowlError::MissingTarget(missing)))) => {
            warn!(path, target = %missing.display(), "target doesn't exist");
            protocol::bad_request(path)
        }
        Some(Ok(Err(err))) => {
            error!(path, error = %err, "annotation failed");
            protocol::internal_error(path)
        }
        Some(Err(_)) => {
            error!(path, "worker stopped without a result");
            protocol::internal_error(path)
        }
        None => {
            job.cancel.store(true, Ordering::SeqCst);
            warn!(path, seconds = timeout.as_secs(), "run timed out");
            protocol::internal_error(path)
        }
    };
    send(socket, reply).await
}

async fn send(socket: &mut WebSocket, text: String) -> Result<(), axum::Error> {
    socket.send(Message::Text(text.into())).await
}
