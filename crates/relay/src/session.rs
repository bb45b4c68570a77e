use std::{net::SocketAddr, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::{
    stream::{SplitSink, SplitStream},
    FutureExt, SinkExt, StreamExt,
};
use serde_json::json;
use tokio::{
    select,
    sync::Mutex,
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::*;
use warp::ws::{Message, WebSocket};

use crate::{
    envelope::{CommandEnvelope, Inbound, Upstream},
    CommandDispatcher, DispatchError, SessionRegistry, StateReader,
};

type SharedSink = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// Everything a client session needs, shared by all sessions.
#[derive(Clone)]
pub struct RelayContext {
    pub dispatcher: CommandDispatcher,
    pub state: StateReader,
    pub registry: Arc<SessionRegistry>,
    pub broadcast_period: Duration,
}

async fn send(sink: &SharedSink, envelope: Upstream<'_>) -> Result<(), warp::Error> {
    let text = match envelope.to_json() {
        Ok(text) => text,
        Err(err) => {
            // nothing the peer can do about it, so don't drop the connection
            error!("could not serialize envelope: {err}");
            return Ok(());
        }
    };

    sink.lock().await.send(Message::text(text)).await
}

/// Runs one client connection until the client leaves, the connection fails
/// or `shutdown` fires. Both duties have stopped and the client is
/// deregistered by the time this returns.
pub async fn serve_client(
    socket: WebSocket,
    address: Option<SocketAddr>,
    context: RelayContext,
    shutdown: CancellationToken,
) {
    let registration = context.registry.register(address);
    let id = registration.id();

    let span = info_span!("client", id);

    async move {
        info!(
            "connected from {}, clients now {:?}",
            address.map_or("unknown address".to_owned(), |a| a.to_string()),
            context.registry.ids()
        );

        let (sink, stream) = socket.split();
        let sink: SharedSink = Arc::new(Mutex::new(sink));

        if let Err(err) = send(&sink, Upstream::connected(id)).await {
            debug!("could not greet client: {err}");
            return;
        }

        let cancel = shutdown.child_token();

        let broadcast = tokio::spawn(
            broadcast_duty(
                sink.clone(),
                context.state.clone(),
                context.broadcast_period,
                cancel.clone(),
            )
            .in_current_span(),
        );

        let commands = tokio::spawn(
            command_duty(sink.clone(), stream, context.dispatcher.clone(), cancel.clone())
                .in_current_span(),
        );

        let (broadcast, commands) = tokio::join!(broadcast, commands);
        for (duty, res) in [("broadcast", broadcast), ("command", commands)] {
            if let Err(err) = res {
                error!("{duty} duty failed: {err}");
            }
        }

        // best effort, the peer may already be gone
        let _ = sink.lock().await.close().await;

        drop(registration);
        info!("disconnected");
    }
    .instrument(span)
    .await
}

/// Sends the shared frame at a fixed rate, skipping ticks where the frame has
/// not changed since the last send.
async fn broadcast_duty(
    sink: SharedSink,
    state: StateReader,
    period: Duration,
    cancel: CancellationToken,
) {
    // whichever duty stops first takes the other one down with it
    let _guard = cancel.clone().drop_guard();

    let mut ival = interval(period);
    ival.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut last_sent = None;

    loop {
        select! {
            _ = cancel.cancelled() => break,
            _ = ival.tick() => {}
        }

        let current = state.read();
        if last_sent == Some(current.frame.sequence) {
            trace!("frame {} already sent", current.frame.sequence);
            continue;
        }

        let sent = select! {
            _ = cancel.cancelled() => break,
            res = send(&sink, Upstream::frame(&current)) => res,
        };

        if let Err(err) = sent {
            debug!("stopping broadcast: {err}");
            break;
        }

        last_sent = Some(current.frame.sequence);
    }

    trace!("broadcast duty exiting");
}

enum Flow {
    Continue,
    Close,
}

/// Handles inbound messages one at a time, so replies go out in the order
/// the commands arrived.
async fn command_duty(
    sink: SharedSink,
    mut stream: SplitStream<WebSocket>,
    dispatcher: CommandDispatcher,
    cancel: CancellationToken,
) {
    let _guard = cancel.clone().drop_guard();

    loop {
        let msg = select! {
            _ = cancel.cancelled() => break,
            msg = stream.next() => msg,
        };

        let msg = match msg {
            Some(Ok(msg)) => msg,
            Some(Err(err)) => {
                debug!("receive failed: {err}");
                break;
            }
            None => break,
        };

        if msg.is_close() {
            debug!("client sent close");
            break;
        }

        let Ok(text) = msg.to_str() else {
            trace!("ignoring non-text message");
            continue;
        };

        let flow = select! {
            _ = cancel.cancelled() => break,
            flow = handle_message(&sink, &dispatcher, text) => flow,
        };

        match flow {
            Ok(Flow::Continue) => {}
            Ok(Flow::Close) => break,
            Err(err) => {
                debug!("stopping command duty: {err}");
                break;
            }
        }
    }

    trace!("command duty exiting");
}

async fn handle_message(
    sink: &SharedSink,
    dispatcher: &CommandDispatcher,
    text: &str,
) -> Result<Flow, warp::Error> {
    let inbound = match Inbound::parse(text) {
        Ok(inbound) => inbound,
        Err(err) => {
            warn!("malformed message: {err}");
            send(sink, Upstream::error(format!("invalid message format: {err}"), None, None))
                .await?;
            return Ok(Flow::Continue);
        }
    };

    match inbound {
        Inbound::Connect { use_hardware } => {
            info!("connect requested, hardware: {use_hardware}");

            if use_hardware {
                let result = match dispatcher.use_hardware().await {
                    Ok(driver) => json!({ "success": true, "driver": driver }),
                    Err(err) => {
                        warn!("could not switch to hardware: {err}");
                        json!({ "success": false, "error": err.to_string() })
                    }
                };

                send(sink, Upstream::command_result("connect", None, result)).await?;
            }

            Ok(Flow::Continue)
        }
        Inbound::Disconnect => {
            info!("client requested disconnect");
            Ok(Flow::Close)
        }
        Inbound::Command(envelope) => {
            let reply = run_command(dispatcher, &envelope).await;

            let upstream = match reply {
                Ok(result) => {
                    Upstream::command_result(&envelope.command, envelope.id.as_ref(), result)
                }
                Err(err) => {
                    warn!("command {} failed: {err}", envelope.command);
                    Upstream::error(err, Some(&envelope.command), envelope.id.as_ref())
                }
            };

            send(sink, upstream).await?;
            Ok(Flow::Continue)
        }
    }
}

/// Dispatches a command, turning a panic inside the handler into an error
/// reply instead of losing the session.
async fn run_command(
    dispatcher: &CommandDispatcher,
    envelope: &CommandEnvelope,
) -> Result<serde_json::Value, DispatchError> {
    AssertUnwindSafe(dispatcher.dispatch(&envelope.command, &envelope.params))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "command handler panicked".to_owned());

            Err(DispatchError::Internal(reason))
        })
}
