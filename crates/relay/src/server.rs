use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use async_trait::async_trait;
use dr_client::Task;
use tokio_util::sync::CancellationToken;
use tracing::*;
use warp::{filters::BoxedFilter, Filter, Reply};

use crate::{
    session::serve_client, CommandDispatcher, RelayContext, ServerConfig, SessionRegistry,
    StateReader,
};

pub struct ServerTask {
    address: SocketAddr,
    path: String,
    context: RelayContext,
}

pub fn create_task(
    config: &ServerConfig,
    dispatcher: CommandDispatcher,
    state: StateReader,
) -> anyhow::Result<ServerTask> {
    let broadcast_period = dr_client::period_from_hz(config.broadcast_hz)
        .ok_or_else(|| anyhow::anyhow!("invalid broadcast rate {}", config.broadcast_hz))?;

    Ok(ServerTask {
        address: SocketAddr::new(config.address, config.port),
        path: config.path.clone(),
        context: RelayContext {
            dispatcher,
            state,
            registry: SessionRegistry::new(),
            broadcast_period,
        },
    })
}

impl ServerTask {
    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.context.registry.clone()
    }
}

/// Matches `path` exactly, segment by segment. An empty path matches `/`.
fn base_path(path: &str) -> BoxedFilter<()> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .fold(warp::any().boxed(), |filter, segment| {
            filter.and(warp::path(segment.to_owned())).boxed()
        })
        .and(warp::path::end())
        .boxed()
}

/// The WebSocket endpoint. Sessions started through it stop when `shutdown`
/// is cancelled.
pub fn routes(
    path: &str,
    context: RelayContext,
    shutdown: CancellationToken,
) -> BoxedFilter<(warp::reply::Response,)> {
    base_path(path)
        .and(warp::ws())
        .and(warp::addr::remote())
        .map(move |ws: warp::ws::Ws, address: Option<SocketAddr>| {
            let context = context.clone();
            let shutdown = shutdown.clone();
            ws.on_upgrade(move |socket| serve_client(socket, address, context, shutdown))
                .into_response()
        })
        .boxed()
}

#[async_trait]
impl Task for ServerTask {
    fn name(&self) -> &'static str {
        "server"
    }

    async fn run(self: Box<Self>, cancel: CancellationToken) -> anyhow::Result<()> {
        let Self {
            address,
            path,
            context,
        } = *self;

        let routes = routes(&path, context, cancel.clone());

        let (bound, server) = warp::serve(routes)
            .try_bind_with_graceful_shutdown(address, async move { cancel.cancelled().await })
            .with_context(|| format!("failed to bind to {address}"))?;

        info!("listening at ws://{bound}/{}", path.trim_matches('/'));

        server.await;

        debug!("server stopped");
        Ok(())
    }
}
