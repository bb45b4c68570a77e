use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use dr_device::DeviceKind;
use dr_relay::CommandDispatcher;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::metadata::LevelFilter;
use tracing_subscriber::{filter::Targets, layer::SubscriberExt, util::SubscriberInitExt, Layer};

#[macro_use]
extern crate tracing;

mod cli;
mod config;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    // setup colorful backtraces
    color_backtrace::install();

    let mut targets = Targets::new().with_default(LevelFilter::INFO);

    if let Ok(directives) = std::env::var("RUST_LOG") {
        for directive in directives.split(',') {
            if let Some((target, level)) = directive.split_once('=') {
                targets = targets.with_target(
                    target,
                    level.parse::<LevelFilter>().context("invalid log level")?,
                );
            } else {
                targets = targets.with_default(
                    directive
                        .parse::<LevelFilter>()
                        .context("invalid log level")?,
                );
            }
        }
    }

    let (writer, _guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::hourly("logs", "drone-relay"));

    let reg = tracing_subscriber::registry();

    #[cfg(tokio_unstable)]
    let reg = reg.with(console_subscriber::spawn());

    reg
        // writer that outputs to console
        .with(tracing_subscriber::fmt::layer().with_filter(targets))
        // writer that outputs to files
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(Targets::new().with_targets(vec![
                    ("drone_relay", LevelFilter::DEBUG),
                    ("dr_device", LevelFilter::DEBUG),
                    ("dr_vision", LevelFilter::DEBUG),
                    ("dr_relay", LevelFilter::DEBUG),
                ])),
        )
        .init();

    let main_args: cli::args::MainArgs = cli::args::MainArgs::parse();

    debug!("reading config from {:?}", &main_args.config);
    let mut config = crate::config::DroneRelayConfig::read(main_args.config)
        .context("failed to read config")?;

    if main_args.hardware {
        config.device.kind = DeviceKind::Tello;
    }

    run_tasks(config).await
}

async fn run_tasks(config: crate::config::DroneRelayConfig) -> anyhow::Result<()> {
    let cancellation_token = CancellationToken::new();

    ctrlc::set_handler({
        let cancellation_token = cancellation_token.clone();
        move || {
            info!("received interrupt, shutting down");
            cancellation_token.cancel();
        }
    })
    .expect("could not set ctrl+c handler");

    let mut tasks = Vec::<Box<dyn dr_client::Task + Send>>::new();

    debug!("initializing device task");
    let device_task =
        dr_device::create_task(config.device).context("failed to initialize device task")?;
    let device = device_task.session(Duration::from_millis(config.server.command_timeout_ms));
    tasks.push(Box::new(device_task));

    debug!("initializing render task");
    let pipeline = dr_vision::create_pipeline(&config.vision);
    let source =
        dr_vision::create_source(&config.render.source, config.render.width, config.render.height)
            .context("failed to initialize frame source")?;
    let video_source = source.name().to_owned();

    let render_task = dr_relay::render::create_task(
        &config.render,
        config.server.jpeg_quality,
        source,
        pipeline.clone(),
        device.clone(),
    )
    .context("failed to initialize render task")?;
    let state = render_task.state();
    tasks.push(Box::new(render_task));

    debug!("initializing server task");
    let dispatcher = CommandDispatcher::new(device, pipeline, state.clone(), video_source);
    let server_task = dr_relay::server::create_task(&config.server, dispatcher, state)
        .context("failed to initialize server task")?;
    tasks.push(Box::new(server_task));

    let mut join_set = JoinSet::new();

    for task in tasks {
        debug!("starting {} task", task.name());
        join_set.spawn(task.run(cancellation_token.clone()));
    }

    while let Some(res) = join_set.join_next().await {
        // if task panicked, then will be Some(Err)
        // if task terminated w/ error, then will be Some(Ok(Err))
        // need to propagate errors in both cases

        match res {
            Err(err) => {
                cancellation_token.cancel();
                return Err(err).context("task failed");
            }
            Ok(Err(err)) => {
                cancellation_token.cancel();
                return Err(err).context("task terminated with error");
            }
            _ => {
                info!("exited task");
            }
        }
    }

    Ok(())
}
