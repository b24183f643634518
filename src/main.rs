use anyhow::Context;
use clap::{Arg, Command, value_parser};
use emocast::capture::{SyntheticAudioSource, SyntheticVideoSource};
use emocast::config::StreamConfig;
use emocast::pipeline::StreamCoordinator;
use emocast::transport::WebSocketConnector;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let matches = Command::new(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("url")
                .short('u')
                .long("url")
                .value_name("URL")
                .help("WebSocket endpoint of the analysis service (ws:// or wss://)."),
        )
        .arg(
            Arg::new("token")
                .short('t')
                .long("token")
                .value_name("TOKEN")
                .help("Bearer token sent with the upgrade request."),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file; flags override its values."),
        )
        .arg(
            Arg::new("seconds")
                .short('s')
                .long("seconds")
                .value_name("SECONDS")
                .value_parser(value_parser!(u64))
                .help("Stop after this many seconds instead of waiting for Ctrl-C."),
        )
        .get_matches();

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => StreamConfig::load(path)?,
        None => StreamConfig::default(),
    };
    if let Some(url) = matches.get_one::<String>("url") {
        config.server_url = url.clone();
    }
    if let Some(token) = matches.get_one::<String>("token") {
        config.auth_token = Some(token.clone());
    }
    let run_for = matches.get_one::<u64>("seconds").map(|s| Duration::from_secs(*s));

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    ctrlc::set_handler(move || signal.cancel()).context("setting Ctrl-C handler")?;

    let coordinator = StreamCoordinator::new(config.clone(), Arc::new(WebSocketConnector::new()));
    coordinator.set_video_source(Box::new(SyntheticVideoSource::new(
        config.video.width,
        config.video.height,
        config.video.fps,
    )))?;
    coordinator.set_audio_source(Box::new(SyntheticAudioSource::with_tone(
        config.audio.input.sample_rate,
        440.0,
        4096,
    )))?;
    coordinator.set_on_result(|snapshot| {
        log::info!(
            "Result: {} (dominant: {}, scores: {:?})",
            snapshot.emotion_result,
            snapshot.dominant_emotion,
            snapshot.emotion_scores
        );
    });

    coordinator
        .connect()
        .await
        .with_context(|| format!("connecting to {}", config.server_url))?;
    coordinator.start();

    let deadline = async {
        match run_for {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    let mut status = coordinator.subscribe_status();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                log::info!("Interrupted, shutting down");
                break;
            }
            _ = &mut deadline => {
                log::info!("Run time elapsed, shutting down");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                log::info!("Connection: {}", *status.borrow_and_update());
            }
        }
    }

    coordinator.stop();
    coordinator.disconnect();
    log::info!("{}", coordinator.health().summary());
    Ok(())
}
