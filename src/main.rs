use std::sync::Arc;

use ffmpeg_relay::FfmpegSpawner;
use tokio_util::sync::CancellationToken;

use crate::{
    handler::AppState,
    session::{EncoderSettings, SessionController},
};

mod api;
mod config;
mod handler;
mod session;

fn init_logging() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info,streamforge=debug,ffmpeg_relay=debug"),
    )
    .init();
}

#[tokio::main]
async fn main() -> ! {
    // loads .env first so RUST_LOG may come from there
    let config = config::init();
    init_logging();
    let config = config.unwrap_or_else(|e| {
        log::error!("Error loading configuration: {:#}", e);
        std::process::exit(1);
    });

    match ffmpeg_relay::probe(config.ffmpeg_path()).await {
        Ok(version) => log::info!("using {}", version),
        Err(e) => log::warn!("{:#}; streams will fail to start", e),
    }

    let controller = Arc::new(SessionController::new(
        Arc::new(FfmpegSpawner),
        EncoderSettings::from(config),
    ));
    let state = AppState::new(Arc::clone(&controller), config.clone());

    let cancel = CancellationToken::new();

    let cancel_clone = cancel.clone();
    let server = match api::start_api_server(config.listen(), state, cancel_clone).await {
        Ok((_, server)) => server,
        Err(e) => {
            log::error!("Error starting API server: {:#}", e);
            std::process::exit(1);
        }
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
            },
        }
    }

    controller.shutdown().await;
    if let Err(e) = server.await {
        log::error!("API server task failed: {}", e);
    }

    std::process::exit(0);
}
