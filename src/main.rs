mod completion_detector;
mod config;
mod credentials;
mod dir_watcher;
mod oauth;
mod upload_request;
mod utilities;
mod youtube_uploader;

use anyhow::Result;
use log::{error, info};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::completion_detector::CompletionDetector;
use crate::config::{ClientSecrets, Config, ConfigError};
use crate::credentials::CachedCredentials;
use crate::dir_watcher::DirWatcher;
use crate::oauth::{BrowserAuthorizer, OAuthClient};
use crate::utilities::format_duration;
use crate::youtube_uploader::YouTubeUploader;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::overrides_from_env()
        .and_then(|(watch_dir, interval)| Config::new(watch_dir, interval))
    {
        Ok(config) => config,
        Err(e @ ConfigError::MissingEnv(_)) => {
            error!("{}", e);
            error!("{}", ClientSecrets::setup_hint());
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    info!("Starting recording uploader...");
    info!("Watching directory: {}", config.watch_dir.display());

    let oauth = OAuthClient::new(config.client.clone());
    let credentials = CachedCredentials::new(
        config.token_file.clone(),
        oauth,
        Box::new(BrowserAuthorizer::new(config.auth_timeout)),
    );
    let uploader = YouTubeUploader::new(Arc::new(credentials)).with_privacy(config.privacy);

    let (watcher, events) = DirWatcher::watch(&config.watch_dir)?;
    let (ready_tx, ready_rx) = mpsc::channel(4);

    let detection = tokio::spawn(CompletionDetector::new().run(
        config.check_interval,
        events,
        ready_tx,
    ));
    let uploads = tokio::spawn(uploader.run(ready_rx));

    info!(
        "File watcher started on {}, checking every {}. Press Ctrl+C to stop...",
        watcher.root().display(),
        format_duration(config.check_interval)
    );

    tokio::signal::ctrl_c().await?;
    info!("Stopping recording uploader...");

    drop(watcher);
    detection.abort();
    uploads.abort();
    info!("Stopped.");
    Ok(())
}
