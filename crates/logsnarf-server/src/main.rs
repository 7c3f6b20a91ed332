// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, future::Future, io, sync::Arc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use logsnarf::{
    config::Config,
    credentials::FileFetcher,
    credentials_store::CredentialsStore,
    decoder::DecoderRegistry,
    influxdb::{build_client, HttpConnector},
    ingest::Ingestor,
    notifier::TracingNotifier,
    server,
    writer::Writer,
};

#[tokio::main]
pub async fn main() {
    let log_level = env::var("LOGSNARF_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,reqwest=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Error creating config on startup: {e}");
            return;
        }
    };

    let fetcher = match FileFetcher::from_path(&config.credentials_file) {
        Ok(fetcher) => fetcher,
        Err(e) => {
            error!(
                "Unable to load credentials from {}: {e}",
                config.credentials_file.display()
            );
            return;
        }
    };
    info!("Loaded {} credentials", fetcher.len());

    let client = match build_client(config.write_timeout) {
        Ok(client) => client,
        Err(e) => {
            error!("Unable to build HTTP client: {e}");
            return;
        }
    };

    let credentials = Arc::new(CredentialsStore::new(
        Arc::new(fetcher),
        config.credentials_cache_ttl,
        config.credentials_retry_delay,
    ));
    let writer = Arc::new(Writer::new(
        Arc::new(HttpConnector::new(client)),
        config.writer_config(),
        Arc::new(TracingNotifier),
    ));
    let ingestor = Arc::new(Ingestor::new(
        credentials,
        DecoderRegistry::default(),
        Arc::clone(&writer),
    ));

    let listener = match TcpListener::bind(config.bind_address()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Unable to bind {}: {e}", config.bind_address());
            return;
        }
    };

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    if let Err(e) = server::serve(listener, ingestor, config.max_body_size, shutdown).await {
        error!("Server error: {e}");
    }

    writer.shutdown().await;
    info!("Shutdown complete");
}

async fn wait_for_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    () = ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!("Unable to listen for SIGTERM: {e}");
                ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c().await;
    }
    info!("Received shutdown signal");
    shutdown.cancel();
}

async fn ctrl_c() {
    park_on_error(tokio::signal::ctrl_c()).await;
}

/// Never resolves if the listener could not be installed, so a broken
/// signal handler does not stop the server.
async fn park_on_error(signal: impl Future<Output = io::Result<()>>) {
    if let Err(e) = signal.await {
        error!("Unable to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}
