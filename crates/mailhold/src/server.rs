//! The `serve` command: one accept loop per enabled protocol.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use mailhold_core::net::{self, ServeOptions};
use mailhold_core::{Config, DeliveryPipeline, Directory, MailStore, Shutdown};
use mailhold_imap::{ImapServer, ImapSettings};
use mailhold_pop3::{Pop3Server, Pop3Settings};
use mailhold_smtp::{SmtpServer, SmtpSettings};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Opens the configured database, creating its directory if needed.
pub async fn open_store(config: &Config) -> Result<MailStore> {
    if let Some(parent) = config.database.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let path = config
        .database
        .to_str()
        .context("database path is not valid UTF-8")?;
    MailStore::new(path)
        .await
        .with_context(|| format!("opening database {path}"))
}

/// Runs every enabled listener until Ctrl-C or SIGTERM.
pub async fn run(config: Config) -> Result<()> {
    config.validate().context("invalid configuration")?;

    let store = open_store(&config).await?;
    let directory = Directory::new(store.clone());
    let pipeline = DeliveryPipeline::new(store.clone(), directory.clone(), config.delivery_policy());
    let (trigger, shutdown) = Shutdown::channel();
    let grace = Duration::from_secs(config.shutdown_grace_secs);
    let mut listeners = JoinSet::new();

    if config.smtp.enabled {
        let listener = bind(&config.host, config.smtp.port, "SMTP").await?;
        let server = SmtpServer::new(
            SmtpSettings::from_config(&config),
            directory.clone(),
            pipeline.clone(),
        );
        let options = ServeOptions {
            max_connections: config.smtp.max_connections,
            grace,
        };
        listeners.spawn(net::serve(
            listener,
            shutdown.clone(),
            options,
            move |stream, peer, shutdown| {
                let server = server.clone();
                async move { server.handle(stream, peer, shutdown).await }
            },
        ));
    }

    if config.imap.enabled {
        let listener = bind(&config.host, config.imap.port, "IMAP").await?;
        let server = ImapServer::new(
            ImapSettings::from_config(&config),
            store.clone(),
            directory.clone(),
        );
        let options = ServeOptions {
            max_connections: config.imap.max_connections,
            grace,
        };
        listeners.spawn(net::serve(
            listener,
            shutdown.clone(),
            options,
            move |stream, peer, shutdown| {
                let server = server.clone();
                async move { server.handle(stream, peer, shutdown).await }
            },
        ));
    }

    if config.pop3.enabled {
        let listener = bind(&config.host, config.pop3.port, "POP3").await?;
        let server = Pop3Server::new(Pop3Settings::from_config(&config), store, directory);
        let options = ServeOptions {
            max_connections: config.pop3.max_connections,
            grace,
        };
        listeners.spawn(net::serve(
            listener,
            shutdown.clone(),
            options,
            move |stream, peer, shutdown| {
                let server = server.clone();
                async move { server.handle(stream, peer, shutdown).await }
            },
        ));
    }

    if listeners.is_empty() {
        bail!("no protocol is enabled");
    }
    info!("{} ready for {}", config.hostname, config.delivery.local_domains.join(", "));

    shutdown_signal().await;
    info!("Shutdown requested; draining sessions for up to {}s", grace.as_secs());
    trigger.trigger();

    while let Some(result) = listeners.join_next().await {
        if let Err(e) = result {
            error!("Listener task failed: {e}");
        }
    }
    info!("mailhold stopped");
    Ok(())
}

async fn bind(host: &str, port: u16, protocol: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind((host, port))
        .await
        .with_context(|| format!("binding {protocol} listener to {host}:{port}"))?;
    info!("{protocol} server listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Completes on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
