use std::sync::Arc;

use tokio::sync::broadcast;

use mailalive::{
    AppState, Config, ImapInbox, MailSender, Metrics, MetricsServer, Periodic, Shutdown,
    StatusCache, logging,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let config = Config::load(&config_path)?;

    let metrics = Arc::new(Metrics::new()?);
    let sender = MailSender::new(config.mailgun.clone());
    let inbox = ImapInbox::new(config.imap.clone(), metrics.deletions.clone());
    let cache = Arc::new(StatusCache::new(Arc::new(inbox), metrics.imap_errors()));

    let (shutdown, _) = broadcast::channel(1);

    let mailgun_errors = metrics.mailgun_errors();
    tokio::spawn(
        Periodic::new("probe-send", config.send_interval()).run(shutdown.subscribe(), move || {
            let sender = sender.clone();
            let errors = mailgun_errors.clone();
            async move {
                tracing::info!("sending probe message");
                if let Err(err) = sender.send_probe().await {
                    tracing::error!(error = %err, "failed to send probe message");
                    errors.inc();
                }
            }
        }),
    );

    let flush_cache = Arc::clone(&cache);
    tokio::spawn(
        Periodic::new("cache-flush", config.flush_interval()).run(shutdown.subscribe(), move || {
            let cache = Arc::clone(&flush_cache);
            async move {
                cache.clear().await;
            }
        }),
    );

    let server = MetricsServer::bind(&config.listen, AppState { cache, metrics }).await?;

    let shutdown_tx = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            let _ = shutdown_tx.send(Shutdown);
        }
    });

    server.serve(shutdown.subscribe()).await?;

    Ok(())
}
