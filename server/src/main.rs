//! Coletiva Relay – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet den Server.

use anyhow::Result;
use coletiva_observability::logging_initialisieren;
use coletiva_server::{config::ServerConfig, Server};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad = std::env::var("COLETIVA_CONFIG").unwrap_or_else(|_| "coletiva.toml".into());

    // Konfiguration laden (Standardwerte falls Datei fehlt)
    let config = ServerConfig::laden(&config_pfad)?;

    logging_initialisieren(&config.logging.level, &config.logging.format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        "Coletiva Relay wird initialisiert"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(fehler = %e, "Signal-Handler nicht verfuegbar");
            return;
        }
        tracing::info!("Shutdown-Signal empfangen, Server wird beendet");
        let _ = shutdown_tx.send(true);
    });

    let server = Server::vorbereiten(config).await?;
    server.laufen(shutdown_rx).await?;

    Ok(())
}
