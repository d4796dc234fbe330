//! TCP-Listener – Bindet Socket, akzeptiert Verbindungen
//!
//! Der `RelayServer` bindet einen TCP-Socket und startet fuer jede
//! eingehende Verbindung einen eigenen Task mit einer `ClientConnection`.
//!
//! ## Concurrency-Modell
//! Die Repository-Traits verwenden async fn ohne Send-Garantie
//! (async_fn_in_trait), daher laufen alle Verbindungs-Tasks in einer
//! `tokio::task::LocalSet` auf dem Thread des Aufrufers.

use coletiva_db::{EnvelopeRepository, PublicKeyRepository};
use coletiva_protocol::{ControlCodec, ControlMessage};
use futures_util::SinkExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinSet, LocalSet};
use tokio_util::codec::Framed;

use crate::connection::ClientConnection;
use crate::error::{RelayError, RelayResult};
use crate::server_state::RelayState;

/// Wie lange offene Verbindungen beim Shutdown noch Zeit bekommen
const SHUTDOWN_FRIST: Duration = Duration::from_secs(5);

/// TCP-Relay-Server
pub struct RelayServer<R>
where
    R: EnvelopeRepository + PublicKeyRepository + 'static,
{
    state: Arc<RelayState<R>>,
    listener: TcpListener,
}

impl<R> RelayServer<R>
where
    R: EnvelopeRepository + PublicKeyRepository + 'static,
{
    /// Bindet den TCP-Socket (Port 0 waehlt einen freien Port)
    pub async fn binden(state: Arc<RelayState<R>>, bind_addr: SocketAddr) -> RelayResult<Self> {
        let listener = TcpListener::bind(bind_addr).await?;
        Ok(Self { state, listener })
    }

    /// Tatsaechlich gebundene Adresse
    pub fn lokale_adresse(&self) -> RelayResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Akzeptiert Verbindungen bis `shutdown_rx` ein `true`-Signal empfaengt
    pub async fn starten(self, shutdown_rx: watch::Receiver<bool>) -> RelayResult<()> {
        let local = LocalSet::new();
        local.run_until(self.accept_loop(shutdown_rx)).await
    }

    /// Interne Accept-Loop (laeuft innerhalb der LocalSet)
    async fn accept_loop(self, mut shutdown_rx: watch::Receiver<bool>) -> RelayResult<()> {
        let lokale_addr = self.listener.local_addr()?;
        tracing::info!(adresse = %lokale_addr, "TCP Relay gestartet");

        let mut verbindungen = JoinSet::new();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            if self.state.verbindungen() >= u64::from(self.state.config.max_clients) {
                                tracing::warn!(
                                    peer = %peer_addr,
                                    max = self.state.config.max_clients,
                                    "Server voll – Verbindung abgelehnt"
                                );
                                verbindungen.spawn_local(async move {
                                    let fehler = RelayError::ServerVoll;
                                    let mut framed = Framed::new(stream, ControlCodec::new());
                                    let _ = framed
                                        .send(ControlMessage::error(0, fehler.fehler_code(), fehler.to_string()))
                                        .await;
                                });
                                continue;
                            }

                            tracing::debug!(peer = %peer_addr, "Verbindung akzeptiert");

                            let verbindung = ClientConnection::neu(Arc::clone(&self.state), peer_addr);
                            let shutdown_rx_clone = shutdown_rx.clone();

                            // Lokaler Task – kein Send erforderlich
                            verbindungen.spawn_local(async move {
                                verbindung.verarbeiten(stream, shutdown_rx_clone).await;
                            });
                        }
                        Err(e) => {
                            tracing::error!(fehler = %e, "TCP-Accept-Fehler");
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                }

                // Beendete Verbindungs-Tasks einsammeln
                Some(_) = verbindungen.join_next(), if !verbindungen.is_empty() => {}

                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Relay: Shutdown-Signal empfangen");
                        break;
                    }
                }
            }
        }

        // Verbindungen senden ihre Abschiedsnachricht und beenden sich
        let abschluss = async { while verbindungen.join_next().await.is_some() {} };
        if tokio::time::timeout(SHUTDOWN_FRIST, abschluss).await.is_err() {
            tracing::warn!(offen = verbindungen.len(), "Verbindungen nach Frist abgebrochen");
            verbindungen.abort_all();
        }

        tracing::info!("TCP Relay gestoppt");
        Ok(())
    }
}
