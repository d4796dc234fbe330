//! Client-Connection – Verwaltet eine einzelne TCP-Verbindung
//!
//! Jede TCP-Verbindung bekommt eine `ClientConnection` in einem eigenen
//! lokalen Task. Antworten gehen direkt auf den Stream, Broadcasts kommen
//! ueber die Queue aus dem `RoomBroadcaster`.
//!
//! ## Keepalive
//! - Relay sendet alle `keepalive_sek` einen Ping
//! - Kommt `verbindungs_timeout_sek` lang kein Frame, wird getrennt
//!
//! ## Verdraengung
//! Schliesst der Broadcaster die Queue (Ueberlauf), werden die noch
//! eingereihten Broadcasts ausgeliefert, dann ein Fehler gesendet und die
//! Verbindung getrennt.

use coletiva_db::{EnvelopeRepository, PublicKeyRepository};
use coletiva_protocol::control::{jetzt_ms, ControlMessage, ErrorCode};
use coletiva_protocol::ControlCodec;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_util::codec::Framed;

use crate::dispatcher::{DispatcherContext, MessageDispatcher};
use crate::server_state::RelayState;

/// Verarbeitet eine einzelne TCP-Verbindung
pub struct ClientConnection<R>
where
    R: EnvelopeRepository + PublicKeyRepository + 'static,
{
    state: Arc<RelayState<R>>,
    peer_addr: SocketAddr,
}

impl<R> ClientConnection<R>
where
    R: EnvelopeRepository + PublicKeyRepository + 'static,
{
    pub fn neu(state: Arc<RelayState<R>>, peer_addr: SocketAddr) -> Self {
        Self { state, peer_addr }
    }

    /// Startet die Verbindungs-Verarbeitungsschleife
    ///
    /// Laeuft bis die Verbindung getrennt wird oder ein Shutdown-Signal
    /// eingeht.
    pub async fn verarbeiten(self, stream: TcpStream, mut shutdown_rx: watch::Receiver<bool>) {
        let peer_addr = self.peer_addr;
        let keepalive_intervall = Duration::from_secs(self.state.config.keepalive_sek.max(1));
        let timeout_dauer = Duration::from_secs(self.state.config.verbindungs_timeout_sek);

        let verbindung = self.state.naechste_verbindungs_id();
        self.state.verbindung_geoeffnet();
        tracing::info!(peer = %peer_addr, verbindung, "Neue Verbindung");

        let mut framed = Framed::new(
            stream,
            ControlCodec::with_max_size(self.state.config.max_frame_bytes),
        );
        let mut ctx = DispatcherContext::neu(verbindung, peer_addr);
        let dispatcher = MessageDispatcher::neu(Arc::clone(&self.state));

        let mut letzter_empfang = Instant::now();
        let mut naechster_ping = Instant::now() + keepalive_intervall;

        loop {
            let jetzt = Instant::now();

            if jetzt.duration_since(letzter_empfang) > timeout_dauer {
                tracing::warn!(peer = %peer_addr, verbindung, "Verbindungs-Timeout");
                break;
            }

            let ping_verzoegerung = if jetzt < naechster_ping {
                naechster_ping.duration_since(jetzt)
            } else {
                Duration::from_millis(1)
            };

            tokio::select! {
                // Eingehende Nachricht vom Client
                frame = framed.next() => {
                    match frame {
                        Some(Ok(nachricht)) => {
                            letzter_empfang = Instant::now();
                            tracing::trace!(
                                verbindung,
                                request_id = nachricht.request_id,
                                art = nachricht.payload.art(),
                                "Nachricht empfangen"
                            );

                            if let Some(antwort) = dispatcher.dispatch(nachricht, &mut ctx).await {
                                let request_id = antwort.request_id;
                                match framed.send(antwort).await {
                                    Ok(()) => {}
                                    // Kodierfehler: nichts geschrieben, Verbindung bleibt nutzbar
                                    Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                                        tracing::warn!(verbindung, request_id, fehler = %e, "Antwort nicht kodierbar");
                                        let ersatz = ControlMessage::error(
                                            request_id,
                                            ErrorCode::InternalError,
                                            "Antwort ueberschreitet die Frame-Groesse",
                                        );
                                        if framed.send(ersatz).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        tracing::warn!(verbindung, fehler = %e, "Senden fehlgeschlagen");
                                        break;
                                    }
                                }
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(verbindung, fehler = %e, "Frame-Lesefehler");
                            break;
                        }
                        None => {
                            tracing::info!(verbindung, "Verbindung vom Client getrennt");
                            break;
                        }
                    }
                }

                // Broadcast aus dem Raum
                ausgehend = naechster_broadcast(&mut ctx.broadcast_rx) => {
                    match ausgehend {
                        Some(nachricht) => {
                            if let Err(e) = framed.send(nachricht).await {
                                tracing::warn!(verbindung, fehler = %e, "Broadcast-Senden fehlgeschlagen");
                                break;
                            }
                        }
                        None => {
                            tracing::warn!(verbindung, "Send-Queue uebergelaufen – Verbindung wird getrennt");
                            let abschied = ControlMessage::error(
                                0,
                                ErrorCode::InternalError,
                                "Send-Queue uebergelaufen, bitte neu verbinden",
                            );
                            let _ = framed.send(abschied).await;
                            break;
                        }
                    }
                }

                // Keepalive-Ping
                _ = tokio::time::sleep(ping_verzoegerung) => {
                    if jetzt >= naechster_ping {
                        if let Err(e) = framed.send(ControlMessage::ping(0, jetzt_ms())).await {
                            tracing::warn!(verbindung, fehler = %e, "Ping-Senden fehlgeschlagen");
                            break;
                        }
                        naechster_ping = Instant::now() + keepalive_intervall;
                    }
                }

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!(verbindung, "Shutdown-Signal – Verbindung wird getrennt");
                        let abschied = ControlMessage::error(
                            0,
                            ErrorCode::InternalError,
                            "Relay wird heruntergefahren",
                        );
                        let _ = framed.send(abschied).await;
                        break;
                    }
                }
            }
        }

        dispatcher.verbindung_aufraeumen(&mut ctx);
        self.state.verbindung_geschlossen();
        tracing::info!(peer = %peer_addr, verbindung, "Verbindungs-Task beendet");
    }
}

/// Naechster Broadcast; ohne Queue (nicht authentifiziert) wartet es ewig
async fn naechster_broadcast(
    rx: &mut Option<mpsc::Receiver<ControlMessage>>,
) -> Option<ControlMessage> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
