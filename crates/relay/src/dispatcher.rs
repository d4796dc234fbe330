//! Message-Dispatcher – Routet ControlMessages an die richtigen Handler
//!
//! ## Zustandspruefung
//! Die Handler pruefen ueber `ChannelState`, ob eine Nachricht im aktuellen
//! Verbindungszustand erlaubt ist:
//! - `Hello` nur im Zustand `Connecting`
//! - `RoomJoin`, `RoomLeave`, `KeyRegister`, `KeyList` ab `Authenticated`
//! - `Publish` und `History` nur mit Mitgliedschaft im Raum

use coletiva_db::{EnvelopeRepository, PublicKeyRepository};
use coletiva_protocol::control::{jetzt_ms, ControlMessage, ControlPayload, ErrorCode};
use coletiva_protocol::ChannelState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::broadcast::VerbindungsId;
use crate::error::{RelayError, RelayResult};
use crate::handlers::{envelope_handler, key_handler, room_handler, session_handler};
use crate::server_state::RelayState;

/// Dispatcher-Kontext – Zustand der aktuellen Verbindung
pub struct DispatcherContext {
    pub verbindung: VerbindungsId,
    pub peer_addr: SocketAddr,
    pub zustand: ChannelState,
    /// Broadcast-Queue, gesetzt ab `Authenticated`
    pub broadcast_rx: Option<mpsc::Receiver<ControlMessage>>,
}

impl DispatcherContext {
    /// Kontext fuer eine frisch angenommene Verbindung (`Connecting`)
    pub fn neu(verbindung: VerbindungsId, peer_addr: SocketAddr) -> Self {
        Self {
            verbindung,
            peer_addr,
            zustand: ChannelState::Connecting,
            broadcast_rx: None,
        }
    }
}

/// Zentraler Message-Dispatcher
pub struct MessageDispatcher<R>
where
    R: EnvelopeRepository + PublicKeyRepository + 'static,
{
    state: Arc<RelayState<R>>,
}

impl<R> MessageDispatcher<R>
where
    R: EnvelopeRepository + PublicKeyRepository + 'static,
{
    pub fn neu(state: Arc<RelayState<R>>) -> Self {
        Self { state }
    }

    /// Verarbeitet eine eingehende ControlMessage und gibt die Antwort zurueck
    ///
    /// Gibt `None` zurueck wenn keine Antwort gesendet werden soll
    /// (Pong auf einen Relay-Ping).
    pub async fn dispatch(
        &self,
        message: ControlMessage,
        ctx: &mut DispatcherContext,
    ) -> Option<ControlMessage> {
        let request_id = message.request_id;
        let art = message.payload.art();
        self.state
            .metriken
            .requests_total
            .with_label_values(&[art])
            .inc();

        let ergebnis: RelayResult<ControlPayload> = match message.payload {
            ControlPayload::Hello(req) => session_handler::handle_hello(req, ctx, &self.state),
            ControlPayload::Logout => session_handler::handle_logout(ctx, &self.state),

            ControlPayload::RoomJoin(req) => room_handler::handle_join(req, ctx, &self.state),
            ControlPayload::RoomLeave(req) => room_handler::handle_leave(req, ctx, &self.state),

            ControlPayload::Publish(req) => {
                envelope_handler::handle_publish(req, ctx, &self.state).await
            }
            ControlPayload::History(req) => {
                envelope_handler::handle_history(req, ctx, &self.state).await
            }

            ControlPayload::KeyRegister(req) => {
                key_handler::handle_key_register(req, ctx, &self.state).await
            }
            ControlPayload::KeyList(req) => {
                key_handler::handle_key_list(req, ctx, &self.state).await
            }

            ControlPayload::Ping(ping) => {
                return Some(ControlMessage::pong(request_id, ping.timestamp_ms, jetzt_ms()));
            }
            ControlPayload::Pong(_) => return None,

            andere => Err(RelayError::ungueltig(format!(
                "'{}' wird vom Relay nicht angenommen",
                andere.art()
            ))),
        };

        Some(match ergebnis {
            Ok(payload) => ControlMessage::new(request_id, payload),
            Err(e) => {
                let code = e.fehler_code();
                if code == ErrorCode::InternalError {
                    tracing::error!(verbindung = ctx.verbindung, art, fehler = %e, "Anfrage fehlgeschlagen");
                } else {
                    tracing::debug!(verbindung = ctx.verbindung, art, fehler = %e, "Anfrage abgelehnt");
                }
                ControlMessage::error(request_id, code, e.to_string())
            }
        })
    }

    /// Cleanup beim Verbindungsende
    pub fn verbindung_aufraeumen(&self, ctx: &mut DispatcherContext) {
        session_handler::verbindung_abmelden(ctx, &self.state);
    }
}
