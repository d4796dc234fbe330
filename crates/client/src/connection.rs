//! Client-seitige TCP-Verbindung zum Relay
//!
//! Nutzt den FrameCodec aus coletiva-protocol fuer das Wire-Format
//! (u32 BE length + JSON payload). Ein Lese-Task ordnet Antworten ueber die
//! `request_id` den wartenden Anfragen zu, reiht Broadcasts in eine Queue
//! ein und beantwortet Pings des Relays. Ein Schreib-Task serialisiert alle
//! ausgehenden Nachrichten.
//!
//! Jede Anfrage ist durch `ClientConfig::anfrage_timeout` begrenzt. Ein
//! Publish ohne Antwort gilt als `Timeout`, nie als zugestellt.
//!
//! Der Lese-Task wartet nie auf die Broadcast-Queue. Laeuft sie ueber,
//! wird die Verbindung getrennt (wie die Verdraengung im Relay); bereits
//! eingereihte Broadcasts bleiben abholbar.

use coletiva_core::{ParticipantId, RoomId};
use coletiva_protocol::control::{
    jetzt_ms, ControlPayload, EnvelopeBroadcast, HelloRequest, HelloResponse, HistoryRequest,
    HistoryResponse, KeyListRequest, KeyRegisterRequest, PingMessage, PublicKeyEntry,
    PublishRequest, PublishResponse, RoomJoinRequest, RoomLeaveRequest,
};
use coletiva_protocol::{ChannelState, ControlCodec, ControlMessage, Envelope};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use crate::backoff::Backoff;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Wartende Anfragen: request_id -> Antwort-Kanal
type Offen = Arc<DashMap<u32, oneshot::Sender<ControlMessage>>>;

/// Verbindung zu einem Relay
pub struct RelayConnection {
    sende_tx: mpsc::Sender<ControlMessage>,
    offen: Offen,
    broadcasts: tokio::sync::Mutex<mpsc::Receiver<EnvelopeBroadcast>>,
    zustand: Arc<Mutex<ChannelState>>,
    naechste_id: AtomicU32,
    anfrage_timeout: Duration,
    client_version: String,
    tasks: Vec<JoinHandle<()>>,
}

impl RelayConnection {
    /// Baut eine TCP-Verbindung zum Relay auf (Zustand `Connecting`)
    pub async fn verbinden(addr: impl ToSocketAddrs, config: &ClientConfig) -> ClientResult<Self> {
        let stream = tokio::time::timeout(config.anfrage_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::Timeout { art: "connect" })??;
        let peer = stream.peer_addr()?;
        tracing::info!(relay = %peer, "TCP-Verbindung hergestellt");

        let mut zustand = ChannelState::default();
        zustand.verbinden()?;
        let zustand = Arc::new(Mutex::new(zustand));

        let codec = ControlCodec::with_max_size(config.max_frame_bytes);
        let (sink, stream) = Framed::new(stream, codec).split();
        let (sende_tx, sende_rx) = mpsc::channel::<ControlMessage>(64);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(config.broadcast_queue.max(1));
        let offen: Offen = Arc::new(DashMap::new());
        // Endet der Lese-Task, faellt `getrennt_tx` und der Schreib-Task schliesst den Socket
        let (getrennt_tx, getrennt_rx) = oneshot::channel::<()>();

        let schreiber = tokio::spawn(schreib_task(sink, sende_rx, getrennt_rx));
        let leser = tokio::spawn(lese_task(
            stream,
            Arc::clone(&offen),
            broadcast_tx,
            sende_tx.clone(),
            Arc::clone(&zustand),
            getrennt_tx,
        ));

        Ok(Self {
            sende_tx,
            offen,
            broadcasts: tokio::sync::Mutex::new(broadcast_rx),
            zustand,
            naechste_id: AtomicU32::new(1),
            anfrage_timeout: config.anfrage_timeout,
            client_version: config.client_version.clone(),
            tasks: vec![schreiber, leser],
        })
    }

    /// Wie `verbinden`, wiederholt aber wiederholbare Fehler mit Backoff
    ///
    /// Nach `max_versuche` Fehlschlaegen wird der letzte Fehler geliefert.
    pub async fn verbinden_mit_backoff<A>(
        addr: A,
        config: &ClientConfig,
        backoff: &mut Backoff,
        max_versuche: u32,
    ) -> ClientResult<Self>
    where
        A: ToSocketAddrs + Clone,
    {
        loop {
            match Self::verbinden(addr.clone(), config).await {
                Ok(verbindung) => {
                    backoff.zuruecksetzen();
                    return Ok(verbindung);
                }
                Err(e) if e.ist_wiederholbar() && backoff.versuche() + 1 < max_versuche => {
                    let warten = backoff.naechste_verzoegerung();
                    tracing::warn!(
                        fehler = %e,
                        versuch = backoff.versuche(),
                        warten_ms = warten.as_millis() as u64,
                        "Verbindung fehlgeschlagen, neuer Versuch"
                    );
                    tokio::time::sleep(warten).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Generiert die naechste Request-ID (0 ist dem Relay vorbehalten)
    fn naechste_id(&self) -> u32 {
        loop {
            let id = self.naechste_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    /// Sendet eine Anfrage und wartet auf die zugehoerige Antwort
    ///
    /// Error-Responses des Relays werden zu `ClientError::Relay`. Ist die
    /// Verbindung schon getrennt, kommt sofort `ChannelDisconnected`.
    pub async fn anfrage(&self, payload: ControlPayload) -> ClientResult<ControlPayload> {
        let art = payload.art();
        let request_id = self.naechste_id();
        let (tx, rx) = oneshot::channel();
        self.offen.insert(request_id, tx);

        // Erst nach dem Eintragen pruefen: der Lese-Task setzt den Zustand
        // vor dem Leeren der Tabelle
        if !self.ist_verbunden() {
            self.offen.remove(&request_id);
            return Err(ClientError::getrennt("Verbindung zum Relay beendet"));
        }

        if self
            .sende_tx
            .send(ControlMessage::new(request_id, payload))
            .await
            .is_err()
        {
            self.offen.remove(&request_id);
            return Err(ClientError::getrennt("Schreib-Task beendet"));
        }

        let antwort = match tokio::time::timeout(self.anfrage_timeout, rx).await {
            Ok(Ok(antwort)) => antwort,
            Ok(Err(_)) => return Err(ClientError::getrennt("Verbindung vom Relay getrennt")),
            Err(_) => {
                self.offen.remove(&request_id);
                tracing::warn!(art, request_id, "Keine Antwort vom Relay");
                return Err(ClientError::Timeout { art });
            }
        };

        match antwort.payload {
            ControlPayload::Error(e) => Err(ClientError::Relay {
                code: e.code,
                message: e.message,
            }),
            payload => Ok(payload),
        }
    }

    /// Handshake mit der Identitaet vom Session-Provider
    pub async fn hallo(&self, participant: &ParticipantId) -> ClientResult<HelloResponse> {
        let antwort = self
            .anfrage(ControlPayload::Hello(HelloRequest {
                participant_id: participant.clone(),
                client_version: self.client_version.clone(),
            }))
            .await?;

        match antwort {
            ControlPayload::HelloResponse(resp) => {
                self.zustand.lock().authentifizieren(resp.participant_id.clone())?;
                tracing::info!(
                    participant = %resp.participant_id,
                    session_id = resp.session_id,
                    relay = %resp.server_name,
                    "Am Relay angemeldet"
                );
                Ok(resp)
            }
            andere => Err(unerwartet("HelloResponse", &andere)),
        }
    }

    /// Tritt einem Raum bei (nur `Authenticated`/`Joined`, idempotent)
    pub async fn beitreten(&self, room_id: &RoomId) -> ClientResult<usize> {
        if !self.zustand.lock().ist_authentifiziert() {
            return Err(ClientError::getrennt("Beitritt ohne Anmeldung"));
        }

        let antwort = self
            .anfrage(ControlPayload::RoomJoin(RoomJoinRequest {
                room_id: room_id.clone(),
            }))
            .await?;

        match antwort {
            ControlPayload::RoomJoinResponse(resp) => {
                self.zustand.lock().beitreten(room_id.clone())?;
                Ok(resp.mitglieder)
            }
            andere => Err(unerwartet("RoomJoinResponse", &andere)),
        }
    }

    /// Verlaesst einen Raum; ohne Mitgliedschaft ein No-op
    pub async fn verlassen(&self, room_id: &RoomId) -> ClientResult<bool> {
        {
            let zustand = self.zustand.lock();
            if !zustand.ist_authentifiziert() {
                return Err(ClientError::getrennt("Verlassen ohne Anmeldung"));
            }
            if !zustand.ist_beigetreten(room_id) {
                return Ok(false);
            }
        }

        let antwort = self
            .anfrage(ControlPayload::RoomLeave(RoomLeaveRequest {
                room_id: room_id.clone(),
            }))
            .await?;

        match antwort {
            ControlPayload::RoomLeaveResponse(resp) => {
                self.zustand.lock().verlassen(room_id)?;
                Ok(resp.war_beigetreten)
            }
            andere => Err(unerwartet("RoomLeaveResponse", &andere)),
        }
    }

    /// Veroeffentlicht einen Envelope (nur `Joined(raum)`)
    pub async fn veroeffentlichen(
        &self,
        room_id: &RoomId,
        envelope: Envelope,
    ) -> ClientResult<PublishResponse> {
        self.zustand.lock().darf_veroeffentlichen(room_id)?;

        let antwort = self
            .anfrage(ControlPayload::Publish(PublishRequest {
                room_id: room_id.clone(),
                envelope,
            }))
            .await?;

        match antwort {
            ControlPayload::PublishResponse(resp) => Ok(resp),
            andere => Err(unerwartet("PublishResponse", &andere)),
        }
    }

    /// Laedt eine Seite gespeicherter Envelopes eines Raums (aelteste zuerst)
    ///
    /// `before_seq` ist `weitere_vor` der vorigen Seite.
    pub async fn history(
        &self,
        room_id: &RoomId,
        before_seq: Option<i64>,
        limit: Option<u32>,
    ) -> ClientResult<HistoryResponse> {
        let antwort = self
            .anfrage(ControlPayload::History(HistoryRequest {
                room_id: room_id.clone(),
                before_seq,
                limit,
            }))
            .await?;

        match antwort {
            ControlPayload::HistoryResponse(resp) => Ok(resp),
            andere => Err(unerwartet("HistoryResponse", &andere)),
        }
    }

    /// Registriert einen Base64-kodierten Public Key
    pub async fn schluessel_registrieren(
        &self,
        participant: &ParticipantId,
        public_key: String,
    ) -> ClientResult<()> {
        let antwort = self
            .anfrage(ControlPayload::KeyRegister(KeyRegisterRequest {
                participant_id: participant.clone(),
                public_key,
            }))
            .await?;

        match antwort {
            ControlPayload::KeyRegisterResponse { .. } => Ok(()),
            andere => Err(unerwartet("KeyRegisterResponse", &andere)),
        }
    }

    /// Listet Register-Eintraege (optional gefiltert)
    pub async fn schluessel_auflisten(
        &self,
        filter: Option<&[ParticipantId]>,
    ) -> ClientResult<Vec<PublicKeyEntry>> {
        let antwort = self
            .anfrage(ControlPayload::KeyList(KeyListRequest {
                participants: filter.map(<[ParticipantId]>::to_vec),
            }))
            .await?;

        match antwort {
            ControlPayload::KeyListResponse(resp) => Ok(resp.entries),
            andere => Err(unerwartet("KeyListResponse", &andere)),
        }
    }

    /// Misst die Round-Trip-Time zum Relay
    pub async fn ping(&self) -> ClientResult<Duration> {
        let gesendet = jetzt_ms();
        let antwort = self
            .anfrage(ControlPayload::Ping(PingMessage {
                timestamp_ms: gesendet,
            }))
            .await?;

        match antwort {
            ControlPayload::Pong(pong) => Ok(Duration::from_millis(
                jetzt_ms().saturating_sub(pong.echo_timestamp_ms),
            )),
            andere => Err(unerwartet("Pong", &andere)),
        }
    }

    /// Naechster Broadcast in Empfangsreihenfolge
    ///
    /// `None` wenn die Verbindung getrennt ist und die Queue leer.
    pub async fn naechster_broadcast(&self) -> Option<EnvelopeBroadcast> {
        self.broadcasts.lock().await.recv().await
    }

    /// Abmelden; die TCP-Verbindung bleibt offen
    pub async fn abmelden(&self) -> ClientResult<()> {
        match self.anfrage(ControlPayload::Logout).await? {
            ControlPayload::LogoutResponse => {
                let mut zustand = self.zustand.lock();
                zustand.trennen();
                zustand.verbinden()?;
                Ok(())
            }
            andere => Err(unerwartet("LogoutResponse", &andere)),
        }
    }

    /// Aktueller Zustand (Kopie)
    pub fn zustand(&self) -> ChannelState {
        self.zustand.lock().clone()
    }

    pub fn ist_verbunden(&self) -> bool {
        !matches!(*self.zustand.lock(), ChannelState::Disconnected)
    }
}

impl Drop for RelayConnection {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn unerwartet(erwartet: &str, erhalten: &ControlPayload) -> ClientError {
    ClientError::UnerwarteteAntwort(format!("Erwartet {erwartet}, erhalten: {}", erhalten.art()))
}

// ---------------------------------------------------------------------------
// Hintergrund-Tasks
// ---------------------------------------------------------------------------

async fn schreib_task(
    mut sink: futures_util::stream::SplitSink<Framed<TcpStream, ControlCodec>, ControlMessage>,
    mut sende_rx: mpsc::Receiver<ControlMessage>,
    mut getrennt_rx: oneshot::Receiver<()>,
) {
    loop {
        let nachricht = tokio::select! {
            nachricht = sende_rx.recv() => match nachricht {
                Some(n) => n,
                None => break,
            },
            _ = &mut getrennt_rx => break,
        };
        if let Err(e) = sink.send(nachricht).await {
            tracing::warn!(fehler = %e, "Senden an Relay fehlgeschlagen");
            break;
        }
    }
    let _ = sink.close().await;
}

async fn lese_task(
    mut stream: futures_util::stream::SplitStream<Framed<TcpStream, ControlCodec>>,
    offen: Offen,
    broadcast_tx: mpsc::Sender<EnvelopeBroadcast>,
    sende_tx: mpsc::Sender<ControlMessage>,
    zustand: Arc<Mutex<ChannelState>>,
    _getrennt_tx: oneshot::Sender<()>,
) {
    while let Some(frame) = stream.next().await {
        let nachricht = match frame {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(fehler = %e, "Frame-Lesefehler");
                break;
            }
        };

        match nachricht.payload {
            ControlPayload::Ping(ping) if nachricht.request_id == 0 => {
                let pong = ControlMessage::pong(0, ping.timestamp_ms, jetzt_ms());
                if sende_tx.send(pong).await.is_err() {
                    break;
                }
            }
            ControlPayload::Broadcast(broadcast) => match broadcast_tx.try_send(broadcast) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(verworfen)) => {
                    tracing::warn!(
                        room_id = %verworfen.room_id,
                        envelope_id = %verworfen.envelope.id,
                        "Broadcast-Queue voll, Verbindung wird getrennt"
                    );
                    break;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!("Broadcast-Empfaenger geschlossen");
                }
            },
            ControlPayload::Error(ref e) if nachricht.request_id == 0 => {
                tracing::warn!(code = ?e.code, meldung = %e.message, "Relay meldet Fehler");
            }
            _ => match offen.remove(&nachricht.request_id) {
                Some((_, tx)) => {
                    let _ = tx.send(nachricht);
                }
                None => {
                    tracing::debug!(
                        request_id = nachricht.request_id,
                        art = nachricht.payload.art(),
                        "Antwort ohne wartende Anfrage verworfen"
                    );
                }
            },
        }
    }

    // Alle Wartenden erhalten `ChannelDisconnected`
    zustand.lock().trennen();
    offen.clear();
    tracing::info!("Verbindung zum Relay beendet");
}
