//! Gemeinsamer Relay-Zustand
//!
//! Haelt alle geteilten Services und Zustands-Manager als Arc-Referenzen,
//! die sicher zwischen tokio-Tasks geteilt werden koennen.

use coletiva_chat::{EnvelopeLimits, EnvelopeService, KeyRegistryService};
use coletiva_core::RoomId;
use coletiva_db::{EnvelopeRepository, PublicKeyRepository};
use coletiva_observability::RelayMetrics;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use crate::broadcast::{RoomBroadcaster, VerbindungsId, SEND_QUEUE_GROESSE};

/// Konfiguration fuer das Relay
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Anzeigename des Relays (im HelloResponse)
    pub server_name: String,
    /// Maximale gleichzeitige Verbindungen
    pub max_clients: u32,
    /// Keepalive-Intervall in Sekunden
    pub keepalive_sek: u64,
    /// Timeout fuer inaktive Verbindungen in Sekunden
    pub verbindungs_timeout_sek: u64,
    /// Maximale Frame-Groesse auf dem Draht
    pub max_frame_bytes: usize,
    /// Groesse der Broadcast-Queue pro Verbindung
    pub send_queue_groesse: usize,
    /// Grenzen fuer gespeicherte Envelopes
    pub limits: EnvelopeLimits,
}

/// Platz im Frame fuer alles ausser den Envelopes einer History-Antwort
const HISTORY_RAHMEN_RESERVE: usize = 4 * 1024;

impl RelayConfig {
    /// Byte-Budget fuer die Envelopes einer History-Antwort
    pub fn history_budget(&self) -> usize {
        self.max_frame_bytes.saturating_sub(HISTORY_RAHMEN_RESERVE)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server_name: "Coletiva Relay".to_string(),
            max_clients: 512,
            keepalive_sek: 30,
            verbindungs_timeout_sek: 90,
            max_frame_bytes: coletiva_protocol::wire::DEFAULT_MAX_FRAME_SIZE,
            send_queue_groesse: SEND_QUEUE_GROESSE,
            limits: EnvelopeLimits::default(),
        }
    }
}

/// Gemeinsamer Relay-Zustand (Arc-geteilt)
pub struct RelayState<R>
where
    R: EnvelopeRepository + PublicKeyRepository + 'static,
{
    /// Relay-Konfiguration
    pub config: Arc<RelayConfig>,
    /// Envelope-Speicher (Persistenz, History)
    pub envelopes: Arc<EnvelopeService<R>>,
    /// Public-Key-Register
    pub schluessel: Arc<KeyRegistryService<R>>,
    /// Verbindungstabelle und Raum-Mitgliedschaften
    pub broadcaster: RoomBroadcaster,
    /// Prometheus-Metriken
    pub metriken: RelayMetrics,
    /// Startzeitpunkt des Relays
    pub start_time: Instant,
    /// Ein Lock pro Raum, gehalten ueber Persistenz und Fan-Out
    sequencer: DashMap<RoomId, Arc<Mutex<()>>>,
    naechste_verbindung: AtomicU64,
    verbindungen: AtomicU64,
}

impl<R> RelayState<R>
where
    R: EnvelopeRepository + PublicKeyRepository + 'static,
{
    /// Erstellt einen neuen RelayState
    pub fn neu(config: RelayConfig, db: Arc<R>, metriken: RelayMetrics) -> Arc<Self> {
        let envelopes = EnvelopeService::neu(Arc::clone(&db), config.limits.clone());
        let schluessel = KeyRegistryService::neu(db);
        let broadcaster = RoomBroadcaster::mit_queue_groesse(config.send_queue_groesse);

        Arc::new(Self {
            config: Arc::new(config),
            envelopes,
            schluessel,
            broadcaster,
            metriken,
            start_time: Instant::now(),
            sequencer: DashMap::new(),
            naechste_verbindung: AtomicU64::new(1),
            verbindungen: AtomicU64::new(0),
        })
    }

    /// Vergibt eine neue Verbindungs-ID
    pub fn naechste_verbindungs_id(&self) -> VerbindungsId {
        self.naechste_verbindung.fetch_add(1, Ordering::Relaxed)
    }

    /// Sequencer-Lock eines Raums
    ///
    /// Wer den Lock haelt, darf speichern und verteilen; so entspricht die
    /// Zustellreihenfolge pro Raum der Empfangsreihenfolge.
    pub fn raum_sequencer(&self, room_id: &RoomId) -> Arc<Mutex<()>> {
        if let Some(lock) = self.sequencer.get(room_id) {
            return Arc::clone(lock.value());
        }
        Arc::clone(self.sequencer.entry(room_id.clone()).or_default().value())
    }

    /// Entfernt Sequencer von Raeumen ohne Mitglieder, die niemand haelt
    pub fn sequencer_aufraeumen(&self) {
        self.sequencer.retain(|room_id, lock| {
            Arc::strong_count(lock) > 1 || !self.broadcaster.mitglieder(room_id).is_empty()
        });
    }

    /// Offene TCP-Verbindungen (auch nicht authentifizierte)
    pub fn verbindungen(&self) -> u64 {
        self.verbindungen.load(Ordering::Relaxed)
    }

    pub(crate) fn verbindung_geoeffnet(&self) {
        let n = self.verbindungen.fetch_add(1, Ordering::Relaxed) + 1;
        self.metriken.connected_clients.set(n as i64);
    }

    pub(crate) fn verbindung_geschlossen(&self) {
        let n = self.verbindungen.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        self.metriken.connected_clients.set(n as i64);
    }

    /// Aktualisiert die Raum-Gauge aus dem Broadcaster
    pub(crate) fn raum_metrik_aktualisieren(&self) {
        self.metriken
            .rooms_active
            .set(self.broadcaster.raum_anzahl() as i64);
    }
}
