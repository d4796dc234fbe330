//! Room-Broadcaster – Verteilt Envelopes an die Mitglieder eines Raums
//!
//! Der RoomBroadcaster verwaltet die Send-Queues aller authentifizierten
//! Verbindungen und die Raum-Mitgliedschaften. Er gehoert dem Relay-Zustand,
//! es gibt keine globale Verbindungstabelle.
//!
//! ## Ueberlauf
//! Jede Verbindung hat eine begrenzte Queue. Laeuft sie beim Fan-Out ueber,
//! wird die Verbindung verdraengt: ihr Sender wird entfernt, die Verbindung
//! liest noch die eingereihten Nachrichten und schliesst sich dann. Ein
//! beigetretener Client verpasst so nie stillschweigend einen Broadcast.

use coletiva_core::{ParticipantId, RoomId};
use coletiva_protocol::ControlMessage;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Standard-Groesse der Send-Queue pro Verbindung
pub const SEND_QUEUE_GROESSE: usize = 64;

/// Relay-interne ID einer Verbindung
pub type VerbindungsId = u64;

// ---------------------------------------------------------------------------
// ClientSender
// ---------------------------------------------------------------------------

/// Handle auf die Send-Queue einer authentifizierten Verbindung
#[derive(Clone, Debug)]
pub struct ClientSender {
    pub verbindung: VerbindungsId,
    pub participant: ParticipantId,
    tx: mpsc::Sender<ControlMessage>,
}

/// Ergebnis eines einzelnen Sendeversuchs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendeErgebnis {
    Eingereiht,
    Voll,
    Geschlossen,
}

impl ClientSender {
    fn senden(&self, nachricht: ControlMessage) -> SendeErgebnis {
        match self.tx.try_send(nachricht) {
            Ok(()) => SendeErgebnis::Eingereiht,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    verbindung = self.verbindung,
                    participant = %self.participant,
                    "Send-Queue voll – Verbindung wird verdraengt"
                );
                SendeErgebnis::Voll
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(
                    verbindung = self.verbindung,
                    "Send-Queue geschlossen (Client getrennt)"
                );
                SendeErgebnis::Geschlossen
            }
        }
    }
}

/// Ergebnis eines Fan-Outs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutBericht {
    /// Anzahl Verbindungen in deren Queue die Nachricht liegt
    pub zugestellt: usize,
    /// Wegen voller Queue verdraengte Verbindungen
    pub verdraengt: Vec<VerbindungsId>,
}

// ---------------------------------------------------------------------------
// RoomBroadcaster
// ---------------------------------------------------------------------------

/// Verbindungstabelle und Raum-Mitgliedschaften des Relays
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct RoomBroadcaster {
    inner: Arc<RoomBroadcasterInner>,
}

struct RoomBroadcasterInner {
    queue_groesse: usize,
    /// Sender, indiziert nach Verbindung
    clients: DashMap<VerbindungsId, ClientSender>,
    /// Raum -> beigetretene Verbindungen
    raeume: DashMap<RoomId, BTreeSet<VerbindungsId>>,
}

impl RoomBroadcaster {
    /// Erstellt einen neuen RoomBroadcaster
    pub fn neu() -> Self {
        Self::mit_queue_groesse(SEND_QUEUE_GROESSE)
    }

    pub fn mit_queue_groesse(queue_groesse: usize) -> Self {
        Self {
            inner: Arc::new(RoomBroadcasterInner {
                queue_groesse: queue_groesse.max(1),
                clients: DashMap::new(),
                raeume: DashMap::new(),
            }),
        }
    }

    /// Registriert eine authentifizierte Verbindung
    ///
    /// Die `ClientConnection` liest aus der zurueckgegebenen Queue und
    /// schreibt auf den TCP-Stream. Liefert die Queue `None`, wurde die
    /// Verbindung verdraengt.
    pub fn client_registrieren(
        &self,
        verbindung: VerbindungsId,
        participant: ParticipantId,
    ) -> mpsc::Receiver<ControlMessage> {
        let (tx, rx) = mpsc::channel(self.inner.queue_groesse);
        let sender = ClientSender {
            verbindung,
            participant: participant.clone(),
            tx,
        };
        self.inner.clients.insert(verbindung, sender);
        tracing::debug!(verbindung, participant = %participant, "Client im Broadcaster registriert");
        rx
    }

    /// Entfernt eine Verbindung aus Tabelle und allen Raeumen
    ///
    /// Gibt die Raeume zurueck, denen die Verbindung angehoerte.
    pub fn client_entfernen(&self, verbindung: VerbindungsId) -> Vec<RoomId> {
        self.inner.clients.remove(&verbindung);

        let mut verlassen = Vec::new();
        self.inner.raeume.iter_mut().for_each(|mut entry| {
            if entry.value_mut().remove(&verbindung) {
                verlassen.push(entry.key().clone());
            }
        });
        self.inner.raeume.retain(|_, mitglieder| !mitglieder.is_empty());

        tracing::debug!(verbindung, raeume = verlassen.len(), "Client aus Broadcaster entfernt");
        verlassen
    }

    /// Fuegt eine Verbindung einem Raum hinzu. Idempotent.
    ///
    /// Gibt die Anzahl der Mitglieder danach zurueck.
    pub fn raum_beitreten(&self, verbindung: VerbindungsId, room_id: RoomId) -> usize {
        let mut mitglieder = self.inner.raeume.entry(room_id).or_default();
        mitglieder.insert(verbindung);
        mitglieder.len()
    }

    /// Entfernt eine Verbindung aus einem Raum
    ///
    /// Gibt `true` zurueck wenn sie Mitglied war.
    pub fn raum_verlassen(&self, verbindung: VerbindungsId, room_id: &RoomId) -> bool {
        let entfernt = self
            .inner
            .raeume
            .get_mut(room_id)
            .map(|mut mitglieder| mitglieder.remove(&verbindung))
            .unwrap_or(false);
        self.inner
            .raeume
            .remove_if(room_id, |_, mitglieder| mitglieder.is_empty());
        entfernt
    }

    /// Sendet eine Nachricht an alle Mitglieder eines Raums ausser einer Verbindung
    ///
    /// Verbindungen mit voller Queue werden verdraengt, geschlossene entfernt.
    pub fn an_raum_ausser_senden(
        &self,
        room_id: &RoomId,
        ausgeschlossen: VerbindungsId,
        nachricht: ControlMessage,
    ) -> FanOutBericht {
        // Kopie, damit kein DashMap-Guard ueber das Entfernen gehalten wird
        let mitglieder = match self.inner.raeume.get(room_id) {
            Some(ids) => ids.clone(),
            None => return FanOutBericht::default(),
        };

        let mut bericht = FanOutBericht::default();
        let mut tote = Vec::new();

        for verbindung in mitglieder {
            if verbindung == ausgeschlossen {
                continue;
            }
            let ergebnis = match self.inner.clients.get(&verbindung) {
                Some(sender) => sender.senden(nachricht.clone()),
                None => SendeErgebnis::Geschlossen,
            };
            match ergebnis {
                SendeErgebnis::Eingereiht => bericht.zugestellt += 1,
                SendeErgebnis::Voll => {
                    bericht.verdraengt.push(verbindung);
                    tote.push(verbindung);
                }
                SendeErgebnis::Geschlossen => tote.push(verbindung),
            }
        }

        for verbindung in tote {
            self.client_entfernen(verbindung);
        }

        bericht
    }

    /// Gibt die Anzahl der registrierten Verbindungen zurueck
    pub fn client_anzahl(&self) -> usize {
        self.inner.clients.len()
    }

    /// Anzahl der Raeume mit mindestens einem Mitglied
    pub fn raum_anzahl(&self) -> usize {
        self.inner.raeume.len()
    }

    /// Prueft ob eine Verbindung registriert ist
    pub fn ist_registriert(&self, verbindung: VerbindungsId) -> bool {
        self.inner.clients.contains_key(&verbindung)
    }

    /// Gibt alle Verbindungen in einem Raum zurueck (aufsteigend)
    pub fn mitglieder(&self, room_id: &RoomId) -> Vec<VerbindungsId> {
        self.inner
            .raeume
            .get(room_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl Default for RoomBroadcaster {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
