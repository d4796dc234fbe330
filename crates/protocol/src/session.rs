//! Zustandsautomat einer Realtime-Verbindung
//!
//! Wird von Relay (pro Client-Verbindung) und Client (eigene Verbindung)
//! gleichermassen genutzt.
//!
//! ```text
//! Disconnected -> Connecting -> Authenticated -> Joined(raeume)
//!      ^               |              |               |
//!      +---------------+--------------+---------------+  (Transport zu / Logout)
//! ```
//!
//! Eine Verbindung kann mehreren Raeumen gleichzeitig beigetreten sein.
//! Verlaesst sie den letzten Raum, ist sie wieder `Authenticated`.
//! Beim Trennen werden alle Mitgliedschaften implizit verworfen.

use std::collections::BTreeSet;

use coletiva_core::{ParticipantId, RoomId};
use thiserror::Error;

/// Fehler bei einem unzulaessigen Zustandsuebergang
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ZustandsFehler {
    #[error("Verbindung ist nicht aufgebaut")]
    NichtVerbunden,

    #[error("Verbindung ist nicht authentifiziert")]
    NichtAuthentifiziert,

    #[error("Verbindung ist bereits authentifiziert als {0}")]
    BereitsAuthentifiziert(ParticipantId),

    #[error("Verbindung ist {0} nicht beigetreten")]
    NichtBeigetreten(RoomId),

    #[error("Verbindungsaufbau laeuft bereits")]
    BereitsVerbunden,
}

/// Zustand einer Verbindung
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ChannelState {
    #[default]
    Disconnected,
    Connecting,
    Authenticated {
        participant_id: ParticipantId,
    },
    Joined {
        participant_id: ParticipantId,
        raeume: BTreeSet<RoomId>,
    },
}

impl ChannelState {
    /// Disconnected -> Connecting
    pub fn verbinden(&mut self) -> Result<(), ZustandsFehler> {
        match self {
            Self::Disconnected => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(ZustandsFehler::BereitsVerbunden),
        }
    }

    /// Connecting -> Authenticated (nach erfolgreichem Handshake)
    pub fn authentifizieren(&mut self, participant_id: ParticipantId) -> Result<(), ZustandsFehler> {
        match self {
            Self::Connecting => {
                *self = Self::Authenticated { participant_id };
                Ok(())
            }
            Self::Disconnected => Err(ZustandsFehler::NichtVerbunden),
            Self::Authenticated { participant_id } | Self::Joined { participant_id, .. } => {
                Err(ZustandsFehler::BereitsAuthentifiziert(participant_id.clone()))
            }
        }
    }

    /// Tritt einem Raum bei. Idempotent.
    ///
    /// Gibt `true` zurueck wenn die Mitgliedschaft neu ist.
    pub fn beitreten(&mut self, room_id: RoomId) -> Result<bool, ZustandsFehler> {
        match self {
            Self::Authenticated { participant_id } => {
                let participant_id = participant_id.clone();
                let mut raeume = BTreeSet::new();
                raeume.insert(room_id);
                *self = Self::Joined {
                    participant_id,
                    raeume,
                };
                Ok(true)
            }
            Self::Joined { raeume, .. } => Ok(raeume.insert(room_id)),
            Self::Disconnected => Err(ZustandsFehler::NichtVerbunden),
            Self::Connecting => Err(ZustandsFehler::NichtAuthentifiziert),
        }
    }

    /// Verlaesst einen Raum. No-op wenn nicht beigetreten.
    ///
    /// Gibt `true` zurueck wenn eine Mitgliedschaft entfernt wurde.
    pub fn verlassen(&mut self, room_id: &RoomId) -> Result<bool, ZustandsFehler> {
        match self {
            Self::Joined {
                participant_id,
                raeume,
            } => {
                let entfernt = raeume.remove(room_id);
                if raeume.is_empty() {
                    *self = Self::Authenticated {
                        participant_id: participant_id.clone(),
                    };
                }
                Ok(entfernt)
            }
            Self::Authenticated { .. } => Ok(false),
            Self::Disconnected => Err(ZustandsFehler::NichtVerbunden),
            Self::Connecting => Err(ZustandsFehler::NichtAuthentifiziert),
        }
    }

    /// Prueft ob in einem Raum veroeffentlicht werden darf (nur Joined(raum))
    pub fn darf_veroeffentlichen(&self, room_id: &RoomId) -> Result<(), ZustandsFehler> {
        match self {
            Self::Joined { raeume, .. } if raeume.contains(room_id) => Ok(()),
            Self::Joined { .. } | Self::Authenticated { .. } => {
                Err(ZustandsFehler::NichtBeigetreten(room_id.clone()))
            }
            Self::Connecting => Err(ZustandsFehler::NichtAuthentifiziert),
            Self::Disconnected => Err(ZustandsFehler::NichtVerbunden),
        }
    }

    /// Beliebiger Zustand -> Disconnected
    ///
    /// Gibt die verworfenen Raum-Mitgliedschaften zurueck.
    pub fn trennen(&mut self) -> Vec<RoomId> {
        let vorher = std::mem::take(self);
        match vorher {
            Self::Joined { raeume, .. } => raeume.into_iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Authentifizierte Identitaet (falls vorhanden)
    pub fn participant(&self) -> Option<&ParticipantId> {
        match self {
            Self::Authenticated { participant_id } | Self::Joined { participant_id, .. } => {
                Some(participant_id)
            }
            _ => None,
        }
    }

    pub fn ist_authentifiziert(&self) -> bool {
        self.participant().is_some()
    }

    pub fn ist_beigetreten(&self, room_id: &RoomId) -> bool {
        matches!(self, Self::Joined { raeume, .. } if raeume.contains(room_id))
    }

    /// Alle Raeume denen die Verbindung beigetreten ist
    pub fn raeume(&self) -> Vec<RoomId> {
        match self {
            Self::Joined { raeume, .. } => raeume.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
