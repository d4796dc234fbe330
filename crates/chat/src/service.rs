//! EnvelopeService – verschluesselte Envelopes speichern und History laden
//!
//! Der Service sieht nur Metadaten (Raum, Absender, Groesse, Empfaenger-
//! Anzahl). Inhalte bleiben undurchsichtig.

use std::sync::Arc;

use coletiva_core::RoomId;
use coletiva_db::{DbError, EnvelopeFilter, EnvelopeRecord, EnvelopeRepository};
use coletiva_protocol::Envelope;

use crate::{
    error::{ChatError, ChatResult},
    types::{EnvelopeLimits, HistoryAnfrage, HistorySeite},
};

/// EnvelopeService verwaltet den Envelope-Speicher eines Relays
pub struct EnvelopeService<R: EnvelopeRepository> {
    repo: Arc<R>,
    limits: EnvelopeLimits,
}

impl<R: EnvelopeRepository> EnvelopeService<R> {
    /// Erstellt einen neuen EnvelopeService
    pub fn neu(repo: Arc<R>, limits: EnvelopeLimits) -> Arc<Self> {
        Arc::new(Self { repo, limits })
    }

    pub fn limits(&self) -> &EnvelopeLimits {
        &self.limits
    }

    /// Envelope fuer einen Raum speichern
    ///
    /// Prueft nur die Form: Groesse, mindestens ein Empfaenger, passende
    /// Raum-ID. Der gespeicherte Envelope traegt danach die Raum-ID.
    pub async fn envelope_speichern(
        &self,
        room_id: &RoomId,
        envelope: &Envelope,
    ) -> ChatResult<EnvelopeRecord> {
        if room_id.ist_leer() {
            return Err(ChatError::UngueltigeEingabe("Raum-ID darf nicht leer sein".into()));
        }

        if let Some(env_room) = &envelope.room_id {
            if env_room != room_id {
                return Err(ChatError::UngueltigeEingabe(format!(
                    "Envelope gehoert zu {env_room}, nicht zu {room_id}"
                )));
            }
        }

        if envelope.keys.is_empty() {
            return Err(ChatError::UngueltigeEingabe(
                "Envelope ohne Empfaenger".into(),
            ));
        }

        if envelope.keys.len() > self.limits.max_empfaenger {
            return Err(ChatError::UngueltigeEingabe(format!(
                "Zu viele Empfaenger: {} (Maximum: {})",
                envelope.keys.len(),
                self.limits.max_empfaenger
            )));
        }

        let size = envelope.payload_groesse();
        if size > self.limits.max_envelope_bytes {
            return Err(ChatError::EnvelopeZuGross {
                size,
                max: self.limits.max_envelope_bytes,
            });
        }

        self.repo
            .speichern(room_id, envelope)
            .await
            .map_err(|e| match e {
                DbError::Eindeutigkeit(msg) => ChatError::EnvelopeDoppelt(msg),
                other => ChatError::DatenbankFehler(other),
            })
    }

    /// Envelope-History eines Raums laden (aelteste zuerst)
    ///
    /// Mit `max_bytes` wird die Seite von den neuesten Envelopes her
    /// gefuellt, bis das Budget erreicht ist. Der Rest kommt ueber
    /// `weitere_vor` auf der naechsten Seite.
    pub async fn history_laden(&self, anfrage: HistoryAnfrage) -> ChatResult<HistorySeite> {
        let limit = anfrage.effektives_limit() as usize;
        let room_id = anfrage.room_id;
        // Ein Eintrag mehr zeigt an, ob es aeltere gibt
        let mut records = self
            .repo
            .history(EnvelopeFilter {
                room_id: room_id.clone(),
                before_seq: anfrage.before_seq,
                limit: limit as i64 + 1,
            })
            .await?;

        let mut weitere = records.len() > limit;
        if weitere {
            records.remove(0);
        }

        if let Some(budget) = anfrage.max_bytes {
            let passend = passend_ins_budget(&records, budget);
            if passend < records.len() {
                weitere = true;
                if passend == 0 {
                    if let Some(zu_gross) = records.pop() {
                        tracing::warn!(
                            room_id = %room_id,
                            envelope_id = %zu_gross.envelope.id,
                            seq = zu_gross.seq,
                            budget,
                            "Envelope passt in keine History-Seite, wird uebersprungen"
                        );
                        return Ok(HistorySeite {
                            envelopes: Vec::new(),
                            weitere_vor: Some(zu_gross.seq),
                        });
                    }
                }
                let ueberzaehlig = records.len() - passend;
                records.drain(..ueberzaehlig);
            }
        }

        let weitere_vor = if weitere {
            records.first().map(|r| r.seq)
        } else {
            None
        };

        Ok(HistorySeite {
            envelopes: records.into_iter().map(|r| r.envelope).collect(),
            weitere_vor,
        })
    }

    pub async fn anzahl(&self, room_id: &RoomId) -> ChatResult<i64> {
        Ok(self.repo.anzahl(room_id).await?)
    }
}

/// Anzahl der neuesten Records, deren JSON zusammen in `budget` passt
fn passend_ins_budget(records: &[EnvelopeRecord], budget: usize) -> usize {
    let mut summe = 0usize;
    let mut anzahl = 0;
    for record in records.iter().rev() {
        // +1 fuer das Trennzeichen im JSON-Array
        let groesse = serde_json::to_vec(&record.envelope)
            .map(|json| json.len() + 1)
            .unwrap_or(usize::MAX);
        summe = summe.saturating_add(groesse);
        if summe > budget {
            break;
        }
        anzahl += 1;
    }
    anzahl
}
