//! Envelopes veroeffentlichen und History laden
//!
//! Das Relay liest vom Envelope nur Raum, Absender und Groesse.

use coletiva_chat::HistoryAnfrage;
use coletiva_db::{EnvelopeRepository, PublicKeyRepository};
use coletiva_protocol::control::{
    ControlPayload, HistoryRequest, HistoryResponse, PublishRequest, PublishResponse,
};
use coletiva_protocol::{ControlMessage, ZustandsFehler};
use std::time::Instant;

use crate::dispatcher::DispatcherContext;
use crate::error::{RelayError, RelayResult};
use crate::server_state::RelayState;

/// Speichert einen Envelope und verteilt ihn an alle anderen Raum-Mitglieder
///
/// Persistenz und Fan-Out laufen unter dem Sequencer-Lock des Raums.
pub async fn handle_publish<R>(
    req: PublishRequest,
    ctx: &DispatcherContext,
    state: &RelayState<R>,
) -> RelayResult<ControlPayload>
where
    R: EnvelopeRepository + PublicKeyRepository + 'static,
{
    ctx.zustand.darf_veroeffentlichen(&req.room_id)?;
    let participant = ctx
        .zustand
        .participant()
        .ok_or(ZustandsFehler::NichtAuthentifiziert)?;

    if &req.envelope.meta.sender_id != participant {
        return Err(RelayError::ZugriffVerweigert(format!(
            "Absender {} passt nicht zur Verbindung ({participant})",
            req.envelope.meta.sender_id
        )));
    }

    let start = Instant::now();
    let sequencer = state.raum_sequencer(&req.room_id);
    let reihenfolge = sequencer.lock().await;

    let record = state
        .envelopes
        .envelope_speichern(&req.room_id, &req.envelope)
        .await?;
    let envelope_id = record.envelope.id;
    let empfaenger = record.envelope.keys.len();

    let bericht = state.broadcaster.an_raum_ausser_senden(
        &req.room_id,
        ctx.verbindung,
        ControlMessage::broadcast(req.room_id.clone(), record.envelope),
    );
    drop(reihenfolge);

    let metriken = &state.metriken;
    metriken.envelopes_published_total.inc();
    metriken
        .broadcasts_delivered_total
        .inc_by(bericht.zugestellt as u64);
    metriken
        .publish_duration_seconds
        .observe(start.elapsed().as_secs_f64());
    if !bericht.verdraengt.is_empty() {
        metriken
            .subscribers_evicted_total
            .inc_by(bericht.verdraengt.len() as u64);
        state.raum_metrik_aktualisieren();
        tracing::warn!(
            room_id = %req.room_id,
            verdraengt = ?bericht.verdraengt,
            "Langsame Clients aus dem Raum verdraengt"
        );
    }

    tracing::debug!(
        envelope_id = %envelope_id,
        room_id = %req.room_id,
        seq = record.seq,
        empfaenger,
        zugestellt = bericht.zugestellt,
        "Envelope veroeffentlicht"
    );

    Ok(ControlPayload::PublishResponse(PublishResponse {
        envelope_id,
        room_id: req.room_id,
        zugestellt: bericht.zugestellt,
    }))
}

/// Laedt die History eines Raums (aelteste zuerst)
///
/// Nur fuer Verbindungen, die dem Raum beigetreten sind. Die Antwort
/// passt immer in einen Frame; was nicht passt, kommt ueber den Cursor.
pub async fn handle_history<R>(
    req: HistoryRequest,
    ctx: &DispatcherContext,
    state: &RelayState<R>,
) -> RelayResult<ControlPayload>
where
    R: EnvelopeRepository + PublicKeyRepository + 'static,
{
    // gleiche Bedingung wie beim Veroeffentlichen
    ctx.zustand.darf_veroeffentlichen(&req.room_id)?;

    let seite = state
        .envelopes
        .history_laden(HistoryAnfrage {
            room_id: req.room_id.clone(),
            before_seq: req.before_seq,
            limit: req.limit,
            max_bytes: Some(state.config.history_budget()),
        })
        .await?;

    tracing::debug!(
        room_id = %req.room_id,
        anzahl = seite.envelopes.len(),
        weitere_vor = ?seite.weitere_vor,
        "History geladen"
    );

    Ok(ControlPayload::HistoryResponse(HistoryResponse {
        room_id: req.room_id,
        envelopes: seite.envelopes,
        weitere_vor: seite.weitere_vor,
    }))
}
