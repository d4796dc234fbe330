//! Handshake und Abmeldung

use coletiva_db::{EnvelopeRepository, PublicKeyRepository};
use coletiva_protocol::control::{ControlPayload, HelloRequest, HelloResponse};
use coletiva_protocol::{ChannelState, ZustandsFehler};

use crate::dispatcher::DispatcherContext;
use crate::error::{RelayError, RelayResult};
use crate::server_state::RelayState;

/// Verarbeitet `Hello`: Connecting -> Authenticated
///
/// Die Identitaet stammt vom externen Session-Provider und wird nicht
/// weiter geprueft.
pub fn handle_hello<R>(
    req: HelloRequest,
    ctx: &mut DispatcherContext,
    state: &RelayState<R>,
) -> RelayResult<ControlPayload>
where
    R: EnvelopeRepository + PublicKeyRepository + 'static,
{
    if req.participant_id.ist_leer() {
        return Err(RelayError::ungueltig("Identitaet darf nicht leer sein"));
    }

    ctx.zustand.authentifizieren(req.participant_id.clone())?;
    ctx.broadcast_rx = Some(
        state
            .broadcaster
            .client_registrieren(ctx.verbindung, req.participant_id.clone()),
    );

    tracing::info!(
        verbindung = ctx.verbindung,
        peer = %ctx.peer_addr,
        participant = %req.participant_id,
        client_version = %req.client_version,
        "Verbindung authentifiziert"
    );

    Ok(ControlPayload::HelloResponse(HelloResponse {
        participant_id: req.participant_id,
        session_id: ctx.verbindung,
        server_name: state.config.server_name.clone(),
    }))
}

/// Verarbeitet `Logout`: verwirft alle Mitgliedschaften
///
/// Die TCP-Verbindung bleibt offen; ein neues `Hello` ist erlaubt.
pub fn handle_logout<R>(
    ctx: &mut DispatcherContext,
    state: &RelayState<R>,
) -> RelayResult<ControlPayload>
where
    R: EnvelopeRepository + PublicKeyRepository + 'static,
{
    if !ctx.zustand.ist_authentifiziert() {
        return Err(ZustandsFehler::NichtAuthentifiziert.into());
    }

    verbindung_abmelden(ctx, state);
    ctx.zustand = ChannelState::Connecting;

    Ok(ControlPayload::LogoutResponse)
}

/// Entfernt die Verbindung aus dem Broadcaster und setzt den Zustand zurueck
pub fn verbindung_abmelden<R>(ctx: &mut DispatcherContext, state: &RelayState<R>)
where
    R: EnvelopeRepository + PublicKeyRepository + 'static,
{
    let participant = ctx.zustand.participant().cloned();
    ctx.broadcast_rx = None;
    state.broadcaster.client_entfernen(ctx.verbindung);
    let raeume = ctx.zustand.trennen();

    state.raum_metrik_aktualisieren();
    state.sequencer_aufraeumen();

    if let Some(participant) = participant {
        tracing::info!(
            verbindung = ctx.verbindung,
            participant = %participant,
            raeume = raeume.len(),
            "Verbindung abgemeldet"
        );
    }
}
