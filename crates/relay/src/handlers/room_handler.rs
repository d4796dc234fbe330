//! Raum beitreten und verlassen

use coletiva_db::{EnvelopeRepository, PublicKeyRepository};
use coletiva_protocol::control::{
    ControlPayload, RoomJoinRequest, RoomJoinResponse, RoomLeaveRequest, RoomLeaveResponse,
};

use crate::dispatcher::DispatcherContext;
use crate::error::{RelayError, RelayResult};
use crate::server_state::RelayState;

/// Tritt einem Raum bei (idempotent)
pub fn handle_join<R>(
    req: RoomJoinRequest,
    ctx: &mut DispatcherContext,
    state: &RelayState<R>,
) -> RelayResult<ControlPayload>
where
    R: EnvelopeRepository + PublicKeyRepository + 'static,
{
    if req.room_id.ist_leer() {
        return Err(RelayError::ungueltig("Raum-ID darf nicht leer sein"));
    }

    let neu = ctx.zustand.beitreten(req.room_id.clone())?;
    let mitglieder = state
        .broadcaster
        .raum_beitreten(ctx.verbindung, req.room_id.clone());
    state.raum_metrik_aktualisieren();

    if neu {
        tracing::debug!(verbindung = ctx.verbindung, room_id = %req.room_id, mitglieder, "Raum beigetreten");
    }

    Ok(ControlPayload::RoomJoinResponse(RoomJoinResponse {
        room_id: req.room_id,
        mitglieder,
    }))
}

/// Verlaesst einen Raum; ohne Mitgliedschaft ein No-op
pub fn handle_leave<R>(
    req: RoomLeaveRequest,
    ctx: &mut DispatcherContext,
    state: &RelayState<R>,
) -> RelayResult<ControlPayload>
where
    R: EnvelopeRepository + PublicKeyRepository + 'static,
{
    let war_beigetreten = ctx.zustand.verlassen(&req.room_id)?;
    if war_beigetreten {
        state.broadcaster.raum_verlassen(ctx.verbindung, &req.room_id);
        state.raum_metrik_aktualisieren();
        tracing::debug!(verbindung = ctx.verbindung, room_id = %req.room_id, "Raum verlassen");
    }

    Ok(ControlPayload::RoomLeaveResponse(RoomLeaveResponse {
        room_id: req.room_id,
        war_beigetreten,
    }))
}
