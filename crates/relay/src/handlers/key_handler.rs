//! Public-Key-Register

use coletiva_db::{EnvelopeRepository, PublicKeyRepository};
use coletiva_protocol::control::{ControlPayload, KeyListRequest, KeyListResponse, KeyRegisterRequest};
use coletiva_protocol::ZustandsFehler;

use crate::dispatcher::DispatcherContext;
use crate::error::{RelayError, RelayResult};
use crate::server_state::RelayState;

/// Registriert den Schluessel der authentifizierten Identitaet
pub async fn handle_key_register<R>(
    req: KeyRegisterRequest,
    ctx: &DispatcherContext,
    state: &RelayState<R>,
) -> RelayResult<ControlPayload>
where
    R: EnvelopeRepository + PublicKeyRepository + 'static,
{
    let participant = ctx
        .zustand
        .participant()
        .ok_or(ZustandsFehler::NichtAuthentifiziert)?;

    if participant != &req.participant_id {
        return Err(RelayError::ZugriffVerweigert(format!(
            "{participant} darf keinen Schluessel fuer {} registrieren",
            req.participant_id
        )));
    }

    state
        .schluessel
        .schluessel_registrieren(&req.participant_id, &req.public_key)
        .await?;

    Ok(ControlPayload::KeyRegisterResponse {
        participant_id: req.participant_id,
    })
}

/// Listet Register-Eintraege, optional auf bestimmte Identitaeten gefiltert
pub async fn handle_key_list<R>(
    req: KeyListRequest,
    ctx: &DispatcherContext,
    state: &RelayState<R>,
) -> RelayResult<ControlPayload>
where
    R: EnvelopeRepository + PublicKeyRepository + 'static,
{
    if !ctx.zustand.ist_authentifiziert() {
        return Err(ZustandsFehler::NichtAuthentifiziert.into());
    }

    let entries = state
        .schluessel
        .schluessel_auflisten(req.participants.as_deref())
        .await?;

    Ok(ControlPayload::KeyListResponse(KeyListResponse { entries }))
}
