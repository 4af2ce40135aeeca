use axum::{Extension, Json, extract::State, extract::rejection::JsonRejection, http::StatusCode};
use tracing::{error, warn};
use uuid::Uuid;

use recado_gateway::ops::publish_conversation_read;
use recado_types::api::{Claims, ReconcileReadRequest, ReconcileReadResponse};
use recado_types::models::parse_timestamp;

use crate::auth::AppState;

/// Bulk catch-up for a conversation the user just opened: everything other
/// people wrote becomes delivered and read in one transaction, and the
/// user's read cursor advances. Zero pending messages is a normal outcome,
/// not an error.
///
/// Connected clients are notified afterwards on a best-effort basis. The
/// database commit is the source of truth; a fan-out failure is logged and
/// swallowed, never surfaced to the caller.
pub async fn reconcile_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    body: Result<Json<ReconcileReadRequest>, JsonRejection>,
) -> Result<Json<ReconcileReadResponse>, StatusCode> {
    let Json(req) = body.map_err(|_| StatusCode::BAD_REQUEST)?;

    let db = state.clone();
    let cid = req.conversation_id.to_string();
    let user_id = claims.sub.to_string();

    // Run blocking DB work off the async runtime
    let (updated, read_at, participant_ids) = tokio::task::spawn_blocking(move || {
        if !db
            .db
            .is_participant(&cid, &user_id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        {
            return Err(StatusCode::FORBIDDEN);
        }
        let (updated, read_at) = db
            .db
            .reconcile_conversation_read(&cid, &user_id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let participants = db
            .db
            .get_participants(&cid)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        Ok::<_, StatusCode>((updated, read_at, participants))
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })??;

    let recipients: Vec<Uuid> = participant_ids
        .iter()
        .filter_map(|id| match id.parse() {
            Ok(uuid) => Some(uuid),
            Err(e) => {
                warn!("Corrupt participant id '{}': {}", id, e);
                None
            }
        })
        .collect();
    publish_conversation_read(
        &state.dispatcher,
        req.conversation_id,
        claims.sub,
        updated,
        parse_timestamp(&read_at),
        &recipients,
    );

    Ok(Json(ReconcileReadResponse { ok: true, updated }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use recado_gateway::dispatcher::Topic;
    use recado_types::events::GatewayEvent;
    use recado_types::models::Role;

    use crate::auth::tests::{seed_user, session_claims, test_state};

    fn seeded_conversation(state: &AppState, author: Uuid, reader: Uuid, messages: u32) -> Uuid {
        let cid = Uuid::new_v4();
        state
            .db
            .create_conversation(
                &cid.to_string(),
                "direct",
                None,
                &[author.to_string(), reader.to_string()],
            )
            .unwrap();
        for i in 0..messages {
            state
                .db
                .insert_message(
                    &Uuid::new_v4().to_string(),
                    &cid.to_string(),
                    &author.to_string(),
                    &format!("hola {}", i),
                    None,
                )
                .unwrap();
        }
        cid
    }

    #[tokio::test]
    async fn test_reconcile_reports_updated_count() {
        let state = test_state();
        let amalia = seed_user(&state, "amalia", Role::Member);
        let benito = seed_user(&state, "benito", Role::Member);
        let cid = seeded_conversation(&state, amalia, benito, 5);
        let claims = session_claims(&state, benito, "benito");

        let Json(response) = reconcile_read(
            State(state.clone()),
            Extension(claims),
            Ok(Json(ReconcileReadRequest {
                conversation_id: cid,
            })),
        )
        .await
        .unwrap();

        assert!(response.ok);
        assert_eq!(response.updated, 5);
        let unread = state
            .db
            .unread_count(&cid.to_string(), &benito.to_string())
            .unwrap();
        assert_eq!(unread, 0);
    }

    #[tokio::test]
    async fn test_reconcile_with_nothing_pending_is_ok() {
        let state = test_state();
        let amalia = seed_user(&state, "amalia", Role::Member);
        let benito = seed_user(&state, "benito", Role::Member);
        let cid = seeded_conversation(&state, amalia, benito, 0);
        let claims = session_claims(&state, benito, "benito");

        let Json(response) = reconcile_read(
            State(state),
            Extension(claims),
            Ok(Json(ReconcileReadRequest {
                conversation_id: cid,
            })),
        )
        .await
        .unwrap();

        assert!(response.ok);
        assert_eq!(response.updated, 0);
    }

    #[tokio::test]
    async fn test_reconcile_forbidden_for_outsiders() {
        let state = test_state();
        let amalia = seed_user(&state, "amalia", Role::Member);
        let benito = seed_user(&state, "benito", Role::Member);
        let carmen = seed_user(&state, "carmen", Role::Member);
        let cid = seeded_conversation(&state, amalia, benito, 2);
        let claims = session_claims(&state, carmen, "carmen");

        let err = reconcile_read(
            State(state),
            Extension(claims),
            Ok(Json(ReconcileReadRequest {
                conversation_id: cid,
            })),
        )
        .await
        .map(|_| ())
        .unwrap_err();
        assert_eq!(err, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_reconcile_notifies_connected_participants() {
        let state = test_state();
        let amalia = seed_user(&state, "amalia", Role::Member);
        let benito = seed_user(&state, "benito", Role::Member);
        let cid = seeded_conversation(&state, amalia, benito, 3);
        let claims = session_claims(&state, benito, "benito");

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let conn_id = Uuid::new_v4();
        state.dispatcher.subscribe(Topic::User(amalia), conn_id, tx);

        reconcile_read(
            State(state),
            Extension(claims),
            Ok(Json(ReconcileReadRequest {
                conversation_id: cid,
            })),
        )
        .await
        .unwrap();

        match rx.try_recv().unwrap() {
            GatewayEvent::ConversationRead {
                conversation_id,
                user_id,
                updated,
                ..
            } => {
                assert_eq!(conversation_id, cid);
                assert_eq!(user_id, benito);
                assert_eq!(updated, 3);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
