use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, warn};
use uuid::Uuid;

use recado_db::models::MessageRow;
use recado_types::api::{
    Claims, ConversationResponse, ConversationSummary, CreateConversationRequest,
    MessageHistoryQuery,
};
use recado_types::events::{AuthorInfo, MessagePayload};
use recado_types::models::{Attachment, ConversationKind, parse_timestamp};

use crate::auth::AppState;

pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    // Callers list everyone but themselves; the author is always a participant
    let mut others: Vec<Uuid> = req.participant_ids;
    others.sort();
    others.dedup();
    others.retain(|id| *id != claims.sub);

    match req.kind {
        ConversationKind::Direct if others.len() != 1 => return Err(StatusCode::BAD_REQUEST),
        ConversationKind::Group if others.is_empty() => return Err(StatusCode::BAD_REQUEST),
        _ => {}
    }
    let name = req
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string);

    let db = state.clone();
    let user_id = claims.sub.to_string();
    let other_ids: Vec<String> = others.iter().map(Uuid::to_string).collect();
    let kind = req.kind;

    // Run blocking DB work off the async runtime
    let conversation_id = tokio::task::spawn_blocking(move || {
        for id in &other_ids {
            if db
                .db
                .get_user_by_id(id)
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
                .is_none()
            {
                return Err(StatusCode::BAD_REQUEST);
            }
        }

        // A direct pair already has at most one conversation; reuse it
        if kind == ConversationKind::Direct {
            if let Some(existing) = db
                .db
                .find_direct_conversation(&user_id, &other_ids[0])
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            {
                return Ok((existing, false));
            }
        }

        let id = Uuid::new_v4().to_string();
        let mut all_ids = other_ids;
        all_ids.push(user_id);
        db.db
            .create_conversation(&id, kind.as_str(), name.as_deref(), &all_ids)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        Ok::<_, StatusCode>((id, true))
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let (conversation_id, created) = conversation_id?;
    let response = load_conversation_response(&state, &conversation_id).await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(response)))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<ConversationSummary>>, StatusCode> {
    let db = state.clone();
    let user_id = claims.sub.to_string();

    let rows = tokio::task::spawn_blocking(move || db.db.list_conversations(&user_id))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let summaries = rows
        .into_iter()
        .map(|row| ConversationSummary {
            id: row.id.parse().unwrap_or_else(|e| {
                warn!("Corrupt conversation id '{}': {}", row.id, e);
                Uuid::default()
            }),
            kind: ConversationKind::from_db(&row.kind),
            name: row.name,
            updated_at: parse_timestamp(&row.updated_at),
            unread: row.unread,
            last_message: row.last_message,
        })
        .collect();

    Ok(Json(summaries))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageHistoryQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<MessagePayload>>, StatusCode> {
    let db = state.clone();
    let cid = conversation_id.to_string();
    let user_id = claims.sub.to_string();
    let limit = query.limit.min(200);
    let before = query.before;

    // Run all blocking DB queries off the async runtime
    let rows = tokio::task::spawn_blocking(move || {
        if !db
            .db
            .is_participant(&cid, &user_id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        {
            return Err(StatusCode::FORBIDDEN);
        }
        db.db
            .get_messages(&cid, limit, before.as_deref())
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })??;

    let messages = rows.into_iter().map(message_payload_from_row).collect();
    Ok(Json(messages))
}

async fn load_conversation_response(
    state: &AppState,
    conversation_id: &str,
) -> Result<ConversationResponse, StatusCode> {
    let db = state.clone();
    let cid = conversation_id.to_string();

    let (row, participant_ids) = tokio::task::spawn_blocking(move || {
        let row = db
            .db
            .get_conversation(&cid)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;
        let participants = db
            .db
            .get_participants(&cid)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        Ok::<_, StatusCode>((row, participants))
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })??;

    Ok(ConversationResponse {
        id: row.id.parse().unwrap_or_else(|e| {
            warn!("Corrupt conversation id '{}': {}", row.id, e);
            Uuid::default()
        }),
        kind: ConversationKind::from_db(&row.kind),
        name: row.name,
        participant_ids: participant_ids
            .iter()
            .filter_map(|id| match id.parse() {
                Ok(uuid) => Some(uuid),
                Err(e) => {
                    warn!("Corrupt participant id '{}': {}", id, e);
                    None
                }
            })
            .collect(),
        created_at: parse_timestamp(&row.created_at),
        updated_at: parse_timestamp(&row.updated_at),
    })
}

pub(crate) fn message_payload_from_row(row: MessageRow) -> MessagePayload {
    let attachments: Vec<Attachment> = row
        .attachments
        .as_deref()
        .map(|raw| {
            serde_json::from_str(raw).unwrap_or_else(|e| {
                warn!("Corrupt attachments on message '{}': {}", row.id, e);
                Vec::new()
            })
        })
        .unwrap_or_default();

    MessagePayload {
        id: row.id.parse().unwrap_or_else(|e| {
            warn!("Corrupt message id '{}': {}", row.id, e);
            Uuid::default()
        }),
        conversation_id: row.conversation_id.parse().unwrap_or_else(|e| {
            warn!(
                "Corrupt conversation_id '{}' on message '{}': {}",
                row.conversation_id, row.id, e
            );
            Uuid::default()
        }),
        author: AuthorInfo {
            id: row.author_id.parse().unwrap_or_else(|e| {
                warn!(
                    "Corrupt author_id '{}' on message '{}': {}",
                    row.author_id, row.id, e
                );
                Uuid::default()
            }),
            name: row.author_name().to_string(),
        },
        content: row.content.clone(),
        attachments,
        created_at: parse_timestamp(&row.created_at),
    }
}
