use std::convert::Infallible;
use std::time::Duration;

use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures_util::Stream;
use serde::Deserialize;
use tracing::{error, warn};
use uuid::Uuid;

use recado_types::api::{Claims, CreateNoteRequest, NoteResponse};
use recado_types::events::{AuthorInfo, NoteCreatedPayload};
use recado_types::models::parse_timestamp;

use crate::auth::AppState;

const MAX_TITLE_LEN: usize = 200;
const MAX_BODY_LEN: usize = 10_000;

#[derive(Debug, Deserialize)]
pub struct NotesQuery {
    #[serde(default = "default_notes_limit")]
    pub limit: u32,
}

fn default_notes_limit() -> u32 {
    50
}

/// Publishing notes is an editor feature; every note lands on the realtime
/// note stream of the other connected editors.
pub async fn create_note(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateNoteRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if !claims.role.can_manage_notes() {
        return Err(StatusCode::FORBIDDEN);
    }
    let title = req.title.trim().to_string();
    if title.is_empty() || title.len() > MAX_TITLE_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }
    if req.body.is_empty() || req.body.len() > MAX_BODY_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }

    let note_id = Uuid::new_v4();

    // Run blocking DB work off the async runtime
    let db = state.clone();
    let nid = note_id.to_string();
    let author_id = claims.sub.to_string();
    let insert_title = title.clone();
    let body = req.body.clone();
    let (created_at, author_name) = tokio::task::spawn_blocking(move || {
        let created_at = db.db.insert_note(&nid, &author_id, &insert_title, &body)?;
        let author = db
            .db
            .get_user_by_id(&author_id)?
            .map(|user| user.display_name().to_string());
        Ok::<_, anyhow::Error>((created_at, author))
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let author = AuthorInfo {
        id: claims.sub,
        name: author_name.unwrap_or_else(|| claims.username.clone()),
    };
    let created_at = parse_timestamp(&created_at);

    state.notes.broadcast(&NoteCreatedPayload {
        id: note_id,
        title: title.clone(),
        author: author.clone(),
        created_at,
    });

    Ok((
        StatusCode::CREATED,
        Json(NoteResponse {
            id: note_id,
            title,
            body: req.body,
            author,
            created_at,
        }),
    ))
}

pub async fn list_notes(
    State(state): State<AppState>,
    Query(query): Query<NotesQuery>,
    Extension(_claims): Extension<Claims>,
) -> Result<Json<Vec<NoteResponse>>, StatusCode> {
    let db = state.clone();
    let limit = query.limit.min(200);

    let rows = tokio::task::spawn_blocking(move || db.db.list_notes(limit))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let notes = rows
        .into_iter()
        .map(|row| NoteResponse {
            id: row.id.parse().unwrap_or_else(|e| {
                warn!("Corrupt note id '{}': {}", row.id, e);
                Uuid::default()
            }),
            author: AuthorInfo {
                id: row.author_id.parse().unwrap_or_else(|e| {
                    warn!("Corrupt author_id '{}' on note '{}': {}", row.author_id, row.id, e);
                    Uuid::default()
                }),
                name: row.author_name().to_string(),
            },
            title: row.title,
            body: row.body,
            created_at: parse_timestamp(&row.created_at),
        })
        .collect();

    Ok(Json(notes))
}

/// One-way SSE stream of freshly published notes. Nothing is replayed on
/// connect; the stream only carries what is broadcast while it is open.
pub async fn note_stream(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    if !claims.role.can_manage_notes() {
        return Err(StatusCode::FORBIDDEN);
    }

    let mut rx = state.notes.register();
    let stream = async_stream::stream! {
        while let Some(json) = rx.recv().await {
            yield Ok(Event::default().event("note_created").data(json));
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use recado_types::models::Role;

    use crate::auth::tests::{seed_user, session_claims, test_state};

    fn claims_for(state: &AppState, username: &str, role: Role) -> Claims {
        let id = seed_user(state, username, role);
        session_claims(state, id, username)
    }

    #[tokio::test]
    async fn test_member_cannot_publish_notes() {
        let state = test_state();
        let claims = claims_for(&state, "benito", Role::Member);

        let err = create_note(
            State(state),
            Extension(claims),
            Json(CreateNoteRequest {
                title: "Cierre de nómina".to_string(),
                body: "El cierre es el viernes.".to_string(),
            }),
        )
        .await
        .map(|_| ())
        .unwrap_err();
        assert_eq!(err, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_editor_note_reaches_open_streams() {
        let state = test_state();
        let claims = claims_for(&state, "amalia", Role::Editor);
        let mut rx = state.notes.register();

        let response = create_note(
            State(state),
            Extension(claims),
            Json(CreateNoteRequest {
                title: "Cierre de nómina".to_string(),
                body: "El cierre es el viernes.".to_string(),
            }),
        )
        .await
        .unwrap()
        .into_response();
        assert_eq!(response.status(), StatusCode::CREATED);

        let payload = rx.try_recv().unwrap();
        assert!(payload.contains("Cierre de nómina"));
        assert!(payload.contains(r#""autor""#));
    }

    #[tokio::test]
    async fn test_blank_title_rejected() {
        let state = test_state();
        let claims = claims_for(&state, "amalia", Role::Admin);

        let err = create_note(
            State(state),
            Extension(claims),
            Json(CreateNoteRequest {
                title: "   ".to_string(),
                body: "cuerpo".to_string(),
            }),
        )
        .await
        .map(|_| ())
        .unwrap_err();
        assert_eq!(err, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_any_session_can_list_notes() {
        let state = test_state();
        let editor = claims_for(&state, "amalia", Role::Editor);
        let member = claims_for(&state, "benito", Role::Member);

        create_note(
            State(state.clone()),
            Extension(editor.clone()),
            Json(CreateNoteRequest {
                title: "Cierre de nómina".to_string(),
                body: "El cierre es el viernes.".to_string(),
            }),
        )
        .await
        .unwrap();

        let Json(notes) = list_notes(
            State(state),
            Query(NotesQuery { limit: 50 }),
            Extension(member),
        )
        .await
        .unwrap();

        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].title, "Cierre de nómina");
        assert_eq!(notes[0].author.id, editor.sub);
    }
}
