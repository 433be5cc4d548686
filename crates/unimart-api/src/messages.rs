use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use unimart_db::models::{MessageRow, parse_timestamp};
use unimart_types::api::{Claims, MessageResponse, SendMessageRequest};
use unimart_types::events::GatewayEvent;

use crate::auth::AppState;
use crate::error::{ApiError, run_blocking};
use crate::parse_uuid;

pub(crate) fn message_response(row: MessageRow) -> MessageResponse {
    MessageResponse {
        id: parse_uuid(&row.id, "message id"),
        negotiation_id: parse_uuid(&row.negotiation_id, "negotiation id"),
        sender_id: parse_uuid(&row.sender_id, "sender id"),
        sender_handle: row.sender_handle,
        content: row.content,
        created_at: parse_timestamp(&row.created_at),
    }
}

/// Send a chat message. The store enforces the accepted-state and
/// participant guards; on success the event goes to both participants'
/// live connections.
pub async fn send_message(
    State(state): State<AppState>,
    Path(negotiation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message_id = Uuid::new_v4();

    let db = state.db.clone();
    let id = message_id.to_string();
    let nid = negotiation_id.to_string();
    let sender = claims.sub.to_string();
    let (message, negotiation) =
        run_blocking(move || db.create_message(&id, &nid, &sender, &req.content)).await?;

    let response = message_response(message);

    state
        .dispatcher
        .send_to_participants(
            parse_uuid(&negotiation.buyer_id, "buyer id"),
            parse_uuid(&negotiation.seller_id, "seller id"),
            GatewayEvent::MessageCreate {
                id: response.id,
                negotiation_id: response.negotiation_id,
                sender_id: response.sender_id,
                sender_handle: response.sender_handle.clone(),
                content: response.content.clone(),
                created_at: response.created_at,
            },
        )
        .await;

    Ok((StatusCode::CREATED, Json(response)))
}

/// Full history, ascending by creation time. Participants only.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(negotiation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let nid = negotiation_id.to_string();
    let requester = claims.sub.to_string();
    let rows = run_blocking(move || db.list_messages(&nid, &requester)).await?;

    let messages: Vec<MessageResponse> = rows.into_iter().map(message_response).collect();
    Ok(Json(messages))
}
