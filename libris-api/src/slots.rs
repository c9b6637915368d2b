use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use libris_core::model::Slot;
use libris_shared::{SlotId, SlotStatus, UserId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth::{Actor, Patron};
use crate::extract::JsonBody;
use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct SlotRequest {
    #[serde(alias = "slotId")]
    pub slot_id: SlotId,
}

/// Wire shape of a slot, one column per field.
#[derive(Debug, Serialize)]
pub struct SlotView {
    pub id: SlotId,
    pub zone: String,
    pub name: String,
    pub status: SlotStatus,
    pub booking_start_time: Option<DateTime<Utc>>,
    pub booked_by_user_id: Option<UserId>,
}

impl From<Slot> for SlotView {
    fn from(slot: Slot) -> Self {
        Self {
            id: slot.id,
            status: slot.status(),
            booking_start_time: slot.booking.map(|b| b.started_at),
            booked_by_user_id: slot.booking.map(|b| b.user_id),
            zone: slot.zone,
            name: slot.name,
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_slots))
        .route("/book", post(book_slot))
        .route("/end", post(end_session))
        .route("/simulate-leave", post(simulate_leave))
}

async fn list_slots(State(state): State<AppState>, _actor: Actor) -> Result<Json<Vec<SlotView>>, AppError> {
    let slots = state.ledger.list_all(state.clock.utc()).await?;
    Ok(Json(slots.into_iter().map(SlotView::from).collect()))
}

async fn book_slot(
    State(state): State<AppState>,
    Patron(actor): Patron,
    JsonBody(req): JsonBody<SlotRequest>,
) -> Result<Json<Value>, AppError> {
    state.ledger.book(req.slot_id, actor.user_id, state.clock.utc()).await?;
    Ok(Json(json!({ "message": "Slot booked successfully" })))
}

async fn end_session(
    State(state): State<AppState>,
    Patron(actor): Patron,
    JsonBody(req): JsonBody<SlotRequest>,
) -> Result<Json<Value>, AppError> {
    state.ledger.end_session(req.slot_id, actor.user_id).await?;
    Ok(Json(json!({ "message": "Session ended successfully" })))
}

async fn simulate_leave(
    State(state): State<AppState>,
    _actor: Actor,
    JsonBody(req): JsonBody<SlotRequest>,
) -> Result<Json<Value>, AppError> {
    state.ledger.force_release(req.slot_id).await?;
    Ok(Json(json!({ "message": "Slot freed (simulated)" })))
}
