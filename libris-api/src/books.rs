use axum::{
    extract::State,
    routing::{delete, get, post},
    Json, Router,
};
use libris_circulation::ReturnReceipt;
use libris_core::model::{BookListing, NewBook};
use libris_shared::BookId;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::{Actor, Admin, Patron};
use crate::extract::{JsonBody, PathParam, QueryParams};
use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Deserialize)]
pub struct BookRequest {
    #[serde(alias = "bookId")]
    pub book_id: BookId,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(add_book))
        .route("/search", get(search_books))
        .route("/borrow", post(borrow_book))
        .route("/return", post(return_book))
        .route("/{id}", delete(delete_book))
}

async fn search_books(
    State(state): State<AppState>,
    _actor: Actor,
    QueryParams(params): QueryParams<SearchParams>,
) -> Result<Json<Vec<BookListing>>, AppError> {
    Ok(Json(state.catalogue.search(&params.query).await?))
}

async fn borrow_book(
    State(state): State<AppState>,
    Patron(actor): Patron,
    JsonBody(req): JsonBody<BookRequest>,
) -> Result<Json<Value>, AppError> {
    let loan = state.desk.borrow(req.book_id, actor.user_id, state.clock.utc()).await?;
    Ok(Json(json!({
        "message": "Book borrowed successfully",
        "due_date": loan.due_date,
    })))
}

async fn return_book(
    State(state): State<AppState>,
    Patron(actor): Patron,
    JsonBody(req): JsonBody<BookRequest>,
) -> Result<Json<ReturnReceipt>, AppError> {
    let receipt = state.desk.return_book(req.book_id, actor.user_id, state.clock.utc()).await?;
    Ok(Json(receipt))
}

async fn add_book(
    State(state): State<AppState>,
    _admin: Admin,
    JsonBody(book): JsonBody<NewBook>,
) -> Result<Json<Value>, AppError> {
    let book = state.catalogue.add_book(book).await?;
    Ok(Json(json!({ "id": book.id, "message": "Book added" })))
}

async fn delete_book(
    State(state): State<AppState>,
    _admin: Admin,
    PathParam(book_id): PathParam<BookId>,
) -> Result<Json<Value>, AppError> {
    state.catalogue.delete_book(book_id).await?;
    Ok(Json(json!({ "message": "Book deleted" })))
}
