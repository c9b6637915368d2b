use axum::{
    extract::State,
    routing::{delete, get},
    Json, Router,
};
use chrono::{DateTime, Utc};
use libris_circulation::LoanStatement;
use libris_core::model::User;
use libris_shared::{BookId, LoanId, LoanStatus, Role, UserId};
use serde::Serialize;
use serde_json::{json, Value};

use crate::auth::{Actor, Admin};
use crate::extract::PathParam;
use crate::{error::AppError, state::AppState};

/// One row of a borrowing history. `fine` is settled for returned loans
/// and the running estimate while `accruing`.
#[derive(Debug, Serialize)]
pub struct LoanView {
    pub id: LoanId,
    pub book_id: BookId,
    pub title: String,
    pub author: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    pub issue_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub return_date: Option<DateTime<Utc>>,
    pub fine: i64,
    pub accruing: bool,
    pub status: LoanStatus,
}

impl From<LoanStatement> for LoanView {
    fn from(statement: LoanStatement) -> Self {
        let record = statement.record;
        let (username, role) = match record.borrower {
            Some(b) => (Some(b.username), Some(b.role)),
            None => (None, None),
        };

        Self {
            id: record.loan.id,
            book_id: record.loan.book_id,
            title: record.title,
            author: record.author,
            username,
            role,
            issue_date: record.loan.issue_date,
            due_date: record.loan.due_date,
            return_date: record.loan.return_date,
            fine: statement.fine,
            accruing: statement.accruing,
            status: record.loan.status,
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/history", get(history))
        .route("/all-transactions", get(all_transactions))
        .route("/all", get(list_users))
        .route("/{id}", delete(delete_user))
}

async fn history(State(state): State<AppState>, actor: Actor) -> Result<Json<Vec<LoanView>>, AppError> {
    let statements = state.desk.history(actor.user_id, state.clock.utc()).await?;
    Ok(Json(statements.into_iter().map(LoanView::from).collect()))
}

async fn all_transactions(State(state): State<AppState>, _admin: Admin) -> Result<Json<Vec<LoanView>>, AppError> {
    let statements = state.desk.all_loans(state.clock.utc()).await?;
    Ok(Json(statements.into_iter().map(LoanView::from).collect()))
}

async fn list_users(State(state): State<AppState>, _admin: Admin) -> Result<Json<Vec<User>>, AppError> {
    Ok(Json(state.roster.list().await?))
}

async fn delete_user(
    State(state): State<AppState>,
    Admin(admin): Admin,
    PathParam(user_id): PathParam<UserId>,
) -> Result<Json<Value>, AppError> {
    state.roster.remove(admin.user_id, user_id).await?;
    Ok(Json(json!({ "message": "User deleted successfully" })))
}
