//! API Routes
//!
//! HTTP endpoint definitions.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

use crate::domain::{Account, AccountId, Balance};
use crate::error::AppError;
use crate::ledger::Ledger;

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AmountRequest {
    /// Decimal string, e.g. "100.50"
    pub amount: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub source_id: i64,
    pub destination_id: i64,
    pub amount: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub account_id: AccountId,
    pub balance: Balance,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResponse {
    pub source_id: AccountId,
    pub destination_id: AccountId,
    pub amount: Decimal,
    pub source_balance: Balance,
    pub destination_balance: Balance,
    pub status: String,
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<Arc<Ledger>> {
    Router::new()
        .route("/accounts", post(create_account).get(list_accounts))
        .route("/accounts/:id/balance", get(get_balance))
        .route("/accounts/:id/deposit", post(deposit))
        .route("/accounts/:id/withdraw", post(withdraw))
        .route("/transfers", post(transfer))
}

fn parse_amount(raw: &str) -> Result<Decimal, AppError> {
    Decimal::from_str(raw.trim())
        .map_err(|e| AppError::Validation(format!("Invalid amount '{}': {}", raw, e)))
}

// =========================================================================
// Accounts
// =========================================================================

/// Open a new account
async fn create_account(
    State(ledger): State<Arc<Ledger>>,
    Json(request): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<Account>), AppError> {
    let account = ledger.create_account(&request.name).await?;

    Ok((StatusCode::CREATED, Json(account)))
}

/// List every account
async fn list_accounts(State(ledger): State<Arc<Ledger>>) -> Result<Json<Vec<Account>>, AppError> {
    Ok(Json(ledger.list_accounts().await?))
}

/// Current balance of one account
async fn get_balance(
    State(ledger): State<Arc<Ledger>>,
    Path(id): Path<i64>,
) -> Result<Json<BalanceResponse>, AppError> {
    let account_id = AccountId::new(id);
    let balance = ledger.get_balance(account_id).await?;

    Ok(Json(BalanceResponse {
        account_id,
        balance,
    }))
}

// =========================================================================
// Mutations
// =========================================================================

async fn deposit(
    State(ledger): State<Arc<Ledger>>,
    Path(id): Path<i64>,
    Json(request): Json<AmountRequest>,
) -> Result<Json<BalanceResponse>, AppError> {
    let account_id = AccountId::new(id);
    let balance = ledger
        .deposit(account_id, parse_amount(&request.amount)?)
        .await?;

    Ok(Json(BalanceResponse {
        account_id,
        balance,
    }))
}

async fn withdraw(
    State(ledger): State<Arc<Ledger>>,
    Path(id): Path<i64>,
    Json(request): Json<AmountRequest>,
) -> Result<Json<BalanceResponse>, AppError> {
    let account_id = AccountId::new(id);
    let balance = ledger
        .withdraw(account_id, parse_amount(&request.amount)?)
        .await?;

    Ok(Json(BalanceResponse {
        account_id,
        balance,
    }))
}

async fn transfer(
    State(ledger): State<Arc<Ledger>>,
    Json(request): Json<TransferRequest>,
) -> Result<Json<TransferResponse>, AppError> {
    let receipt = ledger
        .transfer(
            AccountId::new(request.source_id),
            AccountId::new(request.destination_id),
            parse_amount(&request.amount)?,
        )
        .await?;

    Ok(Json(TransferResponse {
        source_id: receipt.source_id,
        destination_id: receipt.destination_id,
        amount: receipt.amount.value(),
        source_balance: receipt.source_balance,
        destination_balance: receipt.destination_balance,
        status: "completed".to_string(),
    }))
}
