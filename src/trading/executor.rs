//! Trading-execution collaborator.

use crate::types::{Address, CloseReason};
use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct OpenRequest {
    pub token: Address,
    /// Quoted price in USD
    pub price: f64,
    pub liquidity_usd: Option<f64>,
    pub size_sol: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CloseRequest {
    pub position_id: i64,
    pub token: Address,
    pub size_sol: f64,
    /// Last observed price, if any
    pub last_price: Option<f64>,
    pub reason: CloseReason,
}

/// Executed trade.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub price: f64,
    pub size_sol: f64,
    pub signature: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("order rejected: {0}")]
    Rejected(String),
    #[error("no price available for {0}")]
    NoPrice(Address),
    #[error("execution failed: {0}")]
    Failed(String),
}

/// Opens and closes positions on a venue.
#[async_trait]
pub trait TradingExecutor: Send + Sync {
    /// Positions opened through this executor are paper positions.
    fn is_simulated(&self) -> bool;

    async fn open(&self, request: &OpenRequest) -> Result<Fill, ExecutionError>;

    async fn close(&self, request: &CloseRequest) -> Result<Fill, ExecutionError>;
}

/// Fills every order at the quoted price without touching the chain.
#[derive(Debug, Default, Clone)]
pub struct PaperExecutor;

#[async_trait]
impl TradingExecutor for PaperExecutor {
    fn is_simulated(&self) -> bool {
        true
    }

    async fn open(&self, request: &OpenRequest) -> Result<Fill, ExecutionError> {
        if request.price <= 0.0 {
            return Err(ExecutionError::NoPrice(request.token.clone()));
        }
        info!(
            "Paper buy {} SOL of {} at {}",
            request.size_sol, request.token, request.price
        );
        Ok(Fill {
            price: request.price,
            size_sol: request.size_sol,
            signature: None,
        })
    }

    async fn close(&self, request: &CloseRequest) -> Result<Fill, ExecutionError> {
        let price = request
            .last_price
            .ok_or_else(|| ExecutionError::NoPrice(request.token.clone()))?;
        info!(
            "Paper sell position {} of {} at {} ({})",
            request.position_id, request.token, price, request.reason
        );
        Ok(Fill {
            price,
            size_sol: request.size_sol,
            signature: None,
        })
    }
}
