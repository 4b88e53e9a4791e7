//! Billing service client and its DTOs.

mod client;
mod models;

pub use client::BillingClient;
pub use models::{
    Cost, CreateGenerationRequest, CreateUsageRequest, Currency, FinalizeHoldResponse,
    HoldResponse, ModelRate, TokenCount,
};
