//! # sbc-payment-engine
//!
//! Payment intake, withdrawal orchestration, and a 3-level referral
//! commission engine for the SBC referral platform.
//!
//! ## Components
//!
//! - [`ledger`] — the append-mostly system of record for every balance mutation (C1)
//! - [`balance`] — the materialized per-user balance projection over the ledger (C2)
//! - [`gateways`] — one adapter per external payment/payout provider (C3)
//! - [`intents`] — opens provider sessions and settles webhooks into ledger entries (C4)
//! - [`commission`] — 3-level referral commission distribution (C5)
//! - [`withdrawal`] — OTP-gated withdrawal intake, admin approval, payout dispatch (C6)
//! - [`reconciler`] — background sweep reconciling stuck withdrawals (C7)
//! - [`activation`] — the segregated activation sub-ledger (C8)
//! - [`server`] — the public HTTP API surface (C9)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sbc_payment_engine::config::EngineConfig;
//! use sbc_payment_engine::telemetry;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! telemetry::init();
//! let config = EngineConfig::load();
//! println!("starting on port {}", config.port);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod activation;
pub mod auth;
pub mod balance;
pub mod collaborators;
pub mod commission;
pub mod config;
pub mod errors;
pub mod gateways;
pub mod intents;
pub mod ledger;
pub mod reconciler;
pub mod server;
pub mod telemetry;
pub mod types;
pub mod utils;
pub mod withdrawal;

pub use errors::{EngineError, Result};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_modules_are_accessible() {
        let _ = ledger::InMemoryLedger::new();
        let _ = balance::BalanceView::new();
    }
}
