//! Process configuration: a `clap`-derived struct sourced from CLI flags and
//! environment variables, with `.env` loaded first via `dotenvy` — the same
//! split the teacher corpus's `X402ClientConfig`/`FacilitatorConfig` make
//! between construction-time validation and env-driven defaults.

use clap::Parser;
use rust_decimal::Decimal;
use std::str::FromStr;

fn parse_decimal(s: &str) -> Result<Decimal, String> {
    Decimal::from_str(s).map_err(|e| e.to_string())
}

#[derive(Parser, Debug, Clone)]
#[command(name = "sbc-payment-engine", about = "Payment intake, withdrawal, and commission engine")]
pub struct EngineConfig {
    /// Deployment mode, e.g. "development" / "production".
    #[arg(long, env = "NODE_ENV", default_value = "development")]
    pub node_env: String,

    #[arg(long, env = "PORT", default_value_t = 4000)]
    pub port: u16,

    /// Connection string for a future durable ledger backend; unused by the
    /// in-memory `InMemoryLedger` but kept as a config surface so swapping
    /// backends doesn't require a config-shape change.
    #[arg(long, env = "DB_URI", default_value = "")]
    pub db_uri: String,

    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: String,

    #[arg(long, env = "SERVICE_SECRET")]
    pub service_secret: String,

    #[arg(long, env = "USER_SERVICE_URL")]
    pub user_service_url: String,

    #[arg(long, env = "NOTIFICATION_SERVICE_URL")]
    pub notification_service_url: String,

    #[arg(long, env = "CINETPAY_BASE_URL", default_value = "https://api-checkout.cinetpay.com")]
    pub cinetpay_base_url: String,
    #[arg(long, env = "CINETPAY_API_KEY", default_value = "")]
    pub cinetpay_api_key: String,
    #[arg(long, env = "CINETPAY_SITE_ID", default_value = "")]
    pub cinetpay_site_id: String,

    #[arg(long, env = "FEEXPAY_BASE_URL", default_value = "https://api.feexpay.me")]
    pub feexpay_base_url: String,
    #[arg(long, env = "FEEXPAY_API_TOKEN", default_value = "")]
    pub feexpay_api_token: String,
    #[arg(long, env = "FEEXPAY_WITHDRAWALS_ENABLED", default_value_t = false)]
    pub feexpay_withdrawals_enabled: bool,

    #[arg(long, env = "NOWPAYMENTS_BASE_URL", default_value = "https://api.nowpayments.io")]
    pub nowpayments_base_url: String,
    #[arg(long, env = "NOWPAYMENTS_API_KEY", default_value = "")]
    pub nowpayments_api_key: String,
    #[arg(long, env = "NOWPAYMENTS_IPN_SECRET", default_value = "")]
    pub nowpayments_ipn_secret: String,

    /// Default ledger currency for amounts that arrive without an explicit one.
    #[arg(long, env = "CURRENCY", default_value = "XAF")]
    pub currency: String,

    #[arg(long, env = "DAILY_WITHDRAWAL_LIMIT", default_value = "500000", value_parser = parse_decimal)]
    pub daily_withdrawal_limit: Decimal,

    #[arg(long, env = "MAX_WITHDRAWALS_PER_DAY", default_value_t = 3)]
    pub max_withdrawals_per_day: u32,

    /// Flat component of the withdrawal fee, in the withdrawal's own currency.
    #[arg(long, env = "WITHDRAWAL_FEE_FIXED", default_value = "0", value_parser = parse_decimal)]
    pub withdrawal_fee_fixed: Decimal,

    /// Percentage component of the withdrawal fee, e.g. "0.01" for 1%.
    #[arg(long, env = "WITHDRAWAL_FEE_PERCENT", default_value = "0.01", value_parser = parse_decimal)]
    pub withdrawal_fee_percent: Decimal,

    #[arg(long, env = "MIN_MOBILE_MONEY_WITHDRAWAL", default_value = "500", value_parser = parse_decimal)]
    pub min_mobile_money_withdrawal: Decimal,

    #[arg(long, env = "MIN_CRYPTO_WITHDRAWAL_USD", default_value = "10", value_parser = parse_decimal)]
    pub min_crypto_withdrawal_usd: Decimal,
}

impl EngineConfig {
    /// Loads `.env` (if present) before parsing, matching local-dev ergonomics;
    /// a missing `.env` file is not an error.
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_required_env() {
        let config = EngineConfig::parse_from([
            "sbc-payment-engine",
            "--jwt-secret",
            "s1",
            "--service-secret",
            "s2",
            "--user-service-url",
            "http://user",
            "--notification-service-url",
            "http://notif",
        ]);
        assert_eq!(config.port, 4000);
        assert_eq!(config.max_withdrawals_per_day, 3);
        assert_eq!(config.daily_withdrawal_limit, Decimal::from_str("500000").unwrap());
    }
}
