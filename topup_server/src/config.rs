use std::{env, fmt::Display, str::FromStr, time::Duration};

use log::*;
use topup_common::{helpers::parse_boolean_flag, Cents, Secret};
use topup_engine::{
    engine_api::initiation_api::DEFAULT_MAX_TOPUP,
    helpers::RetryPolicy,
    CreditSettings,
};

const DEFAULT_TOPUP_HOST: &str = "127.0.0.1";
const DEFAULT_TOPUP_PORT: u16 = 8370;
const DEFAULT_SIGNATURE_HEADER: &str = "x-paystack-signature";
const DEFAULT_GATEWAY_URL: &str = "https://api.paystack.co";
const DEFAULT_PENDING_CHARGE_TIMEOUT_MINS: i64 = 10;
const DEFAULT_RECONCILE_INTERVAL_MINS: u64 = 15;
const DEFAULT_RECONCILE_DAYS_BACK: i64 = 7;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub webhook: WebhookOptions,
    /// Required in the `x-operator-key` header of every `/api` request. If empty, all `/api` requests are refused.
    pub operator_key: Secret<String>,
    pub retry: RetryPolicy,
    pub credit: CreditSettings,
    /// The fraud ceiling for a single top-up.
    pub max_topup: Cents,
    /// How long a charge may stay pending before the reconciler treats it as unfulfilled.
    pub pending_charge_timeout: chrono::Duration,
    /// Time between scheduled reconciliation runs. Zero disables the worker.
    pub reconcile_interval: Duration,
    pub reconcile_days_back: i64,
    pub gateway: GatewayConfig,
    /// The Redis server for the distributed lock service. Only used with the `redis` feature.
    pub redis_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_TOPUP_HOST.to_string(),
            port: DEFAULT_TOPUP_PORT,
            database_url: String::default(),
            webhook: WebhookOptions::default(),
            operator_key: Secret::default(),
            retry: RetryPolicy::default(),
            credit: CreditSettings::default(),
            max_topup: DEFAULT_MAX_TOPUP,
            pending_charge_timeout: chrono::Duration::minutes(DEFAULT_PENDING_CHARGE_TIMEOUT_MINS),
            reconcile_interval: Duration::from_secs(DEFAULT_RECONCILE_INTERVAL_MINS * 60),
            reconcile_days_back: DEFAULT_RECONCILE_DAYS_BACK,
            gateway: GatewayConfig::default(),
            redis_url: None,
        }
    }
}

/// The subset of the configuration that the webhook handler needs. The secret itself lives in the `WebhookApi`.
#[derive(Clone, Debug)]
pub struct WebhookOptions {
    pub secret: Secret<String>,
    pub signature_header: String,
    /// When true, events that were dead-lettered are still acknowledged with a 200, so the gateway stops redelivering
    /// them. When false, they get a 500 and the gateway's own retries act as a second line.
    pub ack_dead_letters: bool,
}

impl Default for WebhookOptions {
    fn default() -> Self {
        Self {
            secret: Secret::default(),
            signature_header: DEFAULT_SIGNATURE_HEADER.to_string(),
            ack_dead_letters: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub base_url: String,
    pub secret_key: Secret<String>,
    /// Where the gateway sends the user after payment. Normally `https://<this server>/topups/callback`.
    pub callback_url: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self { base_url: DEFAULT_GATEWAY_URL.to_string(), secret_key: Secret::default(), callback_url: None }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("TOPUP_HOST").ok().unwrap_or_else(|| DEFAULT_TOPUP_HOST.into());
        let port = parse_env("TOPUP_PORT", DEFAULT_TOPUP_PORT);
        let database_url = env::var("TOPUP_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ TOPUP_DATABASE_URL is not set. Please set it to the URL for the top-up database.");
            String::default()
        });
        let webhook = WebhookOptions::from_env_or_defaults();
        let operator_key = secret_from_env("TOPUP_OPERATOR_KEY");
        if operator_key.reveal().is_empty() {
            warn!("🪛️ TOPUP_OPERATOR_KEY is not set. Every /api request will be refused.");
        }
        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_retries: parse_env("TOPUP_MAX_RETRIES", defaults.max_retries),
            base_delay: Duration::from_millis(parse_env("TOPUP_RETRY_BASE_MS", 200)),
            ..defaults
        };
        let credit = CreditSettings {
            lock_ttl: Duration::from_millis(parse_env("TOPUP_LOCK_TTL_MS", 10_000)),
            lock_wait: Duration::from_millis(parse_env("TOPUP_LOCK_WAIT_MS", 5_000)),
        };
        let max_topup = Cents::from(parse_env("TOPUP_MAX_TOPUP_CENTS", DEFAULT_MAX_TOPUP.value()));
        let pending_mins = parse_env("TOPUP_PENDING_CHARGE_TIMEOUT_MINS", DEFAULT_PENDING_CHARGE_TIMEOUT_MINS);
        let pending_charge_timeout = chrono::Duration::try_minutes(pending_mins).unwrap_or_else(|| {
            error!("🪛️ TOPUP_PENDING_CHARGE_TIMEOUT_MINS of {pending_mins} is out of range. Using the default.");
            chrono::Duration::minutes(DEFAULT_PENDING_CHARGE_TIMEOUT_MINS)
        });
        let interval_mins = parse_env("TOPUP_RECONCILE_INTERVAL_MINS", DEFAULT_RECONCILE_INTERVAL_MINS);
        let reconcile_interval = interval_mins.checked_mul(60).map(Duration::from_secs).unwrap_or_else(|| {
            error!("🪛️ TOPUP_RECONCILE_INTERVAL_MINS of {interval_mins} is out of range. Using the default.");
            Duration::from_secs(DEFAULT_RECONCILE_INTERVAL_MINS * 60)
        });
        let mut reconcile_days_back = parse_env("TOPUP_RECONCILE_DAYS_BACK", DEFAULT_RECONCILE_DAYS_BACK);
        if chrono::Duration::try_days(reconcile_days_back).is_none() {
            error!("🪛️ TOPUP_RECONCILE_DAYS_BACK of {reconcile_days_back} is out of range. Using the default.");
            reconcile_days_back = DEFAULT_RECONCILE_DAYS_BACK;
        }
        let gateway = GatewayConfig::from_env_or_defaults();
        let redis_url = env::var("TOPUP_REDIS_URL").ok().filter(|s| !s.trim().is_empty());
        Self {
            host,
            port,
            database_url,
            webhook,
            operator_key,
            retry,
            credit,
            max_topup,
            pending_charge_timeout,
            reconcile_interval,
            reconcile_days_back,
            gateway,
            redis_url,
        }
    }
}

impl WebhookOptions {
    pub fn from_env_or_defaults() -> Self {
        let secret = secret_from_env("TOPUP_WEBHOOK_SECRET");
        if secret.reveal().is_empty() {
            error!(
                "🪛️ TOPUP_WEBHOOK_SECRET is not set. Please set it to the webhook signing secret of your payment \
                 gateway. Every webhook will be rejected until you do."
            );
        }
        let signature_header = env::var("TOPUP_SIGNATURE_HEADER").ok().unwrap_or_else(|| {
            info!("🪛️ TOPUP_SIGNATURE_HEADER is not set. Using {DEFAULT_SIGNATURE_HEADER}.");
            DEFAULT_SIGNATURE_HEADER.to_string()
        });
        let ack_dead_letters = parse_boolean_flag(env::var("TOPUP_ACK_DEAD_LETTERS").ok(), true);
        Self { secret, signature_header, ack_dead_letters }
    }
}

impl GatewayConfig {
    pub fn from_env_or_defaults() -> Self {
        let base_url = env::var("TOPUP_GATEWAY_URL").ok().unwrap_or_else(|| {
            info!("🪛️ TOPUP_GATEWAY_URL is not set. Using {DEFAULT_GATEWAY_URL}.");
            DEFAULT_GATEWAY_URL.to_string()
        });
        let secret_key = secret_from_env("TOPUP_GATEWAY_SECRET_KEY");
        if secret_key.reveal().is_empty() {
            warn!("🪛️ TOPUP_GATEWAY_SECRET_KEY is not set. Top-up initiation and callbacks will fail.");
        }
        let callback_url = env::var("TOPUP_CALLBACK_URL").ok().filter(|s| !s.trim().is_empty());
        Self { base_url: base_url.trim_end_matches('/').to_string(), secret_key, callback_url }
    }
}

fn secret_from_env(name: &str) -> Secret<String> {
    Secret::new(env::var(name).ok().unwrap_or_default())
}

/// Reads `name` from the environment, falling back to `default` (with a log line) if it is missing or invalid.
fn parse_env<T>(name: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(name) {
        Ok(s) => s.trim().parse::<T>().unwrap_or_else(|e| {
            error!("🪛️ {s} is not a valid value for {name}. {e} Using the default, {default}, instead.");
            default
        }),
        Err(_) => {
            debug!("🪛️ {name} is not set. Using the default, {default}.");
            default
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        env::set_var("TOPUP_TEST_PARSE_GOOD", " 42 ");
        env::set_var("TOPUP_TEST_PARSE_BAD", "forty-two");
        assert_eq!(parse_env("TOPUP_TEST_PARSE_GOOD", 7u64), 42);
        assert_eq!(parse_env("TOPUP_TEST_PARSE_BAD", 7u64), 7);
        assert_eq!(parse_env("TOPUP_TEST_PARSE_MISSING", -3i64), -3);
    }

    #[test]
    fn defaults() {
        let config = ServerConfig::new("0.0.0.0", 9000);
        assert_eq!(config.port, 9000);
        assert_eq!(config.max_topup, Cents::from_dollars(10_000));
        assert_eq!(config.retry.max_attempts(), 5);
        assert_eq!(config.webhook.signature_header, "x-paystack-signature");
        assert!(config.webhook.ack_dead_letters);
        assert_eq!(config.reconcile_interval, Duration::from_secs(900));
    }

    #[test]
    fn out_of_range_windows_fall_back_to_defaults() {
        env::set_var("TOPUP_PENDING_CHARGE_TIMEOUT_MINS", i64::MAX.to_string());
        env::set_var("TOPUP_RECONCILE_INTERVAL_MINS", u64::MAX.to_string());
        env::set_var("TOPUP_RECONCILE_DAYS_BACK", "9223372036854775807");
        let config = ServerConfig::from_env_or_default();
        assert_eq!(config.pending_charge_timeout, chrono::Duration::minutes(10));
        assert_eq!(config.reconcile_interval, Duration::from_secs(900));
        assert_eq!(config.reconcile_days_back, 7);
    }
}
