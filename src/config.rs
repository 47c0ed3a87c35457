//! Configuration types.
//!
//! Everything is read from environment variables. [`AppConfig::from_lookup`]
//! takes the lookup as a closure so tests can supply a map.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::channels::TelegramMode;
use crate::error::ConfigError;
use crate::llm::{DEFAULT_MAX_TOKENS, DEFAULT_MODEL, LlmConfig};
use crate::store::gateway::DEFAULT_STORE_TIMEOUT;

pub const DEFAULT_DB_PATH: &str = "./data/pet-butler.db";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(60);

/// Telegram settings, present when a bot token is configured.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    pub mode: TelegramMode,
}

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub telegram: Option<TelegramConfig>,
    pub cli: bool,
    pub db_path: PathBuf,
    pub port: u16,
    pub store_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get("OPENROUTER_API_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("OPENROUTER_API_KEY".to_string()))?;

        let llm = LlmConfig {
            api_key: SecretString::from(api_key),
            model: get("PET_BUTLER_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens: parse_or(&get, "PET_BUTLER_MAX_TOKENS", DEFAULT_MAX_TOKENS)?,
            timeout: secs_or(&get, "PET_BUTLER_LLM_TIMEOUT_SECS", DEFAULT_LLM_TIMEOUT)?,
        };

        // Webhooks need a public URL, so they are only used in production.
        let production = get("PET_BUTLER_ENV").is_some_and(|v| v == "production");
        let telegram = get("TELEGRAM_BOT_TOKEN").map(|token| {
            let mode = match get("WEBHOOK_URL") {
                Some(url) if production => TelegramMode::Webhook {
                    url,
                    secret: SecretString::from(
                        get("TELEGRAM_WEBHOOK_SECRET")
                            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string()),
                    ),
                },
                _ => TelegramMode::Polling,
            };
            TelegramConfig {
                bot_token: SecretString::from(token),
                mode,
            }
        });

        let cli = match get("PET_BUTLER_CLI") {
            Some(v) => parse_bool("PET_BUTLER_CLI", &v)?,
            None => false,
        };

        if telegram.is_none() && !cli {
            return Err(ConfigError::MissingRequired {
                key: "TELEGRAM_BOT_TOKEN".to_string(),
                hint: "set a Telegram bot token or PET_BUTLER_CLI=1".to_string(),
            });
        }

        Ok(Self {
            llm,
            telegram,
            cli,
            db_path: get("PET_BUTLER_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            port: parse_or(&get, "PORT", DEFAULT_PORT)?,
            store_timeout: secs_or(&get, "PET_BUTLER_STORE_TIMEOUT_SECS", DEFAULT_STORE_TIMEOUT)?,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
        None => Ok(default),
    }
}

fn secs_or<G>(get: &G, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let secs: u64 = parse_or(get, key, default.as_secs())?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be at least 1 second".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?} is not a boolean"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let cfg = load(&[("OPENROUTER_API_KEY", "sk"), ("TELEGRAM_BOT_TOKEN", "t")]).unwrap();
        assert_eq!(cfg.llm.model, "x-ai/grok-3-mini");
        assert_eq!(cfg.llm.max_tokens, 1500);
        assert_eq!(cfg.llm.timeout, Duration::from_secs(60));
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.db_path, PathBuf::from("./data/pet-butler.db"));
        assert_eq!(cfg.store_timeout, Duration::from_secs(10));
        assert!(!cfg.cli);
        assert!(matches!(
            cfg.telegram.unwrap().mode,
            TelegramMode::Polling
        ));
    }

    #[test]
    fn missing_api_key_is_reported() {
        let err = load(&[("TELEGRAM_BOT_TOKEN", "t")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(k) if k == "OPENROUTER_API_KEY"));
    }

    #[test]
    fn some_channel_is_required() {
        let err = load(&[("OPENROUTER_API_KEY", "sk")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { .. }));

        let cfg = load(&[("OPENROUTER_API_KEY", "sk"), ("PET_BUTLER_CLI", "1")]).unwrap();
        assert!(cfg.cli);
        assert!(cfg.telegram.is_none());
    }

    #[test]
    fn webhook_mode_only_in_production() {
        let base = [
            ("OPENROUTER_API_KEY", "sk"),
            ("TELEGRAM_BOT_TOKEN", "t"),
            ("WEBHOOK_URL", "https://bot.example.com"),
            ("TELEGRAM_WEBHOOK_SECRET", "s3cret"),
        ];
        let cfg = load(&base).unwrap();
        assert!(matches!(cfg.telegram.unwrap().mode, TelegramMode::Polling));

        let mut prod = base.to_vec();
        prod.push(("PET_BUTLER_ENV", "production"));
        match load(&prod).unwrap().telegram.unwrap().mode {
            TelegramMode::Webhook { url, secret } => {
                assert_eq!(url, "https://bot.example.com");
                assert_eq!(secret.expose_secret(), "s3cret");
            }
            TelegramMode::Polling => panic!("expected webhook mode"),
        }
    }

    #[test]
    fn webhook_secret_is_generated_when_unset() {
        let cfg = load(&[
            ("OPENROUTER_API_KEY", "sk"),
            ("TELEGRAM_BOT_TOKEN", "t"),
            ("WEBHOOK_URL", "https://bot.example.com"),
            ("PET_BUTLER_ENV", "production"),
        ])
        .unwrap();
        let TelegramMode::Webhook { secret, .. } = cfg.telegram.unwrap().mode else {
            panic!("expected webhook mode");
        };
        assert_eq!(secret.expose_secret().len(), 32);
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        for (key, value) in [
            ("PORT", "eighty"),
            ("PET_BUTLER_MAX_TOKENS", "-1"),
            ("PET_BUTLER_STORE_TIMEOUT_SECS", "0"),
            ("PET_BUTLER_CLI", "maybe"),
        ] {
            let err = load(&[("OPENROUTER_API_KEY", "sk"), ("PET_BUTLER_CLI", "1"), (key, value)]);
            assert!(
                matches!(err, Err(ConfigError::InvalidValue { .. })),
                "{key}={value} should be rejected"
            );
        }
    }
}
