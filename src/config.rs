use log::warn;
use std::env;
use std::str::FromStr;

const DEFAULT_DATABASE_URL: &str = "sqlite:movie_night.db";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_CHECK_INTERVAL_SECONDS: u64 = 60;

/// Runtime settings, read from the environment (and `.env` if present).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub database_url: String,
    pub max_connections: u32,
    pub check_interval_seconds: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            check_interval_seconds: DEFAULT_CHECK_INTERVAL_SECONDS,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            max_connections: parse_or("DATABASE_MAX_CONNECTIONS", lookup("DATABASE_MAX_CONNECTIONS"), DEFAULT_MAX_CONNECTIONS),
            check_interval_seconds: parse_or(
                "ROUND_CHECK_INTERVAL_SECONDS",
                lookup("ROUND_CHECK_INTERVAL_SECONDS"),
                DEFAULT_CHECK_INTERVAL_SECONDS,
            ),
        }
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        None => default,
        Some(value) => value.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}={:?}, using {}", key, value, default);
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Settings {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        assert_eq!(settings(&[]), Settings::default());
    }

    #[test]
    fn values_are_read_from_the_environment() {
        let s = settings(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("DATABASE_MAX_CONNECTIONS", "2"),
            ("ROUND_CHECK_INTERVAL_SECONDS", " 15 "),
        ]);
        assert_eq!(s.database_url, "sqlite::memory:");
        assert_eq!(s.max_connections, 2);
        assert_eq!(s.check_interval_seconds, 15);
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let s = settings(&[("DATABASE_MAX_CONNECTIONS", "many")]);
        assert_eq!(s.max_connections, DEFAULT_MAX_CONNECTIONS);
    }
}
