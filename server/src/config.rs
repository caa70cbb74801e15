use std::net::{IpAddr, Ipv4Addr};

use anyhow::{Context, Result};
use crm::email::EmailSettings;

const DEFAULT_ORIGINS: &str = "http://localhost:5173";
const DEFAULT_PORT: u16 = 8080;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub host: IpAddr,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
    pub email: EmailSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            cors_allowed_origins: parse_origins(DEFAULT_ORIGINS),
            email: EmailSettings::default(),
        }
    }
}

impl AppConfig {
    /// Reads `HOST`, `PORT`, `CORS_ALLOWED_ORIGINS` and the email settings.
    /// Call after `.env` has been loaded.
    pub fn load() -> Result<Self> {
        let defaults = Self::default();
        let host = match std::env::var("HOST") {
            Ok(raw) => raw.trim().parse().context("invalid HOST")?,
            Err(_) => defaults.host,
        };
        let port = match std::env::var("PORT") {
            Ok(raw) => raw.trim().parse().context("invalid PORT")?,
            Err(_) => defaults.port,
        };
        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .map(|raw| parse_origins(&raw))
            .unwrap_or(defaults.cors_allowed_origins);

        Ok(Self {
            host,
            port,
            cors_allowed_origins,
            email: EmailSettings::from_env(),
        })
    }
}

/// `*` allows any origin.
fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origins_are_trimmed_and_blank_entries_dropped() {
        assert_eq!(
            parse_origins(" http://a.test , ,http://b.test,"),
            ["http://a.test", "http://b.test"]
        );
        assert!(parse_origins("").is_empty());
    }
}
