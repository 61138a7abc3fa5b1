pub mod audit;
pub mod catalog;
pub mod domain;
pub mod error;
pub mod guardrails;
pub mod ingest;
pub mod persona;
pub mod pipeline;
pub mod recommend;
pub mod signals;
pub mod time;

pub mod config {
    use anyhow::Context;
    use serde::{Deserialize, Serialize};

    /// Whether invariant violations abort (development, tests) or degrade to `unclassified`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum Strictness {
        Strict,
        #[default]
        Lenient,
    }

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub sentry_dsn: Option<String>,
        pub catalog_path: Option<String>,
        pub record_provider_base_url: Option<String>,
        pub record_provider_api_key: Option<String>,
        pub strict: bool,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let strict = match std::env::var("PIPELINE_STRICT") {
                Ok(s) => parse_bool(&s)
                    .with_context(|| format!("PIPELINE_STRICT must be a boolean (got {s:?})"))?,
                Err(_) => false,
            };

            Ok(Self {
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                catalog_path: std::env::var("CATALOG_PATH")
                    .ok()
                    .filter(|s| !s.trim().is_empty()),
                record_provider_base_url: std::env::var("RECORD_PROVIDER_BASE_URL").ok(),
                record_provider_api_key: std::env::var("RECORD_PROVIDER_API_KEY").ok(),
                strict,
            })
        }

        pub fn strictness(&self) -> Strictness {
            if self.strict {
                Strictness::Strict
            } else {
                Strictness::Lenient
            }
        }

        pub fn require_record_provider_base_url(&self) -> anyhow::Result<&str> {
            self.record_provider_base_url
                .as_deref()
                .context("RECORD_PROVIDER_BASE_URL is required")
        }
    }

    fn parse_bool(s: &str) -> Option<bool> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" | "" => Some(false),
            _ => None,
        }
    }

}
