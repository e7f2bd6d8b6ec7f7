use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_ALLOWED_ORIGINS: &[&str] = &["http://127.0.0.1:5173", "https://zuno10.github.io"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ModelParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
}

/// One layer of model configuration; unset fields defer to the next layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ModelOverrides {
    pub model: Option<String>,
    pub model_params: Option<ModelParams>,
}

impl ModelOverrides {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        fn parsed<T: std::str::FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
        where
            T::Err: std::error::Error + Send + Sync + 'static,
        {
            get(key).map(|v| v.trim().parse::<T>().with_context(|| format!("invalid {key}={v}"))).transpose()
        }
        let params = ModelParams {
            temperature: parsed(&get, "RELAY_TEMPERATURE")?,
            max_tokens: parsed(&get, "RELAY_MAX_TOKENS")?,
            top_p: parsed(&get, "RELAY_TOP_P")?,
        };
        Ok(Self {
            model: get("RELAY_MODEL").filter(|m| !m.trim().is_empty()),
            model_params: (params != ModelParams::default()).then_some(params),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EffectiveModelSettings {
    pub model: String,
    pub params: ModelParams,
}

/// Resolves model settings with precedence cli > env > built-in default.
pub fn resolve_model_settings(env: &ModelOverrides, cli: &ModelOverrides) -> EffectiveModelSettings {
    let model = cli
        .model
        .clone()
        .or_else(|| env.model.clone())
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());

    let params = ModelParams {
        temperature: cli
            .model_params
            .as_ref()
            .and_then(|p| p.temperature)
            .or_else(|| env.model_params.as_ref().and_then(|p| p.temperature)),
        max_tokens: cli
            .model_params
            .as_ref()
            .and_then(|p| p.max_tokens)
            .or_else(|| env.model_params.as_ref().and_then(|p| p.max_tokens)),
        top_p: cli
            .model_params
            .as_ref()
            .and_then(|p| p.top_p)
            .or_else(|| env.model_params.as_ref().and_then(|p| p.top_p)),
    };

    EffectiveModelSettings { model, params }
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub listen: SocketAddr,
    pub characters: PathBuf,
    pub base_url: Option<String>,
    pub allowed_origins: Vec<String>,
    pub metrics_listen: Option<SocketAddr>,
    pub model: EffectiveModelSettings,
}

impl ServerSettings {
    pub fn origins(&self) -> Vec<String> {
        if self.allowed_origins.is_empty() {
            DEFAULT_ALLOWED_ORIGINS.iter().map(|o| o.to_string()).collect()
        } else {
            self.allowed_origins.clone()
        }
    }
}

pub fn validate_base_url(raw: &str) -> anyhow::Result<String> {
    let parsed = url::Url::parse(raw).with_context(|| format!("invalid base url {raw}"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(raw.trim_end_matches('/').to_string()),
        other => anyhow::bail!("unsupported base url scheme '{other}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn precedence_cli_over_env_over_default() {
        let env = ModelOverrides {
            model: Some("env-model".into()),
            model_params: Some(ModelParams { temperature: Some(0.1), max_tokens: Some(1000), top_p: Some(0.9) }),
        };
        let cli = ModelOverrides {
            model: None,
            model_params: Some(ModelParams { temperature: Some(0.7), max_tokens: None, top_p: None }),
        };

        let eff = resolve_model_settings(&env, &cli);
        assert_eq!(eff.model, "env-model");
        assert_eq!(eff.params.temperature, Some(0.7)); // from cli
        assert_eq!(eff.params.max_tokens, Some(1000)); // from env
        assert_eq!(eff.params.top_p, Some(0.9));

        let bare = resolve_model_settings(&ModelOverrides::default(), &ModelOverrides::default());
        assert_eq!(bare.model, DEFAULT_MODEL);
        assert_eq!(bare.params, ModelParams::default());
    }

    #[test]
    fn env_layer_parses_and_rejects_garbage() {
        let vars: HashMap<&str, &str> = [("RELAY_MODEL", "m"), ("RELAY_MAX_TOKENS", "256")].into();
        let o = ModelOverrides::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(o.model.as_deref(), Some("m"));
        assert_eq!(o.model_params.unwrap().max_tokens, Some(256));

        let empty = ModelOverrides::from_lookup(|_| None).unwrap();
        assert_eq!(empty, ModelOverrides::default());

        let bad = ModelOverrides::from_lookup(|k| (k == "RELAY_TEMPERATURE").then(|| "warm".to_string()));
        assert!(bad.is_err());
    }

    #[test]
    fn base_url_must_be_http() {
        assert_eq!(validate_base_url("http://localhost:8080/v1/").unwrap(), "http://localhost:8080/v1");
        assert!(validate_base_url("ftp://x").is_err());
        assert!(validate_base_url("not a url").is_err());
    }
}
