use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::openai::{DEFAULT_MODEL, OPENAI_ENDPOINT};
use crate::store::write_json_atomic;

pub const API_KEY_ENV: &str = "BITEXT_API_KEY";
pub const FALLBACK_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const DEFAULT_LANGUAGE: &str = "es";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanguageOption {
    pub code: &'static str,
    pub label: &'static str,
}

pub const LANGUAGES: &[LanguageOption] = &[
    LanguageOption {
        code: "es",
        label: "Spanish",
    },
    LanguageOption {
        code: "fr",
        label: "French",
    },
    LanguageOption {
        code: "de",
        label: "German",
    },
    LanguageOption {
        code: "ja",
        label: "Japanese",
    },
    LanguageOption {
        code: "zh-Hans",
        label: "Chinese (Simplified)",
    },
];

pub fn language_label(code: &str) -> Option<&'static str> {
    LANGUAGES
        .iter()
        .find(|option| option.code == code)
        .map(|option| option.label)
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    #[value(name = "openai")]
    OpenAi,
    Custom,
}

impl Provider {
    /// Cache-key form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Custom => "custom",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::OpenAi => "OpenAI",
            Self::Custom => "Custom endpoint",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub target_language: String,
    pub provider: Provider,
    pub custom_endpoint: String,
    pub model: String,
    pub api_key: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            target_language: DEFAULT_LANGUAGE.to_owned(),
            provider: Provider::OpenAi,
            custom_endpoint: String::new(),
            model: DEFAULT_MODEL.to_owned(),
            api_key: String::new(),
        }
    }
}

impl Settings {
    /// Missing file yields defaults. Unknown language codes are reset.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(err).with_context(|| format!("read settings: {}", path.display()));
            }
        };
        let mut settings: Self = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse settings: {}", path.display()))?;
        if language_label(&settings.target_language).is_none() {
            tracing::warn!(
                language = %settings.target_language,
                "unknown target language in settings; using default"
            );
            settings.target_language = DEFAULT_LANGUAGE.to_owned();
        }
        Ok(settings)
    }

    pub async fn save(&self, path: &Path) -> anyhow::Result<()> {
        write_json_atomic(path, self)
            .await
            .with_context(|| format!("write settings: {}", path.display()))
    }

    /// `BITEXT_API_KEY` wins over `OPENAI_API_KEY`; empty values are ignored.
    pub fn apply_api_key_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let from_env = [API_KEY_ENV, FALLBACK_API_KEY_ENV]
            .into_iter()
            .filter_map(|name| lookup(name))
            .map(|value| value.trim().to_owned())
            .find(|value| !value.is_empty());
        if let Some(key) = from_env {
            self.api_key = key;
        }
    }

    pub fn effective_model(&self) -> &str {
        match self.model.trim() {
            "" => DEFAULT_MODEL,
            model => model,
        }
    }

    pub fn language_label(&self) -> &str {
        language_label(&self.target_language).unwrap_or(&self.target_language)
    }

    /// `None` for a custom provider without an endpoint.
    pub fn endpoint(&self) -> Option<&str> {
        match self.provider {
            Provider::OpenAi => Some(OPENAI_ENDPOINT),
            Provider::Custom => Some(self.custom_endpoint.trim()).filter(|e| !e.is_empty()),
        }
    }
}

pub fn settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join("settings.json")
}

pub fn validate_language(code: &str) -> anyhow::Result<()> {
    if language_label(code).is_none() {
        let known = LANGUAGES
            .iter()
            .map(|option| option.code)
            .collect::<Vec<_>>()
            .join(", ");
        anyhow::bail!("unsupported language: {code} (expected one of: {known})");
    }
    Ok(())
}

pub fn validate_endpoint(raw: &str) -> anyhow::Result<()> {
    let url = url::Url::parse(raw.trim()).with_context(|| format!("invalid endpoint: {raw}"))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => anyhow::bail!("endpoint must be http/https (got {other})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_yields_defaults_and_save_round_trips() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = settings_path(dir.path());
        assert_eq!(Settings::load(&path).await?, Settings::default());

        let settings = Settings {
            target_language: "ja".to_owned(),
            provider: Provider::Custom,
            custom_endpoint: "http://localhost:8080/v1/chat/completions".to_owned(),
            model: "local".to_owned(),
            api_key: "k".to_owned(),
        };
        settings.save(&path).await?;
        assert_eq!(Settings::load(&path).await?, settings);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_language_resets_to_default() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = settings_path(dir.path());
        tokio::fs::write(&path, r#"{"target_language":"xx","provider":"custom"}"#).await?;
        let settings = Settings::load(&path).await?;
        assert_eq!(settings.target_language, "es");
        assert_eq!(settings.provider, Provider::Custom);
        assert_eq!(settings.model, "gpt-4o-mini");
        Ok(())
    }

    #[test]
    fn endpoint_depends_on_provider() {
        let mut settings = Settings::default();
        assert_eq!(settings.endpoint(), Some(OPENAI_ENDPOINT));
        settings.provider = Provider::Custom;
        settings.custom_endpoint = "  ".to_owned();
        assert_eq!(settings.endpoint(), None);
        settings.custom_endpoint = " http://x/v1 ".to_owned();
        assert_eq!(settings.endpoint(), Some("http://x/v1"));
    }

    #[test]
    fn empty_model_falls_back() {
        let settings = Settings {
            model: " ".to_owned(),
            ..Settings::default()
        };
        assert_eq!(settings.effective_model(), "gpt-4o-mini");
    }

    #[test]
    fn api_key_env_precedence() {
        let mut settings = Settings::default();
        settings.apply_api_key_env(|name| match name {
            "BITEXT_API_KEY" => Some(" ".to_owned()),
            "OPENAI_API_KEY" => Some("sk-openai".to_owned()),
            _ => None,
        });
        assert_eq!(settings.api_key, "sk-openai");

        settings.apply_api_key_env(|name| (name == "BITEXT_API_KEY").then(|| "sk-bitext".to_owned()));
        assert_eq!(settings.api_key, "sk-bitext");

        settings.apply_api_key_env(|_| None);
        assert_eq!(settings.api_key, "sk-bitext");
    }

    #[test]
    fn endpoint_validation() {
        assert!(validate_endpoint("https://example.com/v1/chat/completions").is_ok());
        assert!(validate_endpoint("ftp://example.com").is_err());
        assert!(validate_endpoint("not a url").is_err());
        assert!(validate_language("zh-Hans").is_ok());
        assert!(validate_language("xx").is_err());
    }
}
