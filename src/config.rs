use crate::BoxError;
use crate::payslip::ParserConfig;
use serde::Deserialize;
use std::str::FromStr;
use std::{fs, path::Path};
use toml_edit::{DocumentMut, value};

pub const DEFAULT_CONFIG_PATH: &str = ".config/payslip.toml";

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default)]
    pub parser: ParserSection,
    #[serde(default)]
    pub vision: VisionSection,
}

fn default_db_path() -> String {
    "payslips/payslips.db".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            parser: ParserSection::default(),
            vision: VisionSection::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ParserSection {
    #[serde(default = "default_min_amount")]
    pub min_amount: i64,
}

fn default_min_amount() -> i64 {
    10
}

impl Default for ParserSection {
    fn default() -> Self {
        Self {
            min_amount: default_min_amount(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisionBackend {
    #[default]
    Ollama,
    Remote,
    /// Vision disabled; only text and text-layer PDFs can be read.
    None,
}

impl VisionBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisionBackend::Ollama => "ollama",
            VisionBackend::Remote => "remote",
            VisionBackend::None => "none",
        }
    }
}

impl FromStr for VisionBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ollama" => Ok(VisionBackend::Ollama),
            "remote" => Ok(VisionBackend::Remote),
            "none" => Ok(VisionBackend::None),
            other => Err(format!("unknown vision backend: {other}")),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct VisionSection {
    #[serde(default)]
    pub backend: VisionBackend,
    #[serde(default = "default_ollama")]
    pub ollama: EndpointConfig,
    #[serde(default = "default_remote")]
    pub remote: EndpointConfig,
}

impl Default for VisionSection {
    fn default() -> Self {
        Self {
            backend: VisionBackend::default(),
            ollama: default_ollama(),
            remote: default_remote(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_ollama() -> EndpointConfig {
    EndpointConfig {
        base_url: "http://localhost:11434/v1".to_string(),
        model: "qwen2.5vl:7b".to_string(),
        timeout_secs: 120,
    }
}

fn default_remote() -> EndpointConfig {
    EndpointConfig {
        base_url: "https://api.openai.com/v1".to_string(),
        model: "gpt-4o-mini".to_string(),
        timeout_secs: default_timeout_secs(),
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BoxError> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Like [`Config::load`], but a missing file means defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, BoxError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parser tunables from the file; user category rules are layered on
    /// by the settings store.
    pub fn parser_config(&self) -> ParserConfig {
        ParserConfig {
            min_amount: self.parser.min_amount,
            ..ParserConfig::default()
        }
    }

    /// Switch the vision backend and its model in place, keeping the rest
    /// of the file (comments included) untouched.
    pub fn update_vision_model(
        path: impl AsRef<Path>,
        backend: VisionBackend,
        model: &str,
    ) -> Result<(), BoxError> {
        let content = if path.as_ref().exists() {
            fs::read_to_string(&path)?
        } else {
            String::new()
        };
        let mut doc = content.parse::<DocumentMut>()?;

        let name = backend.as_str();
        doc["vision"]["backend"] = value(name);
        if backend != VisionBackend::None {
            let defaults = match backend {
                VisionBackend::Remote => default_remote(),
                _ => default_ollama(),
            };
            let has_url = doc
                .get("vision")
                .and_then(|v| v.get(name))
                .and_then(|e| e.get("base_url"))
                .is_some();
            if !has_url {
                doc["vision"][name]["base_url"] = value(defaults.base_url);
            }
            doc["vision"][name]["model"] = value(model);
        }

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, doc.to_string())?;
        Ok(())
    }
}
