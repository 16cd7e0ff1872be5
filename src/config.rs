//! Configuração do subtitler carregada a partir de `subtitler.toml`.
//!
//! A struct [`Config`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! As variáveis de ambiente `MAX_CONCURRENT_JOBS`, `WHISPER_MODEL` e
//! `MEDIA_FOLDER` têm precedência sobre o arquivo.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::history::HISTORY_FILE_NAME;
use crate::persistence::QUEUE_FILE_NAME;

pub const DEFAULT_CONFIG_FILE: &str = "subtitler.toml";

/// Configuração de nível superior carregada de `subtitler.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Raiz contra a qual caminhos relativos submetidos são resolvidos.
    #[serde(default = "default_media_root")]
    pub media_root: PathBuf,

    /// Diretório com `queue.json` e `history.json`.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Número máximo de jobs em `running` ao mesmo tempo.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Intervalo de verificação dos jobs que aguardam um slot.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Idioma de destino quando a submissão não especifica um.
    #[serde(default = "default_language")]
    pub default_language: String,

    /// Tamanho do modelo de reconhecimento de fala.
    #[serde(default = "default_model")]
    pub model: String,

    /// Máximo de jobs terminais mantidos na tabela em memória.
    #[serde(default = "default_max_retained_jobs")]
    pub max_retained_jobs: usize,

    /// Mantém o áudio extraído em vez de removê-lo ao final.
    #[serde(default)]
    pub keep_audio: bool,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Comandos externos de cada estágio, como listas argv com placeholders
/// (`{input}`, `{audio}`, `{output}`, `{output_dir}`, `{language}`,
/// `{nllb_language}`, `{model}`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub extract_audio: Vec<String>,
    pub transcribe: Vec<String>,
    pub translate_english: Vec<String>,
    pub translate_target: Vec<String>,
    /// Extensões (sem ponto) consideradas mídia ao expandir um diretório.
    pub media_extensions: Vec<String>,
    /// Onde o áudio temporário é escrito. Padrão: diretório temporário do sistema.
    pub temp_dir: Option<PathBuf>,
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            extract_audio: argv(&[
                "ffmpeg", "-i", "{input}", "-vn", "-acodec", "pcm_s16le", "-ar", "16000", "-ac",
                "1", "-y", "{audio}",
            ]),
            transcribe: argv(&[
                "whisper-srt", "--model", "{model}", "--task", "transcribe", "--output",
                "{output}", "{audio}",
            ]),
            translate_english: argv(&[
                "whisper-srt", "--model", "{model}", "--task", "translate", "--output",
                "{output}", "{audio}",
            ]),
            translate_target: argv(&[
                "nllb-srt", "--source", "eng_Latn", "--target", "{nllb_language}", "--output",
                "{output}", "{input}",
            ]),
            media_extensions: argv(&["mkv", "mp4", "avi", "mov", "webm", "m4v"]),
            temp_dir: None,
        }
    }
}

fn default_media_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".subtitler")
}

// Uma única GPU raramente comporta mais de dois modelos carregados.
fn default_max_concurrent_jobs() -> usize {
    2
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_language() -> String {
    "en-US".to_string()
}

fn default_model() -> String {
    "medium".to_string()
}

fn default_max_retained_jobs() -> usize {
    500
}

impl Default for Config {
    fn default() -> Self {
        Self {
            media_root: default_media_root(),
            state_dir: default_state_dir(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            poll_interval_ms: default_poll_interval_ms(),
            default_language: default_language(),
            model: default_model(),
            max_retained_jobs: default_max_retained_jobs(),
            keep_audio: false,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Config {
    /// Carrega a configuração de `path`, ou de `subtitler.toml` no diretório atual.
    /// Usa valores padrão se o arquivo padrão não existir; um caminho explícito
    /// ausente é um erro.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<Config>(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else if explicit {
            bail!("config file not found: {}", path.display());
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Variáveis de ambiente têm precedência sobre o arquivo de configuração.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = var("MAX_CONCURRENT_JOBS").filter(|v| !v.is_empty()) {
            self.max_concurrent_jobs = value
                .trim()
                .parse()
                .with_context(|| format!("invalid MAX_CONCURRENT_JOBS: {value}"))?;
        }
        if let Some(model) = var("WHISPER_MODEL").filter(|v| !v.is_empty()) {
            self.model = model;
        }
        if let Some(root) = var("MEDIA_FOLDER").filter(|v| !v.is_empty()) {
            self.media_root = PathBuf::from(root);
        }
        Ok(())
    }

    pub fn queue_path(&self) -> PathBuf {
        self.state_dir.join(QUEUE_FILE_NAME)
    }

    pub fn history_path(&self) -> PathBuf {
        self.state_dir.join(HISTORY_FILE_NAME)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}
