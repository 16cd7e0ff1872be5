//! Interface de linha de comando do subtitler baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, serve, history,
//! queue) e flags globais (--config, --max-jobs, --model, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::state_machine::JobStatus;

/// subtitler: gera legendas para arquivos de mídia em uma fila resistente a falhas.
#[derive(Debug, Parser)]
#[command(name = "subtitler", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Arquivo de configuração TOML (padrão: ./subtitler.toml, se existir).
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Número máximo de jobs executando ao mesmo tempo.
    #[arg(long, global = true, value_parser = clap::value_parser!(u16).range(1..))]
    pub max_jobs: Option<u16>,

    /// Modelo Whisper usado na transcrição (tiny, base, small, medium, large).
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

impl Cli {
    /// Aplica as flags globais sobre a configuração já carregada.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(max_jobs) = self.max_jobs {
            config.max_concurrent_jobs = usize::from(max_jobs);
        }
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Retoma a fila persistida, submete os caminhos e acompanha até o fim.
    Run {
        /// Arquivos ou diretórios, relativos à pasta de mídia.
        paths: Vec<String>,

        /// Idioma de destino da tradução (ex.: nl, de-DE).
        #[arg(long, short)]
        language: Option<String>,

        /// Recusa a submissão se já existirem legendas para o arquivo.
        #[arg(long)]
        no_overwrite: bool,

        /// Gera apenas a legenda no idioma original.
        #[arg(long)]
        original_only: bool,
    },

    /// Atende comandos linha a linha via stdin, respondendo em JSON.
    Serve,

    /// Mostra ou limpa o histórico de jobs finalizados.
    History {
        /// Remove as entradas em vez de listá-las.
        #[arg(long)]
        clear: bool,

        /// Restringe ao estado informado (completed, failed, cancelled).
        #[arg(long)]
        state: Option<JobStatus>,
    },

    /// Mostra a fila persistida sem executar nada.
    Queue,
}
