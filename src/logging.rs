//! Configuração do `tracing` para o binário.
//!
//! Os logs vão para stderr para não se misturarem às respostas JSON do modo
//! `serve` nem às barras de progresso do modo `run`. `RUST_LOG` tem
//! precedência sobre o nível padrão.

use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

/// Diretiva usada quando `RUST_LOG` não está definida.
pub fn default_directive(verbose: bool, interactive: bool) -> &'static str {
    match (verbose, interactive) {
        (true, _) => "subtitler=debug",
        // O painel de progresso já mostra o estado de cada job.
        (false, true) => "subtitler=warn",
        (false, false) => "subtitler=info",
    }
}

/// Instala o subscriber global. Só pode ser chamada uma vez por processo.
pub fn init(verbose: bool, interactive: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(verbose, interactive)))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_span_events(if verbose { FmtSpan::CLOSE } else { FmtSpan::NONE })
        .try_init()
        .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_wins_over_interactive() {
        assert_eq!(default_directive(true, true), "subtitler=debug");
        assert_eq!(default_directive(false, true), "subtitler=warn");
        assert_eq!(default_directive(false, false), "subtitler=info");
    }

    #[test]
    fn directives_parse() {
        for (v, i) in [(true, false), (false, true), (false, false)] {
            assert!(EnvFilter::try_new(default_directive(v, i)).is_ok());
        }
    }
}
