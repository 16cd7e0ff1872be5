//! Interface de terminal do subtitler: painel de progresso e saída colorida.
//!
//! Usa `indicatif` para uma barra por job e `console` para as cores. O
//! [`JobBoard`] acompanha visualmente todos os jobs de uma execução `run`.

use std::collections::HashMap;
use std::time::Duration;

use console::Style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::orchestrator::JobView;
use crate::persistence::PersistedQueueSnapshot;
use crate::state_machine::{HistoryEntry, JobId, JobStatus};

/// Estilos compartilhados pelas saídas coloridas.
struct Palette {
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
}

impl Palette {
    fn new() -> Self {
        Self {
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
        }
    }

    fn for_status(&self, status: JobStatus) -> &Style {
        match status {
            JobStatus::Completed => &self.green,
            JobStatus::Failed => &self.red,
            JobStatus::Cancelled => &self.yellow,
            JobStatus::Pending | JobStatus::Running => &self.dim,
        }
    }

    fn mark(&self, status: JobStatus) -> String {
        let symbol = match status {
            JobStatus::Completed => "✓",
            JobStatus::Failed => "✗",
            JobStatus::Cancelled => "⊘",
            JobStatus::Pending => "…",
            JobStatus::Running => "▸",
        };
        self.for_status(status).apply_to(symbol).to_string()
    }
}

/// Painel com uma barra de progresso por job acompanhado.
///
/// Jobs em espera mostram a posição na fila; jobs em execução mostram a
/// porcentagem e a etapa atual. Ao chegar a um estado terminal a barra é
/// encerrada com uma linha colorida (verde, vermelho ou amarelo).
pub struct JobBoard {
    // Container do indicatif que desenha todas as barras juntas.
    multi: MultiProgress,
    // Barras ainda ativas, por job.
    bars: HashMap<JobId, ProgressBar>,
    // Rótulo (caminho submetido) de cada job.
    labels: HashMap<JobId, String>,
    palette: Palette,
}

impl Default for JobBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl JobBoard {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: HashMap::new(),
            labels: HashMap::new(),
            palette: Palette::new(),
        }
    }

    /// Passa a acompanhar um job recém-submetido.
    pub fn track(&mut self, id: JobId, label: &str) {
        let pb = self.multi.add(ProgressBar::new(100));
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} #{prefix:<4} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
                .expect("invalid template")
                .progress_chars("=> "),
        );
        pb.set_prefix(id.to_string());
        pb.set_message(label.to_string());
        pb.enable_steady_tick(Duration::from_millis(120));
        self.bars.insert(id, pb);
        self.labels.insert(id, label.to_string());
    }

    /// Imprime uma linha acima das barras sem corrompê-las.
    pub fn note(&self, line: impl AsRef<str>) {
        let _ = self.multi.println(line.as_ref());
    }

    /// Atualiza a barra do job com o estado mais recente.
    pub fn update(&mut self, view: &JobView) {
        let id = view.job.id;
        let Some(pb) = self.bars.get(&id) else {
            return;
        };
        let label = self.labels.get(&id).map(String::as_str).unwrap_or_default();
        let job = &view.job;

        match job.status {
            JobStatus::Pending => {
                let position = view
                    .queue_position
                    .map(|p| format!(" (position {p})"))
                    .unwrap_or_default();
                pb.set_message(format!("{label}: waiting{position}"));
            }
            JobStatus::Running => {
                pb.set_position(u64::from(job.progress));
                pb.set_message(format!("{label}: {}", job.status_message));
            }
            status => {
                let line = match status {
                    JobStatus::Failed => format!(
                        "  {} #{id} {label}: {}",
                        self.palette.mark(status),
                        job.failure_reason.as_deref().unwrap_or("failed")
                    ),
                    _ => format!(
                        "  {} #{id} {label}: {} ({} files)",
                        self.palette.mark(status),
                        self.palette.for_status(status).apply_to(status),
                        job.result.as_ref().map_or(0, Vec::len)
                    ),
                };
                pb.finish_and_clear();
                self.multi.remove(pb);
                self.bars.remove(&id);
                self.note(line);
            }
        }
    }

    /// Encerra um job que saiu da tabela sem ser visto em estado terminal.
    pub fn forget(&mut self, id: JobId) {
        if let Some(pb) = self.bars.remove(&id) {
            pb.finish_and_clear();
            self.multi.remove(&pb);
        }
    }

    /// Jobs ainda ativos no painel.
    pub fn tracked(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.bars.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_done(&self) -> bool {
        self.bars.is_empty()
    }
}

fn format_duration(ms: i64) -> String {
    let secs = ms.max(0) / 1000;
    match secs {
        s if s < 60 => format!("{s}s"),
        s if s < 3600 => format!("{}m{:02}s", s / 60, s % 60),
        s => format!("{}h{:02}m", s / 3600, (s % 3600) / 60),
    }
}

/// Imprime o histórico (mais recente primeiro) com cores por estado.
pub fn print_history(entries: &[HistoryEntry]) {
    let palette = Palette::new();
    if entries.is_empty() {
        println!("{}", palette.dim.apply_to("No finished jobs recorded."));
        return;
    }

    for entry in entries {
        println!(
            "{} #{:<5} {:<10} {:>8}  {}  {}",
            palette.mark(entry.status),
            entry.job_id,
            palette.for_status(entry.status).apply_to(entry.status),
            format_duration(entry.duration_ms),
            entry.completed_at.format("%Y-%m-%d %H:%M:%S"),
            entry.input.path,
        );
        if let Some(reason) = &entry.failure_reason {
            for line in reason.lines() {
                println!("      {}", palette.red.apply_to(line));
            }
        }
    }
}

/// Imprime o snapshot persistido da fila sem executar nada.
pub fn print_snapshot(snapshot: Option<&PersistedQueueSnapshot>) {
    let palette = Palette::new();
    let Some(snapshot) = snapshot else {
        println!("{}", palette.dim.apply_to("No queue snapshot found."));
        return;
    };

    println!(
        "{}",
        palette.dim.apply_to(format!(
            "saved {} · next id {}",
            snapshot.saved_at.format("%Y-%m-%d %H:%M:%S"),
            snapshot.next_id
        ))
    );
    if snapshot.jobs.is_empty() {
        println!("{}", palette.dim.apply_to("Queue is empty."));
    }
    for job in &snapshot.jobs {
        let flag = if job.cancel_requested { " (cancel requested)" } else { "" };
        println!(
            "{} #{:<5} {:<8} {:>3}%  {}{}",
            palette.mark(job.status),
            job.id,
            job.status,
            job.progress,
            job.input.path,
            palette.yellow.apply_to(flag),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_are_compact() {
        assert_eq!(format_duration(-5), "0s");
        assert_eq!(format_duration(42_000), "42s");
        assert_eq!(format_duration(125_000), "2m05s");
        assert_eq!(format_duration(7_380_000), "2h03m");
    }

    #[test]
    fn board_tracks_until_terminal() {
        use crate::state_machine::{JobRecord, sample_input, sample_parameters};

        let mut board = JobBoard::new();
        board.track(1, "a.mkv");
        board.track(0, "b.mkv");
        assert_eq!(board.tracked(), vec![0, 1]);

        let mut job = JobRecord::new(1, sample_input("a.mkv"), sample_parameters());
        board.update(&JobView {
            job: job.clone(),
            queue_position: Some(1),
        });
        assert!(!board.is_done());

        job.status = JobStatus::Completed;
        board.update(&JobView {
            job,
            queue_position: None,
        });
        board.forget(0);
        assert!(board.is_done());
    }
}
