//! Pipeline that shells out to external tools for every stage.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Pipeline, PipelineError, PipelineRequest, ProgressReporter};
use crate::config::PipelineConfig;
use crate::language;
use crate::state_machine::{JobId, JobParameters};

const STDERR_TAIL_LINES: usize = 20;

/// Subtitle files a job writes for one media file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitlePaths {
    /// `<stem>.srt`, original spoken language.
    pub original: PathBuf,
    /// `<stem>.en.srt`, unless only the original is requested.
    pub english: Option<PathBuf>,
    /// `<stem>.<lang>.srt`, when the target is neither English nor skipped.
    pub target: Option<PathBuf>,
}

impl SubtitlePaths {
    pub fn for_file(file: &Path, parameters: &JobParameters) -> Self {
        let dir = file.parent().unwrap_or_else(|| Path::new(""));
        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let named = |suffix: &str| dir.join(format!("{stem}{suffix}"));

        let english = (!parameters.original_only).then(|| named(".en.srt"));
        let target = (!parameters.original_only && parameters.language != "en")
            .then(|| named(&format!(".{}.srt", parameters.language)));

        Self {
            original: named(".srt"),
            english,
            target,
        }
    }

    pub fn all(&self) -> Vec<&PathBuf> {
        std::iter::once(&self.original)
            .chain(self.english.as_ref())
            .chain(self.target.as_ref())
            .collect()
    }
}

struct StageVars<'a> {
    input: &'a Path,
    audio: &'a Path,
    output: &'a Path,
    language: &'a str,
    nllb_language: &'a str,
    model: &'a str,
}

impl StageVars<'_> {
    fn render(&self, template: &[String]) -> Vec<String> {
        template
            .iter()
            .map(|arg| {
                arg.replace("{input}", &self.input.to_string_lossy())
                    .replace("{audio}", &self.audio.to_string_lossy())
                    .replace("{output}", &self.output.to_string_lossy())
                    .replace(
                        "{output_dir}",
                        &self
                            .output
                            .parent()
                            .map(|p| p.to_string_lossy().into_owned())
                            .unwrap_or_default(),
                    )
                    .replace("{nllb_language}", self.nllb_language)
                    .replace("{language}", self.language)
                    .replace("{model}", self.model)
            })
            .collect()
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

/// Overall percentage for `milestone` (0-100) of file `index` out of `count`.
fn overall(index: usize, count: usize, milestone: u8) -> u8 {
    let count = count.max(1);
    ((index * 100 + milestone as usize) / count).min(100) as u8
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

/// One media file of a job and the scratch audio extracted from it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MediaFile<'a> {
    index: usize,
    path: &'a Path,
    audio: PathBuf,
}

/// Runs each stage as an external command built from [`PipelineConfig`] templates.
///
/// Stages are never interrupted: cancellation is observed between stages and
/// before the temporary audio file is removed.
#[derive(Debug, Clone)]
pub struct CommandPipeline {
    config: PipelineConfig,
    keep_audio: bool,
    temp_dir: PathBuf,
}

impl CommandPipeline {
    pub fn new(config: PipelineConfig, keep_audio: bool) -> Self {
        let temp_dir = config.temp_dir.clone().unwrap_or_else(std::env::temp_dir);
        Self {
            config,
            keep_audio,
            temp_dir,
        }
    }

    fn media_file<'a>(&self, job_id: JobId, index: usize, path: &'a Path) -> MediaFile<'a> {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());
        MediaFile {
            index,
            path,
            audio: self
                .temp_dir
                .join(format!("subtitler-{job_id}-{index}-{stem}.wav")),
        }
    }

    async fn run_stage(
        &self,
        stage: &'static str,
        template: &[String],
        vars: &StageVars<'_>,
    ) -> Result<(), PipelineError> {
        let argv = vars.render(template);
        let Some((program, args)) = argv.split_first() else {
            return Err(PipelineError::stage(stage, "no command configured"));
        };
        debug!(stage, %program, ?args, "Running pipeline stage");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| PipelineError::Io { stage, source })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::stage(
                stage,
                format!(
                    "{program} exited with {}: {}",
                    output.status,
                    tail(&stderr, STDERR_TAIL_LINES)
                ),
            ));
        }
        if !vars.output.exists() {
            return Err(PipelineError::stage(
                stage,
                format!("expected output {} was not written", vars.output.display()),
            ));
        }
        Ok(())
    }

    async fn process_file(
        &self,
        request: &PipelineRequest,
        media: &MediaFile<'_>,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
        artifacts: &mut Vec<String>,
    ) -> Result<(), PipelineError> {
        let (index, file, audio) = (media.index, media.path, media.audio.as_path());
        let count = request.files.len();
        let params = &request.parameters;
        let paths = SubtitlePaths::for_file(file, params);
        let nllb_language = language::nllb_code(&params.language).unwrap_or("eng_Latn");
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        checkpoint(cancel)?;
        progress.report(overall(index, count, 10), format!("Extracting audio from {name}..."));
        self.run_stage(
            "extract audio",
            &self.config.extract_audio,
            &StageVars {
                input: file,
                audio,
                output: audio,
                language: &params.language,
                nllb_language,
                model: &params.model,
            },
        )
        .await?;

        checkpoint(cancel)?;
        progress.report(overall(index, count, 30), format!("Transcribing original language of {name}..."));
        self.run_stage(
            "transcribe",
            &self.config.transcribe,
            &StageVars {
                input: file,
                audio,
                output: &paths.original,
                language: &params.language,
                nllb_language,
                model: &params.model,
            },
        )
        .await?;
        artifacts.push(paths.original.display().to_string());

        if let Some(english) = &paths.english {
            checkpoint(cancel)?;
            progress.report(overall(index, count, 60), format!("Translating {name} to English..."));
            self.run_stage(
                "translate to English",
                &self.config.translate_english,
                &StageVars {
                    input: file,
                    audio,
                    output: english,
                    language: "en",
                    nllb_language: "eng_Latn",
                    model: &params.model,
                },
            )
            .await?;
            artifacts.push(english.display().to_string());

            if let Some(target) = &paths.target {
                checkpoint(cancel)?;
                progress.report(
                    overall(index, count, 80),
                    format!("Translating {name} to {}...", params.language),
                );
                // The English subtitles are the translation source.
                self.run_stage(
                    "translate to target language",
                    &self.config.translate_target,
                    &StageVars {
                        input: english,
                        audio,
                        output: target,
                        language: &params.language,
                        nllb_language,
                        model: &params.model,
                    },
                )
                .await?;
                artifacts.push(target.display().to_string());
            }
        }

        checkpoint(cancel)?;
        progress.report(overall(index, count, 90), format!("Cleaning up {name}..."));
        Ok(())
    }

    async fn remove_audio(&self, audio: &Path) {
        if self.keep_audio {
            return;
        }
        match tokio::fs::remove_file(audio).await {
            Ok(()) => debug!(path = %audio.display(), "Removed temporary audio"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %audio.display(), error = %e, "Failed to remove temporary audio"),
        }
    }
}

#[async_trait]
impl Pipeline for CommandPipeline {
    async fn execute(
        &self,
        request: &PipelineRequest,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, PipelineError> {
        let mut artifacts = Vec::new();

        for (index, file) in request.files.iter().enumerate() {
            let media = self.media_file(request.job_id, index, file);
            let result = self
                .process_file(request, &media, progress, cancel, &mut artifacts)
                .await;
            self.remove_audio(&media.audio).await;
            result?;
        }

        info!(
            job_id = request.job_id,
            artifacts = artifacts.len(),
            "Pipeline finished"
        );
        Ok(artifacts)
    }
}
