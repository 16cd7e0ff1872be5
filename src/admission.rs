//! Submission-time validation. Everything here runs before a job exists, so
//! a rejected request never allocates an id.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::config::Config;
use crate::error::AdmissionError;
use crate::language;
use crate::pipeline::command::SubtitlePaths;
use crate::state_machine::{InputDescriptor, JobParameters};

/// A request to process a media file or a directory of media files.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    pub path: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default = "default_overwrite")]
    pub overwrite: bool,
    #[serde(default)]
    pub original_only: bool,
}

fn default_overwrite() -> bool {
    true
}

impl SubmitRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            language: None,
            overwrite: true,
            original_only: false,
        }
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn original_only(mut self, original_only: bool) -> Self {
        self.original_only = original_only;
        self
    }
}

fn is_media_file(path: &Path, extensions: &[String]) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| extensions.iter().any(|m| m.eq_ignore_ascii_case(ext)))
}

fn resolve_files(full: &Path, extensions: &[String]) -> Result<Vec<PathBuf>, AdmissionError> {
    if !full.is_dir() {
        return Ok(vec![full.to_path_buf()]);
    }

    let entries = std::fs::read_dir(full).map_err(|source| AdmissionError::Io {
        path: full.to_path_buf(),
        source,
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| is_media_file(p, extensions))
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(AdmissionError::NoFilesToProcess(full.to_path_buf()));
    }
    Ok(files)
}

/// Validate `request` and capture the input descriptor and parameter snapshot for a new job.
pub fn admit(
    request: &SubmitRequest,
    config: &Config,
) -> Result<(InputDescriptor, JobParameters), AdmissionError> {
    let path = request.path.trim();
    if path.is_empty() {
        return Err(AdmissionError::MissingInput);
    }

    let full = config.media_root.join(path);
    if !full.exists() {
        return Err(AdmissionError::InputNotFound(full));
    }

    let language =
        language::normalize(request.language.as_deref().unwrap_or(&config.default_language));
    if !language::is_supported(&language) {
        return Err(AdmissionError::UnsupportedLanguage(language));
    }

    let files = resolve_files(&full, &config.pipeline.media_extensions)?;
    let parameters = JobParameters {
        language,
        model: config.model.clone(),
        overwrite: request.overwrite,
        original_only: request.original_only,
    };

    if !request.overwrite {
        let existing: Vec<String> = files
            .iter()
            .flat_map(|f| {
                SubtitlePaths::for_file(f, &parameters)
                    .all()
                    .into_iter()
                    .filter(|p| p.exists())
                    .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                    .collect::<Vec<_>>()
            })
            .collect();
        if !existing.is_empty() {
            return Err(AdmissionError::ExistingOutputs(existing));
        }
    }

    Ok((
        InputDescriptor {
            path: path.to_string(),
            files,
        },
        parameters,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(root: &Path) -> Config {
        Config {
            media_root: root.to_path_buf(),
            ..Config::default()
        }
    }

    #[test]
    fn empty_path_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = admit(&SubmitRequest::new("  "), &config_for(dir.path())).unwrap_err();
        assert!(matches!(err, AdmissionError::MissingInput));
    }

    #[test]
    fn missing_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = admit(&SubmitRequest::new("nope.mkv"), &config_for(dir.path())).unwrap_err();
        assert!(matches!(err, AdmissionError::InputNotFound(_)));
    }

    #[test]
    fn single_file_resolves_relative_to_media_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("movie.mkv"), b"x").unwrap();

        let (input, params) = admit(
            &SubmitRequest::new("movie.mkv").language("nl-NL"),
            &config_for(dir.path()),
        )
        .unwrap();
        assert_eq!(input.path, "movie.mkv");
        assert_eq!(input.files, vec![dir.path().join("movie.mkv")]);
        assert_eq!(params.language, "nl");
        assert_eq!(params.model, "medium");
    }

    #[test]
    fn directory_expands_to_sorted_media_files() {
        let dir = tempfile::tempdir().unwrap();
        let show = dir.path().join("show");
        std::fs::create_dir(&show).unwrap();
        for name in ["b.MKV", "a.mp4", "notes.txt", "c.srt"] {
            std::fs::write(show.join(name), b"x").unwrap();
        }

        let (input, _) = admit(&SubmitRequest::new("show"), &config_for(dir.path())).unwrap();
        assert_eq!(input.files, vec![show.join("a.mp4"), show.join("b.MKV")]);
    }

    #[test]
    fn directory_without_media_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty");
        std::fs::create_dir(&empty).unwrap();
        std::fs::write(empty.join("readme.txt"), b"x").unwrap();

        let err = admit(&SubmitRequest::new("empty"), &config_for(dir.path())).unwrap_err();
        assert!(matches!(err, AdmissionError::NoFilesToProcess(_)));
    }

    #[test]
    fn unsupported_language_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("movie.mkv"), b"x").unwrap();
        let err = admit(
            &SubmitRequest::new("movie.mkv").language("tlh"),
            &config_for(dir.path()),
        )
        .unwrap_err();
        assert!(matches!(err, AdmissionError::UnsupportedLanguage(lang) if lang == "tlh"));
    }

    #[test]
    fn existing_outputs_block_when_overwrite_is_off() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("movie.mkv"), b"x").unwrap();
        std::fs::write(dir.path().join("movie.en.srt"), b"1").unwrap();
        let config = config_for(dir.path());

        let err = admit(
            &SubmitRequest::new("movie.mkv").language("de").overwrite(false),
            &config,
        )
        .unwrap_err();
        match err {
            AdmissionError::ExistingOutputs(files) => assert_eq!(files, vec!["movie.en.srt"]),
            other => panic!("expected ExistingOutputs, got {other:?}"),
        }

        assert!(admit(&SubmitRequest::new("movie.mkv").language("de"), &config).is_ok());
        assert!(
            admit(
                &SubmitRequest::new("movie.mkv").overwrite(false).original_only(true),
                &config
            )
            .is_ok()
        );
    }

    #[test]
    fn submit_request_json_defaults() {
        let request: SubmitRequest = serde_json::from_str(r#"{"path": "a.mkv"}"#).unwrap();
        assert!(request.overwrite);
        assert!(!request.original_only);
        assert!(request.language.is_none());
    }
}
