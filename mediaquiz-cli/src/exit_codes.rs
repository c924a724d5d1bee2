//! Exit codes following sysexits.h conventions.
//!
//! These codes provide semantic meaning for different failure modes,
//! enabling scripts and cron jobs to handle errors appropriately.

use mediaquiz_core::MediaError;

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// General error (catch-all).
pub const GENERAL_ERROR: i32 = 1;

/// Command line usage error (invalid arguments).
/// Maps to EX_USAGE from sysexits.h.
pub const USAGE_ERROR: i32 = 64;

/// Malformed input data (bad manifest row, bad hash).
/// Maps to EX_DATAERR from sysexits.h.
pub const DATA_ERROR: i32 = 65;

/// Cannot open input file or directory.
/// Maps to EX_NOINPUT from sysexits.h.
pub const INPUT_ERROR: i32 = 66;

/// Remote repository or manifest host unavailable.
/// Maps to EX_UNAVAILABLE from sysexits.h.
pub const NETWORK_ERROR: i32 = 69;

/// I/O error (cannot write output file).
/// Maps to EX_IOERR from sysexits.h.
pub const IO_ERROR: i32 = 74;

/// Another process holds the working copy.
/// Maps to EX_TEMPFAIL from sysexits.h.
pub const TEMP_FAILURE: i32 = 75;

/// Missing or invalid environment configuration.
/// Maps to EX_CONFIG from sysexits.h.
pub const CONFIG_ERROR: i32 = 78;

/// Represents an exit code with optional error context.
#[derive(Debug)]
pub struct ExitCode {
    pub code: i32,
    pub message: Option<String>,
}

impl ExitCode {
    pub const fn success() -> Self {
        Self {
            code: SUCCESS,
            message: None,
        }
    }

    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");

        // Prefer the typed pipeline error anywhere in the chain
        let code = match err.chain().find_map(|e| e.downcast_ref::<MediaError>()) {
            Some(media) => classify(media),
            None if message.contains("Failed to read") => INPUT_ERROR,
            None if message.contains("Failed to write") => IO_ERROR,
            None => GENERAL_ERROR,
        };

        Self {
            code,
            message: Some(message),
        }
    }
}

fn classify(err: &MediaError) -> i32 {
    match err {
        MediaError::Config(_) => CONFIG_ERROR,
        MediaError::ManifestParse { .. } | MediaError::PerceptualHashError(_) => DATA_ERROR,
        MediaError::NotFound(_) | MediaError::UnknownItem(_) | MediaError::UnknownImage(_) => {
            INPUT_ERROR
        }
        MediaError::RepoSyncFailure { .. }
        | MediaError::IndexUnavailable { .. }
        | MediaError::PushFailure { .. }
        | MediaError::HttpError(_) => NETWORK_ERROR,
        MediaError::LockTimeout { .. } | MediaError::StaleLease { .. } => TEMP_FAILURE,
        MediaError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => INPUT_ERROR,
        MediaError::Io(_) => IO_ERROR,
        _ => GENERAL_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_typed_errors_found_through_context() {
        let err: anyhow::Result<()> = Err(MediaError::ManifestParse {
            line: 3,
            reason: "missing ',' separator".into(),
        })
        .context("Failed to load hashes.csv");
        let exit = ExitCode::from_anyhow(&err.unwrap_err());
        assert_eq!(exit.code, DATA_ERROR);
        assert!(exit.message.unwrap().starts_with("Failed to load hashes.csv"));
    }

    #[test]
    fn test_config_error() {
        let err = anyhow::Error::new(MediaError::Config("CANONICAL_REPO_URL not set".into()));
        assert_eq!(ExitCode::from_anyhow(&err).code, CONFIG_ERROR);
    }

    #[test]
    fn test_untyped_fallbacks() {
        let err = anyhow::anyhow!("Failed to read file: x.csv");
        assert_eq!(ExitCode::from_anyhow(&err).code, INPUT_ERROR);
        let err = anyhow::anyhow!("something else");
        assert_eq!(ExitCode::from_anyhow(&err).code, GENERAL_ERROR);
    }
}
