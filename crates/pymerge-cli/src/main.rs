mod logging;

use anyhow::Context;
use clap::Parser;
use pymerge::{FileResolverOutput, MergeError, Resolver};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};

use logging::init_logging;

/// Git merge driver: merge OTHER's changes (relative to BASE) into CURRENT in place.
///
/// Configure with `driver = pymerge %O %A %B` in `.git/config`.
#[derive(Parser)]
#[command(
    name = "pymerge",
    about = "Structural three-way merge driver for Python sources"
)]
struct Cli {
    /// Common ancestor version
    base: PathBuf,
    /// Current version; overwritten with the merge result
    current: PathBuf,
    /// Version being merged in
    other: PathBuf,
}

/// How a merge invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Clean,
    Conflicts(usize),
    /// An input did not parse or the result was structurally invalid; CURRENT untouched.
    Failed,
}

impl Outcome {
    fn exit_code(self) -> ExitCode {
        match self {
            Outcome::Clean => ExitCode::SUCCESS,
            Outcome::Conflicts(_) => ExitCode::from(1),
            Outcome::Failed => ExitCode::from(2),
        }
    }
}

fn read(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn merge_files(cli: &Cli) -> anyhow::Result<Outcome> {
    let base = read(&cli.base)?;
    let current = read(&cli.current)?;
    let other = read(&cli.other)?;
    finish(cli, Resolver::default().resolve_file(&base, &current, &other))
}

/// Write the merge result to CURRENT, or leave it untouched when the merge failed.
fn finish(cli: &Cli, result: pymerge::error::Result<FileResolverOutput>) -> anyhow::Result<Outcome> {
    let output = match result {
        Ok(output) => output,
        Err(err @ (MergeError::Parse { .. } | MergeError::InvalidResult { .. })) => {
            error!("{err}");
            return Ok(Outcome::Failed);
        }
    };
    for diagnostic in &output.diagnostics {
        warn!("{diagnostic}");
    }

    std::fs::write(&cli.current, &output.merged_content)
        .with_context(|| format!("writing {}", cli.current.display()))?;

    if pymerge::has_markers(&output.merged_content) {
        info!(
            conflicts = output.conflicts.len(),
            path = %cli.current.display(),
            "merged with conflicts"
        );
        Ok(Outcome::Conflicts(output.conflicts.len()))
    } else {
        info!(path = %cli.current.display(), "merged cleanly");
        Ok(Outcome::Clean)
    }
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match merge_files(&cli) {
        Ok(outcome) => outcome.exit_code(),
        Err(err) => {
            error!("{err:#}");
            Outcome::Failed.exit_code()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup(base: &str, current: &str, other: &str) -> (TempDir, Cli) {
        let dir = TempDir::new().unwrap();
        let path = |name: &str, text: &str| {
            let path = dir.path().join(name);
            std::fs::write(&path, text).unwrap();
            path
        };
        let cli = Cli {
            base: path("base.py", base),
            current: path("current.py", current),
            other: path("other.py", other),
        };
        (dir, cli)
    }

    #[test]
    fn test_clean_merge_overwrites_current() {
        let (_dir, cli) = setup("x = 1\n", "x = 1\ny = 2\n", "import os\nx = 1\n");
        assert_eq!(merge_files(&cli).unwrap(), Outcome::Clean);
        let merged = std::fs::read_to_string(&cli.current).unwrap();
        assert_eq!(merged, "import os\nx = 1\ny = 2\n");
    }

    #[test]
    fn test_conflict_markers_reported() {
        let (_dir, cli) = setup("x = 'a'\n", "x = 'c'\n", "x = 'b'\n");
        assert_eq!(merge_files(&cli).unwrap(), Outcome::Conflicts(1));
        let merged = std::fs::read_to_string(&cli.current).unwrap();
        assert!(merged.contains("# <<<<<<<<<<\n"));
        assert!(merged.ends_with("x = 'c'\n"));
    }

    #[test]
    fn test_parse_failure_leaves_current_untouched() {
        let (_dir, cli) = setup("x = 1\n", "def broken(:\n", "x = 2\n");
        assert_eq!(merge_files(&cli).unwrap(), Outcome::Failed);
        let current = std::fs::read_to_string(&cli.current).unwrap();
        assert_eq!(current, "def broken(:\n");
    }

    #[test]
    fn test_invalid_result_leaves_current_untouched() {
        let (_dir, cli) = setup("x = 1\n", "x = 1\n", "x = 2\n");
        let err = MergeError::InvalidResult {
            action: "edit statement".into(),
            snippet: "def f()\n".into(),
        };
        assert_eq!(finish(&cli, Err(err)).unwrap(), Outcome::Failed);
        let current = std::fs::read_to_string(&cli.current).unwrap();
        assert_eq!(current, "x = 1\n");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let (dir, mut cli) = setup("", "", "");
        cli.other = dir.path().join("missing.py");
        assert!(merge_files(&cli).is_err());
    }
}
