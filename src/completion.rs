//! # Shell Completion Module
//!
//! Completion scripts through `clap_complete`, plus a hidden listing of
//! playlist ids for shells that want dynamic `--playlist` completion.
//!
//! ## Usage
//!
//! ```bash
//! # Generate bash completions
//! encore completion bash > ~/.local/share/bash-completion/completions/encore
//!
//! # Generate zsh completions
//! encore completion zsh > ~/.config/zsh/completions/_encore
//! ```

use crate::db;
use anyhow::Result;
use clap::Command;
use clap_complete::{generate, Generator, Shell as CompletionShell};
use std::io::{self, Write};
use std::path::Path;

/// Generate shell completions for the given shell
pub fn generate_completions<G: Generator>(gen: G, cmd: &mut Command) {
    let name = cmd.get_name().to_string();
    generate(gen, cmd, name, &mut io::stdout());
}

/// Convert our Shell enum to clap_complete's Shell enum
#[must_use]
pub fn shell_to_completion_shell(shell: crate::cli::Shell) -> CompletionShell {
    match shell {
        crate::cli::Shell::Bash => CompletionShell::Bash,
        crate::cli::Shell::Zsh => CompletionShell::Zsh,
        crate::cli::Shell::Fish => CompletionShell::Fish,
        crate::cli::Shell::PowerShell => CompletionShell::PowerShell,
        crate::cli::Shell::Elvish => CompletionShell::Elvish,
    }
}

/// `id<TAB>name` for every playlist in the database at `db_path`.
///
/// Empty when the database doesn't exist yet; completion must never fail.
pub fn get_playlist_completions(db_path: &Path) -> Result<Vec<String>> {
    if !db_path.exists() {
        return Ok(Vec::new());
    }

    let conn = db::connect(db_path)?;
    Ok(db::load_playlists(&conn)?
        .into_iter()
        .map(|p| format!("{}\t{}", p.id, p.name))
        .collect())
}

/// Print playlist completions, one per line.
pub fn print_playlist_completions(db_path: &Path) -> Result<()> {
    let mut out = io::stdout().lock();
    for completion in get_playlist_completions(db_path)? {
        writeln!(out, "{completion}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::LibraryExport;
    use crate::track::Playlist;
    use tempfile::TempDir;

    #[test]
    fn test_shell_conversion() {
        assert_eq!(
            shell_to_completion_shell(crate::cli::Shell::Bash),
            CompletionShell::Bash
        );
        assert_eq!(
            shell_to_completion_shell(crate::cli::Shell::PowerShell),
            CompletionShell::PowerShell
        );
    }

    #[test]
    fn test_playlist_completions_missing_db() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let completions = get_playlist_completions(&temp_dir.path().join("none.db"))?;
        assert!(completions.is_empty());
        Ok(())
    }

    #[test]
    fn test_playlist_completions() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("encore.db");
        let mut conn = db::connect(&path)?;
        db::import_library(
            &mut conn,
            &LibraryExport {
                tracks: Vec::new(),
                playlists: vec![Playlist {
                    id: 5,
                    name: "Road Trip".to_string(),
                    track_ids: Vec::new(),
                }],
            },
        )?;

        assert_eq!(get_playlist_completions(&path)?, vec!["5\tRoad Trip".to_string()]);
        Ok(())
    }
}
