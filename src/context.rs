//! Custom-context file handling.
//!
//! Users can pin organization-specific guidance (team priorities, product
//! names, watchlists) in a small markdown file that gets appended to the
//! scoring prompt. The file is optional; its absence is never an error.

use anyhow::{Context, Result};
use std::path::Path;

/// Read the custom context file; a missing file yields an empty string.
pub fn load_custom_context(path: &Path) -> Result<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e).context("reading custom context file"),
    }
}

/// Write the custom context file, creating parent directories as needed.
pub fn save_custom_context(path: &Path, content: &str) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).context("creating context directory")?;
    }
    std::fs::write(path, content).context("writing custom context file")
}

/// Remove the custom context file; a missing file is fine.
pub fn clear_custom_context(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).context("removing custom context file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("context.md");
        assert_eq!(load_custom_context(&path).unwrap(), "");
    }

    #[test]
    fn test_save_load_clear_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("context.md");

        save_custom_context(&path, "watch the collector").unwrap();
        assert_eq!(load_custom_context(&path).unwrap(), "watch the collector");

        clear_custom_context(&path).unwrap();
        assert_eq!(load_custom_context(&path).unwrap(), "");

        // Clearing an already-absent file is not an error.
        clear_custom_context(&path).unwrap();
    }
}
