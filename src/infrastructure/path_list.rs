//! Reading flat path lists for the path tree builder.

use std::fs;
use std::io::{self, Read};
use std::path::Path;

use tracing::{debug, instrument};

use crate::infrastructure::error::{InfraError, InfraResult};

/// Read paths from `file`, or from stdin when `None`.
#[instrument(level = "debug")]
pub fn read_path_list(file: Option<&Path>) -> InfraResult<Vec<String>> {
    let content = match file {
        Some(path) => fs::read_to_string(path)
            .map_err(|e| InfraError::io(format!("read {}", path.display()), e))?,
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| InfraError::io("read stdin", e))?;
            buf
        }
    };
    let paths = parse_path_list(&content);
    debug!(count = paths.len(), "read path list");
    Ok(paths)
}

/// One path per line; blank lines and `#` comments are skipped.
pub fn parse_path_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_comments_and_blanks_when_parsing_then_only_paths_remain() {
        let content = "# header\n/a/b.h\n\n  /c.h  \n#/skipped\n";

        assert_eq!(parse_path_list(content), vec!["/a/b.h", "/c.h"]);
    }

    #[test]
    fn given_missing_file_when_reading_then_io_error_with_context() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.txt");

        let err = read_path_list(Some(&missing)).unwrap_err();

        assert!(err.to_string().contains("nope.txt"));
    }
}
