//! Interactive overwrite confirmation.

use std::io::{self, BufRead, Write};
use std::path::Path;

use galaxia_core::output::OverwritePrompt;
use tracing::warn;

/// Asks on the terminal before replacing existing output.
#[derive(Debug, Default)]
pub struct StdinPrompt;

impl OverwritePrompt for StdinPrompt {
    fn confirm(&mut self, path: &Path) -> bool {
        let mut stderr = io::stderr();
        if write!(stderr, "Output {} exists. Overwrite? [y/N] ", path.display())
            .and_then(|()| stderr.flush())
            .is_err()
        {
            return false;
        }
        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => is_yes(&answer),
            Err(e) => {
                warn!(error = %e, "Could not read answer, keeping existing output");
                false
            }
        }
    }
}

/// Whether a typed answer means yes.
fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers() {
        assert!(is_yes("y\n"));
        assert!(is_yes("  YES "));
        assert!(!is_yes(""));
        assert!(!is_yes("n"));
        assert!(!is_yes("yep"));
    }
}
