//! Path display and normalization helpers.

use std::path::{Path, PathBuf};

/// Format a path for display, abbreviating the home directory to `~` and
/// preferring a short relative form when the path is under the current
/// directory.
pub fn format_path_for_display(path: &Path) -> String {
    if let Ok(cwd) = std::env::current_dir()
        && let Some(rel) = pathdiff::diff_paths(path, &cwd)
    {
        let rel_str = rel.display().to_string();
        // A short relative path beats an absolute one; "../../.." chains don't.
        if !rel_str.starts_with("..") && !rel_str.is_empty() {
            return rel_str;
        }
    }

    if let Some(home) = dirs::home_dir()
        && let Ok(stripped) = path.strip_prefix(&home)
    {
        return format!("~/{}", stripped.display());
    }

    path.display().to_string()
}

/// Canonicalize a path without Windows verbatim (`\\?\`) prefixes.
///
/// Falls back to the input path when canonicalization fails (e.g. the path
/// does not exist yet).
pub fn canonicalize_lossy(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Kebab-case a lane or title for filesystem use.
///
/// `Framework: Core` becomes `framework-core`. Runs of non-alphanumeric
/// characters collapse to a single `-`; the result is lowercase with no
/// leading or trailing dashes.
pub fn kebab_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_dash = false;
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Framework: Core", "framework-core")]
    #[case("CLI / Tooling", "cli-tooling")]
    #[case("  spaced  out  ", "spaced-out")]
    #[case("already-kebab", "already-kebab")]
    #[case("MixedCase99", "mixedcase99")]
    fn kebab_cases(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(kebab_case(input), expected);
    }

    #[test]
    fn canonicalize_missing_path_is_identity() {
        let p = Path::new("/definitely/not/a/real/path");
        assert_eq!(canonicalize_lossy(p), p);
    }
}
