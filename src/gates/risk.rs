//! Risk classification over the changed-file set.

use regex::Regex;

use crate::config::GatesConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum RiskTier {
    DocsOnly,
    Standard,
    HighRisk,
}

fn compile(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                log::warn!("ignoring invalid risk pattern {p:?}: {e}");
                None
            }
        })
        .collect()
}

/// Classify a change set.
///
/// High-risk patterns win over everything; a change is docs-only when every
/// file matches a docs pattern. An empty change set is `standard` - there is
/// nothing to justify skipping gates on.
pub fn classify(changed_files: &[String], config: &GatesConfig) -> RiskTier {
    if changed_files.is_empty() {
        return RiskTier::Standard;
    }
    let high_risk = compile(&config.high_risk_patterns);
    if changed_files
        .iter()
        .any(|f| high_risk.iter().any(|re| re.is_match(f)))
    {
        return RiskTier::HighRisk;
    }
    let docs_only = compile(&config.docs_only_patterns);
    if changed_files
        .iter()
        .all(|f| docs_only.iter().any(|re| re.is_match(f)))
    {
        return RiskTier::DocsOnly;
    }
    RiskTier::Standard
}

/// Whether any changed file trips the safety-critical test patterns, which
/// keep tests running even for docs-only changes.
pub fn touches_safety_paths(changed_files: &[String], config: &GatesConfig) -> bool {
    let safety = compile(&config.safety_test_patterns);
    changed_files
        .iter()
        .any(|f| safety.iter().any(|re| re.is_match(f)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GatesConfig {
        GatesConfig::default()
    }

    #[test]
    fn all_docs_is_docs_only() {
        let changed = vec!["docs/guide.md".to_string(), "README.md".to_string()];
        assert_eq!(classify(&changed, &config()), RiskTier::DocsOnly);
    }

    #[test]
    fn mixed_change_is_standard() {
        let changed = vec!["docs/guide.md".to_string(), "src/lib.rs".to_string()];
        assert_eq!(classify(&changed, &config()), RiskTier::Standard);
    }

    #[test]
    fn migrations_are_high_risk_even_with_docs() {
        let changed = vec![
            "docs/guide.md".to_string(),
            "db/migrations/0001.sql".to_string(),
        ];
        assert_eq!(classify(&changed, &config()), RiskTier::HighRisk);
    }

    #[test]
    fn empty_set_is_standard() {
        assert_eq!(classify(&[], &config()), RiskTier::Standard);
    }

    #[test]
    fn safety_paths_detected() {
        let changed = vec!["docs/safety-notes.md".to_string()];
        assert!(touches_safety_paths(&changed, &config()));
        assert!(!touches_safety_paths(&["docs/x.md".to_string()], &config()));
    }

    #[test]
    fn invalid_patterns_are_skipped_not_fatal() {
        let mut cfg = config();
        cfg.docs_only_patterns.push("(unclosed".into());
        let changed = vec!["README.md".to_string()];
        assert_eq!(classify(&changed, &cfg), RiskTier::DocsOnly);
    }
}
