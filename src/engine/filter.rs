//! Include/exclude filtering of rule titles.
//!
//! Filters are regular expressions matched against the lowercased title at
//! load time, so filtered rules never reach the scan loop at all. Lowercasing
//! keeps filter rules from having to care about case.

use regex::Regex;

use crate::MagicError;

#[derive(Debug)]
pub(crate) struct TitleFilter {
    includes: Vec<Regex>,
    excludes: Vec<Regex>,
}

impl TitleFilter {
    pub(crate) fn new(include: &[&str], exclude: &[&str]) -> Result<Self, MagicError> {
        Ok(TitleFilter { includes: compile(include)?, excludes: compile(exclude)? })
    }

    /// True if a rule with this title should be dropped: either an exclusive
    /// include list that the title misses, or any matching exclude.
    pub(crate) fn filtered(&self, title: &str) -> bool {
        let title = title.to_lowercase();
        if !self.includes.is_empty() && !self.includes.iter().any(|re| re.is_match(&title)) {
            return true;
        }
        self.excludes.iter().any(|re| re.is_match(&title))
    }
}

fn compile(patterns: &[&str]) -> Result<Vec<Regex>, MagicError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|source| MagicError::InvalidFilter {
                pattern: pattern.to_string(),
                source,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::TitleFilter;

    #[test]
    fn empty_filters_keep_everything() {
        let filter = TitleFilter::new(&[], &[]).unwrap();
        assert!(!filter.filtered("gzip compressed data"));
    }

    #[test]
    fn includes_are_exclusive() {
        let filter = TitleFilter::new(&["zip"], &[]).unwrap();
        assert!(!filter.filtered("gzip compressed data"));
        assert!(filter.filtered("PNG image"));
    }

    #[test]
    fn excludes_override_includes() {
        let filter = TitleFilter::new(&["compressed"], &["^gzip"]).unwrap();
        assert!(filter.filtered("gzip compressed data"));
        assert!(!filter.filtered("lzma compressed data"));
    }

    #[test]
    fn titles_match_case_insensitively() {
        let filter = TitleFilter::new(&[], &["png"]).unwrap();
        assert!(filter.filtered("PNG image"));
    }

    #[test]
    fn bad_patterns_error_out() {
        assert!(TitleFilter::new(&["("], &[]).is_err());
    }
}
