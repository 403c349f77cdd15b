//! Outgoing message formatting and spam suppression
//!
//! Formatting is a pure function of the content. Suppression keeps, per
//! recipient, the last content sent and how many times in a row it was sent.

use std::collections::HashMap;
use std::sync::Mutex;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::FilterConfig;

/// Characters treated as visual separators
const SEPARATORS: &[char] = &['=', '-', '_', '*', '#', '~'];

/// Structural formatting rules
#[derive(Debug, Clone)]
pub struct FormatRules {
    pub max_length: usize,
    pub truncation_marker: String,
    pub separator_run: usize,
}

impl From<&FilterConfig> for FormatRules {
    fn from(config: &FilterConfig) -> Self {
        Self {
            max_length: config.max_length,
            truncation_marker: config.truncation_marker.clone(),
            separator_run: config.separator_run,
        }
    }
}

impl Default for FormatRules {
    fn default() -> Self {
        Self::from(&FilterConfig::default())
    }
}

/// Clean up content for sending: shorten separator runs, drop repeated
/// reminder banners, cut to the platform limit
pub fn format_content(content: &str, rules: &FormatRules) -> String {
    let collapsed = collapse_separator_runs(content, rules.separator_run);
    let deduped = collapse_repeated_banners(&collapsed);
    truncate(&deduped, rules.max_length, &rules.truncation_marker)
}

fn collapse_separator_runs(content: &str, max_run: usize) -> String {
    let max_run = max_run.max(1);
    let mut out = String::with_capacity(content.len());
    let mut run_char = None;
    let mut run_len = 0;

    for c in content.chars() {
        if SEPARATORS.contains(&c) {
            if run_char == Some(c) {
                run_len += 1;
            } else {
                run_char = Some(c);
                run_len = 1;
            }
            if run_len > max_run {
                continue;
            }
        } else {
            run_char = None;
            run_len = 0;
        }
        out.push(c);
    }
    out
}

fn is_reminder_line(line: &str) -> bool {
    line.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| word == "reminder")
}

/// Drop a reminder line identical to the previous reminder line, ignoring
/// blank lines in between
fn collapse_repeated_banners(content: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut last_banner: Option<String> = None;

    for line in content.split('\n') {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            kept.push(line);
            continue;
        }

        if is_reminder_line(trimmed) {
            let key = trimmed.to_lowercase();
            if last_banner.as_deref() == Some(key.as_str()) {
                // drop the blank lines we kept since the previous banner too
                while kept.last().is_some_and(|l| l.trim().is_empty()) {
                    kept.pop();
                }
                continue;
            }
            last_banner = Some(key);
        } else {
            last_banner = None;
        }
        kept.push(line);
    }
    kept.join("\n")
}

fn truncate(content: &str, max_length: usize, marker: &str) -> String {
    let len = content.chars().count();
    if len <= max_length {
        return content.to_string();
    }

    let marker_len = marker.chars().count();
    if marker_len >= max_length {
        return content.chars().take(max_length).collect();
    }

    let mut out: String = content.chars().take(max_length - marker_len).collect();
    out.push_str(marker);
    out
}

/// Outcome of running content through the filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterVerdict {
    /// Send this formatted body
    Send(String),
    /// Same content sent too many times in a row to this recipient
    Duplicate { repeats: u32 },
    /// Content matched a suppression pattern
    Noise { pattern: String },
}

impl FilterVerdict {
    pub fn into_body(self) -> Option<String> {
        match self {
            Self::Send(body) => Some(body),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct RepeatState {
    content: String,
    count: u32,
}

/// Formats outgoing content and suppresses repeats per recipient
pub struct SpamFilter {
    rules: FormatRules,
    max_repeats: u32,
    patterns: Vec<Regex>,
    recent: Mutex<HashMap<String, RepeatState>>,
}

impl SpamFilter {
    /// Build from config; patterns that fail to compile are skipped
    pub fn new(config: &FilterConfig) -> Self {
        debug!(max_repeats = config.max_repeats, "SpamFilter::new: called");
        let patterns = config
            .suppress_patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(pattern = %p, error = %e, "Ignoring invalid suppression pattern");
                    None
                }
            })
            .collect();

        Self {
            rules: FormatRules::from(config),
            max_repeats: config.max_repeats.max(1),
            patterns,
            recent: Mutex::new(HashMap::new()),
        }
    }

    pub fn rules(&self) -> &FormatRules {
        &self.rules
    }

    /// Formatted body, or `None` when the message must not be sent
    pub fn format_and_guard(&self, content: &str, recipient: &str) -> Option<String> {
        self.evaluate(content, recipient).into_body()
    }

    /// Full verdict for `content` addressed to `recipient`
    pub fn evaluate(&self, content: &str, recipient: &str) -> FilterVerdict {
        debug!(%recipient, len = content.len(), "SpamFilter::evaluate: called");

        if let Some(pattern) = self.patterns.iter().find(|re| re.is_match(content.trim())) {
            info!(%recipient, pattern = %pattern.as_str(), "Suppressed noisy message");
            return FilterVerdict::Noise {
                pattern: pattern.as_str().to_string(),
            };
        }

        let repeats = {
            let mut recent = match self.recent.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let state = recent.entry(recipient.to_string()).or_insert_with(|| RepeatState {
                content: String::new(),
                count: 0,
            });
            if state.count > 0 && state.content == content {
                state.count = state.count.saturating_add(1);
            } else {
                state.content = content.to_string();
                state.count = 1;
            }
            state.count
        };

        if repeats > self.max_repeats {
            info!(%recipient, repeats, "Suppressed duplicate message");
            return FilterVerdict::Duplicate { repeats };
        }

        FilterVerdict::Send(format_content(content, &self.rules))
    }

    /// Forget repeat history for one recipient
    pub fn reset(&self, recipient: &str) {
        debug!(%recipient, "SpamFilter::reset: called");
        if let Ok(mut recent) = self.recent.lock() {
            recent.remove(recipient);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn filter() -> SpamFilter {
        SpamFilter::new(&FilterConfig::default())
    }

    #[test]
    fn test_fourth_identical_message_suppressed() {
        let filter = filter();
        assert_eq!(filter.format_and_guard("ping", "Agent-1").as_deref(), Some("ping"));
        assert_eq!(filter.format_and_guard("ping", "Agent-1").as_deref(), Some("ping"));
        assert_eq!(filter.format_and_guard("ping", "Agent-1").as_deref(), Some("ping"));
        assert_eq!(filter.format_and_guard("ping", "Agent-1"), None);
        assert_eq!(filter.evaluate("ping", "Agent-1"), FilterVerdict::Duplicate { repeats: 5 });
    }

    #[test]
    fn test_different_content_resets_counter() {
        let filter = filter();
        for _ in 0..3 {
            assert!(filter.format_and_guard("ping", "Agent-1").is_some());
        }
        assert!(filter.format_and_guard("pong", "Agent-1").is_some());
        assert!(filter.format_and_guard("ping", "Agent-1").is_some());
    }

    #[test]
    fn test_counters_are_per_recipient() {
        let filter = filter();
        for _ in 0..3 {
            filter.format_and_guard("ping", "Agent-1");
        }
        assert!(filter.format_and_guard("ping", "Agent-2").is_some());
        assert!(filter.format_and_guard("ping", "Agent-1").is_none());

        filter.reset("Agent-1");
        assert!(filter.format_and_guard("ping", "Agent-1").is_some());
    }

    #[test]
    fn test_noise_patterns_suppressed_outright() {
        let filter = filter();
        assert!(matches!(
            filter.evaluate("==========\n----------", "Agent-1"),
            FilterVerdict::Noise { .. }
        ));
        assert!(filter.format_and_guard("REMINDER:", "Agent-1").is_none());
        assert!(filter.format_and_guard("*** Reminder ***", "Agent-1").is_none());
        assert!(filter.format_and_guard("[heartbeat]", "Agent-1").is_none());
        assert!(filter.format_and_guard("Reminder: rebase before merging", "Agent-1").is_some());
    }

    #[test]
    fn test_invalid_pattern_skipped() {
        let config = FilterConfig {
            suppress_patterns: vec!["(unclosed".to_string(), "^spam$".to_string()],
            ..Default::default()
        };
        let filter = SpamFilter::new(&config);
        assert!(filter.format_and_guard("spam", "Agent-1").is_none());
        assert!(filter.format_and_guard("ham", "Agent-1").is_some());
    }

    #[test]
    fn test_separator_runs_collapsed() {
        let rules = FormatRules {
            separator_run: 5,
            ..Default::default()
        };
        let out = format_content("title\n==============\nbody -- ok", &rules);
        assert_eq!(out, "title\n=====\nbody -- ok");
    }

    #[test]
    fn test_mixed_separators_counted_separately() {
        let out = collapse_separator_runs("=-=-=-=-", 1);
        assert_eq!(out, "=-=-=-=-");
        assert_eq!(collapse_separator_runs("a____b", 2), "a__b");
    }

    #[test]
    fn test_repeated_reminder_banners_collapsed() {
        let content = "REMINDER: check your inbox\n\nREMINDER: check your inbox\nreminder: check your inbox\nDo the task.";
        let out = format_content(content, &FormatRules::default());
        assert_eq!(out, "REMINDER: check your inbox\nDo the task.");
    }

    #[test]
    fn test_distinct_reminders_kept() {
        let content = "Reminder: A\nReminder: B";
        assert_eq!(format_content(content, &FormatRules::default()), content);
    }

    #[test]
    fn test_truncation_marker() {
        let rules = FormatRules::default();
        let long = "x".repeat(2500);
        let out = format_content(&long, &rules);
        assert_eq!(out.chars().count(), 2000);
        assert!(out.ends_with("[truncated]"));
    }

    #[test]
    fn test_content_at_limit_untouched() {
        let exact = "y".repeat(2000);
        assert_eq!(format_content(&exact, &FormatRules::default()), exact);
    }

    #[test]
    fn test_truncation_counts_chars_not_bytes() {
        let rules = FormatRules {
            max_length: 10,
            truncation_marker: "…".to_string(),
            separator_run: 20,
        };
        let out = format_content("ééééééééééééééé", &rules);
        assert_eq!(out, "ééééééééé…");
    }

    proptest! {
        #[test]
        fn prop_formatted_never_exceeds_limit(content in ".{0,3000}", max in 1usize..2500) {
            let rules = FormatRules { max_length: max, ..Default::default() };
            let out = format_content(&content, &rules);
            prop_assert!(out.chars().count() <= max);
        }
    }
}
