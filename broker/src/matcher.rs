//! Standing-approval rule table: auto-approves a gated request whose
//! (item, reason) matches a configured rule. Rules are scanned in
//! configuration order; the first match wins. An empty reason never
//! matches.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct StandingRule {
    pub item: String,
    #[serde(rename = "reason_match")]
    pub reason_match: String,
    #[serde(default)]
    pub note: String,
}

/// Returns the first rule whose `item` and `reason_match` match `item`/`reason`.
/// `reason_match` matches exactly, unless it ends with a single trailing `*`,
/// in which case it is a prefix match; the asterisk is not otherwise special.
pub fn find_match<'a>(rules: &'a [StandingRule], item: &str, reason: &str) -> Option<&'a StandingRule> {
    if reason.is_empty() {
        return None;
    }
    rules.iter().find(|rule| rule.item == item && pattern_matches(&rule.reason_match, reason))
}

fn pattern_matches(pattern: &str, reason: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => reason.starts_with(prefix),
        None => pattern == reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(item: &str, reason_match: &str) -> StandingRule {
        StandingRule {
            item: item.to_string(),
            reason_match: reason_match.to_string(),
            note: String::new(),
        }
    }

    #[test]
    fn exact_match_requires_full_equality() {
        let rules = vec![rule("cron-key", "cron:nightly")];
        assert!(find_match(&rules, "cron-key", "cron:nightly").is_some());
        assert!(find_match(&rules, "cron-key", "cron:nightly2").is_none());
    }

    #[test]
    fn prefix_wildcard_matches_foo_foobar_and_foo_colon_x_but_not_fo_or_barfoo() {
        let rules = vec![rule("item", "foo*")];
        assert!(find_match(&rules, "item", "foo").is_some());
        assert!(find_match(&rules, "item", "foobar").is_some());
        assert!(find_match(&rules, "item", "foo:x").is_some());
        assert!(find_match(&rules, "item", "fo").is_none());
        assert!(find_match(&rules, "item", "barfoo").is_none());
    }

    #[test]
    fn empty_reason_never_matches() {
        let rules = vec![rule("item", "*")];
        assert!(find_match(&rules, "item", "").is_none());
    }

    #[test]
    fn first_matching_rule_wins() {
        let rules = vec![rule("item", "a*"), rule("item", "ab*")];
        let matched = find_match(&rules, "item", "ab").unwrap();
        assert_eq!(matched.reason_match, "a*");
    }
}
