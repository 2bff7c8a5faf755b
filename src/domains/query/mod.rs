use crate::errors::HostError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

// `@name`, with a reserved `@name@version` form whose version suffix is
// consumed and ignored until versioned checkouts exist.
static MENTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"@([a-zA-Z0-9_-]+)(?:@[a-zA-Z0-9._-]+)?").expect("mention regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    /// Mentioned repository names: lowercased, deduplicated, sorted.
    pub repos: Vec<String>,
    /// The question with all mentions stripped and whitespace collapsed.
    pub prompt: String,
}

/// Extract `@repo` mentions from a free-form question. Mentions naming
/// unknown repositories are not filtered here; resolution happens against
/// the registry downstream.
pub fn parse(input: &str) -> ParsedQuery {
    let mut repos = BTreeSet::new();
    for capture in MENTION_RE.captures_iter(input) {
        if let Some(name) = capture.get(1) {
            repos.insert(name.as_str().to_lowercase());
        }
    }

    let stripped = MENTION_RE.replace_all(input, " ");
    let prompt = stripped.split_whitespace().collect::<Vec<_>>().join(" ");

    ParsedQuery {
        repos: repos.into_iter().collect(),
        prompt,
    }
}

/// Flatten repository name lists into one canonical set: lowercased,
/// deduplicated, sorted by code point.
pub fn merge<I, S>(lists: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut set = BTreeSet::new();
    for list in lists {
        for name in list {
            let name = name.as_ref().trim().to_lowercase();
            if !name.is_empty() {
                set.insert(name);
            }
        }
    }
    set.into_iter().collect()
}

/// Canonical key for a repository set: sorted lowercase names joined with
/// `+`. The same set always yields the same key regardless of input order.
pub fn workspace_key<S: AsRef<str>>(set: &[S]) -> Result<String, HostError> {
    let names = merge([set.iter().map(|s| s.as_ref())]);
    if names.is_empty() {
        return Err(HostError::EmptyResourceSet);
    }
    Ok(names.join("+"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_extracts_sorted_repos_and_clean_prompt() {
        let parsed = parse("@svelte @daytona how do stores work?");
        assert_eq!(parsed.repos, vec!["daytona", "svelte"]);
        assert_eq!(parsed.prompt, "how do stores work?");
    }

    #[test]
    fn parse_case_folds_and_dedupes() {
        let parsed = parse("@Svelte @SVELTE @daytona x");
        assert_eq!(parsed.repos, vec!["daytona", "svelte"]);
        assert_eq!(parsed.prompt, "x");
    }

    #[test]
    fn parse_only_mentions_yields_empty_prompt() {
        let parsed = parse("@a @b @A");
        assert_eq!(parsed.repos, vec!["a", "b"]);
        assert_eq!(parsed.prompt, "");
    }

    #[test]
    fn parse_ignores_reserved_version_suffix() {
        let parsed = parse("@svelte@5.0 runes?");
        assert_eq!(parsed.repos, vec!["svelte"]);
        assert_eq!(parsed.prompt, "runes?");
    }

    #[test]
    fn prompt_never_contains_a_mention() {
        let checker = Regex::new(r"@[a-zA-Z0-9_-]+").unwrap();
        for input in [
            "@x middle @y end",
            "leading text @with-dash trailing",
            "@a@1 @b@2.0.0",
            "mail me at someone@example.com",
        ] {
            let parsed = parse(input);
            assert!(
                !checker.is_match(&parsed.prompt),
                "mention survived in {:?} -> {:?}",
                input,
                parsed.prompt
            );
        }
    }

    #[test]
    fn parse_collapses_whitespace_runs() {
        let parsed = parse("  @a   what   about\tthis  ");
        assert_eq!(parsed.prompt, "what about this");
    }

    #[test]
    fn merge_flattens_and_sorts() {
        let merged = merge([
            vec!["Svelte".to_string(), "daytona".to_string()],
            vec!["svelte".to_string(), "axum".to_string()],
        ]);
        assert_eq!(merged, vec!["axum", "daytona", "svelte"]);
    }

    #[test]
    fn workspace_key_is_permutation_invariant() {
        let key_a = workspace_key(&["svelte", "daytona"]).unwrap();
        let key_b = workspace_key(&["daytona", "svelte"]).unwrap();
        assert_eq!(key_a, "daytona+svelte");
        assert_eq!(key_a, key_b);
    }

    #[test]
    fn workspace_key_rejects_empty_set() {
        let err = workspace_key::<&str>(&[]).unwrap_err();
        assert!(matches!(err, HostError::EmptyResourceSet));
    }

    #[test]
    fn render_parse_round_trip() {
        let parsed = parse("@daytona @svelte how do stores work?");
        let rendered = format!(
            "{} {}",
            parsed
                .repos
                .iter()
                .map(|r| format!("@{r}"))
                .collect::<Vec<_>>()
                .join(" "),
            parsed.prompt
        );
        assert_eq!(parse(&rendered), parsed);
    }
}
