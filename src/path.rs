//! Path canonicalization.
//!
//! Callers hand the file system paths in many shapes: absolute blob URLs,
//! `~/media/...` virtual paths, backslash-delimited paths, or keys already
//! prefixed with the container or route name.  [`PathResolver`] folds all of
//! them into one canonical blob key by running an ordered list of [`Rule`]s,
//! and builds relative and absolute URLs back from a key.

use crate::config::FileSystemConfig;

/// A single normalization step.
///
/// Each rule checks whether it applies to the current path and, if so,
/// rewrites it.  Rules run in the order they are listed in the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    /// Replace every `\` with `/`.
    ForwardSlashes,
    /// Remove one leading `~`.
    StripTilde,
    /// Remove one leading `/`.
    StripLeadingSlash,
    /// Remove a leading prefix, compared ASCII case-insensitively.
    ///
    /// With `whole_segment` set the prefix only matches when followed by
    /// `/` or the end of the path, so `media` never eats `mediafiles/`.
    StripPrefix {
        prefix: String,
        whole_segment: bool,
    },
    /// Trim every leading and trailing `/`.
    TrimSlashes,
}

impl Rule {
    fn strip_prefix(prefix: &str, whole_segment: bool) -> Self {
        Rule::StripPrefix {
            prefix: prefix.to_string(),
            whole_segment,
        }
    }

    /// Whether this rule changes `path`.
    pub fn applies(&self, path: &str) -> bool {
        match self {
            Rule::ForwardSlashes => path.contains('\\'),
            Rule::StripTilde => path.starts_with('~'),
            Rule::StripLeadingSlash => path.starts_with('/'),
            Rule::StripPrefix {
                prefix,
                whole_segment,
            } => matched_prefix_len(path, prefix, *whole_segment).is_some(),
            Rule::TrimSlashes => path.starts_with('/') || path.ends_with('/'),
        }
    }

    /// Rewrite `path`. Paths the rule does not apply to come back unchanged.
    pub fn apply(&self, path: String) -> String {
        if !self.applies(&path) {
            return path;
        }
        match self {
            Rule::ForwardSlashes => path.replace('\\', "/"),
            Rule::StripTilde => path[1..].to_string(),
            Rule::StripLeadingSlash => path[1..].to_string(),
            Rule::StripPrefix {
                prefix,
                whole_segment,
            } => match matched_prefix_len(&path, prefix, *whole_segment) {
                Some(len) => path[len..].to_string(),
                None => path,
            },
            Rule::TrimSlashes => path.trim_matches('/').to_string(),
        }
    }
}

/// Byte length of `prefix` at the start of `path`, if it matches.
fn matched_prefix_len(path: &str, prefix: &str, whole_segment: bool) -> Option<usize> {
    if prefix.is_empty() {
        return None;
    }
    let head = path.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    if whole_segment {
        let rest = &path[prefix.len()..];
        if !(rest.is_empty() || rest.starts_with('/')) {
            return None;
        }
    }
    Some(prefix.len())
}

/// Converts between caller paths, blob keys and outward-facing URLs.
#[derive(Debug, Clone)]
pub struct PathResolver {
    rules: Vec<Rule>,
    root_container_url: String,
    app_virtual_path: String,
    route: String,
}

impl PathResolver {
    pub fn new(config: &FileSystemConfig) -> Self {
        let mut rules = vec![Rule::ForwardSlashes];
        if !config.app_virtual_path().is_empty() {
            rules.push(Rule::strip_prefix(config.app_virtual_path(), true));
        }
        rules.push(Rule::StripTilde);
        rules.push(Rule::StripLeadingSlash);
        rules.push(Rule::strip_prefix(&config.root_container_url(), false));
        if config.use_default_route() {
            rules.push(Rule::strip_prefix(config.default_route(), true));
        }
        rules.push(Rule::strip_prefix(config.container_name(), true));
        rules.push(Rule::StripLeadingSlash);
        rules.push(Rule::TrimSlashes);

        Self {
            rules,
            root_container_url: config.root_container_url(),
            app_virtual_path: config.app_virtual_path().to_string(),
            route: config.route_name().to_string(),
        }
    }

    /// Normalize any accepted path form to a blob key such as `1010/media.jpg`.
    ///
    /// Empty input yields an empty key.
    pub fn fix_path(&self, path: &str) -> String {
        self.rules
            .iter()
            .fold(path.to_string(), |acc, rule| rule.apply(acc))
    }

    /// Build a URL for an already-normalized key.
    ///
    /// Relative URLs are `{app_virtual_path}/{route}/{key}`; absolute URLs
    /// are `{root_url}{container}/{key}`.
    pub fn resolve_url(&self, key: &str, relative: bool) -> String {
        if relative {
            format!("{}/{}/{}", self.app_virtual_path, self.route, key)
        } else {
            format!("{}{}", self.root_container_url, key)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT_URL: &str = "http://127.0.0.1:10000/devstoreaccount1/";

    fn resolver() -> PathResolver {
        PathResolver::new(&FileSystemConfig::new("media", ROOT_URL, "c").unwrap())
    }

    fn resolver_with(config: FileSystemConfig) -> PathResolver {
        PathResolver::new(&config)
    }

    #[test]
    fn test_accepted_forms_normalize_to_same_key() {
        let r = resolver();
        for input in [
            "1010/media.jpg",
            "media/1010/media.jpg",
            "/media/1010/media.jpg",
            "\\media\\1010\\media.jpg",
            "~/media/1010/media.jpg",
            "/1010/media.jpg",
            "1010/media.jpg/",
            "MEDIA/1010/media.jpg",
            "http://127.0.0.1:10000/devstoreaccount1/media/1010/media.jpg",
            "HTTP://127.0.0.1:10000/DEVSTOREACCOUNT1/MEDIA/1010/media.jpg",
        ] {
            assert_eq!(r.fix_path(input), "1010/media.jpg", "input: {input}");
        }
    }

    #[test]
    fn test_fix_path_is_idempotent() {
        let r = resolver();
        for input in [
            "",
            "/",
            "~",
            "1010/media.jpg",
            "\\media\\1010\\media.jpg",
            "~/media/forms/form_123/a.jpg",
            "mediafiles/a.jpg",
            "http://127.0.0.1:10000/devstoreaccount1/media/1010/media.jpg",
        ] {
            let once = r.fix_path(input);
            assert_eq!(r.fix_path(&once), once, "input: {input}");
        }
    }

    #[test]
    fn test_empty_input_gives_empty_key() {
        let r = resolver();
        assert_eq!(r.fix_path(""), "");
        assert_eq!(r.fix_path("/"), "");
        assert_eq!(r.fix_path("media"), "");
        assert_eq!(r.fix_path("~/media/"), "");
    }

    #[test]
    fn test_prefix_stops_at_segment_boundary() {
        let r = resolver();
        assert_eq!(r.fix_path("mediafiles/a.jpg"), "mediafiles/a.jpg");
        assert_eq!(r.fix_path("/media-old/a.jpg"), "media-old/a.jpg");
    }

    #[test]
    fn test_app_virtual_path_is_stripped() {
        let r = resolver_with(
            FileSystemConfig::new("media", ROOT_URL, "c")
                .unwrap()
                .with_app_virtual_path("/test"),
        );
        assert_eq!(r.fix_path("/test/media/1010/media.jpg"), "1010/media.jpg");
        assert_eq!(r.fix_path("\\test\\media\\1010\\media.jpg"), "1010/media.jpg");
        assert_eq!(r.fix_path("/media/1010/media.jpg"), "1010/media.jpg");
        assert_eq!(r.fix_path("/testing/a.jpg"), "testing/a.jpg");
    }

    #[test]
    fn test_container_mode_strips_container_name() {
        let r = resolver_with(
            FileSystemConfig::new("assets", ROOT_URL, "c")
                .unwrap()
                .with_default_route(false),
        );
        assert_eq!(r.fix_path("/assets/1010/a.jpg"), "1010/a.jpg");
        // The route is only special in default-route mode.
        assert_eq!(r.fix_path("/media/1010/a.jpg"), "media/1010/a.jpg");
        assert_eq!(r.resolve_url("1010/a.jpg", true), "/assets/1010/a.jpg");
    }

    #[test]
    fn test_resolve_url() {
        let r = resolver();
        assert_eq!(r.resolve_url("1010/media.jpg", true), "/media/1010/media.jpg");
        assert_eq!(
            r.resolve_url("1010/media.jpg", false),
            "http://127.0.0.1:10000/devstoreaccount1/media/1010/media.jpg"
        );

        let r = resolver_with(
            FileSystemConfig::new("media", ROOT_URL, "c")
                .unwrap()
                .with_app_virtual_path("test/"),
        );
        assert_eq!(
            r.resolve_url("1010/media.jpg", true),
            "/test/media/1010/media.jpg"
        );
    }

    #[test]
    fn test_round_trip_through_urls() {
        let configs = [
            FileSystemConfig::new("media", ROOT_URL, "c").unwrap(),
            FileSystemConfig::new("media", ROOT_URL, "c")
                .unwrap()
                .with_app_virtual_path("/test"),
            FileSystemConfig::new("assets", "https://acct.blob.core.windows.net", "c")
                .unwrap()
                .with_default_route(false),
            FileSystemConfig::new("assets", ROOT_URL, "c").unwrap(),
        ];
        for config in configs {
            let r = resolver_with(config);
            for key in ["1010/media.jpg", "a.png", "forms/form_123/b.jpg"] {
                assert_eq!(r.fix_path(&r.resolve_url(key, true)), key);
                assert_eq!(r.fix_path(&r.resolve_url(key, false)), key);
            }
        }
    }

    #[test]
    fn test_rule_applies() {
        let rule = Rule::strip_prefix("media", true);
        assert!(rule.applies("media"));
        assert!(rule.applies("Media/x"));
        assert!(!rule.applies("medi"));
        assert!(!rule.applies("medias"));
        assert_eq!(rule.apply("media/x".to_string()), "/x");
        assert!(!Rule::strip_prefix("", false).applies("x"));
        assert_eq!(resolver().rules.last(), Some(&Rule::TrimSlashes));
    }

    #[test]
    fn test_non_ascii_paths_do_not_panic() {
        let r = resolver();
        assert_eq!(r.fix_path("médiа/ü.jpg"), "médiа/ü.jpg");
        assert_eq!(r.fix_path("é"), "é");
    }
}
