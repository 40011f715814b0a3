use std::sync::LazyLock;

use regex::Regex;

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[^\s"]+|"([^"]*)""#).expect("token pattern compiles")
});

static MENTION_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^<@\w+> (.*)$").expect("mention pattern compiles")
});

/// Splits text into whitespace separated tokens. A double quoted run is kept
/// as one token without its quotes; typographic quotes and apostrophes count
/// as double quotes.
pub fn tokenize_text(text: &str) -> Vec<String> {
    let normalized = text.replace(['\u{201c}', '\u{201d}', '\''], "\"");
    TOKEN
        .find_iter(&normalized)
        .map(|token| token.as_str().trim_matches('"').to_owned())
        .collect()
}

/// Drops a leading `<@USER> ` mention, returning the text unchanged when
/// there is none.
pub fn remove_user_id(text: &str) -> &str {
    MENTION_PREFIX
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map_or(text, |rest| rest.as_str())
}

#[cfg(test)]
mod tests {
    use super::{remove_user_id, tokenize_text};

    #[test]
    fn tokenizes_quoted_runs() {
        let cases: &[(&str, &[&str])] = &[
            ("foo bar snafu", &["foo", "bar", "snafu"]),
            ("foo \"bar snafu\" foo", &["foo", "bar snafu", "foo"]),
            ("foo \"bar snafu", &["foo", "bar", "snafu"]),
            ("foo \u{201c}bar snafu\u{201d}", &["foo", "bar snafu"]),
            ("foo 'bar snafu'", &["foo", "bar snafu"]),
            ("  spaced \t out\n", &["spaced", "out"]),
            ("", &[]),
        ];

        for (input, expected) in cases {
            assert_eq!(tokenize_text(input), *expected, "input: {input:?}");
        }
    }

    #[test]
    fn tokenizing_plain_tokens_is_idempotent() {
        let once = tokenize_text("status connection now");
        assert_eq!(tokenize_text(&once.join(" ")), once);
    }

    #[test]
    fn strips_leading_mention() {
        assert_eq!(remove_user_id("<@U123> foo bar"), "foo bar");
        assert_eq!(remove_user_id("foo bar"), "foo bar");
        assert_eq!(remove_user_id("hey <@U123> foo"), "hey <@U123> foo");
        assert_eq!(remove_user_id("<@U123>"), "<@U123>");
        assert_eq!(tokenize_text(remove_user_id("<@U123> foo bar")), vec!["foo", "bar"]);
    }
}
