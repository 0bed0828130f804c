use std::{collections::HashSet, sync::LazyLock};

use regex::Regex;
use serde::Serialize;
use utoipa::ToSchema;

use crate::models::mentions::MentionKind;

/// Characters of surrounding text kept on each side of a mention.
pub const CONTEXT_RADIUS: usize = 50;

static MENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@(?:(team|player):)?([A-Za-z0-9_]+)").expect("mention pattern is valid")
});

/// A mention found in text, not yet matched to anything in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedMention {
    pub kind: MentionKind,
    pub name: String,
    /// The mention as written, e.g. `@team:sentinels`.
    pub text: String,
    /// Byte offset of the `@`.
    pub position: usize,
    pub context: String,
}

/// Finds `@user`, `@team:name` and `@player:name` mentions.
///
/// Mentions directly after a letter, digit or `.` are skipped so e-mail addresses
/// don't count, as are plain `@name` mentions followed by `:` or `@`. Each
/// entity is reported once, at its first occurrence.
#[must_use]
pub fn extract(content: &str) -> Vec<ExtractedMention> {
    let mut seen = HashSet::new();
    let mut found = Vec::new();
    for caps in MENTION.captures_iter(content) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let start = whole.start();
        let preceded_by_word = content[..start]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '.');
        if preceded_by_word {
            continue;
        }
        let kind = match caps.get(1).map(|m| m.as_str()) {
            Some("team") => MentionKind::Team,
            Some("player") => MentionKind::Player,
            _ => {
                if matches!(content[whole.end()..].chars().next(), Some(':' | '@')) {
                    continue;
                }
                MentionKind::User
            }
        };
        let name = caps[2].to_owned();
        if !seen.insert((kind, name.to_lowercase())) {
            continue;
        }
        found.push(ExtractedMention {
            kind,
            text: whole.as_str().to_owned(),
            position: start,
            context: context(content, start, whole.end()),
            name,
        });
    }
    found
}

/// Text around `start..end`, widened to char boundaries.
fn context(content: &str, start: usize, end: usize) -> String {
    let mut from = start.saturating_sub(CONTEXT_RADIUS);
    while !content.is_char_boundary(from) {
        from -= 1;
    }
    let mut to = (end + CONTEXT_RADIUS).min(content.len());
    while !content.is_char_boundary(to) {
        to += 1;
    }
    content[from..to].trim().to_owned()
}

/// Team lookups accept `_` in place of spaces, e.g. `@team:100_Thieves`.
#[must_use]
pub fn team_name_variants(name: &str) -> (String, String) {
    (name.to_lowercase(), name.replace('_', " ").to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds_and_names(content: &str) -> Vec<(MentionKind, String)> {
        extract(content)
            .into_iter()
            .map(|m| (m.kind, m.name))
            .collect()
    }

    #[test]
    fn finds_all_three_kinds() {
        assert_eq!(
            kinds_and_names("GG @Rival_1, @team:SEN beat @player:TenZ"),
            vec![
                (MentionKind::User, "Rival_1".to_owned()),
                (MentionKind::Team, "SEN".to_owned()),
                (MentionKind::Player, "TenZ".to_owned()),
            ]
        );
    }

    #[test]
    fn skips_email_addresses() {
        assert!(extract("mail me at scout@mrvl.gg or first.last@x.io").is_empty());
        assert_eq!(kinds_and_names("(@mod)").len(), 1);
    }

    #[test]
    fn plain_mentions_need_a_clean_end() {
        assert!(extract("@teams:foo and @a@b").is_empty());
    }

    #[test]
    fn duplicates_keep_first_position() {
        let found = extract("@Ana hi @ana and @team:ana");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].position, 0);
        assert_eq!(found[1].kind, MentionKind::Team);
        assert_eq!(found[1].text, "@team:ana");
    }

    #[test]
    fn context_is_trimmed_to_radius() {
        let padding = "x".repeat(80);
        let content = format!("{padding} @someone {padding}");
        let found = extract(&content);
        assert_eq!(found[0].position, 81);
        assert_eq!(found[0].context.len(), 2 * CONTEXT_RADIUS + "@someone".len());
    }

    #[test]
    fn context_respects_multibyte_text() {
        let content = format!("{}@héros", "é".repeat(40));
        let found = extract(&content);
        assert_eq!(found[0].name, "h");
        assert!(found[0].context.starts_with('é'));
    }

    #[test]
    fn team_variants_swap_underscores() {
        assert_eq!(
            team_name_variants("100_Thieves"),
            ("100_thieves".to_owned(), "100 thieves".to_owned())
        );
    }
}
