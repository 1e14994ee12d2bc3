//! Canonical names for channels that were renamed over time.

const MIGRATIONS: &[(&str, &str)] = &[
    ("Sport", "Sports"),
    ("Tech News", "Technology"),
    ("Tech Reviews", "Technology"),
    ("Celebrity News", "Celebrities"),
    ("Entertainment News", "Entertainment"),
    ("Top Sources", "Top News"),
    ("Business News", "Business"),
    ("Car News", "Cars"),
];

/// The current name for `channel`. Unknown names are returned unchanged, so
/// migrating an already-canonical name is a no-op.
pub fn migrate_channel(channel: &str) -> &str {
    MIGRATIONS
        .iter()
        .find(|(legacy, _)| *legacy == channel)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(channel)
}

/// Legacy names that migrate to `canonical`.
pub fn legacy_names(canonical: &str) -> impl Iterator<Item = &'static str> + '_ {
    MIGRATIONS
        .iter()
        .filter(move |(_, to)| *to == canonical)
        .map(|(from, _)| *from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrates_legacy_names() {
        assert_eq!(migrate_channel("Sport"), "Sports");
        assert_eq!(migrate_channel("Tech News"), "Technology");
        assert_eq!(migrate_channel("Tech Reviews"), "Technology");
        assert_eq!(migrate_channel("Top Sources"), "Top News");
    }

    #[test]
    fn migration_is_idempotent() {
        for (legacy, _) in MIGRATIONS {
            let once = migrate_channel(legacy);
            assert_eq!(migrate_channel(once), once);
        }
        assert_eq!(migrate_channel("Weather"), "Weather");
    }

    #[test]
    fn lists_legacy_names() {
        let mut names: Vec<_> = legacy_names("Technology").collect();
        names.sort();
        assert_eq!(names, vec!["Tech News", "Tech Reviews"]);
        assert_eq!(legacy_names("Weather").count(), 0);
    }
}
