/// Characters that are unsafe in artifact filenames on common filesystems.
const UNSAFE_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const MAX_TITLE_CHARS: usize = 50;
const FALLBACK_TITLE: &str = "chapter";

/// Make a chapter title safe for use inside a filename.
pub fn sanitize_title(title: &str) -> String {
    let replaced: String = title
        .chars()
        .map(|ch| if UNSAFE_CHARS.contains(&ch) { '_' } else { ch })
        .take(MAX_TITLE_CHARS)
        .collect();

    let trimmed = replaced.trim();
    if trimmed.is_empty() {
        FALLBACK_TITLE.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Filename of the artifact for the chapter at zero-based `index`.
pub fn artifact_filename(index: usize, title: &str) -> String {
    format!("{:02}_{}.pdf", index + 1, sanitize_title(title))
}

/// Integer percentage after `done` of `total` chapters.
pub fn percent_complete(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_unsafe_characters() {
        assert_eq!(sanitize_title("Part 1: A/B?"), "Part 1_ A_B_");
    }

    #[test]
    fn truncates_long_titles_by_character() {
        let title = "é".repeat(80);
        assert_eq!(sanitize_title(&title).chars().count(), 50);
    }

    #[test]
    fn blank_titles_fall_back() {
        assert_eq!(sanitize_title("   "), "chapter");
        assert_eq!(sanitize_title(""), "chapter");
    }

    #[test]
    fn filenames_are_numbered_from_one() {
        assert_eq!(artifact_filename(0, "Intro"), "01_Intro.pdf");
        assert_eq!(artifact_filename(11, "End"), "12_End.pdf");
    }

    #[test]
    fn percentages_match_chapter_steps() {
        let steps: Vec<u8> = (1..=3).map(|done| percent_complete(done, 3)).collect();
        assert_eq!(steps, vec![33, 66, 100]);
        assert_eq!(percent_complete(0, 0), 100);
    }
}
