/// Renders a git-style unified diff for one file.
///
/// `None` means the file does not exist on that side. Identical content
/// renders as an empty string.
pub fn render_file_diff(path: &str, old: Option<&[u8]>, new: Option<&[u8]>) -> String {
    if old == new {
        return String::new();
    }

    let old_text = old.map(String::from_utf8_lossy).unwrap_or_default();
    let new_text = new.map(String::from_utf8_lossy).unwrap_or_default();

    let old_label = match old {
        Some(_) => format!("a/{path}"),
        None => "/dev/null".to_string(),
    };
    let new_label = match new {
        Some(_) => format!("b/{path}"),
        None => "/dev/null".to_string(),
    };

    let patch = diffy::create_patch(&old_text, &new_text).to_string();
    // diffy writes its own "--- original" / "+++ modified" header first
    let hunks = patch.splitn(3, '\n').nth(2).unwrap_or("");

    format!("--- {old_label}\n+++ {new_label}\n{hunks}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_content_has_no_diff() {
        assert_eq!(render_file_diff("a.md", Some(b"x\n"), Some(b"x\n")), "");
        assert_eq!(render_file_diff("a.md", None, None), "");
    }

    #[test]
    fn added_file_diffs_against_dev_null() {
        let diff = render_file_diff("reports/status.md", None, Some(b"# Status\nok\n"));
        assert!(diff.starts_with("--- /dev/null\n+++ b/reports/status.md\n"));
        assert!(diff.contains("+# Status\n"));
        assert!(diff.contains("+ok\n"));
    }

    #[test]
    fn modified_file_shows_both_sides() {
        let diff = render_file_diff("a.md", Some(b"one\ntwo\n"), Some(b"one\nthree\n"));
        assert!(diff.starts_with("--- a/a.md\n+++ b/a.md\n"));
        assert!(diff.contains("-two\n"));
        assert!(diff.contains("+three\n"));
    }

    #[test]
    fn deleted_file_diffs_to_dev_null() {
        let diff = render_file_diff("raid/R-1.json", Some(b"{}\n"), None);
        assert!(diff.starts_with("--- a/raid/R-1.json\n+++ /dev/null\n"));
        assert!(diff.contains("-{}\n"));
    }
}
