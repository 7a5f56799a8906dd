//! Platform-neutral pieces of the file and message dialogs.

use std::path::Path;

use crate::options::DialogFilter;

/// Filter used when the caller supplies nothing usable.
pub const ALL_FILES_FILTER: &str = "All files (*.*)\0*.*\0\0";

/// Normalize a filter's extensions: trimmed, leading dots stripped, blanks
/// dropped, duplicates removed case-insensitively (first spelling wins).
pub fn normalize_extensions(extensions: &[String]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for ext in extensions {
        let ext = ext.trim().trim_start_matches('.');
        if ext.trim().is_empty() {
            continue;
        }
        if seen.iter().any(|known| known.eq_ignore_ascii_case(ext)) {
            continue;
        }
        seen.push(ext.to_string());
    }
    seen
}

/// `*.png;*.jpg` pattern for one filter, or `None` when it has no
/// extensions left after normalization.
pub fn filter_pattern(filter: &DialogFilter) -> Option<String> {
    let extensions = normalize_extensions(&filter.extensions);
    if extensions.is_empty() {
        return None;
    }
    Some(
        extensions
            .iter()
            .map(|ext| format!("*.{ext}"))
            .collect::<Vec<_>>()
            .join(";"),
    )
}

/// Double-NUL terminated `label\0pattern\0...` list as the common file
/// dialogs expect it.
pub fn build_native_filter(filters: &[DialogFilter]) -> String {
    let mut parts = Vec::new();
    for filter in filters {
        let Some(pattern) = filter_pattern(filter) else {
            continue;
        };
        let label = if filter.name.trim().is_empty() {
            pattern.clone()
        } else {
            filter.name.clone()
        };
        parts.push(label);
        parts.push(pattern);
    }
    if parts.is_empty() {
        return ALL_FILES_FILTER.to_string();
    }
    let mut out = parts.join("\0");
    out.push_str("\0\0");
    out
}

/// Split the buffer filled by a (possibly multi-select) open dialog.
///
/// A single selection is one NUL-terminated path. A multi-selection is the
/// directory followed by each file name, ending with an empty entry.
pub fn parse_open_file_buffer(raw: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for token in raw.split('\0') {
        if token.is_empty() {
            break;
        }
        tokens.push(token);
    }
    match tokens.as_slice() {
        [] => Vec::new(),
        [single] => vec![single.to_string()],
        [directory, files @ ..] => files
            .iter()
            .map(|file| Path::new(directory).join(file).to_string_lossy().into_owned())
            .collect(),
    }
}

/// Native button layout for a given number of labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonLayout {
    Ok,
    OkCancel,
    YesNoCancel,
}

impl ButtonLayout {
    pub fn for_count(count: usize) -> Self {
        match count {
            0 | 1 => ButtonLayout::Ok,
            2 => ButtonLayout::OkCancel,
            _ => ButtonLayout::YesNoCancel,
        }
    }
}

/// Button the user pressed in a native message box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressedButton {
    Ok,
    Yes,
    No,
    Cancel,
    Other,
}

/// Map a pressed native button back to the caller's label index.
pub fn response_index(pressed: PressedButton, button_count: usize) -> u32 {
    match pressed {
        PressedButton::Ok | PressedButton::Yes | PressedButton::Other => 0,
        PressedButton::No => 1,
        PressedButton::Cancel => button_count.saturating_sub(1).min(1) as u32,
    }
}

/// Caption used when a message box is given no title.
pub const DEFAULT_MESSAGE_TITLE: &str = "Message";

/// Message box caption, falling back to [`DEFAULT_MESSAGE_TITLE`].
pub fn message_title(title: Option<&str>) -> &str {
    title.unwrap_or(DEFAULT_MESSAGE_TITLE)
}

/// Message text with the optional detail appended as its own paragraph.
pub fn message_text(message: &str, detail: Option<&str>) -> String {
    match detail {
        Some(detail) if !detail.trim().is_empty() => format!("{message}\n\n{detail}"),
        _ => message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(name: &str, extensions: &[&str]) -> DialogFilter {
        DialogFilter {
            name: name.to_string(),
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
        }
    }

    #[test]
    fn image_filter_is_deduplicated_case_insensitively() {
        let images = filter("Images", &["png", ".PNG", "jpg"]);
        assert_eq!(filter_pattern(&images).as_deref(), Some("*.png;*.jpg"));
        assert_eq!(build_native_filter(&[images]), "Images\0*.png;*.jpg\0\0");
    }

    #[test]
    fn empty_or_blank_filters_fall_back_to_all_files() {
        assert_eq!(build_native_filter(&[]), ALL_FILES_FILTER);
        assert_eq!(
            build_native_filter(&[filter("Nothing", &[" ", "."])]),
            ALL_FILES_FILTER
        );
    }

    #[test]
    fn unnamed_filter_uses_its_pattern_as_label() {
        assert_eq!(
            build_native_filter(&[filter("  ", &[" txt "])]),
            "*.txt\0*.txt\0\0"
        );
    }

    #[test]
    fn single_selection_buffer() {
        assert_eq!(
            parse_open_file_buffer("C:\\docs\\a.txt\0\0garbage"),
            vec!["C:\\docs\\a.txt".to_string()]
        );
        assert!(parse_open_file_buffer("").is_empty());
    }

    #[test]
    fn multi_selection_buffer_joins_directory() {
        let files = parse_open_file_buffer("/home/me\0a.txt\0b.txt\0\0");
        assert_eq!(
            files,
            vec![
                Path::new("/home/me").join("a.txt").to_string_lossy().into_owned(),
                Path::new("/home/me").join("b.txt").to_string_lossy().into_owned(),
            ]
        );
    }

    #[test]
    fn message_box_responses_map_to_label_indices() {
        assert_eq!(ButtonLayout::for_count(0), ButtonLayout::Ok);
        assert_eq!(ButtonLayout::for_count(2), ButtonLayout::OkCancel);
        assert_eq!(ButtonLayout::for_count(5), ButtonLayout::YesNoCancel);
        assert_eq!(response_index(PressedButton::Ok, 1), 0);
        assert_eq!(response_index(PressedButton::Cancel, 1), 0);
        assert_eq!(response_index(PressedButton::Cancel, 2), 1);
        assert_eq!(response_index(PressedButton::No, 3), 1);
        assert_eq!(response_index(PressedButton::Cancel, 3), 1);
    }

    #[test]
    fn untitled_message_box_gets_default_caption() {
        assert_eq!(message_title(None), "Message");
        assert_eq!(message_title(Some("Saved")), "Saved");
    }

    #[test]
    fn detail_is_appended_when_present() {
        assert_eq!(message_text("Saved", Some("3 files")), "Saved\n\n3 files");
        assert_eq!(message_text("Saved", Some("  ")), "Saved");
    }
}
