//! Installer download filename generation
//!
//! Produced names must be valid on Windows: no reserved characters, no
//! control characters, bounded well under the 255-character path limit.

const MAX_FILENAME_LENGTH: usize = 170;
const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*', '\\', '/'];

/// Generate the installer filename from the selected display names.
/// Ex: `SetupForge_3_apps_Chrome-Discord-VSCode.exe`
///
/// Names are sanitized against the Windows reserved-character set, the
/// joined list is truncated with an ellipsis when too long, and a
/// count-only name is the final fallback.
pub fn installer_filename(display_names: &[String]) -> String {
    let cleaned: Vec<String> = display_names
        .iter()
        .map(|name| sanitize(name))
        .collect();

    let mut names = cleaned.join("-");
    if names.chars().count() > MAX_FILENAME_LENGTH {
        names = names
            .chars()
            .take(MAX_FILENAME_LENGTH - 3)
            .collect::<String>()
            .trim_end_matches('-')
            .to_string()
            + "...";
    }

    let file_name = format!("SetupForge_{}_apps_{}.exe", display_names.len(), names);

    // Final safety check: if still too long, use the minimal filename
    if file_name.chars().count() > MAX_FILENAME_LENGTH {
        return format!("SetupForge_{}_apps.exe", display_names.len());
    }

    file_name
}

fn sanitize(name: &str) -> String {
    name.chars()
        .filter(|c| !INVALID_CHARS.contains(c) && !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}
