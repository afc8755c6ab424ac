use crate::tools::Origin;
use std::path::{Path, PathBuf};

const DISALLOWED: &[char] = &[
    '\\', '/', '\0', '"', ':', '<', '>', '|', '*', '?', '\u{ff1a}', '\u{ff0f}', '\u{ff3c}',
    '\u{ff02}', '\u{ff1c}', '\u{ff1e}', '\u{ff5c}', '\u{ff0a}', '\u{ff1f}',
];

/// Makes `value` safe to use as a file name on every common filesystem.
pub(crate) fn sanitize(value: &str) -> String {
    value
        .chars()
        .filter(|c| !DISALLOWED.contains(c) && !c.is_control())
        .collect::<String>()
        .trim_end_matches(['.', ' '])
        .trim()
        .to_owned()
}

/// First `bin` found in `search_path`. A `bin` with a directory part is used as is.
pub(crate) fn find_executable(bin: &str, search_path: &[PathBuf]) -> Option<PathBuf> {
    let path = Path::new(bin);

    if path.components().count() > 1 {
        return path.is_file().then(|| path.to_path_buf());
    }

    search_path
        .iter()
        .map(|x| x.join(bin))
        .find(|x| x.is_file())
}

pub(crate) fn origin_label(origin: Origin) -> &'static str {
    match origin {
        Origin::System => "installed on this system",
        Origin::Bundle => "bundled",
    }
}
