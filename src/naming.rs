//! Naming rules for staged uploads, output folders and page files.
//!
//! The filesystem doubles as transport and naming scheme: the folder name
//! appears in download URLs and the page file names are what users see in
//! their archive. Every rule here is a pure function so it can be tested
//! directly against hostile input (empty names, reserved characters, path
//! traversal, non-ASCII).
//!
//! | Function              | Input                  | Output                      |
//! |-----------------------|------------------------|-----------------------------|
//! | [`base_name`]         | `"../Q3 Report.PDF"`   | `"Q3 Report"`               |
//! | [`sanitize`]          | `"Q3 Report"`          | `"Q3Report"`                |
//! | [`folder_name`]       | `"Q3 Report"`, `17…`   | `"Q3Report_17…"`            |
//! | [`page_file_name`]    | `"Q3 Report"`, `2`     | `"Q3 Report_page2.pdf"`     |
//!
//! Folder and page file names keep at most [`MAX_BASE_BYTES`] bytes of the
//! base name, cut at a character boundary, so every generated name
//! (including the `<folder>-<uuid>.zip` container) fits in a 255-byte
//! filesystem component.

use once_cell::sync::Lazy;
use regex::Regex;

/// Extension of every produced page file.
pub const PAGE_EXTENSION: &str = "pdf";

/// Fallback when an upload's base name is empty after cleanup.
const DEFAULT_BASE_NAME: &str = "document";

/// Fallback when sanitisation removes every character.
const DEFAULT_SAFE_NAME: &str = "file";

/// Longest base name, in bytes, that goes into a generated file name.
pub const MAX_BASE_BYTES: usize = 180;

static RE_SAFE_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").unwrap());
static RE_UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_.\-]").unwrap());

/// Display base name of an uploaded file: no directory, no extension.
///
/// Both `/` and `\` count as separators because the name comes from the
/// client, whatever its platform. Control characters are dropped.
pub fn base_name(original: &str) -> String {
    let file = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original);
    let stem = match file.rfind('.') {
        Some(0) | None => file,
        Some(dot) => &file[..dot],
    };
    let cleaned: String = stem.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        DEFAULT_BASE_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Reduce a name to `[A-Za-z0-9_.-]`, for use in folder names.
///
/// Names already in the allowed set are returned unchanged (apart from
/// leading dots). Otherwise offending characters are removed, not replaced,
/// so `"年度 report"` becomes `"report"`. An empty result falls back to
/// `"file"`.
pub fn sanitize(name: &str) -> String {
    let kept = if RE_SAFE_NAME.is_match(name) {
        std::borrow::Cow::Borrowed(name)
    } else {
        RE_UNSAFE_CHARS.replace_all(name, "")
    };
    let kept = kept.trim_start_matches('.');

    if kept.is_empty() {
        DEFAULT_SAFE_NAME.to_string()
    } else {
        kept.to_string()
    }
}

/// Longest prefix of `name` within `max` bytes that ends on a char boundary.
pub fn truncate_bytes(name: &str, max: usize) -> &str {
    if name.len() <= max {
        return name;
    }
    let mut end = max;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// `<sanitized base>_<millis>`: unique per job, safe in a URL path.
pub fn folder_name(base: &str, millis: u64) -> String {
    let safe = sanitize(base);
    format!("{}_{}", truncate_bytes(&safe, MAX_BASE_BYTES), millis)
}

/// `<base>_page<ordinal>.pdf` with a 1-based ordinal.
pub fn page_file_name(base: &str, ordinal: usize) -> String {
    format!(
        "{}_page{}.{}",
        truncate_bytes(base, MAX_BASE_BYTES),
        ordinal,
        PAGE_EXTENSION
    )
}

/// Name a folder's bulk download is offered under.
pub fn archive_file_name(folder: &str) -> String {
    format!("{}.zip", folder)
}

/// On-disk name of one bulk-download container; unique per call.
pub fn archive_container_name(folder: &str) -> String {
    format!("{}-{}.zip", folder, uuid::Uuid::new_v4())
}

/// URL path under which a produced page can be downloaded.
pub fn retrieval_path(folder: &str, file: &str) -> String {
    format!(
        "/download/{}/{}",
        urlencoding::encode(folder),
        urlencoding::encode(file)
    )
}

/// `true` if `name` is a single, non-special path component.
///
/// Used to vet folder and file names coming from download URLs before they
/// are joined onto the output directory.
pub fn is_safe_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

/// Case-insensitive `.pdf` suffix check on the client-supplied name.
pub fn has_pdf_extension(filename: &str) -> bool {
    let lower = filename.to_ascii_lowercase();
    lower.len() > 4 && lower.ends_with(".pdf")
}
