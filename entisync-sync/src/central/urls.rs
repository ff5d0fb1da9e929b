//! URL helpers for the Central API.

use std::borrow::Cow;

/// Percent-encodes one path segment.
///
/// Central decodes paths the way `decodeURIComponent` does, so `*`, `'`, `(`
/// and `)` are left as they are.
pub fn quote(segment: &str) -> Cow<'_, str> {
    let encoded = urlencoding::encode(segment);
    if !encoded.contains("%2A") && !encoded.contains("%27") && !encoded.contains("%28") && !encoded.contains("%29") {
        return encoded;
    }
    Cow::Owned(
        encoded
            .replace("%2A", "*")
            .replace("%27", "'")
            .replace("%28", "(")
            .replace("%29", ")"),
    )
}

/// Normalizes a server root so it ends in `/<api_version>/`.
pub fn base_url_validate(base_url: &str, api_version: &str) -> String {
    let suffix = format!("{api_version}/");
    if base_url.ends_with(&suffix) {
        base_url.to_string()
    } else if base_url.ends_with(api_version) {
        format!("{base_url}/")
    } else {
        format!("{}/{suffix}", base_url.trim_end_matches('/'))
    }
}

/// Path of an entity list, relative to the API root.
pub fn dataset_path(project_id: u32, name: &str) -> String {
    format!("projects/{project_id}/datasets/{}", quote(name))
}
