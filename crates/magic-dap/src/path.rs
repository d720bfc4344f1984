//! Canonical keys for client source identifiers.
//!
//! Clients refer to the same script in several ways: `magic-api:/api/user/list.ms`,
//! `/api%2Fuser%2Flist.ms`, `api/user/list.ms`, or with the request mapping appended by the
//! editor's tree view (`list(/user/list).ms`). All of them normalize to the same key.

/// URI scheme used for script sources shown to the client.
pub const SCHEME: &str = "magic-api:";

const MS_EXTENSION: &str = ".ms";

const RESOURCE_TYPE_PREFIXES: [&str; 4] = ["api/", "function/", "datasource/", "task/"];

/// Normalize a client source path into a stable registry key.
///
/// The transformation is idempotent: `normalize(&normalize(p)) == normalize(p)`.
pub fn normalize(path: &str) -> String {
    // Terminates: a pass that changes the text either shortens it or consumes a `%` escape.
    let mut current = normalize_once(path);
    loop {
        let next = normalize_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn normalize_once(path: &str) -> String {
    let p = path.strip_prefix(SCHEME).unwrap_or(path);
    let decoded = percent_decode(p);
    let p = decoded.trim_start_matches('/');

    let p = match p.find('(') {
        Some(idx) => {
            let before = &p[..idx];
            if !before.ends_with(MS_EXTENSION) && p.contains(MS_EXTENSION) {
                format!("{before}{MS_EXTENSION}")
            } else {
                before.to_owned()
            }
        }
        None => p.to_owned(),
    };

    p.trim().to_owned()
}

/// Second-tier key: the normalized key without its leading resource-type segment.
pub fn strip_resource_type(key: &str) -> &str {
    let key = key.trim_start_matches('/');
    RESOURCE_TYPE_PREFIXES
        .iter()
        .find_map(|prefix| key.strip_prefix(prefix))
        .unwrap_or(key)
}

/// Path shown to the client for a normalized key.
pub fn client_path(key: &str) -> String {
    format!("{SCHEME}/{key}")
}

/// Decode `%XX` escapes. Malformed escapes pass through; a result that is not UTF-8 leaves
/// the input as is. `+` is not a space here.
fn percent_decode(input: &str) -> String {
    match urlencoding::decode(input) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => input.to_owned(),
    }
}
