use chrono::{DateTime, Utc};

pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}

/// Lowercases a display name or raw slug into `[a-z0-9-]`, collapsing runs of
/// anything else into a single dash.
pub fn normalize_slug(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len());
    let mut pending_dash = false;

    for c in raw.trim().chars() {
        match c {
            'a'..='z' | '0'..='9' => {
                if pending_dash && !slug.is_empty() {
                    slug.push('-');
                }
                pending_dash = false;
                slug.push(c);
            }
            'A'..='Z' => {
                if pending_dash && !slug.is_empty() {
                    slug.push('-');
                }
                pending_dash = false;
                slug.push(c.to_ascii_lowercase());
            }
            _ => pending_dash = true,
        }
    }

    slug
}
