use super::table::DomainSet;

/// Canonical representation of the DNS root.
pub const ROOT: &str = ".";

/// Lowercases `name` and puts it in trailing-dot form.
pub fn normalize(name: &str) -> String {
    let name = name.trim();
    let mut out = name.to_ascii_lowercase();
    if !out.ends_with('.') {
        out.push('.');
    }
    out
}

/// Returns true if `name` or any of its ancestors, up to and including the
/// root, is a member of `set`.
///
/// `name` must already be normalized.
pub fn matches(name: &str, set: &DomainSet) -> bool {
    let mut part = name;
    loop {
        // Stripping the last label leaves an empty string, which stands for the root.
        let candidate = if part.is_empty() { ROOT } else { part };
        if set.contains(candidate) {
            return true;
        }

        match part.find('.') {
            Some(idx) => part = &part[idx + 1..],
            None => return false,
        }
    }
}
