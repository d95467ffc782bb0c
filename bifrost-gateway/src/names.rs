//! GraphQL-legal naming for Kubernetes identifiers.
//!
//! Groups like `core.acme.io` become `core_acme_io`; the core group
//! becomes `core`. Kind collisions across groups are broken by appending the
//! sanitized group and version.

/// Replaces every character outside `[A-Za-z0-9_]` with `_` and prefixes a
/// leading character that cannot start a GraphQL name.
pub fn sanitize_identifier(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 1);
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    match out.chars().next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => out,
        Some(_) => format!("_{out}"),
        None => out,
    }
}

/// GraphQL field name of an API group; the core group is exposed as `core`.
pub fn sanitize_group(group: &str) -> String {
    if group.is_empty() {
        return "core".to_string();
    }
    sanitize_identifier(group)
}

/// Suffix appended to a kind's type name when the same kind exists in more
/// than one group/version.
pub fn collision_suffix(group: &str, version: &str) -> String {
    format!("{}_{}", sanitize_group(group), sanitize_identifier(version))
}

/// Plural resource segment for a kind, following the API machinery's naive
/// pluralization: `s`/`x`/`z`/`ch`/`sh` take `es`, consonant-`y` becomes
/// `ies`, everything else appends `s`.
pub fn pluralize(singular: &str) -> String {
    if singular.is_empty() {
        return String::new();
    }
    if let Some(stem) = singular.strip_suffix('y') {
        let penultimate = stem.chars().last();
        match penultimate {
            Some('a') | Some('e') | Some('i') | Some('o') | Some('u') | None => {
                return format!("{singular}s");
            }
            _ => return format!("{stem}ies"),
        }
    }
    if singular.ends_with('s')
        || singular.ends_with('x')
        || singular.ends_with('z')
        || singular.ends_with("ch")
        || singular.ends_with("sh")
    {
        return format!("{singular}es");
    }
    format!("{singular}s")
}
