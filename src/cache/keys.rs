// src/cache/keys.rs
// Cache key construction for grouped invalidation

/// Normalize a key part so logically equal queries share an entry
pub fn normalize(part: &str) -> String {
    part.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build `"namespace:part1:part2"`; the namespace is kept verbatim
pub fn build_key<I, S>(namespace: &str, parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut key = prefix(namespace);
    let normalized: Vec<String> = parts.into_iter().map(|p| normalize(p.as_ref())).collect();
    key.push_str(&normalized.join(":"));
    key
}

/// Prefix shared by every key in `namespace`, for `delete_by_prefix`
pub fn prefix(namespace: &str) -> String {
    format!("{}:", namespace)
}
