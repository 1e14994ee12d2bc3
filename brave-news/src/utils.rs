use sha2::{Digest, Sha256};

/// Order-sensitive hash: each step hashes the previous digest followed by
/// the next item. An empty input hashes to the empty string.
pub fn rolling_hash<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items.into_iter().fold(String::new(), |hash, item| {
        let mut hasher = Sha256::new();
        hasher.update(hash.as_bytes());
        hasher.update(item.as_ref().as_bytes());
        hex::encode(hasher.finalize())
    })
}

/// Host without a leading `www.`, so `www.espn.com` and `espn.com` match.
pub fn normalize_host(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}
