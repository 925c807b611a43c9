//! Key string generation.

use rand::Rng;

/// Characters used in generated keys; omits look-alikes (I, O, 0, 1).
pub const KEY_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

const SEGMENTS: usize = 4;
const SEGMENT_LEN: usize = 4;

/// A random key: `prefix` followed by four dash-separated 4-char segments.
pub fn random_key<R: Rng + ?Sized>(prefix: &str, rng: &mut R) -> String {
    let segments: Vec<String> = (0..SEGMENTS)
        .map(|_| {
            (0..SEGMENT_LEN)
                .map(|_| KEY_ALPHABET[rng.gen_range(0..KEY_ALPHABET.len())] as char)
                .collect()
        })
        .collect();
    format!("{}{}", prefix, segments.join("-"))
}

/// Key strings for a batch of `count`.
///
/// A custom name is used verbatim for a single key and suffixed `-01`,
/// `-02`, ... for a batch. Without a name, keys are random.
pub fn batch_keys<R: Rng + ?Sized>(
    prefix: &str,
    custom_name: Option<&str>,
    count: u32,
    rng: &mut R,
) -> Vec<String> {
    match custom_name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) if count == 1 => vec![name.to_string()],
        Some(name) => (1..=count).map(|i| format!("{}-{:02}", name, i)).collect(),
        None => (0..count).map(|_| random_key(prefix, rng)).collect(),
    }
}

/// Self-service key name: uppercased, prefixed unless already prefixed.
///
/// Returns `None` when the trimmed name length falls outside `min..=max`.
pub fn public_key_name(prefix: &str, name: &str, min: usize, max: usize) -> Option<String> {
    let name = name.trim().to_uppercase();
    let len = name.chars().count();
    if len < min || len > max {
        return None;
    }
    if name.starts_with(&prefix.to_uppercase()) {
        Some(name)
    } else {
        Some(format!("{}{}", prefix, name))
    }
}
