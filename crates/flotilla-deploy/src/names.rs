//! Remote resource name derivation.
//!
//! The provider only accepts lowercase alphanumerics and dashes.
//! Redeployed resources get a fresh random suffix because the provider
//! may still hold the old name.

use rand::Rng;

/// Derive the remote resource name from the user-chosen name.
pub fn derive_remote_name(requested: &str, suffix: &str) -> String {
    sanitize(&format!("{requested}{suffix}"))
}

/// A fresh remote name for a redeploy attempt.
pub fn redeploy_name(requested: &str, suffix: &str) -> String {
    let tag: u16 = rand::rng().random();
    format!("{}-{tag:04x}", derive_remote_name(requested, suffix))
}

fn sanitize(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_replaces_invalid_characters() {
        assert_eq!(derive_remote_name("My Bot_7", "-fl"), "my-bot-7-fl");
        assert_eq!(derive_remote_name("plain", "-fl"), "plain-fl");
    }

    #[test]
    fn redeploy_names_keep_the_base_with_a_hex_tag() {
        let name = redeploy_name("plain", "-fl");
        let tag = name.strip_prefix("plain-fl-").unwrap();
        assert_eq!(tag.len(), 4);
        assert!(tag.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
