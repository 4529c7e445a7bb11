//! Benchmark utilities.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Generate a random lock key of `len` characters.
pub fn random_key(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generate `count` random keys of `len` characters.
pub fn random_keys(count: usize, len: usize) -> Vec<String> {
    (0..count).map(|_| random_key(len)).collect()
}

/// Generate a key of `len` characters where every third one is a quote.
pub fn quoted_key(len: usize) -> String {
    (0..len)
        .map(|i| if i % 3 == 0 { '\'' } else { 'q' })
        .collect()
}
