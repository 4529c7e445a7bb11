//! Property-based test generators using proptest.
//!
//! Provides lock keys that the serializer must accept, keys built to
//! break out of a quoted literal, and keys it must reject.

use proptest::prelude::*;
use skewguard_core::{MAX_KEY_LEN, OUTER_SUFFIX};

/// Strategy for generating valid lock keys, quotes and non-ASCII included.
pub fn lock_key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9 _'\\-;()=*éü漢]{1,64}")
        .expect("Invalid regex")
        .prop_filter("Key must not use the reserved suffix", |s| {
            !s.ends_with(OUTER_SUFFIX)
        })
}

/// Strategy for generating keys of exactly the maximum length.
pub fn max_length_key_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::char::range('a', 'z'), MAX_KEY_LEN)
        .prop_map(|chars| chars.into_iter().collect())
}

/// Strategy for generating keys that try to escape their string literal.
pub fn hostile_key_strategy() -> impl Strategy<Value = String> {
    let fragment = prop_oneof![
        Just("'".to_string()),
        Just("''".to_string()),
        Just("') AS lock_available".to_string()),
        Just("; DELETE FROM priming WHERE key = '".to_string()),
        Just("', 0) AS lock_status --".to_string()),
        prop::string::string_regex("[a-z]{1,8}").expect("Invalid regex"),
    ];
    prop::collection::vec(fragment, 1..6).prop_map(|parts| parts.concat())
}

/// Strategy for generating keys the serializer must reject.
pub fn invalid_key_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        (MAX_KEY_LEN + 1..MAX_KEY_LEN + 64).prop_map(|len| "k".repeat(len)),
        prop::string::string_regex("[a-z0-9\\-]{0,32}")
            .expect("Invalid regex")
            .prop_map(|s| format!("{s}{OUTER_SUFFIX}")),
    ]
}
