//! Property-based tests using proptest
//!
//! These tests check forging, classification and cache invariants across randomly
//! generated inputs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bedrock_relay::auth::cache::{prune_expired, CacheDocument};
use bedrock_relay::auth::{IdentityToken, TokenGrant};
use bedrock_relay::core::jwt;
use bedrock_relay::core::KeyMaterial;
use bedrock_relay::protocol::chain::forge_self_signed;
use bedrock_relay::utils::compression::{CompressionAlgorithm, CompressionSettings};
use proptest::prelude::*;
use serde_json::{Map, Value};

fn extra_data() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-zA-Z]{1,12}", "[ -~]{0,24}", 0..6).prop_map(|fields| {
        Value::Object(
            fields
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect::<Map<String, Value>>(),
        )
    })
}

// Property: the self-signed token always certifies the session's own key
proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_self_signed_certifies_session_key(extra in extra_data(), now in 0i64..4_000_000_000) {
        let keys = KeyMaterial::generate().expect("key generation");
        let token = forge_self_signed(&keys, &extra, now).expect("forging should not fail");

        let decoded = jwt::verify(&token).expect("token verifies under its own x5u");
        prop_assert_eq!(decoded.claim_str("identityPublicKey"), Some(keys.public_key_base64()));
        prop_assert!(!keys.public_key_base64().ends_with('='));
        prop_assert_eq!(&decoded.payload["extraData"], &extra);
    }
}

// Property: legacy prefixes and long tokens are refresh tokens
proptest! {
    #[test]
    fn prop_refresh_token_prefixes(prefix in prop::sample::select(vec!["M.", "0.A"]), rest in "[A-Za-z0-9_.-]{0,64}") {
        let token = format!("{prefix}{rest}");
        prop_assert_eq!(TokenGrant::classify(&token), TokenGrant::RefreshToken);
    }

    #[test]
    fn prop_long_tokens_are_refresh_tokens(token in "[A-Za-z0-9]{501,700}") {
        prop_assert_eq!(TokenGrant::classify(&token), TokenGrant::RefreshToken);
    }

    #[test]
    fn prop_short_codes_are_authorization_codes(token in "[A-Za-z1-9][A-Za-z0-9-]{0,120}") {
        prop_assume!(!token.starts_with("M.") && !token.starts_with("0.A"));
        prop_assert_eq!(TokenGrant::classify(&token), TokenGrant::AuthorizationCode);
    }
}

// Property: pruning removes exactly the expired records
proptest! {
    #[test]
    fn prop_prune_removes_expired(
        expiries in prop::collection::vec(prop::collection::vec(0i64..200, 1..4), 1..8),
        now in 0i64..200,
    ) {
        let mut document = CacheDocument::new();
        for (account, devices) in expiries.iter().enumerate() {
            let entry = document.entry(format!("account-{account}")).or_default();
            for (device, expires) in devices.iter().enumerate() {
                entry.insert(format!("device-{device}"), IdentityToken::new("t", *expires));
            }
        }

        let total: usize = expiries.iter().map(Vec::len).sum();
        let expired = expiries.iter().flatten().filter(|e| now >= **e).count();

        let removed = prune_expired(&mut document, now);
        let remaining: usize = document.values().map(|d| d.len()).sum();

        prop_assert_eq!(removed, expired);
        prop_assert_eq!(remaining, total - expired);
        prop_assert!(document.values().flat_map(|d| d.values()).all(|t| !t.is_expired_at(now)));
        prop_assert!(document.values().all(|d| !d.is_empty()));
    }
}

// Property: a zero threshold always disables compression
proptest! {
    #[test]
    fn prop_negotiated_compression(threshold in any::<u16>(), algo in prop::sample::select(vec![
        CompressionAlgorithm::Zlib,
        CompressionAlgorithm::Snappy,
    ])) {
        let settings = CompressionSettings::negotiated(threshold, algo);
        if threshold == 0 {
            prop_assert_eq!(settings, CompressionSettings::DISABLED);
        } else {
            prop_assert_eq!(settings.algorithm, algo);
            prop_assert!(settings.should_compress(threshold as usize));
        }
    }
}
