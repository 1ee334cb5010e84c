// ABOUTME: Integration tests for type-safe identifiers and validated types.
// ABOUTME: Tests parsing, validation, and serialization invariants, partly with proptest.

use pdo::types::*;
use proptest::prelude::*;

mod image_digest_tests {
    use super::*;

    const HEX: &str = "4f53cda18c2baa0c0354bb5f9a3ecbe5ed12ab4d8e11ba873c2f11161202b945";

    #[test]
    fn parse_bare_digest() {
        let d = ImageDigest::parse(&format!("sha256:{HEX}")).unwrap();
        assert_eq!(d.algorithm(), "sha256");
        assert!(d.repository().is_none());
        assert_eq!(d.short(), &HEX[..12]);
    }

    #[test]
    fn parse_pinned_reference_drops_tag() {
        let d = ImageDigest::parse(&format!("ghcr.io/acme/checkout:v2@sha256:{HEX}")).unwrap();
        assert_eq!(d.repository(), Some("ghcr.io/acme/checkout"));
        assert_eq!(d.to_string(), format!("ghcr.io/acme/checkout@sha256:{HEX}"));
    }

    #[test]
    fn registry_port_is_not_a_tag() {
        let d = ImageDigest::parse(&format!("registry:5000/checkout@sha256:{HEX}")).unwrap();
        assert_eq!(d.repository(), Some("registry:5000/checkout"));
    }

    #[test]
    fn same_content_ignores_repository() {
        let bare = ImageDigest::parse(&format!("sha256:{HEX}")).unwrap();
        let pinned = ImageDigest::parse(&format!("acme/checkout@sha256:{HEX}")).unwrap();
        assert_ne!(bare, pinned);
        assert!(bare.same_content(&pinned));
    }

    #[test]
    fn rejects_tags_and_short_hashes() {
        assert!(ImageDigest::parse("nginx:latest").is_err());
        assert!(ImageDigest::parse("sha256:abc123").is_err());
        assert!(ImageDigest::parse(&format!("md5:{HEX}")).is_err());
        assert!(ImageDigest::parse(&format!("sha256:{}", HEX.to_uppercase())).is_err());
        assert!(ImageDigest::parse("").is_err());
    }

    #[test]
    fn deserialization_validates() {
        let ok: Result<ImageDigest, _> = serde_json::from_str(&format!("\"sha256:{HEX}\""));
        assert!(ok.is_ok());
        let bad: Result<ImageDigest, _> = serde_json::from_str("\"latest\"");
        assert!(bad.is_err());
    }
}

mod traffic_split_tests {
    use super::*;

    #[test]
    fn resting_state_is_all_stable() {
        assert_eq!(TrafficSplit::default(), TrafficSplit::ALL_STABLE);
        assert_eq!(TrafficSplit::candidate_percent(0), TrafficSplit::ALL_STABLE);
        assert_eq!(TrafficSplit::candidate_percent(100), TrafficSplit::ALL_CANDIDATE);
    }

    #[test]
    fn wire_form_is_named_weights() {
        let json = serde_json::to_string(&TrafficSplit::candidate_percent(10)).unwrap();
        assert_eq!(json, r#"{"stable":90,"candidate":10}"#);
    }

    proptest! {
        #[test]
        fn candidate_percent_always_sums_to_100(percent in any::<u8>()) {
            let split = TrafficSplit::candidate_percent(percent);
            prop_assert_eq!(u16::from(split.stable()) + u16::from(split.candidate()), 100);
            prop_assert!(split.candidate() <= 100);
        }

        #[test]
        fn new_accepts_exactly_the_pairs_summing_to_100(stable in 0u16..300, candidate in 0u16..300) {
            let result = TrafficSplit::new(stable, candidate);
            prop_assert_eq!(result.is_ok(), stable + candidate == 100);
        }

        #[test]
        fn deserialization_rejects_bad_sums(stable in 0u16..300, candidate in 0u16..300) {
            let json = format!(r#"{{"stable":{stable},"candidate":{candidate}}}"#);
            let parsed: Result<TrafficSplit, _> = serde_json::from_str(&json);
            prop_assert_eq!(parsed.is_ok(), stable + candidate == 100);
        }
    }
}

mod service_name_tests {
    use super::*;

    #[test]
    fn accepts_dns_labels() {
        assert!(ServiceName::new("checkout").is_ok());
        assert!(ServiceName::new("checkout-api-2").is_ok());
    }

    #[test]
    fn rejects_invalid_names() {
        assert!(ServiceName::new("").is_err());
        assert!(ServiceName::new("Checkout").is_err());
        assert!(ServiceName::new("-checkout").is_err());
        assert!(ServiceName::new("checkout-").is_err());
        assert!(ServiceName::new("check_out").is_err());
        assert!(ServiceName::new(&"a".repeat(64)).is_err());
    }

    proptest! {
        #[test]
        fn valid_names_round_trip(name in "[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?") {
            let parsed = ServiceName::new(&name).unwrap();
            prop_assert_eq!(parsed.as_str(), name.as_str());
        }
    }
}

mod color_tests {
    use super::*;

    #[test]
    fn opposite_is_an_involution() {
        for color in [Color::Blue, Color::Green] {
            assert_ne!(color.opposite(), color);
            assert_eq!(color.opposite().opposite(), color);
        }
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("GREEN".parse::<Color>().unwrap(), Color::Green);
        assert!("red".parse::<Color>().is_err());
    }
}

mod id_tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = DeploymentId::generate();
        let b = DeploymentId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = DeploymentId::new("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
    }
}
