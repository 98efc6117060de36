//! Property-based tests for the key hierarchy
//!
//! Derivation must be deterministic, must separate intervals and keys, and
//! must reject malformed input for every length, not only the handful covered
//! by unit tests.

use exposure_crypto::{
    EnIntervalNumber, KeyKind, Metadata, TEK_ROLLING_PERIOD, TemporaryExposureKey,
    ValidationError, derive_aem, derive_aemk, derive_rpi, derive_rpik,
};
use proptest::prelude::*;

/// Strategy for interval numbers whose whole rolling period fits in u32
fn arbitrary_period() -> impl Strategy<Value = EnIntervalNumber> {
    (0..(u32::MAX / TEK_ROLLING_PERIOD)).prop_map(|n| EnIntervalNumber::new(n * TEK_ROLLING_PERIOD))
}

/// Strategy for byte slices of any length except 16
fn wrong_length_bytes() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64).prop_filter("not 16 bytes", |v| v.len() != 16)
}

proptest! {
    #[test]
    fn prop_derivation_is_deterministic(
        tek in any::<[u8; 16]>(),
        enin in any::<u32>(),
        tx in any::<i8>(),
    ) {
        let rpik_a = derive_rpik(&tek).expect("valid TEK");
        let rpik_b = derive_rpik(&tek).expect("valid TEK");
        prop_assert_eq!(rpik_a.as_bytes(), rpik_b.as_bytes());

        let rpi_a = derive_rpi(rpik_a.as_bytes(), u64::from(enin)).expect("valid RPIK");
        let rpi_b = derive_rpi(rpik_b.as_bytes(), u64::from(enin)).expect("valid RPIK");
        prop_assert_eq!(rpi_a, rpi_b);

        let aemk = derive_aemk(&tek).expect("valid TEK");
        let metadata = Metadata::v1(tx);
        let aem_a = derive_aem(aemk.as_bytes(), &rpi_a, metadata.as_bytes()).expect("valid AEMK");
        let aem_b = derive_aem(aemk.as_bytes(), &rpi_b, metadata.as_bytes()).expect("valid AEMK");
        prop_assert_eq!(aem_a, aem_b);
    }

    #[test]
    fn prop_distinct_intervals_distinct_rpis(
        tek in any::<[u8; 16]>(),
        a in any::<u32>(),
        b in any::<u32>(),
    ) {
        prop_assume!(a != b);

        let rpik = derive_rpik(&tek).expect("valid TEK");
        let rpi_a = rpik.rpi(EnIntervalNumber::new(a));
        let rpi_b = rpik.rpi(EnIntervalNumber::new(b));

        // PROPERTY: AES is a permutation, so distinct blocks never collide
        prop_assert_ne!(rpi_a, rpi_b);
    }

    #[test]
    fn prop_subkeys_are_separated(tek in any::<[u8; 16]>()) {
        let rpik = derive_rpik(&tek).expect("valid TEK");
        let aemk = derive_aemk(&tek).expect("valid TEK");

        prop_assert_ne!(rpik.as_bytes(), aemk.as_bytes());
        prop_assert_ne!(rpik.as_bytes(), &tek);
    }

    #[test]
    fn prop_wrong_length_tek_rejected(tek in wrong_length_bytes()) {
        let err = derive_rpik(&tek).expect_err("wrong length must be rejected");
        prop_assert_eq!(
            err,
            ValidationError::KeyLength { kind: KeyKind::Tek, expected: 16, actual: tek.len() }
        );
        prop_assert!(derive_aemk(&tek).is_err());
    }

    #[test]
    fn prop_wrong_length_metadata_rejected(
        aemk in any::<[u8; 16]>(),
        metadata in prop::collection::vec(any::<u8>(), 0..32),
    ) {
        prop_assume!(metadata.len() != 4);

        let rpi = derive_rpik(&aemk).expect("valid TEK").rpi(EnIntervalNumber::new(0));
        let result = derive_aem(&aemk, &rpi, &metadata);

        prop_assert_eq!(
            result,
            Err(ValidationError::MetadataLength { expected: 4, actual: metadata.len() })
        );
    }

    #[test]
    fn prop_wide_intervals_rejected(enin in (u64::from(u32::MAX) + 1)..=u64::MAX) {
        prop_assert_eq!(
            derive_rpi(&[0u8; 16], enin),
            Err(ValidationError::IntervalOutOfRange(enin))
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_sequence_covers_whole_period(
        tek in any::<[u8; 16]>(),
        period in arbitrary_period(),
    ) {
        let rpik = TemporaryExposureKey::from_bytes(tek).rpik();
        let sequence = rpik.rpi_sequence(period).expect("period fits");

        prop_assert_eq!(sequence.len(), TEK_ROLLING_PERIOD as usize);
        prop_assert_eq!(sequence[0], rpik.rpi(period));

        let last = EnIntervalNumber::new(period.value() + TEK_ROLLING_PERIOD - 1);
        prop_assert_eq!(sequence[TEK_ROLLING_PERIOD as usize - 1], rpik.rpi(last));
    }
}
