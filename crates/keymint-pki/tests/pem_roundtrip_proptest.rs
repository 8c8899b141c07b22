use keymint_pki::pem::{
    decode, encode, extract, CERTIFICATE_LABEL, PRIVATE_KEY_LABEL, PUBLIC_KEY_LABEL,
};
use proptest::prelude::*;

fn label_strategy() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just(PRIVATE_KEY_LABEL),
        Just(PUBLIC_KEY_LABEL),
        Just(CERTIFICATE_LABEL),
    ]
}

proptest! {
    #[test]
    fn decode_is_the_exact_inverse_of_encode(
        label in label_strategy(),
        der in proptest::collection::vec(any::<u8>(), 0..4096),
    ) {
        let pem = encode(label, &der);
        prop_assert_eq!(decode(label, &pem).expect("decode"), der);
    }

    #[test]
    fn encoded_body_lines_never_exceed_64_columns(
        label in label_strategy(),
        der in proptest::collection::vec(any::<u8>(), 0..4096),
    ) {
        let pem = encode(label, &der);
        for line in pem.lines() {
            prop_assert!(line.len() <= 64 || line.starts_with("-----"));
        }
    }

    #[test]
    fn extract_recovers_a_block_embedded_in_noise(
        der in proptest::collection::vec(any::<u8>(), 1..512),
        prefix in "[ -~]{0,64}",
        suffix in "[ -~]{0,64}",
    ) {
        // Surrounding printable noise must not confuse the marker scan.
        prop_assume!(!prefix.contains("-----") && !suffix.contains("-----"));
        let pem = encode(CERTIFICATE_LABEL, &der);
        let wrapped = format!("{prefix}\n{pem}{suffix}\n");
        let block = extract(CERTIFICATE_LABEL, &wrapped).expect("extract");
        prop_assert_eq!(decode(CERTIFICATE_LABEL, &block).expect("decode"), der);
    }
}
