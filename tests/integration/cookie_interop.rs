use angler::bakery::{Bakery, CookieError, CookieKind, Role};

const KEY: &[u8] = b"an-interop-test-key-of-40-characters-ok!";

fn bakery() -> Bakery {
    Bakery::new(KEY).unwrap()
}

#[test]
fn cookies_stay_inside_the_legacy_charset() {
    let cookie =
        bakery().chocolate_chip_cookie("alice", "alice@example.org", Role::Partner, Some(9));
    assert!(
        cookie
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_.~%".contains(c)),
        "cookie leaked outside the query-escaped alphabet: {cookie}"
    );
}

#[test]
fn identity_cookie_round_trips_every_role() {
    let bakery = bakery();
    for role in Role::ALL {
        let cookie = bakery.chocolate_chip_cookie("alice", "alice@example.org", role, Some(42));
        let parsed = bakery.parse(&cookie).unwrap();
        match parsed.kind {
            CookieKind::ChocolateChip {
                user,
                email,
                role: parsed_role,
                bakery_id,
            } => {
                assert_eq!(user, "alice");
                assert_eq!(email, "alice@example.org");
                assert_eq!(parsed_role, role);
                assert_eq!(bakery_id, Some(42));
            }
            other => panic!("expected an identity cookie, got {other:?}"),
        }
    }
}

#[test]
fn session_cookie_round_trips_without_error_field() {
    let bakery = bakery();
    let cookie = bakery.oatmeal_cookie("alice", "hunter2", "/dashboard", "drill.example.org");
    let parsed = bakery.parse(&cookie).unwrap();
    assert_eq!(parsed.kind, CookieKind::Oatmeal { error: None });
    assert!(!parsed.is_chocolate_chip());
}

#[test]
fn tampering_breaks_the_signature() {
    let bakery = bakery();
    let cookie =
        bakery.chocolate_chip_cookie("alice", "alice@example.org", Role::Administrator, None);
    let mut bytes = cookie.into_bytes();
    let mid = bytes.len() / 2;
    bytes[mid] = if bytes[mid] == b'A' { b'B' } else { b'A' };
    let tampered = String::from_utf8(bytes).unwrap();
    match bakery.parse(&tampered) {
        Err(CookieError::BadSignature) | Err(CookieError::Malformed(_)) => {}
        other => panic!("tampered cookie must not parse: {other:?}"),
    }
}

#[test]
fn a_different_key_cannot_read_the_cookie() {
    let cookie =
        bakery().chocolate_chip_cookie("alice", "alice@example.org", Role::Administrator, None);
    let other = Bakery::new(b"another-shared-secret-thats-long-enough!".to_vec()).unwrap();
    assert!(matches!(
        other.parse(&cookie),
        Err(CookieError::BadSignature)
    ));
}
