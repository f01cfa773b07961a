use rand_core::OsRng;

#[test]
fn destination_hash_has_expected_length() {
    let identity = reticulum::identity::PrivateIdentity::new_from_rand(OsRng);
    let dest = reticulum::destination::new_in(identity, "app", "aspect");
    assert_eq!(dest.desc.address_hash.len(), 16);
}
