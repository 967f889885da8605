use crate::{
    BitLength, Challenge, PublicKey, UnusableBitLength, MIN_DISK_SIZE, USABLE_BIT_LENGTHS,
};

#[test]
fn bit_length_usable_set() {
    for bit_length in USABLE_BIT_LENGTHS {
        assert_eq!(BitLength::new(bit_length.get()), Ok(bit_length));
    }
    for raw in [0u8, 23, 25, 27, 29, 30, 255] {
        assert_eq!(BitLength::new(raw), Err(UnusableBitLength(raw)));
    }
}

#[test]
fn bit_length_disk_sizes() {
    // bl * 2^bl / 4 bytes
    assert_eq!(BitLength::new(24).unwrap().disk_size(), 100_663_296);
    assert_eq!(BitLength::new(26).unwrap().disk_size(), 436_207_616);
    assert_eq!(BitLength::new(28).unwrap().disk_size(), 1_879_048_192);
    assert_eq!(MIN_DISK_SIZE, 100_663_296);
}

#[test]
fn bit_length_ordering_follows_raw_value() {
    let mut bit_lengths = USABLE_BIT_LENGTHS;
    bit_lengths.reverse();
    bit_lengths.sort();
    assert_eq!(bit_lengths, USABLE_BIT_LENGTHS);
}

#[test]
fn challenge_displays_as_hex() {
    let mut bytes = [0u8; 32];
    bytes[0] = 0xab;
    bytes[31] = 0x01;
    let challenge = Challenge::from(bytes);
    let hex = challenge.to_string();
    assert_eq!(hex.len(), 64);
    assert!(hex.starts_with("ab"));
    assert!(hex.ends_with("01"));
}

#[test]
fn public_key_round_trips_through_bytes() {
    let bytes = [7u8; 32];
    let public_key = PublicKey::from(bytes);
    assert_eq!(<[u8; 32]>::from(public_key), bytes);
    assert_eq!(public_key.as_ref(), &bytes[..]);
}

#[test]
fn public_key_converts_from_schnorrkel() {
    let keypair = schnorrkel::MiniSecretKey::from_bytes(&[7u8; 32])
        .unwrap()
        .expand_to_keypair(schnorrkel::ExpansionMode::Ed25519);
    let public_key = PublicKey::from(keypair.public);
    assert_eq!(public_key.as_ref(), &keypair.public.to_bytes()[..]);
}
