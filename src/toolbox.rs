//! The Security Manager "cryptographic toolbox"
//!
//! These are the functions named in the cryptographic toolbox section of the Bluetooth core
//! specification (v5.0 | Vol 3, Part H, section 2.2) along with the key pair generation and
//! Diffie-Hellman calculation used by LE Secure Connections. Everything is computed in software,
//! there is no usage of hardware peripherals except for the systems random number generator.
//! Cryptographic functions not defined within the Bluetooth specification come from the
//! [Rust Crypto group](https://github.com/RustCrypto).

use crate::{BluetoothDeviceAddress, Error};
use rand_core::RngCore;

/// The public key type for the P-256 curve
pub type PubKey = p256::PublicKey;

/// The private (Ephemeral Secret) key type for the P-256 curve
pub type PriKey = p256::ecdh::EphemeralSecret;

/// The Diffie-Hellman shared secret
pub type DHSharedSecret = [u8; 32];

/// The x coordinate of the debug public key
///
/// The debug key pair is listed in the Bluetooth core specification (v5.0 | Vol 3, Part H,
/// section 2.3.5.6.1) so that packet sniffers can decrypt the pairing process. A peer using it
/// provides no protection against eavesdropping.
pub const DEBUG_PUB_KEY_X: [u8; 32] = [
    0x20, 0xb0, 0x03, 0xd2, 0xf2, 0x97, 0xbe, 0x2c, 0x5e, 0x2c, 0x83, 0xa7, 0xe9, 0xf9, 0xa5, 0xb9, 0xef, 0xf4, 0x91,
    0x11, 0xac, 0xf4, 0xfd, 0xdb, 0xcc, 0x03, 0x01, 0x48, 0x0e, 0x35, 0x9d, 0xe6,
];

/// The y coordinate of the debug public key
pub const DEBUG_PUB_KEY_Y: [u8; 32] = [
    0xdc, 0x80, 0x9c, 0x49, 0x65, 0x2a, 0xeb, 0x6d, 0x63, 0x32, 0x9a, 0xbf, 0x5a, 0x52, 0x15, 0x5c, 0x76, 0x63, 0x45,
    0xc2, 0x8f, 0xed, 0x30, 0x24, 0x74, 0x1c, 0x8e, 0xd0, 0x15, 0x89, 0xd2, 0x8b,
];

/// Check if raw public key data (the on-air format) is the debug public key
pub(crate) fn is_debug_public_key(raw: &[u8; 64]) -> bool {
    let mut x = [0u8; 32];
    let mut y = [0u8; 32];

    x.copy_from_slice(&raw[..32]);
    y.copy_from_slice(&raw[32..]);

    x.reverse();
    y.reverse();

    x == DEBUG_PUB_KEY_X && y == DEBUG_PUB_KEY_Y
}

/// Security function *e*
///
/// This is the encrypted data generator for LE legacy and secure connections. It generates 128-bit
/// data from a 128-bit key using the AES-128 bit block cypher
/// (see [FIPS-197](https://en.wikipedia.org/wiki/FIPS_197)).
pub fn e(key: u128, plain_text: u128) -> u128 {
    use aes::cipher::generic_array::GenericArray;
    use aes::cipher::{BlockEncrypt, KeyInit};

    let key_bytes = key.to_be_bytes();

    let cipher = aes::Aes128::new(GenericArray::from_slice(&key_bytes));

    let mut block = plain_text.to_be_bytes();

    cipher.encrypt_block(GenericArray::from_mut_slice(&mut block));

    <u128>::from_be_bytes(block)
}

/// 24-bit hash function
///
/// Used in random address creation and resolution.
pub fn ah(k: u128, r: [u8; 3]) -> [u8; 3] {
    let r_padded = <u128>::from(r[0]) | <u128>::from(r[1]) << 8 | <u128>::from(r[2]) << 16;

    let cypher_text = e(k, r_padded);

    [cypher_text as u8, (cypher_text >> 8) as u8, (cypher_text >> 16) as u8]
}

/// AES-CMAC subkey generation algorithm
///
/// Derived from [The AES-CMAC Algorithm](https://datatracker.ietf.org/doc/rfc4493)
fn aes_cmac_subkey_gen(k: u128) -> (u128, u128) {
    const RB: u128 = 0x87;

    let l = e(k, 0);

    let k1 = if (l & (1 << 127)) == 0 { l << 1 } else { (l << 1) ^ RB };

    let k2 = if (k1 & (1 << 127)) == 0 {
        k1 << 1
    } else {
        (k1 << 1) ^ RB
    };

    (k1, k2)
}

fn aes_cmac_padding(r: &[u8]) -> u128 {
    let unpad = r
        .iter()
        .enumerate()
        .fold(0u128, |p, (i, v)| p | (<u128>::from(*v) << (8 * (15 - i))));

    unpad | (1 << (127 - (8 * r.len())))
}

/// Convert a slice of *plain text* with a length of 16 into a u128, big endian value.
fn to_u128_be(chunk_16_bytes: &[u8]) -> u128 {
    let mut c = [0u8; 16];

    c.clone_from_slice(chunk_16_bytes);

    <u128>::from_be_bytes(c)
}

/// AES-CMAC algorithm
///
/// This algorithm takes an AES-128 key along with a message in order to generate an
/// authentication code for the message.
///
/// This method is derived from [The AES-CMAC Algorithm](https://datatracker.ietf.org/doc/rfc4493).
pub fn aes_cmac_generate(key: u128, msg: &[u8]) -> u128 {
    let (k1, k2) = aes_cmac_subkey_gen(key);

    let mut chunks = msg.chunks_exact(16);

    let mut x = 0u128;

    let mut last_full: Option<&[u8]> = None;

    for chunk in &mut chunks {
        if let Some(full) = last_full.replace(chunk) {
            x = e(key, x ^ to_u128_be(full));
        }
    }

    let remainder = chunks.remainder();

    let y = match (last_full, remainder.len()) {
        (Some(full), 0) => to_u128_be(full) ^ k1 ^ x,
        (Some(full), _) => {
            x = e(key, x ^ to_u128_be(full));

            aes_cmac_padding(remainder) ^ k2 ^ x
        }
        (None, _) => aes_cmac_padding(remainder) ^ k2 ^ x,
    };

    e(key, y)
}

/// Verification for AES-CMAC
pub fn aes_cmac_verify(key: u128, msg: &[u8], auth_code: u128) -> bool {
    auth_code == aes_cmac_generate(key, msg)
}

/// LE legacy confirm value function *c1*
///
/// `pres` and `preq` are the entire pairing response and pairing request PDUs (command code
/// included) as little endian values. `iat` and `rat` are true when the respective address is a
/// random device address.
#[allow(clippy::too_many_arguments)]
pub fn c1(k: u128, r: u128, pres: u128, preq: u128, iat: bool, ia: BluetoothDeviceAddress, rat: bool, ra: BluetoothDeviceAddress) -> u128 {
    let p1 = pres << (9 * 8) | preq << (2 * 8) | (<u128>::from(rat)) << 8 | <u128>::from(iat);

    let p2 = addr_as_u128(ia) << (6 * 8) | addr_as_u128(ra);

    e(k, e(k, r ^ p1) ^ p2)
}

/// LE legacy short term key generation function *s1*
///
/// The short term key is made from the lower eight bytes of the random values exchanged in phase
/// two of legacy pairing.
pub fn s1(k: u128, r1: u128, r2: u128) -> u128 {
    let r = (r1 & <u128>::from(<u64>::MAX)) << 64 | (r2 & <u128>::from(<u64>::MAX));

    e(k, r)
}

/// Secure Connections confirm value generation function *f4*
///
/// `u` and `v` are the x coordinates of the public keys in big endian order.
pub fn f4(u: &[u8; 32], v: &[u8; 32], x: u128, z: u8) -> u128 {
    let mut m = [0u8; 65];

    m[..32].copy_from_slice(u);
    m[32..64].copy_from_slice(v);
    m[64] = z;

    aes_cmac_generate(x, &m)
}

/// A device address formatted for the functions *f5* and *f6*
///
/// This is the fifty-six bit address form, one byte indicating whether the address is a random
/// device address followed by the big endian ordered address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingAddress {
    addr: [u8; 7],
}

impl PairingAddress {
    pub fn new(address: &BluetoothDeviceAddress, is_random_address: bool) -> Self {
        let mut addr = [0u8; 7];

        addr[0] = is_random_address.into();

        addr[1..].copy_from_slice(&address.0);

        addr[1..].reverse();

        PairingAddress { addr }
    }
}

/// Secure Connections key generation function *f5*
///
/// Derives the MacKey (used by [`f6`]) and the long term key from the Diffie-Hellman shared
/// secret. The returned pair is `(MacKey, LTK)`.
pub fn f5(w: &DHSharedSecret, n1: u128, n2: u128, a1: PairingAddress, a2: PairingAddress) -> (u128, u128) {
    const SALT: u128 = 0x6C88_8391_AAF5_A538_6037_0BDB_5A60_83BE;

    // the keyID "btle"
    const KEY_ID: [u8; 4] = [0x62, 0x74, 0x6c, 0x65];

    const LENGTH: [u8; 2] = [0x01, 0x00];

    let t = aes_cmac_generate(SALT, w);

    let mut m = [0u8; 53];

    m[1..5].copy_from_slice(&KEY_ID);
    m[5..21].copy_from_slice(&n1.to_be_bytes());
    m[21..37].copy_from_slice(&n2.to_be_bytes());
    m[37..44].copy_from_slice(&a1.addr);
    m[44..51].copy_from_slice(&a2.addr);
    m[51..].copy_from_slice(&LENGTH);

    m[0] = 0;

    let mac_key = aes_cmac_generate(t, &m);

    m[0] = 1;

    let ltk = aes_cmac_generate(t, &m);

    (mac_key, ltk)
}

/// Secure Connections check value generation function *f6*
pub fn f6(mac_key: u128, n1: u128, n2: u128, r: u128, io_cap: [u8; 3], a1: PairingAddress, a2: PairingAddress) -> u128 {
    let mut m = [0u8; 65];

    m[..16].copy_from_slice(&n1.to_be_bytes());
    m[16..32].copy_from_slice(&n2.to_be_bytes());
    m[32..48].copy_from_slice(&r.to_be_bytes());
    m[48..51].copy_from_slice(&io_cap);
    m[51..58].copy_from_slice(&a1.addr);
    m[58..].copy_from_slice(&a2.addr);

    aes_cmac_generate(mac_key, &m)
}

/// Secure Connections numeric comparison value generation function *g2*
///
/// The six digit value displayed to the user is the returned value modulo one million.
pub fn g2(u: &[u8; 32], v: &[u8; 32], x: u128, y: u128) -> u32 {
    let mut m = [0u8; 80];

    m[..32].copy_from_slice(u);
    m[32..64].copy_from_slice(v);
    m[64..].copy_from_slice(&y.to_be_bytes());

    aes_cmac_generate(x, &m) as u32
}

/// Link key conversion function *h6*
///
/// `key_id` is the four character ASCII key identifier as a big endian value.
pub fn h6(w: u128, key_id: u32) -> u128 {
    aes_cmac_generate(w, &key_id.to_be_bytes())
}

/// Link key conversion function *h7*
pub fn h7(salt: u128, w: u128) -> u128 {
    aes_cmac_generate(salt, &w.to_be_bytes())
}

/// Derive a BR/EDR link key from a Secure Connections long term key
///
/// When both devices set the CT2 bit of their authentication requirements the conversion uses
/// [`h7`] with the salt "tmp2", otherwise it uses [`h6`] with the key id "tmp2" (see the Bluetooth
/// core specification v5.0 | Vol 3, Part H, section 2.4.2.4).
pub fn link_key_from_ltk(ltk: u128, ct2: bool) -> u128 {
    // the salt (h7) and keyID (h6) "tmp2"
    const SALT_TMP2: u128 = 0x0000_0000_0000_0000_0000_0000_746D_7032;
    const KEY_ID_TMP2: u32 = 0x746D_7032;

    // the keyID "lebr"
    const KEY_ID_LEBR: u32 = 0x6C65_6272;

    let intermediate = if ct2 {
        h7(SALT_TMP2, ltk)
    } else {
        h6(ltk, KEY_ID_TMP2)
    };

    h6(intermediate, KEY_ID_LEBR)
}

/// Generate the (private, public) key pair for the P-256 elliptic curve
///
/// This uses the systems random number generator to create the private key.
pub fn ecc_gen() -> (PriKey, PubKey) {
    let ephemeral_secret = PriKey::random(&mut rand_core::OsRng);

    let public_key = PubKey::from(&ephemeral_secret);

    (ephemeral_secret, public_key)
}

/// Calculate the elliptic curve Diffie-Hellman shared secret from the provided public key
///
/// The return is the raw x coordinate of the shared point in big endian order, as used by the
/// key derivation function [`f5`].
pub fn ecdh(this_private_key: PriKey, peer_public_key: &PubKey) -> DHSharedSecret {
    let shared_secret = this_private_key.diffie_hellman(peer_public_key);

    let mut raw_secret_bytes = DHSharedSecret::default();

    raw_secret_bytes.copy_from_slice(shared_secret.raw_secret_bytes().as_slice());

    raw_secret_bytes
}

/// Get the x coordinate of a public key in big endian order
pub(crate) fn pub_key_x_coord(pub_key: &PubKey) -> [u8; 32] {
    let encoded = elliptic_curve::sec1::EncodedPoint::<p256::NistP256>::from(pub_key);

    let mut x = [0u8; 32];

    x.copy_from_slice(encoded.x().expect("the identity point is not a valid public key"));

    x
}

/// Convert a public key into the key exchange (on-air) format
///
/// The on-air format is the little endian x coordinate followed by the little endian y
/// coordinate.
pub(crate) fn pub_key_into_command_format(pub_key: &PubKey) -> [u8; 64] {
    let encoded = elliptic_curve::sec1::EncodedPoint::<p256::NistP256>::from(pub_key);

    let mut raw = [0u8; 64];

    raw[..32].copy_from_slice(encoded.x().expect("the identity point is not a valid public key"));
    raw[32..].copy_from_slice(encoded.y().expect("the identity point is not a valid public key"));

    raw[..32].reverse();
    raw[32..].reverse();

    raw
}

/// Try to convert raw key exchange data into a public key
///
/// This fails when the coordinates are not a point on the P-256 curve, a requirement of the key
/// validation portion of the Secure Connections public key exchange.
pub(crate) fn pub_key_try_from_command_format(raw: &[u8; 64]) -> Result<PubKey, Error> {
    let mut sec1 = [0u8; 65];

    sec1[0] = 0x4;

    sec1[1..33].copy_from_slice(&raw[..32]);
    sec1[33..].copy_from_slice(&raw[32..]);

    sec1[1..33].reverse();
    sec1[33..].reverse();

    PubKey::from_sec1_bytes(&sec1).map_err(|_| Error::Value)
}

/// Generate a random `u128` value
pub fn rand_u128() -> u128 {
    let mut bytes = [0u8; 16];

    rand_core::OsRng.fill_bytes(&mut bytes);

    <u128>::from_ne_bytes(bytes)
}

/// Generate a nonce
pub fn nonce() -> u128 {
    rand_u128()
}

/// Generate a six digit passkey
pub(crate) fn new_passkey() -> u32 {
    (rand_u128() % 1_000_000) as u32
}

/// The `z` input of [`f4`] for a passkey entry round
///
/// Each of the twenty rounds commits one bit of the passkey, `z` is `0x80` with the round's bit
/// of the passkey in the least significant position.
pub(crate) fn passkey_bit(passkey: u32, round: usize) -> u8 {
    if 0 == passkey & (1 << round) {
        0x80
    } else {
        0x81
    }
}

/// Reduce an encryption key to the negotiated key size
///
/// The most significant bytes above `size` are zeroed before the key is used (v5.0 | Vol 3,
/// Part H, section 2.3.4).
pub(crate) fn mask_key(key: u128, size: usize) -> u128 {
    if size >= 16 {
        key
    } else {
        key & (<u128>::MAX >> (8 * (16 - size)))
    }
}

/// Constant time equality of two 128-bit values
///
/// Confirm and check values commit to secret material, so a data dependent comparison latency
/// would leak through timing. Comparisons against anything the peer supplied go through here.
pub(crate) fn constant_time_eq(a: u128, b: u128) -> bool {
    use subtle::ConstantTimeEq;

    a.to_le_bytes().as_slice().ct_eq(&b.to_le_bytes()).into()
}

/// Convert a full pairing request or response PDU into the `u128` form used by [`c1`]
pub(crate) fn pdu_as_u128(pdu: [u8; 7]) -> u128 {
    pdu.iter()
        .enumerate()
        .fold(0u128, |val, (i, byte)| val | <u128>::from(*byte) << (8 * i))
}

fn addr_as_u128(addr: BluetoothDeviceAddress) -> u128 {
    addr.0
        .iter()
        .enumerate()
        .fold(0u128, |val, (i, byte)| val | <u128>::from(*byte) << (8 * i))
}

/// Tests
///
/// Much of the test data is the sample data at the end of the Security in Bluetooth LE part of
/// the core specification (v5.0 | Vol 3, Part H, Appendix D), the rest comes from the RFC of the
/// algorithm being tested.
#[cfg(test)]
mod tests {
    use super::*;

    const SPEC_U: [u8; 32] = [
        0x20, 0xb0, 0x03, 0xd2, 0xf2, 0x97, 0xbe, 0x2c, 0x5e, 0x2c, 0x83, 0xa7, 0xe9, 0xf9, 0xa5, 0xb9, 0xef, 0xf4,
        0x91, 0x11, 0xac, 0xf4, 0xfd, 0xdb, 0xcc, 0x03, 0x01, 0x48, 0x0e, 0x35, 0x9d, 0xe6,
    ];

    const SPEC_V: [u8; 32] = [
        0x55, 0x18, 0x8b, 0x3d, 0x32, 0xf6, 0xbb, 0x9a, 0x90, 0x0a, 0xfc, 0xfb, 0xee, 0xd4, 0xe7, 0x2a, 0x59, 0xcb,
        0x9a, 0xc2, 0xf1, 0x9d, 0x7c, 0xfb, 0x6b, 0x4f, 0xdd, 0x49, 0xf4, 0x7f, 0xc5, 0xfd,
    ];

    const SPEC_X: u128 = 0xd5cb8454_d177733e_ffffb2ec_712baeab;

    const SPEC_Y: u128 = 0xa6e8e7cc_25a75f6e_216583f7_ff3dc4cf;

    const SPEC_DH_KEY: DHSharedSecret = [
        0xec, 0x02, 0x34, 0xa3, 0x57, 0xc8, 0xad, 0x05, 0x34, 0x10, 0x10, 0xa6, 0x0a, 0x39, 0x7d, 0x9b, 0x99, 0x79,
        0x6b, 0x13, 0xb4, 0xf8, 0x66, 0xf1, 0x86, 0x8d, 0x34, 0xf3, 0x73, 0xbf, 0xa6, 0x98,
    ];

    fn spec_a1() -> PairingAddress {
        PairingAddress::new(
            &BluetoothDeviceAddress([0xce, 0xbf, 0x37, 0x37, 0x12, 0x56]),
            false,
        )
    }

    fn spec_a2() -> PairingAddress {
        PairingAddress::new(
            &BluetoothDeviceAddress([0xc1, 0xcf, 0x2d, 0x70, 0x13, 0xa7]),
            false,
        )
    }

    #[test]
    fn aes_cmac_padding_test() {
        let b = [0x11, 0x22, 0x33];

        assert_eq!(0x1122_3380_0000_0000_0000_0000_0000_0000u128, aes_cmac_padding(&b));
    }

    /// The test data was retrieved from [The AES-CMAC Algorithm](https://datatracker.ietf.org/doc/rfc4493)
    #[test]
    fn aes_cmac_subkey_gen_test() {
        let k = 0x2b7e1516_28aed2a6_abf71588_09cf4f3c;

        assert_eq!(0x7df76b0c_1ab899b3_3e42f047_b91b546f, e(k, 0));

        let (k1, k2) = aes_cmac_subkey_gen(k);

        assert_eq!(0xfbeed618_35713366_7c85e08f_7236a8de, k1);
        assert_eq!(0xf7ddac30_6ae266cc_f90bc11e_e46d513b, k2);
    }

    /// The test data was retrieved from [The AES-CMAC Algorithm](https://datatracker.ietf.org/doc/rfc4493)
    #[test]
    fn aes_cmac_gen_test() {
        let k = 0x2b7e1516_28aed2a6_abf71588_09cf4f3c;

        let m = [
            0x6b, 0xc1, 0xbe, 0xe2, 0x2e, 0x40, 0x9f, 0x96, 0xe9, 0x3d, 0x7e, 0x11, 0x73, 0x93, 0x17, 0x2a, 0xae, 0x2d,
            0x8a, 0x57, 0x1e, 0x03, 0xac, 0x9c, 0x9e, 0xb7, 0x6f, 0xac, 0x45, 0xaf, 0x8e, 0x51, 0x30, 0xc8, 0x1c, 0x46,
            0xa3, 0x5c, 0xe4, 0x11, 0xe5, 0xfb, 0xc1, 0x19, 0x1a, 0x0a, 0x52, 0xef, 0xf6, 0x9f, 0x24, 0x45, 0xdf, 0x4f,
            0x9b, 0x17, 0xad, 0x2b, 0x41, 0x7b, 0xe6, 0x6c, 0x37, 0x10,
        ];

        assert_eq!(0xbb1d6929_e9593728_7fa37d12_9b756746, aes_cmac_generate(k, &m[..0]));
        assert_eq!(0x070a16b4_6b4d4144_f79bdd9d_d04a287c, aes_cmac_generate(k, &m[..16]));
        assert_eq!(0xdfa66747_de9ae630_30ca3261_1497c827, aes_cmac_generate(k, &m[..40]));
        assert_eq!(0x51f0bebf_7e3b9d92_fc497417_79363cfe, aes_cmac_generate(k, &m));
    }

    #[test]
    fn c1_test() {
        let k = 0;

        let r = 0x5783D521_56AD6F0E_6388274E_C6702EE0;

        let pres = 0x05000800000302;

        let preq = 0x07071000000101;

        let ia = BluetoothDeviceAddress([0xa6, 0xa5, 0xa4, 0xa3, 0xa2, 0xa1]);

        let ra = BluetoothDeviceAddress([0xb6, 0xb5, 0xb4, 0xb3, 0xb2, 0xb1]);

        assert_eq!(
            0x1e1e3fef_878988ea_d2a74dc5_bef13b86,
            c1(k, r, pres, preq, true, ia, false, ra)
        );
    }

    #[test]
    fn s1_test() {
        let k = 0;

        let r1 = 0x000F0E0D_0C0B0A09_11223344_55667788;

        let r2 = 0x01020304_05060708_99AABBCC_DDEEFF00;

        assert_eq!(0x9a1fe1f0_e8b0f49b_5b4216ae_796da062, s1(k, r1, r2));
    }

    #[test]
    fn f4_test() {
        assert_eq!(
            0xf2c916f1_07a9bd1c_f1eda1be_a974872d,
            f4(&SPEC_U, &SPEC_V, SPEC_X, 0)
        );
    }

    #[test]
    fn f5_test() {
        let (mac_key, ltk) = f5(&SPEC_DH_KEY, SPEC_X, SPEC_Y, spec_a1(), spec_a2());

        assert_eq!(0x2965f176_a1084a02_fd3f6a20_ce636e20, mac_key);
        assert_eq!(0x69867911_69d7cd23_980522b5_94750a38, ltk);
    }

    #[test]
    fn f6_test() {
        let mac_key = 0x2965f176_a1084a02_fd3f6a20_ce636e20;

        let r = 0x12a3343b_b453bb54_08da42d2_0c2d0fc8;

        let io_cap = [0x01, 0x01, 0x02];

        assert_eq!(
            0xe3c47398_9cd0e8c5_d26c0b09_da958f61,
            f6(mac_key, SPEC_X, SPEC_Y, r, io_cap, spec_a1(), spec_a2())
        );
    }

    #[test]
    fn g2_test() {
        assert_eq!(0x2f9ed5ba, g2(&SPEC_U, &SPEC_V, SPEC_X, SPEC_Y));
    }

    #[test]
    fn h6_test() {
        let w = 0xec0234a3_57c8ad05_341010a6_0a397d9b;

        // the keyID "lebr"
        assert_eq!(0x2d9ae102_e76dc91c_e8d3a9e2_80b16399, h6(w, 0x6c656272));
    }

    #[test]
    fn h7_test() {
        // the salt "tmp1"
        let salt = 0x00000000_00000000_00000000_746D7031;

        let w = 0xec0234a3_57c8ad05_341010a6_0a397d9b;

        assert_eq!(0xfb173597_c6a3c0ec_d2998c2a_75a57011, h7(salt, w));
    }

    #[test]
    fn public_key_command_format() {
        let (_, public_key) = ecc_gen();

        let raw = pub_key_into_command_format(&public_key);

        let parsed = pub_key_try_from_command_format(&raw).unwrap();

        assert_eq!(public_key, parsed);
    }

    #[test]
    fn invalid_public_key_is_rejected() {
        // not a point on the P-256 curve
        let raw = [0x5au8; 64];

        assert!(pub_key_try_from_command_format(&raw).is_err());
    }

    #[test]
    fn debug_public_key_is_detected() {
        let mut raw = [0u8; 64];

        raw[..32].copy_from_slice(&DEBUG_PUB_KEY_X);
        raw[32..].copy_from_slice(&DEBUG_PUB_KEY_Y);

        raw[..32].reverse();
        raw[32..].reverse();

        assert!(is_debug_public_key(&raw));

        let (_, public_key) = ecc_gen();

        assert!(!is_debug_public_key(&pub_key_into_command_format(&public_key)));
    }

    #[test]
    fn ecdh_shared_secret_matches() {
        let (private_a, public_a) = ecc_gen();
        let (private_b, public_b) = ecc_gen();

        assert_eq!(ecdh(private_a, &public_b), ecdh(private_b, &public_a));
    }

    #[test]
    fn passkey_bits() {
        let passkey = 0b1001_0110;

        assert_eq!(0x80, passkey_bit(passkey, 0));
        assert_eq!(0x81, passkey_bit(passkey, 1));
        assert_eq!(0x81, passkey_bit(passkey, 2));
        assert_eq!(0x80, passkey_bit(passkey, 3));
        assert_eq!(0x81, passkey_bit(passkey, 7));
        assert_eq!(0x80, passkey_bit(passkey, 19));
    }

    #[test]
    fn constant_time_eq_agrees_with_equality() {
        assert!(constant_time_eq(0, 0));
        assert!(constant_time_eq(<u128>::MAX, <u128>::MAX));
        assert!(constant_time_eq(0x1234_5678, 0x1234_5678));

        assert!(!constant_time_eq(0x1234_5678, 0x1234_5679));
        assert!(!constant_time_eq(0x1234_5678, 0x1234_5678 << 64));
        assert!(!constant_time_eq(0, 1 << 127));
    }
}
