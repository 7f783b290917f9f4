//! Encryption information related Security Manager packets
//!
//! These packets are defined under the Security In Bluetooth Low Energy section of the Bluetooth
//! Specification (v5.0 | Vol 3, Part H, section 3.6). They are the PDUs of the key distribution
//! phase along with the security request.

use super::*;

/// The authentication requirement flags of the pairing request, pairing response and security
/// request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRequirements {
    Bonding,
    ManInTheMiddleProtection,
    Sc,
    KeyPress,
    Ct2,
}

impl AuthRequirements {
    pub(crate) fn make_auth_req_val(reqs: &[AuthRequirements]) -> u8 {
        reqs.iter().fold(0u8, |val, r| match r {
            AuthRequirements::Bonding => val | (0b01 << 0),
            AuthRequirements::ManInTheMiddleProtection => val | (1 << 2),
            AuthRequirements::Sc => val | (1 << 3),
            AuthRequirements::KeyPress => val | (1 << 4),
            AuthRequirements::Ct2 => val | (1 << 5),
        })
    }

    pub(crate) fn vec_from_val(val: u8) -> Vec<Self> {
        let mut v = Vec::new();

        if 0b01 == val & 0b11 {
            v.push(AuthRequirements::Bonding)
        }

        if 1 == (val >> 2) & 0x1 {
            v.push(AuthRequirements::ManInTheMiddleProtection)
        }

        if 1 == (val >> 3) & 0x1 {
            v.push(AuthRequirements::Sc)
        }

        if 1 == (val >> 4) & 0x1 {
            v.push(AuthRequirements::KeyPress)
        }

        if 1 == (val >> 5) & 0x1 {
            v.push(AuthRequirements::Ct2)
        }

        v
    }
}

/// The long term key of LE legacy key distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionInformation {
    long_term_key: u128,
}

impl EncryptionInformation {
    pub(crate) fn new(ltk: u128) -> Self {
        EncryptionInformation { long_term_key: ltk }
    }

    pub fn get_long_term_key(&self) -> u128 {
        self.long_term_key
    }
}

impl CommandData for EncryptionInformation {
    fn into_command_format(self) -> heapless::Vec<u8, MAX_COMMAND_SIZE> {
        let mut ret = heapless::Vec::new();

        ret.extend_from_slice(&self.long_term_key.to_le_bytes()).ok();

        ret
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        if icd.len() == 16 {
            let mut v = [0u8; 16];

            v.copy_from_slice(icd);

            Ok(EncryptionInformation {
                long_term_key: <u128>::from_le_bytes(v),
            })
        } else {
            Err(Error::Size)
        }
    }
}

impl From<EncryptionInformation> for Command<EncryptionInformation> {
    fn from(ei: EncryptionInformation) -> Self {
        Command::new(CommandType::EncryptionInformation, ei)
    }
}

/// The encryption diversifier and randomizer of LE legacy key distribution
///
/// These two values are given to the central so that it can tell the peripheral which long term
/// key to re-encrypt the connection with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CentralIdentification {
    encryption_diversifier: u16,
    random: u64,
}

impl CentralIdentification {
    pub(crate) fn new(ediv: u16, rand: u64) -> Self {
        CentralIdentification {
            encryption_diversifier: ediv,
            random: rand,
        }
    }

    pub fn get_encryption_diversifier(&self) -> u16 {
        self.encryption_diversifier
    }

    pub fn get_random(&self) -> u64 {
        self.random
    }
}

impl CommandData for CentralIdentification {
    fn into_command_format(self) -> heapless::Vec<u8, MAX_COMMAND_SIZE> {
        let mut ret = heapless::Vec::new();

        ret.extend_from_slice(&self.encryption_diversifier.to_le_bytes()).ok();
        ret.extend_from_slice(&self.random.to_le_bytes()).ok();

        ret
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        if icd.len() == 10 {
            let mut ediv_a = [0u8; 2];
            let mut rand_a = [0u8; 8];

            ediv_a.copy_from_slice(&icd[..2]);
            rand_a.copy_from_slice(&icd[2..]);

            Ok(CentralIdentification {
                encryption_diversifier: <u16>::from_le_bytes(ediv_a),
                random: <u64>::from_le_bytes(rand_a),
            })
        } else {
            Err(Error::Size)
        }
    }
}

impl From<CentralIdentification> for Command<CentralIdentification> {
    fn from(ci: CentralIdentification) -> Self {
        Command::new(CommandType::CentralIdentification, ci)
    }
}

/// The identity resolving key of key distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityInformation {
    irk: u128,
}

impl IdentityInformation {
    pub(crate) fn new(irk: u128) -> Self {
        IdentityInformation { irk }
    }

    pub fn get_irk(&self) -> u128 {
        self.irk
    }
}

impl CommandData for IdentityInformation {
    fn into_command_format(self) -> heapless::Vec<u8, MAX_COMMAND_SIZE> {
        let mut ret = heapless::Vec::new();

        ret.extend_from_slice(&self.irk.to_le_bytes()).ok();

        ret
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        if icd.len() == 16 {
            let mut v = [0u8; 16];

            v.copy_from_slice(icd);

            Ok(IdentityInformation {
                irk: <u128>::from_le_bytes(v),
            })
        } else {
            Err(Error::Size)
        }
    }
}

impl From<IdentityInformation> for Command<IdentityInformation> {
    fn from(ii: IdentityInformation) -> Self {
        Command::new(CommandType::IdentityInformation, ii)
    }
}

/// The identity address of key distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityAddressInformation {
    identity: IdentityAddress,
}

impl IdentityAddressInformation {
    pub(crate) fn new(identity: IdentityAddress) -> Self {
        IdentityAddressInformation { identity }
    }

    pub fn get_identity(&self) -> IdentityAddress {
        self.identity
    }
}

impl CommandData for IdentityAddressInformation {
    fn into_command_format(self) -> heapless::Vec<u8, MAX_COMMAND_SIZE> {
        let mut ret = heapless::Vec::new();

        ret.push(if self.identity.is_public() { 0 } else { 1 }).ok();

        ret.extend_from_slice(&self.identity.get_address().0).ok();

        ret
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        if icd.len() == 7 {
            let mut address = BluetoothDeviceAddress::zeroed();

            address.copy_from_slice(&icd[1..]);

            let identity = match icd[0] {
                0 => IdentityAddress::Public(address),
                1 => IdentityAddress::StaticRandom(address),
                _ => return Err(Error::Value),
            };

            Ok(IdentityAddressInformation { identity })
        } else {
            Err(Error::Size)
        }
    }
}

impl From<IdentityAddressInformation> for Command<IdentityAddressInformation> {
    fn from(iai: IdentityAddressInformation) -> Self {
        Command::new(CommandType::IdentityAddressInformation, iai)
    }
}

/// The connection signature resolving key of key distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigningInformation {
    signature_key: u128,
}

impl SigningInformation {
    pub(crate) fn new(csrk: u128) -> Self {
        Self { signature_key: csrk }
    }

    pub fn get_signature_key(&self) -> u128 {
        self.signature_key
    }
}

impl CommandData for SigningInformation {
    fn into_command_format(self) -> heapless::Vec<u8, MAX_COMMAND_SIZE> {
        let mut ret = heapless::Vec::new();

        ret.extend_from_slice(&self.signature_key.to_le_bytes()).ok();

        ret
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        if icd.len() == 16 {
            let mut key_arr = [0u8; 16];

            key_arr.copy_from_slice(icd);

            Ok(SigningInformation {
                signature_key: <u128>::from_le_bytes(key_arr),
            })
        } else {
            Err(Error::Size)
        }
    }
}

impl From<SigningInformation> for Command<SigningInformation> {
    fn from(si: SigningInformation) -> Self {
        Command::new(CommandType::SigningInformation, si)
    }
}

/// A request for security sent by the responding device
///
/// The responder cannot start pairing, this PDU asks the initiator to either start pairing or to
/// re-encrypt the connection with keys from a prior bond.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityRequest {
    auth_req: u8,
}

impl SecurityRequest {
    pub(crate) fn new(auth_req: u8) -> Self {
        SecurityRequest { auth_req }
    }

    pub fn get_auth_requirements(&self) -> Vec<AuthRequirements> {
        AuthRequirements::vec_from_val(self.auth_req)
    }

    pub fn is_bonding_requested(&self) -> bool {
        self.auth_req & 0b11 == 0b01
    }

    pub fn is_man_in_the_middle_required(&self) -> bool {
        self.auth_req & (1 << 2) != 0
    }

    pub fn is_secure_connections_required(&self) -> bool {
        self.auth_req & (1 << 3) != 0
    }
}

impl CommandData for SecurityRequest {
    fn into_command_format(self) -> heapless::Vec<u8, MAX_COMMAND_SIZE> {
        let mut ret = heapless::Vec::new();

        ret.push(self.auth_req).ok();

        ret
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        if icd.len() == 1 {
            Ok(SecurityRequest { auth_req: icd[0] })
        } else {
            Err(Error::Size)
        }
    }
}

impl From<SecurityRequest> for Command<SecurityRequest> {
    fn from(sr: SecurityRequest) -> Self {
        Command::new(CommandType::SecurityRequest, sr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_req_val_round_trip() {
        let reqs = [
            AuthRequirements::Bonding,
            AuthRequirements::ManInTheMiddleProtection,
            AuthRequirements::Ct2,
        ];

        let val = AuthRequirements::make_auth_req_val(&reqs);

        assert_eq!(0b10_0101, val);

        assert_eq!(reqs.as_slice(), AuthRequirements::vec_from_val(val).as_slice());
    }

    #[test]
    fn central_identification_round_trip() {
        let ci = CentralIdentification::new(0x1234, 0x8877_6655_4433_2211);

        let icd = ci.into_command_format();

        assert_eq!(&[0x34, 0x12, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88], &icd[..]);

        assert_eq!(ci, CentralIdentification::try_from_command_format(&icd).unwrap());
    }

    #[test]
    fn identity_address_round_trip() {
        let identity = IdentityAddress::StaticRandom(BluetoothDeviceAddress([1, 2, 3, 4, 5, 0xc5]));

        let iai = IdentityAddressInformation::new(identity);

        let icd = iai.into_command_format();

        assert_eq!(&[1, 1, 2, 3, 4, 5, 0xc5], &icd[..]);

        let parsed = IdentityAddressInformation::try_from_command_format(&icd).unwrap();

        assert_eq!(identity, parsed.get_identity());

        // an address type other than public or static random is rejected
        assert_eq!(
            Err(Error::Value),
            IdentityAddressInformation::try_from_command_format(&[2, 1, 2, 3, 4, 5, 6]).map(|_| ())
        );
    }
}
