//! Pairing PDUs and feature negotiation
//!
//! The PDUs in this module are defined under the Security In Bluetooth Low Energy section of the
//! Bluetooth Specification (v5.0 | Vol 3, Part H, section 3.5). The pairing request and response
//! carry the feature sets of the two devices, [`NegotiatedFeatures`] is the agreement derived
//! from both of them.

use super::*;

/// The encryption key size bounds of the Security Manager
pub const MAX_ENCRYPTION_SIZE_RANGE: core::ops::RangeInclusive<usize> =
    crate::ENCRYPTION_KEY_MIN_SIZE..=crate::ENCRYPTION_KEY_MAX_SIZE;

pub(crate) const ENC_KEY: u8 = 1 << 0;
pub(crate) const ID_KEY: u8 = 1 << 1;
pub(crate) const SIGN_KEY: u8 = 1 << 2;
pub(crate) const LINK_KEY: u8 = 1 << 3;

/// The input and output capabilities of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoCapability {
    /// The device can only display a six digit value
    DisplayOnly,
    /// The device can display a six digit value and the user can confirm it with yes or no
    DisplayWithYesOrNo,
    /// The user can only input a six digit value
    KeyboardOnly,
    /// The device has no means of user interaction
    NoInputNoOutput,
    /// The device can both display and have the user input a six digit value
    KeyboardDisplay,
}

impl IoCapability {
    pub(crate) fn into_val(self) -> u8 {
        match self {
            IoCapability::DisplayOnly => 0x0,
            IoCapability::DisplayWithYesOrNo => 0x1,
            IoCapability::KeyboardOnly => 0x2,
            IoCapability::NoInputNoOutput => 0x3,
            IoCapability::KeyboardDisplay => 0x4,
        }
    }

    pub(crate) fn try_from_val(val: u8) -> Result<Self, Error> {
        match val {
            0x0 => Ok(IoCapability::DisplayOnly),
            0x1 => Ok(IoCapability::DisplayWithYesOrNo),
            0x2 => Ok(IoCapability::KeyboardOnly),
            0x3 => Ok(IoCapability::NoInputNoOutput),
            0x4 => Ok(IoCapability::KeyboardDisplay),
            _ => Err(Error::Value),
        }
    }
}

/// Whether out of band data from the peer has been received by this device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OobDataFlag {
    AuthenticationDataNotPresent,
    Present,
}

impl OobDataFlag {
    pub(crate) fn into_val(self) -> u8 {
        match self {
            OobDataFlag::AuthenticationDataNotPresent => 0x0,
            OobDataFlag::Present => 0x1,
        }
    }

    pub(crate) fn try_from_val(val: u8) -> Result<Self, Error> {
        match val {
            0x0 => Ok(OobDataFlag::AuthenticationDataNotPresent),
            0x1 => Ok(OobDataFlag::Present),
            _ => Err(Error::Value),
        }
    }
}

/// The kinds of keys that can be distributed during bonding
///
/// `LinkKey` is not a key that crosses the connection, it flags that the BR/EDR link key is to be
/// derived from the LE long term key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDistributions {
    EncKey,
    IdKey,
    SignKey,
    LinkKey,
}

impl KeyDistributions {
    pub(crate) fn make_key_dist_val(keys: &[KeyDistributions]) -> u8 {
        keys.iter().fold(0u8, |val, key| match key {
            KeyDistributions::EncKey => val | ENC_KEY,
            KeyDistributions::IdKey => val | ID_KEY,
            KeyDistributions::SignKey => val | SIGN_KEY,
            KeyDistributions::LinkKey => val | LINK_KEY,
        })
    }

    pub(crate) fn from_val(val: u8) -> &'static [KeyDistributions] {
        use KeyDistributions::*;

        match (val & ENC_KEY != 0, val & ID_KEY != 0, val & SIGN_KEY != 0, val & LINK_KEY != 0) {
            (false, false, false, false) => &[],
            (true, false, false, false) => &[EncKey],
            (false, true, false, false) => &[IdKey],
            (false, false, true, false) => &[SignKey],
            (false, false, false, true) => &[LinkKey],
            (true, true, false, false) => &[EncKey, IdKey],
            (true, false, true, false) => &[EncKey, SignKey],
            (true, false, false, true) => &[EncKey, LinkKey],
            (false, true, true, false) => &[IdKey, SignKey],
            (false, true, false, true) => &[IdKey, LinkKey],
            (false, false, true, true) => &[SignKey, LinkKey],
            (true, true, true, false) => &[EncKey, IdKey, SignKey],
            (true, true, false, true) => &[EncKey, IdKey, LinkKey],
            (true, false, true, true) => &[EncKey, SignKey, LinkKey],
            (false, true, true, true) => &[IdKey, SignKey, LinkKey],
            (true, true, true, true) => &[EncKey, IdKey, SignKey, LinkKey],
        }
    }
}

macro_rules! pairing_feature_pdu {
    ($name:ident, $command_type:path) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            io_capability: IoCapability,
            oob_data_flag: OobDataFlag,
            auth_req: u8,
            max_encryption_size: usize,
            initiator_key_distribution: u8,
            responder_key_distribution: u8,
        }

        impl $name {
            pub(crate) fn new(
                io_capability: IoCapability,
                oob_data_flag: OobDataFlag,
                auth_req: u8,
                max_encryption_size: usize,
                initiator_key_distribution: u8,
                responder_key_distribution: u8,
            ) -> Self {
                $name {
                    io_capability,
                    oob_data_flag,
                    auth_req,
                    max_encryption_size,
                    initiator_key_distribution,
                    responder_key_distribution,
                }
            }

            pub fn get_io_capability(&self) -> IoCapability {
                self.io_capability
            }

            pub fn get_oob_data_flag(&self) -> OobDataFlag {
                self.oob_data_flag
            }

            pub fn get_max_encryption_size(&self) -> usize {
                self.max_encryption_size
            }

            pub fn get_initiator_key_distribution(&self) -> &'static [KeyDistributions] {
                KeyDistributions::from_val(self.initiator_key_distribution)
            }

            pub fn get_responder_key_distribution(&self) -> &'static [KeyDistributions] {
                KeyDistributions::from_val(self.responder_key_distribution)
            }

            pub fn is_bonding(&self) -> bool {
                self.auth_req & 0b11 == 0b01
            }

            pub fn is_man_in_the_middle_protected(&self) -> bool {
                self.auth_req & (1 << 2) != 0
            }

            pub fn is_secure_connections(&self) -> bool {
                self.auth_req & (1 << 3) != 0
            }

            pub fn is_keypress_enabled(&self) -> bool {
                self.auth_req & (1 << 4) != 0
            }

            pub fn is_ct2_set(&self) -> bool {
                self.auth_req & (1 << 5) != 0
            }

            pub(crate) fn initiator_key_dist_val(&self) -> u8 {
                self.initiator_key_distribution
            }

            pub(crate) fn responder_key_dist_val(&self) -> u8 {
                self.responder_key_distribution
            }

            /// Get the full PDU, the command code included
            ///
            /// The pairing request and response PDUs are inputs of the functions
            /// [`c1`](toolbox::c1) and [`f6`](toolbox::f6).
            pub(crate) fn get_pdu(&self) -> [u8; 7] {
                [
                    $command_type.into_val(),
                    self.io_capability.into_val(),
                    self.oob_data_flag.into_val(),
                    self.auth_req,
                    self.max_encryption_size as u8,
                    self.initiator_key_distribution,
                    self.responder_key_distribution,
                ]
            }

            /// Get the *IOcap* input of the function [`f6`](toolbox::f6)
            pub(crate) fn get_io_cap(&self) -> [u8; 3] {
                [
                    self.auth_req,
                    self.oob_data_flag.into_val(),
                    self.io_capability.into_val(),
                ]
            }
        }

        impl CommandData for $name {
            fn into_command_format(self) -> heapless::Vec<u8, MAX_COMMAND_SIZE> {
                let mut ret = heapless::Vec::new();

                ret.extend_from_slice(&self.get_pdu()[1..]).ok();

                ret
            }

            fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
                if icd.len() != 6 {
                    return Err(Error::Size);
                }

                Ok($name {
                    io_capability: IoCapability::try_from_val(icd[0])?,
                    oob_data_flag: OobDataFlag::try_from_val(icd[1])?,
                    auth_req: icd[2],
                    max_encryption_size: icd[3].into(),
                    initiator_key_distribution: icd[4],
                    responder_key_distribution: icd[5],
                })
            }
        }

        impl From<$name> for Command<$name> {
            fn from(pdu: $name) -> Self {
                Command::new($command_type, pdu)
            }
        }
    };
}

pairing_feature_pdu!(PairingRequest, CommandType::PairingRequest);

pairing_feature_pdu!(PairingResponse, CommandType::PairingResponse);

/// The agreement derived from the pairing request and pairing response
///
/// Every boolean feature is the logical *and* of the two feature sets and the encryption key size
/// is the smaller of the two maximums. The raw request and response PDUs are kept as they are
/// inputs to the confirm value and check value functions of the toolbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedFeatures {
    pub(crate) secure_connections: bool,
    pub(crate) bonding: bool,
    pub(crate) man_in_the_middle: bool,
    pub(crate) keypress: bool,
    pub(crate) ct2: bool,
    pub(crate) encryption_key_size: usize,
    pub(crate) initiator_key_distribution: u8,
    pub(crate) responder_key_distribution: u8,
    pub(crate) request_pdu: [u8; 7],
    pub(crate) response_pdu: [u8; 7],
    pub(crate) initiator_io_cap: [u8; 3],
    pub(crate) responder_io_cap: [u8; 3],
}

impl NegotiatedFeatures {
    /// Negotiate the features of a pairing procedure
    ///
    /// `local_min_key_size` is the policy of this device for the smallest acceptable encryption
    /// key. The error is the reason to put within the *pairing failed* PDU that rejects the
    /// negotiation.
    pub(crate) fn negotiate(
        request: &PairingRequest,
        response: &PairingResponse,
        local_min_key_size: usize,
    ) -> Result<Self, PairingFailedReason> {
        if !MAX_ENCRYPTION_SIZE_RANGE.contains(&request.get_max_encryption_size())
            || !MAX_ENCRYPTION_SIZE_RANGE.contains(&response.get_max_encryption_size())
        {
            return Err(PairingFailedReason::EncryptionKeySize);
        }

        let encryption_key_size = core::cmp::min(
            request.get_max_encryption_size(),
            response.get_max_encryption_size(),
        );

        if encryption_key_size < local_min_key_size {
            return Err(PairingFailedReason::EncryptionKeySize);
        }

        let secure_connections = request.is_secure_connections() && response.is_secure_connections();

        let bonding = request.is_bonding() && response.is_bonding();

        let mut initiator_key_distribution =
            request.initiator_key_dist_val() & response.initiator_key_dist_val();

        let mut responder_key_distribution =
            request.responder_key_dist_val() & response.responder_key_dist_val();

        if !bonding {
            // no keys are distributed without a bonding agreement
            initiator_key_distribution = 0;
            responder_key_distribution = 0;
        }

        if secure_connections {
            // the long term key is derived by both sides, never distributed
            initiator_key_distribution &= !ENC_KEY;
            responder_key_distribution &= !ENC_KEY;
        } else {
            // link key derivation requires a secure connections long term key
            initiator_key_distribution &= !LINK_KEY;
            responder_key_distribution &= !LINK_KEY;
        }

        Ok(NegotiatedFeatures {
            secure_connections,
            bonding,
            man_in_the_middle: request.is_man_in_the_middle_protected()
                && response.is_man_in_the_middle_protected(),
            keypress: request.is_keypress_enabled() && response.is_keypress_enabled(),
            ct2: request.is_ct2_set() && response.is_ct2_set(),
            encryption_key_size,
            initiator_key_distribution,
            responder_key_distribution,
            request_pdu: request.get_pdu(),
            response_pdu: response.get_pdu(),
            initiator_io_cap: request.get_io_cap(),
            responder_io_cap: response.get_io_cap(),
        })
    }

    pub fn is_secure_connections(&self) -> bool {
        self.secure_connections
    }

    pub fn is_bonding(&self) -> bool {
        self.bonding
    }

    pub fn is_man_in_the_middle_protected(&self) -> bool {
        self.man_in_the_middle
    }

    pub fn get_encryption_key_size(&self) -> usize {
        self.encryption_key_size
    }

    pub fn get_initiator_key_distribution(&self) -> &'static [KeyDistributions] {
        KeyDistributions::from_val(self.initiator_key_distribution)
    }

    pub fn get_responder_key_distribution(&self) -> &'static [KeyDistributions] {
        KeyDistributions::from_val(self.responder_key_distribution)
    }

    pub(crate) fn request_as_u128(&self) -> u128 {
        toolbox::pdu_as_u128(self.request_pdu)
    }

    pub(crate) fn response_as_u128(&self) -> u128 {
        toolbox::pdu_as_u128(self.response_pdu)
    }

    #[cfg(test)]
    pub(crate) fn just_works_for_test() -> Self {
        NegotiatedFeatures {
            secure_connections: true,
            bonding: true,
            man_in_the_middle: false,
            keypress: false,
            ct2: false,
            encryption_key_size: 16,
            initiator_key_distribution: 0,
            responder_key_distribution: 0,
            request_pdu: [0; 7],
            response_pdu: [0; 7],
            initiator_io_cap: [0; 3],
            responder_io_cap: [0; 3],
        }
    }
}

/// The confirm value PDU of pairing phase two
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingConfirm {
    value: u128,
}

impl PairingConfirm {
    pub(crate) fn new(value: u128) -> Self {
        PairingConfirm { value }
    }

    pub fn get_value(&self) -> u128 {
        self.value
    }
}

impl CommandData for PairingConfirm {
    fn into_command_format(self) -> heapless::Vec<u8, MAX_COMMAND_SIZE> {
        let mut ret = heapless::Vec::new();

        ret.extend_from_slice(&self.value.to_le_bytes()).ok();

        ret
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        if icd.len() != 16 {
            return Err(Error::Size);
        }

        let mut v = [0u8; 16];

        v.copy_from_slice(icd);

        Ok(PairingConfirm {
            value: <u128>::from_le_bytes(v),
        })
    }
}

impl From<PairingConfirm> for Command<PairingConfirm> {
    fn from(pc: PairingConfirm) -> Self {
        Command::new(CommandType::PairingConfirm, pc)
    }
}

/// The random value (nonce) PDU of pairing phase two
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingRandom {
    value: u128,
}

impl PairingRandom {
    pub(crate) fn new(value: u128) -> Self {
        PairingRandom { value }
    }

    pub fn get_value(&self) -> u128 {
        self.value
    }
}

impl CommandData for PairingRandom {
    fn into_command_format(self) -> heapless::Vec<u8, MAX_COMMAND_SIZE> {
        let mut ret = heapless::Vec::new();

        ret.extend_from_slice(&self.value.to_le_bytes()).ok();

        ret
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        if icd.len() != 16 {
            return Err(Error::Size);
        }

        let mut v = [0u8; 16];

        v.copy_from_slice(icd);

        Ok(PairingRandom {
            value: <u128>::from_le_bytes(v),
        })
    }
}

impl From<PairingRandom> for Command<PairingRandom> {
    fn from(pr: PairingRandom) -> Self {
        Command::new(CommandType::PairingRandom, pr)
    }
}

/// The reason within a *pairing failed* PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingFailedReason {
    PasskeyEntryFailed,
    OobNotAvailable,
    AuthenticationRequirements,
    ConfirmValueFailed,
    PairingNotSupported,
    EncryptionKeySize,
    CommandNotSupported,
    UnspecifiedReason,
    RepeatedAttempts,
    InvalidParameters,
    DhKeyCheckFailed,
    NumericComparisonFailed,
    BrEdrPairingInProgress,
    CrossTransportKeyDerivationGenerationNotAllowed,
}

impl PairingFailedReason {
    pub(crate) fn into_val(self) -> u8 {
        match self {
            PairingFailedReason::PasskeyEntryFailed => 0x1,
            PairingFailedReason::OobNotAvailable => 0x2,
            PairingFailedReason::AuthenticationRequirements => 0x3,
            PairingFailedReason::ConfirmValueFailed => 0x4,
            PairingFailedReason::PairingNotSupported => 0x5,
            PairingFailedReason::EncryptionKeySize => 0x6,
            PairingFailedReason::CommandNotSupported => 0x7,
            PairingFailedReason::UnspecifiedReason => 0x8,
            PairingFailedReason::RepeatedAttempts => 0x9,
            PairingFailedReason::InvalidParameters => 0xa,
            PairingFailedReason::DhKeyCheckFailed => 0xb,
            PairingFailedReason::NumericComparisonFailed => 0xc,
            PairingFailedReason::BrEdrPairingInProgress => 0xd,
            PairingFailedReason::CrossTransportKeyDerivationGenerationNotAllowed => 0xe,
        }
    }

    pub(crate) fn try_from_val(val: u8) -> Result<Self, Error> {
        match val {
            0x1 => Ok(PairingFailedReason::PasskeyEntryFailed),
            0x2 => Ok(PairingFailedReason::OobNotAvailable),
            0x3 => Ok(PairingFailedReason::AuthenticationRequirements),
            0x4 => Ok(PairingFailedReason::ConfirmValueFailed),
            0x5 => Ok(PairingFailedReason::PairingNotSupported),
            0x6 => Ok(PairingFailedReason::EncryptionKeySize),
            0x7 => Ok(PairingFailedReason::CommandNotSupported),
            0x8 => Ok(PairingFailedReason::UnspecifiedReason),
            0x9 => Ok(PairingFailedReason::RepeatedAttempts),
            0xa => Ok(PairingFailedReason::InvalidParameters),
            0xb => Ok(PairingFailedReason::DhKeyCheckFailed),
            0xc => Ok(PairingFailedReason::NumericComparisonFailed),
            0xd => Ok(PairingFailedReason::BrEdrPairingInProgress),
            0xe => Ok(PairingFailedReason::CrossTransportKeyDerivationGenerationNotAllowed),
            _ => Err(Error::Value),
        }
    }
}

impl core::fmt::Display for PairingFailedReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PairingFailedReason::PasskeyEntryFailed => f.write_str("passkey entry failed"),
            PairingFailedReason::OobNotAvailable => f.write_str("out of band data not available"),
            PairingFailedReason::AuthenticationRequirements => f.write_str("authentication requirements"),
            PairingFailedReason::ConfirmValueFailed => f.write_str("confirm value failed"),
            PairingFailedReason::PairingNotSupported => f.write_str("pairing not supported"),
            PairingFailedReason::EncryptionKeySize => f.write_str("encryption key size"),
            PairingFailedReason::CommandNotSupported => f.write_str("command not supported"),
            PairingFailedReason::UnspecifiedReason => f.write_str("unspecified reason"),
            PairingFailedReason::RepeatedAttempts => f.write_str("repeated attempts"),
            PairingFailedReason::InvalidParameters => f.write_str("invalid parameters"),
            PairingFailedReason::DhKeyCheckFailed => f.write_str("DH key check failed"),
            PairingFailedReason::NumericComparisonFailed => f.write_str("numeric comparison failed"),
            PairingFailedReason::BrEdrPairingInProgress => f.write_str("BR/EDR pairing in progress"),
            PairingFailedReason::CrossTransportKeyDerivationGenerationNotAllowed => {
                f.write_str("cross-transport key derivation/generation not allowed")
            }
        }
    }
}

/// The *pairing failed* PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingFailed {
    reason: PairingFailedReason,
}

impl PairingFailed {
    pub(crate) fn new(reason: PairingFailedReason) -> Self {
        PairingFailed { reason }
    }

    pub fn get_reason(&self) -> PairingFailedReason {
        self.reason
    }
}

impl CommandData for PairingFailed {
    fn into_command_format(self) -> heapless::Vec<u8, MAX_COMMAND_SIZE> {
        let mut ret = heapless::Vec::new();

        ret.push(self.reason.into_val()).ok();

        ret
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        if icd.len() != 1 {
            return Err(Error::Size);
        }

        Ok(PairingFailed {
            reason: PairingFailedReason::try_from_val(icd[0])?,
        })
    }
}

impl From<PairingFailed> for Command<PairingFailed> {
    fn from(pf: PairingFailed) -> Self {
        Command::new(CommandType::PairingFailed, pf)
    }
}

/// The public key exchange PDU of LE Secure Connections
///
/// The raw data is kept as transferred on-air (little endian x coordinate followed by little
/// endian y coordinate). Conversion into a usable key, which includes validating that the point
/// is on the P-256 curve, is done with the toolbox by the Security Managers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingPubKey {
    raw: [u8; 64],
}

impl PairingPubKey {
    pub(crate) fn new(raw: [u8; 64]) -> Self {
        PairingPubKey { raw }
    }

    pub(crate) fn get_raw(&self) -> &[u8; 64] {
        &self.raw
    }
}

impl CommandData for PairingPubKey {
    fn into_command_format(self) -> heapless::Vec<u8, MAX_COMMAND_SIZE> {
        let mut ret = heapless::Vec::new();

        ret.extend_from_slice(&self.raw).ok();

        ret
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        if icd.len() != 64 {
            return Err(Error::Size);
        }

        let mut raw = [0u8; 64];

        raw.copy_from_slice(icd);

        Ok(PairingPubKey { raw })
    }
}

impl From<PairingPubKey> for Command<PairingPubKey> {
    fn from(ppk: PairingPubKey) -> Self {
        Command::new(CommandType::PairingPublicKey, ppk)
    }
}

/// The DHKey check PDU of LE Secure Connections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingDhKeyCheck {
    check: u128,
}

impl PairingDhKeyCheck {
    pub(crate) fn new(check: u128) -> Self {
        PairingDhKeyCheck { check }
    }

    pub fn get_check_value(&self) -> u128 {
        self.check
    }
}

impl CommandData for PairingDhKeyCheck {
    fn into_command_format(self) -> heapless::Vec<u8, MAX_COMMAND_SIZE> {
        let mut ret = heapless::Vec::new();

        ret.extend_from_slice(&self.check.to_le_bytes()).ok();

        ret
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        if icd.len() != 16 {
            return Err(Error::Size);
        }

        let mut v = [0u8; 16];

        v.copy_from_slice(icd);

        Ok(PairingDhKeyCheck {
            check: <u128>::from_le_bytes(v),
        })
    }
}

impl From<PairingDhKeyCheck> for Command<PairingDhKeyCheck> {
    fn from(check: PairingDhKeyCheck) -> Self {
        Command::new(CommandType::PairingDHKeyCheck, check)
    }
}

/// A keypress notification sent during passkey entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPressNotification {
    PasskeyEntryStarted,
    PasskeyDigitEntered,
    PasskeyDigitErased,
    PasskeyCleared,
    PasskeyEntryCompleted,
}

impl KeyPressNotification {
    pub(crate) fn into_val(self) -> u8 {
        match self {
            KeyPressNotification::PasskeyEntryStarted => 0x0,
            KeyPressNotification::PasskeyDigitEntered => 0x1,
            KeyPressNotification::PasskeyDigitErased => 0x2,
            KeyPressNotification::PasskeyCleared => 0x3,
            KeyPressNotification::PasskeyEntryCompleted => 0x4,
        }
    }

    pub(crate) fn try_from_val(val: u8) -> Result<Self, Error> {
        match val {
            0x0 => Ok(KeyPressNotification::PasskeyEntryStarted),
            0x1 => Ok(KeyPressNotification::PasskeyDigitEntered),
            0x2 => Ok(KeyPressNotification::PasskeyDigitErased),
            0x3 => Ok(KeyPressNotification::PasskeyCleared),
            0x4 => Ok(KeyPressNotification::PasskeyEntryCompleted),
            _ => Err(Error::Value),
        }
    }
}

impl CommandData for KeyPressNotification {
    fn into_command_format(self) -> heapless::Vec<u8, MAX_COMMAND_SIZE> {
        let mut ret = heapless::Vec::new();

        ret.push(self.into_val()).ok();

        ret
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        if icd.len() != 1 {
            return Err(Error::Size);
        }

        Self::try_from_val(icd[0])
    }
}

impl From<KeyPressNotification> for Command<KeyPressNotification> {
    fn from(kpn: KeyPressNotification) -> Self {
        Command::new(CommandType::PairingKeyPressNotification, kpn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(auth_req: u8, max_key: usize, ikd: u8, rkd: u8) -> PairingRequest {
        PairingRequest::new(
            IoCapability::NoInputNoOutput,
            OobDataFlag::AuthenticationDataNotPresent,
            auth_req,
            max_key,
            ikd,
            rkd,
        )
    }

    fn response(auth_req: u8, max_key: usize, ikd: u8, rkd: u8) -> PairingResponse {
        PairingResponse::new(
            IoCapability::DisplayWithYesOrNo,
            OobDataFlag::AuthenticationDataNotPresent,
            auth_req,
            max_key,
            ikd,
            rkd,
        )
    }

    #[test]
    fn pairing_request_round_trip() {
        let pairing_request = request(0b101101, 16, ENC_KEY | ID_KEY, ID_KEY | SIGN_KEY);

        let icd = pairing_request.into_command_format();

        let parsed = PairingRequest::try_from_command_format(&icd).unwrap();

        assert_eq!(pairing_request, parsed);

        assert!(parsed.is_bonding());
        assert!(parsed.is_man_in_the_middle_protected());
        assert!(parsed.is_secure_connections());
        assert!(!parsed.is_keypress_enabled());
        assert!(parsed.is_ct2_set());
    }

    #[test]
    fn pairing_request_bad_io_capability() {
        let icd = [0x5, 0x0, 0b1001, 16, 0, 0];

        assert_eq!(
            Err(Error::Value),
            PairingRequest::try_from_command_format(&icd).map(|_| ())
        );
    }

    #[test]
    fn features_are_the_intersection() {
        // initiator: bonding + mitm + sc, responder: bonding + sc
        let req = request(0b1101, 16, ENC_KEY | ID_KEY | SIGN_KEY, ENC_KEY | ID_KEY | SIGN_KEY);
        let rsp = response(0b1001, 12, ENC_KEY | ID_KEY, ENC_KEY | SIGN_KEY);

        let features = NegotiatedFeatures::negotiate(&req, &rsp, 7).unwrap();

        assert!(features.is_secure_connections());
        assert!(features.is_bonding());
        assert!(!features.is_man_in_the_middle_protected());
        assert_eq!(12, features.get_encryption_key_size());

        // secure connections strips the encryption key from distribution
        assert_eq!(&[KeyDistributions::IdKey][..], features.get_initiator_key_distribution());
        assert_eq!(&[KeyDistributions::SignKey][..], features.get_responder_key_distribution());
    }

    #[test]
    fn legacy_distributes_the_encryption_key() {
        let req = request(0b0101, 16, ENC_KEY, ENC_KEY | ID_KEY | LINK_KEY);
        let rsp = response(0b0001, 16, ENC_KEY, ENC_KEY | LINK_KEY);

        let features = NegotiatedFeatures::negotiate(&req, &rsp, 7).unwrap();

        assert!(!features.is_secure_connections());

        assert_eq!(&[KeyDistributions::EncKey][..], features.get_initiator_key_distribution());

        // the link key cannot be derived without secure connections
        assert_eq!(&[KeyDistributions::EncKey][..], features.get_responder_key_distribution());
    }

    #[test]
    fn key_size_negotiation() {
        // a maximum below the protocol minimum
        let req = request(0b1001, 6, 0, 0);
        let rsp = response(0b1001, 16, 0, 0);

        assert_eq!(
            Err(PairingFailedReason::EncryptionKeySize),
            NegotiatedFeatures::negotiate(&req, &rsp, 7)
        );

        // below this device's policy
        let req = request(0b1001, 16, 0, 0);
        let rsp = response(0b1001, 10, 0, 0);

        assert_eq!(
            Err(PairingFailedReason::EncryptionKeySize),
            NegotiatedFeatures::negotiate(&req, &rsp, 16)
        );
    }

    #[test]
    fn pairing_failed_reason_round_trip() {
        for val in 0x1u8..=0xe {
            let reason = PairingFailedReason::try_from_val(val).unwrap();

            assert_eq!(val, reason.into_val());
        }

        assert_eq!(Err(Error::Value), PairingFailedReason::try_from_val(0).map(|_| ()));
        assert_eq!(Err(Error::Value), PairingFailedReason::try_from_val(0xf).map(|_| ()));
    }
}
