//! Bluetooth LE Security Manager
//!
//! The Security Manager is used to manage the pairing process and key distribution (bonding)
//! between two connected devices. There are separate Security Managers for the initiating device
//! and for the responding (non-initiating) device. These Security Managers can be found in the
//! [`initiator`](initiator) and [`responder`](responder) modules. Both Security Managers are
//! connection instance specific. They're only valid for a single connection and for the lifetime
//! of that connection. Keys generated from pairing and bonding must be retrieved from the Security
//! Managers and put in a separate database, the [`KeyStore`] trait is the interface to such a
//! database and [`MemoryKeyStore`] is a very basic implementation of it.
//!
//! Managing the Security Managers of multiple connections, along with the protocol timeout of
//! thirty seconds, is the job of the [`pool`](pool) module.
//!
//! ## Pairing Methods
//!
//! # Just Works
//! Just works is the simplest form of pairing as it provides no security against a man in the
//! middle attack. Both Security Managers support Just Works pairing by default.
//!
//! # Number Comparison
//! Both devices display six digits and the user confirms that they match. Only available when
//! both devices support LE Secure Connections. Enabled with
//! `enable_number_comparison` on a Security Manager builder.
//!
//! # Passkey
//! One device displays six digits and the user types them into the other device (or the user
//! types the same six digits into both). Enabled with `enable_passkey` on a Security Manager
//! builder.
//!
//! # Out of Band
//! Out of band pairing is done by using a man in the middle protected data connection that is out
//! of scope for the Bluetooth connection between the two devices. The interface used to transfer
//! the out of band data is out of scope for this library, the Security Managers only produce and
//! accept the data that crosses it.
//!
//! # Note
//! This library uses the following crates for parts of the encryption process.
//! * ['aes'](https://lib.rs/crates/aes)
//! * ['p256'](https://lib.rs/crates/p256)

#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;

use alloc::vec::Vec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub mod encrypt_info;
pub mod initiator;
pub mod io;
pub mod oob;
pub mod pairing;
pub mod pool;
pub mod responder;
pub mod timeout;
pub mod toolbox;

pub(crate) mod distribution;

/// A Bluetooth device address
///
/// The address is kept in the little endian order used on the link layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BluetoothDeviceAddress(pub [u8; 6]);

impl BluetoothDeviceAddress {
    /// Create an address set to all zeroes
    pub fn zeroed() -> Self {
        BluetoothDeviceAddress([0; 6])
    }
}

impl core::ops::Deref for BluetoothDeviceAddress {
    type Target = [u8; 6];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl core::ops::DerefMut for BluetoothDeviceAddress {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

const ENCRYPTION_KEY_MIN_SIZE: usize = 7;
const ENCRYPTION_KEY_MAX_SIZE: usize = 16;

/// The L2CAP channel identifier for the Security Manager protocol
pub const LE_SECURITY_MANAGER_CHANNEL_ID: u16 = 0x0006;

/// The interface to the logical link the Security Manager protocol runs over
///
/// A Security Manager does not own its connection, it is handed something that can put a Security
/// Manager PDU onto the air. The `pdu` given to `send_pdu` is a full command, the first byte is
/// the command code. How the PDU gets wrapped within a L2CAP basic frame for the channel
/// [`LE_SECURITY_MANAGER_CHANNEL_ID`] is up to the implementation.
pub trait SmpChannel {
    type SendErr;

    fn send_pdu(&mut self, pdu: &[u8]) -> impl core::future::Future<Output = Result<(), Self::SendErr>>;
}

/// An error within this library
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Incorrect size of a received command
    Size,
    /// Incorrect format of a received command
    Format,
    /// Incorrect value within a received command
    Value,
    /// Received a command that was not expected for the current pairing step
    IncorrectCommand {
        expected: Option<CommandType>,
        received: CommandType,
    },
    /// Feature or method is unsupported by this Security Manager
    UnsupportedFeature,
    /// The operation requires pairing to be in progress
    OperationRequiresPairing,
    /// The operation does not match the state of pairing
    OperationDoesNotMatchState,
    /// There is no room left for another pairing context
    PairingContextsExhausted,
    /// No pairing context exists for the connection handle
    UnknownConnection,
    /// The Security Manager is in an invalid state
    Invalid,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Size => f.write_str("size of received command is incorrect"),
            Error::Format => f.write_str("format of received command is incorrect"),
            Error::Value => f.write_str("value within received command is invalid"),
            Error::IncorrectCommand { expected, received } => write!(
                f,
                "incorrect command received (expected {:?}, received {:?})",
                expected, received
            ),
            Error::UnsupportedFeature => f.write_str("feature is unsupported by this security manager"),
            Error::OperationRequiresPairing => f.write_str("operation requires pairing to be in progress"),
            Error::OperationDoesNotMatchState => f.write_str("operation does not match the state of pairing"),
            Error::PairingContextsExhausted => f.write_str("no room left for another pairing context"),
            Error::UnknownConnection => f.write_str("no pairing context exists for the connection handle"),
            Error::Invalid => f.write_str("security manager is in an invalid state"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// The error type for a Security Manager
///
/// A Security Manager either fails from a protocol [`Error`] or an error generated by the
/// [`SmpChannel`] it sends PDUs with.
#[derive(Debug)]
pub enum SecurityManagerError<S> {
    Error(Error),
    Sender(S),
}

impl<S> From<Error> for SecurityManagerError<S> {
    fn from(e: Error) -> Self {
        SecurityManagerError::Error(e)
    }
}

impl<S: core::fmt::Debug> core::fmt::Display for SecurityManagerError<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SecurityManagerError::Error(e) => core::fmt::Display::fmt(e, f),
            SecurityManagerError::Sender(s) => write!(f, "failed to send PDU: {:?}", s),
        }
    }
}

/// The command code of a Security Manager PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    PairingRequest,
    PairingResponse,
    PairingConfirm,
    PairingRandom,
    PairingFailed,
    EncryptionInformation,
    CentralIdentification,
    IdentityInformation,
    IdentityAddressInformation,
    SigningInformation,
    SecurityRequest,
    PairingPublicKey,
    PairingDHKeyCheck,
    PairingKeyPressNotification,
}

impl CommandType {
    pub(crate) fn into_val(self) -> u8 {
        match self {
            CommandType::PairingRequest => 0x1,
            CommandType::PairingResponse => 0x2,
            CommandType::PairingConfirm => 0x3,
            CommandType::PairingRandom => 0x4,
            CommandType::PairingFailed => 0x5,
            CommandType::EncryptionInformation => 0x6,
            CommandType::CentralIdentification => 0x7,
            CommandType::IdentityInformation => 0x8,
            CommandType::IdentityAddressInformation => 0x9,
            CommandType::SigningInformation => 0xa,
            CommandType::SecurityRequest => 0xb,
            CommandType::PairingPublicKey => 0xc,
            CommandType::PairingDHKeyCheck => 0xd,
            CommandType::PairingKeyPressNotification => 0xe,
        }
    }

    pub(crate) fn try_from_val(val: u8) -> Result<Self, Error> {
        match val {
            0x1 => Ok(CommandType::PairingRequest),
            0x2 => Ok(CommandType::PairingResponse),
            0x3 => Ok(CommandType::PairingConfirm),
            0x4 => Ok(CommandType::PairingRandom),
            0x5 => Ok(CommandType::PairingFailed),
            0x6 => Ok(CommandType::EncryptionInformation),
            0x7 => Ok(CommandType::CentralIdentification),
            0x8 => Ok(CommandType::IdentityInformation),
            0x9 => Ok(CommandType::IdentityAddressInformation),
            0xa => Ok(CommandType::SigningInformation),
            0xb => Ok(CommandType::SecurityRequest),
            0xc => Ok(CommandType::PairingPublicKey),
            0xd => Ok(CommandType::PairingDHKeyCheck),
            0xe => Ok(CommandType::PairingKeyPressNotification),
            _ => Err(Error::Value),
        }
    }

    /// The expected length of the entire PDU, the command code included
    fn expected_len(self) -> usize {
        match self {
            CommandType::PairingRequest => 7,
            CommandType::PairingResponse => 7,
            CommandType::PairingConfirm => 17,
            CommandType::PairingRandom => 17,
            CommandType::PairingFailed => 2,
            CommandType::EncryptionInformation => 17,
            CommandType::CentralIdentification => 11,
            CommandType::IdentityInformation => 17,
            CommandType::IdentityAddressInformation => 8,
            CommandType::SigningInformation => 17,
            CommandType::SecurityRequest => 2,
            CommandType::PairingPublicKey => 65,
            CommandType::PairingDHKeyCheck => 17,
            CommandType::PairingKeyPressNotification => 2,
        }
    }

    /// Split a raw PDU into its command type and payload
    ///
    /// This validates both the command code and the length of the PDU for that code.
    pub(crate) fn try_from_pdu(pdu: &[u8]) -> Result<(Self, &[u8]), Error> {
        let code = *pdu.first().ok_or(Error::Size)?;

        let command_type = CommandType::try_from_val(code)?;

        if pdu.len() != command_type.expected_len() {
            return Err(Error::Size);
        }

        Ok((command_type, &pdu[1..]))
    }
}

/// The maximum size of a Security Manager PDU
///
/// The largest PDU is the Pairing Public Key command.
pub(crate) const MAX_COMMAND_SIZE: usize = 65;

/// Serialization and deserialization of the payload of a Security Manager command
pub(crate) trait CommandData
where
    Self: Sized,
{
    /// Convert into the interface formatted command data
    fn into_command_format(self) -> heapless::Vec<u8, MAX_COMMAND_SIZE>;

    /// Try to convert from the interface formatted command data
    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error>;
}

pub(crate) struct Command<D> {
    command_type: CommandType,
    data: D,
}

impl<D: core::fmt::Debug> core::fmt::Debug for Command<D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Command")
            .field("command_type", &self.command_type)
            .field("data", &self.data)
            .finish()
    }
}

impl<D> Command<D> {
    fn new(command_type: CommandType, data: D) -> Self {
        Command { command_type, data }
    }
}

impl<D: CommandData> Command<D> {
    fn into_command_format(self) -> heapless::Vec<u8, MAX_COMMAND_SIZE> {
        let mut command = heapless::Vec::new();

        // the payload is at most MAX_COMMAND_SIZE - 1 bytes so
        // both pushes are infallible
        command.push(self.command_type.into_val()).ok();

        command
            .extend_from_slice(&self.data.into_command_format())
            .ok();

        command
    }
}

/// The ability of a device to input or display a passkey
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasskeyAbility {
    None,
    DisplayWithInput,
    DisplayOnly,
    InputOnly,
}

impl PasskeyAbility {
    pub(crate) fn is_enabled(self) -> bool {
        self != PasskeyAbility::None
    }

    pub(crate) fn can_display(self) -> bool {
        matches!(self, PasskeyAbility::DisplayWithInput | PasskeyAbility::DisplayOnly)
    }

    pub(crate) fn can_input(self) -> bool {
        matches!(self, PasskeyAbility::DisplayWithInput | PasskeyAbility::InputOnly)
    }
}

/// Builder of a bonding key set
///
/// This is used within the closures given to the `distributed_bonding_keys` and
/// `accepted_bonding_keys` methods of a Security Manager builder to select which keys are part of
/// the key distribution of bonding.
pub struct EnabledBondingKeysBuilder {
    keys: u8,
}

impl EnabledBondingKeysBuilder {
    pub(crate) fn new() -> Self {
        EnabledBondingKeysBuilder { keys: 0 }
    }

    /// Enable the long term key (with its diversifier and random)
    ///
    /// This only has an effect for LE legacy pairing, a Secure Connections long term key is never
    /// distributed.
    pub fn enable_encryption_key(&mut self) -> &mut Self {
        self.keys |= pairing::ENC_KEY;
        self
    }

    /// Enable the identity resolving key and the identity address
    pub fn enable_identity_key(&mut self) -> &mut Self {
        self.keys |= pairing::ID_KEY;
        self
    }

    /// Enable the connection signature resolving key
    pub fn enable_signing_key(&mut self) -> &mut Self {
        self.keys |= pairing::SIGN_KEY;
        self
    }

    /// Enable derivation of the BR/EDR link key
    ///
    /// This requires Secure Connections pairing, the link key is derived from the long term key
    /// instead of being sent over the connection.
    pub fn enable_link_key(&mut self) -> &mut Self {
        self.keys |= pairing::LINK_KEY;
        self
    }

    pub(crate) fn val(&self) -> u8 {
        self.keys
    }
}

/// The direction of the passkey entry
///
/// When the pairing method is passkey entry, at least one of the devices needs to have the passkey
/// input by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasskeyDirection {
    InitiatorDisplaysResponderInputs,
    ResponderDisplaysInitiatorInputs,
    InitiatorAndResponderInput,
}

/// Direction of the out of band data transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OobDirection {
    OnlyInitiatorSendsOob,
    OnlyResponderSendsOob,
    BothSendOob,
}

/// The method used for pairing
///
/// The method is not directly picked, it is derived from the features exchanged within the pairing
/// request and pairing response (see the *Security in Bluetooth LE* part of the Bluetooth core
/// specification, section 2.3.5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingMethod {
    JustWorks,
    NumberComparison,
    PasskeyEntry(PasskeyDirection),
    Oob(OobDirection),
}

impl PairingMethod {
    /// Determine the pairing method from the exchanged features
    ///
    /// Out of band data takes precedence over everything else. When neither device requires man in
    /// the middle protection the method is always just works, otherwise the method comes from the
    /// input/output capability mapping table of the specification.
    pub(crate) fn determine_method(
        initiator_oob_data: pairing::OobDataFlag,
        responder_oob_data: pairing::OobDataFlag,
        initiator_io_cap: pairing::IoCapability,
        responder_io_cap: pairing::IoCapability,
        mitm_required: bool,
        is_legacy: bool,
    ) -> Self {
        use pairing::IoCapability::*;
        use pairing::OobDataFlag::Present;

        match (initiator_oob_data, responder_oob_data) {
            (Present, Present) => return PairingMethod::Oob(OobDirection::BothSendOob),

            // For secure connections one sided out of band data is enough. The flag indicates
            // that the *peer's* data is present, so a flag within the pairing request means the
            // responder was the sender.
            (Present, _) if !is_legacy => return PairingMethod::Oob(OobDirection::OnlyResponderSendsOob),
            (_, Present) if !is_legacy => return PairingMethod::Oob(OobDirection::OnlyInitiatorSendsOob),

            _ => (),
        }

        if !mitm_required {
            return PairingMethod::JustWorks;
        }

        match (initiator_io_cap, responder_io_cap) {
            (DisplayOnly, KeyboardOnly) | (DisplayOnly, KeyboardDisplay) => {
                PairingMethod::PasskeyEntry(PasskeyDirection::InitiatorDisplaysResponderInputs)
            }

            (DisplayWithYesOrNo, DisplayWithYesOrNo) if !is_legacy => PairingMethod::NumberComparison,

            (DisplayWithYesOrNo, KeyboardOnly) => {
                PairingMethod::PasskeyEntry(PasskeyDirection::InitiatorDisplaysResponderInputs)
            }

            (DisplayWithYesOrNo, KeyboardDisplay) => {
                if is_legacy {
                    PairingMethod::PasskeyEntry(PasskeyDirection::InitiatorDisplaysResponderInputs)
                } else {
                    PairingMethod::NumberComparison
                }
            }

            (KeyboardOnly, DisplayOnly) | (KeyboardOnly, DisplayWithYesOrNo) | (KeyboardOnly, KeyboardDisplay) => {
                PairingMethod::PasskeyEntry(PasskeyDirection::ResponderDisplaysInitiatorInputs)
            }

            (KeyboardOnly, KeyboardOnly) => PairingMethod::PasskeyEntry(PasskeyDirection::InitiatorAndResponderInput),

            (KeyboardDisplay, DisplayOnly) => {
                PairingMethod::PasskeyEntry(PasskeyDirection::ResponderDisplaysInitiatorInputs)
            }

            (KeyboardDisplay, DisplayWithYesOrNo) => {
                if is_legacy {
                    PairingMethod::PasskeyEntry(PasskeyDirection::ResponderDisplaysInitiatorInputs)
                } else {
                    PairingMethod::NumberComparison
                }
            }

            (KeyboardDisplay, KeyboardOnly) => {
                PairingMethod::PasskeyEntry(PasskeyDirection::InitiatorDisplaysResponderInputs)
            }

            (KeyboardDisplay, KeyboardDisplay) => {
                if is_legacy {
                    PairingMethod::PasskeyEntry(PasskeyDirection::ResponderDisplaysInitiatorInputs)
                } else {
                    PairingMethod::NumberComparison
                }
            }

            // every pair involving NoInputNoOutput or a display-only/display-only
            // combination falls back to just works
            _ => PairingMethod::JustWorks,
        }
    }

    /// Whether the method protects against a man in the middle attack
    pub fn is_authenticating(self) -> bool {
        !matches!(self, PairingMethod::JustWorks)
    }
}

/// The observable state of a pairing procedure
///
/// The states are coarse on purpose. They track where within the pairing process a Security
/// Manager is without exposing every protocol step, which is all that timer supervision and the
/// [`pool`](pool) need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    Idle,
    FeaturesExchanged,
    PublicKeyExchanged,
    DhKeyPending,
    ConfirmExchanged,
    DhKeyCheckPending,
    LegacyConfirmPending,
    EncryptionPending,
    KeyDistribution,
    Complete,
    Failed,
}

/// An encryption key produced by pairing
///
/// After phase two of pairing the initiator must start encryption of the connection with this key.
/// For LE legacy pairing this is the short term key and for LE Secure Connections this is the long
/// term key. The `ediv` and `rand` fields are always zero for a key freshly produced by pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionKey {
    pub key: u128,
    pub size: usize,
    pub ediv: u16,
    pub rand: u64,
}

/// A conflict between a freshly bonded device and an already stored bond
///
/// The peer distributed an identity that is already associated with keys in the
/// [`KeyStore`]. The user of the pool must decide whether the new bond replaces the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BondConflict {
    pub existing: IdentityAddress,
    pub incoming: IdentityAddress,
}

/// The output of processing a Security Manager event
///
/// Most of the time processing a PDU just advances pairing and the status is `None`, but whenever
/// the procedure needs something from the user, or finishes, the status says so.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// Pairing progressed without needing anything
    None,
    /// Pairing failed, either from a received *pairing failed* PDU or a failure detected locally
    PairingFailed(pairing::PairingFailedReason),
    /// The peer device sent a security request
    SecurityRequest(encrypt_info::SecurityRequest),
    /// Authentication of the connection completed, the initiator must now encrypt the connection
    /// with the returned key
    StartEncryption(EncryptionKey),
    /// Pairing completed, the connection is encrypted
    PairingComplete,
    /// Bonding keys were exchanged and are available from the Security Manager
    BondingComplete,
    /// The user must confirm that the displayed values match on both devices
    NumberComparison(io::CompareValue),
    /// The user must input a passkey
    PasskeyInput,
    /// The passkey must be displayed to the user
    PasskeyOutput(io::PasskeyOutput),
    /// The peer notified a keystroke of its passkey entry
    Keypress(pairing::KeyPressNotification),
    /// Out of band data from the peer device must be given to the Security Manager
    OutOfBandInput,
    /// The peer distributed its identity address
    ///
    /// Bonding pauses until the identity is accepted or rejected with
    /// [`resolve_peer_identity`](initiator::SecurityManager::resolve_peer_identity). The
    /// [`ContextPool`](pool::ContextPool) resolves this itself by checking its key store for a
    /// conflicting bond.
    PeerIdentity(IdentityAddress),
    /// The peer's identity collides with a bond already within the key store
    BondConflict(BondConflict),
}

/// Data generated and exchanged during pairing
///
/// This exists for the duration of the pairing procedure and is dropped, after its secrets are
/// wiped, when pairing completes or fails.
pub(crate) struct PairingData {
    pub method: PairingMethod,
    pub features: pairing::NegotiatedFeatures,
    pub private_key: Option<toolbox::PriKey>,
    pub public_key: Option<toolbox::PubKey>,
    pub peer_public_key: Option<toolbox::PubKey>,
    pub secret_key: Option<[u8; 32]>,
    pub nonce: u128,
    pub peer_nonce: Option<u128>,
    pub peer_confirm: Option<u128>,
    pub mac_key: Option<u128>,
    pub ltk: Option<u128>,
    /// LE legacy temporary key
    pub tk: Option<u128>,
    /// LE legacy short term key
    pub stk: Option<u128>,
    pub passkey: Option<u32>,
    pub passkey_round: usize,
    /// Local random within out of band data (*ra*/*rb* of this device)
    pub local_oob_random: u128,
    /// Peer random received within out of band data
    pub peer_oob_random: u128,
    /// A DHKey check received before this device was ready to process it
    pub peer_dh_key_check: Option<u128>,
}

impl PairingData {
    pub(crate) fn new(method: PairingMethod, features: pairing::NegotiatedFeatures) -> Self {
        PairingData {
            method,
            features,
            private_key: None,
            public_key: None,
            peer_public_key: None,
            secret_key: None,
            nonce: 0,
            peer_nonce: None,
            peer_confirm: None,
            mac_key: None,
            ltk: None,
            tk: None,
            stk: None,
            passkey: None,
            passkey_round: 0,
            local_oob_random: 0,
            peer_oob_random: 0,
            peer_dh_key_check: None,
        }
    }

    /// Wipe the secret material
    ///
    /// Every value that could be used to derive session or bonding keys is overwritten before the
    /// pairing data is discarded.
    pub(crate) fn clear_secrets(&mut self) {
        self.private_key = None;
        self.secret_key = Some([0; 32]);
        self.secret_key = None;
        self.nonce = 0;
        self.peer_nonce = None;
        self.mac_key = Some(0);
        self.mac_key = None;
        self.ltk = Some(0);
        self.ltk = None;
        self.tk = Some(0);
        self.tk = None;
        self.stk = Some(0);
        self.stk = None;
        self.passkey = None;
        self.local_oob_random = 0;
        self.peer_oob_random = 0;
        self.peer_dh_key_check = None;
    }
}

/// The identity address of a device
///
/// This is the address that identifies the device within bonding information, either the public
/// device address or the static random device address of the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum IdentityAddress {
    Public(BluetoothDeviceAddress),
    StaticRandom(BluetoothDeviceAddress),
}

impl IdentityAddress {
    pub fn get_address(self) -> BluetoothDeviceAddress {
        match self {
            IdentityAddress::Public(address) => address,
            IdentityAddress::StaticRandom(address) => address,
        }
    }

    pub fn is_public(self) -> bool {
        matches!(self, IdentityAddress::Public(_))
    }
}

/// The keys produced by pairing and bonding
///
/// The long term key is generated by pairing itself. The rest of the keys are optional and only
/// present when they were part of the negotiated key distribution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Keys {
    is_authenticated: bool,
    is_secure_connections: bool,
    ltk: Option<u128>,
    ediv: Option<u16>,
    rand: Option<u64>,
    irk: Option<u128>,
    identity: Option<IdentityAddress>,
    csrk: Option<(u128, u32)>,
    peer_irk: Option<u128>,
    peer_identity: Option<IdentityAddress>,
    peer_csrk: Option<(u128, u32)>,
    /// LE legacy long term key distributed by the initiator, used if the devices connect again
    /// with the roles swapped
    peer_ltk: Option<(u128, u16, u64)>,
    /// BR/EDR link key derived from the long term key
    link_key: Option<u128>,
}

impl Keys {
    pub(crate) fn new(is_authenticated: bool, is_secure_connections: bool) -> Self {
        Keys {
            is_authenticated,
            is_secure_connections,
            ..Default::default()
        }
    }

    /// Whether the keys came from an authenticated pairing method
    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated
    }

    /// Whether the keys were generated with LE Secure Connections
    pub fn is_secure_connections(&self) -> bool {
        self.is_secure_connections
    }

    /// Get the long term key
    pub fn get_ltk(&self) -> Option<u128> {
        self.ltk
    }

    /// Get the encryption diversifier
    ///
    /// This is always zero for keys made with LE Secure Connections.
    pub fn get_ediv(&self) -> Option<u16> {
        self.ediv
    }

    /// Get the encryption randomizer
    ///
    /// This is always zero for keys made with LE Secure Connections.
    pub fn get_rand(&self) -> Option<u64> {
        self.rand
    }

    /// Get this device's identity resolving key
    pub fn get_irk(&self) -> Option<u128> {
        self.irk
    }

    /// Get this device's identity address
    pub fn get_identity(&self) -> Option<IdentityAddress> {
        self.identity
    }

    /// Get this device's connection signature resolving key (with its sign counter)
    pub fn get_csrk(&self) -> Option<(u128, u32)> {
        self.csrk
    }

    /// Get the peer device's identity resolving key
    pub fn get_peer_irk(&self) -> Option<u128> {
        self.peer_irk
    }

    /// Get the peer device's identity address
    pub fn get_peer_identity(&self) -> Option<IdentityAddress> {
        self.peer_identity
    }

    /// Get the peer device's connection signature resolving key (with its sign counter)
    pub fn get_peer_csrk(&self) -> Option<(u128, u32)> {
        self.peer_csrk
    }

    /// Get the long term key distributed by the initiator
    pub fn get_peer_ltk(&self) -> Option<(u128, u16, u64)> {
        self.peer_ltk
    }

    /// Get the derived BR/EDR link key
    pub fn get_link_key(&self) -> Option<u128> {
        self.link_key
    }

    pub(crate) fn set_ltk(&mut self, ltk: u128) {
        self.ltk = ltk.into()
    }

    pub(crate) fn set_ediv_and_rand(&mut self, ediv: u16, rand: u64) {
        self.ediv = ediv.into();
        self.rand = rand.into();
    }

    pub(crate) fn set_irk(&mut self, irk: u128) {
        self.irk = irk.into()
    }

    pub(crate) fn set_identity(&mut self, identity: IdentityAddress) {
        self.identity = identity.into()
    }

    pub(crate) fn set_csrk(&mut self, csrk: u128) {
        self.csrk = (csrk, 0).into()
    }

    pub(crate) fn set_peer_irk(&mut self, irk: u128) {
        self.peer_irk = irk.into()
    }

    pub(crate) fn set_peer_identity(&mut self, identity: IdentityAddress) {
        self.peer_identity = identity.into()
    }

    pub(crate) fn set_peer_csrk(&mut self, csrk: u128) {
        self.peer_csrk = (csrk, 0).into()
    }

    pub(crate) fn set_peer_ltk(&mut self, ltk: u128, ediv: u16, rand: u64) {
        self.peer_ltk = (ltk, ediv, rand).into()
    }

    pub(crate) fn set_link_key(&mut self, link_key: u128) {
        self.link_key = link_key.into()
    }

    /// Try to resolve a resolvable private address with the peer's identity resolving key
    pub fn resolve_rpa(&self, address: BluetoothDeviceAddress) -> bool {
        let (prand, hash) = split_rpa(address);

        match (is_rpa(address), self.peer_irk) {
            (true, Some(irk)) => toolbox::ah(irk, prand) == hash,
            _ => false,
        }
    }
}

fn is_rpa(address: BluetoothDeviceAddress) -> bool {
    address.0[5] & 0xc0 == 0x40
}

fn split_rpa(address: BluetoothDeviceAddress) -> ([u8; 3], [u8; 3]) {
    let prand = [address.0[3], address.0[4], address.0[5]];
    let hash = [address.0[0], address.0[1], address.0[2]];

    (prand, hash)
}

/// The interface to a database of bonding keys
///
/// Entries are looked up by the identity address that the peer distributed during bonding. Every
/// method is fallible as the store may live behind flash or some other medium that can fail.
pub trait KeyStore {
    type Error: core::fmt::Debug;

    /// Get the keys bonded with the device identified by `identity`
    fn get(&self, identity: &IdentityAddress) -> Result<Option<Keys>, Self::Error>;

    /// Add or replace the keys for the peer identified within them
    fn put(&mut self, keys: Keys) -> Result<(), Self::Error>;

    /// Remove the keys bonded with the device identified by `identity`
    fn delete(&mut self, identity: &IdentityAddress) -> Result<(), Self::Error>;

    /// Find an entry that would conflict with a new bond for `identity`
    fn find_conflicting(&self, identity: &IdentityAddress) -> Result<Option<Keys>, Self::Error>;
}

/// A basic in-memory [`KeyStore`]
///
/// The entries are kept sorted by the peer identity address. This store does not persist anything,
/// it is mainly useful for tests and examples, but it can back a real application so long as
/// losing the bonds on shutdown is acceptable.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    entries: Vec<Keys>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        MemoryKeyStore::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Keys> {
        self.entries.iter()
    }

    fn search(&self, identity: &IdentityAddress) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|entry| entry.peer_identity.cmp(&Some(*identity)))
    }
}

impl KeyStore for MemoryKeyStore {
    type Error = core::convert::Infallible;

    fn get(&self, identity: &IdentityAddress) -> Result<Option<Keys>, Self::Error> {
        Ok(self.search(identity).ok().map(|index| self.entries[index].clone()))
    }

    fn put(&mut self, keys: Keys) -> Result<(), Self::Error> {
        let Some(identity) = keys.peer_identity else {
            return Ok(());
        };

        match self.search(&identity) {
            Ok(index) => self.entries[index] = keys,
            Err(index) => self.entries.insert(index, keys),
        }

        Ok(())
    }

    fn delete(&mut self, identity: &IdentityAddress) -> Result<(), Self::Error> {
        if let Ok(index) = self.search(identity) {
            self.entries.remove(index);
        }

        Ok(())
    }

    fn find_conflicting(&self, identity: &IdentityAddress) -> Result<Option<Keys>, Self::Error> {
        self.get(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pairing::{IoCapability, OobDataFlag};

    #[test]
    fn command_type_pdu_lengths() {
        for val in 0x1u8..=0xe {
            let command_type = CommandType::try_from_val(val).unwrap();

            assert_eq!(val, command_type.into_val());

            let mut pdu = alloc::vec![0u8; command_type.expected_len()];

            pdu[0] = val;

            let (parsed, payload) = CommandType::try_from_pdu(&pdu).unwrap();

            assert_eq!(command_type, parsed);
            assert_eq!(payload.len(), command_type.expected_len() - 1);
        }
    }

    #[test]
    fn bad_pdus() {
        assert_eq!(Err(Error::Size), CommandType::try_from_pdu(&[]).map(|_| ()));

        // reserved command code
        assert_eq!(Err(Error::Value), CommandType::try_from_pdu(&[0xff, 0]).map(|_| ()));

        // pairing confirm one byte short
        assert_eq!(
            Err(Error::Size),
            CommandType::try_from_pdu(&alloc::vec![0x3u8; 16]).map(|_| ())
        );
    }

    /// Every input combination must produce a method, and the method may never be number
    /// comparison for legacy pairing.
    #[test]
    fn method_selection_is_total() {
        let io_caps = [
            IoCapability::DisplayOnly,
            IoCapability::DisplayWithYesOrNo,
            IoCapability::KeyboardOnly,
            IoCapability::NoInputNoOutput,
            IoCapability::KeyboardDisplay,
        ];

        let oob_flags = [
            OobDataFlag::AuthenticationDataNotPresent,
            OobDataFlag::Present,
        ];

        for init_oob in oob_flags {
            for rsp_oob in oob_flags {
                for init_io in io_caps {
                    for rsp_io in io_caps {
                        for mitm in [false, true] {
                            for legacy in [false, true] {
                                let method = PairingMethod::determine_method(
                                    init_oob, rsp_oob, init_io, rsp_io, mitm, legacy,
                                );

                                if legacy {
                                    assert_ne!(method, PairingMethod::NumberComparison);
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn method_selection_well_known_pairs() {
        use OobDataFlag::AuthenticationDataNotPresent as NoOob;

        // no input and no output can only do just works
        assert_eq!(
            PairingMethod::JustWorks,
            PairingMethod::determine_method(
                NoOob,
                NoOob,
                IoCapability::NoInputNoOutput,
                IoCapability::KeyboardDisplay,
                true,
                false,
            )
        );

        // two displays with yes/no do number comparison under secure connections
        assert_eq!(
            PairingMethod::NumberComparison,
            PairingMethod::determine_method(
                NoOob,
                NoOob,
                IoCapability::DisplayWithYesOrNo,
                IoCapability::DisplayWithYesOrNo,
                true,
                false,
            )
        );

        // but fall back to just works for legacy
        assert_eq!(
            PairingMethod::JustWorks,
            PairingMethod::determine_method(
                NoOob,
                NoOob,
                IoCapability::DisplayWithYesOrNo,
                IoCapability::DisplayWithYesOrNo,
                true,
                true,
            )
        );

        // keyboard against display is passkey with the keyboard side inputting
        assert_eq!(
            PairingMethod::PasskeyEntry(PasskeyDirection::InitiatorDisplaysResponderInputs),
            PairingMethod::determine_method(
                NoOob,
                NoOob,
                IoCapability::DisplayOnly,
                IoCapability::KeyboardOnly,
                true,
                false,
            )
        );

        // one sided out of band data selects oob for secure connections
        assert_eq!(
            PairingMethod::Oob(OobDirection::OnlyResponderSendsOob),
            PairingMethod::determine_method(
                OobDataFlag::Present,
                NoOob,
                IoCapability::NoInputNoOutput,
                IoCapability::NoInputNoOutput,
                false,
                false,
            )
        );

        // but legacy needs the data on both sides
        assert_eq!(
            PairingMethod::JustWorks,
            PairingMethod::determine_method(
                OobDataFlag::Present,
                NoOob,
                IoCapability::NoInputNoOutput,
                IoCapability::NoInputNoOutput,
                false,
                true,
            )
        );
    }

    #[test]
    fn memory_key_store() {
        let mut store = MemoryKeyStore::new();

        let identity_a = IdentityAddress::Public(BluetoothDeviceAddress([1, 2, 3, 4, 5, 6]));
        let identity_b = IdentityAddress::StaticRandom(BluetoothDeviceAddress([6, 5, 4, 3, 2, 1]));

        let mut keys_a = Keys::new(true, true);
        keys_a.set_ltk(0x1234);
        keys_a.set_peer_identity(identity_a);

        let mut keys_b = Keys::new(false, true);
        keys_b.set_ltk(0x5678);
        keys_b.set_peer_identity(identity_b);

        store.put(keys_a.clone()).unwrap();
        store.put(keys_b.clone()).unwrap();

        assert_eq!(Some(keys_a.clone()), store.get(&identity_a).unwrap());
        assert_eq!(Some(keys_b), store.get(&identity_b).unwrap());

        assert_eq!(Some(keys_a), store.find_conflicting(&identity_a).unwrap());

        store.delete(&identity_a).unwrap();

        assert_eq!(None, store.get(&identity_a).unwrap());
        assert!(store.find_conflicting(&identity_a).unwrap().is_none());
    }

    #[test]
    fn pairing_data_secrets_are_wiped() {
        let features = pairing::NegotiatedFeatures::just_works_for_test();

        let mut pairing_data = PairingData::new(PairingMethod::JustWorks, features);

        pairing_data.secret_key = Some([0xau8; 32]);
        pairing_data.nonce = 0x1234;
        pairing_data.peer_nonce = Some(0x4321);
        pairing_data.mac_key = Some(0xabcd);
        pairing_data.ltk = Some(0xdcba);
        pairing_data.tk = Some(0xffff);
        pairing_data.stk = Some(0xeeee);
        pairing_data.passkey = Some(123456);

        pairing_data.clear_secrets();

        assert!(pairing_data.secret_key.is_none());
        assert_eq!(0, pairing_data.nonce);
        assert!(pairing_data.peer_nonce.is_none());
        assert!(pairing_data.mac_key.is_none());
        assert!(pairing_data.ltk.is_none());
        assert!(pairing_data.tk.is_none());
        assert!(pairing_data.stk.is_none());
        assert!(pairing_data.passkey.is_none());
    }

    #[test]
    fn resolvable_private_address() {
        let irk = 0x0123_4567_89ab_cdef_0123_4567_89ab_cdef;

        let prand = [0x11, 0x22, 0x41];

        let hash = toolbox::ah(irk, prand);

        let address =
            BluetoothDeviceAddress([hash[0], hash[1], hash[2], prand[0], prand[1], prand[2]]);

        let mut keys = Keys::new(false, true);

        keys.set_peer_irk(irk);

        assert!(keys.resolve_rpa(address));

        keys.set_peer_irk(irk.wrapping_add(1));

        assert!(!keys.resolve_rpa(address));
    }
}
