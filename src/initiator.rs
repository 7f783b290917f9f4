//! Initiating side of the Security Manager
//!
//! The initiating Security Manager starts pairing by sending the pairing request and it drives
//! the procedure from there. It is the central's Security Manager, the peer on the other side of
//! the connection runs a [`responder`](crate::responder) Security Manager.
//!
//! # Builder
//! An initiating [`SecurityManager`] is created from a [`SecurityManagerBuilder`]. The builder
//! configures the pairing methods available to the Security Manager and the bonding keys it
//! distributes and accepts. The default configuration can only perform *just works* pairing,
//! every other method requires some kind of user interaction so each must be deliberately
//! enabled.
//!
//! ```
//! use ble_smp::initiator::SecurityManagerBuilder;
//! # use ble_smp::BluetoothDeviceAddress;
//! # let this_address = BluetoothDeviceAddress::zeroed();
//! # let peer_address = BluetoothDeviceAddress::zeroed();
//!
//! let security_manager = SecurityManagerBuilder::new(peer_address, this_address, true, true)
//!     .enable_number_comparison()
//!     .build();
//! ```
//!
//! # Usage
//! Pairing begins with [`start_pairing`] and every Security Manager PDU received on the SMP
//! channel afterwards is given to [`process_command`]. Both return a [`Status`] which is how the
//! Security Manager asks for user interaction (passkeys, number comparison, out of band data) and
//! reports the completion or failure of pairing. When the status is
//! [`StartEncryption`](Status::StartEncryption) the link must be encrypted with the returned key
//! and the result of that reported back with [`encryption_changed`].
//!
//! [`start_pairing`]: SecurityManager::start_pairing
//! [`process_command`]: SecurityManager::process_command
//! [`encryption_changed`]: SecurityManager::encryption_changed

use crate::distribution::{KeyDistManager, KeyPdu, LocalKeys};
use crate::encrypt_info::AuthRequirements;
use crate::pairing::{IoCapability, OobDataFlag, PairingFailedReason};
use crate::{
    io, oob, pairing, toolbox, BluetoothDeviceAddress, Command, CommandData, CommandType, EnabledBondingKeysBuilder,
    EncryptionKey, Error, IdentityAddress, Keys, OobDirection, PairingData, PairingMethod, PairingState,
    PasskeyAbility, PasskeyDirection, SecurityManagerError, SmpChannel, Status,
};

macro_rules! error {
    ($channel:ty) => {
        crate::SecurityManagerError<<$channel as crate::SmpChannel>::SendErr>
    };
}

async fn send<C, Cmd, P>(channel: &mut C, command: Cmd) -> Result<(), error!(C)>
where
    C: SmpChannel,
    Cmd: Into<Command<P>>,
    P: CommandData,
{
    let pdu = command.into().into_command_format();

    channel.send_pdu(&pdu).await.map_err(SecurityManagerError::Sender)
}

/// The fine grained step of the initiator within pairing
///
/// This is projected onto the coarse [`PairingState`] for the public API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Idle,
    AwaitResponse,
    AwaitPublicKey,
    AwaitConfirm,
    AwaitRandom,
    AwaitUserInput,
    AwaitDhKeyCheck,
    AwaitLegacyConfirm,
    AwaitLegacyRandom,
    AwaitEncryption,
    KeyDistribution,
    Complete,
    Failed,
}

/// Builder of an initiating [`SecurityManager`]
pub struct SecurityManagerBuilder {
    encryption_key_min: usize,
    encryption_key_max: usize,
    remote_address: BluetoothDeviceAddress,
    this_address: BluetoothDeviceAddress,
    remote_address_is_random: bool,
    this_address_is_random: bool,
    allow_just_works: bool,
    enable_number_comparison: bool,
    enable_passkey: PasskeyAbility,
    oob_send: bool,
    oob_receive: bool,
    can_bond: bool,
    secure_connections_only: bool,
    accept_debug_public_key: bool,
    distributed_bonding_keys: u8,
    accepted_bonding_keys: u8,
    identity: Option<IdentityAddress>,
    irk: Option<u128>,
    csrk: Option<u128>,
}

impl SecurityManagerBuilder {
    /// Create a new `SecurityManagerBuilder`
    ///
    /// The addresses are the ones used for the connection, with the flags indicating whether each
    /// is a random device address. They are inputs to the confirm and check values of pairing so
    /// both Security Managers must agree on them exactly.
    pub fn new(
        connected_device_address: BluetoothDeviceAddress,
        this_device_address: BluetoothDeviceAddress,
        is_connected_devices_address_random: bool,
        is_this_devices_address_random: bool,
    ) -> Self {
        SecurityManagerBuilder {
            encryption_key_min: crate::ENCRYPTION_KEY_MIN_SIZE,
            encryption_key_max: crate::ENCRYPTION_KEY_MAX_SIZE,
            remote_address: connected_device_address,
            this_address: this_device_address,
            remote_address_is_random: is_connected_devices_address_random,
            this_address_is_random: is_this_devices_address_random,
            allow_just_works: true,
            enable_number_comparison: false,
            enable_passkey: PasskeyAbility::None,
            oob_send: false,
            oob_receive: false,
            can_bond: true,
            secure_connections_only: false,
            accept_debug_public_key: false,
            distributed_bonding_keys: pairing::ENC_KEY | pairing::ID_KEY | pairing::SIGN_KEY,
            accepted_bonding_keys: pairing::ENC_KEY | pairing::ID_KEY | pairing::SIGN_KEY,
            identity: None,
            irk: None,
            csrk: None,
        }
    }

    /// Disable *just works* pairing
    ///
    /// Pairing fails with the reason *authentication requirements* whenever the negotiated
    /// features would resolve to just works. At least one authenticated method must be enabled or
    /// the built Security Manager cannot pair at all.
    pub fn disable_just_works(mut self) -> Self {
        self.allow_just_works = false;
        self
    }

    /// Enable number comparison
    ///
    /// This requires a display and a yes-no input on this device. Number comparison only exists
    /// for Secure Connections.
    pub fn enable_number_comparison(mut self) -> Self {
        self.enable_number_comparison = true;
        self
    }

    /// Enable passkey entry
    ///
    /// The ability determines whether this device displays the passkey, has it input by the user,
    /// or both.
    pub fn enable_passkey(mut self, ability: PasskeyAbility) -> Self {
        self.enable_passkey = ability;
        self
    }

    /// Enable the sending of out of band data
    ///
    /// The data to transfer is generated with
    /// [`out_of_band_data`](SecurityManager::out_of_band_data), moving it across the out of band
    /// interface is up to the application.
    pub fn enable_oob_sending(mut self) -> Self {
        self.oob_send = true;
        self
    }

    /// Enable the receiving of out of band data
    ///
    /// During pairing the Security Manager will ask for the peer's out of band data with
    /// [`Status::OutOfBandInput`].
    pub fn enable_oob_receiving(mut self) -> Self {
        self.oob_receive = true;
        self
    }

    /// Disable bonding
    ///
    /// Pairing will still produce an encryption key for the connection, but no bonding keys are
    /// distributed and nothing is kept after the procedure.
    pub fn disable_bonding(mut self) -> Self {
        self.can_bond = false;
        self
    }

    /// Require LE Secure Connections
    ///
    /// Pairing with a peer that only supports LE legacy pairing fails with the reason
    /// *authentication requirements*.
    pub fn secure_connections_only(mut self) -> Self {
        self.secure_connections_only = true;
        self
    }

    /// Accept the spec defined debug public key from the peer
    ///
    /// By default pairing fails when the peer uses the debug key, as anything sniffing the
    /// connection can derive the resulting encryption keys. This should only be enabled while
    /// debugging against a protocol analyzer.
    pub fn accept_debug_public_key(mut self) -> Self {
        self.accept_debug_public_key = true;
        self
    }

    /// Set the range of acceptable encryption key sizes
    ///
    /// Values are clamped to the protocol range of seven to sixteen bytes. Pairing fails with the
    /// reason *encryption key size* when the negotiated size falls below `min`.
    pub fn set_encryption_key_size_range(mut self, min: usize, max: usize) -> Self {
        self.encryption_key_min = min.clamp(crate::ENCRYPTION_KEY_MIN_SIZE, crate::ENCRYPTION_KEY_MAX_SIZE);
        self.encryption_key_max = max.clamp(self.encryption_key_min, crate::ENCRYPTION_KEY_MAX_SIZE);
        self
    }

    /// Set the identity address distributed during bonding
    ///
    /// Without this the connection address of this device is distributed as the identity.
    pub fn set_identity(mut self, identity: IdentityAddress) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Set the identity resolving key distributed during bonding
    ///
    /// Without this a fresh key is generated for every pairing.
    pub fn set_irk(mut self, irk: u128) -> Self {
        self.irk = Some(irk);
        self
    }

    /// Set the connection signature resolving key distributed during bonding
    ///
    /// Without this a fresh key is generated for every pairing.
    pub fn set_csrk(mut self, csrk: u128) -> Self {
        self.csrk = Some(csrk);
        self
    }

    /// Select the bonding keys sent by this Security Manager
    pub fn distributed_bonding_keys<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut EnabledBondingKeysBuilder) -> &mut EnabledBondingKeysBuilder,
    {
        let mut builder = EnabledBondingKeysBuilder::new();

        self.distributed_bonding_keys = f(&mut builder).val();

        self
    }

    /// Select the bonding keys accepted from the peer device
    pub fn accepted_bonding_keys<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut EnabledBondingKeysBuilder) -> &mut EnabledBondingKeysBuilder,
    {
        let mut builder = EnabledBondingKeysBuilder::new();

        self.accepted_bonding_keys = f(&mut builder).val();

        self
    }

    fn io_capability(&self) -> IoCapability {
        match (self.enable_number_comparison, self.enable_passkey) {
            (true, PasskeyAbility::None) => IoCapability::DisplayWithYesOrNo,
            (true, _) => IoCapability::KeyboardDisplay,
            (false, PasskeyAbility::DisplayWithInput) => IoCapability::KeyboardDisplay,
            (false, PasskeyAbility::DisplayOnly) => IoCapability::DisplayOnly,
            (false, PasskeyAbility::InputOnly) => IoCapability::KeyboardOnly,
            (false, PasskeyAbility::None) => IoCapability::NoInputNoOutput,
        }
    }

    fn auth_req(&self) -> u8 {
        let mut requirements = alloc::vec![AuthRequirements::Sc];

        if self.can_bond {
            requirements.push(AuthRequirements::Bonding);
        }

        if self.enable_number_comparison || self.enable_passkey.is_enabled() || self.oob_send || self.oob_receive {
            requirements.push(AuthRequirements::ManInTheMiddleProtection);
        }

        if (self.distributed_bonding_keys | self.accepted_bonding_keys) & pairing::LINK_KEY != 0 {
            requirements.push(AuthRequirements::Ct2);
        }

        AuthRequirements::make_auth_req_val(&requirements)
    }

    /// Create the [`SecurityManager`]
    pub fn build(self) -> SecurityManager {
        let io_capability = self.io_capability();

        let auth_req = self.auth_req();

        SecurityManager {
            io_capability,
            auth_req,
            encryption_key_min: self.encryption_key_min,
            encryption_key_max: self.encryption_key_max,
            remote_address: self.remote_address,
            this_address: self.this_address,
            remote_address_is_random: self.remote_address_is_random,
            this_address_is_random: self.this_address_is_random,
            allow_just_works: self.allow_just_works,
            secure_connections_only: self.secure_connections_only,
            accept_debug_public_key: self.accept_debug_public_key,
            oob_send: self.oob_send,
            oob_receive: self.oob_receive,
            distributed_bonding_keys: self.distributed_bonding_keys,
            accepted_bonding_keys: self.accepted_bonding_keys,
            identity: self.identity,
            irk: self.irk,
            csrk: self.csrk,
            pairing_request: None,
            pairing_data: None,
            keys: None,
            key_dist: None,
            local_keys: None,
            oob_key_pair: None,
            oob_random: 0,
            link_encrypted: false,
            step: Step::Idle,
        }
    }
}

/// The Security Manager of the pairing initiator
///
/// This is a per connection state machine. It never reads the clock and never touches the radio
/// on its own, PDUs go out through the [`SmpChannel`] it is given and timeout supervision is left
/// to the owner (see [`PairingTimer`](crate::timeout::PairingTimer) or the
/// [`pool`](crate::pool)).
pub struct SecurityManager {
    io_capability: IoCapability,
    auth_req: u8,
    encryption_key_min: usize,
    encryption_key_max: usize,
    remote_address: BluetoothDeviceAddress,
    this_address: BluetoothDeviceAddress,
    remote_address_is_random: bool,
    this_address_is_random: bool,
    allow_just_works: bool,
    secure_connections_only: bool,
    accept_debug_public_key: bool,
    oob_send: bool,
    oob_receive: bool,
    distributed_bonding_keys: u8,
    accepted_bonding_keys: u8,
    identity: Option<IdentityAddress>,
    irk: Option<u128>,
    csrk: Option<u128>,
    pairing_request: Option<pairing::PairingRequest>,
    pairing_data: Option<PairingData>,
    keys: Option<Keys>,
    key_dist: Option<KeyDistManager>,
    local_keys: Option<LocalKeys>,
    oob_key_pair: Option<(toolbox::PriKey, toolbox::PubKey)>,
    oob_random: u128,
    link_encrypted: bool,
    step: Step,
}

impl SecurityManager {
    /// Get the keys of the last successful bonding
    pub fn get_keys(&self) -> Option<&Keys> {
        self.keys.as_ref()
    }

    /// Get the coarse state of pairing
    pub fn state(&self) -> PairingState {
        let legacy = self
            .pairing_data
            .as_ref()
            .map(|pairing_data| !pairing_data.features.is_secure_connections())
            .unwrap_or_default();

        match self.step {
            Step::Idle => PairingState::Idle,
            Step::AwaitResponse => PairingState::FeaturesExchanged,
            Step::AwaitPublicKey => PairingState::PublicKeyExchanged,
            Step::AwaitConfirm => PairingState::DhKeyPending,
            Step::AwaitRandom => PairingState::ConfirmExchanged,
            Step::AwaitUserInput if legacy => PairingState::LegacyConfirmPending,
            Step::AwaitUserInput => PairingState::DhKeyPending,
            Step::AwaitDhKeyCheck => PairingState::DhKeyCheckPending,
            Step::AwaitLegacyConfirm | Step::AwaitLegacyRandom => PairingState::LegacyConfirmPending,
            Step::AwaitEncryption => PairingState::EncryptionPending,
            Step::KeyDistribution => PairingState::KeyDistribution,
            Step::Complete => PairingState::Complete,
            Step::Failed => PairingState::Failed,
        }
    }

    /// Check whether a pairing procedure is in progress
    pub fn is_pairing(&self) -> bool {
        !matches!(self.step, Step::Idle | Step::Complete | Step::Failed)
    }

    /// Check whether the link was reported as encrypted
    pub fn is_link_encrypted(&self) -> bool {
        self.link_encrypted
    }

    /// Whether the Security Manager is waiting on a PDU from the peer
    ///
    /// This is what drives the protocol timeout, the timer runs exactly while a response from the
    /// peer is outstanding.
    pub(crate) fn is_awaiting_peer(&self) -> bool {
        match self.step {
            Step::AwaitResponse
            | Step::AwaitPublicKey
            | Step::AwaitConfirm
            | Step::AwaitRandom
            | Step::AwaitDhKeyCheck
            | Step::AwaitLegacyConfirm
            | Step::AwaitLegacyRandom => true,
            Step::KeyDistribution => self
                .key_dist
                .as_ref()
                .map(|key_dist| !key_dist.is_receiving_done())
                .unwrap_or_default(),
            _ => false,
        }
    }

    /// Fail pairing because the protocol timeout expired
    ///
    /// Nothing is sent to the peer, the timeout is a silent failure.
    pub(crate) fn on_timeout(&mut self) {
        log::error!("(SM) pairing timed out");

        self.reset_pairing();

        self.step = Step::Failed;
    }

    /// Reset the Security Manager for a fresh connection
    pub fn reset(&mut self) {
        self.reset_pairing();

        self.link_encrypted = false;

        self.step = Step::Idle;
    }

    fn reset_pairing(&mut self) {
        if let Some(pairing_data) = self.pairing_data.as_mut() {
            pairing_data.clear_secrets();
        }

        self.pairing_data = None;
        self.pairing_request = None;
        self.key_dist = None;
        self.local_keys = None;
    }

    async fn fail<C>(&mut self, channel: &mut C, reason: PairingFailedReason) -> Result<Status, error!(C)>
    where
        C: SmpChannel,
    {
        log::error!("(SM) pairing failed: {}", reason);

        self.reset_pairing();

        self.step = Step::Failed;

        send(channel, pairing::PairingFailed::new(reason)).await?;

        Ok(Status::PairingFailed(reason))
    }

    /// Generate the out of band data of this Security Manager
    ///
    /// The returned data must be moved to the peer device over the out of band interface before
    /// pairing begins. The public key committed to by the data is kept and used for the key
    /// exchange of the following pairing procedure.
    ///
    /// # Error
    /// The builder must have enabled the sending of out of band data.
    pub fn out_of_band_data(&mut self) -> Result<oob::OobData, Error> {
        if !self.oob_send {
            return Err(Error::UnsupportedFeature);
        }

        let (private_key, public_key) = toolbox::ecc_gen();

        let random = toolbox::nonce();

        let x = toolbox::pub_key_x_coord(&public_key);

        let confirm = toolbox::f4(&x, &x, random, 0);

        self.oob_key_pair = Some((private_key, public_key));

        self.oob_random = random;

        Ok(oob::OobData {
            address: self.this_address,
            random,
            confirm,
        })
    }

    /// Start pairing with the connected device
    ///
    /// This sends the pairing request. Any prior pairing procedure on the connection is
    /// abandoned.
    pub async fn start_pairing<C>(&mut self, channel: &mut C) -> Result<Status, error!(C)>
    where
        C: SmpChannel,
    {
        self.reset_pairing();

        let oob_data_flag = if self.oob_receive {
            OobDataFlag::Present
        } else {
            OobDataFlag::AuthenticationDataNotPresent
        };

        let request = pairing::PairingRequest::new(
            self.io_capability,
            oob_data_flag,
            self.auth_req,
            self.encryption_key_max,
            self.distributed_bonding_keys,
            self.accepted_bonding_keys,
        );

        self.pairing_request = Some(request);

        self.step = Step::AwaitResponse;

        log::info!("(SM) initiator: sending pairing request");

        send(channel, request).await?;

        Ok(Status::None)
    }

    /// Process a Security Manager PDU from the connected device
    pub async fn process_command<C>(&mut self, channel: &mut C, pdu: &[u8]) -> Result<Status, error!(C)>
    where
        C: SmpChannel,
    {
        if self.step == Step::Failed {
            log::trace!("(SM) ignoring PDU after failed pairing");

            return Ok(Status::None);
        }

        let (command, payload) = match CommandType::try_from_pdu(pdu) {
            Ok(split) => split,
            Err(Error::Value) => {
                log::error!("(SM) received unknown command code");

                return self.fail(channel, PairingFailedReason::CommandNotSupported).await;
            }
            Err(e) => {
                log::error!("(SM) received malformed PDU: {}", e);

                return self.fail(channel, PairingFailedReason::InvalidParameters).await;
            }
        };

        log::trace!("(SM) initiator: received {:?}", command);

        if command == CommandType::PairingFailed {
            let reason = pairing::PairingFailed::try_from_command_format(payload)
                .map(|failed| failed.get_reason())
                .unwrap_or(PairingFailedReason::UnspecifiedReason);

            log::error!("(SM) peer failed pairing: {}", reason);

            self.reset_pairing();

            self.step = Step::Failed;

            return Ok(Status::PairingFailed(reason));
        }

        match (self.step, command) {
            (Step::Idle | Step::Complete, CommandType::SecurityRequest) => self.p_security_request(payload),
            (_, CommandType::SecurityRequest) => {
                // a security request during pairing is ignored (v5.0 | Vol 3, Part H, 2.4.6)
                Ok(Status::None)
            }
            (Step::AwaitResponse, CommandType::PairingResponse) => self.p_pairing_response(channel, payload).await,
            (Step::AwaitPublicKey, CommandType::PairingPublicKey) => {
                self.p_pairing_public_key(channel, payload).await
            }
            (Step::AwaitConfirm, CommandType::PairingConfirm) => self.p_pairing_confirm(channel, payload).await,
            (Step::AwaitRandom, CommandType::PairingRandom) => self.p_pairing_random(channel, payload).await,
            (Step::AwaitDhKeyCheck, CommandType::PairingDHKeyCheck) => {
                self.p_pairing_dh_key_check(channel, payload).await
            }
            (Step::AwaitLegacyConfirm, CommandType::PairingConfirm) => self.p_legacy_confirm(channel, payload).await,
            (Step::AwaitLegacyRandom, CommandType::PairingRandom) => self.p_legacy_random(channel, payload).await,
            (
                Step::KeyDistribution,
                CommandType::EncryptionInformation
                | CommandType::CentralIdentification
                | CommandType::IdentityInformation
                | CommandType::IdentityAddressInformation
                | CommandType::SigningInformation,
            ) => self.p_key_distribution(channel, command, payload).await,
            (_, CommandType::PairingKeyPressNotification) => Ok(self.p_keypress_notification(payload)),
            (step, command) => {
                log::error!("(SM) received {:?} in step {:?}", command, step);

                self.fail(channel, PairingFailedReason::UnspecifiedReason).await
            }
        }
    }

    fn p_security_request<S>(&mut self, payload: &[u8]) -> Result<Status, SecurityManagerError<S>> {
        let request = crate::encrypt_info::SecurityRequest::try_from_command_format(payload).map_err(Error::from)?;

        log::info!("(SM) received security request");

        Ok(Status::SecurityRequest(request))
    }

    /// Process a keypress notification
    ///
    /// The peer's keystrokes are surfaced to the application during passkey entry, anywhere
    /// else (or malformed) the notification is discarded.
    fn p_keypress_notification(&self, payload: &[u8]) -> Status {
        let passkey_entry = self
            .pairing_data
            .as_ref()
            .map(|pairing_data| matches!(pairing_data.method, PairingMethod::PasskeyEntry(_)))
            .unwrap_or(false);

        if !passkey_entry {
            return Status::None;
        }

        match pairing::KeyPressNotification::try_from_command_format(payload) {
            Ok(keypress) => Status::Keypress(keypress),
            Err(_) => Status::None,
        }
    }

    async fn p_pairing_response<C>(&mut self, channel: &mut C, payload: &[u8]) -> Result<Status, error!(C)>
    where
        C: SmpChannel,
    {
        let response = match pairing::PairingResponse::try_from_command_format(payload) {
            Ok(response) => response,
            Err(_) => return self.fail(channel, PairingFailedReason::InvalidParameters).await,
        };

        let request = self.pairing_request.ok_or(Error::Invalid)?;

        let features = match pairing::NegotiatedFeatures::negotiate(&request, &response, self.encryption_key_min) {
            Ok(features) => features,
            Err(reason) => return self.fail(channel, reason).await,
        };

        if self.secure_connections_only && !features.is_secure_connections() {
            return self.fail(channel, PairingFailedReason::AuthenticationRequirements).await;
        }

        let method = PairingMethod::determine_method(
            request.get_oob_data_flag(),
            response.get_oob_data_flag(),
            request.get_io_capability(),
            response.get_io_capability(),
            features.is_man_in_the_middle_protected(),
            !features.is_secure_connections(),
        );

        if method == PairingMethod::JustWorks && !self.allow_just_works {
            return self.fail(channel, PairingFailedReason::AuthenticationRequirements).await;
        }

        log::info!("(SM) pairing method: {:?}", method);

        let mut pairing_data = PairingData::new(method, features);

        pairing_data.nonce = toolbox::nonce();
        pairing_data.local_oob_random = self.oob_random;

        if features.is_secure_connections() {
            let (private_key, public_key) = self.oob_key_pair.take().unwrap_or_else(toolbox::ecc_gen);

            let raw_public_key = toolbox::pub_key_into_command_format(&public_key);

            pairing_data.private_key = Some(private_key);
            pairing_data.public_key = Some(public_key);

            self.pairing_data = Some(pairing_data);

            self.step = Step::AwaitPublicKey;

            send(channel, pairing::PairingPubKey::new(raw_public_key)).await?;

            Ok(Status::None)
        } else {
            self.pairing_data = Some(pairing_data);

            self.begin_legacy(channel).await
        }
    }

    async fn begin_legacy<C>(&mut self, channel: &mut C) -> Result<Status, error!(C)>
    where
        C: SmpChannel,
    {
        let method = self.pairing_data.as_ref().ok_or(Error::Invalid)?.method;

        match method {
            PairingMethod::JustWorks => {
                self.pairing_data.as_mut().ok_or(Error::Invalid)?.tk = Some(0);

                self.send_legacy_confirm(channel).await?;

                Ok(Status::None)
            }
            PairingMethod::PasskeyEntry(PasskeyDirection::InitiatorDisplaysResponderInputs) => {
                let passkey = toolbox::new_passkey();

                {
                    let pairing_data = self.pairing_data.as_mut().ok_or(Error::Invalid)?;

                    pairing_data.passkey = Some(passkey);
                    pairing_data.tk = Some(passkey.into());
                }

                self.send_legacy_confirm(channel).await?;

                Ok(Status::PasskeyOutput(io::PasskeyOutput(passkey)))
            }
            PairingMethod::PasskeyEntry(_) => {
                self.step = Step::AwaitUserInput;

                Ok(Status::PasskeyInput)
            }
            PairingMethod::Oob(_) => {
                self.step = Step::AwaitUserInput;

                Ok(Status::OutOfBandInput)
            }
            // number comparison cannot be selected for legacy pairing
            PairingMethod::NumberComparison => self.fail(channel, PairingFailedReason::UnspecifiedReason).await,
        }
    }

    /// Send *Mconfirm*, the temporary key must already be within the pairing data
    async fn send_legacy_confirm<C>(&mut self, channel: &mut C) -> Result<(), error!(C)>
    where
        C: SmpChannel,
    {
        let confirm = {
            let pairing_data = self.pairing_data.as_mut().ok_or(Error::Invalid)?;

            pairing_data.nonce = toolbox::rand_u128();

            let tk = pairing_data.tk.ok_or(Error::Invalid)?;

            toolbox::c1(
                tk,
                pairing_data.nonce,
                pairing_data.features.response_as_u128(),
                pairing_data.features.request_as_u128(),
                self.this_address_is_random,
                self.this_address,
                self.remote_address_is_random,
                self.remote_address,
            )
        };

        self.step = Step::AwaitLegacyConfirm;

        send(channel, pairing::PairingConfirm::new(confirm)).await
    }

    async fn p_legacy_confirm<C>(&mut self, channel: &mut C, payload: &[u8]) -> Result<Status, error!(C)>
    where
        C: SmpChannel,
    {
        let confirm = match pairing::PairingConfirm::try_from_command_format(payload) {
            Ok(confirm) => confirm.get_value(),
            Err(_) => return self.fail(channel, PairingFailedReason::InvalidParameters).await,
        };

        let nonce = {
            let pairing_data = self.pairing_data.as_mut().ok_or(Error::Invalid)?;

            pairing_data.peer_confirm = Some(confirm);

            pairing_data.nonce
        };

        self.step = Step::AwaitLegacyRandom;

        // Sconfirm is committed, reveal Mrand
        send(channel, pairing::PairingRandom::new(nonce)).await?;

        Ok(Status::None)
    }

    async fn p_legacy_random<C>(&mut self, channel: &mut C, payload: &[u8]) -> Result<Status, error!(C)>
    where
        C: SmpChannel,
    {
        let peer_random = match pairing::PairingRandom::try_from_command_format(payload) {
            Ok(random) => random.get_value(),
            Err(_) => return self.fail(channel, PairingFailedReason::InvalidParameters).await,
        };

        let (tk, peer_confirm, mrand, features) = {
            let pairing_data = self.pairing_data.as_mut().ok_or(Error::Invalid)?;

            pairing_data.peer_nonce = Some(peer_random);

            (
                pairing_data.tk.ok_or(Error::Invalid)?,
                pairing_data.peer_confirm,
                pairing_data.nonce,
                pairing_data.features,
            )
        };

        let expected = toolbox::c1(
            tk,
            peer_random,
            features.response_as_u128(),
            features.request_as_u128(),
            self.this_address_is_random,
            self.this_address,
            self.remote_address_is_random,
            self.remote_address,
        );

        match peer_confirm {
            Some(confirm) if toolbox::constant_time_eq(expected, confirm) => (),
            _ => return self.fail(channel, PairingFailedReason::ConfirmValueFailed).await,
        }

        let key_size = features.get_encryption_key_size();

        let stk = toolbox::mask_key(toolbox::s1(tk, peer_random, mrand), key_size);

        self.pairing_data.as_mut().ok_or(Error::Invalid)?.stk = Some(stk);

        self.step = Step::AwaitEncryption;

        log::info!("(SM) legacy pairing confirmed, encrypting with the short term key");

        Ok(Status::StartEncryption(EncryptionKey {
            key: stk,
            size: key_size,
            ediv: 0,
            rand: 0,
        }))
    }

    async fn p_pairing_public_key<C>(&mut self, channel: &mut C, payload: &[u8]) -> Result<Status, error!(C)>
    where
        C: SmpChannel,
    {
        let raw = match pairing::PairingPubKey::try_from_command_format(payload) {
            Ok(pub_key) => *pub_key.get_raw(),
            Err(_) => return self.fail(channel, PairingFailedReason::InvalidParameters).await,
        };

        if toolbox::is_debug_public_key(&raw) && !self.accept_debug_public_key {
            log::error!("(SM) peer device used the debug public key");

            return self.fail(channel, PairingFailedReason::AuthenticationRequirements).await;
        }

        let peer_public_key = match toolbox::pub_key_try_from_command_format(&raw) {
            Ok(key) => key,
            Err(_) => {
                log::error!("(SM) peer public key is not a valid point of P-256");

                return self.fail(channel, PairingFailedReason::InvalidParameters).await;
            }
        };

        let method = {
            let pairing_data = self.pairing_data.as_mut().ok_or(Error::Invalid)?;

            let private_key = pairing_data.private_key.take().ok_or(Error::Invalid)?;

            pairing_data.secret_key = Some(toolbox::ecdh(private_key, &peer_public_key));

            pairing_data.peer_public_key = Some(peer_public_key);

            pairing_data.method
        };

        match method {
            PairingMethod::JustWorks | PairingMethod::NumberComparison => {
                self.step = Step::AwaitConfirm;

                Ok(Status::None)
            }
            PairingMethod::PasskeyEntry(PasskeyDirection::InitiatorDisplaysResponderInputs) => {
                let passkey = toolbox::new_passkey();

                self.pairing_data.as_mut().ok_or(Error::Invalid)?.passkey = Some(passkey);

                self.send_passkey_confirm(channel).await?;

                Ok(Status::PasskeyOutput(io::PasskeyOutput(passkey)))
            }
            PairingMethod::PasskeyEntry(_) => {
                self.step = Step::AwaitUserInput;

                Ok(Status::PasskeyInput)
            }
            PairingMethod::Oob(OobDirection::OnlyInitiatorSendsOob) => {
                // no out of band data to receive, start the nonce exchange
                let nonce = self.pairing_data.as_ref().ok_or(Error::Invalid)?.nonce;

                self.step = Step::AwaitRandom;

                send(channel, pairing::PairingRandom::new(nonce)).await?;

                Ok(Status::None)
            }
            PairingMethod::Oob(_) => {
                self.step = Step::AwaitUserInput;

                Ok(Status::OutOfBandInput)
            }
        }
    }

    /// Send the confirm of the current passkey entry round
    async fn send_passkey_confirm<C>(&mut self, channel: &mut C) -> Result<(), error!(C)>
    where
        C: SmpChannel,
    {
        let confirm = {
            let pairing_data = self.pairing_data.as_mut().ok_or(Error::Invalid)?;

            pairing_data.nonce = toolbox::nonce();

            let passkey = pairing_data.passkey.ok_or(Error::Invalid)?;

            let own_x = toolbox::pub_key_x_coord(pairing_data.public_key.as_ref().ok_or(Error::Invalid)?);

            let peer_x = toolbox::pub_key_x_coord(pairing_data.peer_public_key.as_ref().ok_or(Error::Invalid)?);

            toolbox::f4(
                &own_x,
                &peer_x,
                pairing_data.nonce,
                toolbox::passkey_bit(passkey, pairing_data.passkey_round),
            )
        };

        self.step = Step::AwaitConfirm;

        send(channel, pairing::PairingConfirm::new(confirm)).await
    }

    async fn p_pairing_confirm<C>(&mut self, channel: &mut C, payload: &[u8]) -> Result<Status, error!(C)>
    where
        C: SmpChannel,
    {
        let confirm = match pairing::PairingConfirm::try_from_command_format(payload) {
            Ok(confirm) => confirm.get_value(),
            Err(_) => return self.fail(channel, PairingFailedReason::InvalidParameters).await,
        };

        let nonce = {
            let pairing_data = self.pairing_data.as_mut().ok_or(Error::Invalid)?;

            pairing_data.peer_confirm = Some(confirm);

            pairing_data.nonce
        };

        self.step = Step::AwaitRandom;

        send(channel, pairing::PairingRandom::new(nonce)).await?;

        Ok(Status::None)
    }

    async fn p_pairing_random<C>(&mut self, channel: &mut C, payload: &[u8]) -> Result<Status, error!(C)>
    where
        C: SmpChannel,
    {
        let peer_nonce = match pairing::PairingRandom::try_from_command_format(payload) {
            Ok(random) => random.get_value(),
            Err(_) => return self.fail(channel, PairingFailedReason::InvalidParameters).await,
        };

        let (method, own_x, peer_x, peer_confirm, nonce, passkey, round) = {
            let pairing_data = self.pairing_data.as_mut().ok_or(Error::Invalid)?;

            pairing_data.peer_nonce = Some(peer_nonce);

            (
                pairing_data.method,
                toolbox::pub_key_x_coord(pairing_data.public_key.as_ref().ok_or(Error::Invalid)?),
                toolbox::pub_key_x_coord(pairing_data.peer_public_key.as_ref().ok_or(Error::Invalid)?),
                pairing_data.peer_confirm,
                pairing_data.nonce,
                pairing_data.passkey,
                pairing_data.passkey_round,
            )
        };

        match method {
            PairingMethod::JustWorks | PairingMethod::NumberComparison => {
                let expected = toolbox::f4(&peer_x, &own_x, peer_nonce, 0);

                match peer_confirm {
                    Some(confirm) if toolbox::constant_time_eq(expected, confirm) => (),
                    _ => return self.fail(channel, PairingFailedReason::ConfirmValueFailed).await,
                }

                if method == PairingMethod::NumberComparison {
                    let compare = toolbox::g2(&own_x, &peer_x, nonce, peer_nonce) % 1_000_000;

                    self.step = Step::AwaitUserInput;

                    Ok(Status::NumberComparison(io::CompareValue(compare)))
                } else {
                    self.send_dh_key_check(channel).await
                }
            }
            PairingMethod::PasskeyEntry(_) => {
                let passkey = passkey.ok_or(Error::Invalid)?;

                let z = toolbox::passkey_bit(passkey, round);

                let expected = toolbox::f4(&peer_x, &own_x, peer_nonce, z);

                match peer_confirm {
                    Some(confirm) if toolbox::constant_time_eq(expected, confirm) => (),
                    _ => return self.fail(channel, PairingFailedReason::ConfirmValueFailed).await,
                }

                let next_round = {
                    let pairing_data = self.pairing_data.as_mut().ok_or(Error::Invalid)?;

                    pairing_data.passkey_round += 1;

                    pairing_data.passkey_round
                };

                if next_round < 20 {
                    self.send_passkey_confirm(channel).await?;

                    Ok(Status::None)
                } else {
                    self.send_dh_key_check(channel).await
                }
            }
            PairingMethod::Oob(_) => self.send_dh_key_check(channel).await,
        }
    }

    /// Derive the MacKey and long term key and send *Ea*
    async fn send_dh_key_check<C>(&mut self, channel: &mut C) -> Result<Status, error!(C)>
    where
        C: SmpChannel,
    {
        let check = {
            let pairing_data = self.pairing_data.as_mut().ok_or(Error::Invalid)?;

            let secret_key = pairing_data.secret_key.as_ref().ok_or(Error::Invalid)?;

            let peer_nonce = pairing_data.peer_nonce.ok_or(Error::Invalid)?;

            let a1 = toolbox::PairingAddress::new(&self.this_address, self.this_address_is_random);

            let a2 = toolbox::PairingAddress::new(&self.remote_address, self.remote_address_is_random);

            let (mac_key, ltk) = toolbox::f5(secret_key, pairing_data.nonce, peer_nonce, a1, a2);

            pairing_data.mac_key = Some(mac_key);
            pairing_data.ltk = Some(ltk);

            // rb of Ea, the responder's secret
            let peer_r = match pairing_data.method {
                PairingMethod::PasskeyEntry(_) => pairing_data.passkey.ok_or(Error::Invalid)?.into(),
                PairingMethod::Oob(_) => pairing_data.peer_oob_random,
                _ => 0,
            };

            toolbox::f6(
                mac_key,
                pairing_data.nonce,
                peer_nonce,
                peer_r,
                pairing_data.features.initiator_io_cap,
                a1,
                a2,
            )
        };

        self.step = Step::AwaitDhKeyCheck;

        send(channel, pairing::PairingDhKeyCheck::new(check)).await?;

        Ok(Status::None)
    }

    async fn p_pairing_dh_key_check<C>(&mut self, channel: &mut C, payload: &[u8]) -> Result<Status, error!(C)>
    where
        C: SmpChannel,
    {
        let check = match pairing::PairingDhKeyCheck::try_from_command_format(payload) {
            Ok(check) => check.get_check_value(),
            Err(_) => return self.fail(channel, PairingFailedReason::InvalidParameters).await,
        };

        let (expected, ltk, key_size) = {
            let pairing_data = self.pairing_data.as_mut().ok_or(Error::Invalid)?;

            let mac_key = pairing_data.mac_key.ok_or(Error::Invalid)?;

            let peer_nonce = pairing_data.peer_nonce.ok_or(Error::Invalid)?;

            // ra of Eb, this device's secret
            let local_r = match pairing_data.method {
                PairingMethod::PasskeyEntry(_) => pairing_data.passkey.ok_or(Error::Invalid)?.into(),
                PairingMethod::Oob(_) => pairing_data.local_oob_random,
                _ => 0,
            };

            let a1 = toolbox::PairingAddress::new(&self.remote_address, self.remote_address_is_random);

            let a2 = toolbox::PairingAddress::new(&self.this_address, self.this_address_is_random);

            let expected = toolbox::f6(
                mac_key,
                peer_nonce,
                pairing_data.nonce,
                local_r,
                pairing_data.features.responder_io_cap,
                a1,
                a2,
            );

            let key_size = pairing_data.features.get_encryption_key_size();

            let ltk = toolbox::mask_key(pairing_data.ltk.ok_or(Error::Invalid)?, key_size);

            pairing_data.ltk = Some(ltk);

            (expected, ltk, key_size)
        };

        if !toolbox::constant_time_eq(expected, check) {
            return self.fail(channel, PairingFailedReason::DhKeyCheckFailed).await;
        }

        self.step = Step::AwaitEncryption;

        log::info!("(SM) secure connections pairing authenticated, encrypting with the long term key");

        Ok(Status::StartEncryption(EncryptionKey {
            key: ltk,
            size: key_size,
            ediv: 0,
            rand: 0,
        }))
    }

    /// Give the Security Manager the result of number comparison
    ///
    /// This must be called after the status [`Status::NumberComparison`], with `is_accepted` set
    /// to true when the user confirmed that both devices display the same value.
    pub async fn number_comparison<C>(&mut self, channel: &mut C, is_accepted: bool) -> Result<Status, error!(C)>
    where
        C: SmpChannel,
    {
        let method = self
            .pairing_data
            .as_ref()
            .ok_or(Error::OperationRequiresPairing)?
            .method;

        if self.step != Step::AwaitUserInput || method != PairingMethod::NumberComparison {
            return Err(Error::OperationDoesNotMatchState.into());
        }

        if !is_accepted {
            return self.fail(channel, PairingFailedReason::NumericComparisonFailed).await;
        }

        self.send_dh_key_check(channel).await
    }

    /// Give the Security Manager the passkey input by the user
    ///
    /// This must be called after the status [`Status::PasskeyInput`].
    pub async fn input_passkey<C>(&mut self, channel: &mut C, passkey: u32) -> Result<Status, error!(C)>
    where
        C: SmpChannel,
    {
        let (method, legacy) = {
            let pairing_data = self.pairing_data.as_ref().ok_or(Error::OperationRequiresPairing)?;

            (pairing_data.method, !pairing_data.features.is_secure_connections())
        };

        if self.step != Step::AwaitUserInput || !matches!(method, PairingMethod::PasskeyEntry(_)) {
            return Err(Error::OperationDoesNotMatchState.into());
        }

        if passkey >= 1_000_000 {
            return Err(Error::Value.into());
        }

        {
            let pairing_data = self.pairing_data.as_mut().ok_or(Error::Invalid)?;

            pairing_data.passkey = Some(passkey);

            if legacy {
                pairing_data.tk = Some(passkey.into());
            }
        }

        if legacy {
            self.send_legacy_confirm(channel).await?;
        } else {
            self.send_passkey_confirm(channel).await?;
        }

        Ok(Status::None)
    }

    /// Give the Security Manager the out of band data received from the peer
    ///
    /// This must be called after the status [`Status::OutOfBandInput`].
    pub async fn received_oob_data<C>(&mut self, channel: &mut C, data: oob::OobInput) -> Result<Status, error!(C)>
    where
        C: SmpChannel,
    {
        let (method, legacy) = {
            let pairing_data = self.pairing_data.as_ref().ok_or(Error::OperationRequiresPairing)?;

            (pairing_data.method, !pairing_data.features.is_secure_connections())
        };

        if self.step != Step::AwaitUserInput || !matches!(method, PairingMethod::Oob(_)) {
            return Err(Error::OperationDoesNotMatchState.into());
        }

        match data {
            oob::OobInput::TemporaryKey(tk) if legacy => {
                self.pairing_data.as_mut().ok_or(Error::Invalid)?.tk = Some(tk);

                self.send_legacy_confirm(channel).await?;

                Ok(Status::None)
            }
            oob::OobInput::SecureConnections { random, confirm } if !legacy => {
                let (peer_x, nonce) = {
                    let pairing_data = self.pairing_data.as_ref().ok_or(Error::Invalid)?;

                    (
                        toolbox::pub_key_x_coord(pairing_data.peer_public_key.as_ref().ok_or(Error::Invalid)?),
                        pairing_data.nonce,
                    )
                };

                if !toolbox::constant_time_eq(toolbox::f4(&peer_x, &peer_x, random, 0), confirm) {
                    log::error!("(SM) out of band confirm does not commit to the peer's public key");

                    return self.fail(channel, PairingFailedReason::ConfirmValueFailed).await;
                }

                self.pairing_data.as_mut().ok_or(Error::Invalid)?.peer_oob_random = random;

                self.step = Step::AwaitRandom;

                send(channel, pairing::PairingRandom::new(nonce)).await?;

                Ok(Status::None)
            }
            _ => Err(Error::Format.into()),
        }
    }

    /// Cancel the pairing procedure
    ///
    /// A *pairing failed* PDU is sent to the peer device.
    pub async fn cancel_pairing<C>(&mut self, channel: &mut C) -> Result<Status, error!(C)>
    where
        C: SmpChannel,
    {
        if !self.is_pairing() {
            return Err(Error::OperationRequiresPairing.into());
        }

        self.fail(channel, PairingFailedReason::UnspecifiedReason).await
    }

    /// Report a change of the connection's encryption
    ///
    /// Called when encryption of the connection was established (or failed) after a
    /// [`Status::StartEncryption`]. A successful encryption completes pairing and, when bonding
    /// was negotiated, begins key distribution.
    pub async fn encryption_changed<C>(&mut self, channel: &mut C, is_encrypted: bool) -> Result<Status, error!(C)>
    where
        C: SmpChannel,
    {
        self.link_encrypted = is_encrypted;

        if self.step != Step::AwaitEncryption {
            return Ok(Status::None);
        }

        if !is_encrypted {
            log::error!("(SM) failed to encrypt the connection with the pairing key");

            self.reset_pairing();

            self.step = Step::Failed;

            return Ok(Status::PairingFailed(PairingFailedReason::UnspecifiedReason));
        }

        let (features, authenticated, ltk) = {
            let pairing_data = self.pairing_data.as_ref().ok_or(Error::Invalid)?;

            (
                pairing_data.features,
                pairing_data.method.is_authenticating(),
                pairing_data.ltk,
            )
        };

        let secure_connections = features.is_secure_connections();

        let mut keys = Keys::new(authenticated, secure_connections);

        if secure_connections {
            keys.set_ltk(ltk.ok_or(Error::Invalid)?);
            keys.set_ediv_and_rand(0, 0);
        }

        if !features.is_bonding() {
            self.keys = Some(keys);

            self.reset_pairing();

            self.step = Step::Complete;

            log::info!("(SM) pairing complete");

            return Ok(Status::PairingComplete);
        }

        let derive_link_key = secure_connections
            && (features.initiator_key_distribution | features.responder_key_distribution) & pairing::LINK_KEY != 0;

        let local_mask = features.initiator_key_distribution & !pairing::LINK_KEY;

        let remote_mask = features.responder_key_distribution & !pairing::LINK_KEY;

        self.key_dist = Some(KeyDistManager::new(
            true,
            local_mask,
            remote_mask,
            derive_link_key,
            features.ct2,
        ));

        self.local_keys = Some(self.make_local_keys());

        self.keys = Some(keys);

        self.step = Step::KeyDistribution;

        log::info!("(SM) pairing complete, distributing bonding keys");

        match self.advance_distribution(channel).await? {
            Status::BondingComplete => Ok(Status::BondingComplete),
            _ => Ok(Status::PairingComplete),
        }
    }

    fn make_local_keys(&self) -> LocalKeys {
        LocalKeys {
            ltk: toolbox::rand_u128(),
            ediv: toolbox::rand_u128() as u16,
            rand: toolbox::rand_u128() as u64,
            irk: self.irk.unwrap_or_else(toolbox::rand_u128),
            csrk: self.csrk.unwrap_or_else(toolbox::rand_u128),
            identity: self.identity.unwrap_or_else(|| {
                if self.this_address_is_random {
                    IdentityAddress::StaticRandom(self.this_address)
                } else {
                    IdentityAddress::Public(self.this_address)
                }
            }),
        }
    }

    async fn p_key_distribution<C>(
        &mut self,
        channel: &mut C,
        command: CommandType,
        payload: &[u8],
    ) -> Result<Status, error!(C)>
    where
        C: SmpChannel,
    {
        if !self.link_encrypted {
            return self.fail(channel, PairingFailedReason::UnspecifiedReason).await;
        }

        let received = {
            let key_dist = self.key_dist.as_mut().ok_or(Error::Invalid)?;

            let keys = self.keys.as_mut().ok_or(Error::Invalid)?;

            key_dist.receive(command, payload, keys)
        };

        match received {
            Ok(Some(identity)) => Ok(Status::PeerIdentity(identity)),
            Ok(None) => self.advance_distribution(channel).await,
            Err(Error::IncorrectCommand { .. }) => {
                self.fail(channel, PairingFailedReason::UnspecifiedReason).await
            }
            Err(_) => self.fail(channel, PairingFailedReason::InvalidParameters).await,
        }
    }

    /// Accept or reject the identity distributed by the peer
    ///
    /// This must be called after the status [`Status::PeerIdentity`], typically once the key
    /// store was checked for a bond conflicting with the identity. Rejecting drops the peer's
    /// identity and identity resolving key but bonding continues otherwise.
    pub async fn resolve_peer_identity<C>(&mut self, channel: &mut C, is_accepted: bool) -> Result<Status, error!(C)>
    where
        C: SmpChannel,
    {
        let key_dist = self.key_dist.as_mut().ok_or(Error::OperationDoesNotMatchState)?;

        if !key_dist.has_pending_identity() {
            return Err(Error::OperationDoesNotMatchState.into());
        }

        if is_accepted {
            let keys = self.keys.as_mut().ok_or(Error::Invalid)?;

            key_dist.commit_pending_identity(keys);
        } else {
            key_dist.discard_pending_identity();
        }

        self.advance_distribution(channel).await
    }

    /// Send the local keys once the peer is done and finish bonding when both sides are
    async fn advance_distribution<C>(&mut self, channel: &mut C) -> Result<Status, error!(C)>
    where
        C: SmpChannel,
    {
        // the responder distributes first, the initiator sends
        // its keys only once the remote set is exhausted
        if self.key_dist.as_ref().ok_or(Error::Invalid)?.is_receiving_done() {
            loop {
                let next = {
                    let key_dist = self.key_dist.as_ref().ok_or(Error::Invalid)?;

                    let source = self.local_keys.as_ref().ok_or(Error::Invalid)?;

                    key_dist.next_local(source)
                };

                match next {
                    Some(KeyPdu::Enc(enc_info)) => send(channel, enc_info).await?,
                    Some(KeyPdu::CentralId(central_id)) => send(channel, central_id).await?,
                    Some(KeyPdu::Id(id_info)) => send(channel, id_info).await?,
                    Some(KeyPdu::IdAddr(id_addr)) => send(channel, id_addr).await?,
                    Some(KeyPdu::Sign(sign_info)) => send(channel, sign_info).await?,
                    None => break,
                }

                // the key counts as distributed only now that the transport took the PDU
                let key_dist = self.key_dist.as_mut().ok_or(Error::Invalid)?;

                let keys = self.keys.as_mut().ok_or(Error::Invalid)?;

                let source = self.local_keys.as_ref().ok_or(Error::Invalid)?;

                key_dist.local_sent(source, keys);
            }
        }

        let key_dist = self.key_dist.as_mut().ok_or(Error::Invalid)?;

        if key_dist.is_done() && !key_dist.has_pending_identity() {
            let keys = self.keys.as_mut().ok_or(Error::Invalid)?;

            key_dist.finish(keys);

            self.reset_pairing();

            self.step = Step::Complete;

            log::info!("(SM) bonding complete");

            Ok(Status::BondingComplete)
        } else {
            Ok(Status::None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> SecurityManagerBuilder {
        SecurityManagerBuilder::new(
            BluetoothDeviceAddress([1, 2, 3, 4, 5, 6]),
            BluetoothDeviceAddress([6, 5, 4, 3, 2, 1]),
            false,
            false,
        )
    }

    #[test]
    fn default_io_capability_is_no_input_no_output() {
        let security_manager = builder().build();

        assert_eq!(IoCapability::NoInputNoOutput, security_manager.io_capability);
    }

    #[test]
    fn number_comparison_with_passkey_needs_a_keyboard_display() {
        let security_manager = builder()
            .enable_number_comparison()
            .enable_passkey(PasskeyAbility::InputOnly)
            .build();

        assert_eq!(IoCapability::KeyboardDisplay, security_manager.io_capability);
    }

    #[test]
    fn auth_req_reflects_the_configuration() {
        let security_manager = builder().build();

        // bonding + secure connections, no man in the middle
        assert_eq!(0b1001, security_manager.auth_req);

        let security_manager = builder().enable_passkey(PasskeyAbility::DisplayOnly).build();

        assert_eq!(0b1101, security_manager.auth_req);

        let security_manager = builder()
            .disable_bonding()
            .distributed_bonding_keys(|keys| keys.enable_link_key())
            .build();

        // ct2 follows the link key
        assert_eq!(0b101000, security_manager.auth_req);
    }

    #[test]
    fn fresh_security_manager_is_idle() {
        let security_manager = builder().build();

        assert_eq!(PairingState::Idle, security_manager.state());
        assert!(!security_manager.is_pairing());
        assert!(security_manager.get_keys().is_none());
    }
}
