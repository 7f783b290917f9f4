//! Key distribution management
//!
//! Pairing phase three runs over the encrypted connection. Each device sends the keys of its
//! negotiated distribution set, the responder first, and pairing is complete once both sets are
//! empty. The [`KeyDistManager`] tracks the two remaining sets, turns received PDUs into entries
//! of a [`Keys`] and produces the PDUs for the local keys.
//!
//! A received identity is not committed to the [`Keys`] right away. The identity is what a bond
//! is looked up by, so the commit waits until the owner has checked the key store for a
//! conflicting bond.

use crate::encrypt_info::{
    CentralIdentification, EncryptionInformation, IdentityAddressInformation, IdentityInformation, SigningInformation,
};
use crate::pairing::{ENC_KEY, ID_KEY, SIGN_KEY};
use crate::{toolbox, CommandData, CommandType, Error, IdentityAddress, Keys};

/// A key distribution PDU to be sent for a local key
#[derive(Debug)]
pub(crate) enum KeyPdu {
    Enc(EncryptionInformation),
    CentralId(CentralIdentification),
    Id(IdentityInformation),
    IdAddr(IdentityAddressInformation),
    Sign(SigningInformation),
}

/// The local key material distributed during bonding
///
/// The legacy encryption key triple is freshly generated for every pairing, the identity keys
/// are long lived values of this device.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LocalKeys {
    pub ltk: u128,
    pub ediv: u16,
    pub rand: u64,
    pub irk: u128,
    pub csrk: u128,
    pub identity: IdentityAddress,
}

pub(crate) struct KeyDistManager {
    is_initiator: bool,
    local_mask: u8,
    remote_mask: u8,
    enc_info_sent: bool,
    irk_sent: bool,
    /// Second PDU of a two PDU key, when set it is the only acceptable command
    expected: Option<CommandType>,
    pending_irk: Option<u128>,
    pending_identity: Option<IdentityAddress>,
    derive_link_key: bool,
    ct2: bool,
}

impl KeyDistManager {
    /// Create a new `KeyDistManager`
    ///
    /// The masks are the negotiated distribution sets with the link key flag already stripped,
    /// `derive_link_key` carries it instead as no PDU crosses the connection for it.
    pub(crate) fn new(is_initiator: bool, local_mask: u8, remote_mask: u8, derive_link_key: bool, ct2: bool) -> Self {
        KeyDistManager {
            is_initiator,
            local_mask,
            remote_mask,
            enc_info_sent: false,
            irk_sent: false,
            expected: None,
            pending_irk: None,
            pending_identity: None,
            derive_link_key,
            ct2,
        }
    }

    pub(crate) fn is_sending_done(&self) -> bool {
        self.local_mask == 0
    }

    pub(crate) fn is_receiving_done(&self) -> bool {
        self.remote_mask == 0 && self.expected.is_none()
    }

    pub(crate) fn is_done(&self) -> bool {
        self.is_sending_done() && self.is_receiving_done()
    }

    /// Check whether a command is acceptable right now
    ///
    /// The peer may distribute its keys in any order, but the second PDU of a two PDU key must
    /// directly follow the first.
    fn accepts(&self, command: CommandType) -> bool {
        if let Some(expected) = self.expected {
            return command == expected;
        }

        match command {
            CommandType::EncryptionInformation => self.remote_mask & ENC_KEY != 0,
            CommandType::IdentityInformation => self.remote_mask & ID_KEY != 0,
            CommandType::SigningInformation => self.remote_mask & SIGN_KEY != 0,
            _ => false,
        }
    }

    /// Process a key distribution PDU from the peer
    ///
    /// The return is the peer's identity when the PDU completed the identity key pair. The
    /// identity is *not* within `keys` yet, the owner must resolve any bond conflict and then
    /// call [`commit_pending_identity`](Self::commit_pending_identity) or
    /// [`discard_pending_identity`](Self::discard_pending_identity).
    pub(crate) fn receive(
        &mut self,
        command: CommandType,
        payload: &[u8],
        keys: &mut Keys,
    ) -> Result<Option<IdentityAddress>, Error> {
        if !self.accepts(command) {
            return Err(Error::IncorrectCommand {
                expected: self.expected,
                received: command,
            });
        }

        match command {
            CommandType::EncryptionInformation => {
                let enc_info = EncryptionInformation::try_from_command_format(payload)?;

                if self.is_initiator {
                    keys.set_ltk(enc_info.get_long_term_key());
                } else {
                    keys.set_peer_ltk(enc_info.get_long_term_key(), 0, 0);
                }

                self.expected = Some(CommandType::CentralIdentification);

                Ok(None)
            }

            CommandType::CentralIdentification => {
                let central_id = CentralIdentification::try_from_command_format(payload)?;

                if self.is_initiator {
                    keys.set_ediv_and_rand(central_id.get_encryption_diversifier(), central_id.get_random());
                } else if let Some((ltk, _, _)) = keys.get_peer_ltk() {
                    keys.set_peer_ltk(ltk, central_id.get_encryption_diversifier(), central_id.get_random());
                }

                self.expected = None;

                self.remote_mask &= !ENC_KEY;

                Ok(None)
            }

            CommandType::IdentityInformation => {
                let identity_info = IdentityInformation::try_from_command_format(payload)?;

                self.pending_irk = Some(identity_info.get_irk());

                self.expected = Some(CommandType::IdentityAddressInformation);

                Ok(None)
            }

            CommandType::IdentityAddressInformation => {
                let identity_address = IdentityAddressInformation::try_from_command_format(payload)?;

                self.pending_identity = Some(identity_address.get_identity());

                self.expected = None;

                self.remote_mask &= !ID_KEY;

                Ok(Some(identity_address.get_identity()))
            }

            CommandType::SigningInformation => {
                let signing_info = SigningInformation::try_from_command_format(payload)?;

                keys.set_peer_csrk(signing_info.get_signature_key());

                self.remote_mask &= !SIGN_KEY;

                Ok(None)
            }

            _ => Err(Error::IncorrectCommand {
                expected: self.expected,
                received: command,
            }),
        }
    }

    /// Commit the peer's identity into the keys
    pub(crate) fn commit_pending_identity(&mut self, keys: &mut Keys) {
        if let (Some(irk), Some(identity)) = (self.pending_irk.take(), self.pending_identity.take()) {
            keys.set_peer_irk(irk);
            keys.set_peer_identity(identity);
        }
    }

    /// Drop the peer's identity without committing it
    pub(crate) fn discard_pending_identity(&mut self) {
        self.pending_irk = None;
        self.pending_identity = None;
    }

    pub(crate) fn has_pending_identity(&self) -> bool {
        self.pending_identity.is_some()
    }

    /// Produce the next PDU of the local key distribution
    ///
    /// Returns `None` once every local key was distributed. Nothing in the manager changes
    /// here, a produced PDU counts as distributed only once
    /// [`local_sent`](Self::local_sent) records it.
    pub(crate) fn next_local(&self, source: &LocalKeys) -> Option<KeyPdu> {
        if self.local_mask & ENC_KEY != 0 {
            return if !self.enc_info_sent {
                Some(KeyPdu::Enc(EncryptionInformation::new(source.ltk)))
            } else {
                Some(KeyPdu::CentralId(CentralIdentification::new(source.ediv, source.rand)))
            };
        }

        if self.local_mask & ID_KEY != 0 {
            return if !self.irk_sent {
                Some(KeyPdu::Id(IdentityInformation::new(source.irk)))
            } else {
                Some(KeyPdu::IdAddr(IdentityAddressInformation::new(source.identity)))
            };
        }

        if self.local_mask & SIGN_KEY != 0 {
            return Some(KeyPdu::Sign(SigningInformation::new(source.csrk)));
        }

        None
    }

    /// Record that the PDU of [`next_local`](Self::next_local) was accepted by the transport
    ///
    /// The key of the PDU is recorded within `keys` and the distribution advances. When a send
    /// fails this is never reached, so the key stays undistributed and a retry produces the
    /// same PDU again.
    pub(crate) fn local_sent(&mut self, source: &LocalKeys, keys: &mut Keys) {
        if self.local_mask & ENC_KEY != 0 {
            if !self.enc_info_sent {
                self.enc_info_sent = true;

                if self.is_initiator {
                    keys.set_peer_ltk(source.ltk, source.ediv, source.rand);
                } else {
                    keys.set_ltk(source.ltk);
                    keys.set_ediv_and_rand(source.ediv, source.rand);
                }
            } else {
                self.local_mask &= !ENC_KEY;
            }

            return;
        }

        if self.local_mask & ID_KEY != 0 {
            if !self.irk_sent {
                self.irk_sent = true;

                keys.set_irk(source.irk);
            } else {
                self.local_mask &= !ID_KEY;

                keys.set_identity(source.identity);
            }

            return;
        }

        if self.local_mask & SIGN_KEY != 0 {
            self.local_mask &= !SIGN_KEY;

            keys.set_csrk(source.csrk);
        }
    }

    /// Finish distribution by deriving the cross transport key
    ///
    /// When the devices negotiated link key derivation the BR/EDR link key is converted from the
    /// long term key of this pairing.
    pub(crate) fn finish(&self, keys: &mut Keys) {
        if self.derive_link_key {
            if let Some(ltk) = keys.get_ltk() {
                keys.set_link_key(toolbox::link_key_from_ltk(ltk, self.ct2));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BluetoothDeviceAddress;

    fn payload_of(pdu: KeyPdu) -> (CommandType, heapless::Vec<u8, { crate::MAX_COMMAND_SIZE }>) {
        match pdu {
            KeyPdu::Enc(enc) => (CommandType::EncryptionInformation, enc.into_command_format()),
            KeyPdu::CentralId(ci) => (CommandType::CentralIdentification, ci.into_command_format()),
            KeyPdu::Id(id) => (CommandType::IdentityInformation, id.into_command_format()),
            KeyPdu::IdAddr(ia) => (CommandType::IdentityAddressInformation, ia.into_command_format()),
            KeyPdu::Sign(sign) => (CommandType::SigningInformation, sign.into_command_format()),
        }
    }

    fn local_keys() -> LocalKeys {
        LocalKeys {
            ltk: 0x1122,
            ediv: 0x3344,
            rand: 0x5566,
            irk: 0x7788,
            csrk: 0x99aa,
            identity: IdentityAddress::Public(BluetoothDeviceAddress([1, 2, 3, 4, 5, 6])),
        }
    }

    #[test]
    fn local_legacy_keys_in_order() {
        let mut manager = KeyDistManager::new(false, ENC_KEY | ID_KEY | SIGN_KEY, 0, false, false);

        let mut keys = Keys::new(false, false);

        let source = local_keys();

        let expected = [
            CommandType::EncryptionInformation,
            CommandType::CentralIdentification,
            CommandType::IdentityInformation,
            CommandType::IdentityAddressInformation,
            CommandType::SigningInformation,
        ];

        for expected_command in expected {
            let (command, _) = payload_of(manager.next_local(&source).unwrap());

            assert_eq!(expected_command, command);

            manager.local_sent(&source, &mut keys);
        }

        assert!(manager.next_local(&source).is_none());
        assert!(manager.is_done());

        // the responder's generated encryption key is the primary set of the bond
        assert_eq!(Some(0x1122), keys.get_ltk());
        assert_eq!(Some(0x3344), keys.get_ediv());
        assert_eq!(Some(0x5566), keys.get_rand());
        assert_eq!(Some(0x7788), keys.get_irk());
        assert_eq!(Some(0x99aa), keys.get_csrk().map(|(csrk, _)| csrk));
    }

    #[test]
    fn unacknowledged_key_is_produced_again() {
        let mut manager = KeyDistManager::new(false, ENC_KEY | SIGN_KEY, 0, false, false);

        let mut keys = Keys::new(false, false);

        let source = local_keys();

        // the transport rejected the first send, nothing was recorded
        let (command, _) = payload_of(manager.next_local(&source).unwrap());

        assert_eq!(CommandType::EncryptionInformation, command);
        assert_eq!(None, keys.get_ltk());
        assert!(!manager.is_sending_done());

        // a retry produces the same PDU
        let (command, _) = payload_of(manager.next_local(&source).unwrap());

        assert_eq!(CommandType::EncryptionInformation, command);

        manager.local_sent(&source, &mut keys);

        let (command, _) = payload_of(manager.next_local(&source).unwrap());

        assert_eq!(CommandType::CentralIdentification, command);
        assert_eq!(Some(0x1122), keys.get_ltk());
    }

    #[test]
    fn remote_keys_in_any_group_order() {
        // receive signing information before the identity pair
        let mut manager = KeyDistManager::new(true, 0, ID_KEY | SIGN_KEY, false, false);

        let mut keys = Keys::new(false, true);

        let sign = SigningInformation::new(0xdead).into_command_format();

        assert_eq!(
            None,
            manager.receive(CommandType::SigningInformation, &sign, &mut keys).unwrap()
        );

        let id = IdentityInformation::new(0xbeef).into_command_format();

        assert_eq!(
            None,
            manager.receive(CommandType::IdentityInformation, &id, &mut keys).unwrap()
        );

        let identity = IdentityAddress::StaticRandom(BluetoothDeviceAddress([9, 8, 7, 6, 5, 0xc4]));

        let id_addr = IdentityAddressInformation::new(identity).into_command_format();

        let pending = manager
            .receive(CommandType::IdentityAddressInformation, &id_addr, &mut keys)
            .unwrap();

        assert_eq!(Some(identity), pending);
        assert!(manager.is_receiving_done());

        // nothing of the identity is within the keys until the commit
        assert_eq!(None, keys.get_peer_identity());
        assert_eq!(None, keys.get_peer_irk());

        manager.commit_pending_identity(&mut keys);

        assert_eq!(Some(identity), keys.get_peer_identity());
        assert_eq!(Some(0xbeef), keys.get_peer_irk());
        assert_eq!(Some(0xdead), keys.get_peer_csrk().map(|(csrk, _)| csrk));
    }

    #[test]
    fn central_identification_must_follow_encryption_information() {
        let mut manager = KeyDistManager::new(true, 0, ENC_KEY | SIGN_KEY, false, false);

        let mut keys = Keys::new(false, false);

        // central identification before encryption information
        let central_id = CentralIdentification::new(1, 2).into_command_format();

        assert!(manager
            .receive(CommandType::CentralIdentification, &central_id, &mut keys)
            .is_err());

        let enc = EncryptionInformation::new(0xabcd).into_command_format();

        manager.receive(CommandType::EncryptionInformation, &enc, &mut keys).unwrap();

        // now nothing but central identification is acceptable
        let sign = SigningInformation::new(0xdead).into_command_format();

        assert!(manager
            .receive(CommandType::SigningInformation, &sign, &mut keys)
            .is_err());

        manager
            .receive(CommandType::CentralIdentification, &central_id, &mut keys)
            .unwrap();

        assert_eq!(Some(0xabcd), keys.get_ltk());
        assert_eq!(Some(1), keys.get_ediv());
        assert_eq!(Some(2), keys.get_rand());
    }

    #[test]
    fn link_key_is_derived_at_finish() {
        let manager = KeyDistManager::new(true, 0, 0, true, true);

        let mut keys = Keys::new(true, true);

        keys.set_ltk(0xec0234a3_57c8ad05_341010a6_0a397d9b);

        manager.finish(&mut keys);

        assert_eq!(
            Some(toolbox::link_key_from_ltk(0xec0234a3_57c8ad05_341010a6_0a397d9b, true)),
            keys.get_link_key()
        );
    }

    #[test]
    fn unexpected_key_is_rejected() {
        let mut manager = KeyDistManager::new(true, 0, SIGN_KEY, false, false);

        let mut keys = Keys::new(false, true);

        let enc = EncryptionInformation::new(0xabcd).into_command_format();

        let error = manager
            .receive(CommandType::EncryptionInformation, &enc, &mut keys)
            .unwrap_err();

        assert!(matches!(error, Error::IncorrectCommand { .. }));
    }
}
