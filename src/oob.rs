//! Support for pairing with out of band data
//!
//! The out of band method moves part of the authentication onto an interface that a man in the
//! middle of the Bluetooth connection cannot observe (NFC being the typical example). What that
//! interface is and how data crosses it is out of scope for the Security Manager, this module
//! only defines the data that crosses it.

use crate::{BluetoothDeviceAddress, Error};

/// The out of band data of LE Secure Connections pairing
///
/// This is generated by a Security Manager for transfer to the peer device over the out of band
/// interface. The confirm value commits to this device's public key, a peer validating it knows
/// the key exchange was not tampered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OobData {
    pub address: BluetoothDeviceAddress,
    pub random: u128,
    pub confirm: u128,
}

impl OobData {
    /// The size of the raw form of the out of band data
    pub const BYTE_SIZE: usize = 38;

    /// Convert into raw bytes for the out of band interface
    pub fn to_bytes(&self) -> [u8; Self::BYTE_SIZE] {
        let mut bytes = [0u8; Self::BYTE_SIZE];

        bytes[..6].copy_from_slice(&self.address.0);
        bytes[6..22].copy_from_slice(&self.random.to_le_bytes());
        bytes[22..].copy_from_slice(&self.confirm.to_le_bytes());

        bytes
    }

    /// Try to convert from the raw bytes of the out of band interface
    pub fn try_from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != Self::BYTE_SIZE {
            return Err(Error::Size);
        }

        let mut address = BluetoothDeviceAddress::zeroed();
        let mut random = [0u8; 16];
        let mut confirm = [0u8; 16];

        address.copy_from_slice(&bytes[..6]);
        random.copy_from_slice(&bytes[6..22]);
        confirm.copy_from_slice(&bytes[22..]);

        Ok(OobData {
            address,
            random: <u128>::from_le_bytes(random),
            confirm: <u128>::from_le_bytes(confirm),
        })
    }
}

/// Out of band data received from the peer device
///
/// This is handed to a Security Manager after it outputs
/// [`Status::OutOfBandInput`](crate::Status::OutOfBandInput). Which variant is expected depends
/// on the pairing type, LE legacy transfers a temporary key while Secure Connections transfers
/// the random and confirm values of [`OobData`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OobInput {
    TemporaryKey(u128),
    SecureConnections { random: u128, confirm: u128 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oob_data_round_trip() {
        let data = OobData {
            address: BluetoothDeviceAddress([1, 2, 3, 4, 5, 6]),
            random: 0x0123_4567_89ab_cdef_1122_3344_5566_7788,
            confirm: 0x8877_6655_4433_2211_fedc_ba98_7654_3210,
        };

        let bytes = data.to_bytes();

        assert_eq!(data, OobData::try_from_bytes(&bytes).unwrap());

        assert_eq!(Err(Error::Size), OobData::try_from_bytes(&bytes[..20]).map(|_| ()));
    }
}
