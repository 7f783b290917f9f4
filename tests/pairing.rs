//! Full pairing procedures between an initiating and a responding Security Manager

use ble_smp::pairing::{KeyPressNotification, PairingFailedReason};
use ble_smp::{
    initiator, responder, toolbox, BluetoothDeviceAddress, EncryptionKey, IdentityAddress, PasskeyAbility,
    SmpChannel, Status,
};
use std::collections::VecDeque;

const CENTRAL_ADDRESS: BluetoothDeviceAddress = BluetoothDeviceAddress([0x10, 0x11, 0x12, 0x13, 0x14, 0x15]);

const PERIPHERAL_ADDRESS: BluetoothDeviceAddress = BluetoothDeviceAddress([0x20, 0x21, 0x22, 0x23, 0x24, 0x25]);

/// A channel that queues sent PDUs for the test to move to the other Security Manager
#[derive(Default)]
struct Loopback {
    outbound: VecDeque<Vec<u8>>,
    log: Vec<Vec<u8>>,
}

impl SmpChannel for Loopback {
    type SendErr = std::convert::Infallible;

    async fn send_pdu(&mut self, pdu: &[u8]) -> Result<(), Self::SendErr> {
        self.outbound.push_back(pdu.to_vec());

        self.log.push(pdu.to_vec());

        Ok(())
    }
}

fn initiator_builder() -> initiator::SecurityManagerBuilder {
    initiator::SecurityManagerBuilder::new(PERIPHERAL_ADDRESS, CENTRAL_ADDRESS, false, false)
}

fn responder_builder() -> responder::SecurityManagerBuilder {
    responder::SecurityManagerBuilder::new(CENTRAL_ADDRESS, PERIPHERAL_ADDRESS, false, false)
}

async fn feed_initiator(
    security_manager: &mut initiator::SecurityManager,
    channel: &mut Loopback,
    pdu: &[u8],
    statuses: &mut Vec<Status>,
) {
    let status = security_manager.process_command(channel, pdu).await.unwrap();

    if let Status::PeerIdentity(_) = status {
        statuses.push(status);

        statuses.push(security_manager.resolve_peer_identity(channel, true).await.unwrap());
    } else {
        statuses.push(status);
    }
}

async fn feed_responder(
    security_manager: &mut responder::SecurityManager,
    channel: &mut Loopback,
    pdu: &[u8],
    statuses: &mut Vec<Status>,
) {
    let status = security_manager.process_command(channel, pdu).await.unwrap();

    if let Status::PeerIdentity(_) = status {
        statuses.push(status);

        statuses.push(security_manager.resolve_peer_identity(channel, true).await.unwrap());
    } else {
        statuses.push(status);
    }
}

/// Move queued PDUs between the two Security Managers until both are waiting on something else
async fn pump(
    initiator: &mut initiator::SecurityManager,
    initiator_channel: &mut Loopback,
    responder: &mut responder::SecurityManager,
    responder_channel: &mut Loopback,
    initiator_statuses: &mut Vec<Status>,
    responder_statuses: &mut Vec<Status>,
) {
    loop {
        if let Some(pdu) = initiator_channel.outbound.pop_front() {
            feed_responder(responder, responder_channel, &pdu, responder_statuses).await;

            continue;
        }

        if let Some(pdu) = responder_channel.outbound.pop_front() {
            feed_initiator(initiator, initiator_channel, &pdu, initiator_statuses).await;

            continue;
        }

        break;
    }
}

fn encryption_key(statuses: &[Status]) -> EncryptionKey {
    statuses
        .iter()
        .find_map(|status| match status {
            Status::StartEncryption(key) => Some(*key),
            _ => None,
        })
        .expect("no start encryption status")
}

#[tokio::test]
async fn just_works_pairing_and_bonding() {
    let mut central = initiator_builder().build();
    let mut peripheral = responder_builder().build();

    let mut central_channel = Loopback::default();
    let mut peripheral_channel = Loopback::default();

    let mut central_statuses = Vec::new();
    let mut peripheral_statuses = Vec::new();

    central.start_pairing(&mut central_channel).await.unwrap();

    pump(
        &mut central,
        &mut central_channel,
        &mut peripheral,
        &mut peripheral_channel,
        &mut central_statuses,
        &mut peripheral_statuses,
    )
    .await;

    // just works must never ask the user for anything
    for status in central_statuses.iter().chain(peripheral_statuses.iter()) {
        assert!(!matches!(
            status,
            Status::NumberComparison(_) | Status::PasskeyInput | Status::PasskeyOutput(_) | Status::OutOfBandInput
        ));
    }

    let central_key = encryption_key(&central_statuses);
    let peripheral_key = encryption_key(&peripheral_statuses);

    assert_eq!(central_key, peripheral_key);
    assert_eq!(16, central_key.size);

    central.encryption_changed(&mut central_channel, true).await.unwrap();
    peripheral.encryption_changed(&mut peripheral_channel, true).await.unwrap();

    pump(
        &mut central,
        &mut central_channel,
        &mut peripheral,
        &mut peripheral_channel,
        &mut central_statuses,
        &mut peripheral_statuses,
    )
    .await;

    assert!(central_statuses.contains(&Status::BondingComplete));
    assert!(peripheral_statuses.contains(&Status::BondingComplete));

    // a keypress notification outside of passkey entry is discarded
    let status = central.process_command(&mut central_channel, &[0x0e, 0x01]).await.unwrap();

    assert_eq!(Status::None, status);

    let central_keys = central.get_keys().unwrap();
    let peripheral_keys = peripheral.get_keys().unwrap();

    assert_eq!(central_keys.get_ltk(), peripheral_keys.get_ltk());
    assert!(central_keys.is_secure_connections());
    assert!(!central_keys.is_authenticated());

    assert_eq!(
        Some(IdentityAddress::Public(PERIPHERAL_ADDRESS)),
        central_keys.get_peer_identity()
    );
    assert_eq!(
        Some(IdentityAddress::Public(CENTRAL_ADDRESS)),
        peripheral_keys.get_peer_identity()
    );

    // the IRKs the peers received are the ones the other side distributed
    assert_eq!(central_keys.get_peer_irk(), peripheral_keys.get_irk());
    assert_eq!(peripheral_keys.get_peer_irk(), central_keys.get_irk());
}

#[tokio::test]
async fn passkey_entry_runs_twenty_rounds() {
    let mut central = initiator_builder().enable_passkey(PasskeyAbility::DisplayOnly).build();
    let mut peripheral = responder_builder().enable_passkey(PasskeyAbility::InputOnly).build();

    let mut central_channel = Loopback::default();
    let mut peripheral_channel = Loopback::default();

    let mut central_statuses = Vec::new();
    let mut peripheral_statuses = Vec::new();

    central.start_pairing(&mut central_channel).await.unwrap();

    pump(
        &mut central,
        &mut central_channel,
        &mut peripheral,
        &mut peripheral_channel,
        &mut central_statuses,
        &mut peripheral_statuses,
    )
    .await;

    // the central displays the passkey, the peripheral asks for it
    let passkey = central_statuses
        .iter()
        .find_map(|status| match status {
            Status::PasskeyOutput(output) => Some(output.get_passkey()),
            _ => None,
        })
        .expect("no passkey displayed");

    assert!(peripheral_statuses.contains(&Status::PasskeyInput));
    assert!(passkey < 1_000_000);

    // the peripheral user's keystrokes are surfaced on the central while it waits
    let status = central.process_command(&mut central_channel, &[0x0e, 0x00]).await.unwrap();

    assert_eq!(Status::Keypress(KeyPressNotification::PasskeyEntryStarted), status);

    let status = central.process_command(&mut central_channel, &[0x0e, 0x04]).await.unwrap();

    assert_eq!(Status::Keypress(KeyPressNotification::PasskeyEntryCompleted), status);

    let status = peripheral.input_passkey(&mut peripheral_channel, passkey).await.unwrap();

    assert_eq!(Status::None, status);

    pump(
        &mut central,
        &mut central_channel,
        &mut peripheral,
        &mut peripheral_channel,
        &mut central_statuses,
        &mut peripheral_statuses,
    )
    .await;

    // exactly twenty confirm rounds from either side, never a twenty first
    let central_confirms = central_channel.log.iter().filter(|pdu| pdu[0] == 0x03).count();
    let peripheral_confirms = peripheral_channel.log.iter().filter(|pdu| pdu[0] == 0x03).count();

    assert_eq!(20, central_confirms);
    assert_eq!(20, peripheral_confirms);

    let central_key = encryption_key(&central_statuses);
    let peripheral_key = encryption_key(&peripheral_statuses);

    assert_eq!(central_key, peripheral_key);

    central.encryption_changed(&mut central_channel, true).await.unwrap();
    peripheral.encryption_changed(&mut peripheral_channel, true).await.unwrap();

    pump(
        &mut central,
        &mut central_channel,
        &mut peripheral,
        &mut peripheral_channel,
        &mut central_statuses,
        &mut peripheral_statuses,
    )
    .await;

    assert!(central.get_keys().unwrap().is_authenticated());
    assert!(peripheral.get_keys().unwrap().is_authenticated());
}

#[tokio::test]
async fn number_comparison_waits_on_both_users() {
    let mut central = initiator_builder().enable_number_comparison().build();
    let mut peripheral = responder_builder().enable_number_comparison().build();

    let mut central_channel = Loopback::default();
    let mut peripheral_channel = Loopback::default();

    let mut central_statuses = Vec::new();
    let mut peripheral_statuses = Vec::new();

    central.start_pairing(&mut central_channel).await.unwrap();

    pump(
        &mut central,
        &mut central_channel,
        &mut peripheral,
        &mut peripheral_channel,
        &mut central_statuses,
        &mut peripheral_statuses,
    )
    .await;

    let central_compare = central_statuses
        .iter()
        .find_map(|status| match status {
            Status::NumberComparison(compare) => Some(compare.get_value()),
            _ => None,
        })
        .expect("central displayed nothing");

    let peripheral_compare = peripheral_statuses
        .iter()
        .find_map(|status| match status {
            Status::NumberComparison(compare) => Some(compare.get_value()),
            _ => None,
        })
        .expect("peripheral displayed nothing");

    assert_eq!(central_compare, peripheral_compare);
    assert!(central_compare < 1_000_000);

    // the central's user confirms first, its DHKey check reaches the peripheral while the
    // peripheral still waits on its own user
    let status = central.number_comparison(&mut central_channel, true).await.unwrap();

    assert_eq!(Status::None, status);

    pump(
        &mut central,
        &mut central_channel,
        &mut peripheral,
        &mut peripheral_channel,
        &mut central_statuses,
        &mut peripheral_statuses,
    )
    .await;

    let status = peripheral.number_comparison(&mut peripheral_channel, true).await.unwrap();

    pump(
        &mut central,
        &mut central_channel,
        &mut peripheral,
        &mut peripheral_channel,
        &mut central_statuses,
        &mut peripheral_statuses,
    )
    .await;

    let central_key = encryption_key(&central_statuses);

    let Status::StartEncryption(peripheral_key) = status else {
        panic!("peripheral did not start encryption");
    };

    assert_eq!(central_key.key, peripheral_key.key);
}

#[tokio::test]
async fn rejected_number_comparison_fails_pairing() {
    let mut central = initiator_builder().enable_number_comparison().build();
    let mut peripheral = responder_builder().enable_number_comparison().build();

    let mut central_channel = Loopback::default();
    let mut peripheral_channel = Loopback::default();

    let mut central_statuses = Vec::new();
    let mut peripheral_statuses = Vec::new();

    central.start_pairing(&mut central_channel).await.unwrap();

    pump(
        &mut central,
        &mut central_channel,
        &mut peripheral,
        &mut peripheral_channel,
        &mut central_statuses,
        &mut peripheral_statuses,
    )
    .await;

    let status = central.number_comparison(&mut central_channel, false).await.unwrap();

    assert_eq!(
        Status::PairingFailed(PairingFailedReason::NumericComparisonFailed),
        status
    );

    // the peripheral learns of the failure from the pairing failed PDU
    pump(
        &mut central,
        &mut central_channel,
        &mut peripheral,
        &mut peripheral_channel,
        &mut central_statuses,
        &mut peripheral_statuses,
    )
    .await;

    assert!(peripheral_statuses
        .contains(&Status::PairingFailed(PairingFailedReason::NumericComparisonFailed)));
    assert!(!central.is_pairing());
    assert!(!peripheral.is_pairing());
}

/// Emulate a peer that only supports LE legacy pairing against the responder
#[tokio::test]
async fn legacy_just_works_pairing_derives_the_short_term_key() {
    let mut peripheral = responder_builder().build();

    let mut channel = Loopback::default();

    // pairing request: NoInputNoOutput, no OOB, bonding without secure connections
    let request = [0x01, 0x03, 0x00, 0x01, 16, 0x07, 0x07];

    let status = peripheral.process_command(&mut channel, &request).await.unwrap();

    assert_eq!(Status::None, status);

    let response = channel.outbound.pop_front().unwrap();

    assert_eq!(0x02, response[0]);

    let preq = pdu_as_u128(&request);
    let pres = pdu_as_u128(&response);

    // just works, the temporary key is zero
    let mrand = 0x0123_4567_89ab_cdef_0123_4567_89ab_cdef_u128;

    let mconfirm = toolbox::c1(0, mrand, pres, preq, false, CENTRAL_ADDRESS, false, PERIPHERAL_ADDRESS);

    let mut pdu = vec![0x03];
    pdu.extend_from_slice(&mconfirm.to_le_bytes());

    let status = peripheral.process_command(&mut channel, &pdu).await.unwrap();

    assert_eq!(Status::None, status);

    let sconfirm_pdu = channel.outbound.pop_front().unwrap();

    assert_eq!(0x03, sconfirm_pdu[0]);

    let sconfirm = u128::from_le_bytes(sconfirm_pdu[1..].try_into().unwrap());

    let mut pdu = vec![0x04];
    pdu.extend_from_slice(&mrand.to_le_bytes());

    let status = peripheral.process_command(&mut channel, &pdu).await.unwrap();

    let srand_pdu = channel.outbound.pop_front().unwrap();

    assert_eq!(0x04, srand_pdu[0]);

    let srand = u128::from_le_bytes(srand_pdu[1..].try_into().unwrap());

    // the confirm the responder sent commits to the random it revealed
    assert_eq!(
        sconfirm,
        toolbox::c1(0, srand, pres, preq, false, CENTRAL_ADDRESS, false, PERIPHERAL_ADDRESS)
    );

    let Status::StartEncryption(key) = status else {
        panic!("responder did not produce the short term key");
    };

    assert_eq!(toolbox::s1(0, srand, mrand), key.key);
    assert_eq!(16, key.size);
    assert_eq!(0, key.ediv);
    assert_eq!(0, key.rand);
}

fn pdu_as_u128(pdu: &[u8]) -> u128 {
    pdu.iter()
        .enumerate()
        .fold(0u128, |value, (i, byte)| value | u128::from(*byte) << (8 * i))
}
