//! The pairing context pool
//!
//! A [`ContextPool`] owns one Security Manager per connection, supervises the protocol timeout
//! of each of them and ties bonding to a [`KeyStore`]. It is the piece that turns the single
//! connection Security Managers of [`initiator`](crate::initiator) and
//! [`responder`](crate::responder) into something a multi-connection host stack can drive.
//!
//! The pool has a fixed capacity set by the `CONNECTIONS` const parameter. The link layer events
//! of the host are routed to it with [`connected`], [`encryption_changed`] and [`disconnected`],
//! and every Security Manager PDU received on any connection goes to [`process_pdu`].
//!
//! # Time
//! This crate cannot read a clock, so [`process_pdu`] and [`check_timeouts`] take a monotonic
//! [`Instant`] from the caller. A context whose timer expired fails silently, every further PDU
//! on that connection is dropped until it is re-established.
//!
//! # Bonding
//! When a peer distributes its identity address the pool looks the identity up with
//! [`KeyStore::find_conflicting`]. Without a conflict the bond proceeds on its own, otherwise
//! [`Status::BondConflict`] is returned and the caller decides with [`resolve_bond_conflict`]
//! whether the fresh bond replaces the stored one. Completed bonds are put into the key store.
//!
//! [`connected`]: ContextPool::connected
//! [`encryption_changed`]: ContextPool::encryption_changed
//! [`disconnected`]: ContextPool::disconnected
//! [`process_pdu`]: ContextPool::process_pdu
//! [`check_timeouts`]: ContextPool::check_timeouts
//! [`resolve_bond_conflict`]: ContextPool::resolve_bond_conflict

use crate::timeout::{Instant, PairingTimer, SecurityElevationRetry};
use crate::{initiator, responder, BondConflict, Error, KeyStore, Keys, PairingState, SmpChannel, Status};

macro_rules! error {
    ($channel:ty) => {
        crate::SecurityManagerError<<$channel as crate::SmpChannel>::SendErr>
    };
}

/// The handle identifying a connection
///
/// This is the connection handle of the HCI, but any value that uniquely identifies the link
/// works, the pool only compares handles for equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(pub u16);

/// The Security Manager of one connection, in either role
///
/// The central of a connection pairs with an [`initiator::SecurityManager`] and the peripheral
/// with a [`responder::SecurityManager`].
pub enum LinkSecurityManager {
    Initiator(initiator::SecurityManager),
    Responder(responder::SecurityManager),
}

impl LinkSecurityManager {
    /// Get the keys of the last successful bonding
    pub fn get_keys(&self) -> Option<&Keys> {
        match self {
            LinkSecurityManager::Initiator(sm) => sm.get_keys(),
            LinkSecurityManager::Responder(sm) => sm.get_keys(),
        }
    }

    /// Get the coarse state of pairing
    pub fn state(&self) -> PairingState {
        match self {
            LinkSecurityManager::Initiator(sm) => sm.state(),
            LinkSecurityManager::Responder(sm) => sm.state(),
        }
    }

    /// Check whether a pairing procedure is in progress
    pub fn is_pairing(&self) -> bool {
        match self {
            LinkSecurityManager::Initiator(sm) => sm.is_pairing(),
            LinkSecurityManager::Responder(sm) => sm.is_pairing(),
        }
    }

    fn is_awaiting_peer(&self) -> bool {
        match self {
            LinkSecurityManager::Initiator(sm) => sm.is_awaiting_peer(),
            LinkSecurityManager::Responder(sm) => sm.is_awaiting_peer(),
        }
    }

    fn on_timeout(&mut self) {
        match self {
            LinkSecurityManager::Initiator(sm) => sm.on_timeout(),
            LinkSecurityManager::Responder(sm) => sm.on_timeout(),
        }
    }

    fn reset(&mut self) {
        match self {
            LinkSecurityManager::Initiator(sm) => sm.reset(),
            LinkSecurityManager::Responder(sm) => sm.reset(),
        }
    }

    async fn process_command<C>(&mut self, channel: &mut C, pdu: &[u8]) -> Result<Status, error!(C)>
    where
        C: SmpChannel,
    {
        match self {
            LinkSecurityManager::Initiator(sm) => sm.process_command(channel, pdu).await,
            LinkSecurityManager::Responder(sm) => sm.process_command(channel, pdu).await,
        }
    }

    async fn encryption_changed<C>(&mut self, channel: &mut C, is_encrypted: bool) -> Result<Status, error!(C)>
    where
        C: SmpChannel,
    {
        match self {
            LinkSecurityManager::Initiator(sm) => sm.encryption_changed(channel, is_encrypted).await,
            LinkSecurityManager::Responder(sm) => sm.encryption_changed(channel, is_encrypted).await,
        }
    }

    async fn resolve_peer_identity<C>(&mut self, channel: &mut C, is_accepted: bool) -> Result<Status, error!(C)>
    where
        C: SmpChannel,
    {
        match self {
            LinkSecurityManager::Initiator(sm) => sm.resolve_peer_identity(channel, is_accepted).await,
            LinkSecurityManager::Responder(sm) => sm.resolve_peer_identity(channel, is_accepted).await,
        }
    }

    /// Start pairing again, in whichever way the role allows
    async fn elevate_security<C>(&mut self, channel: &mut C) -> Result<(), error!(C)>
    where
        C: SmpChannel,
    {
        match self {
            LinkSecurityManager::Initiator(sm) => sm.start_pairing(channel).await.map(|_| ()),
            LinkSecurityManager::Responder(sm) => sm.request_security(channel).await,
        }
    }
}

impl From<initiator::SecurityManager> for LinkSecurityManager {
    fn from(security_manager: initiator::SecurityManager) -> Self {
        LinkSecurityManager::Initiator(security_manager)
    }
}

impl From<responder::SecurityManager> for LinkSecurityManager {
    fn from(security_manager: responder::SecurityManager) -> Self {
        LinkSecurityManager::Responder(security_manager)
    }
}

struct LinkContext {
    handle: ConnectionHandle,
    security_manager: LinkSecurityManager,
    timer: PairingTimer,
    retry: SecurityElevationRetry,
    /// Once the protocol timeout expired the connection stays silent until re-established
    timed_out: bool,
}

/// A fixed capacity pool of pairing contexts
///
/// See the [module](self) documentation.
pub struct ContextPool<S: KeyStore, const CONNECTIONS: usize = 4> {
    store: S,
    contexts: heapless::Vec<LinkContext, CONNECTIONS>,
}

impl<S: KeyStore, const CONNECTIONS: usize> ContextPool<S, CONNECTIONS> {
    /// Create a `ContextPool` backed by the key store
    pub fn new(store: S) -> Self {
        ContextPool {
            store,
            contexts: heapless::Vec::new(),
        }
    }

    /// Get the key store
    pub fn key_store(&self) -> &S {
        &self.store
    }

    /// Get the key store for modification
    pub fn key_store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Split borrow of the key store and the context of `handle`
    fn store_and_context(&mut self, handle: ConnectionHandle) -> Result<(&mut S, &mut LinkContext), Error> {
        let context = self
            .contexts
            .iter_mut()
            .find(|context| context.handle == handle)
            .ok_or(Error::UnknownConnection)?;

        Ok((&mut self.store, context))
    }

    /// Get the Security Manager of a connection
    pub fn security_manager(&self, handle: ConnectionHandle) -> Option<&LinkSecurityManager> {
        self.contexts
            .iter()
            .find(|context| context.handle == handle)
            .map(|context| &context.security_manager)
    }

    /// Add the context of a new connection
    ///
    /// The Security Manager for the connection is built by the caller as its configuration and
    /// role are per-connection decisions. A handle of a previous connection may be reused, the
    /// stale context is replaced.
    pub fn connected<M>(&mut self, handle: ConnectionHandle, security_manager: M) -> Result<(), Error>
    where
        M: Into<LinkSecurityManager>,
    {
        self.disconnected(handle);

        let context = LinkContext {
            handle,
            security_manager: security_manager.into(),
            timer: PairingTimer::new(),
            retry: SecurityElevationRetry::new(),
            timed_out: false,
        };

        self.contexts.push(context).map_err(|_| {
            log::error!("(SM) no pairing context left for connection {:?}", handle);

            Error::PairingContextsExhausted
        })
    }

    /// Remove the context of a disconnected connection
    ///
    /// Any pairing in progress is abandoned and its secrets are wiped. Bonding keys that were
    /// not yet in the key store are lost with the context.
    pub fn disconnected(&mut self, handle: ConnectionHandle) {
        if let Some(index) = self.contexts.iter().position(|context| context.handle == handle) {
            let mut context = self.contexts.swap_remove(index);

            context.security_manager.reset();
        }
    }

    /// Process a Security Manager PDU received on a connection
    ///
    /// `now` is a timestamp of the current time, used to supervise the protocol timeout. The
    /// returned [`Status`] is the same as from the Security Manager of the connection, except
    /// that [`Status::PeerIdentity`] is resolved internally against the key store and surfaces
    /// as [`Status::BondConflict`] only when the store holds a conflicting bond.
    pub async fn process_pdu<C>(
        &mut self,
        handle: ConnectionHandle,
        channel: &mut C,
        pdu: &[u8],
        now: Instant,
    ) -> Result<Status, error!(C)>
    where
        C: SmpChannel,
    {
        let (store, context) = self.store_and_context(handle)?;

        if context.timed_out {
            log::trace!("(SM) dropping PDU on timed out connection {:?}", handle);

            return Ok(Status::None);
        }

        if context.timer.expired(now) {
            context.timer.clear();

            context.timed_out = true;

            context.security_manager.on_timeout();

            return Ok(Status::None);
        }

        let status = context.security_manager.process_command(channel, pdu).await?;

        Self::after_engine(store, context, channel, status, now).await
    }

    /// Route the result of an encryption change to a connection
    ///
    /// This both finishes a pairing procedure that was waiting on encryption and, when
    /// encrypting with stored keys failed, retries security from scratch once per connection.
    pub async fn encryption_changed<C>(
        &mut self,
        handle: ConnectionHandle,
        channel: &mut C,
        is_encrypted: bool,
        now: Instant,
    ) -> Result<Status, error!(C)>
    where
        C: SmpChannel,
    {
        let (store, context) = self.store_and_context(handle)?;

        let was_pairing = context.security_manager.is_pairing();

        let status = context.security_manager.encryption_changed(channel, is_encrypted).await?;

        if !is_encrypted && !was_pairing && context.retry.try_retry() {
            // the peer may have lost its copy of the bond, pair once more from nothing
            log::info!("(SM) encryption with stored keys failed, retrying security");

            context.security_manager.elevate_security(channel).await?;
        }

        Self::after_engine(store, context, channel, status, now).await
    }

    /// Resolve a [`Status::BondConflict`]
    ///
    /// With `replace_existing` the fresh bond is committed over the stored one, otherwise the
    /// peer's identity and its keys are discarded while the rest of bonding continues.
    pub async fn resolve_bond_conflict<C>(
        &mut self,
        handle: ConnectionHandle,
        channel: &mut C,
        replace_existing: bool,
        now: Instant,
    ) -> Result<Status, error!(C)>
    where
        C: SmpChannel,
    {
        let (store, context) = self.store_and_context(handle)?;

        let status = context
            .security_manager
            .resolve_peer_identity(channel, replace_existing)
            .await?;

        Self::after_engine(store, context, channel, status, now).await
    }

    /// Check the protocol timers of every context
    ///
    /// Called periodically (or off a platform timer wheel) so that a pairing procedure does not
    /// need an inbound PDU to notice its deadline passed.
    pub fn check_timeouts(&mut self, now: Instant) {
        for context in self.contexts.iter_mut() {
            if context.timer.expired(now) {
                context.timer.clear();

                context.timed_out = true;

                context.security_manager.on_timeout();
            }
        }
    }

    /// Handle the statuses the pool acts upon and rearm the context's timer
    async fn after_engine<C>(
        store: &mut S,
        context: &mut LinkContext,
        channel: &mut C,
        status: Status,
        now: Instant,
    ) -> Result<Status, error!(C)>
    where
        C: SmpChannel,
    {
        let status = match status {
            Status::PeerIdentity(identity) => match store.find_conflicting(&identity) {
                Ok(Some(existing)) => {
                    let existing = existing.get_peer_identity().unwrap_or(identity);

                    Status::BondConflict(BondConflict {
                        existing,
                        incoming: identity,
                    })
                }
                Ok(None) => context.security_manager.resolve_peer_identity(channel, true).await?,
                Err(e) => {
                    log::error!("(SM) key store lookup failed: {:?}", e);

                    context.security_manager.resolve_peer_identity(channel, false).await?
                }
            },
            other => other,
        };

        if let Status::BondingComplete = status {
            if let Some(keys) = context.security_manager.get_keys() {
                if let Err(e) = store.put(keys.clone()) {
                    log::error!("(SM) failed to store bonding keys: {:?}", e);
                }
            }
        }

        if context.security_manager.is_awaiting_peer() {
            context.timer.restart(now);
        } else {
            context.timer.clear();
        }

        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pairing::PairingFailedReason;
    use crate::{BluetoothDeviceAddress, MemoryKeyStore};
    use core::time::Duration;

    struct SilentChannel {
        sent: alloc::vec::Vec<alloc::vec::Vec<u8>>,
    }

    impl SilentChannel {
        fn new() -> Self {
            SilentChannel { sent: alloc::vec::Vec::new() }
        }
    }

    impl SmpChannel for SilentChannel {
        type SendErr = core::convert::Infallible;

        async fn send_pdu(&mut self, pdu: &[u8]) -> Result<(), Self::SendErr> {
            self.sent.push(pdu.to_vec());

            Ok(())
        }
    }

    fn responder() -> responder::SecurityManager {
        responder::SecurityManagerBuilder::new(
            BluetoothDeviceAddress([1, 2, 3, 4, 5, 6]),
            BluetoothDeviceAddress([6, 5, 4, 3, 2, 1]),
            false,
            false,
        )
        .build()
    }

    #[test]
    fn pool_capacity_is_enforced() {
        let mut pool: ContextPool<MemoryKeyStore, 2> = ContextPool::new(MemoryKeyStore::new());

        pool.connected(ConnectionHandle(1), responder()).unwrap();
        pool.connected(ConnectionHandle(2), responder()).unwrap();

        assert_eq!(
            Err(Error::PairingContextsExhausted),
            pool.connected(ConnectionHandle(3), responder())
        );

        pool.disconnected(ConnectionHandle(1));

        pool.connected(ConnectionHandle(3), responder()).unwrap();
    }

    #[test]
    fn reconnecting_replaces_the_stale_context() {
        let mut pool: ContextPool<MemoryKeyStore, 1> = ContextPool::new(MemoryKeyStore::new());

        pool.connected(ConnectionHandle(7), responder()).unwrap();
        pool.connected(ConnectionHandle(7), responder()).unwrap();

        assert!(pool.security_manager(ConnectionHandle(7)).is_some());
    }

    #[tokio::test]
    async fn pdu_on_an_unknown_connection_is_an_error() {
        let mut pool: ContextPool<MemoryKeyStore> = ContextPool::new(MemoryKeyStore::new());

        let mut channel = SilentChannel::new();

        let result = pool
            .process_pdu(ConnectionHandle(1), &mut channel, &[0x03; 17], Duration::ZERO)
            .await;

        assert!(matches!(
            result,
            Err(crate::SecurityManagerError::Error(Error::UnknownConnection))
        ));
    }

    #[tokio::test]
    async fn confirm_before_pairing_fails_the_procedure() {
        let mut pool: ContextPool<MemoryKeyStore> = ContextPool::new(MemoryKeyStore::new());

        let mut channel = SilentChannel::new();

        pool.connected(ConnectionHandle(1), responder()).unwrap();

        // a pairing confirm while idle
        let mut pdu = [0u8; 17];
        pdu[0] = 0x03;

        let status = pool
            .process_pdu(ConnectionHandle(1), &mut channel, &pdu, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(
            Status::PairingFailed(PairingFailedReason::UnspecifiedReason),
            status
        );

        // the pairing failed PDU went out
        assert_eq!(&[0x05, 0x08], channel.sent.last().unwrap().as_slice());
    }

    #[tokio::test]
    async fn disconnecting_mid_pairing_starts_the_handle_over_clean() {
        let mut pool: ContextPool<MemoryKeyStore> = ContextPool::new(MemoryKeyStore::new());

        let mut channel = SilentChannel::new();

        pool.connected(ConnectionHandle(1), responder()).unwrap();

        let request = [0x01, 0x04, 0x00, 0b0000_1001, 16, 0x07, 0x07];

        pool.process_pdu(ConnectionHandle(1), &mut channel, &request, Duration::ZERO)
            .await
            .unwrap();

        assert!(pool.security_manager(ConnectionHandle(1)).unwrap().is_pairing());

        // the link dropped while pairing was underway
        pool.disconnected(ConnectionHandle(1));

        assert!(pool.security_manager(ConnectionHandle(1)).is_none());

        // a PDU for the dead handle is an error, not a stale context
        let result = pool
            .process_pdu(ConnectionHandle(1), &mut channel, &request, Duration::ZERO)
            .await;

        assert!(matches!(
            result,
            Err(crate::SecurityManagerError::Error(Error::UnknownConnection))
        ));

        // reconnecting the same handle starts from scratch
        pool.connected(ConnectionHandle(1), responder()).unwrap();

        assert!(!pool.security_manager(ConnectionHandle(1)).unwrap().is_pairing());

        let status = pool
            .process_pdu(ConnectionHandle(1), &mut channel, &request, Duration::ZERO)
            .await
            .unwrap();

        assert!(!matches!(status, Status::PairingFailed(_)));
        assert!(pool.security_manager(ConnectionHandle(1)).unwrap().is_pairing());
    }

    #[tokio::test]
    async fn expired_context_drops_pdus_silently() {
        let mut pool: ContextPool<MemoryKeyStore> = ContextPool::new(MemoryKeyStore::new());

        let mut channel = SilentChannel::new();

        pool.connected(ConnectionHandle(1), responder()).unwrap();

        // a pairing request arms the timer while the responder waits on the public key
        let request = [0x01, 0x04, 0x00, 0b0000_1001, 16, 0x07, 0x07];

        pool.process_pdu(ConnectionHandle(1), &mut channel, &request, Duration::ZERO)
            .await
            .unwrap();

        let sent_during_pairing = channel.sent.len();

        // thirty seconds later the context is dead and stays quiet
        let status = pool
            .process_pdu(ConnectionHandle(1), &mut channel, &request, Duration::from_secs(31))
            .await
            .unwrap();

        assert_eq!(Status::None, status);

        let status = pool
            .process_pdu(ConnectionHandle(1), &mut channel, &request, Duration::from_secs(32))
            .await
            .unwrap();

        assert_eq!(Status::None, status);
        assert_eq!(sent_during_pairing, channel.sent.len());
    }
}
