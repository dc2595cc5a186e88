//! Event dispatch: every incoming event is routed to exactly one operation,
//! planned against the current state and committed as one batch.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::auth::{Authenticator, Keyring, SignedEvent};
use crate::error::{LedgerError, Result};
use crate::ledger::{AccountId, AllocationManager, Amount, CapacityLedger};
use crate::links::{
    HostingDecision, LinkRegistry, PathValidator, PermissiveValidator, RemoveLink, SetLink,
};
use crate::pricing::{LinearCurve, PricingCurve};
use crate::store::{RecordStore, StateWrite};

/// Native token movement observed by the ledger.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transfer {
    pub from: AccountId,
    pub to: AccountId,
    pub amount: Amount,
    #[serde(default)]
    pub memo: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Transfer(Transfer),
    SetLink(SetLink),
    RemoveLink(RemoveLink),
    AcceptHosting(HostingDecision),
    RejectHosting(HostingDecision),
    /// Any event type this ledger does not handle.
    #[serde(other)]
    Unknown,
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Transfer(_) => "transfer",
            Event::SetLink(_) => "set_link",
            Event::RemoveLink(_) => "remove_link",
            Event::AcceptHosting(_) => "accept_hosting",
            Event::RejectHosting(_) => "reject_hosting",
            Event::Unknown => "unknown",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransferKind {
    Deposit { account: AccountId, amount: Amount },
    Withdraw { account: AccountId, amount: Amount },
}

/// Classifies transfers touching the ledger account.
#[derive(Clone, Debug)]
pub struct TransferRouter {
    ledger_account: AccountId,
}

impl TransferRouter {
    pub fn new(ledger_account: impl Into<AccountId>) -> Self {
        Self {
            ledger_account: ledger_account.into(),
        }
    }

    pub fn ledger_account(&self) -> &AccountId {
        &self.ledger_account
    }

    /// Paying the ledger account deposits for the sender; a payment from it
    /// withdraws for the recipient.
    pub fn classify(&self, transfer: &Transfer) -> Result<TransferKind> {
        if transfer.amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let from_ledger = transfer.from == self.ledger_account;
        let to_ledger = transfer.to == self.ledger_account;
        match (from_ledger, to_ledger) {
            (true, false) => Ok(TransferKind::Withdraw {
                account: transfer.to.clone(),
                amount: transfer.amount,
            }),
            (false, true) => Ok(TransferKind::Deposit {
                account: transfer.from.clone(),
                amount: transfer.amount,
            }),
            _ => Err(LedgerError::UnknownTransfer {
                from: transfer.from.clone(),
                to: transfer.to.clone(),
            }),
        }
    }
}

/// Owns the record store and applies events to it one at a time.
pub struct Engine<S, C = LinearCurve, V = PermissiveValidator> {
    store: S,
    router: TransferRouter,
    allocations: AllocationManager<C>,
    links: LinkRegistry<V>,
}

impl<S: RecordStore> Engine<S> {
    pub fn new(store: S, ledger_account: impl Into<AccountId>) -> Self {
        Self::with_parts(
            store,
            TransferRouter::new(ledger_account),
            LinearCurve::default(),
            PermissiveValidator,
        )
    }
}

impl<S, C, V> Engine<S, C, V>
where
    S: RecordStore,
    C: PricingCurve,
    V: PathValidator,
{
    pub fn with_parts(store: S, router: TransferRouter, curve: C, validator: V) -> Self {
        Self {
            store,
            router,
            allocations: AllocationManager::new(curve),
            links: LinkRegistry::new(validator),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Seeds the capacity ledger. Re-running it resets the reservation
    /// total, so it is refused unless `force` is set.
    pub fn genesis(&mut self, total_supply_bytes: u64, force: bool) -> Result<()> {
        if self.store.capacity()?.is_some() && !force {
            return Err(LedgerError::AlreadyInitialized);
        }
        self.store
            .commit(vec![StateWrite::Capacity(CapacityLedger::init(
                total_supply_bytes,
            ))])?;
        info!(
            ledger = %self.router.ledger_account(),
            total_supply_bytes,
            force,
            "capacity ledger initialised"
        );
        Ok(())
    }

    /// Applies `event` with the caller authority `auth`. Either every write
    /// of the event is committed or none is.
    pub fn apply(&mut self, event: &Event, auth: &dyn Authenticator) -> Result<()> {
        let writes = match self.plan(event, auth) {
            Ok(writes) => writes,
            Err(err) => {
                warn!(kind = event.kind(), error = %err, "event rejected");
                return Err(err);
            }
        };
        self.commit(event, writes)
    }

    /// Verifies `signed` against `keyring`, rejects replays, then applies it.
    pub fn apply_signed(&mut self, signed: &SignedEvent, keyring: &Keyring) -> Result<()> {
        let digest = signed.digest()?;
        if self.store.has_receipt(&digest)? {
            let digest = hex::encode(digest);
            warn!(%digest, "replayed event rejected");
            return Err(LedgerError::DuplicateEvent(digest));
        }
        let auth = keyring.verify(signed)?;
        debug!(signers = ?auth.accounts().collect::<Vec<_>>(), nonce = signed.nonce, "signatures verified");
        let mut writes = match self.plan(&signed.event, &auth) {
            Ok(writes) => writes,
            Err(err) => {
                warn!(kind = signed.event.kind(), nonce = signed.nonce, error = %err, "event rejected");
                return Err(err);
            }
        };
        writes.push(StateWrite::Receipt { digest });
        self.commit(&signed.event, writes)
    }

    fn commit(&mut self, event: &Event, writes: Vec<StateWrite>) -> Result<()> {
        let count = writes.len();
        self.store.commit(writes)?;
        match event {
            Event::Transfer(t) => {
                info!(from = %t.from, to = %t.to, amount = t.amount, "transfer applied")
            }
            Event::SetLink(l) => {
                info!(owner = %l.owner, path = %l.path, size = l.size, hosting = l.hosting_requested, "link set")
            }
            Event::RemoveLink(l) => {
                info!(owner = %l.owner, path = %l.path, keep = l.keep_link, "link removed")
            }
            other => debug!(kind = other.kind(), writes = count, "event applied"),
        }
        Ok(())
    }

    fn plan(&self, event: &Event, auth: &dyn Authenticator) -> Result<Vec<StateWrite>> {
        match event {
            Event::Transfer(transfer) => match self.router.classify(transfer)? {
                TransferKind::Deposit { account, amount } => {
                    auth.require_authenticated_as(&account)?;
                    self.allocations.deposit(&self.store, &account, amount)
                }
                TransferKind::Withdraw { account, amount } => {
                    auth.require_authenticated_as(&account)?;
                    self.allocations.withdraw(&self.store, &account, amount)
                }
            },
            Event::SetLink(request) => {
                auth.require_authenticated_as(&request.owner)?;
                self.links.set_link(&self.store, request)
            }
            Event::RemoveLink(request) => {
                auth.require_authenticated_as(&request.owner)?;
                self.links.remove_link(&self.store, request)
            }
            Event::AcceptHosting(decision) => self.links.accept_hosting(decision),
            Event::RejectHosting(decision) => self.links.reject_hosting(decision),
            Event::Unknown => Err(LedgerError::UnknownEvent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Authorization;
    use crate::store::MemoryStore;

    fn transfer(from: &str, to: &str, amount: Amount) -> Transfer {
        Transfer {
            from: from.into(),
            to: to.into(),
            amount,
            memo: None,
        }
    }

    #[test]
    fn router_classifies_by_direction() {
        let router = TransferRouter::new("storage");
        assert_eq!(
            router.classify(&transfer("alice", "storage", 7)).unwrap(),
            TransferKind::Deposit {
                account: "alice".into(),
                amount: 7
            }
        );
        assert_eq!(
            router.classify(&transfer("storage", "alice", 3)).unwrap(),
            TransferKind::Withdraw {
                account: "alice".into(),
                amount: 3
            }
        );
        for (from, to) in [("alice", "bob"), ("storage", "storage")] {
            assert!(matches!(
                router.classify(&transfer(from, to, 1)),
                Err(LedgerError::UnknownTransfer { .. })
            ));
        }
        assert!(matches!(
            router.classify(&transfer("alice", "storage", 0)),
            Err(LedgerError::InvalidAmount)
        ));
    }

    #[test]
    fn unknown_event_types_decode_and_fail() {
        let event: Event = serde_json::from_str(r#"{"type":"mint","to":"alice"}"#).unwrap();
        assert_eq!(event, Event::Unknown);

        let mut engine = Engine::new(MemoryStore::new(), "storage");
        engine.genesis(1024, false).unwrap();
        let err = engine
            .apply(&event, &Authorization::single("alice"))
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnknownEvent));
    }

    #[test]
    fn event_wire_format_is_snake_case_tagged() {
        let event: Event = serde_json::from_str(
            r#"{"type":"set_link","owner":"alice","path":"/x","remote_locator":"Qm","size":3,"hosting_requested":true}"#,
        )
        .unwrap();
        match event {
            Event::SetLink(link) => {
                assert_eq!(link.owner, "alice");
                assert!(link.hosting_requested);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn deposit_requires_sender_authority() {
        let mut engine = Engine::new(MemoryStore::new(), "storage");
        engine.genesis(1024, false).unwrap();
        let event = Event::Transfer(transfer("alice", "storage", 100));

        let err = engine
            .apply(&event, &Authorization::single("bob"))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized(a) if a == "alice"));
        assert!(engine.store().allocations.is_empty());

        engine.apply(&event, &Authorization::single("alice")).unwrap();
        assert_eq!(engine.store().allocations["alice"].total_paid, 100);
    }

    #[test]
    fn genesis_is_guarded_unless_forced() {
        let mut engine = Engine::new(MemoryStore::new(), "storage");
        engine.genesis(1024, false).unwrap();
        assert!(matches!(
            engine.genesis(2048, false),
            Err(LedgerError::AlreadyInitialized)
        ));
        engine.genesis(2048, true).unwrap();
        assert_eq!(
            engine.store().capacity.as_ref().unwrap().total_supply_bytes,
            2048
        );
    }

    #[test]
    fn hosting_decisions_change_nothing() {
        let mut engine = Engine::new(MemoryStore::new(), "storage");
        engine.genesis(1024, false).unwrap();
        let before = engine.store().snapshot().merkle_root;
        let decision = HostingDecision {
            producer: "producer1".into(),
            owner: "alice".into(),
            path: "/a".into(),
            reason: None,
        };
        engine
            .apply(&Event::AcceptHosting(decision.clone()), &Authorization::default())
            .unwrap();
        engine
            .apply(&Event::RejectHosting(decision), &Authorization::default())
            .unwrap();
        assert_eq!(before, engine.store().snapshot().merkle_root);
    }
}
