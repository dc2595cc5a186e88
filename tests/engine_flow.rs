use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;

use storage_ledger::{
    auth::{Authorization, Keyring, SignedEvent},
    events::{Engine, Event, Transfer},
    links::{LinkKey, RemoveLink, SetLink},
    pricing::{Share, SHARE_SCALE},
    store::{JsonFileStore, MemoryStore, RecordStore},
    LedgerError,
};

const LEDGER: &str = "storage";

fn deposit(account: &str, amount: u64) -> Event {
    Event::Transfer(Transfer {
        from: account.into(),
        to: LEDGER.into(),
        amount,
        memo: Some("buy storage".into()),
    })
}

fn withdraw(account: &str, amount: u64) -> Event {
    Event::Transfer(Transfer {
        from: LEDGER.into(),
        to: account.into(),
        amount,
        memo: None,
    })
}

fn set_link(owner: &str, path: &str, size: u64, hosting_requested: bool) -> Event {
    Event::SetLink(SetLink {
        owner: owner.into(),
        path: path.into(),
        remote_locator: format!("ipfs://{path}"),
        size,
        hosting_requested,
    })
}

fn remove_link(owner: &str, path: &str, keep_link: bool) -> Event {
    Event::RemoveLink(RemoveLink {
        owner: owner.into(),
        path: path.into(),
        keep_link,
    })
}

fn engine(supply: u64) -> Engine<MemoryStore> {
    let mut engine = Engine::new(MemoryStore::new(), LEDGER);
    engine.genesis(supply, false).unwrap();
    engine
}

fn reserved(engine: &Engine<MemoryStore>) -> Share {
    engine.store().capacity.as_ref().unwrap().reserved
}

#[test]
fn worked_example() {
    let mut engine = engine(1024);
    let alice = Authorization::single("alice");

    engine.apply(&deposit("alice", 1_000_000_000), &alice).unwrap();
    let allocation = &engine.store().allocations["alice"];
    assert_eq!(allocation.percent_allocated, Share::ONE);
    assert_eq!(allocation.total_paid, 1_000_000_000);
    assert_eq!(reserved(&engine), Share::ONE);

    engine.apply(&withdraw("alice", 500_000_000), &alice).unwrap();
    let half = Share::from_raw(SHARE_SCALE / 2);
    let allocation = &engine.store().allocations["alice"];
    assert_eq!(allocation.percent_allocated, half);
    assert_eq!(allocation.total_paid, 500_000_000);
    assert_eq!(reserved(&engine), half);
}

#[test]
fn overdrawn_withdrawal_changes_nothing() {
    let mut engine = engine(1024);
    let alice = Authorization::single("alice");
    engine.apply(&deposit("alice", 42), &alice).unwrap();
    let before = engine.store().snapshot();

    let err = engine.apply(&withdraw("alice", 43), &alice).unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
    let after = engine.store().snapshot();
    assert_eq!(before.merkle_root, after.merkle_root);
    assert_eq!(before.meta.height, after.meta.height);
}

#[test]
fn withdrawal_requires_recipient_authority() {
    let mut engine = engine(1024);
    engine
        .apply(&deposit("alice", 10), &Authorization::single("alice"))
        .unwrap();
    let err = engine
        .apply(&withdraw("alice", 10), &Authorization::single(LEDGER))
        .unwrap_err();
    assert!(matches!(err, LedgerError::Unauthorized(a) if a == "alice"));
}

#[test]
fn unrelated_transfer_is_unknown() {
    let mut engine = engine(1024);
    let event = Event::Transfer(Transfer {
        from: "alice".into(),
        to: "bob".into(),
        amount: 5,
        memo: None,
    });
    let err = engine
        .apply(&event, &Authorization::new(["alice", "bob"]))
        .unwrap_err();
    assert!(matches!(err, LedgerError::UnknownTransfer { .. }));
}

#[test]
fn quota_guard_at_the_boundary() {
    let mut engine = engine(1024);
    let alice = Authorization::single("alice");
    // a quarter share of 1024 bytes
    engine.apply(&deposit("alice", 250_000_000), &alice).unwrap();
    engine.apply(&set_link("alice", "/a", 100, true), &alice).unwrap();
    let available = 256 - 100;

    let err = engine
        .apply(&set_link("alice", "/b", available + 1, true), &alice)
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::QuotaExceeded { requested, available: 156, .. } if requested == 157
    ));
    engine
        .apply(&set_link("alice", "/b", available, true), &alice)
        .unwrap();
    assert_eq!(engine.store().allocations["alice"].used_bytes, 256);
}

#[test]
fn set_link_charges_and_remove_link_refunds_usage() {
    let mut engine = engine(1000);
    let bob = Authorization::single("bob");
    engine.apply(&deposit("bob", 1_000_000_000), &bob).unwrap();

    engine.apply(&set_link("bob", "/video", 700, true), &bob).unwrap();
    assert_eq!(engine.store().allocations["bob"].used_bytes, 700);

    engine.apply(&remove_link("bob", "/video", false), &bob).unwrap();
    assert_eq!(engine.store().allocations["bob"].used_bytes, 0);
    let err = engine
        .apply(&remove_link("bob", "/video", false), &bob)
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound(_)));
}

#[test]
fn retained_link_stays_loadable_and_unaccepted() {
    let mut engine = engine(1000);
    let carol = Authorization::single("carol");
    engine.apply(&deposit("carol", 1_000_000_000), &carol).unwrap();
    engine.apply(&set_link("carol", "/doc", 10, true), &carol).unwrap();

    engine.apply(&remove_link("carol", "/doc", true), &carol).unwrap();
    let record = engine
        .store()
        .link(&LinkKey::new("carol", "/doc"))
        .unwrap()
        .expect("retained link");
    assert!(!record.accepted);
    assert_eq!(record.remote_locator, "ipfs:///doc");
    assert_eq!(engine.store().allocations["carol"].used_bytes, 0);

    // deleting the retained record afterwards must not refund twice
    engine.apply(&remove_link("carol", "/doc", false), &carol).unwrap();
    assert_eq!(engine.store().allocations["carol"].used_bytes, 0);
}

#[test]
fn link_owner_must_authorise() {
    let mut engine = engine(1000);
    let err = engine
        .apply(&set_link("dave", "/x", 1, false), &Authorization::single("eve"))
        .unwrap_err();
    assert!(matches!(err, LedgerError::Unauthorized(a) if a == "dave"));
    assert!(engine.store().links.is_empty());
}

#[test]
fn signed_events_apply_once() {
    let sk = SigningKey::generate(&mut OsRng);
    let mut keyring = Keyring::new();
    keyring.insert("alice", sk.verifying_key());
    let mut engine = engine(1024);

    let mut signed = SignedEvent::new(1, deposit("alice", 1_000));
    signed.sign("alice", &sk).unwrap();
    engine.apply_signed(&signed, &keyring).unwrap();
    assert!(matches!(
        engine.apply_signed(&signed, &keyring),
        Err(LedgerError::DuplicateEvent(_))
    ));

    let mut again = SignedEvent::new(2, deposit("alice", 1_000));
    again.sign("alice", &sk).unwrap();
    engine.apply_signed(&again, &keyring).unwrap();
    assert_eq!(engine.store().allocations["alice"].total_paid, 2_000);

    let unsigned = SignedEvent::new(3, deposit("alice", 1));
    assert!(matches!(
        engine.apply_signed(&unsigned, &keyring),
        Err(LedgerError::Unauthorized(_))
    ));
}

#[test]
fn rejected_signed_event_can_be_retried_after_fix() {
    let sk = SigningKey::generate(&mut OsRng);
    let mut keyring = Keyring::new();
    keyring.insert("alice", sk.verifying_key());
    let mut engine = engine(1024);

    let mut signed = SignedEvent::new(1, withdraw("alice", 5));
    signed.sign("alice", &sk).unwrap();
    assert!(matches!(
        engine.apply_signed(&signed, &keyring),
        Err(LedgerError::InsufficientBalance { .. })
    ));
    assert!(!engine.store().has_receipt(&signed.digest().unwrap()).unwrap());

    engine
        .apply(&deposit("alice", 5), &Authorization::single("alice"))
        .unwrap();
    engine.apply_signed(&signed, &keyring).unwrap();
    assert_eq!(engine.store().allocations["alice"].total_paid, 0);
}

#[test]
fn file_backed_engine_persists_between_runs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    let alice = Authorization::single("alice");

    let mut engine = Engine::new(JsonFileStore::open(&path).unwrap(), LEDGER);
    engine.genesis(2048, false).unwrap();
    engine.apply(&deposit("alice", 500_000_000), &alice).unwrap();
    engine.apply(&set_link("alice", "/a", 1000, true), &alice).unwrap();
    let root = engine.store().state().snapshot().merkle_root;
    drop(engine);

    let mut engine = Engine::new(JsonFileStore::open(&path).unwrap(), LEDGER);
    assert_eq!(engine.store().state().snapshot().merkle_root, root);
    assert!(matches!(
        engine.genesis(2048, false),
        Err(LedgerError::AlreadyInitialized)
    ));
    let err = engine
        .apply(&set_link("alice", "/b", 25, true), &alice)
        .unwrap_err();
    assert!(matches!(err, LedgerError::QuotaExceeded { available: 24, .. }));
}
