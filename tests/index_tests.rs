use serde::{Deserialize, Serialize};
use statemap::prelude::advanced::KvStore;
use statemap::prelude::dx::*;
use statemap::{KeyRef, LedgerTx};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Asset {
    id: String,
    owner: String,
    serial: String,
    tags: Vec<String>,
}

fn asset(id: &str, owner: &str, serial: &str, tags: &[&str]) -> Asset {
    Asset {
        id: id.to_string(),
        owner: owner.to_string(),
        serial: serial.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
    }
}

#[derive(Debug, PartialEq)]
struct Assets(Vec<Asset>);

impl EntityList<Asset> for Assets {
    fn from_items(items: Vec<Asset>) -> Self {
        Assets(items)
    }
}

fn asset_mapping() -> StateMapping<Asset> {
    StateMapping::<Asset>::new()
        .field("id", |a: &Asset| a.id.clone())
        .field("owner", |a: &Asset| a.owner.clone())
        .field("serial", |a: &Asset| a.serial.clone())
        .primary_key_fields(["id"])
        .index(IndexDef::fields("Owner", ["owner"]))
        .index(IndexDef::fields("Serial", ["serial"]).unique().required())
        .index(IndexDef::keyer("Tag", |a: &Asset| {
            Ok(a.tags.iter().map(|t| vec![t.clone()]).collect())
        }))
        .list::<Assets>()
}

fn mappings() -> StateMappings {
    StateMappings::new().with_mapping(asset_mapping()).unwrap()
}

fn seed(state: &mut MappedState<'_, &mut LedgerTx>) {
    state
        .insert(&asset("a1", "alice", "SN-1", &["red", "big"]))
        .unwrap();
    state
        .insert(&asset("a2", "alice", "SN-2", &["red"]))
        .unwrap();
    state.insert(&asset("a3", "bob", "SN-3", &[])).unwrap();
}

fn ids(items: &[Asset]) -> Vec<&str> {
    items.iter().map(|a| a.id.as_str()).collect()
}

#[test]
fn test_non_unique_index_lists_all_holders() {
    let mappings = mappings();
    let ledger = MemoryLedger::new();
    let mut tx = ledger.begin();
    let mut state = MappedState::new(&mut tx, &mappings);
    seed(&mut state);

    let alice = state.list_by_index::<Asset>("Owner", &["alice"]).unwrap();
    assert_eq!(ids(&alice), vec!["a1", "a2"]);

    let first = state.get_by_index::<Asset>("Owner", &["alice"]).unwrap();
    assert_eq!(first.id, "a1");

    assert!(state
        .list_by_index::<Asset>("Owner", &["carol"])
        .unwrap()
        .is_empty());
}

#[test]
fn test_multi_valued_index_follows_updates() {
    let mappings = mappings();
    let ledger = MemoryLedger::new();
    let mut tx = ledger.begin();
    let mut state = MappedState::new(&mut tx, &mappings);
    seed(&mut state);

    let red = state.list_by_index::<Asset>("Tag", &["red"]).unwrap();
    assert_eq!(ids(&red), vec!["a1", "a2"]);
    let big = state.list_by_index::<Asset>("Tag", &["big"]).unwrap();
    assert_eq!(ids(&big), vec!["a1"]);

    state
        .put(&asset("a1", "alice", "SN-1", &["blue", "big"]))
        .unwrap();

    let red = state.list_by_index::<Asset>("Tag", &["red"]).unwrap();
    assert_eq!(ids(&red), vec!["a2"]);
    let blue = state.list_by_index::<Asset>("Tag", &["blue"]).unwrap();
    assert_eq!(ids(&blue), vec!["a1"]);
}

#[test]
fn test_owner_change_moves_reference() {
    let mappings = mappings();
    let ledger = MemoryLedger::new();
    let mut tx = ledger.begin();
    let mut state = MappedState::new(&mut tx, &mappings);
    seed(&mut state);

    state.put(&asset("a3", "alice", "SN-3", &[])).unwrap();

    let alice = state.list_by_index::<Asset>("Owner", &["alice"]).unwrap();
    assert_eq!(ids(&alice), vec!["a1", "a2", "a3"]);
    let err = state.get_by_index::<Asset>("Owner", &["bob"]).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_required_index_rejects_empty_value() {
    let mappings = mappings();
    let ledger = MemoryLedger::new();
    let mut tx = ledger.begin();
    {
        let mut state = MappedState::new(&mut tx, &mappings);
        let err = state.insert(&asset("a9", "alice", "", &[])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RequiredIndexEmpty);
    }
    assert_eq!(tx.change_count(), 0);
}

#[test]
fn test_unknown_index_name() {
    let mappings = mappings();
    let ledger = MemoryLedger::new();
    let mut tx = ledger.begin();
    let state = MappedState::new(&mut tx, &mappings);

    let err = state.get_by_index::<Asset>("Colour", &["red"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_key_ref_record_names_primary_key() {
    let mappings = mappings();
    let mut ledger = MemoryLedger::new();
    let mut tx = ledger.begin();
    {
        let mut state = MappedState::new(&mut tx, &mappings);
        seed(&mut state);
        let refs = state
            .key_refs(&asset("a1", "alice", "SN-1", &["red", "big"]))
            .unwrap();
        assert_eq!(refs.len(), 4);
        let serial = refs.iter().find(|r| r.index == "Serial").unwrap();
        assert!(serial.unique);
        assert_eq!(serial.primary_key, Key::of(["Asset", "a1"]).unwrap());
    }
    ledger.commit(tx).unwrap();

    let unique = Key::of(["_idx", "Asset", "Serial", "SN-1"]).unwrap().encode();
    let bytes = ledger.get_committed(&unique).unwrap();
    let key_ref: KeyRef = rmp_serde::from_slice(&bytes).unwrap();
    assert_eq!(key_ref.primary_key, Key::of(["Asset", "a1"]).unwrap());

    let owner = Key::of(["_idx", "Asset", "Owner", "alice", "a2"])
        .unwrap()
        .encode();
    assert!(ledger.get_committed(&owner).is_some());
}

#[test]
fn test_list_container() {
    let mappings = mappings();
    let ledger = MemoryLedger::new();
    let mut tx = ledger.begin();
    let mut state = MappedState::new(&mut tx, &mappings);
    seed(&mut state);

    let Assets(items) = state.list_container::<Asset, Assets>().unwrap();
    assert_eq!(ids(&items), vec!["a1", "a2", "a3"]);

    struct Other;
    impl EntityList<Asset> for Other {
        fn from_items(_: Vec<Asset>) -> Self {
            Other
        }
    }
    let err = state.list_container::<Asset, Other>().err().unwrap();
    assert_eq!(err.kind(), ErrorKind::ListContainerUndefined);
}

#[test]
fn test_re_registration_replaces_mapping() {
    let mappings = mappings()
        .with_mapping(asset_mapping().namespace("Inventory"))
        .unwrap();
    assert_eq!(mappings.len(), 1);

    let ledger = MemoryLedger::new();
    let mut tx = ledger.begin();
    let mut state = MappedState::new(&mut tx, &mappings);
    state.insert(&asset("a1", "alice", "SN-1", &[])).unwrap();

    assert!(state
        .exists_key(&Key::of(["Inventory", "a1"]).unwrap())
        .unwrap());
    let err = state
        .exists_key(&Key::of(["Asset", "a1"]).unwrap())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MappingNotFound);
}

#[test]
fn test_reserved_namespace_registration() {
    let err = StateMappings::new()
        .with_mapping(asset_mapping().namespace(statemap::KEY_REF_NAMESPACE))
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_prefix_and_encryption_config() {
    let mappings = mappings();
    let mut ledger = MemoryLedger::new();
    let config = StateConfig::new()
        .key_prefix(["tenant", "acme"])
        .encryption_key([7u8; 32]);

    let mut tx = ledger.begin();
    {
        let mut state = MappedState::with_config(&mut tx, &mappings, config.clone()).unwrap();
        seed(&mut state);
        assert_eq!(
            state.get_by_index::<Asset>("Serial", &["SN-2"]).unwrap().id,
            "a2"
        );
        assert_eq!(state.list::<Asset>().unwrap().len(), 3);
    }
    ledger.commit(tx).unwrap();

    let tenant = Key::of(["tenant", "acme"]).unwrap().encode();
    assert!(ledger.keys().iter().all(|key| key.starts_with(&tenant)));

    let stored = ledger
        .get_committed(&Key::of(["tenant", "acme", "Asset", "a1"]).unwrap().encode())
        .unwrap();
    assert!(stored.starts_with(b"SMG1"));
    assert!(!stored.windows(5).any(|w| w == b"alice"));

    let mut tx = ledger.begin();
    let plain = MappedState::new(&mut tx, &mappings);
    assert!(!plain.exists::<Asset>(Lookup::id(["a1"])).unwrap());

    let wrong_key = MappedState::with_config(
        &mut tx,
        &mappings,
        StateConfig::new()
            .key_prefix(["tenant", "acme"])
            .encryption_key([8u8; 32]),
    )
    .unwrap();
    assert!(wrong_key.get::<Asset>(Lookup::id(["a1"])).is_err());
}

#[test]
fn test_json_codec_is_readable() {
    let mappings = mappings();
    let mut ledger = MemoryLedger::new();
    let mut tx = ledger.begin();
    {
        let mut state = MappedState::new(&mut tx, &mappings).use_codec(Codec::Json);
        state.insert(&asset("a1", "alice", "SN-1", &[])).unwrap();
    }
    ledger.commit(tx).unwrap();

    let stored = ledger
        .get_committed(&Key::of(["Asset", "a1"]).unwrap().encode())
        .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&stored).unwrap();
    assert_eq!(value["owner"], "alice");
}

#[test]
fn test_store_reads_own_writes() {
    let mappings = mappings();
    let ledger = MemoryLedger::new();
    let mut tx = ledger.begin();
    {
        let mut state = MappedState::new(&mut tx, &mappings);
        seed(&mut state);
        state.delete::<Asset>(Lookup::id(["a2"])).unwrap();
        assert_eq!(state.list::<Asset>().unwrap().len(), 2);
    }
    let owner_prefix = Key::of(["_idx", "Asset", "Owner"]).unwrap().encode();
    let owners = tx.scan_prefix(&owner_prefix).unwrap();
    assert_eq!(owners.len(), 2);
}
