//! Record and identity adapters running against the in-process store.

use labsync_collab::{
    Access, AnonymousAuth, MemoryStore, MissingDeletePolicy, StoreConfig, StoreRules,
};
use labsync_core::listeners::lock;
use labsync_core::{
    AuthAdapter, DocId, ErrorCode, FieldValue, Fields, Identity, LabDraft, LabError, LabForm, LabPatch,
    LabRecord, LabService, LabStats, LabStatus, RetryPolicy, Subscription, COLLECTION,
};
use std::sync::{Arc, Mutex};

type Deliveries = Arc<Mutex<Vec<Result<Vec<LabRecord>, LabError>>>>;

struct Fixture {
    store: Arc<MemoryStore>,
    auth: AuthAdapter<AnonymousAuth>,
    service: LabService<MemoryStore>,
}

fn fixture_with(config: StoreConfig) -> Fixture {
    let store = Arc::new(MemoryStore::open(config).unwrap());
    let auth = AuthAdapter::with_retry(Arc::new(AnonymousAuth::new()), RetryPolicy::no_retry());
    let service = LabService::new(store.clone(), auth.session());
    Fixture { store, auth, service }
}

async fn signed_in() -> Fixture {
    let fixture = fixture_with(StoreConfig::default());
    fixture.auth.initialize().await.unwrap();
    fixture
}

fn record_feed(service: &LabService<MemoryStore>) -> (Subscription, Deliveries) {
    let deliveries: Deliveries = Arc::new(Mutex::new(Vec::new()));
    let sink = deliveries.clone();
    let subscription = service.subscribe(move |snapshot| lock(&sink).push(snapshot));
    (subscription, deliveries)
}

fn last_names(deliveries: &Deliveries) -> Vec<String> {
    match lock(deliveries).last() {
        Some(Ok(records)) => records.iter().map(|r| r.name.clone()).collect(),
        other => panic!("expected a healthy snapshot, got {other:?}"),
    }
}

// ─── Create ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_form_scenario_persists_coerced_record() {
    let f = signed_in().await;
    let form = LabForm {
        name: "Lab A".into(),
        capacity: "30".into(),
        equipment_count: "".into(),
        status: "closed".into(),
        ..LabForm::default()
    };

    let created = f.service.create(form.validate().unwrap()).await.unwrap();
    let stored = f.service.find_by_id(&created.id).await.unwrap();

    assert_eq!(stored.name, "Lab A");
    assert_eq!(stored.capacity, 30);
    assert_eq!(stored.equipment_count, 0);
    assert_eq!(stored.status, LabStatus::Active);
    assert_eq!(stored, created);
}

#[tokio::test]
async fn test_create_stamps_identity_and_server_time() {
    let f = signed_in().await;
    let uid = f.auth.current_identity().unwrap().uid;

    let before = f.store.clock();
    let created = f.service.create(LabDraft::new("Lab Redes")).await.unwrap();

    assert_eq!(created.created_by, Some(uid.clone()));
    assert_eq!(created.updated_by, Some(uid));
    assert!(created.created_at > before);
    assert_eq!(created.created_at, created.updated_at);

    let doc = f.store.get(COLLECTION, &created.id).unwrap().unwrap();
    assert_eq!(doc.get("createdAt"), Some(&FieldValue::Timestamp(created.created_at)));
    assert_eq!(doc.get("equipmentCount"), Some(&FieldValue::Integer(0)));
}

#[tokio::test]
async fn test_create_forces_active_for_every_status() {
    let f = signed_in().await;
    for status in LabStatus::ALL {
        let draft = LabDraft {
            status,
            ..LabDraft::new(format!("Lab {status}"))
        };
        assert_eq!(f.service.create(draft).await.unwrap().status, LabStatus::Active);
    }
    assert_eq!(f.service.find_by_status(LabStatus::Active).await.len(), 3);
}

#[tokio::test]
async fn test_create_without_identity_writes_nothing() {
    let f = fixture_with(StoreConfig::default());

    let err = f.service.create(LabDraft::new("Lab A")).await.unwrap_err();
    assert_eq!(err, LabError::Auth);
    assert_eq!(f.store.document_count(COLLECTION), 0);

    let err = f
        .service
        .update(&DocId::new("qualquer"), LabPatch::status(LabStatus::Closed))
        .await
        .unwrap_err();
    assert_eq!(err, LabError::Auth);
}

#[tokio::test]
async fn test_create_rejects_blank_name() {
    let f = signed_in().await;
    let err = f.service.create(LabDraft::new("   ")).await.unwrap_err();
    assert!(matches!(err, LabError::Validation(_)));
    assert_eq!(f.store.document_count(COLLECTION), 0);
}

#[tokio::test]
async fn test_permission_denied_message() {
    let f = signed_in().await;
    f.store.set_rules(StoreRules {
        write: Access::Deny,
        ..StoreRules::open()
    });

    let err = f.service.create(LabDraft::new("Lab A")).await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("Permissão negada"), "{message}");
    assert!(message.contains("permission-denied"), "{message}");
    assert_eq!(f.store.document_count(COLLECTION), 0);
}

// ─── Update / Delete ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_update_merges_and_restamps() {
    let f = signed_in().await;
    let created = f
        .service
        .create(LabDraft {
            location: Some("Bloco B".into()),
            capacity: 20,
            ..LabDraft::new("Lab Eletrônica")
        })
        .await
        .unwrap();

    // Another session takes over before the edit.
    let editor = f.auth.reset_session().await.unwrap();
    let patch = LabPatch {
        capacity: Some(35),
        status: Some(LabStatus::Maintenance),
        ..LabPatch::default()
    };
    f.service.update(&created.id, patch).await.unwrap();

    let updated = f.service.find_by_id(&created.id).await.unwrap();
    assert_eq!(updated.capacity, 35);
    assert_eq!(updated.status, LabStatus::Maintenance);
    assert_eq!(updated.location.as_deref(), Some("Bloco B"));
    assert_eq!(updated.created_by, created.created_by);
    assert_eq!(updated.updated_by, Some(editor.uid));
    assert_eq!(updated.created_at, created.created_at);
    assert!(updated.updated_at > updated.created_at);
}

#[tokio::test]
async fn test_update_missing_id_is_not_found() {
    let f = signed_in().await;
    let err = f
        .service
        .update(&DocId::new("inexistente"), LabPatch::status(LabStatus::Closed))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(&ErrorCode::NotFound));
    assert!(err.to_string().contains("Documento não encontrado"));
}

#[tokio::test]
async fn test_create_then_delete_disappears() {
    let f = signed_in().await;
    let keep = f.service.create(LabDraft::new("Fica")).await.unwrap();
    let gone = f.service.create(LabDraft::new("Sai")).await.unwrap();

    f.service.delete(&gone.id).await.unwrap();

    let ids: Vec<DocId> = f.service.list_all().await.into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![keep.id]);
    assert!(f.service.find_by_id(&gone.id).await.is_none());
}

#[tokio::test]
async fn test_delete_missing_follows_policy() {
    let f = signed_in().await;
    f.service.delete(&DocId::new("fantasma")).await.unwrap();

    let strict = fixture_with(StoreConfig {
        missing_delete: MissingDeletePolicy::Fail,
        ..StoreConfig::default()
    });
    let err = strict.service.delete(&DocId::new("fantasma")).await.unwrap_err();
    assert_eq!(err.code(), Some(&ErrorCode::NotFound));
}

// ─── Reads ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_list_all_newest_first() {
    let f = signed_in().await;
    for name in ["Primeiro", "Segundo", "Terceiro"] {
        f.service.create(LabDraft::new(name)).await.unwrap();
    }

    let records = f.service.list_all().await;
    let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["Terceiro", "Segundo", "Primeiro"]);
    assert!(records.windows(2).all(|w| w[0].created_at >= w[1].created_at));
}

#[tokio::test]
async fn test_filtered_finds() {
    let f = signed_in().await;
    let ana = |name: &str| LabDraft {
        responsible: Some("Ana".into()),
        ..LabDraft::new(name)
    };
    let first = f.service.create(ana("Lab 1")).await.unwrap();
    f.service.create(ana("Lab 2")).await.unwrap();
    f.service.create(LabDraft::new("Lab 3")).await.unwrap();
    f.service
        .update(&first.id, LabPatch::status(LabStatus::Closed))
        .await
        .unwrap();

    let by_ana: Vec<String> = f
        .service
        .find_by_responsible("Ana")
        .await
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(by_ana, vec!["Lab 2".to_string(), "Lab 1".to_string()]);

    let closed = f.service.find_by_status(LabStatus::Closed).await;
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].id, first.id);
    assert!(f.service.find_by_status(LabStatus::Maintenance).await.is_empty());
}

#[tokio::test]
async fn test_reads_degrade_to_empty_when_denied() {
    let f = signed_in().await;
    let created = f.service.create(LabDraft::new("Lab A")).await.unwrap();

    f.store.set_rules(StoreRules::locked());

    assert!(f.service.list_all().await.is_empty());
    assert!(f.service.find_by_status(LabStatus::Active).await.is_empty());
    assert!(f.service.find_by_responsible("Ana").await.is_empty());
    assert!(f.service.find_by_id(&created.id).await.is_none());
}

#[tokio::test]
async fn test_foreign_documents_are_coerced() {
    let f = signed_in().await;
    let mut fields = Fields::new();
    fields.insert("name".into(), FieldValue::string("Importado"));
    fields.insert("capacity".into(), FieldValue::string("abc"));
    fields.insert("equipmentCount".into(), FieldValue::Integer(-4));
    fields.insert("status".into(), FieldValue::string("demolido"));
    let doc = f.store.insert(COLLECTION, fields).unwrap();

    let record = f.service.find_by_id(&doc.id).await.unwrap();
    assert_eq!(record.capacity, 0);
    assert_eq!(record.equipment_count, 0);
    assert_eq!(record.status, LabStatus::Active);
    assert_eq!(record.created_at, doc.create_time);
}

// ─── Live Feed ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_feed_delivers_full_ordered_snapshots() {
    let f = signed_in().await;
    let (_subscription, deliveries) = record_feed(&f.service);
    assert_eq!(lock(&deliveries).len(), 1);
    assert!(last_names(&deliveries).is_empty());

    // External writers, ascending creation times.
    for name in ["A", "B", "C"] {
        let mut fields = Fields::new();
        fields.insert("name".into(), FieldValue::string(name));
        fields.insert("createdAt".into(), FieldValue::ServerTimestamp);
        f.store.insert(COLLECTION, fields).unwrap();
    }

    assert_eq!(lock(&deliveries).len(), 4);
    assert_eq!(last_names(&deliveries), vec!["C", "B", "A"]);

    let records = match lock(&deliveries).last() {
        Some(Ok(records)) => records.clone(),
        _ => unreachable!(),
    };
    let stats = LabStats::from_records(&records);
    assert_eq!(stats.total, 3);
    assert_eq!(stats.active, 3);
}

#[tokio::test]
async fn test_feed_ignores_other_collections() {
    let f = signed_in().await;
    let (_subscription, deliveries) = record_feed(&f.service);

    let mut fields = Fields::new();
    fields.insert("name".into(), FieldValue::string("Outro"));
    f.store.insert("outra_colecao", fields).unwrap();

    assert_eq!(lock(&deliveries).len(), 1);
}

#[tokio::test]
async fn test_services_on_separate_collections_are_isolated() {
    let f = signed_in().await;
    let scratch = LabService::new(f.store.clone(), f.auth.session()).with_collection("laboratorios_teste");
    assert_eq!(scratch.collection(), "laboratorios_teste");
    let (_subscription, deliveries) = record_feed(&f.service);

    let created = scratch.create(LabDraft::new("Isolado")).await.unwrap();

    assert_eq!(f.store.document_count("laboratorios_teste"), 1);
    assert_eq!(f.store.document_count(COLLECTION), 0);
    assert!(f.service.list_all().await.is_empty());
    assert_eq!(scratch.find_by_id(&created.id).await.map(|r| r.name), Some("Isolado".to_string()));
    assert_eq!(lock(&deliveries).len(), 1);
}

#[tokio::test]
async fn test_unsubscribe_stops_deliveries() {
    let f = signed_in().await;
    let (mut subscription, deliveries) = record_feed(&f.service);
    f.service.create(LabDraft::new("Antes")).await.unwrap();
    assert_eq!(lock(&deliveries).len(), 2);

    subscription.unsubscribe();
    subscription.unsubscribe();
    assert_eq!(f.store.live_query_count(), 0);

    f.service.create(LabDraft::new("Depois")).await.unwrap();
    assert_eq!(lock(&deliveries).len(), 2);
}

#[tokio::test]
async fn test_feed_error_arrives_through_callback() {
    let f = signed_in().await;
    let (_subscription, deliveries) = record_feed(&f.service);

    f.store.set_rules(StoreRules {
        read: Access::Deny,
        ..StoreRules::open()
    });
    f.service.create(LabDraft::new("Dispara")).await.unwrap();

    {
        let deliveries = lock(&deliveries);
        assert_eq!(deliveries.len(), 2);
        let err = deliveries[1].as_ref().unwrap_err();
        assert_eq!(err.code(), Some(&ErrorCode::PermissionDenied));
    }
    // The failed query is gone; later writes deliver nothing.
    assert_eq!(f.store.live_query_count(), 0);
    f.store.set_rules(StoreRules::open());
    f.service.create(LabDraft::new("Silêncio")).await.unwrap();
    assert_eq!(lock(&deliveries).len(), 2);
}

#[tokio::test]
async fn test_listener_may_unsubscribe_itself() {
    let f = signed_in().await;
    let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
    let calls = Arc::new(Mutex::new(0usize));

    let own = slot.clone();
    let counter = calls.clone();
    let subscription = f.service.subscribe(move |_| {
        *lock(&counter) += 1;
        if *lock(&counter) == 2 {
            if let Some(mut handle) = lock(&own).take() {
                handle.unsubscribe();
            }
        }
    });
    *lock(&slot) = Some(subscription);

    f.service.create(LabDraft::new("Um")).await.unwrap();
    f.service.create(LabDraft::new("Dois")).await.unwrap();
    assert_eq!(*lock(&calls), 2);
}

// ─── Identity ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_reset_session_notifies_none_then_new() {
    let f = signed_in().await;
    let first = f.auth.current_identity().unwrap();

    let seen: Arc<Mutex<Vec<Option<Identity>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _subscription = f.auth.subscribe(move |identity| lock(&sink).push(identity.clone()));

    let second = f.auth.reset_session().await.unwrap();
    assert_ne!(first, second);
    assert_eq!(
        *lock(&seen),
        vec![Some(first), None, Some(second.clone())]
    );

    // Writes after the reset are attributed to the new identity.
    let created = f.service.create(LabDraft::new("Nova sessão")).await.unwrap();
    assert_eq!(created.created_by, Some(second.uid));
}

#[tokio::test]
async fn test_sample_record_is_storable() {
    let f = signed_in().await;
    let draft = f.service.generate_sample_record();
    assert!((10..=59).contains(&draft.capacity));
    assert!((5..=24).contains(&draft.equipment_count));

    let created = f.service.create(draft.clone()).await.unwrap();
    assert_eq!(created.name, draft.name);
    assert_eq!(created.capacity, draft.capacity);
    assert_eq!(created.status, LabStatus::Active);
}
