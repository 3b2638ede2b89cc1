//! Integration tests for the full event-sourced pipeline.
//!
//! Tests: Command → EventStore → EventBus → Projection → ReadModel
//!
//! Verifies:
//! - Commands produce events that update read models correctly
//! - Tenant isolation is preserved
//! - Optimistic concurrency conflicts are detected
//! - Consignment numbers stay unique under concurrent creation

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use serde_json::Value as JsonValue;

    use verdant_consignment::{
        ConsignmentCommand, ConsignmentStatus, RegisterSale, ReturnItems, SaleId,
        SettleConsignment,
    };
    use verdant_core::{AggregateId, Money, Percentage, TenantId};
    use verdant_events::{EventEnvelope, InMemoryEventBus};
    use verdant_products::{ArchiveProduct, CreateProduct, Product, ProductCommand, ProductId};
    use verdant_tenants::{
        RegisterTenant, SuspendTenant, TenantCommand, TenantProfile, TenantProfileId,
    };

    use crate::command_dispatcher::{CommandDispatcher, DispatchError};
    use crate::consignments::{
        NewConsignment, NewConsignmentLine, create_consignment, execute_consignment_command,
        reserve_number,
    };
    use crate::event_store::{EventStore, InMemoryEventStore};
    use crate::projections::{ReadModels, aggregate_types};
    use crate::workers::{WorkerHandle, spawn_read_model_worker};

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
    type Dispatcher = CommandDispatcher<Arc<InMemoryEventStore>, Bus>;

    struct Harness {
        dispatcher: Arc<Dispatcher>,
        read_models: Arc<ReadModels>,
        worker: WorkerHandle,
    }

    fn setup() -> Harness {
        let store = Arc::new(InMemoryEventStore::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let read_models = Arc::new(ReadModels::new());
        // The worker subscribes before returning, so no early event is missed.
        let worker = spawn_read_model_worker(bus.clone(), read_models.clone()).unwrap();
        Harness {
            dispatcher: Arc::new(CommandDispatcher::new(store, bus)),
            read_models,
            worker,
        }
    }

    fn eventually(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn register_tenant(d: &Dispatcher, name: &str) -> TenantId {
        let tenant_id = TenantId::new();
        d.dispatch::<TenantProfile>(
            tenant_id,
            TenantProfileId::for_tenant(tenant_id).0,
            aggregate_types::TENANT_PROFILE,
            TenantCommand::RegisterTenant(RegisterTenant {
                tenant_id,
                name: name.to_string(),
                contact_email: None,
                occurred_at: Utc::now(),
            }),
            |_, id| TenantProfile::empty(TenantProfileId(id)),
        )
        .unwrap();
        tenant_id
    }

    fn create_product(d: &Dispatcher, tenant_id: TenantId, sku: &str) -> ProductId {
        let product_id = ProductId::new(AggregateId::new());
        d.dispatch::<Product>(
            tenant_id,
            product_id.0,
            aggregate_types::PRODUCT,
            ProductCommand::CreateProduct(CreateProduct {
                tenant_id,
                product_id,
                sku: sku.to_string(),
                name: format!("Product {sku}"),
                category: Some("pantry".to_string()),
                occurred_at: Utc::now(),
            }),
            |_, id| Product::empty(ProductId::new(id)),
        )
        .unwrap();
        product_id
    }

    fn new_consignment(tenant_id: TenantId, product_id: ProductId, quantity: i64) -> NewConsignment {
        NewConsignment {
            tenant_id,
            expires_at: None,
            store_percentage: Percentage::from_basis_points(3_000),
            owner_percentage: Percentage::from_basis_points(7_000),
            notes: None,
            terms: Some("net 30".to_string()),
            items: vec![NewConsignmentLine {
                product_id,
                quantity,
                cost_price: Money::from_cents(250),
                retail_price: Money::from_cents(400),
            }],
            occurred_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn consignment_lifecycle_flows_into_read_models() {
        let h = setup();
        let d = &h.dispatcher;
        let tenant_id = register_tenant(d, "Green Grocer");
        let product_id = create_product(d, tenant_id, "TOFU-400");

        let created = create_consignment(d, new_consignment(tenant_id, product_id, 10)).unwrap();
        assert_eq!(created.number, "CONS-2026-0001");
        let item_id = created.item_ids[0];

        execute_consignment_command(
            d,
            tenant_id,
            created.consignment_id,
            ConsignmentCommand::RegisterSale(RegisterSale {
                tenant_id,
                consignment_id: created.consignment_id,
                sale_id: SaleId::new(AggregateId::new()),
                item_id,
                quantity: 10,
                unit_price: Money::from_cents(400),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        execute_consignment_command(
            d,
            tenant_id,
            created.consignment_id,
            ConsignmentCommand::SettleConsignment(SettleConsignment {
                tenant_id,
                consignment_id: created.consignment_id,
                notes: Some("paid".to_string()),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        let models = &h.read_models;
        assert!(eventually(|| {
            models
                .consignments
                .get(tenant_id, &created.consignment_id)
                .is_some_and(|rm| rm.consignment.status() == ConsignmentStatus::Settled)
        }));

        let rm = models.consignments.get(tenant_id, &created.consignment_id).unwrap();
        assert_eq!(rm.consignment.total_sold(), Money::from_cents(4_000));
        assert_eq!(rm.consignment.owner_due(), Money::from_cents(2_800));
        assert_eq!(rm.consignment.store_due(), Money::from_cents(1_200));
        assert_eq!(rm.consignment.items()[0].quantity_sold, 10);

        let summary = models.consignments.summary(tenant_id);
        assert_eq!(summary.total, 1);
        assert_eq!(summary.total_sold, Money::from_cents(4_000));
        assert!(summary
            .by_status
            .contains(&(ConsignmentStatus::Settled, 1)));

        assert!(eventually(|| models.products.get(tenant_id, &product_id).is_some()));
        assert_eq!(models.tenants.get(tenant_id).unwrap().name, "Green Grocer");

        h.worker.shutdown();
    }

    #[test]
    fn returning_everything_marks_consignment_returned() {
        let h = setup();
        let d = &h.dispatcher;
        let tenant_id = register_tenant(d, "Leafy Co");
        let product_id = create_product(d, tenant_id, "SEITAN-250");
        let created = create_consignment(d, new_consignment(tenant_id, product_id, 4)).unwrap();

        execute_consignment_command(
            d,
            tenant_id,
            created.consignment_id,
            ConsignmentCommand::ReturnItems(ReturnItems {
                tenant_id,
                consignment_id: created.consignment_id,
                item_id: created.item_ids[0],
                quantity: 4,
                reason: Some("short dated".to_string()),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        let models = &h.read_models;
        assert!(eventually(|| {
            models
                .consignments
                .list(tenant_id, Some(ConsignmentStatus::Returned))
                .len()
                == 1
        }));
        assert!(models
            .consignments
            .list(tenant_id, Some(ConsignmentStatus::Active))
            .is_empty());

        h.worker.shutdown();
    }

    #[test]
    fn tenant_isolation_preserved() {
        let h = setup();
        let d = &h.dispatcher;
        let tenant_a = register_tenant(d, "A");
        let tenant_b = register_tenant(d, "B");
        let product_a = create_product(d, tenant_a, "A-1");

        let created = create_consignment(d, new_consignment(tenant_a, product_a, 3)).unwrap();

        // Tenant B cannot consign tenant A's product.
        let err = create_consignment(d, new_consignment(tenant_b, product_a, 3)).unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));

        // Tenant B's numbering is independent of A's.
        let product_b = create_product(d, tenant_b, "B-1");
        let b = create_consignment(d, new_consignment(tenant_b, product_b, 1)).unwrap();
        assert_eq!(b.number, "CONS-2026-0001");

        let models = &h.read_models;
        assert!(eventually(|| models.consignments.list(tenant_b, None).len() == 1));
        assert!(models.consignments.get(tenant_b, &created.consignment_id).is_none());
        assert_eq!(models.consignments.list(tenant_a, None).len(), 1);

        h.worker.shutdown();
    }

    #[test]
    fn creation_requires_active_tenant_and_consignable_products() {
        let h = setup();
        let d = &h.dispatcher;

        let unknown = TenantId::new();
        let err = create_consignment(
            d,
            new_consignment(unknown, ProductId::new(AggregateId::new()), 1),
        )
        .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(ref what) if what == "tenant"));

        let tenant_id = register_tenant(d, "Sprout");
        let missing = ProductId::new(AggregateId::new());
        let err = create_consignment(d, new_consignment(tenant_id, missing, 1)).unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));

        let archived = create_product(d, tenant_id, "OLD-1");
        d.dispatch::<Product>(
            tenant_id,
            archived.0,
            aggregate_types::PRODUCT,
            ProductCommand::ArchiveProduct(ArchiveProduct {
                tenant_id,
                product_id: archived,
                occurred_at: Utc::now(),
            }),
            |_, id| Product::empty(ProductId::new(id)),
        )
        .unwrap();
        let err = create_consignment(d, new_consignment(tenant_id, archived, 1)).unwrap_err();
        assert!(matches!(err, DispatchError::InvariantViolation(_)));

        d.dispatch::<TenantProfile>(
            tenant_id,
            TenantProfileId::for_tenant(tenant_id).0,
            aggregate_types::TENANT_PROFILE,
            TenantCommand::SuspendTenant(SuspendTenant {
                tenant_id,
                reason: Some("unpaid".to_string()),
                occurred_at: Utc::now(),
            }),
            |_, id| TenantProfile::empty(TenantProfileId(id)),
        )
        .unwrap();
        let product_id = create_product(d, tenant_id, "NEW-1");
        let err = create_consignment(d, new_consignment(tenant_id, product_id, 1)).unwrap_err();
        assert!(matches!(err, DispatchError::InvariantViolation(_)));

        h.worker.shutdown();
    }

    #[test]
    fn rejected_creation_does_not_consume_a_number() {
        let h = setup();
        let d = &h.dispatcher;
        let tenant_id = register_tenant(d, "Bean There");
        let product_id = create_product(d, tenant_id, "BEAN-1");

        let err = create_consignment(d, new_consignment(tenant_id, product_id, 0)).unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));

        let created = create_consignment(d, new_consignment(tenant_id, product_id, 2)).unwrap();
        assert_eq!(created.number, "CONS-2026-0001");

        h.worker.shutdown();
    }

    #[test]
    fn oversell_is_rejected_and_read_model_unchanged() {
        let h = setup();
        let d = &h.dispatcher;
        let tenant_id = register_tenant(d, "Pulse");
        let product_id = create_product(d, tenant_id, "LENTIL-1");
        let created = create_consignment(d, new_consignment(tenant_id, product_id, 2)).unwrap();

        let err = execute_consignment_command(
            d,
            tenant_id,
            created.consignment_id,
            ConsignmentCommand::RegisterSale(RegisterSale {
                tenant_id,
                consignment_id: created.consignment_id,
                sale_id: SaleId::new(AggregateId::new()),
                item_id: created.item_ids[0],
                quantity: 3,
                unit_price: Money::from_cents(400),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DispatchError::InvariantViolation(_)));

        let stream = d
            .store()
            .load_stream(tenant_id, created.consignment_id.0)
            .unwrap();
        assert_eq!(stream.len(), 1);

        let models = &h.read_models;
        assert!(eventually(|| models.consignments.get(tenant_id, &created.consignment_id).is_some()));
        let rm = models.consignments.get(tenant_id, &created.consignment_id).unwrap();
        assert!(rm.consignment.sales().is_empty());
        assert_eq!(rm.version(), 1);

        h.worker.shutdown();
    }

    #[test]
    fn concurrent_sales_on_one_consignment_never_oversell() {
        let h = setup();
        let tenant_id = register_tenant(&h.dispatcher, "Racer");
        let product_id = create_product(&h.dispatcher, tenant_id, "RACE-1");
        let created =
            create_consignment(&h.dispatcher, new_consignment(tenant_id, product_id, 1)).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let d = h.dispatcher.clone();
                let consignment_id = created.consignment_id;
                let item_id = created.item_ids[0];
                std::thread::spawn(move || {
                    execute_consignment_command(
                        &d,
                        tenant_id,
                        consignment_id,
                        ConsignmentCommand::RegisterSale(RegisterSale {
                            tenant_id,
                            consignment_id,
                            sale_id: SaleId::new(AggregateId::new()),
                            item_id,
                            quantity: 1,
                            unit_price: Money::from_cents(400),
                            occurred_at: Utc::now(),
                        }),
                    )
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|j| j.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().filter_map(|r| r.as_ref().err()).all(|e| matches!(
            e,
            DispatchError::Concurrency(_) | DispatchError::InvariantViolation(_)
        )));

        h.worker.shutdown();
    }

    #[test]
    fn concurrent_reservations_hand_out_unique_numbers() {
        let h = setup();
        let tenant_id = register_tenant(&h.dispatcher, "Numbers");
        let at = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let d = h.dispatcher.clone();
                std::thread::spawn(move || {
                    (0..5)
                        .map(|_| reserve_number(&d, tenant_id, at))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut numbers = Vec::new();
        for j in handles {
            for result in j.join().unwrap() {
                match result {
                    Ok(number) => numbers.push(number),
                    Err(e) => assert!(matches!(e, DispatchError::Concurrency(_))),
                }
            }
        }

        let count = numbers.len();
        numbers.sort();
        numbers.dedup();
        assert_eq!(numbers.len(), count, "numbers must never repeat");
        assert!(count > 0);

        let next = reserve_number(&h.dispatcher, tenant_id, at).unwrap();
        assert_eq!(next, format!("CONS-2026-{:04}", count + 1));

        h.worker.shutdown();
    }

    #[test]
    fn numbering_restarts_each_year() {
        let h = setup();
        let d = &h.dispatcher;
        let tenant_id = register_tenant(d, "Annual");

        let dec = Utc.with_ymd_and_hms(2025, 12, 31, 23, 0, 0).unwrap();
        let jan = Utc.with_ymd_and_hms(2026, 1, 1, 1, 0, 0).unwrap();
        assert_eq!(reserve_number(d, tenant_id, dec).unwrap(), "CONS-2025-0001");
        assert_eq!(reserve_number(d, tenant_id, dec).unwrap(), "CONS-2025-0002");
        assert_eq!(reserve_number(d, tenant_id, jan).unwrap(), "CONS-2026-0001");

        h.worker.shutdown();
    }

    #[test]
    fn out_of_order_delivery_is_held_until_the_gap_fills() {
        let h = setup();
        let d = &h.dispatcher;
        let tenant_id = register_tenant(d, "Racing Sprouts");
        let product_id = create_product(d, tenant_id, "SPROUT-1");
        let created = create_consignment(d, new_consignment(tenant_id, product_id, 10)).unwrap();
        h.worker.shutdown();

        for quantity in [1, 2] {
            execute_consignment_command(
                d,
                tenant_id,
                created.consignment_id,
                ConsignmentCommand::RegisterSale(RegisterSale {
                    tenant_id,
                    consignment_id: created.consignment_id,
                    sale_id: SaleId::new(AggregateId::new()),
                    item_id: created.item_ids[0],
                    quantity,
                    unit_price: Money::from_cents(400),
                    occurred_at: Utc::now(),
                }),
            )
            .unwrap();
        }

        let envelopes: Vec<_> = d
            .store()
            .load_stream(tenant_id, created.consignment_id.0)
            .unwrap()
            .iter()
            .map(|e| e.to_envelope())
            .collect();
        assert_eq!(envelopes.len(), 3);

        let models = ReadModels::new();
        models.apply(&envelopes[0]).unwrap();
        models.apply(&envelopes[2]).unwrap();

        let rm = models.consignments.get(tenant_id, &created.consignment_id).unwrap();
        assert_eq!(rm.version(), 1);
        assert_eq!(models.parked_len(), 1);

        models.apply(&envelopes[1]).unwrap();
        let rm = models.consignments.get(tenant_id, &created.consignment_id).unwrap();
        assert_eq!(rm.version(), 3);
        assert_eq!(rm.consignment.items()[0].quantity_available(), 7);
        assert_eq!(rm.consignment.sales().len(), 2);
        assert_eq!(models.parked_len(), 0);

        // A late redelivery is still a no-op.
        models.apply(&envelopes[2]).unwrap();
        let rm = models.consignments.get(tenant_id, &created.consignment_id).unwrap();
        assert_eq!(rm.version(), 3);
    }

    #[test]
    fn read_models_rebuild_from_store() {
        let h = setup();
        let d = &h.dispatcher;
        let tenant_id = register_tenant(d, "Rebuild");
        let product_id = create_product(d, tenant_id, "RB-1");
        let created = create_consignment(d, new_consignment(tenant_id, product_id, 5)).unwrap();
        h.worker.shutdown();

        let fresh = ReadModels::new();
        let all = d.store().load_all().unwrap();
        let applied = fresh.rebuild(&all).unwrap();
        assert_eq!(applied, all.len());

        let rm = fresh.consignments.get(tenant_id, &created.consignment_id).unwrap();
        assert_eq!(rm.consignment.number(), "CONS-2026-0001");
        assert_eq!(fresh.products.list(tenant_id).len(), 1);
        assert!(fresh.tenants.get(tenant_id).is_some());

        // Rebuilding twice yields the same state.
        fresh.rebuild(&all).unwrap();
        assert_eq!(fresh.consignments.list(tenant_id, None).len(), 1);
    }
}
