use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use tokio::sync::mpsc;
use uuid::Uuid;

use kardex_api::{
    db::{establish_connection, run_migrations, DbPool},
    entities::{item, stock_position, warehouse},
    events::{Event, EventSender},
    services::movements::{NewMovement, NewMovementLine},
    AppServices,
};
use kardex_api::entities::movement::{MovementSubtype, MovementType};

pub struct TestContext {
    pub db: Arc<DbPool>,
    pub services: AppServices,
    // Keeps the channel open so event sends during tests succeed
    _event_rx: mpsc::Receiver<Event>,
}

pub async fn setup() -> TestContext {
    // A uniquely named shared-cache memory database per test keeps parallel
    // tests isolated while letting the pool hand out multiple connections.
    let url = format!(
        "sqlite:file:{}?mode=memory&cache=shared",
        Uuid::new_v4().simple()
    );
    let db = Arc::new(
        establish_connection(&url)
            .await
            .expect("failed to open test database"),
    );
    run_migrations(db.as_ref())
        .await
        .expect("failed to run migrations");

    let (tx, rx) = mpsc::channel(1024);
    let services = AppServices::build(db.clone(), EventSender::new(tx), 3);

    TestContext {
        db,
        services,
        _event_rx: rx,
    }
}

pub const TEST_USER: &str = "test-user";

pub async fn create_item(db: &DbPool, code: &str) -> item::Model {
    item::ActiveModel {
        id: Set(Uuid::new_v4()),
        code: Set(code.to_string()),
        name: Set(format!("Item {}", code)),
        description: Set(None),
        unit_of_measure: Set("unit".to_string()),
        category: Set(None),
        global_average_cost: Set(Decimal::ZERO),
        is_active: Set(true),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    }
    .insert(db)
    .await
    .expect("failed to insert item")
}

pub async fn create_inactive_item(db: &DbPool, code: &str) -> item::Model {
    let created = create_item(db, code).await;
    let mut active: item::ActiveModel = created.into();
    active.is_active = Set(false);
    active.update(db).await.expect("failed to deactivate item")
}

pub async fn create_warehouse(db: &DbPool, code: &str, auto_update: bool) -> warehouse::Model {
    warehouse::ActiveModel {
        id: Set(Uuid::new_v4()),
        code: Set(code.to_string()),
        name: Set(format!("Warehouse {}", code)),
        location: Set(None),
        is_active: Set(true),
        auto_update_average_cost: Set(auto_update),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    }
    .insert(db)
    .await
    .expect("failed to insert warehouse")
}

/// Movement dated `day_offset` days after a fixed epoch, so chronological
/// order in tests is explicit and independent of wall-clock time.
pub fn test_date(day_offset: i64) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
        + Duration::days(day_offset)
}

pub fn entrada(
    warehouse_id: Uuid,
    day_offset: i64,
    lines: Vec<NewMovementLine>,
) -> NewMovement {
    NewMovement {
        movement_type: MovementType::Entrada,
        subtype: Some(MovementSubtype::Compra),
        movement_date: test_date(day_offset),
        source_warehouse_id: None,
        destination_warehouse_id: Some(warehouse_id),
        third_party: None,
        reference_document: None,
        observation: None,
        details: lines,
    }
}

pub fn salida(warehouse_id: Uuid, day_offset: i64, lines: Vec<NewMovementLine>) -> NewMovement {
    NewMovement {
        movement_type: MovementType::Salida,
        subtype: Some(MovementSubtype::Venta),
        movement_date: test_date(day_offset),
        source_warehouse_id: Some(warehouse_id),
        destination_warehouse_id: None,
        third_party: None,
        reference_document: None,
        observation: None,
        details: lines,
    }
}

pub fn transferencia(
    source_id: Uuid,
    destination_id: Uuid,
    day_offset: i64,
    lines: Vec<NewMovementLine>,
) -> NewMovement {
    NewMovement {
        movement_type: MovementType::Transferencia,
        subtype: None,
        movement_date: test_date(day_offset),
        source_warehouse_id: Some(source_id),
        destination_warehouse_id: Some(destination_id),
        third_party: None,
        reference_document: None,
        observation: None,
        details: lines,
    }
}

pub fn line(item_id: Uuid, quantity: Decimal, unit_cost: Option<Decimal>) -> NewMovementLine {
    NewMovementLine {
        item_id,
        quantity,
        unit_cost,
    }
}

/// Creates and publishes a movement in one step, returning its id
pub async fn publish_movement(ctx: &TestContext, input: NewMovement) -> Uuid {
    let draft = ctx
        .services
        .movements
        .create_movement(TEST_USER, input)
        .await
        .expect("failed to create draft");
    ctx.services
        .movements
        .publish(TEST_USER, draft.movement.id)
        .await
        .expect("failed to publish movement");
    draft.movement.id
}

pub async fn get_position(
    db: &DbPool,
    item_id: Uuid,
    warehouse_id: Uuid,
) -> Option<stock_position::Model> {
    stock_position::Entity::find()
        .filter(stock_position::Column::ItemId.eq(item_id))
        .filter(stock_position::Column::WarehouseId.eq(warehouse_id))
        .one(db)
        .await
        .expect("failed to query stock position")
}
