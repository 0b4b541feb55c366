mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;

use common::*;
use kardex_api::entities::audit_entry;
use kardex_api::errors::ServiceError;

#[tokio::test]
async fn recalculation_repairs_void_induced_average_drift() {
    let ctx = setup().await;
    let db = ctx.db.as_ref();
    let item = create_item(db, "WIDGET").await;
    let warehouse = create_warehouse(db, "MAIN", true).await;

    publish_movement(
        &ctx,
        entrada(warehouse.id, 0, vec![line(item.id, dec!(10), Some(dec!(5.00)))]),
    )
    .await;
    let second = publish_movement(
        &ctx,
        entrada(warehouse.id, 1, vec![line(item.id, dec!(5), Some(dec!(8.00)))]),
    )
    .await;
    ctx.services.movements.void(TEST_USER, second).await.unwrap();

    // Void left the blended average behind
    let drifted = get_position(db, item.id, warehouse.id).await.unwrap();
    assert_eq!(drifted.average_unit_cost, dec!(6.00));

    let outcome = ctx
        .services
        .recalculation
        .recalculate(TEST_USER, Some(warehouse.id))
        .await
        .unwrap();
    assert_eq!(outcome.corrected_positions, 1);

    // Replaying the surviving history (just the first entrada) restores 5.00
    let repaired = get_position(db, item.id, warehouse.id).await.unwrap();
    assert_eq!(repaired.quantity_on_hand, dec!(10));
    assert_eq!(repaired.average_unit_cost, dec!(5.00));

    // Exactly one audit entry captures the correction
    let entries = audit_entry::Entity::find().all(db).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].previous_cost, dec!(6.00));
    assert_eq!(entries[0].new_cost, dec!(5.00));
    assert_eq!(entries[0].movement_id, None);
}

#[tokio::test]
async fn recalculation_is_idempotent() {
    let ctx = setup().await;
    let db = ctx.db.as_ref();
    let item = create_item(db, "WIDGET").await;
    let warehouse = create_warehouse(db, "MAIN", true).await;

    publish_movement(
        &ctx,
        entrada(warehouse.id, 0, vec![line(item.id, dec!(10), Some(dec!(5.00)))]),
    )
    .await;
    let voided = publish_movement(
        &ctx,
        entrada(warehouse.id, 1, vec![line(item.id, dec!(5), Some(dec!(8.00)))]),
    )
    .await;
    ctx.services.movements.void(TEST_USER, voided).await.unwrap();

    let first = ctx
        .services
        .recalculation
        .recalculate(TEST_USER, None)
        .await
        .unwrap();
    let after_first = get_position(db, item.id, warehouse.id).await.unwrap();

    let second = ctx
        .services
        .recalculation
        .recalculate(TEST_USER, None)
        .await
        .unwrap();
    let after_second = get_position(db, item.id, warehouse.id).await.unwrap();

    assert!(first.corrected_positions > 0);
    assert_eq!(second.corrected_positions, 0);
    assert_eq!(after_first.quantity_on_hand, after_second.quantity_on_hand);
    assert_eq!(after_first.average_unit_cost, after_second.average_unit_cost);
    assert_eq!(after_first.version, after_second.version);

    // The second pass wrote no further audit entries
    let entries = audit_entry::Entity::find().all(db).await.unwrap();
    assert_eq!(entries.len() as u64, first.corrected_positions);
}

#[tokio::test]
async fn recalculation_matches_replay_from_zero() {
    let ctx = setup().await;
    let db = ctx.db.as_ref();
    let item = create_item(db, "WIDGET").await;
    let other_item = create_item(db, "GADGET").await;
    let origin = create_warehouse(db, "ORIGIN", true).await;
    let destination = create_warehouse(db, "DEST", true).await;

    publish_movement(
        &ctx,
        entrada(origin.id, 0, vec![line(item.id, dec!(10), Some(dec!(4.00)))]),
    )
    .await;
    publish_movement(
        &ctx,
        entrada(destination.id, 1, vec![line(item.id, dec!(10), Some(dec!(6.00)))]),
    )
    .await;
    publish_movement(
        &ctx,
        transferencia(origin.id, destination.id, 2, vec![line(item.id, dec!(10), None)]),
    )
    .await;
    publish_movement(
        &ctx,
        entrada(origin.id, 3, vec![line(other_item.id, dec!(3), Some(dec!(1.50)))]),
    )
    .await;
    publish_movement(
        &ctx,
        salida(destination.id, 4, vec![line(item.id, dec!(5), None)]),
    )
    .await;

    // Snapshot the incrementally-built positions, then rebuild from scratch
    let incremental_origin = get_position(db, item.id, origin.id).await.unwrap();
    let incremental_destination = get_position(db, item.id, destination.id).await.unwrap();

    let outcome = ctx
        .services
        .recalculation
        .recalculate(TEST_USER, None)
        .await
        .unwrap();

    // A consistent ledger needs no corrections: the incremental state is
    // exactly what a replay from zero produces.
    assert_eq!(outcome.corrected_positions, 0);

    let rebuilt_origin = get_position(db, item.id, origin.id).await.unwrap();
    let rebuilt_destination = get_position(db, item.id, destination.id).await.unwrap();
    assert_eq!(incremental_origin.quantity_on_hand, rebuilt_origin.quantity_on_hand);
    assert_eq!(incremental_origin.average_unit_cost, rebuilt_origin.average_unit_cost);
    assert_eq!(
        incremental_destination.quantity_on_hand,
        rebuilt_destination.quantity_on_hand
    );
    assert_eq!(
        incremental_destination.average_unit_cost,
        rebuilt_destination.average_unit_cost
    );

    assert_eq!(rebuilt_destination.quantity_on_hand, dec!(15));
    assert_eq!(rebuilt_destination.average_unit_cost, dec!(5.00));
}

#[tokio::test]
async fn warehouse_scoped_recalculation_leaves_other_warehouses_alone() {
    let ctx = setup().await;
    let db = ctx.db.as_ref();
    let item = create_item(db, "WIDGET").await;
    let first = create_warehouse(db, "FIRST", true).await;
    let second = create_warehouse(db, "SECOND", true).await;

    publish_movement(
        &ctx,
        entrada(first.id, 0, vec![line(item.id, dec!(10), Some(dec!(5.00)))]),
    )
    .await;
    let drifting = publish_movement(
        &ctx,
        entrada(first.id, 1, vec![line(item.id, dec!(5), Some(dec!(8.00)))]),
    )
    .await;
    publish_movement(
        &ctx,
        entrada(second.id, 0, vec![line(item.id, dec!(4), Some(dec!(2.00)))]),
    )
    .await;
    let second_drifting = publish_movement(
        &ctx,
        entrada(second.id, 1, vec![line(item.id, dec!(4), Some(dec!(9.00)))]),
    )
    .await;
    ctx.services.movements.void(TEST_USER, drifting).await.unwrap();
    ctx.services
        .movements
        .void(TEST_USER, second_drifting)
        .await
        .unwrap();

    let outcome = ctx
        .services
        .recalculation
        .recalculate(TEST_USER, Some(first.id))
        .await
        .unwrap();
    assert_eq!(outcome.corrected_positions, 1);

    let repaired = get_position(db, item.id, first.id).await.unwrap();
    assert_eq!(repaired.average_unit_cost, dec!(5.00));

    // The other warehouse keeps its drift until recalculated itself
    let untouched = get_position(db, item.id, second.id).await.unwrap();
    assert_eq!(untouched.average_unit_cost, dec!(5.50));
}

#[tokio::test]
async fn positions_without_surviving_history_reset_to_zero() {
    let ctx = setup().await;
    let db = ctx.db.as_ref();
    let item = create_item(db, "WIDGET").await;
    let warehouse = create_warehouse(db, "MAIN", true).await;

    let only = publish_movement(
        &ctx,
        entrada(warehouse.id, 0, vec![line(item.id, dec!(10), Some(dec!(5.00)))]),
    )
    .await;
    ctx.services.movements.void(TEST_USER, only).await.unwrap();

    // Quantity is already zero but the average still carries the old cost
    let drifted = get_position(db, item.id, warehouse.id).await.unwrap();
    assert_eq!(drifted.quantity_on_hand, dec!(0));
    assert_eq!(drifted.average_unit_cost, dec!(5.00));

    let outcome = ctx
        .services
        .recalculation
        .recalculate(TEST_USER, Some(warehouse.id))
        .await
        .unwrap();
    assert_eq!(outcome.corrected_positions, 1);

    let reset = get_position(db, item.id, warehouse.id).await.unwrap();
    assert_eq!(reset.quantity_on_hand, dec!(0));
    assert_eq!(reset.average_unit_cost, dec!(0));
}

#[tokio::test]
async fn recalculation_orders_replay_by_movement_date() {
    let ctx = setup().await;
    let db = ctx.db.as_ref();
    let item = create_item(db, "WIDGET").await;
    let origin = create_warehouse(db, "ORIGIN", true).await;
    let destination = create_warehouse(db, "DEST", true).await;

    // Backdated publishing: at publish time the transfer sees the blended
    // average 6.00, but in date order it precedes the day-5 receipt and
    // history implies it moved stock valued at 4.00.
    publish_movement(
        &ctx,
        entrada(origin.id, 5, vec![line(item.id, dec!(10), Some(dec!(8.00)))]),
    )
    .await;
    publish_movement(
        &ctx,
        entrada(origin.id, 1, vec![line(item.id, dec!(10), Some(dec!(4.00)))]),
    )
    .await;
    publish_movement(
        &ctx,
        transferencia(origin.id, destination.id, 2, vec![line(item.id, dec!(5), None)]),
    )
    .await;

    let incremental_destination = get_position(db, item.id, destination.id).await.unwrap();
    assert_eq!(incremental_destination.average_unit_cost, dec!(6.00));

    let outcome = ctx
        .services
        .recalculation
        .recalculate(TEST_USER, None)
        .await
        .unwrap();
    assert_eq!(outcome.corrected_positions, 2);

    // Date-order replay: day 1 receipt 10@4.00, day 2 transfer of 5, day 5
    // receipt 10@8.00 → origin (5*4 + 10*8)/15, destination 5@4.00.
    let origin_position = get_position(db, item.id, origin.id).await.unwrap();
    assert_eq!(origin_position.quantity_on_hand, dec!(15));
    assert_eq!(origin_position.average_unit_cost, dec!(6.6667));

    let destination_position = get_position(db, item.id, destination.id).await.unwrap();
    assert_eq!(destination_position.quantity_on_hand, dec!(5));
    assert_eq!(destination_position.average_unit_cost, dec!(4.00));
}

#[tokio::test]
async fn recalculating_an_unknown_warehouse_fails() {
    let ctx = setup().await;

    let result = ctx
        .services
        .recalculation
        .recalculate(TEST_USER, Some(uuid::Uuid::new_v4()))
        .await;
    assert_matches!(result, Err(ServiceError::NotFound(_)));
}
