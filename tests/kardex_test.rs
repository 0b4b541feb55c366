mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;

use common::*;
use kardex_api::entities::movement::MovementType;
use kardex_api::errors::ServiceError;
use kardex_api::services::kardex::KardexQuery;

fn full_history_query(item_id: uuid::Uuid, warehouse_id: uuid::Uuid) -> KardexQuery {
    KardexQuery {
        item_id,
        warehouse_id,
        from: None,
        to: None,
        movement_type: None,
        page: 1,
        per_page: 100,
    }
}

#[tokio::test]
async fn kardex_reconstructs_running_balances() {
    let ctx = setup().await;
    let db = ctx.db.as_ref();
    let item = create_item(db, "WIDGET").await;
    let warehouse = create_warehouse(db, "MAIN", true).await;

    publish_movement(
        &ctx,
        entrada(warehouse.id, 0, vec![line(item.id, dec!(10), Some(dec!(5.00)))]),
    )
    .await;
    publish_movement(
        &ctx,
        entrada(warehouse.id, 1, vec![line(item.id, dec!(5), Some(dec!(8.00)))]),
    )
    .await;
    publish_movement(
        &ctx,
        salida(warehouse.id, 2, vec![line(item.id, dec!(7), None)]),
    )
    .await;

    let report = ctx
        .services
        .kardex
        .get_kardex(full_history_query(item.id, warehouse.id))
        .await
        .unwrap();

    assert_eq!(report.rows.len(), 3);

    assert_eq!(report.rows[0].entry_quantity, dec!(10));
    assert_eq!(report.rows[0].balance_quantity, dec!(10));
    assert_eq!(report.rows[0].average_cost, dec!(5.00));

    assert_eq!(report.rows[1].entry_quantity, dec!(5));
    assert_eq!(report.rows[1].balance_quantity, dec!(15));
    assert_eq!(report.rows[1].average_cost, dec!(6.00));
    assert_eq!(report.rows[1].entry_value, dec!(40.00));

    assert_eq!(report.rows[2].exit_quantity, dec!(7));
    assert_eq!(report.rows[2].exit_value, dec!(42.00));
    assert_eq!(report.rows[2].balance_quantity, dec!(8));
    assert_eq!(report.rows[2].average_cost, dec!(6.00));

    assert_eq!(report.summary.total_entry_quantity, dec!(15));
    assert_eq!(report.summary.total_exit_quantity, dec!(7));
    assert_eq!(report.summary.final_balance, dec!(8));
    assert_eq!(report.summary.average_cost, dec!(6.00));
    assert_eq!(report.summary.final_valuation, dec!(48.00));
}

#[tokio::test]
async fn full_history_kardex_agrees_with_the_stock_position() {
    let ctx = setup().await;
    let db = ctx.db.as_ref();
    let item = create_item(db, "WIDGET").await;
    let origin = create_warehouse(db, "ORIGIN", true).await;
    let destination = create_warehouse(db, "DEST", true).await;

    publish_movement(
        &ctx,
        entrada(origin.id, 0, vec![line(item.id, dec!(12), Some(dec!(3.00)))]),
    )
    .await;
    publish_movement(
        &ctx,
        transferencia(origin.id, destination.id, 1, vec![line(item.id, dec!(5), None)]),
    )
    .await;
    publish_movement(
        &ctx,
        salida(origin.id, 2, vec![line(item.id, dec!(2), None)]),
    )
    .await;

    for warehouse_id in [origin.id, destination.id] {
        let report = ctx
            .services
            .kardex
            .get_kardex(full_history_query(item.id, warehouse_id))
            .await
            .unwrap();
        let position = get_position(db, item.id, warehouse_id).await.unwrap();
        assert_eq!(report.summary.final_balance, position.quantity_on_hand);
        assert_eq!(report.summary.average_cost, position.average_unit_cost);
    }
}

#[tokio::test]
async fn voided_movements_never_appear_in_the_kardex() {
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

    // Drafts are invisible too
    ctx.services
        .movements
        .create_movement(
            TEST_USER,
            entrada(warehouse.id, 2, vec![line(item.id, dec!(99), Some(dec!(1.00)))]),
        )
        .await
        .unwrap();

    let report = ctx
        .services
        .kardex
        .get_kardex(full_history_query(item.id, warehouse.id))
        .await
        .unwrap();

    assert_eq!(report.rows.len(), 1);
    assert_eq!(report.summary.final_balance, dec!(10));
    assert_eq!(report.summary.average_cost, dec!(5.00));
}

#[tokio::test]
async fn date_range_filters_rows_but_balances_stay_absolute() {
    let ctx = setup().await;
    let db = ctx.db.as_ref();
    let item = create_item(db, "WIDGET").await;
    let warehouse = create_warehouse(db, "MAIN", true).await;

    publish_movement(
        &ctx,
        entrada(warehouse.id, 0, vec![line(item.id, dec!(10), Some(dec!(5.00)))]),
    )
    .await;
    publish_movement(
        &ctx,
        entrada(warehouse.id, 5, vec![line(item.id, dec!(5), Some(dec!(8.00)))]),
    )
    .await;
    publish_movement(
        &ctx,
        salida(warehouse.id, 10, vec![line(item.id, dec!(3), None)]),
    )
    .await;

    let report = ctx
        .services
        .kardex
        .get_kardex(KardexQuery {
            from: Some(test_date(4)),
            to: Some(test_date(6)),
            ..full_history_query(item.id, warehouse.id)
        })
        .await
        .unwrap();

    // Only the middle movement is emitted, but its running balance still
    // includes the receipt before the range.
    assert_eq!(report.rows.len(), 1);
    assert_eq!(report.rows[0].entry_quantity, dec!(5));
    assert_eq!(report.rows[0].balance_quantity, dec!(15));
    assert_eq!(report.summary.final_balance, dec!(15));
}

#[tokio::test]
async fn type_filter_narrows_rows() {
    let ctx = setup().await;
    let db = ctx.db.as_ref();
    let item = create_item(db, "WIDGET").await;
    let warehouse = create_warehouse(db, "MAIN", true).await;

    publish_movement(
        &ctx,
        entrada(warehouse.id, 0, vec![line(item.id, dec!(10), Some(dec!(5.00)))]),
    )
    .await;
    publish_movement(
        &ctx,
        salida(warehouse.id, 1, vec![line(item.id, dec!(4), None)]),
    )
    .await;

    let report = ctx
        .services
        .kardex
        .get_kardex(KardexQuery {
            movement_type: Some(MovementType::Salida),
            ..full_history_query(item.id, warehouse.id)
        })
        .await
        .unwrap();

    assert_eq!(report.rows.len(), 1);
    assert_eq!(report.rows[0].exit_quantity, dec!(4));
    assert_eq!(report.summary.total_entry_quantity, dec!(0));
    assert_eq!(report.summary.total_exit_quantity, dec!(4));
}

#[tokio::test]
async fn pagination_slices_rows_after_totals_are_computed() {
    let ctx = setup().await;
    let db = ctx.db.as_ref();
    let item = create_item(db, "WIDGET").await;
    let warehouse = create_warehouse(db, "MAIN", true).await;

    for day in 0..5 {
        publish_movement(
            &ctx,
            entrada(warehouse.id, day, vec![line(item.id, dec!(2), Some(dec!(1.00)))]),
        )
        .await;
    }

    let page_two = ctx
        .services
        .kardex
        .get_kardex(KardexQuery {
            page: 2,
            per_page: 2,
            ..full_history_query(item.id, warehouse.id)
        })
        .await
        .unwrap();

    assert_eq!(page_two.total_rows, 5);
    assert_eq!(page_two.rows.len(), 2);
    // Summary covers all five rows, not just this page
    assert_eq!(page_two.summary.total_entry_quantity, dec!(10));
    assert_eq!(page_two.summary.final_balance, dec!(10));
    // Page 2 starts at the third movement: running balance 6
    assert_eq!(page_two.rows[0].balance_quantity, dec!(6));
}

#[tokio::test]
async fn replay_follows_movement_dates_not_publish_order() {
    let ctx = setup().await;
    let db = ctx.db.as_ref();
    let item = create_item(db, "WIDGET").await;
    let origin = create_warehouse(db, "ORIGIN", true).await;
    let destination = create_warehouse(db, "DEST", true).await;

    // Published out of chronological order: the day-5 receipt lands first,
    // then the backdated day-1 receipt, then the day-2 transfer.
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

    // In date order only the day-1 receipt precedes the transfer, so the
    // transferred stock is valued at 4.00, not the blended publish-time 6.00.
    let report = ctx
        .services
        .kardex
        .get_kardex(full_history_query(item.id, destination.id))
        .await
        .unwrap();
    assert_eq!(report.rows.len(), 1);
    assert_eq!(report.rows[0].entry_quantity, dec!(5));
    assert_eq!(report.rows[0].entry_value, dec!(20.00));
    assert_eq!(report.summary.final_balance, dec!(5));
    assert_eq!(report.summary.average_cost, dec!(4.00));

    // The stored position still carries the publish-order valuation; the
    // disagreement is the drift signal that calls for a recalculation.
    let position = get_position(db, item.id, destination.id).await.unwrap();
    assert_eq!(position.average_unit_cost, dec!(6.00));
}

#[tokio::test]
async fn kardex_for_unknown_pair_fails_as_not_found() {
    let ctx = setup().await;
    let db = ctx.db.as_ref();
    let warehouse = create_warehouse(db, "MAIN", true).await;

    let result = ctx
        .services
        .kardex
        .get_kardex(full_history_query(uuid::Uuid::new_v4(), warehouse.id))
        .await;
    assert_matches!(result, Err(ServiceError::NotFound(_)));
}
