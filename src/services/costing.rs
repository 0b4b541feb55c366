//! Weighted-average costing engine.
//!
//! Everything here is pure: positions go in, positions come out, and the
//! persistence layer decides what to do with them. Publish, void, the
//! recalculation replay and the kardex reconstruction all flow through
//! [`apply_line`], so a movement is valued identically no matter which path
//! applies it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use uuid::Uuid;

use crate::entities::movement::{MovementSubtype, MovementType};
use crate::errors::ServiceError;

/// Stored fractional digits for costs and quantities (Decimal(19, 4) columns)
pub const COST_SCALE: u32 = 4;

/// Round a cost at its stored precision, half-up
pub fn round_cost(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(COST_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Costing mode of a warehouse, passed explicitly so publish and
/// recalculation share one code path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostingMode {
    /// Recompute the weighted average on every entry
    AutoAverage,
    /// Average stays pinned; only an audited override changes it
    Pinned,
}

impl CostingMode {
    pub fn from_flag(auto_update_average_cost: bool) -> Self {
        if auto_update_average_cost {
            CostingMode::AutoAverage
        } else {
            CostingMode::Pinned
        }
    }
}

/// In-memory image of one stock position row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PositionState {
    pub quantity: Decimal,
    pub average_cost: Decimal,
}

/// (item_id, warehouse_id)
pub type PositionKey = (Uuid, Uuid);

pub fn validate_quantity(quantity: Decimal) -> Result<(), ServiceError> {
    if quantity <= Decimal::ZERO {
        return Err(ServiceError::InvalidQuantity(format!(
            "quantity must be positive, got {}",
            quantity
        )));
    }
    if quantity.round_dp(COST_SCALE) != quantity {
        return Err(ServiceError::InvalidQuantity(format!(
            "quantity {} exceeds {} fractional digits",
            quantity, COST_SCALE
        )));
    }
    Ok(())
}

pub fn validate_cost(cost: Decimal) -> Result<(), ServiceError> {
    if cost < Decimal::ZERO {
        return Err(ServiceError::InvalidCost(format!(
            "unit cost must be non-negative, got {}",
            cost
        )));
    }
    if cost.round_dp(COST_SCALE) != cost {
        return Err(ServiceError::InvalidCost(format!(
            "unit cost {} exceeds {} fractional digits",
            cost, COST_SCALE
        )));
    }
    Ok(())
}

/// Applies a receipt of `quantity` units at `unit_cost` to a position.
///
/// In [`CostingMode::AutoAverage`] the new average is the quantity-weighted
/// blend of the existing stock value and the receipt value; with no
/// resulting stock the receipt cost is taken as-is. In
/// [`CostingMode::Pinned`] the quantity moves and the average does not.
pub fn apply_entrada(
    position: PositionState,
    quantity: Decimal,
    unit_cost: Decimal,
    mode: CostingMode,
) -> Result<PositionState, ServiceError> {
    validate_quantity(quantity)?;
    validate_cost(unit_cost)?;

    let new_quantity = position.quantity + quantity;
    let average_cost = match mode {
        CostingMode::AutoAverage => {
            if new_quantity.is_zero() {
                round_cost(unit_cost)
            } else {
                round_cost(
                    (position.quantity * position.average_cost + quantity * unit_cost)
                        / new_quantity,
                )
            }
        }
        CostingMode::Pinned => position.average_cost,
    };

    Ok(PositionState {
        quantity: new_quantity,
        average_cost,
    })
}

/// Applies an issue of `quantity` units. Issues never change the average.
pub fn apply_salida(
    position: PositionState,
    quantity: Decimal,
) -> Result<PositionState, ServiceError> {
    validate_quantity(quantity)?;

    if quantity > position.quantity {
        return Err(ServiceError::InsufficientStock(format!(
            "available {}, requested {}",
            position.quantity, quantity
        )));
    }

    Ok(PositionState {
        quantity: position.quantity - quantity,
        average_cost: position.average_cost,
    })
}

/// One movement detail line flattened into the shape the replay consumes.
/// Ordered streams of these are the input to every ledger computation.
#[derive(Debug, Clone)]
pub struct LedgerLine {
    pub movement_id: Uuid,
    pub movement_date: DateTime<Utc>,
    pub movement_type: MovementType,
    pub subtype: Option<MovementSubtype>,
    pub reference_document: Option<String>,
    pub line_number: i32,
    pub item_id: Uuid,
    pub source_warehouse_id: Option<Uuid>,
    pub destination_warehouse_id: Option<Uuid>,
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
}

/// Per-warehouse effect of applying one line. A transferencia yields two of
/// these (exit at the source, entry at the destination), everything else one.
#[derive(Debug, Clone, Copy)]
pub struct LineEffect {
    pub warehouse_id: Uuid,
    pub entry_quantity: Decimal,
    pub exit_quantity: Decimal,
    /// Cost the line was valued at for this warehouse
    pub unit_cost: Decimal,
    pub position_after: PositionState,
}

fn mode_for(modes: &HashMap<Uuid, CostingMode>, warehouse_id: Uuid) -> CostingMode {
    modes
        .get(&warehouse_id)
        .copied()
        .unwrap_or(CostingMode::AutoAverage)
}

fn with_line_context(err: ServiceError, line: &LedgerLine) -> ServiceError {
    let context = format!("line {} (item {})", line.line_number, line.item_id);
    match err {
        ServiceError::InsufficientStock(msg) => {
            ServiceError::InsufficientStock(format!("{}: {}", context, msg))
        }
        ServiceError::InvalidQuantity(msg) => {
            ServiceError::InvalidQuantity(format!("{}: {}", context, msg))
        }
        ServiceError::InvalidCost(msg) => ServiceError::InvalidCost(format!("{}: {}", context, msg)),
        ServiceError::ValidationError(msg) => {
            ServiceError::ValidationError(format!("{}: {}", context, msg))
        }
        other => other,
    }
}

/// Applies one line to the position map, returning its per-warehouse
/// effects. The map is only mutated when the whole line succeeds.
pub fn apply_line(
    positions: &mut HashMap<PositionKey, PositionState>,
    modes: &HashMap<Uuid, CostingMode>,
    line: &LedgerLine,
) -> Result<Vec<LineEffect>, ServiceError> {
    match line.movement_type {
        MovementType::Entrada => {
            let warehouse_id = line.destination_warehouse_id.ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "line {}: entrada requires a destination warehouse",
                    line.line_number
                ))
            })?;
            let unit_cost = line.unit_cost.ok_or_else(|| {
                ServiceError::InvalidCost(format!(
                    "line {} (item {}): entrada requires a unit cost",
                    line.line_number, line.item_id
                ))
            })?;

            let key = (line.item_id, warehouse_id);
            let before = positions.get(&key).copied().unwrap_or_default();
            let after = apply_entrada(before, line.quantity, unit_cost, mode_for(modes, warehouse_id))
                .map_err(|e| with_line_context(e, line))?;
            positions.insert(key, after);

            Ok(vec![LineEffect {
                warehouse_id,
                entry_quantity: line.quantity,
                exit_quantity: Decimal::ZERO,
                unit_cost,
                position_after: after,
            }])
        }
        MovementType::Salida => {
            let warehouse_id = line.source_warehouse_id.ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "line {}: salida requires a source warehouse",
                    line.line_number
                ))
            })?;

            let key = (line.item_id, warehouse_id);
            let before = positions.get(&key).copied().unwrap_or_default();
            let after =
                apply_salida(before, line.quantity).map_err(|e| with_line_context(e, line))?;
            positions.insert(key, after);

            Ok(vec![LineEffect {
                warehouse_id,
                entry_quantity: Decimal::ZERO,
                exit_quantity: line.quantity,
                unit_cost: before.average_cost,
                position_after: after,
            }])
        }
        MovementType::Transferencia => {
            let source_id = line.source_warehouse_id.ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "line {}: transferencia requires a source warehouse",
                    line.line_number
                ))
            })?;
            let destination_id = line.destination_warehouse_id.ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "line {}: transferencia requires a destination warehouse",
                    line.line_number
                ))
            })?;

            let source_key = (line.item_id, source_id);
            let source_before = positions.get(&source_key).copied().unwrap_or_default();
            // The transferred stock is valued at the source's average at
            // transfer time; the destination blends it like any entrada.
            let transfer_cost = source_before.average_cost;
            let source_after = apply_salida(source_before, line.quantity)
                .map_err(|e| with_line_context(e, line))?;

            let destination_key = (line.item_id, destination_id);
            let destination_before = positions.get(&destination_key).copied().unwrap_or_default();
            let destination_after = apply_entrada(
                destination_before,
                line.quantity,
                transfer_cost,
                mode_for(modes, destination_id),
            )
            .map_err(|e| with_line_context(e, line))?;

            positions.insert(source_key, source_after);
            positions.insert(destination_key, destination_after);

            Ok(vec![
                LineEffect {
                    warehouse_id: source_id,
                    entry_quantity: Decimal::ZERO,
                    exit_quantity: line.quantity,
                    unit_cost: transfer_cost,
                    position_after: source_after,
                },
                LineEffect {
                    warehouse_id: destination_id,
                    entry_quantity: line.quantity,
                    exit_quantity: Decimal::ZERO,
                    unit_cost: transfer_cost,
                    position_after: destination_after,
                },
            ])
        }
    }
}

/// Replays an ordered line stream from empty positions, producing the
/// position map implied by history. The recalculation service persists this
/// map; the kardex engine consumes the per-line effects instead.
pub fn replay<'a, I>(
    lines: I,
    modes: &HashMap<Uuid, CostingMode>,
) -> Result<HashMap<PositionKey, PositionState>, ServiceError>
where
    I: IntoIterator<Item = &'a LedgerLine>,
{
    let mut positions = HashMap::new();
    for line in lines {
        apply_line(&mut positions, modes, line)?;
    }
    Ok(positions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn entrada_line(item: Uuid, warehouse: Uuid, qty: Decimal, cost: Decimal) -> LedgerLine {
        LedgerLine {
            movement_id: Uuid::new_v4(),
            movement_date: chrono::Utc::now(),
            movement_type: MovementType::Entrada,
            subtype: None,
            reference_document: None,
            line_number: 1,
            item_id: item,
            source_warehouse_id: None,
            destination_warehouse_id: Some(warehouse),
            quantity: qty,
            unit_cost: Some(cost),
        }
    }

    #[test]
    fn receipts_blend_into_the_weighted_average() {
        let start = PositionState::default();
        let after_first =
            apply_entrada(start, dec!(10), dec!(5.00), CostingMode::AutoAverage).unwrap();
        assert_eq!(after_first.quantity, dec!(10));
        assert_eq!(after_first.average_cost, dec!(5.00));

        let after_second =
            apply_entrada(after_first, dec!(5), dec!(8.00), CostingMode::AutoAverage).unwrap();
        assert_eq!(after_second.quantity, dec!(15));
        assert_eq!(after_second.average_cost, dec!(6.00));
    }

    #[test]
    fn issues_keep_the_average_untouched() {
        let position = PositionState {
            quantity: dec!(15),
            average_cost: dec!(6.00),
        };
        let after = apply_salida(position, dec!(7)).unwrap();
        assert_eq!(after.quantity, dec!(8));
        assert_eq!(after.average_cost, dec!(6.00));
    }

    #[test]
    fn oversized_issue_fails_and_changes_nothing() {
        let position = PositionState {
            quantity: dec!(8),
            average_cost: dec!(6.00),
        };
        let result = apply_salida(position, dec!(20));
        assert_matches!(result, Err(ServiceError::InsufficientStock(_)));
    }

    #[test]
    fn pinned_mode_moves_quantity_but_not_cost() {
        let position = PositionState {
            quantity: dec!(10),
            average_cost: dec!(3.50),
        };
        let after = apply_entrada(position, dec!(10), dec!(9.99), CostingMode::Pinned).unwrap();
        assert_eq!(after.quantity, dec!(20));
        assert_eq!(after.average_cost, dec!(3.50));
    }

    #[test]
    fn division_rounds_half_up_at_cost_scale() {
        let position = PositionState {
            quantity: dec!(3),
            average_cost: dec!(1.0000),
        };
        // (3*1.0000 + 3*1.0001) / 6 = 1.00005 -> 1.0001 under half-up
        let after =
            apply_entrada(position, dec!(3), dec!(1.0001), CostingMode::AutoAverage).unwrap();
        assert_eq!(after.average_cost, dec!(1.0001));
    }

    #[test]
    fn entry_into_empty_position_takes_the_receipt_cost() {
        let after = apply_entrada(
            PositionState::default(),
            dec!(4),
            dec!(2.75),
            CostingMode::AutoAverage,
        )
        .unwrap();
        assert_eq!(after.average_cost, dec!(2.75));
    }

    #[test]
    fn negative_cost_is_rejected_before_any_mutation() {
        let result = apply_entrada(
            PositionState::default(),
            dec!(1),
            dec!(-0.01),
            CostingMode::AutoAverage,
        );
        assert_matches!(result, Err(ServiceError::InvalidCost(_)));
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let result = apply_salida(
            PositionState {
                quantity: dec!(5),
                average_cost: dec!(1),
            },
            dec!(0),
        );
        assert_matches!(result, Err(ServiceError::InvalidQuantity(_)));
    }

    #[test]
    fn transfer_values_destination_at_source_average() {
        let item = Uuid::new_v4();
        let w1 = Uuid::new_v4();
        let w2 = Uuid::new_v4();
        let modes = HashMap::new();

        let mut positions = HashMap::new();
        positions.insert(
            (item, w1),
            PositionState {
                quantity: dec!(10),
                average_cost: dec!(4.00),
            },
        );
        positions.insert(
            (item, w2),
            PositionState {
                quantity: dec!(10),
                average_cost: dec!(6.00),
            },
        );

        let line = LedgerLine {
            movement_type: MovementType::Transferencia,
            source_warehouse_id: Some(w1),
            destination_warehouse_id: Some(w2),
            quantity: dec!(10),
            unit_cost: None,
            ..entrada_line(item, w2, dec!(10), dec!(0))
        };

        let effects = apply_line(&mut positions, &modes, &line).unwrap();
        assert_eq!(effects.len(), 2);
        assert_eq!(effects[0].unit_cost, dec!(4.00));

        let source = positions[&(item, w1)];
        let destination = positions[&(item, w2)];
        assert_eq!(source.quantity, dec!(0));
        assert_eq!(source.average_cost, dec!(4.00));
        assert_eq!(destination.quantity, dec!(20));
        // (10*6 + 10*4) / 20
        assert_eq!(destination.average_cost, dec!(5.00));
    }

    #[test]
    fn replay_orders_matter_not_insertion() {
        let item = Uuid::new_v4();
        let warehouse = Uuid::new_v4();
        let modes = HashMap::new();

        let lines = vec![
            entrada_line(item, warehouse, dec!(10), dec!(5.00)),
            entrada_line(item, warehouse, dec!(5), dec!(8.00)),
        ];

        let positions = replay(lines.iter(), &modes).unwrap();
        let position = positions[&(item, warehouse)];
        assert_eq!(position.quantity, dec!(15));
        assert_eq!(position.average_cost, dec!(6.00));
    }

    #[test]
    fn entrada_without_cost_is_rejected_in_replay() {
        let item = Uuid::new_v4();
        let warehouse = Uuid::new_v4();
        let mut line = entrada_line(item, warehouse, dec!(1), dec!(1));
        line.unit_cost = None;

        let result = replay(std::iter::once(&line), &HashMap::new());
        assert_matches!(result, Err(ServiceError::InvalidCost(_)));
    }
}
