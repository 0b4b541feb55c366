use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a movement. The only legal transitions are
/// borrador → publicado and publicado → anulado; anulado is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementState {
    Borrador,
    Publicado,
    Anulado,
}

impl MovementState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementState::Borrador => "borrador",
            MovementState::Publicado => "publicado",
            MovementState::Anulado => "anulado",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "borrador" => Some(MovementState::Borrador),
            "publicado" => Some(MovementState::Publicado),
            "anulado" => Some(MovementState::Anulado),
            _ => None,
        }
    }

    /// Exhaustive transition table
    pub fn can_transition(self, to: MovementState) -> bool {
        matches!(
            (self, to),
            (MovementState::Borrador, MovementState::Publicado)
                | (MovementState::Publicado, MovementState::Anulado)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementType {
    Entrada,
    Salida,
    Transferencia,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Entrada => "entrada",
            MovementType::Salida => "salida",
            MovementType::Transferencia => "transferencia",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "entrada" => Some(MovementType::Entrada),
            "salida" => Some(MovementType::Salida),
            "transferencia" => Some(MovementType::Transferencia),
            _ => None,
        }
    }

    /// Whether this type takes stock out of a source warehouse
    pub fn requires_source(&self) -> bool {
        matches!(self, MovementType::Salida | MovementType::Transferencia)
    }

    /// Whether this type puts stock into a destination warehouse
    pub fn requires_destination(&self) -> bool {
        matches!(self, MovementType::Entrada | MovementType::Transferencia)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementSubtype {
    Compra,
    Venta,
    DevolucionVenta,
    DevolucionCompra,
}

impl MovementSubtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementSubtype::Compra => "compra",
            MovementSubtype::Venta => "venta",
            MovementSubtype::DevolucionVenta => "devolucion_venta",
            MovementSubtype::DevolucionCompra => "devolucion_compra",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "compra" => Some(MovementSubtype::Compra),
            "venta" => Some(MovementSubtype::Venta),
            "devolucion_venta" => Some(MovementSubtype::DevolucionVenta),
            "devolucion_compra" => Some(MovementSubtype::DevolucionCompra),
            _ => None,
        }
    }
}

/// Movement header. Detail lines are immutable once the movement leaves
/// borrador; `version` detects concurrent draft edits.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "movements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub movement_type: String,
    pub subtype: Option<String>,
    pub movement_date: DateTime<Utc>,
    pub source_warehouse_id: Option<Uuid>,
    pub destination_warehouse_id: Option<Uuid>,
    pub third_party: Option<String>,
    pub reference_document: Option<String>,
    pub observation: Option<String>,
    pub state: String,
    pub created_by: String,
    pub published_at: Option<DateTime<Utc>>,
    pub voided_at: Option<DateTime<Utc>>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Model {
    pub fn state_enum(&self) -> Option<MovementState> {
        MovementState::from_str(&self.state)
    }

    pub fn type_enum(&self) -> Option<MovementType> {
        MovementType::from_str(&self.movement_type)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::movement_detail::Entity")]
    MovementDetail,
}

impl Related<super::movement_detail::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MovementDetail.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table_is_closed() {
        use MovementState::*;

        let all = [Borrador, Publicado, Anulado];
        for from in all {
            for to in all {
                let legal = matches!((from, to), (Borrador, Publicado) | (Publicado, Anulado));
                assert_eq!(from.can_transition(to), legal, "{:?} -> {:?}", from, to);
            }
        }
    }

    #[test]
    fn state_round_trips_through_strings() {
        for state in [
            MovementState::Borrador,
            MovementState::Publicado,
            MovementState::Anulado,
        ] {
            assert_eq!(MovementState::from_str(state.as_str()), Some(state));
        }
        assert_eq!(MovementState::from_str("draft"), None);
    }
}
