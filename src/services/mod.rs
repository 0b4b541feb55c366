pub mod audit;
pub mod costing;
pub mod history;
pub mod kardex;
pub mod movements;
pub mod recalculation;
pub mod stock;
pub mod stock_locks;
