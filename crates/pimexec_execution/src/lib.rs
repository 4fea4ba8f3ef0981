pub mod fleet;
pub mod join;
pub mod plan;
pub mod reduce;
pub mod table;
pub mod unit;
