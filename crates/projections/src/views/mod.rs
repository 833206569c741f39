mod stock_levels;

pub use stock_levels::{ProductLevel, RefreshSummary, StockLevelsView};
