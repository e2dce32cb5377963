// Risk management module
pub mod alerts;
pub mod manager;
pub mod margin;
pub mod session;

pub use alerts::{AlertBook, TargetPriceAlert};
pub use manager::{
    ClosedTrade, EntryPlan, EntryRejection, EntryReservation, ExitReason, LiquidationWarning,
    PartialClose, PositionStatus, RiskManager, StatusReport, StopLevels,
};
pub use margin::{MarginCheck, MarginMonitor};
pub use session::SessionStats;
