pub mod signals;
pub mod trades;

pub use signals::SignalStore;
pub use trades::TradeStore;
