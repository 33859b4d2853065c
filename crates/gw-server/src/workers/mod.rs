//! Background workers: periodic tasks running alongside the tunnels.

pub mod quota_ticker;

pub use quota_ticker::TickerScheduler;
