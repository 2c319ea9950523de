pub mod account;
pub mod bridge;
pub mod client;
pub mod condition;
pub mod config;
pub mod maintenance;
pub mod pagination;
pub mod registry;
pub mod router;
pub mod throttle;
pub mod transaction;

pub use account::{BalanceView, DelistingFilter, PerRanking};
pub use bridge::{Correlation, PendingRequest, SuspensionBridge, Ticket};
pub use client::BridgeClient;
pub use condition::ConditionSearch;
pub use config::{BridgeConfig, ConfigError};
pub use maintenance::MaintenanceGuard;
pub use pagination::{Paginator, SeriesRequest};
pub use registry::{NotificationRegistry, Observer, RoutingKey};
pub use router::{CallbackRouter, Channels, ConditionReply};
pub use throttle::RequestThrottle;
pub use transaction::{Admission, TransactionCycle};
