//! Scheduling engine: data model, trigger evaluation, policy rules,
//! leader election, and the tick loop.

pub mod catalog;
pub mod dispatch;
pub mod events;
pub mod execution_store;
pub mod leader;
pub mod model;
pub mod next_run;
pub mod payload;
pub mod policy;
pub mod schedule_store;
pub mod tick;
pub mod trigger;
pub mod webhook;

pub use catalog::{BotCatalog, HttpBotCatalog, PermissiveBotCatalog};
pub use dispatch::{Dispatcher, HttpDispatcher, NoopDispatcher};
pub use leader::{LeaderElector, LeaderLock, PgLeaderLock};
pub use tick::SchedulerService;
pub use trigger::{TriggerProcessor, TriggerRequest};
