#![warn(clippy::pedantic)]
// Sometimes a redundant else is clearer
#![allow(clippy::redundant_else)]
// Don't care enough to fix
#![allow(clippy::match_same_arms)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::similar_names)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::wildcard_imports)]

pub mod cache;
pub mod driver;
pub mod pool;
pub mod resolver;
pub mod settings;
pub mod timer;
pub mod transport;

mod walker;

#[cfg(test)]
pub(crate) mod test_util;

pub use self::cache::QueryKey;
pub use self::resolver::{DnsResponse, QueryCallback, QueryError, QueryOutcome, Resolver, Status};
pub use self::settings::{SelectionMode, ServerSetting, Settings, SettingsError};
pub use self::timer::{TimerEvent, TimerId, Timers};
pub use self::transport::Transport;
