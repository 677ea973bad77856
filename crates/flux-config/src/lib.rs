pub mod automation;
pub mod loader;

pub use automation::{AutomationConfig, ConcurrencyPolicy, EngineConfig, LoggingConfig, SchedulerConfig};
pub use loader::{ConfigLoader, DEFAULT_CONFIG_FILE};
