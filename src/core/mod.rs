pub mod events;
pub mod monitor;
pub mod notifier;
pub mod registry;
pub mod retry;
pub mod session;
pub mod status;

pub use events::{LogEvent, parse_log_line, strip_log_prefix};
pub use monitor::CsgoMonitor;
pub use notifier::{Delivery, EdgeAction, NotificationEdge, Notifier, NotifyError};
pub use registry::{
    CapabilityKind, ConstructError, Registries, Registry, RegistryError, RegistryResult, Resolver,
};
pub use retry::RetryPolicy;
pub use session::{MatchPhase, SessionState, SessionTracker, Team, TeamStatus};
pub use status::{Status, StatusCache, StatusError};
