mod conversation;
mod dashboard;
mod files;
mod flows;
mod guard;
pub mod scope;
mod session;

pub use conversation::ConversationLog;
pub use dashboard::{Backends, Dashboard, DashboardOptions};
pub use files::{FileCollectionClient, FilePanel};
pub use flows::{
    ACCEPTED_FLOW_EXTENSIONS, DeletionRequest, FlowPanel, FlowRegistry, FlowSource,
    parse_flow_definition,
};
pub use guard::SessionGuard;
pub use scope::ScopeCoordinator;
pub use session::{SessionKey, SessionState};
