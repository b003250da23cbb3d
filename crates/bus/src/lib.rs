pub mod actions;
pub mod correlation;
pub mod native;
pub mod router;
pub mod tabs;

pub use actions::{ActionContext, ActionHandler, ActionTable, Origin};
pub use correlation::CorrelationTable;
pub use native::{NativeChannel, NativeTransport};
pub use router::Router;
pub use tabs::{BrowserDriver, TabHandle, TabRegistry};
