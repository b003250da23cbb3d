pub mod gateway;
pub mod stdio;

pub use gateway::WsBridge;
pub use stdio::StdioHost;
