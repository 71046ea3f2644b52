pub mod api;
pub mod identity;
pub mod router;
pub mod server;
pub mod state;

pub use server::GatewayServer;
