mod router;
mod server;
mod state;

pub use router::{RELOAD_CONFIG_PATH, app_router};
pub use server::serve_http;
pub use state::{GatewayOptions, GatewayState};
