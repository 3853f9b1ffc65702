pub mod error;
pub mod proxy;

pub use error::GatewayError;
pub use proxy::{ProxyState, proxy_router};
