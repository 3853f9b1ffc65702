pub mod bootstrap;
pub mod proxy_engine;
pub mod relay;
pub mod upstream_client;

pub use bootstrap::{Bootstrap, CliArgs, bootstrap, bootstrap_from_env, load_config};
pub use proxy_engine::{ProxyCall, ProxyEngine};
pub use relay::{ChunkStream, ResponseHandle, line_stream};
pub use upstream_client::{
    UpstreamClient, UpstreamClientConfig, UpstreamFailure, UpstreamHttpRequest,
    UpstreamHttpResponse, WreqUpstreamClient,
};
