pub mod builder;
pub mod cors;
pub mod handler;
pub mod listener;
pub mod rate_limit;
pub mod request_id;

pub use builder::ServerBuilder;
pub use cors::CorsPolicy;
pub use handler::{HandlerError, RequestHandler};
pub use listener::{bind_tcp, ClientAddr};
pub use rate_limit::{RateDecision, RateLimiter};
pub use request_id::{RequestId, RequestIdLayer, REQUEST_ID_HEADER};
