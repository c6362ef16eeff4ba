mod backend_session;
mod requests_logging;

pub use backend_session::backend_session;
pub use requests_logging::{log_requests, RequestsLoggingLevel};
