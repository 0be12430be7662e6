//! The four built-in interceptors: logging, timing, validation, and
//! single-flight caching.

pub mod caching;
pub mod logging;
pub mod timing;
pub mod validation;

pub use caching::CachingInterceptor;
pub use logging::LoggingInterceptor;
pub use timing::TimingInterceptor;
pub use validation::{ValidationInterceptor, Validator};
