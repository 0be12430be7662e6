//! The interceptor pipeline: ordered middleware wrapping every store
//! operation.

pub mod builtin;
pub mod chain;
pub mod context;

pub use builtin::{CachingInterceptor, LoggingInterceptor, TimingInterceptor, ValidationInterceptor, Validator};
pub use chain::{Interceptor, InterceptorChain};
pub use context::{InterceptorContext, Metadata, RequestOutcome, StoreOperation};
