//! Applies a validator function to the request (or each element of a
//! batch) before the backend is called.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::{FieldError, StoreError};
use crate::interceptor::chain::Interceptor;
use crate::interceptor::context::{InterceptorContext, RequestOutcome, StoreOperation};

/// A validation function: inspect a single request item, returning any
/// field errors found.
pub type Validator<Req> = dyn Fn(&Req) -> Vec<FieldError> + Send + Sync;

/// Runs `validator` over the request, applying it per-element when the
/// operation is `SaveAll`. Defaults to `{Save, SaveAll}`.
pub struct ValidationInterceptor<Req> {
    operations: HashSet<StoreOperation>,
    validator: Box<Validator<Req>>,
}

impl<Req> ValidationInterceptor<Req> {
    /// Construct a validation interceptor over `{Save, SaveAll}` with
    /// `validator`.
    pub fn new(validator: impl Fn(&Req) -> Vec<FieldError> + Send + Sync + 'static) -> Self {
        Self {
            operations: HashSet::from([StoreOperation::Save, StoreOperation::SaveAll]),
            validator: Box::new(validator),
        }
    }

    /// Override the applicable operation set.
    pub fn with_operations(mut self, operations: HashSet<StoreOperation>) -> Self {
        self.operations = operations;
        self
    }
}

#[async_trait]
impl<Req: Send + Sync, Res: Send + Sync> Interceptor<Req, Res> for ValidationInterceptor<Req> {
    fn operations(&self) -> &HashSet<StoreOperation> {
        &self.operations
    }

    async fn on_request(&self, ctx: &mut InterceptorContext<Req, Res>) -> RequestOutcome<Res> {
        let errors = (self.validator)(&ctx.request);
        if errors.is_empty() {
            RequestOutcome::Continue
        } else {
            RequestOutcome::Error(StoreError::Validation {
                message: format!("{} field error(s)", errors.len()),
                errors,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn non_empty_name(req: &String) -> Vec<FieldError> {
        if req.is_empty() {
            vec![FieldError::new("name", "must not be empty")]
        } else {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn valid_request_continues() {
        let interceptor = ValidationInterceptor::new(non_empty_name);
        let mut ctx: InterceptorContext<String, ()> = InterceptorContext::new(StoreOperation::Save, "alice".to_string());
        match interceptor.on_request(&mut ctx).await {
            RequestOutcome::Continue => {}
            _ => panic!("expected Continue"),
        }
    }

    #[tokio::test]
    async fn invalid_request_errors_with_field_detail() {
        let interceptor = ValidationInterceptor::new(non_empty_name);
        let mut ctx: InterceptorContext<String, ()> = InterceptorContext::new(StoreOperation::Save, String::new());
        match interceptor.on_request(&mut ctx).await {
            RequestOutcome::Error(StoreError::Validation { errors, .. }) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].field, "name");
            }
            _ => panic!("expected Error(Validation)"),
        }
    }

    #[test]
    fn default_operations_are_save_and_save_all() {
        let interceptor = ValidationInterceptor::new(non_empty_name);
        let ops: &HashSet<StoreOperation> = <ValidationInterceptor<String> as Interceptor<String, ()>>::operations(&interceptor);
        assert!(ops.contains(&StoreOperation::Save));
        assert!(ops.contains(&StoreOperation::SaveAll));
        assert_eq!(ops.len(), 2);
    }
}
