//! Aggregated model-binding failures.
//!
//! Binding itself lives outside this crate; this is the error shape binders
//! report with. The bound type is captured from the type parameter, so it is
//! always present.

use std::fmt;

use crate::error::BoxError;

/// Result of binding a request onto a `T`.
pub type BindingResult<T> = Result<T, ModelBindingError>;

/// One property that failed to bind.
#[derive(Debug, thiserror::Error)]
#[error("unable to bind property `{property_name}` from value `{attempted_value}`: {source}")]
pub struct PropertyBindingError {
    pub property_name: String,
    pub attempted_value: String,
    #[source]
    pub source: BoxError,
}

impl PropertyBindingError {
    pub fn new(
        property_name: impl Into<String>,
        attempted_value: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self {
            property_name: property_name.into(),
            attempted_value: attempted_value.into(),
            source: source.into(),
        }
    }
}

/// Binding onto `bound_type` failed for one or more properties.
#[derive(thiserror::Error)]
#[error("Unable to bind to type: {bound_type}")]
pub struct ModelBindingError {
    bound_type: &'static str,
    failures: Vec<PropertyBindingError>,
}

impl ModelBindingError {
    pub fn new<T: ?Sized>(failures: Vec<PropertyBindingError>) -> Self {
        Self { bound_type: std::any::type_name::<T>(), failures }
    }

    pub fn bound_type(&self) -> &'static str {
        self.bound_type
    }

    pub fn property_failures(&self) -> &[PropertyBindingError] {
        &self.failures
    }

    pub fn push(&mut self, failure: PropertyBindingError) {
        self.failures.push(failure);
    }

    /// `Ok(value)` when no property failed, the aggregate otherwise.
    pub fn into_result<T>(self, value: T) -> BindingResult<T> {
        if self.failures.is_empty() { Ok(value) } else { Err(self) }
    }
}

impl fmt::Debug for ModelBindingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelBindingError")
            .field("bound_type", &self.bound_type)
            .field("failures", &self.failures.len())
            .finish()
    }
}
