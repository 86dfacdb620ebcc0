//! Per-call execution context.

/// Operator used for calls made by the system itself.
pub const SYSTEM_OPERATOR: &str = "system";

/// Who is executing a façade call.
///
/// The operator is stamped into `_createdBy` / `_modifiedBy`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Context {
    operator: String,
}

impl Context {
    /// Context of `operator`.
    pub fn new(operator: impl Into<String>) -> Self {
        Self {
            operator: operator.into(),
        }
    }

    /// Context for maintenance and internal calls.
    pub fn system() -> Self {
        Self::new(SYSTEM_OPERATOR)
    }

    /// The operator id.
    pub fn operator(&self) -> &str {
        &self.operator
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::system()
    }
}
