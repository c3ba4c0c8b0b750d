//! Per-server routing.
//!
//! [`RoutingFrontend`] is what the hosting framework talks to: connection
//! lifecycle, group membership and the send operations. `LocalDelivery`
//! (crate-private) is the same server seen from a coordinator.

mod delivery;
mod frontend;
mod membership;

pub use delivery::LocalReport;
pub use frontend::RoutingFrontend;

use crate::errors::BackplaneError;
use crate::transport::Invocation;

/// Reject an empty identifier.
pub(crate) fn require_id(what: &str, value: &str) -> Result<(), BackplaneError> {
    if value.is_empty() {
        return Err(BackplaneError::InvalidArgument(format!(
            "{what} must not be empty"
        )));
    }
    Ok(())
}

/// Reject a list containing an empty identifier.
pub(crate) fn require_ids(what: &str, values: &[String]) -> Result<(), BackplaneError> {
    values.iter().try_for_each(|value| require_id(what, value))
}

pub(crate) fn require_method(invocation: &Invocation) -> Result<(), BackplaneError> {
    require_id("method name", &invocation.method)
}
