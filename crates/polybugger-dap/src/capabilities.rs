//! Adapter capabilities tracking.

use crate::protocol::Capabilities;

/// Resolved capabilities of a debug adapter, stored as plain booleans.
///
/// Profiles may force individual flags after the handshake (e.g. backends
/// that support `configurationDone` without advertising it).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdapterCapabilities {
    /// Whether the adapter supports `configurationDone`.
    pub supports_configuration_done_request: bool,
    /// Whether the adapter supports conditional breakpoints.
    pub supports_conditional_breakpoints: bool,
    /// Whether the adapter supports hit-count breakpoints.
    pub supports_hit_conditional_breakpoints: bool,
    /// Whether the adapter supports `evaluate` for hovers.
    pub supports_evaluate_for_hovers: bool,
    /// Whether the adapter supports the `terminate` request.
    pub supports_terminate_request: bool,
    /// Whether the adapter supports the `restart` request.
    pub supports_restart_request: bool,
    /// Exception filter ids the adapter offers.
    pub exception_filters: Vec<String>,
}

impl AdapterCapabilities {
    /// Build [`AdapterCapabilities`] from the protocol-level [`Capabilities`]
    /// returned by the adapter in the `initialize` response.
    pub fn from_initialize_response(caps: &Capabilities) -> Self {
        Self {
            supports_configuration_done_request: caps
                .supports_configuration_done_request
                .unwrap_or(false),
            supports_conditional_breakpoints: caps
                .supports_conditional_breakpoints
                .unwrap_or(false),
            supports_hit_conditional_breakpoints: caps
                .supports_hit_conditional_breakpoints
                .unwrap_or(false),
            supports_evaluate_for_hovers: caps.supports_evaluate_for_hovers.unwrap_or(false),
            supports_terminate_request: caps.supports_terminate_request.unwrap_or(false),
            supports_restart_request: caps.supports_restart_request.unwrap_or(false),
            exception_filters: caps
                .exception_breakpoint_filters
                .as_ref()
                .map(|fs| fs.iter().map(|f| f.filter.clone()).collect())
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ExceptionBreakpointsFilter;

    #[test]
    fn capabilities_from_full_response() {
        let caps = Capabilities {
            supports_configuration_done_request: Some(true),
            supports_conditional_breakpoints: Some(true),
            supports_hit_conditional_breakpoints: Some(false),
            supports_evaluate_for_hovers: Some(true),
            supports_terminate_request: Some(true),
            supports_restart_request: Some(false),
            exception_breakpoint_filters: Some(vec![ExceptionBreakpointsFilter {
                filter: "uncaught".into(),
                label: "Uncaught Exceptions".into(),
                default: Some(true),
            }]),
        };
        let resolved = AdapterCapabilities::from_initialize_response(&caps);
        assert!(resolved.supports_configuration_done_request);
        assert!(resolved.supports_conditional_breakpoints);
        assert!(!resolved.supports_hit_conditional_breakpoints);
        assert!(resolved.supports_terminate_request);
        assert!(!resolved.supports_restart_request);
        assert_eq!(resolved.exception_filters, vec!["uncaught".to_string()]);
    }

    #[test]
    fn capabilities_from_empty_response_is_all_off() {
        let resolved = AdapterCapabilities::from_initialize_response(&Capabilities::default());
        assert!(!resolved.supports_configuration_done_request);
        assert!(!resolved.supports_conditional_breakpoints);
        assert!(resolved.exception_filters.is_empty());
    }
}
