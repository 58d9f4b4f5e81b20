//! Metric name constants, shared so call sites cannot drift apart.

/// Connections registered total (counter).
pub const CONNECTIONS_OPENED_TOTAL: &str = "gateway_connections_opened_total";
/// Connections unregistered or evicted total (counter).
pub const CONNECTIONS_CLOSED_TOTAL: &str = "gateway_connections_closed_total";
/// Currently registered connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "gateway_connections_active";
/// Frames decoded off the transport total (counter).
pub const FRAMES_RECEIVED_TOTAL: &str = "gateway_frames_received_total";
/// Frames written to the transport total (counter).
pub const FRAMES_SENT_TOTAL: &str = "gateway_frames_sent_total";
/// Pongs written in reply to peer pings total (counter).
pub const PONGS_SENT_TOTAL: &str = "gateway_pongs_sent_total";
/// Advisory registry update failures total (counter).
pub const REGISTRY_UPDATE_FAILURES_TOTAL: &str = "gateway_registry_update_failures_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_snake_case() {
        let names = [
            CONNECTIONS_OPENED_TOTAL,
            CONNECTIONS_CLOSED_TOTAL,
            CONNECTIONS_ACTIVE,
            FRAMES_RECEIVED_TOTAL,
            FRAMES_SENT_TOTAL,
            PONGS_SENT_TOTAL,
            REGISTRY_UPDATE_FAILURES_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }

    #[test]
    fn metric_names_are_unique() {
        let names = [
            CONNECTIONS_OPENED_TOTAL,
            CONNECTIONS_CLOSED_TOTAL,
            CONNECTIONS_ACTIVE,
            FRAMES_RECEIVED_TOTAL,
            FRAMES_SENT_TOTAL,
            PONGS_SENT_TOTAL,
            REGISTRY_UPDATE_FAILURES_TOTAL,
        ];
        let unique: std::collections::HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
    }
}
