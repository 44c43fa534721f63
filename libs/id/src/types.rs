//! Generated id types.

use crate::define_id;

define_id!(
    /// Identifies one accepted subscribe stream.
    ConnectionId,
    "conn"
);

define_id!(
    /// Correlates an HTTP request with its log lines and error bodies.
    RequestId,
    "req"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_roundtrip() {
        let id = ConnectionId::new();
        let parsed: ConnectionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!(id.to_string().starts_with("conn_"));
    }

    #[test]
    fn test_request_id_rejects_connection_prefix() {
        let conn = ConnectionId::new().to_string();
        let result: Result<RequestId, _> = conn.parse();
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::InvalidPrefix { expected: "req", .. }
        ));
    }

    #[test]
    fn test_id_missing_separator() {
        let result: Result<ConnectionId, _> = "conn01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert_eq!(result.unwrap_err(), crate::IdError::MissingSeparator('_'));
    }

    #[test]
    fn test_id_invalid_ulid() {
        let result: Result<ConnectionId, _> = "conn_nope".parse();
        assert!(matches!(result.unwrap_err(), crate::IdError::InvalidUlid(_)));
    }

    #[test]
    fn test_id_json_is_string() {
        let id = RequestId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let parsed: RequestId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_connection_ids_sort_by_creation() {
        let first = ConnectionId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = ConnectionId::new();
        assert!(first < second);
    }
}
