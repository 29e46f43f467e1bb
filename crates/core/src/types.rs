/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Prefix carried by every generated task identifier.
pub const TASK_ID_PREFIX: &str = "task_";

/// Generate a fresh task identifier (`task_<uuid v4>`).
pub fn new_task_id() -> String {
    format!("{TASK_ID_PREFIX}{}", uuid::Uuid::new_v4())
}

/// Generate a fresh engine client identifier.
///
/// One is minted per pipeline instance and sent both with workflow
/// submissions and in the WebSocket handshake so the engine addresses
/// progress events back to the right listener.
pub fn new_client_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_has_prefix_and_uuid() {
        let id = new_task_id();
        let rest = id.strip_prefix(TASK_ID_PREFIX).unwrap();
        assert!(uuid::Uuid::parse_str(rest).is_ok());
    }

    #[test]
    fn client_ids_are_unique() {
        assert_ne!(new_client_id(), new_client_id());
    }
}
