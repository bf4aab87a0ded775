use uuid::Uuid;

/// Opaque identifier for a new record of any kind.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
