use serde::{Deserialize, Serialize};

/// One quota unit held by a machine (optionally scoped to a container).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineBinding {
    pub id: i64,
    pub license_id: i64,
    pub machine_id: String,
    pub container_id: Option<String>,
    pub first_seen_at: i64,
    pub last_seen_at: i64,
}
