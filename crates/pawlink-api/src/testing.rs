//! Fakes and fixtures shared by the unit tests.

use std::sync::Mutex;

use uuid::Uuid;

use pawlink_db::Database;
use pawlink_gateway::rooms::Fanout;
use pawlink_types::events::GatewayEvent;
use pawlink_types::models::AdoptionStatus;

/// Records every published event instead of delivering it.
#[derive(Default)]
pub struct RecordingFanout {
    pub published: Mutex<Vec<(Uuid, GatewayEvent)>>,
}

impl RecordingFanout {
    pub fn events(&self) -> Vec<(Uuid, GatewayEvent)> {
        self.published.lock().unwrap().clone()
    }
}

impl Fanout for RecordingFanout {
    fn publish(&self, conversation_id: Uuid, event: GatewayEvent) -> usize {
        self.published.lock().unwrap().push((conversation_id, event));
        1
    }
}

pub const REQUESTER: &str = "ann@example.com";
pub const OWNER: &str = "olga@example.com";

/// Insert pet "Bella" owned by Olga and an adoption request from Ann.
pub fn seed_adoption(db: &Database, status: AdoptionStatus) -> Uuid {
    let pet_id = Uuid::new_v4().to_string();
    let adoption_id = Uuid::new_v4();
    db.insert_pet(&pet_id, "Bella", Some(OWNER), Some("Olga")).unwrap();
    db.insert_adoption_request(&adoption_id.to_string(), &pet_id, REQUESTER, "Ann", status)
        .unwrap();
    adoption_id
}
