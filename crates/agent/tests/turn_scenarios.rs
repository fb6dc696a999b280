use std::sync::Arc;

use convoy_agent::{Agent, AgentSettings, ScriptedLlmClient, TripLifecycle, TurnStatus};
use convoy_core::audit::InMemoryAuditSink;
use convoy_core::domain::issue::IssueStatus;
use convoy_core::domain::notification::Notification;
use convoy_core::domain::trip::{TripId, TripStatus};
use convoy_core::domain::user::{Role, UserId};
use convoy_db::{DemoFleetDataset, FleetStore, InMemoryFleetStore};

const MANAGER: UserId = UserId(1);
const FIRST_DRIVER: UserId = UserId(2);
const SHIPPER: UserId = UserId(4);
const EN_ROUTE_TRIP: TripId = TripId(2);

struct Fleet {
    store: Arc<InMemoryFleetStore>,
    audit: Arc<InMemoryAuditSink>,
}

impl Fleet {
    async fn seeded() -> Self {
        let store = Arc::new(InMemoryFleetStore::new());
        DemoFleetDataset::load(store.as_ref()).await.expect("demo fleet loads");
        Self { store, audit: Arc::new(InMemoryAuditSink::default()) }
    }

    fn agent(&self, role: Role, principal: UserId, llm: &Arc<ScriptedLlmClient>) -> Agent {
        let lifecycle = TripLifecycle::new(self.store.clone(), self.audit.clone());
        Agent::new(
            role,
            principal,
            self.store.clone(),
            lifecycle,
            llm.clone(),
            AgentSettings::default(),
        )
    }

    async fn trip_status(&self, id: TripId) -> TripStatus {
        self.store.find_trip(id).await.expect("read").expect("trip exists").status
    }

    async fn history_len(&self, id: TripId) -> usize {
        self.store.list_status_updates(id).await.expect("history").len()
    }

    /// Every demo user's notifications, oldest user first.
    async fn all_notifications(&self) -> Vec<Notification> {
        let mut all = Vec::new();
        for id in 1..=DemoFleetDataset::EXPECTED_USERS as i64 {
            all.extend(self.store.list_notifications(UserId(id), false).await.expect("inbox"));
        }
        all
    }
}

fn scripted<const N: usize>(replies: [&str; N]) -> Arc<ScriptedLlmClient> {
    Arc::new(ScriptedLlmClient::new(replies))
}

#[tokio::test]
async fn driver_status_update_commits_and_notifies_stakeholders() {
    let fleet = Fleet::seeded().await;
    let llm = scripted(["Tool: update_trip_status\nParameters: status=at_destination, notes=gate 3"]);
    let mut driver = fleet.agent(Role::Driver, FIRST_DRIVER, &llm);

    let reply = driver.handle_message("I'm at the warehouse").await;

    assert_eq!(reply.status, TurnStatus::ToolCompleted);
    assert_eq!(reply.tool.as_deref(), Some("update_trip_status"));
    assert_eq!(reply.text, "Trip status updated to: at_destination");
    assert_eq!(fleet.trip_status(EN_ROUTE_TRIP).await, TripStatus::AtDestination);

    let history = fleet.store.list_status_updates(EN_ROUTE_TRIP).await.expect("history");
    assert_eq!(history[0].status, TripStatus::AtDestination);
    assert_eq!(history[0].notes.as_deref(), Some("gate 3"));

    let shipper_inbox = fleet.store.list_notifications(SHIPPER, true).await.expect("inbox");
    assert!(shipper_inbox
        .iter()
        .any(|n| n.message.starts_with("Trip #2 status updated to at_destination")));

    let last = driver.session().last().expect("tool result recorded");
    assert!(last.content.starts_with("Tool result: Trip status updated"));
}

#[tokio::test]
async fn unknown_status_value_is_rejected_without_writing() {
    let fleet = Fleet::seeded().await;
    let llm = scripted(["Tool: update_trip_status\nParameters: status=teleporting"]);
    let mut driver = fleet.agent(Role::Driver, FIRST_DRIVER, &llm);
    let history_before = fleet.history_len(EN_ROUTE_TRIP).await;
    let notifications_before = fleet.all_notifications().await;

    let reply = driver.handle_message("beam me up").await;

    assert_eq!(reply.status, TurnStatus::InvalidParameter);
    assert!(reply.text.starts_with("I couldn't run update_trip_status:"));
    assert!(reply.text.contains("teleporting"));
    assert_eq!(fleet.trip_status(EN_ROUTE_TRIP).await, TripStatus::InTransit);
    assert_eq!(fleet.history_len(EN_ROUTE_TRIP).await, history_before);
    assert_eq!(fleet.all_notifications().await, notifications_before);
    assert!(fleet.audit.events().is_empty());
}

#[tokio::test]
async fn reported_issue_stays_open_until_manager_resolves_it() {
    let fleet = Fleet::seeded().await;
    let driver_llm = scripted(["Tool: report_issue\nParameters: description=flat tire on I-5"]);
    let mut driver = fleet.agent(Role::Driver, FIRST_DRIVER, &driver_llm);

    let reported = driver.handle_message("tire blew").await;
    assert_eq!(reported.text, "Issue reported: flat tire on I-5");
    assert_eq!(fleet.trip_status(EN_ROUTE_TRIP).await, TripStatus::IssueReported);

    let issues = fleet.store.list_issues(EN_ROUTE_TRIP).await.expect("issues");
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].status, IssueStatus::Open);
    let issue_id = issues[0].id;

    let manager_llm = scripted([
        "Tool: resolve_issue\nParameters: issue_id=1",
    ]);
    let mut manager = fleet.agent(Role::Manager, MANAGER, &manager_llm);
    let resolved = manager.handle_message("the tire is fixed").await;

    assert_eq!(resolved.text, format!("Issue #{issue_id} has been marked as resolved."));
    let issue = fleet.store.find_issue(issue_id).await.expect("read").expect("issue");
    assert_eq!(issue.status, IssueStatus::Resolved);
    assert!(issue.resolved_at.is_some());
    assert_eq!(fleet.trip_status(EN_ROUTE_TRIP).await, TripStatus::IssueReported);

    let driver_inbox = fleet.store.list_notifications(FIRST_DRIVER, true).await.expect("inbox");
    assert!(driver_inbox
        .iter()
        .any(|n| n.message == "Your reported issue has been resolved: flat tire on I-5"));
}

#[tokio::test]
async fn completed_trip_leaves_driver_without_active_work() {
    let fleet = Fleet::seeded().await;
    let llm = scripted([
        "Tool: update_trip_status\nParameters: status=completed",
        "Tool: update_trip_status\nParameters: status=in_transit",
    ]);
    let mut driver = fleet.agent(Role::Driver, FIRST_DRIVER, &llm);

    let done = driver.handle_message("delivered").await;
    assert_eq!(done.text, "Trip status updated to: completed");
    let history_after_completion = fleet.history_len(EN_ROUTE_TRIP).await;
    let notifications_after_completion = fleet.all_notifications().await;

    let again = driver.handle_message("heading out again").await;
    assert_eq!(again.status, TurnStatus::ToolCompleted);
    assert_eq!(again.text, "You don't have any active trips to update.");
    assert_eq!(fleet.trip_status(EN_ROUTE_TRIP).await, TripStatus::Completed);
    assert_eq!(fleet.history_len(EN_ROUTE_TRIP).await, history_after_completion);
    assert_eq!(fleet.all_notifications().await, notifications_after_completion);
}

#[tokio::test]
async fn unresolvable_tool_returns_model_text_and_leaves_store_alone() {
    let fleet = Fleet::seeded().await;
    let raw = "Tool: create_new_trip\nParameters: pickup_address=A, delivery_address=B";
    let llm = scripted([raw]);
    let mut driver = fleet.agent(Role::Driver, FIRST_DRIVER, &llm);

    let reply = driver.handle_message("make me a trip").await;

    assert_eq!(reply.status, TurnStatus::UnresolvableTool);
    assert_eq!(reply.text, raw);
    let trips = fleet
        .store
        .list_trips(convoy_core::domain::trip::TripQuery::all())
        .await
        .expect("trips");
    assert_eq!(trips.len(), DemoFleetDataset::EXPECTED_TRIPS);
    assert_eq!(driver.session().len(), 2, "no tool entry for an unknown tool");
}

#[tokio::test]
async fn persistence_failure_is_reported_and_session_continues() {
    let fleet = Fleet::seeded().await;
    let llm = scripted([
        "Tool: update_location\nParameters: latitude=47.1, longitude=-122.2",
        "Noted, anything else?",
    ]);
    let mut driver = fleet.agent(Role::Driver, FIRST_DRIVER, &llm);

    fleet.store.reject_writes(true);
    let failed = driver.handle_message("I'm near Tacoma").await;
    assert_eq!(failed.status, TurnStatus::PersistenceFailure);
    assert_eq!(failed.text, "Sorry, I couldn't save that change. Please try again.");

    fleet.store.reject_writes(false);
    let next = driver.handle_message("ok").await;
    assert_eq!(next.status, TurnStatus::Replied);
    assert_eq!(next.text, "Noted, anything else?");
}

#[tokio::test]
async fn model_outage_does_not_touch_the_store() {
    let fleet = Fleet::seeded().await;
    let llm = Arc::new(ScriptedLlmClient::default());
    llm.push_failure("connection reset");
    let mut shipper = fleet.agent(Role::Shipper, SHIPPER, &llm);

    let reply = shipper.handle_message("status of shipment 2?").await;

    assert_eq!(reply.status, TurnStatus::ModelUnavailable);
    assert_eq!(fleet.trip_status(EN_ROUTE_TRIP).await, TripStatus::InTransit);
}

#[tokio::test]
async fn manager_reference_to_missing_trip_is_answered_without_model() {
    let fleet = Fleet::seeded().await;
    let llm = Arc::new(ScriptedLlmClient::default());
    let mut manager = fleet.agent(Role::Manager, MANAGER, &llm);

    let reply = manager.handle_message("what's going on with trip #99?").await;

    assert_eq!(reply.status, TurnStatus::Guarded);
    assert_eq!(reply.text, "Trip #99 not found.");
    assert!(llm.prompts().is_empty());
}

#[tokio::test]
async fn shipper_sees_live_location_of_own_shipment() {
    let fleet = Fleet::seeded().await;
    let llm = scripted(["Tool: get_driver_location\nParameters: trip_id=2"]);
    let mut shipper = fleet.agent(Role::Shipper, SHIPPER, &llm);

    let reply = shipper.handle_message("where is the truck?").await;

    assert_eq!(reply.status, TurnStatus::ToolCompleted);
    assert!(reply.text.contains("47.2529"), "unexpected reply: {}", reply.text);
}
