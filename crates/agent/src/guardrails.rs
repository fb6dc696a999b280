use std::sync::OnceLock;

use regex::Regex;

use convoy_core::domain::trip::TripId;
use convoy_core::domain::user::Role;
use convoy_db::{FleetStore, RepositoryError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailIntent {
    EmptyMessage,
    OversizedMessage { chars: usize },
    /// The message names a trip; `known` says whether the store has it.
    TripReference { trip_id: TripId, known: bool },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny { reason_code: &'static str, user_message: String },
}

impl GuardrailDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Checks run on inbound text before the model is called.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub max_message_chars: usize,
    /// Roles whose mentions of `trip #<n>` are checked against the store first.
    pub verify_trip_references_for: Vec<Role>,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self { max_message_chars: 4_000, verify_trip_references_for: vec![Role::Manager] }
    }
}

impl GuardrailPolicy {
    pub fn evaluate(&self, intent: &GuardrailIntent) -> GuardrailDecision {
        match intent {
            GuardrailIntent::EmptyMessage => GuardrailDecision::Deny {
                reason_code: "empty_message",
                user_message: "I didn't catch that. Please type your request.".to_owned(),
            },
            GuardrailIntent::OversizedMessage { chars } if *chars > self.max_message_chars => {
                GuardrailDecision::Deny {
                    reason_code: "message_too_long",
                    user_message: format!(
                        "That message is too long. Please keep it under {} characters.",
                        self.max_message_chars
                    ),
                }
            }
            GuardrailIntent::OversizedMessage { .. } => GuardrailDecision::Allow,
            GuardrailIntent::TripReference { trip_id, known: false } => GuardrailDecision::Deny {
                reason_code: "unknown_trip",
                user_message: format!("Trip #{trip_id} not found."),
            },
            GuardrailIntent::TripReference { known: true, .. } => GuardrailDecision::Allow,
        }
    }

    /// Screens one inbound message. The first denial wins.
    pub async fn screen(
        &self,
        role: Role,
        text: &str,
        store: &dyn FleetStore,
    ) -> Result<GuardrailDecision, RepositoryError> {
        if text.trim().is_empty() {
            return Ok(self.evaluate(&GuardrailIntent::EmptyMessage));
        }
        let chars = text.chars().count();
        let decision = self.evaluate(&GuardrailIntent::OversizedMessage { chars });
        if !decision.is_allowed() {
            return Ok(decision);
        }

        if self.verify_trip_references_for.contains(&role) {
            if let Some(trip_id) = mentioned_trip_id(text) {
                let known = store.find_trip(trip_id).await?.is_some();
                return Ok(self.evaluate(&GuardrailIntent::TripReference { trip_id, known }));
            }
        }
        Ok(GuardrailDecision::Allow)
    }
}

fn trip_mention() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)trip\s+#?(\d+)").expect("trip mention pattern compiles")
    })
}

/// First `trip <n>` or `trip #<n>` in the text, case-insensitive. At least one space must follow
/// `trip`, and `#` must sit directly against the number.
pub fn mentioned_trip_id(text: &str) -> Option<TripId> {
    let digits = trip_mention().captures(text)?.get(1)?;
    digits.as_str().parse().ok().map(TripId)
}
