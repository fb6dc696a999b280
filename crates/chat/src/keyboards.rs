use serde::Serialize;

use convoy_core::domain::trip::{TripId, TripStatus};
use convoy_core::domain::user::Role;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct KeyboardButton {
    pub text: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub request_location: bool,
}

impl KeyboardButton {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), request_location: false }
    }

    pub fn location(text: impl Into<String>) -> Self {
        Self { text: text.into(), request_location: true }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self { text: text.into(), callback_data: callback_data.into() }
    }
}

/// Telegram `reply_markup` shapes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ReplyMarkup {
    Keyboard {
        keyboard: Vec<Vec<KeyboardButton>>,
        resize_keyboard: bool,
        one_time_keyboard: bool,
    },
    Inline {
        inline_keyboard: Vec<Vec<InlineButton>>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReplyMessage {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_markup: Option<ReplyMarkup>,
}

impl ReplyMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), reply_markup: None }
    }

    pub fn with_markup(mut self, markup: ReplyMarkup) -> Self {
        self.reply_markup = Some(markup);
        self
    }

    pub fn with_optional_markup(mut self, markup: Option<ReplyMarkup>) -> Self {
        self.reply_markup = markup;
        self
    }
}

/// Driver quick replies, in keyboard order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuickReply {
    AtPickup,
    Loading,
    Departed,
    OnSchedule,
    SlightDelay,
    MajorDelay,
    ArrivedAtDestination,
    Unloading,
    CompletedDelivery,
    ReportIssue,
    ShareLocation,
    TripDetails,
}

impl QuickReply {
    pub const ALL: [QuickReply; 12] = [
        Self::AtPickup,
        Self::Loading,
        Self::Departed,
        Self::OnSchedule,
        Self::SlightDelay,
        Self::MajorDelay,
        Self::ArrivedAtDestination,
        Self::Unloading,
        Self::CompletedDelivery,
        Self::ReportIssue,
        Self::ShareLocation,
        Self::TripDetails,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::AtPickup => "At Pickup",
            Self::Loading => "Loading",
            Self::Departed => "Departed",
            Self::OnSchedule => "On Schedule",
            Self::SlightDelay => "Slight Delay",
            Self::MajorDelay => "Major Delay",
            Self::ArrivedAtDestination => "Arrived at Destination",
            Self::Unloading => "Unloading",
            Self::CompletedDelivery => "Completed Delivery",
            Self::ReportIssue => "Report Issue",
            Self::ShareLocation => "Share Location",
            Self::TripDetails => "Trip Details",
        }
    }

    /// Exact label match; anything else is free text for the agent.
    pub fn parse(text: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|reply| reply.label() == text)
    }

    /// Status change and history note the button stands for.
    pub fn transition(self) -> Option<(TripStatus, Option<&'static str>)> {
        match self {
            Self::AtPickup => Some((TripStatus::AtPickup, None)),
            Self::Loading => Some((TripStatus::Loading, None)),
            Self::Departed => Some((TripStatus::InTransit, None)),
            Self::SlightDelay => Some((TripStatus::Delayed, Some("Slight delay reported"))),
            Self::MajorDelay => Some((TripStatus::Delayed, Some("Major delay reported"))),
            Self::ArrivedAtDestination => Some((TripStatus::AtDestination, None)),
            Self::Unloading => Some((TripStatus::Unloading, None)),
            Self::CompletedDelivery => Some((TripStatus::Completed, None)),
            Self::OnSchedule | Self::ReportIssue | Self::ShareLocation | Self::TripDetails => None,
        }
    }

    /// Stakeholder notice for buttons that announce something.
    pub fn announcement(self, trip_id: TripId) -> Option<String> {
        let text = match self {
            Self::AtPickup => format!("Driver has arrived at pickup location for Trip #{trip_id}"),
            Self::Loading => format!("Loading has begun for Trip #{trip_id}"),
            Self::Departed => {
                format!("Driver has departed from pickup location for Trip #{trip_id}")
            }
            Self::OnSchedule => format!("Driver for Trip #{trip_id} reports being on schedule"),
            Self::SlightDelay => format!("Driver for Trip #{trip_id} reports a slight delay"),
            Self::MajorDelay => format!("Driver for Trip #{trip_id} reports a major delay"),
            Self::ArrivedAtDestination => {
                format!("Driver has arrived at destination for Trip #{trip_id}")
            }
            Self::Unloading => format!("Unloading has begun for Trip #{trip_id}"),
            Self::CompletedDelivery => format!("Delivery has been completed for Trip #{trip_id}"),
            Self::ReportIssue | Self::ShareLocation | Self::TripDetails => return None,
        };
        Some(text)
    }
}

pub fn driver_keyboard() -> ReplyMarkup {
    ReplyMarkup::Keyboard {
        keyboard: QuickReply::ALL
            .chunks(3)
            .map(|row| row.iter().map(|reply| KeyboardButton::new(reply.label())).collect())
            .collect(),
        resize_keyboard: true,
        one_time_keyboard: false,
    }
}

/// Keyboard for the role the user now holds; only drivers get quick replies.
pub fn keyboard_for(role: Option<Role>) -> Option<ReplyMarkup> {
    (role == Some(Role::Driver)).then(driver_keyboard)
}

pub fn location_request() -> ReplyMarkup {
    ReplyMarkup::Keyboard {
        keyboard: vec![vec![KeyboardButton::location(QuickReply::ShareLocation.label())]],
        resize_keyboard: true,
        one_time_keyboard: true,
    }
}

pub fn role_picker() -> ReplyMarkup {
    ReplyMarkup::Inline {
        inline_keyboard: Role::ALL
            .into_iter()
            .map(|role| vec![InlineButton::new(role.title(), CallbackAction::SetRole(role).data())])
            .collect(),
    }
}

pub fn trip_confirmation(trip_id: TripId) -> ReplyMarkup {
    ReplyMarkup::Inline {
        inline_keyboard: vec![vec![InlineButton::new(
            "Confirm Trip",
            CallbackAction::ConfirmTrip(trip_id).data(),
        )]],
    }
}

pub fn survey(trip_id: TripId) -> ReplyMarkup {
    let button = |label: &str, rating: SurveyRating| {
        InlineButton::new(label, CallbackAction::Survey { rating, trip_id }.data())
    };
    ReplyMarkup::Inline {
        inline_keyboard: vec![vec![
            button("👍 Good", SurveyRating::Good),
            button("👌 OK", SurveyRating::Ok),
            button("👎 Bad", SurveyRating::Bad),
        ]],
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurveyRating {
    Good,
    Ok,
    Bad,
}

impl SurveyRating {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Ok => "ok",
            Self::Bad => "bad",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "good" => Some(Self::Good),
            "ok" => Some(Self::Ok),
            "bad" => Some(Self::Bad),
            _ => None,
        }
    }
}

/// Inline button payloads: `set_role_<role>`, `confirm_trip_<id>`, `survey_<rating>_<id>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackAction {
    SetRole(Role),
    ConfirmTrip(TripId),
    Survey { rating: SurveyRating, trip_id: TripId },
}

impl CallbackAction {
    pub fn parse(data: &str) -> Option<Self> {
        if let Some(role) = data.strip_prefix("set_role_") {
            return Role::parse(role).map(Self::SetRole);
        }
        if let Some(trip_id) = data.strip_prefix("confirm_trip_") {
            return trip_id.parse().ok().map(|id| Self::ConfirmTrip(TripId(id)));
        }
        let (rating, trip_id) = data.strip_prefix("survey_")?.split_once('_')?;
        Some(Self::Survey {
            rating: SurveyRating::parse(rating)?,
            trip_id: TripId(trip_id.parse().ok()?),
        })
    }

    pub fn data(self) -> String {
        match self {
            Self::SetRole(role) => format!("set_role_{}", role.as_str()),
            Self::ConfirmTrip(trip_id) => format!("confirm_trip_{trip_id}"),
            Self::Survey { rating, trip_id } => format!("survey_{}_{trip_id}", rating.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use convoy_core::domain::trip::{TripId, TripStatus};
    use convoy_core::domain::user::Role;

    use super::{
        driver_keyboard, role_picker, survey, CallbackAction, QuickReply, ReplyMarkup, ReplyMessage,
        SurveyRating,
    };

    #[test]
    fn driver_keyboard_has_four_rows_of_three() {
        let ReplyMarkup::Keyboard { keyboard, resize_keyboard, .. } = driver_keyboard() else {
            panic!("driver keyboard must be a reply keyboard");
        };
        assert!(resize_keyboard);
        assert_eq!(keyboard.len(), 4);
        assert!(keyboard.iter().all(|row| row.len() == 3));
        assert_eq!(keyboard[1][0].text, "On Schedule");
        assert_eq!(keyboard[3][2].text, "Trip Details");
    }

    #[test]
    fn quick_replies_map_to_their_statuses() {
        assert_eq!(
            QuickReply::parse("Departed").and_then(QuickReply::transition),
            Some((TripStatus::InTransit, None))
        );
        assert_eq!(
            QuickReply::MajorDelay.transition(),
            Some((TripStatus::Delayed, Some("Major delay reported")))
        );
        assert_eq!(QuickReply::OnSchedule.transition(), None);
        assert!(QuickReply::OnSchedule.announcement(TripId(4)).is_some());
        assert_eq!(QuickReply::parse("departed"), None, "labels match exactly");
    }

    #[test]
    fn callback_payloads_parse_back() {
        for action in [
            CallbackAction::SetRole(Role::Consignee),
            CallbackAction::ConfirmTrip(TripId(12)),
            CallbackAction::Survey { rating: SurveyRating::Ok, trip_id: TripId(3) },
        ] {
            assert_eq!(CallbackAction::parse(&action.data()), Some(action));
        }
        assert_eq!(CallbackAction::parse("set_role_admin"), None);
        assert_eq!(CallbackAction::parse("survey_great_3"), None);
        assert_eq!(CallbackAction::parse("confirm_trip_x"), None);
    }

    #[test]
    fn inline_keyboards_serialize_in_telegram_shape() {
        let json = serde_json::to_value(ReplyMessage::text("Pick").with_markup(role_picker()))
            .expect("serialize");
        assert_eq!(json["reply_markup"]["inline_keyboard"][0][0]["callback_data"], "set_role_driver");

        let json = serde_json::to_value(survey(TripId(7))).expect("serialize");
        assert_eq!(json["inline_keyboard"][0][2]["callback_data"], "survey_bad_7");
        assert!(json.get("keyboard").is_none());
    }

    #[test]
    fn plain_reply_omits_markup() {
        let json = serde_json::to_value(ReplyMessage::text("hi")).expect("serialize");
        assert!(json.get("reply_markup").is_none());
    }
}
