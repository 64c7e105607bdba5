//! Post-game survey submission.

use log::{debug, info};
use serde::Serialize;

use crate::http::{ApiClient, ApiError, ErrorKind, FriendlyError, OutboundRequest};

pub const SURVEY_PATH: &str = "/feedback/survey";

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;

/// A player's rating of a finished game night.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SurveyFeedback {
    pub game_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub rating: u8,
    pub comment: String,
}

impl SurveyFeedback {
    pub fn new(game_id: impl Into<String>, rating: u8) -> Self {
        Self {
            game_id: game_id.into(),
            group_id: None,
            rating,
            comment: String::new(),
        }
    }

    pub fn group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Checks the answers locally so obviously bad input never reaches the server.
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.game_id.trim().is_empty() {
            return Err(invalid(
                "MISSING_GAME",
                "This survey isn't linked to a game.",
            ));
        }
        if !(MIN_RATING..=MAX_RATING).contains(&self.rating) {
            return Err(invalid(
                "INVALID_RATING",
                format!("Pick a rating between {} and {} stars.", MIN_RATING, MAX_RATING),
            ));
        }
        Ok(())
    }
}

fn invalid(code: &str, detail: impl Into<String>) -> ApiError {
    ApiError::InvalidInput(
        FriendlyError::new(ErrorKind::ValidationError, "Check your answers", detail)
            .with_code(code),
    )
}

/// Validate and send a survey. The response body is not used.
#[tracing::instrument(skip(client, feedback), fields(game_id = %feedback.game_id))]
pub async fn submit_survey(client: &ApiClient, feedback: &SurveyFeedback) -> Result<(), ApiError> {
    feedback.validate()?;

    let req = OutboundRequest::post(SURVEY_PATH).json(feedback)?;
    let response = client.send(&req).await?;
    debug!("Survey response: {}", response);
    info!("Submitted survey for game {}", feedback.game_id);
    Ok(())
}
