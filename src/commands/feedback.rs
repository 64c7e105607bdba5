use anyhow::Result;

use crate::{
    config::ConfigOverrides,
    feedback::{SurveyFeedback, submit_survey},
    runtime::Runtime,
};

use super::connect;

#[tracing::instrument(skip(runtime, overrides, comment))]
pub async fn feedback<R: Runtime + 'static>(
    runtime: R,
    overrides: &ConfigOverrides,
    game_id: &str,
    group_id: Option<&str>,
    rating: u8,
    comment: Option<&str>,
) -> Result<()> {
    let mut survey = SurveyFeedback::new(game_id, rating).comment(comment.unwrap_or_default());
    if let Some(group_id) = group_id {
        survey = survey.group(group_id);
    }
    // Reject bad answers before any configuration or network work
    survey.validate()?;

    let client = connect(runtime, overrides)?;
    submit_survey(&client, &survey).await?;
    println!("Thanks for the feedback!");
    Ok(())
}
