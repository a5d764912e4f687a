use anyhow::anyhow;
use std::sync::Arc;
use tracing::debug;

use super::model::RawQueuedPoll;
use crate::error::{incident_missing, incident_unavailable, option_count, PollcastResult};
use crate::game::{fire_params, GameSession, IncidentRegistry};
use crate::poll::{Poll, PollOption, OPTIONS_PER_POLL};

/// Check every option against the live game and build the poll
///
/// Touches game content, so callers run it on the main thread. The first
/// failing option decides the error, whose message is what the backend shows.
pub fn validate(
    raw: &RawQueuedPoll,
    registry: &IncidentRegistry,
    session: &Arc<dyn GameSession>,
) -> PollcastResult<Poll> {
    if raw.options.len() != OPTIONS_PER_POLL {
        return Err(option_count(raw.options.len()));
    }

    let mut options = Vec::with_capacity(raw.options.len());
    for raw_option in &raw.options {
        let label = raw_option.label.clone();

        let incident = registry
            .resolve(&raw_option.mod_id, &raw_option.def_name)
            .ok_or_else(|| incident_missing(&label))?;

        let params = fire_params(incident.as_ref(), session.as_ref())
            .ok_or_else(|| incident_unavailable(&label))?;
        if !incident.can_fire_now(&params) {
            return Err(incident_unavailable(&label));
        }

        let session = Arc::clone(session);
        let action_label = label.clone();
        let tooltip = incident.label().to_string();
        let option = PollOption::new(label.clone(), move || {
            // The target may have changed since validation
            let params = fire_params(incident.as_ref(), session.as_ref())
                .ok_or_else(|| anyhow!("no target for \"{}\"", action_label))?;
            incident.fire(&params)
        });
        options.push(option.with_tooltip(tooltip));
    }

    debug!(queued_id = raw.id, title = %raw.title, "Queued poll validated");
    Ok(Poll::queued(raw.id, &raw.title, raw.length, options))
}
