//! Merges the outcomes of a dispatch round into one reply.
//!
//! Agent text is copied byte for byte; only headers, separators and the
//! trailing caveat line are added.

use super::{AgentOutcome, DispatchResult};

/// Returned when not a single agent produced an answer
pub const ALL_AGENTS_FAILED: &str = "No agent was able to produce an answer for this request.";

const SECTION_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedReply {
    pub text: String,
    /// True when `text` is the total-failure fallback
    pub total_failure: bool,
}

/// Build the caveat naming every agent without a usable answer
fn caveat_line(missing: &[&AgentOutcome]) -> String {
    let names: Vec<String> = missing
        .iter()
        .map(|o| match o {
            AgentOutcome::Timeout { agent_name } => format!("{} (timed out)", agent_name),
            AgentOutcome::Failure { agent_name, kind } => format!("{} (failed: {})", agent_name, kind),
            AgentOutcome::Success { agent_name, .. } => agent_name.clone(),
        })
        .collect();
    format!("Note: this answer is incomplete. No response from: {}", names.join(", "))
}

/// Combine every `Success` in registration order, each under a header naming
/// its agent. Non-success outcomes are listed on one trailing caveat line.
pub fn aggregate(result: &DispatchResult) -> AggregatedReply {
    let (answered, missing): (Vec<&AgentOutcome>, Vec<&AgentOutcome>) =
        result.outcomes.iter().partition(|o| o.is_success());

    if answered.is_empty() {
        return AggregatedReply {
            text: ALL_AGENTS_FAILED.to_string(),
            total_failure: true,
        };
    }

    let mut sections: Vec<String> = answered
        .iter()
        .filter_map(|o| match o {
            AgentOutcome::Success { agent_name, text } => Some(format!("{}:\n{}", agent_name, text)),
            _ => None,
        })
        .collect();

    if !missing.is_empty() {
        sections.push(caveat_line(&missing));
    }

    AggregatedReply {
        text: sections.join(SECTION_SEPARATOR),
        total_failure: false,
    }
}
