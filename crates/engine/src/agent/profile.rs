//! Fixed instruction preambles and default tool sets per agent kind.

use stepwise_types::{AgentKind, StepSpec, ToolSpec};

/// Instruction text prepended to every step of the given kind.
pub fn preamble(kind: AgentKind) -> &'static str {
    match kind {
        AgentKind::React => {
            "You are an autonomous agent. Think step by step, call one tool at a time, and give a final answer once the goal is met."
        }
        AgentKind::Prospector => {
            "You are a prospecting agent. Find companies and decision makers that match the ideal customer profile in your input. \
             Prefer precise searches over broad ones and never invent contacts."
        }
        AgentKind::Enricher => {
            "You are an enrichment agent. Add verified firmographic and contact detail to the leads in your input. \
             Keep every lead you were given, even when enrichment finds nothing."
        }
        AgentKind::Outreach => {
            "You are an outreach agent. Write short, personal emails grounded in each lead's details and send them. \
             Report every recipient you contacted."
        }
        AgentKind::Tracker => {
            "You are a campaign tracking agent. Collect engagement metrics for the campaign in your input and record them."
        }
    }
}

/// Tools used when a step of this kind lists none explicitly.
pub fn default_tools(kind: AgentKind) -> Vec<ToolSpec> {
    match kind {
        AgentKind::React => Vec::new(),
        AgentKind::Prospector => vec![
            ToolSpec::named("search_apollo").with_config("api_key", "{{APOLLO_API_KEY}}"),
            ToolSpec::named("search_clay")
                .with_config("api_key", "{{CLAY_API_KEY}}")
                .with_config("table_webhook", "{{CLAY_TABLE_WEBHOOK}}"),
        ],
        AgentKind::Enricher => vec![ToolSpec::named("enrich_with_pdl").with_config("api_key", "{{PDL_API_KEY}}")],
        AgentKind::Outreach => vec![
            ToolSpec::named("send_email_sendgrid")
                .with_config("api_key", "{{SENDGRID_API_KEY}}")
                .with_config("from_email", "{{SENDGRID_FROM_EMAIL}}"),
        ],
        AgentKind::Tracker => vec![
            ToolSpec::named("track_apollo_campaign").with_config("api_key", "{{APOLLO_API_KEY}}"),
            ToolSpec::named("write_to_google_sheet")
                .with_config("sheet_id", "{{GOOGLE_SHEET_ID}}")
                .with_config("access_token", "{{GOOGLE_SHEETS_TOKEN}}"),
        ],
    }
}

/// The step's own tools, or the kind's defaults when it lists none.
pub fn effective_tools(step: &StepSpec) -> Vec<ToolSpec> {
    if step.tools.is_empty() {
        default_tools(step.agent)
    } else {
        step.tools.clone()
    }
}

/// Preamble followed by the step's own instructions.
pub fn compose_instructions(kind: AgentKind, instructions: &str) -> String {
    let instructions = instructions.trim();
    if instructions.is_empty() {
        preamble(kind).to_string()
    } else {
        format!("{}\n\n{}", preamble(kind), instructions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_a_preamble_and_only_react_lacks_tools() {
        for kind in AgentKind::ALL {
            assert!(!preamble(kind).is_empty());
            assert_eq!(default_tools(kind).is_empty(), kind == AgentKind::React, "{kind}");
        }
    }

    #[test]
    fn explicit_tools_replace_defaults() {
        let mut step = StepSpec {
            id: "enrich".into(),
            agent: AgentKind::Enricher,
            instructions: String::new(),
            inputs: Default::default(),
            tools: Vec::new(),
            output_schema: Default::default(),
            max_iterations: None,
        };
        assert_eq!(effective_tools(&step)[0].name, "enrich_with_pdl");

        step.tools = vec![ToolSpec::named("lookup")];
        assert_eq!(effective_tools(&step), vec![ToolSpec::named("lookup")]);
    }

    #[test]
    fn compose_keeps_preamble_first() {
        let composed = compose_instructions(AgentKind::Tracker, "  Track campaign 42. ");
        assert!(composed.starts_with(preamble(AgentKind::Tracker)));
        assert!(composed.ends_with("Track campaign 42."));
        assert_eq!(compose_instructions(AgentKind::React, ""), preamble(AgentKind::React));
    }
}
