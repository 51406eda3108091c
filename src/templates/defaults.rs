use narrate_common::NarrativePhase;

pub const CLARIFICATION_SUBSYSTEM: &str = "clarification";

/// Registry name of the clarification template for `phase`.
pub fn clarification_template_name(phase: NarrativePhase) -> String {
    format!("clarification.{}", phase.as_str())
}

const CLARIFICATION_PREAMBLE: &str = r#"You are assisting a workplace safety officer who is documenting an incident.

Incident details:
- Participant: {{participant_name}}
- Reported by: {{reporter_name}}
- Location: {{location}}
- Occurred at: {{event_at}}

The reporter wrote the following for the "{{phase_label}}" part of the narrative:
"""
{{narrative_text}}
"""
"#;

const CLARIFICATION_CONTRACT: &str = r#"
Ask at most {{max_questions}} short, specific, non-leading questions that would fill gaps in this part of the account. Do not repeat facts already stated.

Respond with JSON only, in exactly this shape:
{"questions": ["First question?", "Second question?"]}
"#;

fn phase_focus(phase: NarrativePhase) -> &'static str {
    match phase {
        NarrativePhase::BeforeEvent => {
            "Focus on conditions leading up to the incident: the task being performed, equipment, environment, staffing and anything unusual."
        }
        NarrativePhase::DuringEvent => {
            "Focus on the sequence of events as the incident happened: who did what, in what order, and what the participant experienced."
        }
        NarrativePhase::EndEvent => {
            "Focus on how the incident ended: immediate actions taken, injuries or damage, and who responded."
        }
        NarrativePhase::PostEvent => {
            "Focus on what happened afterwards: treatment, notifications, follow-up, and any changes made since."
        }
    }
}

/// Built-in body for the per-phase clarification template.
pub fn clarification_template_body(phase: NarrativePhase) -> String {
    format!(
        "{}\n{}\n{}",
        CLARIFICATION_PREAMBLE,
        phase_focus(phase),
        CLARIFICATION_CONTRACT
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_names_follow_phase_codes() {
        assert_eq!(
            clarification_template_name(NarrativePhase::EndEvent),
            "clarification.end_event"
        );
    }

    #[test]
    fn test_default_bodies_reference_narrative_text() {
        for phase in NarrativePhase::ALL {
            let body = clarification_template_body(phase);
            assert!(body.contains("{{narrative_text}}"));
            assert!(body.contains("{{max_questions}}"));
            assert!(body.contains(phase_focus(phase)));
        }
    }
}
