use narrate_common::NarrativePhase;

/// Questions used when the AI service cannot be reached. Never empty.
pub fn fallback_questions(phase: NarrativePhase) -> &'static [&'static str] {
    match phase {
        NarrativePhase::BeforeEvent => &[
            "What task was being carried out just before the incident?",
            "What were the conditions at the location, such as lighting, weather or floor surface?",
            "Was any equipment or protective gear in use, and was it in good working order?",
        ],
        NarrativePhase::DuringEvent => &[
            "What happened first, and what happened next, in the order you remember it?",
            "Who else was present or involved while it was happening?",
            "What did the participant say or do during the incident?",
        ],
        NarrativePhase::EndEvent => &[
            "How did the incident come to an end?",
            "Was anyone injured or was anything damaged, and how?",
            "What immediate actions were taken to make the area safe?",
        ],
        NarrativePhase::PostEvent => &[
            "What first aid or medical treatment was provided afterwards?",
            "Who was notified about the incident, and when?",
            "What follow-up actions have been taken or planned since?",
        ],
    }
}
