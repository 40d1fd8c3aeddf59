//! Agent persona, the typed-chat client, and the one-shot requests built on
//! it (mail classification, resume scoring).

pub mod inbox;
pub mod resume;
pub mod text;

use crate::config::{Conciseness, Settings};
use crate::tools::{
    DELETE_JOB_APPLICATION, LIST_JOB_APPLICATIONS, SAVE_JOB_APPLICATION, SYNC_GMAIL_EMAILS,
    UPDATE_JOB_STATUS,
};

pub use resume::{ResumeAnalysis, ResumeSuggestions};
pub use text::TextChat;

/// Build the system instruction for a settings snapshot.
pub fn system_instruction(settings: &Settings) -> String {
    let name = or_default(&settings.user_name, "User");
    let role = or_default(&settings.target_role, "Professional");

    let style = match settings.conciseness {
        Conciseness::Concise => "Keep every answer as short as possible.",
        Conciseness::Normal => "Answer in a few sentences.",
        Conciseness::Detailed => "Add practical career advice alongside each tool action.",
    };

    format!(
        "You are Astra, a personal career assistant.\n\
         \n\
         About the user:\n\
         - Name: {name}\n\
         - Target role: {role}\n\
         - Timezone: {tz}\n\
         \n\
         How to use your tools:\n\
         1. Keep the user's job application tracker up to date with the tools provided.\n\
         2. Call '{list}' whenever the user asks about their applications, counts, or search progress.\n\
         3. Call '{save}' when the user mentions a new application, or an email shows one.\n\
         4. Call '{update}' when the user reports news, or an email shows an interview or rejection.\n\
         5. Call '{delete}' only when the user explicitly asks to remove an entry.\n\
         6. Call '{sync}' when the user asks to sync, check email, or refresh from Gmail.\n\
         \n\
         Tone: professional, encouraging, efficient.\n\
         Conciseness: {level}. {style}",
        tz = or_default(&settings.timezone, "UTC"),
        list = LIST_JOB_APPLICATIONS,
        save = SAVE_JOB_APPLICATION,
        update = UPDATE_JOB_STATUS,
        delete = DELETE_JOB_APPLICATION,
        sync = SYNC_GMAIL_EMAILS,
        level = settings.conciseness,
    )
}

fn or_default<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_blank_fields() {
        let text = system_instruction(&Settings::default());
        assert!(text.starts_with("You are Astra"));
        assert!(text.contains("- Name: User"));
        assert!(text.contains("- Target role: Professional"));
        assert!(text.contains("Conciseness: Normal."));
    }

    #[test]
    fn test_uses_settings_snapshot() {
        let settings = Settings {
            user_name: "Ana".into(),
            target_role: "Staff Engineer".into(),
            conciseness: Conciseness::Detailed,
            ..Default::default()
        };
        let text = system_instruction(&settings);
        assert!(text.contains("- Name: Ana"));
        assert!(text.contains("- Target role: Staff Engineer"));
        assert!(text.contains("Conciseness: Detailed."));
        assert!(text.contains("career advice"));
        for tool in [LIST_JOB_APPLICATIONS, SAVE_JOB_APPLICATION, SYNC_GMAIL_EMAILS] {
            assert!(text.contains(tool), "{tool} missing");
        }
    }
}
