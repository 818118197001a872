//! Prompt templates
//!
//! Every template the assistant sends to a language model is built in. A
//! deployment may override any of them from a TOML file; overrides must keep
//! the placeholders the pipeline fills in.
//!
//! # Example Override File
//!
//! ```toml
//! [general]
//! content = """
//! You are the SyaKi campus assistant...
//!
//! Retrieved Context:
//! {retrieved_content}
//!
//! User/Student Database:
//! {user_database}
//!
//! User Input:
//! {user_input}
//! """
//! ```

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use tokio::fs;

/// A single template body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub content: String,
}

/// Optional per-template overrides as read from disk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptOverrides {
    #[serde(default)]
    pub intent: Option<PromptTemplate>,
    #[serde(default)]
    pub general: Option<PromptTemplate>,
    #[serde(default)]
    pub planning: Option<PromptTemplate>,
    #[serde(default)]
    pub bot: Option<PromptTemplate>,
    #[serde(default)]
    pub reminder: Option<PromptTemplate>,
}

/// The resolved set of templates used at runtime
#[derive(Debug, Clone)]
pub struct PromptSet {
    pub intent: String,
    pub general: String,
    pub planning: String,
    pub bot: String,
    pub reminder: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            intent: builtin::INTENT.to_string(),
            general: builtin::GENERAL.to_string(),
            planning: builtin::PLANNING.to_string(),
            bot: builtin::BOT.to_string(),
            reminder: builtin::REMINDER.to_string(),
        }
    }
}

impl PromptSet {
    /// Built-in templates with the overrides from `path` applied on top.
    pub async fn load(path: &Path) -> Result<Self, PromptError> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| PromptError::IoError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, PromptError> {
        let overrides: PromptOverrides =
            toml::from_str(content).map_err(|e| PromptError::ParseError(e.to_string()))?;
        let set = Self::default().with_overrides(overrides);
        set.validate()?;
        Ok(set)
    }

    pub fn with_overrides(mut self, overrides: PromptOverrides) -> Self {
        if let Some(t) = overrides.intent {
            self.intent = t.content;
        }
        if let Some(t) = overrides.general {
            self.general = t.content;
        }
        if let Some(t) = overrides.planning {
            self.planning = t.content;
        }
        if let Some(t) = overrides.bot {
            self.bot = t.content;
        }
        if let Some(t) = overrides.reminder {
            self.reminder = t.content;
        }
        self
    }

    /// Check that every template still carries the placeholders it is filled with.
    pub fn validate(&self) -> Result<(), PromptError> {
        let checks: [(&str, &str, &[&str]); 5] = [
            ("intent", &self.intent, &["user_input"]),
            (
                "general",
                &self.general,
                &["retrieved_content", "user_database", "user_input"],
            ),
            (
                "planning",
                &self.planning,
                &["curriculum", "user_database", "user_input"],
            ),
            (
                "bot",
                &self.bot,
                &["retrieved_content", "user_database", "user_input"],
            ),
            ("reminder", &self.reminder, &["class_details"]),
        ];

        for (name, template, required) in checks {
            for placeholder in required {
                if !template.contains(&format!("{{{}}}", placeholder)) {
                    return Err(PromptError::MissingPlaceholder {
                        template: name.to_string(),
                        placeholder: placeholder.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Substitute `{name}` placeholders in a single pass.
///
/// Values are never re-scanned, so user text containing `{user_database}` is
/// inserted literally. Unknown placeholders are left untouched.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let re = PLACEHOLDER.get_or_init(|| Regex::new(r"\{([a-z_]+)\}").expect("valid placeholder regex"));

    re.replace_all(template, |caps: &Captures| {
        let key = &caps[1];
        values
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value.to_string())
            .unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}

/// Errors from prompt loading
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Template '{template}' is missing placeholder {{{placeholder}}}")]
    MissingPlaceholder {
        template: String,
        placeholder: String,
    },
}

/// Built-in prompts that don't require files
pub mod builtin {
    /// Sentinel embedded when retrieval produced nothing usable
    pub const NO_CONTEXT: &str = "No relevant information found.";

    /// Sentinel embedded when the curriculum reference could not be read
    pub const NO_CURRICULUM: &str = "Curriculum reference is currently unavailable.";

    /// Sentinel embedded when no student record could be read
    pub const NO_USER_DATA: &str = "No student information is available.";

    /// Markup rules shared by every template that reaches WhatsApp-style clients
    pub const MARKUP_RULES: &str = r#"The answer will be delivered to a student over WhatsApp, so only use this formatting:
- Use *bold* for important points.
- Use _italics_ for emphasis.
- Use ```monospace``` for code or technical terms.
- Use `inline code` for short snippets.
- Use > blockquotes for quoting text.
- Use - bullet points for lists.
- Use 1. numbered lists for ordered items."#;

    pub const INTENT: &str = r#"You are an intent detection system. Analyse the "User Input" and identify its main intent from the categories below. Respond concisely with only the best matching intent label.

== Intent Categories ==
- Course Information: the user asks about a specific course, course details, or a list of courses.
- Next Semester Planning: the user wants help planning or choosing courses for an upcoming semester, including advice or requirements.
- Administrative Information: the user asks about administrative procedures (re-registration, payment, forms).
- General Campus Information: the user asks general questions about the university or campus activities.
- Other: the intent does not match any category above.

== Response Rules ==
- Respond with a single line containing only the detected label, prefixed with "INTENT: ".
- Do not include any other text, explanation, or greeting.
- Pick exactly one intent.

== Examples ==
User Input: I want to know the schedule for the Database Systems course.
INTENT: Course Information

User Input: How do I re-register for next semester?
INTENT: Administrative Information

User Input: Can you help me choose credits (satuan kredit semester) for semester 5?
INTENT: Next Semester Planning

User Input: Are there any campus events this week?
INTENT: General Campus Information

User Input: Thank you
INTENT: Other

== User Input ==
{user_input}

== Response ==
"#;

    pub const GENERAL: &str = r#"You are a knowledgeable and friendly virtual assistant for University of SyaKi. Help students with clear, natural, semi-formal answers about the university, academic programs, administrative procedures and campus events.

Answer only from the Retrieved Context and the User/Student Database below. Do not make up an answer. If neither contains what is needed, say that you do not have information about it.

If the user asks about his/her own data, you can use the User/Student Database to answer it; it is the user's own record.

{markup_rules}

Retrieved Context:
{retrieved_content}

User/Student Database:
{user_database}

User Input:
{user_input}

Answer:
"#;

    pub const PLANNING: &str = r#"You are an academic advisor assistant for University of SyaKi. Recommend which courses the student should take next semester.

Rules:
- Only recommend courses listed in the Curriculum Reference.
- Respect prerequisites: a course may only be recommended when its prerequisites appear in the student's history.
- Do not recommend courses the student has already taken.
- Keep the total credit load (satuan kredit semester) within the limit stated in the Curriculum Reference.
- Briefly explain why each course is recommended.

{markup_rules}

Curriculum Reference:
{curriculum}

Student Academic History:
{user_database}

User Input:
{user_input}

Recommendation:
"#;

    pub const BOT: &str = r#"{markup_rules}

If the user asks about his/her own data, you can use the user database to answer it; it is the user's own record. Answer only from the context below and never make up information.

Retrieved Context:
{retrieved_content}

User/Student Database:
{user_database}

User Input:
{user_input}

You have {max_tokens} tokens to answer this question, so be concise and clear.
Answer:
"#;

    pub const REMINDER: &str = r#"You are a friendly virtual assistant for University of SyaKi. Write a short reminder for a student whose class starts in 15 minutes. Use polite, natural, semi-formal language and focus only on the reminder; do not comment on what the class is about.

{markup_rules}

Class:
{class_details}

Reminder:
"#;
}
