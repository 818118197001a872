//! Intent classification
//!
//! One short, low-temperature completion decides which pipeline path a
//! message takes. The model is asked for a single `INTENT: <label>` line;
//! anything else is treated as [`Intent::Other`].

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::prompts::render;
use crate::conversation::Message;
use crate::providers::{CompletionOptions, LanguageModel, ProviderError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    CourseInfoLookup,
    NextSemesterPlanning,
    AdministrativeInfo,
    GeneralCampusInfo,
    Other,
}

impl Intent {
    /// Only planning requests skip retrieval in favour of the curriculum.
    pub fn is_planning(&self) -> bool {
        matches!(self, Intent::NextSemesterPlanning)
    }

    /// Map a label to an intent. Accepts the English labels from the prompt
    /// and the Indonesian labels earlier prompt revisions produced.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label
            .trim()
            .trim_matches(|c: char| c == '*' || c == '"' || c == '.' || c == '`')
            .trim()
            .to_lowercase();

        match label.as_str() {
            "course information" | "mencari informasi mata kuliah" => {
                Some(Intent::CourseInfoLookup)
            }
            "next semester planning" | "memilih mata kuliah semester selanjutnya" => {
                Some(Intent::NextSemesterPlanning)
            }
            "administrative information" | "mencari informasi administrasi" => {
                Some(Intent::AdministrativeInfo)
            }
            "general campus information" | "informasi umum kampus" => {
                Some(Intent::GeneralCampusInfo)
            }
            "other" | "lain-lain" => Some(Intent::Other),
            _ => None,
        }
    }
}

/// Extract the intent from raw model output, defaulting to `Other`.
pub fn parse_intent(raw: &str) -> Intent {
    static INTENT_LINE: OnceLock<Regex> = OnceLock::new();
    let re = INTENT_LINE
        .get_or_init(|| Regex::new(r"(?im)^\s*INTENT:\s*(.+?)\s*$").expect("valid intent regex"));

    re.captures(raw)
        .and_then(|caps| caps.get(1))
        .and_then(|label| Intent::from_label(label.as_str()))
        .unwrap_or(Intent::Other)
}

pub struct IntentClassifier {
    llm: Arc<dyn LanguageModel>,
    template: String,
    options: CompletionOptions,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LanguageModel>, template: String, options: CompletionOptions) -> Self {
        Self {
            llm,
            template,
            options,
        }
    }

    /// Classify without a fallback; the caller decides what a failed call means.
    pub async fn try_classify(&self, normalized_input: &str) -> Result<Intent, ProviderError> {
        let prompt = render(&self.template, &[("user_input", normalized_input)]);
        let raw = self
            .llm
            .complete(&[Message::user(prompt)], &self.options)
            .await?;
        let intent = parse_intent(&raw);
        tracing::debug!(?intent, raw = raw.trim(), "intent classified");
        Ok(intent)
    }

    /// Classify, failing open to [`Intent::Other`] (the general Q&A path).
    pub async fn classify(&self, normalized_input: &str) -> Intent {
        match self.try_classify(normalized_input).await {
            Ok(intent) => intent,
            Err(e) => {
                tracing::warn!(error = %e, "intent classification failed, using general path");
                Intent::Other
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::prompts::builtin;
    use crate::core::testing::ScriptedModel;

    fn options() -> CompletionOptions {
        CompletionOptions {
            model: "classifier".into(),
            temperature: 0.2,
            max_tokens: 50,
        }
    }

    #[test]
    fn test_parse_each_label() {
        assert_eq!(parse_intent("INTENT: Course Information"), Intent::CourseInfoLookup);
        assert_eq!(
            parse_intent("INTENT: Next Semester Planning"),
            Intent::NextSemesterPlanning
        );
        assert_eq!(
            parse_intent("INTENT: Administrative Information"),
            Intent::AdministrativeInfo
        );
        assert_eq!(
            parse_intent("INTENT: General Campus Information"),
            Intent::GeneralCampusInfo
        );
        assert_eq!(parse_intent("INTENT: Other"), Intent::Other);
    }

    #[test]
    fn test_parse_indonesian_labels_and_noise() {
        assert_eq!(
            parse_intent("INTENT: Memilih Mata Kuliah Semester Selanjutnya"),
            Intent::NextSemesterPlanning
        );
        assert_eq!(
            parse_intent("Sure!\nintent:   **Informasi Umum Kampus**  \n"),
            Intent::GeneralCampusInfo
        );
    }

    #[test]
    fn test_unparseable_output_is_other() {
        assert_eq!(parse_intent("Course Information"), Intent::Other);
        assert_eq!(parse_intent("INTENT: Weather Forecast"), Intent::Other);
        assert_eq!(parse_intent(""), Intent::Other);
    }

    #[tokio::test]
    async fn test_classify_sends_single_short_prompt() {
        let model = Arc::new(ScriptedModel::replying("INTENT: Next Semester Planning"));
        let classifier =
            IntentClassifier::new(model.clone(), builtin::INTENT.to_string(), options());

        let intent = classifier.classify("bantu pilih satuan kredit semester").await;
        assert_eq!(intent, Intent::NextSemesterPlanning);

        let calls = model.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].messages.len(), 1);
        assert!(calls[0].messages[0]
            .content
            .contains("== User Input ==\nbantu pilih satuan kredit semester"));
        assert_eq!(calls[0].options.max_tokens, 50);
    }

    #[tokio::test]
    async fn test_model_failure_fails_open() {
        let model = Arc::new(ScriptedModel::failing());
        let classifier = IntentClassifier::new(model, builtin::INTENT.to_string(), options());

        assert!(classifier.try_classify("halo").await.is_err());
        assert_eq!(classifier.classify("halo").await, Intent::Other);
    }
}
