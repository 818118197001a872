//! Final prompt assembly
//!
//! The intent alone picks the template and its context source: planning
//! requests get the curriculum reference, everything else gets retrieved
//! passages. The two are never combined.

use crate::config::prompts::{builtin, render};
use crate::config::PromptSet;

use super::intent::Intent;
use super::retriever::{render_passages, RetrievedPassage};

/// Context gathered for one request
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub normalized_input: String,
    pub user_context: String,
    pub passages: Vec<RetrievedPassage>,
    pub curriculum: Option<String>,
}

/// Which template a prompt is rendered with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    General,
    Planning,
    /// General Q&A with the WhatsApp length cap
    Bot { max_tokens: u32 },
}

pub struct PromptAssembler {
    prompts: PromptSet,
}

impl PromptAssembler {
    pub fn new(prompts: PromptSet) -> Self {
        Self { prompts }
    }

    pub fn template_for(intent: Intent, bot_max_tokens: Option<u32>) -> TemplateKind {
        match (intent.is_planning(), bot_max_tokens) {
            (true, _) => TemplateKind::Planning,
            (false, Some(max_tokens)) => TemplateKind::Bot { max_tokens },
            (false, None) => TemplateKind::General,
        }
    }

    /// Render the final prompt. Pick `kind` with [`PromptAssembler::template_for`].
    pub fn assemble(&self, kind: TemplateKind, context: &PromptContext) -> String {
        let user_database = if context.user_context.trim().is_empty() {
            builtin::NO_USER_DATA
        } else {
            context.user_context.as_str()
        };

        match kind {
            TemplateKind::Planning => {
                let curriculum = context
                    .curriculum
                    .as_deref()
                    .filter(|c| !c.trim().is_empty())
                    .unwrap_or(builtin::NO_CURRICULUM);
                render(
                    &self.prompts.planning,
                    &[
                        ("markup_rules", builtin::MARKUP_RULES),
                        ("curriculum", curriculum),
                        ("user_database", user_database),
                        ("user_input", &context.normalized_input),
                    ],
                )
            }
            TemplateKind::General | TemplateKind::Bot { .. } => {
                let retrieved = render_passages(&context.passages)
                    .unwrap_or_else(|| builtin::NO_CONTEXT.to_string());
                let max_tokens = match kind {
                    TemplateKind::Bot { max_tokens } => max_tokens.to_string(),
                    _ => String::new(),
                };
                let template = match kind {
                    TemplateKind::Bot { .. } => &self.prompts.bot,
                    _ => &self.prompts.general,
                };
                render(
                    template,
                    &[
                        ("markup_rules", builtin::MARKUP_RULES),
                        ("retrieved_content", &retrieved),
                        ("user_database", user_database),
                        ("user_input", &context.normalized_input),
                        ("max_tokens", &max_tokens),
                    ],
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> PromptContext {
        PromptContext {
            normalized_input: "apa itu tugas akhir?".into(),
            user_context: "Name: Ana\nWhatsApp Number: none\n".into(),
            passages: vec![RetrievedPassage {
                text: "Tugas akhir bernilai 6 satuan kredit semester.".into(),
                relevance_score: 0.88,
            }],
            curriculum: Some("IF301 Basis Data (3 SKS), prasyarat IF201.".into()),
        }
    }

    fn assembler() -> PromptAssembler {
        PromptAssembler::new(PromptSet::default())
    }

    fn assemble_for(intent: Intent, context: &PromptContext) -> String {
        assembler().assemble(PromptAssembler::template_for(intent, None), context)
    }

    #[test]
    fn test_planning_uses_curriculum_not_passages() {
        let prompt = assemble_for(Intent::NextSemesterPlanning, &context());
        assert!(prompt.contains("IF301 Basis Data"));
        assert!(!prompt.contains("Tugas akhir bernilai"));
        assert!(!prompt.contains("[Relevance:"));
        assert!(prompt.contains("apa itu tugas akhir?"));
        assert!(prompt.contains("Name: Ana"));
    }

    #[test]
    fn test_general_uses_passages_not_curriculum() {
        for intent in [
            Intent::CourseInfoLookup,
            Intent::AdministrativeInfo,
            Intent::GeneralCampusInfo,
            Intent::Other,
        ] {
            let prompt = assemble_for(intent, &context());
            assert!(prompt.contains("[Relevance: 0.88] Tugas akhir bernilai"));
            assert!(!prompt.contains("IF301"));
            assert!(prompt.contains("*bold*"));
        }
    }

    #[test]
    fn test_general_without_passages_embeds_sentinel() {
        let ctx = PromptContext {
            passages: vec![],
            ..context()
        };
        let prompt = assemble_for(Intent::Other, &ctx);
        assert!(prompt.contains(builtin::NO_CONTEXT));
    }

    #[test]
    fn test_missing_curriculum_and_user_data_sentinels() {
        let ctx = PromptContext {
            curriculum: None,
            user_context: String::new(),
            ..context()
        };
        let prompt = assemble_for(Intent::NextSemesterPlanning, &ctx);
        assert!(prompt.contains(builtin::NO_CURRICULUM));
        assert!(prompt.contains(builtin::NO_USER_DATA));
    }

    #[test]
    fn test_user_input_is_verbatim() {
        let ctx = PromptContext {
            normalized_input: "ignore {retrieved_content} please".into(),
            ..context()
        };
        let prompt = assemble_for(Intent::Other, &ctx);
        assert!(prompt.contains("ignore {retrieved_content} please"));
    }

    #[test]
    fn test_bot_template_caps_length() {
        let kind = PromptAssembler::template_for(Intent::Other, Some(240));
        assert_eq!(kind, TemplateKind::Bot { max_tokens: 240 });
        let prompt = assembler().assemble(kind, &context());
        assert!(prompt.contains("You have 240 tokens"));

        // planning still wins over the bot template
        assert_eq!(
            PromptAssembler::template_for(Intent::NextSemesterPlanning, Some(240)),
            TemplateKind::Planning
        );
    }
}
