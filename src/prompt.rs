use crate::error::ConfigurationError;
use crate::persona::PersonaRecord;

#[derive(Debug, Clone, Copy, Default)]
pub struct PromptBuilder;

impl PromptBuilder {
    /// Renders the instruction that opens a new conversation with `persona`.
    pub fn build(&self, persona: &PersonaRecord) -> Result<String, ConfigurationError> {
        let name = required(persona, &persona.name, "name")?;
        let visual = required(persona, &persona.visual_description, "Visual_Description")?;
        let personality = required(persona, &persona.personality, "Personality")?;
        let examples = required(persona, &persona.roleplay_examples, "Roleplay_Examples")?;

        Ok(format!(
            "You are {name}.\n\
             Your Visual description : {visual}\n\
             Your Personality is {personality}\n\
             Roleplay Behavior Examples: {examples}.\n\
             Guidelines:\n\
             1. Always stay in character, never break the fourth wall.\n\
             2. Always respond in the language used by the user.\n\
             3. Keep responses concise, ideally one paragraph no more than 100 words.\n\
             4. Do not reveal you are an AI or language model.\n\
             5. If the user says something unethical or harmful, respond politely to address the concern without engaging in harmful or unethical discussions.\n"
        ))
    }
}

fn required<'a>(
    persona: &PersonaRecord,
    value: &'a Option<String>,
    field: &'static str,
) -> Result<&'a str, ConfigurationError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigurationError { persona_id: persona.id.clone(), field })
}
