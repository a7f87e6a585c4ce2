use oppsync_ai::Message;

pub const EXTRACTION_SYSTEM: &str = include_str!("../prompts/extract_system.txt");
pub const TRANSLATE_AR_INSTRUCTION: &str = include_str!("../prompts/translate_ar.txt");
pub const TRANSLATOR_SYSTEM: &str = "You are a professional translator. Respond with valid JSON only.";

pub fn extraction_messages(markdown: &str) -> Vec<Message> {
    let user = format!(
        "Extract structured information from this Markdown document about an opportunity:\n\n\
         ---MARKDOWN START---\n{markdown}\n---MARKDOWN END---\n\n\
         Output rules:\n\
         - Return ONLY valid JSON, with no explanation or Markdown around it\n\
         - Omit any field the text does not state explicitly\n\
         - Keep the document's original language\n\
         - Follow the schema from the system prompt exactly"
    );
    vec![Message::system(EXTRACTION_SYSTEM), Message::user(user)]
}

/// `record_json` is the record without its `id`.
pub fn arabic_translation_messages(record_json: &str) -> Vec<Message> {
    vec![
        Message::system(TRANSLATOR_SYSTEM),
        Message::user(format!("{}\n\n{record_json}", TRANSLATE_AR_INSTRUCTION.trim_end())),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_prompt_wraps_the_document() {
        let messages = extraction_messages("# DAAD\n\nBody");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("\"application_link\""));
        assert!(messages[1]
            .content
            .contains("---MARKDOWN START---\n# DAAD\n\nBody\n---MARKDOWN END---"));
    }

    #[test]
    fn translation_prompt_carries_the_payload() {
        let messages = arabic_translation_messages("{\"title\": \"Grant\"}");
        assert_eq!(messages[0].content, TRANSLATOR_SYSTEM);
        assert!(messages[1].content.starts_with("Translate the values"));
        assert!(messages[1].content.ends_with("{\"title\": \"Grant\"}"));
    }
}
