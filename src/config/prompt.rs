use serde::Deserialize;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use log::info;

#[derive(Debug)]
pub enum PromptError {
    TemplateNotFound(String),
    ReloadFailed(String),
    IoError(std::io::Error),
    JsonError(serde_json::Error),
}

impl fmt::Display for PromptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptError::TemplateNotFound(key) => write!(f, "Prompt template '{}' not found", key),
            PromptError::ReloadFailed(msg) => write!(f, "Prompt reload failed: {}", msg),
            PromptError::IoError(e) => write!(f, "Prompt file IO error: {}", e),
            PromptError::JsonError(e) => write!(f, "Prompt JSON parsing error: {}", e),
        }
    }
}

impl Error for PromptError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PromptError::IoError(e) => Some(e),
            PromptError::JsonError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PromptError {
    fn from(err: std::io::Error) -> Self {
        PromptError::IoError(err)
    }
}

impl From<serde_json::Error> for PromptError {
    fn from(err: serde_json::Error) -> Self {
        PromptError::JsonError(err)
    }
}

/// Template keys every prompts file must define.
const REQUIRED_TEMPLATES: [&str; 4] = [
    "system_preamble",
    "rag_answer",
    "general_chat",
    "conversation_title",
];

#[derive(Deserialize, Debug, Clone)]
pub struct PromptConfig {
    pub templates: HashMap<String, String>,
    #[serde(skip)]
    pub last_loaded: Option<SystemTime>,
}

impl PromptConfig {
    fn validate(&self) -> Result<(), PromptError> {
        for key in REQUIRED_TEMPLATES {
            if !self.templates.contains_key(key) {
                return Err(PromptError::TemplateNotFound(format!("templates:{}", key)));
            }
        }
        Ok(())
    }
}

pub fn load_prompts(path: &str) -> Result<Arc<PromptConfig>, Box<dyn Error + Send + Sync>> {
    let file_content = fs
        ::read_to_string(path)
        .map_err(|e| format!("Failed to read prompts file '{}': {}", path, e))?;
    let mut config: PromptConfig = serde_json
        ::from_str(&file_content)
        .map_err(|e| format!("Failed to parse prompts file '{}': {}", path, e))?;
    config.validate()?;
    config.last_loaded = Some(SystemTime::now());
    Ok(Arc::new(config))
}

pub fn reload_prompts_if_changed<P: AsRef<Path>>(
    path: P,
    current_config: &Arc<PromptConfig>
) -> Result<Option<Arc<PromptConfig>>, PromptError> {
    let metadata = fs::metadata(&path)?;

    if let Ok(modified) = metadata.modified() {
        if let Some(last_loaded) = current_config.last_loaded {
            if modified > last_loaded {
                info!("Prompts file changed, reloading...");
                let new_config = load_prompts(path.as_ref().to_str().unwrap_or_default()).map_err(
                    |e| PromptError::ReloadFailed(e.to_string())
                )?;
                return Ok(Some(new_config));
            }
        } else {
            info!("No last_loaded timestamp, reloading prompts...");
            let new_config = load_prompts(path.as_ref().to_str().unwrap_or_default()).map_err(|e|
                PromptError::ReloadFailed(e.to_string())
            )?;
            return Ok(Some(new_config));
        }
    }
    Ok(None)
}

fn get_template<'a>(config: &'a PromptConfig, key: &str) -> Result<&'a str, PromptError> {
    config.templates
        .get(key)
        .map(|s| s.as_str())
        .ok_or_else(|| PromptError::TemplateNotFound(format!("templates:{}", key)))
}

/// Prompt for a question grounded in retrieved document context.
pub fn get_rag_answer_prompt(
    config: &PromptConfig,
    context: &str,
    history: &str,
    question: &str
) -> Result<String, PromptError> {
    let preamble = get_template(config, "system_preamble")?;
    let template = get_template(config, "rag_answer")?;

    Ok(
        template
            .replace("{system_preamble}", preamble)
            .replace("{context}", context)
            .replace("{history}", history)
            .replace("{question}", question)
    )
}

/// Prompt for a question with no indexed documents in the conversation.
pub fn get_general_prompt(
    config: &PromptConfig,
    history: &str,
    question: &str
) -> Result<String, PromptError> {
    let preamble = get_template(config, "system_preamble")?;
    let template = get_template(config, "general_chat")?;

    Ok(
        template
            .replace("{system_preamble}", preamble)
            .replace("{history}", history)
            .replace("{question}", question)
    )
}

pub fn get_title_prompt(config: &PromptConfig, message: &str) -> Result<String, PromptError> {
    let template = get_template(config, "conversation_title")?;
    Ok(template.replace("{message}", message))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> PromptConfig {
        let mut templates = HashMap::new();
        templates.insert("system_preamble".to_string(), "You are a pharmacist.".to_string());
        templates.insert(
            "rag_answer".to_string(),
            "{system_preamble}\n{context}\n{history}\nQ: {question}".to_string()
        );
        templates.insert(
            "general_chat".to_string(),
            "{system_preamble}\n{history}\nQ: {question}".to_string()
        );
        templates.insert("conversation_title".to_string(), "Title for: {message}".to_string());
        PromptConfig { templates, last_loaded: None }
    }

    #[test]
    fn rag_answer_prompt_substitutes_all_placeholders() {
        let config = test_config();
        let prompt = get_rag_answer_prompt(&config, "CTX", "HIST", "dose?").unwrap();
        assert_eq!(prompt, "You are a pharmacist.\nCTX\nHIST\nQ: dose?");
    }

    #[test]
    fn general_prompt_substitutes_all_placeholders() {
        let config = test_config();
        let prompt = get_general_prompt(&config, "HIST", "dose?").unwrap();
        assert!(!prompt.contains("{history}"));
        assert!(prompt.ends_with("Q: dose?"));
    }

    #[test]
    fn missing_template_is_an_error() {
        let mut config = test_config();
        config.templates.remove("rag_answer");
        let err = get_rag_answer_prompt(&config, "", "", "").unwrap_err();
        assert!(matches!(err, PromptError::TemplateNotFound(_)));
    }

    #[test]
    fn validate_rejects_incomplete_files() {
        let mut config = test_config();
        config.templates.remove("conversation_title");
        assert!(config.validate().is_err());
    }
}
