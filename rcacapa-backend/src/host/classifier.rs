//! Decides whether a message is small talk or work for the agents.

use crate::ai::{ChatModel, Message};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Friendly greeting or small talk; answered directly
    Greeting,
    /// Anything else; delegated to the agents
    Task,
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Intent;
}

/// Which classifier the host runs with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierMode {
    Heuristic,
    Model,
}

impl FromStr for ClassifierMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "heuristic" | "rule" | "rules" => Ok(ClassifierMode::Heuristic),
            "model" | "llm" => Ok(ClassifierMode::Model),
            other => Err(format!("unknown classifier mode: {}", other)),
        }
    }
}

/// One or more greeting phrases and nothing else
static GREETING_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:(?:hi|hello|hey|hiya|greetings|good (?:morning|afternoon|evening|day)|how are you(?: doing)?(?: today)?|how is it going|thanks|thank you)(?: there| all| team| everyone)?\s*)+$",
    )
    .expect("greeting pattern is valid")
});

/// Deterministic greeting check on the normalized text
pub struct GreetingHeuristic;

impl GreetingHeuristic {
    pub fn is_greeting(text: &str) -> bool {
        let normalized: String = text
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
            .collect();
        let normalized = normalized.split_whitespace().collect::<Vec<_>>().join(" ");
        !normalized.is_empty() && GREETING_PATTERN.is_match(&normalized)
    }
}

#[async_trait]
impl Classifier for GreetingHeuristic {
    async fn classify(&self, text: &str) -> Intent {
        if Self::is_greeting(text) { Intent::Greeting } else { Intent::Task }
    }
}

/// Classifier from a plain predicate returning `true` for greetings
#[cfg(test)]
pub struct PredicateClassifier<F>(pub F);

#[cfg(test)]
#[async_trait]
impl<F> Classifier for PredicateClassifier<F>
where
    F: Fn(&str) -> bool + Send + Sync,
{
    async fn classify(&self, text: &str) -> Intent {
        if (self.0)(text) { Intent::Greeting } else { Intent::Task }
    }
}

const CLASSIFIER_INSTRUCTIONS: &str = "You route messages for a compliance assistant. \
If the message is only a friendly greeting or small talk (for example \"Hello\" or \"How are you?\"), \
answer with the single word GREETING. For anything else answer with the single word TASK.";

/// Asks the host model; any failure routes to the agents
pub struct ModelClassifier {
    model: Arc<dyn ChatModel>,
}

impl ModelClassifier {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Classifier for ModelClassifier {
    async fn classify(&self, text: &str) -> Intent {
        let messages = vec![Message::system(CLASSIFIER_INSTRUCTIONS), Message::user(text)];
        match self.model.generate_text(messages).await {
            Ok(answer) if answer.trim().to_uppercase().starts_with("GREETING") => Intent::Greeting,
            Ok(_) => Intent::Task,
            Err(e) => {
                log::warn!("[HOST] Model classification failed, delegating: {}", e);
                Intent::Task
            }
        }
    }
}

pub fn build_classifier(mode: ClassifierMode, model: Arc<dyn ChatModel>) -> Arc<dyn Classifier> {
    match mode {
        ClassifierMode::Heuristic => Arc::new(GreetingHeuristic),
        ClassifierMode::Model => Arc::new(ModelClassifier::new(model)),
    }
}
