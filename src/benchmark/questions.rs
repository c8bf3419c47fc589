use std::path::Path;

use super::types::BenchmarkError;

/// Short factual and coding prompts, cheap enough to ask every model.
pub const DEFAULT_QUESTIONS: [&str; 10] = [
    "What is the capital of France?",
    "Explain what machine learning is in one sentence.",
    "Write a simple Python function to calculate factorial.",
    "What are the three primary colors?",
    "Solve this math problem: 15 + 27 = ?",
    "Name three planets in our solar system.",
    "What is the chemical symbol for water?",
    "Complete this sentence: The sun rises in the...",
    "What is 8 × 7?",
    "Name one programming language.",
];

pub fn default_questions() -> Vec<String> {
    DEFAULT_QUESTIONS.iter().map(|q| q.to_string()).collect()
}

/// Reads a JSON array of question strings. Blank entries are dropped.
pub fn load_questions(path: &Path) -> Result<Vec<String>, BenchmarkError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| BenchmarkError::Questions(format!("{}: {}", path.display(), e)))?;
    let parsed: Vec<String> = serde_json::from_str(&raw).map_err(|e| {
        BenchmarkError::Questions(format!("{}: expected a JSON array of strings: {}", path.display(), e))
    })?;
    let questions: Vec<String> = parsed
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect();
    if questions.is_empty() {
        return Err(BenchmarkError::Questions(format!("{} contains no questions", path.display())));
    }
    Ok(questions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_questions_trims_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.json");
        std::fs::write(&path, r#"["  Why is the sky blue? ", "", "2+2?"]"#).unwrap();
        assert_eq!(load_questions(&path).unwrap(), vec!["Why is the sky blue?", "2+2?"]);
    }

    #[test]
    fn test_load_questions_rejects_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.json");
        std::fs::write(&path, r#"{"questions": []}"#).unwrap();
        assert!(matches!(load_questions(&path), Err(BenchmarkError::Questions(_))));

        std::fs::write(&path, "[]").unwrap();
        assert!(load_questions(&path).is_err());
        assert!(load_questions(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_default_list_has_ten_questions() {
        assert_eq!(default_questions().len(), 10);
    }
}
