use crate::config::Config;
use crate::error::{MailsageError, Result, ValidationError};
use crate::generation::BackendKind;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every error before failing
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_indexing(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_query(config, &mut errors);
        Self::validate_search(config, &mut errors);
        Self::validate_answer(config, &mut errors);
        Self::validate_llm(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(MailsageError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }

        if config.storage.database_file.is_empty() {
            errors.push(ValidationError::new(
                "storage.database_file",
                "Database file name cannot be empty",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.max_concurrent_batches == 0 {
            errors.push(ValidationError::new(
                "embedding.max_concurrent_batches",
                "Concurrent batch limit must be greater than 0",
            ));
        }

        if config.embedding.chunk_size == 0
            || config.embedding.chunk_overlap >= config.embedding.chunk_size
        {
            errors.push(ValidationError::new(
                "embedding.chunk_size",
                "Chunk size must be greater than 0 and larger than chunk_overlap",
            ));
        }

        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }
    }

    fn validate_indexing(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.indexing.vector_dim == 0 {
            errors.push(ValidationError::new(
                "indexing.vector_dim",
                "Vector dimension must be greater than 0",
            ));
        }

        if config.indexing.hnsw_ef_construction == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_ef_construction",
                "HNSW ef_construction must be greater than 0",
            ));
        }

        if config.indexing.hnsw_m == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_m",
                "HNSW M must be greater than 0",
            ));
        }

        if config.indexing.max_elements == 0 {
            errors.push(ValidationError::new(
                "indexing.max_elements",
                "Max elements must be greater than 0",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;

        if retrieval.max_top_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.max_top_k",
                "max_top_k must be greater than 0",
            ));
        }

        if retrieval.default_top_k == 0 || retrieval.default_top_k > retrieval.max_top_k {
            errors.push(ValidationError::new(
                "retrieval.default_top_k",
                format!(
                    "default_top_k must be between 1 and max_top_k ({}), got {}",
                    retrieval.max_top_k, retrieval.default_top_k
                ),
            ));
        }

        if retrieval.analytical_multiplier == 0 {
            errors.push(ValidationError::new(
                "retrieval.analytical_multiplier",
                "analytical_multiplier must be greater than 0",
            ));
        }

        let bonuses = [
            ("retrieval.keyword_bonus", retrieval.keyword_bonus),
            ("retrieval.entity_bonus", retrieval.entity_bonus),
            ("retrieval.subject_bonus", retrieval.subject_bonus),
            ("retrieval.sender_bonus", retrieval.sender_bonus),
        ];
        for (path, value) in bonuses {
            if !(0.0..=1.0).contains(&value) {
                errors.push(ValidationError::new(
                    path,
                    format!("Bonus must be between 0.0 and 1.0, got {}", value),
                ));
            }
        }
    }

    fn validate_query(config: &Config, errors: &mut Vec<ValidationError>) {
        let temperatures = [
            (
                "query.classification_temperature",
                config.query.classification_temperature,
            ),
            ("query.sub_query_temperature", config.query.sub_query_temperature),
            ("query.hyde_temperature", config.query.hyde_temperature),
        ];
        for (path, temp) in temperatures {
            Self::check_temperature(path, temp, errors);
        }
    }

    fn validate_search(config: &Config, errors: &mut Vec<ValidationError>) {
        let search = &config.search;

        for (path, weight) in [
            ("search.semantic_weight", search.semantic_weight),
            ("search.lexical_weight", search.lexical_weight),
            ("search.attachment_penalty", search.attachment_penalty),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                errors.push(ValidationError::new(
                    path,
                    format!("Weight must be between 0.0 and 1.0, got {}", weight),
                ));
            }
        }

        if search.default_page_size == 0 || search.default_page_size > search.max_page_size {
            errors.push(ValidationError::new(
                "search.default_page_size",
                format!(
                    "default_page_size must be between 1 and max_page_size ({})",
                    search.max_page_size
                ),
            ));
        }
    }

    fn validate_answer(config: &Config, errors: &mut Vec<ValidationError>) {
        let answer = &config.answer;

        if answer.context_char_budget == 0 {
            errors.push(ValidationError::new(
                "answer.context_char_budget",
                "Context budget must be greater than 0",
            ));
        }

        if answer.stream_buffer == 0 {
            errors.push(ValidationError::new(
                "answer.stream_buffer",
                "Stream buffer must be greater than 0",
            ));
        }

        if answer.summary_max_documents == 0 {
            errors.push(ValidationError::new(
                "answer.summary_max_documents",
                "Summary document cap must be greater than 0",
            ));
        }

        Self::check_temperature("answer.temperature", answer.temperature, errors);
        Self::check_temperature(
            "answer.summary_temperature",
            answer.summary_temperature,
            errors,
        );
    }

    fn validate_llm(config: &Config, errors: &mut Vec<ValidationError>) {
        // Credentials may come from the store, so the env var is not required here
        if config.llm.api_key_env.is_empty() {
            errors.push(ValidationError::new(
                "llm.api_key_env",
                "API key environment variable name cannot be empty",
            ));
        }

        if config.llm.provider.parse::<BackendKind>().is_err() {
            errors.push(ValidationError::new(
                "llm.provider",
                format!(
                    "Provider must be one of {:?}, got '{}'",
                    BackendKind::ALL
                        .iter()
                        .map(|k| k.as_str())
                        .collect::<Vec<_>>(),
                    config.llm.provider
                ),
            ));
        }

        if config.llm.provider == "custom" && config.llm.base_url.is_none() {
            errors.push(ValidationError::new(
                "llm.base_url",
                "The custom provider requires a base_url",
            ));
        }

        if config.llm.timeout_secs == 0 {
            errors.push(ValidationError::new(
                "llm.timeout_secs",
                "Timeout must be greater than 0",
            ));
        }
    }

    fn check_temperature(path: &str, temp: f32, errors: &mut Vec<ValidationError>) {
        if !(0.0..=2.0).contains(&temp) {
            errors.push(ValidationError::new(
                path,
                format!("Temperature must be between 0.0 and 2.0, got {}", temp),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_unknown_provider() {
        let mut config = Config::default();
        config.llm.provider = "ollama".to_string();
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = Config::default();
        config.retrieval.default_top_k = 0;
        config.search.semantic_weight = 1.5;
        config.answer.temperature = 3.0;

        match ConfigValidator::validate(&config) {
            Err(MailsageError::ConfigValidation { errors }) => {
                let paths: Vec<_> = errors.iter().map(|e| e.path.as_str()).collect();
                assert!(paths.contains(&"retrieval.default_top_k"));
                assert!(paths.contains(&"search.semantic_weight"));
                assert!(paths.contains(&"answer.temperature"));
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_custom_provider_needs_base_url() {
        let mut config = Config::default();
        config.llm.provider = "custom".to_string();
        assert!(ConfigValidator::validate(&config).is_err());

        config.llm.base_url = Some("http://localhost:8000/v1".to_string());
        assert!(ConfigValidator::validate(&config).is_ok());
    }
}
