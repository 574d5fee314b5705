//! Error types for KILN operations

use thiserror::Error;

/// Cache layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Default value must be null or an instance of Entry, got {found}")]
    InvalidDefault { found: String },

    #[error(
        "The cache file \"{path}\" seems corrupted ({reason}) and should be generated again with a warmup"
    )]
    CorruptedCache {
        path: String,
        key: Option<String>,
        reason: String,
    },

    #[error(
        "The cache file \"{path}\" is empty or does not exist and should be generated again with a warmup"
    )]
    EmptyCache { path: String },

    #[error("Unreadable cache file format: {reason}")]
    Format { reason: String },

    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("{backend} backend error: {reason}")]
    Backend { backend: String, reason: String },
}

/// Errors raised at the evaluator boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EvalError {
    #[error("Evaluator exited with status {status}: {stderr}")]
    ToolInvocationFailure { status: i32, stderr: String },

    #[error(
        "Evaluator not found at {path}. Make sure to set the KILN_EVALUATOR_BIN environment variable"
    )]
    ExecutableNotFound { path: String },

    #[error("Failed to spawn {path}: {reason}")]
    Spawn { path: String, reason: String },

    #[error("Failed to decode evaluator output for {module}: {reason}")]
    Decode { module: String, reason: String },

    #[error("Expected {expected} documents from batch evaluation, got {got}")]
    DocumentCount { expected: usize, got: usize },

    #[error("Failed to scan {path} for modules: {reason}")]
    Discovery { path: String, reason: String },
}

/// Errors raised while casting a result tree onto a destination type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CastError {
    #[error(
        "Cannot map {found} at \"{source_key}\" onto {type_name}.{field}: field expects {expected}"
    )]
    MappingMismatch {
        type_name: String,
        field: String,
        source_key: String,
        expected: String,
        found: String,
    },

    #[error("Required field {type_name}.{field} has no source value")]
    MissingField { type_name: String, field: String },

    #[error("Invalid value for {type_name}.{field}: {reason}")]
    TypeMismatch {
        type_name: String,
        field: String,
        reason: String,
    },

    #[error("The member \"{key}\" is not an object and cannot be cast")]
    NotAnObject { key: String },
}

/// A document that could not be decoded into a result tree.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid document: {reason}")]
pub struct DecodeError {
    pub reason: String,
}

/// Master error type for all KILN errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KilnError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Eval error: {0}")]
    Eval(#[from] EvalError),

    #[error("Cast error: {0}")]
    Cast(#[from] CastError),
}

/// Result type alias for KILN operations.
pub type KilnResult<T> = Result<T, KilnError>;

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Result type alias for casting.
pub type CastResult<T> = Result<T, CastError>;

/// Result type alias for evaluator calls.
pub type EvalResult<T> = Result<T, EvalError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_error_display_invalid_default() {
        let err = CacheError::InvalidDefault {
            found: "string".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Default value must be null or an instance of Entry"));
        assert!(msg.contains("string"));
    }

    #[test]
    fn test_cache_error_display_corrupted() {
        let err = CacheError::CorruptedCache {
            path: ".kiln.cache".to_string(),
            key: Some("a.pkl".to_string()),
            reason: "digest mismatch".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("\".kiln.cache\" seems corrupted"));
        assert!(msg.contains("digest mismatch"));
    }

    #[test]
    fn test_cache_error_display_empty() {
        let err = CacheError::EmptyCache {
            path: "/tmp/x.cache".to_string(),
        };
        assert!(format!("{}", err).contains("is empty or does not exist"));
    }

    #[test]
    fn test_eval_error_display_tool_failure() {
        let err = EvalError::ToolInvocationFailure {
            status: 1,
            stderr: "Cannot find module `nope.pkl`".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("status 1"));
        assert!(msg.contains("nope.pkl"));
    }

    #[test]
    fn test_cast_error_display_mapping_mismatch() {
        let err = CastError::MappingMismatch {
            type_name: "User".to_string(),
            field: "name".to_string(),
            source_key: "name".to_string(),
            expected: "scalar".to_string(),
            found: "tree".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("User.name"));
        assert!(msg.contains("expects scalar"));
        assert!(msg.contains("tree"));
    }

    #[test]
    fn test_kiln_error_from_variants() {
        let cache = KilnError::from(CacheError::EmptyCache {
            path: "x".to_string(),
        });
        assert!(matches!(cache, KilnError::Cache(_)));

        let eval = KilnError::from(EvalError::DocumentCount {
            expected: 2,
            got: 1,
        });
        assert!(matches!(eval, KilnError::Eval(_)));

        let cast = KilnError::from(CastError::NotAnObject {
            key: "name".to_string(),
        });
        assert!(matches!(cast, KilnError::Cast(_)));
    }
}
