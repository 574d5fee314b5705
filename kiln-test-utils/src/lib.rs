//! KILN Test Utilities
//!
//! Centralized test infrastructure for the KILN workspace:
//! - A scripted evaluator standing in for the `pkl` binary
//! - Proptest generators for entries and result documents
//! - Fixture documents and castable fixture types
//! - Custom assertions for KILN-specific validation

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

// Re-export core types for convenience
pub use kiln_core::{
    digest, impl_castable, CacheError, CacheResult, Candidate, CastError, Entry, EvalError,
    EvalResult, KilnConfig, KilnError, KilnResult, ResultTree, Scalar, Value,
};
pub use kiln_eval::{Evaluator, Invocation, Kiln, OutputFormat};
pub use kiln_storage::{CacheStore, FileStore, PersistentCache};

use tempfile::TempDir;

// ============================================================================
// SCRIPTED EVALUATOR
// ============================================================================

/// One recorded evaluator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub modules: Vec<String>,
    pub format: OutputFormat,
}

#[derive(Debug, Default)]
struct Script {
    responses: HashMap<(Vec<String>, OutputFormat), Invocation>,
    version: Option<String>,
    calls: Vec<Call>,
}

/// Evaluator answering from a script instead of running a binary.
///
/// Clones share the script and the call log, so a test can keep a handle
/// after moving the evaluator into a [`Kiln`]. Unscripted calls fail the way
/// the real tool does for a missing module.
#[derive(Debug, Clone, Default)]
pub struct ScriptedEvaluator {
    script: Arc<Mutex<Script>>,
}

impl ScriptedEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn key(modules: &[&str], format: OutputFormat) -> (Vec<String>, OutputFormat) {
        (modules.iter().map(|m| m.to_string()).collect(), format)
    }

    /// Answer a JSON evaluation of `module` with `stdout`.
    pub fn respond(self, module: &str, stdout: &str) -> Self {
        self.respond_to(&[module], OutputFormat::Json, Invocation::success(stdout))
    }

    /// Answer a batch evaluation of `modules`, in `format`, with `invocation`.
    pub fn respond_to(self, modules: &[&str], format: OutputFormat, invocation: Invocation) -> Self {
        self.script()
            .responses
            .insert(Self::key(modules, format), invocation);
        self
    }

    /// Make JSON evaluation of `module` exit with `status`.
    pub fn fail(self, module: &str, status: i32, stderr: &str) -> Self {
        self.respond_to(
            &[module],
            OutputFormat::Json,
            Invocation::failure(status, stderr),
        )
    }

    pub fn with_version(self, version: &str) -> Self {
        self.script().version = Some(version.to_string());
        self
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.script().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.script().calls.len()
    }
}

impl Evaluator for ScriptedEvaluator {
    fn invoke(&self, modules: &[&str], format: OutputFormat) -> EvalResult<Invocation> {
        let mut script = self.script();
        script.calls.push(Call {
            modules: modules.iter().map(|m| m.to_string()).collect(),
            format,
        });

        let invocation = script
            .responses
            .get(&Self::key(modules, format))
            .cloned()
            .unwrap_or_else(|| {
                Invocation::failure(
                    1,
                    format!("Cannot find module `{}`.", modules.join("`, `")),
                )
            });
        Ok(invocation)
    }

    fn version(&self) -> EvalResult<String> {
        self.script()
            .version
            .clone()
            .ok_or_else(|| EvalError::ExecutableNotFound {
                path: "scripted".to_string(),
            })
    }
}

// ============================================================================
// TEMPORARY CACHES
// ============================================================================

/// A temporary directory holding a cache file.
pub struct TempCache {
    pub dir: TempDir,
}

impl TempCache {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("TempDir creation should succeed"),
        }
    }

    /// Path of the cache file inside the directory.
    pub fn path(&self) -> PathBuf {
        self.dir.path().join(".kiln.cache")
    }

    /// Config pointing at the cache file.
    pub fn config(&self) -> KilnConfig {
        KilnConfig::new().with_cache_file(self.path())
    }

    /// A fresh persistent cache on the file.
    pub fn persistent(&self) -> PersistentCache {
        PersistentCache::new(self.path())
    }

    /// A context using `evaluator` and this cache file.
    pub fn kiln(&self, evaluator: ScriptedEvaluator) -> Kiln<ScriptedEvaluator> {
        Kiln::with_evaluator(self.config(), evaluator)
    }

    /// Write a module file and return its path as a cache key.
    pub fn module(&self, name: &str, source: &str) -> String {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("module directory should be created");
        }
        std::fs::write(&path, source).expect("module should be written");
        path.to_string_lossy().into_owned()
    }
}

impl Default for TempCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Install a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt().with_env_filter(filter).with_test_writer().try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating KILN values.

    use super::*;
    use proptest::prelude::*;
    use serde_json::{Map, Value as Json};

    /// Generate a timestamp within a reasonable range (2020-2030).
    pub fn arb_timestamp() -> impl Strategy<Value = chrono::DateTime<chrono::Utc>> {
        (1577836800i64..1893456000i64, 0u32..1_000_000_000).prop_map(|(secs, nanos)| {
            chrono::DateTime::from_timestamp(secs, nanos).unwrap_or_else(chrono::Utc::now)
        })
    }

    /// Generate a cache key shaped like a module path.
    pub fn arb_module_key() -> impl Strategy<Value = String> {
        "[a-z]{1,8}(/[a-z]{1,8}){0,2}\\.pkl"
    }

    /// Generate an entry whose digest matches its content.
    pub fn arb_valid_entry() -> impl Strategy<Value = Entry> {
        (".{0,64}", arb_timestamp())
            .prop_map(|(content, ts)| Entry::from_parts(content.clone(), digest(&content), ts))
    }

    /// Generate an entry whose digest does not match its content.
    pub fn arb_corrupted_entry() -> impl Strategy<Value = Entry> {
        (".{0,64}", "[0-9a-f]{64}", arb_timestamp()).prop_filter_map(
            "hash must differ from digest",
            |(content, hash, ts)| {
                (hash != digest(&content)).then(|| Entry::from_parts(content, hash, ts))
            },
        )
    }

    /// Generate a JSON scalar.
    pub fn arb_json_scalar() -> impl Strategy<Value = Json> {
        prop_oneof![
            Just(Json::Null),
            any::<bool>().prop_map(Json::Bool),
            any::<i64>().prop_map(Json::from),
            (-1.0e6f64..1.0e6).prop_map(Json::from),
            "[a-zA-Z0-9 ]{0,16}".prop_map(Json::String),
        ]
    }

    /// Generate a nested JSON document with an object at the top level.
    pub fn arb_document() -> impl Strategy<Value = Json> {
        let leaf = arb_json_scalar();
        let nested = leaf.prop_recursive(3, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Json::Array),
                prop::collection::vec(("[a-z]{1,6}", inner), 0..4)
                    .prop_map(|fields| Json::Object(fields.into_iter().collect::<Map<_, _>>())),
            ]
        });
        prop::collection::vec(("[a-z]{1,6}", nested), 0..6)
            .prop_map(|fields| Json::Object(fields.into_iter().collect::<Map<_, _>>()))
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Evaluator outputs and castable types mirroring common modules.

    use super::*;
    use std::collections::BTreeMap;

    /// Output of a module with one member of each scalar kind.
    pub const SIMPLE: &str = r#"{
  "name": "Pkl: Configure your Systems in New Ways",
  "attendants": 100,
  "isInteractive": true,
  "amountLearned": 13.37
}"#;

    /// Output of a module with several nested objects.
    pub const MULTIPLE: &str = r#"{
  "woodPigeon": {
    "name": "Common wood pigeon",
    "diet": "Seeds",
    "taxonomy": {
      "species": "Columba palumbus"
    }
  },
  "stockPigeon": {
    "name": "Stock pigeon",
    "diet": "Seeds",
    "taxonomy": {
      "species": "Columba oenas"
    }
  },
  "dodo": {
    "name": "Dodo",
    "diet": "Fruits",
    "taxonomy": {
      "species": "Raphus cucullatus"
    }
  }
}"#;

    /// Output of a module holding one user.
    pub const USER: &str = r#"{
  "user": {
    "id": 1,
    "name": "John Doe",
    "address": {
      "street": "123 Main St",
      "city": "Springfield",
      "state": "IL",
      "zip": "62701"
    }
  }
}"#;

    /// Output of a module holding two users.
    pub const USERS: &str = r#"{
  "user1": {
    "id": 1,
    "name": "John Doe",
    "address": {
      "street": "123 Main St",
      "city": "Springfield",
      "state": "IL",
      "zip": "62701"
    }
  },
  "user2": {
    "id": 2,
    "name": "Jane Doe",
    "address": {
      "street": "456 Elm St",
      "city": "Springfield",
      "state": "IL",
      "zip": "62701"
    }
  }
}"#;

    /// Output of a module with `firstname` / `lastname` members.
    pub const PERSON: &str = r#"{
  "firstname": "John",
  "lastname": "Doe"
}"#;

    #[derive(Debug, Clone, PartialEq)]
    pub struct Address {
        pub street: String,
        pub city: String,
        pub state: String,
        pub zip: String,
    }

    impl_castable!(Address {
        street: scalar,
        city: scalar,
        state: scalar,
        zip: scalar,
    });

    #[derive(Debug, Clone, PartialEq)]
    pub struct User {
        pub id: i64,
        pub name: String,
        pub address: Address,
    }

    impl_castable!(User {
        id: scalar,
        name: scalar,
        address: object(Address),
    });

    #[derive(Debug, Clone, PartialEq)]
    pub struct UserWithArrayAddress {
        pub id: i64,
        pub name: String,
        pub address: BTreeMap<String, String>,
    }

    impl_castable!(UserWithArrayAddress {
        id: scalar,
        name: scalar,
        address: array,
    });

    #[derive(Debug, Clone, PartialEq)]
    pub struct UserWithAttributes {
        pub identifier: i64,
        pub name_of_user: String,
        pub address_of_user: Address,
    }

    impl_castable!(UserWithAttributes {
        identifier: scalar from "id",
        name_of_user: scalar from "name",
        address_of_user: object(Address) from "address",
    });

    #[derive(Debug, Clone, PartialEq)]
    pub struct ClassWithAttributes {
        pub name: String,
        pub surname: String,
    }

    impl_castable!(ClassWithAttributes {
        name: scalar from "firstname",
        surname: scalar from "lastname",
    });

    #[derive(Debug, Clone, PartialEq)]
    pub struct Taxonomy {
        pub species: String,
    }

    impl_castable!(Taxonomy { species: scalar });

    #[derive(Debug, Clone, PartialEq)]
    pub struct Bird {
        pub name: String,
        pub diet: String,
        pub taxonomy: Taxonomy,
        pub lifespan: Option<i64>,
    }

    impl_castable!(Bird {
        name: scalar,
        diet: scalar,
        taxonomy: object(Taxonomy),
        lifespan: scalar,
    });

    /// The address shared by the user fixtures.
    pub fn springfield() -> Address {
        Address {
            street: "123 Main St".to_string(),
            city: "Springfield".to_string(),
            state: "IL".to_string(),
            zip: "62701".to_string(),
        }
    }

    /// A batch of documents as the evaluator prints them.
    pub fn batch_output(documents: &[&str]) -> String {
        documents.join(kiln_eval::DOCUMENT_SEPARATOR)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for KILN-specific validation.

    use super::*;

    /// Assert that a KilnResult is a cache error.
    #[track_caller]
    pub fn assert_cache_error<T: std::fmt::Debug>(result: &KilnResult<T>) {
        match result {
            Err(KilnError::Cache(_)) => {}
            other => panic!("Expected Cache error, got: {:?}", other),
        }
    }

    /// Assert that a KilnResult is a tool invocation failure with the given status.
    #[track_caller]
    pub fn assert_tool_failure<T: std::fmt::Debug>(result: &KilnResult<T>, status: i32) {
        match result {
            Err(KilnError::Eval(EvalError::ToolInvocationFailure { status: s, .. })) => {
                assert_eq!(*s, status, "Wrong exit status in tool failure");
            }
            other => panic!("Expected tool failure, got: {:?}", other),
        }
    }

    /// Assert that a KilnResult is a mapping mismatch on `field`.
    #[track_caller]
    pub fn assert_mapping_mismatch<T: std::fmt::Debug>(result: &KilnResult<T>, field: &str) {
        match result {
            Err(KilnError::Cast(CastError::MappingMismatch { field: f, .. })) => {
                assert_eq!(f, field, "Wrong field in mapping mismatch");
            }
            other => panic!("Expected mapping mismatch on {}, got: {:?}", field, other),
        }
    }

    /// Assert that every entry of the cache file has a matching digest.
    #[track_caller]
    pub fn assert_cache_file_valid(cache: &TempCache) {
        let mut persistent = cache.persistent();
        if let Err(e) = persistent.validate() {
            panic!("Cache file failed validation: {:?}", e);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
