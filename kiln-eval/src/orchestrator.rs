//! Cached evaluation of configuration modules.

use std::path::Path;

use kiln_core::{
    cast_members, Candidate, Castable, Entry, EvalError, KilnConfig, KilnResult,
    ResultTree,
};
use kiln_storage::{CacheStore, PersistentCache};
use tracing::{debug, info, warn};

use crate::discovery::discover_modules;
use crate::evaluator::{CommandEvaluator, Evaluator, OutputFormat};

/// Separator between documents when several modules are evaluated in one run.
pub const DOCUMENT_SEPARATOR: &str = "\n---\n";

/// Evaluates modules through an [`Evaluator`], memoizing JSON output in a
/// [`CacheStore`].
///
/// The default store is a [`PersistentCache`] at the configured cache file.
/// Cached reads call the store's `load` first and writes are followed by
/// `persist`, so file-backed stores stay in sync with their file.
pub struct Kiln<E: Evaluator = CommandEvaluator> {
    config: KilnConfig,
    evaluator: E,
    cache: Box<dyn CacheStore>,
}

impl Kiln<CommandEvaluator> {
    /// Create a context running the configured evaluator binary.
    pub fn new(config: KilnConfig) -> Self {
        let evaluator = CommandEvaluator::from_config(&config);
        Self::with_evaluator(config, evaluator)
    }

    /// Create a context from environment variables.
    pub fn from_env() -> Self {
        Self::new(KilnConfig::from_env())
    }
}

impl<E: Evaluator> Kiln<E> {
    pub fn with_evaluator(config: KilnConfig, evaluator: E) -> Self {
        let cache = Box::new(PersistentCache::from_config(&config));
        Self {
            config,
            evaluator,
            cache,
        }
    }

    pub fn config(&self) -> &KilnConfig {
        &self.config
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    pub fn cache(&self) -> &dyn CacheStore {
        self.cache.as_ref()
    }

    pub fn cache_mut(&mut self) -> &mut dyn CacheStore {
        self.cache.as_mut()
    }

    /// Replace the active cache store.
    pub fn set_cache(&mut self, store: impl CacheStore + 'static) {
        debug!(backend = store.name(), "installing cache store");
        self.cache = Box::new(store);
    }

    /// Turn caching on or off. A disabled cache is neither read nor written.
    pub fn set_cache_enabled(&mut self, enabled: bool) {
        self.config.cache_enabled = enabled;
    }

    pub fn is_cache_enabled(&self) -> bool {
        self.config.cache_enabled
    }

    /// Evaluate `module` and decode its output.
    ///
    /// # Errors
    ///
    /// - [`EvalError::ToolInvocationFailure`] when the evaluator fails
    /// - [`EvalError::Decode`] when the output is not a JSON object
    /// - cache backend failures
    pub fn eval(&mut self, module: &str) -> KilnResult<ResultTree> {
        let content = self.content_for(module)?;
        let tree = ResultTree::parse(&content).map_err(|e| EvalError::Decode {
            module: module.to_string(),
            reason: e.reason,
        })?;
        Ok(tree)
    }

    /// Evaluate `module` and cast the whole document onto `T`.
    pub fn eval_as<T: Castable>(&mut self, module: &str) -> KilnResult<T> {
        Ok(self.eval(module)?.cast()?)
    }

    /// Evaluate `module` and cast each top-level member onto `T`.
    ///
    /// Fails with [`kiln_core::CastError::NotAnObject`] if a member is not an
    /// object.
    pub fn eval_each<T: Castable>(&mut self, module: &str) -> KilnResult<Vec<(String, T)>> {
        let tree = self.eval(module)?;
        Ok(cast_members(&tree)?)
    }

    /// Evaluate `modules` in the evaluator's own output format. Never cached.
    pub fn raw_eval(&self, modules: &[&str]) -> KilnResult<String> {
        let output = self
            .evaluator
            .invoke(modules, OutputFormat::Native)?
            .into_output()?;
        Ok(output)
    }

    /// Version banner of the evaluator.
    pub fn binary_version(&self) -> KilnResult<String> {
        Ok(self.evaluator.version()?)
    }

    /// Evaluate `modules` in one run and replace the active cache with a fresh
    /// [`PersistentCache`] at the configured file holding their output.
    ///
    /// Returns the number of cached modules.
    pub fn warmup(&mut self, modules: &[&str]) -> KilnResult<usize> {
        let mut cache = PersistentCache::from_config(&self.config);

        if !modules.is_empty() {
            let output = self
                .evaluator
                .invoke(modules, OutputFormat::Json)?
                .into_output()?;

            let documents: Vec<&str> = output.split(DOCUMENT_SEPARATOR).collect();
            if documents.len() != modules.len() {
                return Err(EvalError::DocumentCount {
                    expected: modules.len(),
                    got: documents.len(),
                }
                .into());
            }

            for (module, document) in modules.iter().zip(documents) {
                cache.set(module, Entry::new(document.trim()).into())?;
            }
        }

        cache.save()?;
        info!(
            modules = modules.len(),
            cache_file = %cache.cache_file().display(),
            "cache warmed up"
        );

        self.cache = Box::new(cache);
        Ok(modules.len())
    }

    /// Warm up every module found below `root`.
    pub fn warmup_dir(&mut self, root: impl AsRef<Path>) -> KilnResult<usize> {
        let paths = discover_modules(root.as_ref())?;
        let names: Vec<String> = paths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let modules: Vec<&str> = names.iter().map(String::as_str).collect();
        self.warmup(&modules)
    }

    /// Audit the cache file at the configured location.
    ///
    /// # Errors
    ///
    /// - [`kiln_core::CacheError::EmptyCache`] if there is no cache file
    /// - [`kiln_core::CacheError::CorruptedCache`] if it is unreadable or holds an entry
    ///   whose digest does not match
    pub fn validate_cache(&self) -> KilnResult<()> {
        let mut cache = PersistentCache::from_config(&self.config);
        cache.validate()?;
        Ok(())
    }

    fn content_for(&mut self, module: &str) -> KilnResult<String> {
        if self.config.cache_enabled {
            if let Err(e) = self.cache.load() {
                warn!(backend = self.cache.name(), error = %e, "ignoring unreadable cache");
            }
            if let Some(entry) = self.cache.get(module, Candidate::Absent)? {
                debug!(module, backend = self.cache.name(), "cache hit");
                return Ok(entry.content);
            }
            debug!(module, backend = self.cache.name(), "cache miss");
        }

        let content = self
            .evaluator
            .invoke(&[module], OutputFormat::Json)?
            .into_output()?;

        if self.config.cache_enabled {
            self.store(module, Entry::new(content.clone()))?;
        }

        Ok(content)
    }

    fn store(&mut self, module: &str, entry: Entry) -> KilnResult<()> {
        if self.cache.set(module, entry.into())? {
            if let Err(e) = self.cache.persist() {
                warn!(module, backend = self.cache.name(), error = %e, "failed to persist cache");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use kiln_core::{digest, CastError, KilnError};
    use kiln_storage::FileStore;
    use tempfile::TempDir;

    use crate::evaluator::Invocation;

    /// Answers every call with the same invocation and counts calls.
    struct FixedEvaluator {
        invocation: Invocation,
        calls: Cell<usize>,
    }

    impl FixedEvaluator {
        fn new(invocation: Invocation) -> Self {
            Self {
                invocation,
                calls: Cell::new(0),
            }
        }
    }

    impl Evaluator for FixedEvaluator {
        fn invoke(
            &self,
            _modules: &[&str],
            _format: OutputFormat,
        ) -> kiln_core::EvalResult<Invocation> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.invocation.clone())
        }

        fn version(&self) -> kiln_core::EvalResult<String> {
            Ok("Pkl 0.25.3".to_string())
        }
    }

    fn kiln_in(dir: &TempDir, stdout: &str) -> Kiln<FixedEvaluator> {
        let config = KilnConfig::new().with_cache_file(dir.path().join(".kiln.cache"));
        Kiln::with_evaluator(config, FixedEvaluator::new(Invocation::success(stdout)))
    }

    #[derive(Debug, PartialEq)]
    struct Flat {
        id: i64,
        name: String,
    }

    kiln_core::impl_castable!(Flat {
        id: scalar,
        name: scalar,
    });

    #[test]
    fn test_eval_caches_output() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let mut kiln = kiln_in(&dir, "{\"id\": 1, \"name\": \"a\"}\n");

        let first = kiln.eval("/nonexistent/simple.pkl").expect("eval");
        let second = kiln.eval("/nonexistent/simple.pkl").expect("eval");

        assert_eq!(first, second);
        assert_eq!(kiln.evaluator().calls.get(), 1);

        let mut file = PersistentCache::new(dir.path().join(".kiln.cache"));
        file.load().expect("load");
        let entry = file
            .entries()
            .and_then(|m| m.get("/nonexistent/simple.pkl"))
            .expect("cached");
        assert_eq!(entry.content, "{\"id\": 1, \"name\": \"a\"}");
        assert_eq!(entry.hash, digest(&entry.content));
    }

    #[test]
    fn test_disabled_cache_always_invokes() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let mut kiln = kiln_in(&dir, "{\"a\": 1}");
        kiln.set_cache_enabled(false);

        kiln.eval("/nonexistent/a.pkl").expect("eval");
        kiln.eval("/nonexistent/a.pkl").expect("eval");

        assert_eq!(kiln.evaluator().calls.get(), 2);
        assert!(!dir.path().join(".kiln.cache").exists());
    }

    #[test]
    fn test_tool_failure_is_not_swallowed() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let config = KilnConfig::new().with_cache_file(dir.path().join(".kiln.cache"));
        let mut kiln = Kiln::with_evaluator(
            config,
            FixedEvaluator::new(Invocation::failure(1, "Cannot find module `nope.pkl`")),
        );

        let err = kiln.eval("nope.pkl").expect_err("failing evaluator");
        match err {
            KilnError::Eval(EvalError::ToolInvocationFailure { status, stderr }) => {
                assert_eq!(status, 1);
                assert!(stderr.contains("nope.pkl"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!kiln.cache_mut().has("nope.pkl").expect("has"));
    }

    #[test]
    fn test_non_object_output_is_decode_error() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let mut kiln = kiln_in(&dir, "[1, 2]");
        let err = kiln.eval("/nonexistent/list.pkl").expect_err("not an object");
        assert!(matches!(err, KilnError::Eval(EvalError::Decode { .. })));
    }

    #[test]
    fn test_eval_as_and_eval_each() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let mut kiln = kiln_in(&dir, "{\"id\": 1, \"name\": \"a\"}");
        let flat: Flat = kiln.eval_as("/nonexistent/flat.pkl").expect("cast");
        assert_eq!(flat, Flat { id: 1, name: "a".to_string() });

        let err = kiln
            .eval_each::<Flat>("/nonexistent/flat.pkl")
            .expect_err("members are scalars");
        assert_eq!(
            err,
            KilnError::Cast(CastError::NotAnObject { key: "id".to_string() })
        );
    }

    #[test]
    fn test_warmup_count_mismatch() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let mut kiln = kiln_in(&dir, "{\"a\": 1}");
        let err = kiln.warmup(&["a.pkl", "b.pkl"]).expect_err("one document for two modules");
        assert_eq!(
            err,
            KilnError::Eval(EvalError::DocumentCount { expected: 2, got: 1 })
        );
    }

    #[test]
    fn test_set_cache_installs_store() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let mut kiln = kiln_in(&dir, "{\"a\": 1}");
        kiln.set_cache(FileStore::new(dir.path().join("other.cache")));
        assert_eq!(kiln.cache().name(), "file");

        kiln.eval("/nonexistent/a.pkl").expect("eval");
        assert!(dir.path().join("other.cache").exists());
        assert!(!dir.path().join(".kiln.cache").exists());
    }

    #[test]
    fn test_binary_version() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let kiln = kiln_in(&dir, "");
        assert_eq!(kiln.binary_version().expect("version"), "Pkl 0.25.3");
    }
}
