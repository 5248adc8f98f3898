//! Process-wide cache of loaded models, keyed by model path.

use crate::error::Result;
use crate::face_processor::{FaceAnalyser, FaceParser, FaceSegmenter, OnnxFaceAnalyser};
use crate::face_swapper::{InSwapper, SwapEngine};
use crate::post_processor::{FaceRestorer, GfpganRestorer};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

/// Lazily loads each model once and hands out shared handles.
///
/// Loading happens under the cache lock, so concurrent callers asking for the
/// same model wait for one load instead of racing.
#[derive(Default)]
pub struct ModelRegistry {
    analysers: Mutex<HashMap<PathBuf, Arc<dyn FaceAnalyser>>>,
    engines: Mutex<HashMap<(PathBuf, PathBuf), Arc<dyn SwapEngine>>>,
    segmenters: Mutex<HashMap<PathBuf, Arc<dyn FaceSegmenter>>>,
    restorers: Mutex<HashMap<PathBuf, Arc<dyn FaceRestorer>>>,
}

static GLOBAL: OnceLock<ModelRegistry> = OnceLock::new();

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static ModelRegistry {
        GLOBAL.get_or_init(ModelRegistry::new)
    }

    /// Detector, recognizer and gender/age heads found in `model_dir`.
    pub fn analyser(&self, model_dir: &Path) -> Result<Arc<dyn FaceAnalyser>> {
        self.analyser_with(model_dir, || Ok(Arc::new(OnnxFaceAnalyser::load(model_dir)?)))
    }

    pub fn analyser_with(
        &self,
        key: &Path,
        load: impl FnOnce() -> Result<Arc<dyn FaceAnalyser>>,
    ) -> Result<Arc<dyn FaceAnalyser>> {
        cached(&self.analysers, key.to_path_buf(), load)
    }

    pub fn swap_engine(&self, model_path: &Path, emap_path: &Path) -> Result<Arc<dyn SwapEngine>> {
        self.swap_engine_with(model_path, emap_path, || {
            Ok(Arc::new(InSwapper::new(model_path, emap_path)?))
        })
    }

    pub fn swap_engine_with(
        &self,
        model_path: &Path,
        emap_path: &Path,
        load: impl FnOnce() -> Result<Arc<dyn SwapEngine>>,
    ) -> Result<Arc<dyn SwapEngine>> {
        cached(
            &self.engines,
            (model_path.to_path_buf(), emap_path.to_path_buf()),
            load,
        )
    }

    pub fn segmenter(&self, model_path: &Path) -> Result<Arc<dyn FaceSegmenter>> {
        cached(&self.segmenters, model_path.to_path_buf(), || {
            Ok(Arc::new(FaceParser::new(model_path)?))
        })
    }

    /// GFPGAN restorer; with an analyser it restores face by face.
    pub fn restorer(
        &self,
        model_path: &Path,
        analyser: Option<Arc<dyn FaceAnalyser>>,
    ) -> Result<Arc<dyn FaceRestorer>> {
        cached(&self.restorers, model_path.to_path_buf(), || {
            let restorer = GfpganRestorer::new(model_path)?;
            Ok(Arc::new(match analyser {
                Some(analyser) => restorer.with_analyser(analyser),
                None => restorer,
            }))
        })
    }

    /// Number of cached models of every kind.
    pub fn len(&self) -> usize {
        self.analysers.lock().len()
            + self.engines.lock().len()
            + self.segmenters.lock().len()
            + self.restorers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached model. Handles already given out stay valid.
    pub fn reset(&self) {
        self.analysers.lock().clear();
        self.engines.lock().clear();
        self.segmenters.lock().clear();
        self.restorers.lock().clear();
        tracing::debug!("model registry cleared");
    }
}

fn cached<K, V>(cache: &Mutex<HashMap<K, Arc<V>>>, key: K, load: impl FnOnce() -> Result<Arc<V>>) -> Result<Arc<V>>
where
    K: Eq + Hash + std::fmt::Debug,
    V: ?Sized,
{
    let mut cache = cache.lock();
    if let Some(model) = cache.get(&key) {
        return Ok(Arc::clone(model));
    }
    tracing::info!(model = ?key, "loading model");
    let model = load()?;
    cache.insert(key, Arc::clone(&model));
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SwapError;
    use crate::testing::{fixed_analyser, StubEngine};
    use std::cell::Cell;

    #[test]
    fn test_loads_once_per_key() {
        let registry = ModelRegistry::new();
        let loads = Cell::new(0);
        let load = || -> Result<Arc<dyn FaceAnalyser>> {
            loads.set(loads.get() + 1);
            Ok(Arc::new(fixed_analyser(Vec::new())))
        };

        let a = registry.analyser_with(Path::new("models/a"), load).unwrap();
        let b = registry.analyser_with(Path::new("models/a"), load).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(loads.get(), 1);

        registry.analyser_with(Path::new("models/b"), load).unwrap();
        assert_eq!(loads.get(), 2);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_failed_load_is_not_cached() {
        let registry = ModelRegistry::new();
        let err = registry.swap_engine_with(Path::new("swap.onnx"), Path::new("swap.emap"), || {
            Err(SwapError::model_load("swap.onnx", "missing"))
        });
        assert!(matches!(err, Err(SwapError::ModelLoad { .. })));
        assert!(registry.is_empty());

        registry
            .swap_engine_with(Path::new("swap.onnx"), Path::new("swap.emap"), || {
                Ok(Arc::new(StubEngine::echo(128, 4)))
            })
            .unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reset_forces_reload() {
        let registry = ModelRegistry::new();
        let first = registry
            .analyser_with(Path::new("m"), || Ok(Arc::new(fixed_analyser(Vec::new()))))
            .unwrap();
        registry.reset();
        assert!(registry.is_empty());
        let second = registry
            .analyser_with(Path::new("m"), || Ok(Arc::new(fixed_analyser(Vec::new()))))
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_missing_model_file_fails_to_load() {
        let registry = ModelRegistry::new();
        assert!(registry.segmenter(Path::new("/nonexistent/face_parsing.onnx")).is_err());
        assert!(registry.is_empty());
    }
}
