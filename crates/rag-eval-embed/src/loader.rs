//! Model factory: picks and constructs one adapter from a [`LoadRequest`].

use std::path::{Path, PathBuf};

use tracing::info;

use rag_eval_core::{EmbeddingModel, EncoderSettings, HubType, LoadRequest, RagError, Result};

use crate::api::ApiEmbeddingModel;
use crate::bi_encoder::SentenceTransformerModel;
use crate::cross_encoder::CrossEncoderModel;
use crate::modelscope::ModelScopeDownloader;
use crate::runtime::ModelDownloader;

/// Constructors for the concrete adapters.
///
/// The factory only decides which one to build; tests swap in a backend
/// that needs neither model files nor network.
pub trait ModelBackends {
    fn bi_encoder(&self, request: &LoadRequest, path: &str) -> Result<SentenceTransformerModel>;

    fn cross_encoder(&self, request: &LoadRequest, path: &str) -> Result<CrossEncoderModel>;

    fn api(&self, request: &LoadRequest, model_name: &str) -> Result<ApiEmbeddingModel>;

    /// Materialize a hub model locally.
    fn download(&self, model_id: &str, revision: Option<&str>) -> Result<PathBuf>;
}

/// ONNX runtimes, the HTTP client and the ModelScope hub.
#[derive(Debug, Default)]
pub struct DefaultBackends;

impl ModelBackends for DefaultBackends {
    fn bi_encoder(&self, request: &LoadRequest, path: &str) -> Result<SentenceTransformerModel> {
        let settings = EncoderSettings::new(path, request.revision.clone(), &request.options);
        SentenceTransformerModel::new(settings, request.options.pooling_mode)
    }

    fn cross_encoder(&self, request: &LoadRequest, path: &str) -> Result<CrossEncoderModel> {
        let settings = EncoderSettings::new(path, request.revision.clone(), &request.options);
        CrossEncoderModel::new(settings)
    }

    fn api(&self, request: &LoadRequest, model_name: &str) -> Result<ApiEmbeddingModel> {
        ApiEmbeddingModel::new(model_name, request.revision.clone(), &request.options)
    }

    fn download(&self, model_id: &str, revision: Option<&str>) -> Result<PathBuf> {
        ModelScopeDownloader::new()?.download(model_id, revision)
    }
}

/// The adapter the factory selected.
#[derive(Debug)]
pub enum LoadedModel {
    BiEncoder(SentenceTransformerModel),
    CrossEncoder(CrossEncoderModel),
    Api(ApiEmbeddingModel),
}

impl LoadedModel {
    /// The common contract of the selected adapter.
    pub fn as_embedding_model(&self) -> &dyn EmbeddingModel {
        match self {
            Self::BiEncoder(model) => model,
            Self::CrossEncoder(model) => model,
            Self::Api(model) => model,
        }
    }

    pub fn as_cross_encoder(&self) -> Option<&CrossEncoderModel> {
        match self {
            Self::CrossEncoder(model) => Some(model),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.as_embedding_model().kind()
    }
}

/// Chooses an adapter and builds it through `B`.
#[derive(Debug, Default)]
pub struct ModelLoader<B = DefaultBackends> {
    backends: B,
}

impl<B: ModelBackends> ModelLoader<B> {
    pub fn new(backends: B) -> Self {
        Self { backends }
    }

    /// Build the adapter the request describes.
    ///
    /// A remote model name takes precedence over everything else. Otherwise a
    /// path missing locally is fetched from ModelScope (other hubs are never
    /// downloaded from), then the cross-encoder flag picks between the two
    /// local adapters.
    pub fn load(&self, request: &LoadRequest) -> Result<LoadedModel> {
        if let Some(model_name) = request.options.remote_model_name() {
            info!("Loading remote embedding model: {}", model_name);
            return Ok(LoadedModel::Api(self.backends.api(request, model_name)?));
        }

        let identifier = request.model_name_or_path.trim();
        if identifier.is_empty() {
            return Err(RagError::config(
                "a local model path or a remote model name is required",
            ));
        }

        let path = if !Path::new(identifier).exists() && request.hub == HubType::ModelScope {
            info!("Model {} not found locally, downloading from ModelScope", identifier);
            let local = self
                .backends
                .download(identifier, request.revision.as_deref())?;
            local.to_string_lossy().into_owned()
        } else {
            identifier.to_string()
        };

        if request.is_cross_encoder {
            info!("Loading cross-encoder model from {}", path);
            Ok(LoadedModel::CrossEncoder(
                self.backends.cross_encoder(request, &path)?,
            ))
        } else {
            info!("Loading sentence-transformer model from {}", path);
            Ok(LoadedModel::BiEncoder(self.backends.bi_encoder(request, &path)?))
        }
    }
}

/// Load with the default backends.
pub fn load_model(request: &LoadRequest) -> Result<LoadedModel> {
    ModelLoader::new(DefaultBackends).load(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{
        CallLog, MockDownloader, MockEmbeddingClient, MockPairScorer, MockSentenceEncoder,
    };

    /// Builds mock-backed adapters and records what was asked for.
    struct RecordingBackends {
        downloader: MockDownloader,
        built: CallLog<(&'static str, String)>,
    }

    impl RecordingBackends {
        fn new() -> Self {
            Self {
                downloader: MockDownloader::new("/cache/modelscope"),
                built: CallLog::default(),
            }
        }
    }

    impl ModelBackends for &RecordingBackends {
        fn bi_encoder(&self, request: &LoadRequest, path: &str) -> Result<SentenceTransformerModel> {
            self.built.lock().push(("bi", path.to_string()));
            let settings = EncoderSettings::new(path, request.revision.clone(), &request.options);
            SentenceTransformerModel::with_runtime(Box::new(MockSentenceEncoder::new(8)), settings)
        }

        fn cross_encoder(&self, request: &LoadRequest, path: &str) -> Result<CrossEncoderModel> {
            self.built.lock().push(("cross", path.to_string()));
            let settings = EncoderSettings::new(path, request.revision.clone(), &request.options);
            CrossEncoderModel::with_runtime(Box::new(MockPairScorer::new()), settings)
        }

        fn api(&self, request: &LoadRequest, model_name: &str) -> Result<ApiEmbeddingModel> {
            self.built.lock().push(("api", model_name.to_string()));
            let settings =
                EncoderSettings::new(model_name, request.revision.clone(), &request.options);
            ApiEmbeddingModel::with_client(
                Box::new(MockEmbeddingClient::new(model_name, 8)),
                settings,
            )
        }

        fn download(&self, model_id: &str, revision: Option<&str>) -> Result<PathBuf> {
            self.downloader.download(model_id, revision)
        }
    }

    #[test]
    fn test_model_name_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let backends = RecordingBackends::new();
        let downloads = backends.downloader.calls();

        let mut request = LoadRequest::local(dir.path().to_string_lossy());
        request.is_cross_encoder = true;
        request.options.model_name = Some("text-embedding-3-small".to_string());

        let model = ModelLoader::new(&backends).load(&request).unwrap();
        assert!(matches!(model, LoadedModel::Api(_)));
        assert_eq!(model.kind(), "ApiEmbeddingModel");
        assert_eq!(
            backends.built.lock()[0],
            ("api", "text-embedding-3-small".to_string())
        );
        assert!(downloads.lock().is_empty());
    }

    #[test]
    fn test_blank_model_name_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        let backends = RecordingBackends::new();

        let mut request = LoadRequest::local(dir.path().to_string_lossy());
        request.options.model_name = Some("  ".to_string());

        let model = ModelLoader::new(&backends).load(&request).unwrap();
        assert!(matches!(model, LoadedModel::BiEncoder(_)));
    }

    #[test]
    fn test_existing_path_is_not_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let backends = RecordingBackends::new();
        let downloads = backends.downloader.calls();
        let path = dir.path().to_string_lossy().into_owned();

        let model = ModelLoader::new(&backends)
            .load(&LoadRequest::local(path.clone()))
            .unwrap();

        assert!(matches!(model, LoadedModel::BiEncoder(_)));
        assert!(downloads.lock().is_empty());
        assert_eq!(backends.built.lock()[0], ("bi", path));
    }

    #[test]
    fn test_missing_path_downloads_once_from_modelscope() {
        let backends = RecordingBackends::new();
        let downloads = backends.downloader.calls();

        let mut request = LoadRequest::local("BAAI/bge-reranker-base");
        request.is_cross_encoder = true;
        request.revision = Some("v1.0".to_string());

        let model = ModelLoader::new(&backends).load(&request).unwrap();
        assert!(model.as_cross_encoder().is_some());

        assert_eq!(
            downloads.lock().as_slice(),
            &[("BAAI/bge-reranker-base".to_string(), Some("v1.0".to_string()))]
        );

        let expected = PathBuf::from("/cache/modelscope").join("BAAI/bge-reranker-base");
        assert_eq!(
            backends.built.lock()[0],
            ("cross", expected.to_string_lossy().into_owned())
        );
        assert_eq!(
            model.as_embedding_model().settings().revision.as_deref(),
            Some("v1.0")
        );
    }

    #[test]
    fn test_other_hub_never_downloads() {
        let backends = RecordingBackends::new();
        let downloads = backends.downloader.calls();

        let mut request = LoadRequest::local("sentence-transformers/all-MiniLM-L6-v2");
        request.hub = HubType::HuggingFace;

        let model = ModelLoader::new(&backends).load(&request).unwrap();
        assert!(matches!(model, LoadedModel::BiEncoder(_)));
        assert!(downloads.lock().is_empty());
        assert_eq!(
            backends.built.lock()[0].1,
            "sentence-transformers/all-MiniLM-L6-v2"
        );
    }

    #[test]
    fn test_empty_identifier_is_config_error() {
        let backends = RecordingBackends::new();
        let err = ModelLoader::new(&backends)
            .load(&LoadRequest::local(""))
            .unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
        assert!(backends.built.lock().is_empty());
    }

    #[test]
    fn test_loaded_model_contract() {
        let dir = tempfile::tempdir().unwrap();
        let backends = RecordingBackends::new();
        let model = ModelLoader::new(&backends)
            .load(&LoadRequest::local(dir.path().to_string_lossy()))
            .unwrap();

        let vectors = model
            .as_embedding_model()
            .embed_documents(&["a".to_string()])
            .unwrap();
        assert_eq!(vectors[0].len(), 8);
        assert!(model.as_cross_encoder().is_none());
    }
}
