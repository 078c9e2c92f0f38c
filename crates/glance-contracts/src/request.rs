use std::fmt;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::DispatchError;
use crate::providers::{Provider, ProviderConfig};

#[derive(Clone, PartialEq, Eq)]
pub enum ImageSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl ImageSource {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    pub fn read(&self) -> Result<Vec<u8>, DispatchError> {
        match self {
            Self::Path(path) => std::fs::read(path)
                .map_err(|err| DispatchError::IoError(format!("{}: {err}", path.display()))),
            Self::Bytes(bytes) if bytes.is_empty() => {
                Err(DispatchError::IoError("no image bytes available".to_string()))
            }
            Self::Bytes(bytes) => Ok(bytes.clone()),
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::Path(path) => Some(path.as_path()),
            Self::Bytes(_) => None,
        }
    }
}

impl fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
        }
    }
}

/// One image + prompt query, frozen at construction.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    id: Uuid,
    config: ProviderConfig,
    image: ImageSource,
    prompt: String,
}

impl DispatchRequest {
    pub fn new(
        config: ProviderConfig,
        image: ImageSource,
        prompt: impl Into<String>,
    ) -> Result<Self, DispatchError> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(DispatchError::InvalidConfig(
                "prompt must not be empty".to_string(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            config,
            image,
            prompt,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn provider(&self) -> Provider {
        self.config.provider
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn image(&self) -> &ImageSource {
        &self.image
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProviderConfig {
        ProviderConfig::new(Provider::OpenAi, Some("http://localhost/v1".to_string()), "key")
    }

    #[test]
    fn empty_prompt_is_rejected() {
        let err = DispatchRequest::new(config(), ImageSource::Bytes(vec![1]), "   ")
            .err()
            .map(|err| err.category());
        assert_eq!(err, Some("invalid_config"));
    }

    #[test]
    fn each_request_gets_its_own_id() -> anyhow::Result<()> {
        let a = DispatchRequest::new(config(), ImageSource::Bytes(vec![1]), "what?")?;
        let b = DispatchRequest::new(config(), ImageSource::Bytes(vec![1]), "what?")?;
        assert_ne!(a.id(), b.id());
        assert_eq!(a.provider(), Provider::OpenAi);
        assert_eq!(a.prompt(), "what?");
        Ok(())
    }

    #[test]
    fn request_keeps_its_config_copy() -> anyhow::Result<()> {
        let mut live = config();
        let request = DispatchRequest::new(live.clone(), ImageSource::Bytes(vec![1]), "q")?;
        live.provider = Provider::Gemini;
        live.endpoint = None;
        assert_eq!(request.provider(), Provider::OpenAi);
        assert_eq!(request.config().endpoint_str(), "http://localhost/v1");
        Ok(())
    }

    #[test]
    fn missing_path_reads_as_io_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let source = ImageSource::path(temp.path().join("nope.png"));
        let err = source.read().err().map(|err| err.category());
        assert_eq!(err, Some("io_error"));
        assert!(source.as_path().is_some());
        Ok(())
    }

    #[test]
    fn empty_byte_source_reads_as_io_error() {
        let err = ImageSource::Bytes(Vec::new())
            .read()
            .err()
            .map(|err| err.category());
        assert_eq!(err, Some("io_error"));
    }

    #[test]
    fn path_source_reads_file_bytes() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("shot.png");
        std::fs::write(&path, b"bytes")?;
        assert_eq!(ImageSource::path(&path).read()?, b"bytes".to_vec());
        Ok(())
    }
}
