use anyhow::{bail, Context, Result};
use std::path::PathBuf;

const DEFAULT_OLLAMA_HOST: &str = "http://127.0.0.1:11434";
const DEFAULT_MILVUS_ADDRESS: &str = "http://127.0.0.1:19530";
const DEFAULT_AZURE_API_VERSION: &str = "2024-02-15-preview";

/// Which backend serves a model-backed collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Ollama,
    OpenAI,
    Azure,
}

impl ProviderKind {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            "azure" | "azure-openai" => Ok(Self::Azure),
            other => bail!("Unknown provider '{}': expected ollama, openai or azure", other),
        }
    }
}

/// Credentials and routing for an OpenAI-compatible endpoint
#[derive(Debug, Clone)]
pub enum OpenAIEndpoint {
    OpenAI {
        base_url: String,
        api_key: String,
    },
    Azure {
        endpoint: String,
        api_key: String,
        api_version: String,
    },
}

impl OpenAIEndpoint {
    /// URL of an API operation such as `embeddings` or `chat/completions`.
    /// Azure routes by deployment name, OpenAI by the model in the request body.
    pub fn url(&self, operation: &str, model: &str) -> String {
        match self {
            OpenAIEndpoint::OpenAI { base_url, .. } => {
                format!("{}/{}", base_url.trim_end_matches('/'), operation)
            }
            OpenAIEndpoint::Azure {
                endpoint,
                api_version,
                ..
            } => format!(
                "{}/openai/deployments/{}/{}?api-version={}",
                endpoint.trim_end_matches('/'),
                model,
                operation,
                api_version
            ),
        }
    }

    pub fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            OpenAIEndpoint::OpenAI { api_key, .. } => {
                request.header("Authorization", format!("Bearer {}", api_key))
            }
            OpenAIEndpoint::Azure { api_key, .. } => request.header("api-key", api_key),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub explain_provider: ProviderKind,
    pub explain_model: String,
    pub embedding_provider: ProviderKind,
    pub embedding_model: String,
    pub ollama_host: String,
    pub openai: Option<OpenAIEndpoint>,
    pub azure: Option<OpenAIEndpoint>,
    pub milvus_address: String,
    pub snapshot_path: PathBuf,
    /// Files parsed concurrently while indexing
    pub index_concurrency: usize,
    pub explain_max_attempts: u32,
    /// Characters of the surrounding file handed to the explainer
    pub file_context_chars: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup so tests need not touch the process env.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let explain_provider = get("EXPLAIN_PROVIDER")
            .map(|v| ProviderKind::parse(&v))
            .transpose()?
            .unwrap_or(ProviderKind::Ollama);
        let embedding_provider = get("EMBEDDING_PROVIDER")
            .map(|v| ProviderKind::parse(&v))
            .transpose()?
            .unwrap_or(ProviderKind::Ollama);

        let openai = get("OPENAI_API_KEY").map(|api_key| OpenAIEndpoint::OpenAI {
            base_url: get("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key,
        });
        let azure = match (get("AZURE_OPENAI_API_KEY"), get("AZURE_OPENAI_ENDPOINT")) {
            (Some(api_key), Some(endpoint)) => Some(OpenAIEndpoint::Azure {
                endpoint,
                api_key,
                api_version: get("AZURE_OPENAI_API_VERSION")
                    .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
            }),
            _ => None,
        };

        let explain_model = match explain_provider {
            ProviderKind::Azure => get("AZURE_OPENAI_DEPLOYMENT"),
            _ => get("EXPLAIN_MODEL"),
        }
        .unwrap_or_else(|| default_explain_model(explain_provider).to_string());
        let embedding_model = match embedding_provider {
            ProviderKind::Azure => get("AZURE_OPENAI_EMBEDDING_MODEL"),
            _ => get("EMBEDDING_MODEL"),
        }
        .unwrap_or_else(|| default_embedding_model(embedding_provider).to_string());

        let snapshot_path = get("SNAPSHOT_PATH").map(PathBuf::from).unwrap_or_else(|| {
            let home = get("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".sas-code-context/snapshot.json")
        });

        let config = Self {
            explain_provider,
            explain_model,
            embedding_provider,
            embedding_model,
            ollama_host: get("OLLAMA_HOST").unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string()),
            openai,
            azure,
            milvus_address: get("MILVUS_ADDRESS")
                .unwrap_or_else(|| DEFAULT_MILVUS_ADDRESS.to_string()),
            snapshot_path,
            index_concurrency: parse_number(get("INDEX_CONCURRENCY"), "INDEX_CONCURRENCY", 8)?.max(1),
            explain_max_attempts: parse_number(get("EXPLAIN_MAX_ATTEMPTS"), "EXPLAIN_MAX_ATTEMPTS", 3)?
                .max(1),
            file_context_chars: parse_number(get("FILE_CONTEXT_CHARS"), "FILE_CONTEXT_CHARS", 6000)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (role, provider) in [
            ("EXPLAIN_PROVIDER", self.explain_provider),
            ("EMBEDDING_PROVIDER", self.embedding_provider),
        ] {
            match provider {
                ProviderKind::OpenAI if self.openai.is_none() => {
                    bail!("{}=openai requires OPENAI_API_KEY", role)
                }
                ProviderKind::Azure if self.azure.is_none() => {
                    bail!("{}=azure requires AZURE_OPENAI_API_KEY and AZURE_OPENAI_ENDPOINT", role)
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Endpoint for an OpenAI-compatible provider kind
    pub fn endpoint_for(&self, provider: ProviderKind) -> Option<&OpenAIEndpoint> {
        match provider {
            ProviderKind::OpenAI => self.openai.as_ref(),
            ProviderKind::Azure => self.azure.as_ref(),
            ProviderKind::Ollama => None,
        }
    }
}

fn default_explain_model(provider: ProviderKind) -> &'static str {
    match provider {
        ProviderKind::Ollama => "llama3.1",
        ProviderKind::OpenAI | ProviderKind::Azure => "gpt-4o-mini",
    }
}

fn default_embedding_model(provider: ProviderKind) -> &'static str {
    match provider {
        ProviderKind::Ollama => "nomic-embed-text",
        ProviderKind::OpenAI | ProviderKind::Azure => "text-embedding-ada-002",
    }
}

fn parse_number<T: std::str::FromStr>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(v) => v
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}: {}", key, v)),
        None => Ok(default),
    }
}
