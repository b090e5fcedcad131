pub mod http;
pub mod ollama;
pub mod protocol;
pub mod remote;

pub use ollama::{OllamaClient, DEFAULT_OLLAMA_URL};
pub use remote::{RemoteClient, DEFAULT_API_KEY_ENV, DEFAULT_REMOTE_URL};
