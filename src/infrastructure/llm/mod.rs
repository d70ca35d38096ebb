//! LLM provider implementations and the workflow capabilities built on them

mod capabilities;
mod factory;
mod http_client;
mod openai;
mod stub;

pub use capabilities::{LlmFieldExtractor, LlmMessageGenerator};
pub use factory::CapabilitiesFactory;
pub use http_client::{HttpClient, HttpClientTrait};
pub use openai::OpenAiProvider;
pub use stub::StubCapabilities;
