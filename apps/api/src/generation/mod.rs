// Description generation: request validation, prompt building, and the
// streamed relay of provider output to the caller.
// All LLM calls go through llm_client; nothing here talks to a provider directly.

pub mod builder;
pub mod context;
pub mod events;
pub mod handlers;
pub mod models;
pub mod prompts;
pub mod relay;
pub mod templates;
