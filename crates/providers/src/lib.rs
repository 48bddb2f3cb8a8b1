//! Concrete tools and the Gemini decision backend for Stepwise workflows.
//!
//! Every tool classifies its own failures: network errors, timeouts, HTTP 429 and 5xx are
//! retryable, everything else is not. Credentials arrive as arguments merged from the
//! step's bound configuration and are left out of the descriptors shown to the decision
//! function; nothing here reads the process environment.

use std::sync::Arc;

use stepwise_engine::ToolRegistry;

pub mod apollo;
pub mod clay;
pub mod gemini;
pub mod http;
pub mod pdl;
pub mod sendgrid;
pub mod sheets;

#[cfg(test)]
mod testing;

pub use apollo::{SearchApollo, TrackApolloCampaign};
pub use clay::SearchClay;
pub use gemini::GeminiDecisionFunction;
pub use http::HttpClient;
pub use pdl::EnrichWithPdl;
pub use sendgrid::SendEmailSendgrid;
pub use sheets::WriteToGoogleSheet;

/// Registers every built-in tool under its canonical name.
pub fn register_builtin_tools(registry: &mut ToolRegistry, client: &HttpClient) {
    registry.register(Arc::new(SearchApollo::new(client.clone())), SearchApollo::descriptor());
    registry.register(Arc::new(SearchClay::new(client.clone())), SearchClay::descriptor());
    registry.register(Arc::new(EnrichWithPdl::new(client.clone())), EnrichWithPdl::descriptor());
    registry.register(Arc::new(SendEmailSendgrid::new(client.clone())), SendEmailSendgrid::descriptor());
    registry.register(Arc::new(TrackApolloCampaign::new(client.clone())), TrackApolloCampaign::descriptor());
    registry.register(Arc::new(WriteToGoogleSheet::new(client.clone())), WriteToGoogleSheet::descriptor());
}

/// A registry holding the built-in tools.
pub fn builtin_registry(client: &HttpClient) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    register_builtin_tools(&mut registry, client);
    registry
}
