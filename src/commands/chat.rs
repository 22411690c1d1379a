//! `seq-llm chat`: one chat turn against a freshly started server.

use futures_util::StreamExt;

use crate::chat::{completion_text, ChatClient, ChatMessage, ChatRequest};
use crate::config::{Config, Profile};
use crate::display;

use super::{new_supervisor, CommandError, GlobalOptions, LaunchPlan};

/// Build the request for one user prompt, with the profile's system prompt
/// and sampling settings.
#[must_use]
pub fn chat_request(model: &str, profile: &Profile, prompt: &str) -> ChatRequest {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = profile.resolved_system_prompt() {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(prompt));

    ChatRequest::new(model, messages)
        .temperature(profile.temperature)
        .max_tokens(profile.max_tokens)
}

/// Start `profile`'s server, send `prompt`, print the reply and stop the
/// server again. Returns the reply text.
///
/// # Errors
///
/// Returns an error if the server fails to start, the request fails, or
/// the user interrupts.
pub async fn chat(
    config: &Config,
    profile: Option<&str>,
    prompt: &str,
    stream: bool,
    global: GlobalOptions,
) -> Result<String, CommandError> {
    let plan = LaunchPlan::resolve(config, profile)?;
    let name = plan.display_name();
    let api_key = plan.profile.api_key.as_deref();
    let request = chat_request(name, plan.profile, prompt);

    let mut supervisor = new_supervisor(config, global)?;
    supervisor
        .run_scoped(plan.command, plan.port, |endpoint| {
            tracing::info!(profile = name, base_url = %endpoint.base_url, stream, "Sending chat request");
            send_prompt(endpoint.base_url, api_key, &request, stream)
        })
        .await
}

async fn send_prompt(
    base_url: String,
    api_key: Option<&str>,
    request: &ChatRequest,
    stream: bool,
) -> Result<String, CommandError> {
    let client = ChatClient::new(&base_url, api_key)?;
    if !stream {
        let response = client.chat_completion(request).await?;
        let reply = completion_text(&response).unwrap_or_default();
        println!("{reply}");
        return Ok(reply);
    }

    let mut tokens = client.stream_chat(request).await?;
    let mut reply = String::new();
    while let Some(token) = tokens.next().await {
        let token = token?;
        display::print_token(&token);
        reply.push_str(&token);
    }
    display::finish_stream();
    Ok(reply)
}
