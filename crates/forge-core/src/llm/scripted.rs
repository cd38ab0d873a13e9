//! In-process generation provider that replays fixed scripts.
//!
//! Each call to `stream` consumes the next queued script (or repeats the
//! fallback script once the queue is empty) and records the request it was
//! given. Used by tests and by `forge serve --provider scripted` for local
//! runs without provider credentials.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use forge_types::llm::{GenerationError, GenerationRequest, StreamEvent, Usage};

use super::provider::{GenerationProvider, GenerationStream};

/// One step of a scripted stream.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Yield a text fragment.
    Text(String),
    /// Yield a usage event.
    Usage(Usage),
    /// Sleep before the next step.
    Delay(Duration),
    /// End the stream with a provider error.
    Fail(String),
    /// End the stream with a content-filter rejection.
    Filtered(String),
    /// Never yield again.
    Hang,
}

pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Vec<ScriptStep>>>,
    fallback: Vec<ScriptStep>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedProvider {
    /// A provider that answers every request with `fallback`.
    pub fn new(fallback: Vec<ScriptStep>) -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            fallback,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A provider that echoes fixed text split into word-sized fragments.
    pub fn from_text(text: &str) -> Self {
        Self::new(text_steps(text))
    }

    /// Queue a script for the next unanswered request.
    pub fn push_script(&self, steps: Vec<ScriptStep>) {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.push_back(steps);
        }
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    fn next_script(&self) -> Vec<ScriptStep> {
        self.scripts
            .lock()
            .ok()
            .and_then(|mut scripts| scripts.pop_front())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Split text into fragments that keep their trailing whitespace.
pub fn text_steps(text: &str) -> Vec<ScriptStep> {
    text.split_inclusive(' ')
        .map(|fragment| ScriptStep::Text(fragment.to_string()))
        .collect()
}

impl GenerationProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted"
    }

    fn stream(&self, request: GenerationRequest) -> GenerationStream {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        let steps = self.next_script();

        Box::pin(async_stream::try_stream! {
            for step in steps {
                match step {
                    ScriptStep::Text(text) => {
                        yield StreamEvent::TextDelta { text };
                    }
                    ScriptStep::Usage(usage) => {
                        yield StreamEvent::Usage(usage);
                    }
                    ScriptStep::Delay(duration) => tokio::time::sleep(duration).await,
                    ScriptStep::Fail(message) => {
                        Err::<(), _>(GenerationError::Provider { message })?;
                    }
                    ScriptStep::Filtered(reason) => {
                        Err::<(), _>(GenerationError::ContentFiltered(reason))?;
                    }
                    ScriptStep::Hang => std::future::pending::<()>().await,
                }
            }
            yield StreamEvent::Done;
        })
    }
}
