//! Normalizing whatever the guest threw

use rquickjs::{Ctx, Value};
use std::fmt;

use crate::heap::OUT_OF_MEMORY_MESSAGE;
use crate::marshal;

/// Fixed rendering for every flavor of native stack exhaustion
pub const STACK_OVERFLOW_MESSAGE: &str = "RangeError: Maximum call stack size exceeded";

const STACK_OVERFLOW_SIGNATURES: [&str; 3] = [
    "stack overflow",
    "maximum call stack size exceeded",
    "too much recursion",
];

/// A guest failure, classified by shape before it is rendered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestError {
    /// `throw 'message'`, or a host-side failure that only has text
    Text(String),
    /// Anything exposing `name` / `message`, usually an `Error`
    Structured {
        name: String,
        message: String,
        stack: Option<String>,
    },
    /// Any other thrown value, already serialized
    Opaque(String),
}

impl GuestError {
    /// Classify a thrown value.
    pub fn from_value<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> Self {
        if let Some(text) = value.as_string().and_then(|s| s.to_string().ok()) {
            return GuestError::Text(text);
        }

        if let Some(object) = value.as_object() {
            let name = object.get::<_, Option<String>>("name").ok().flatten();
            let message = object.get::<_, Option<String>>("message").ok().flatten();
            if name.is_some() || message.is_some() {
                let stack = object
                    .get::<_, Option<String>>("stack")
                    .ok()
                    .flatten()
                    .map(|stack| stack.trim_end().to_string())
                    .filter(|stack| !stack.is_empty());
                return GuestError::Structured {
                    name: name.unwrap_or_else(|| "Error".to_string()),
                    message: message.unwrap_or_default(),
                    stack,
                };
            }
        }

        let rendered = marshal::to_json(ctx, value).unwrap_or_else(|| marshal::describe(ctx, value));
        GuestError::Opaque(rendered)
    }

    /// Classify the failure of a VM call. A pending exception is taken off the
    /// context; other errors (loader failures, allocation failures) keep
    /// their host-side text.
    pub fn from_error<'js>(ctx: &Ctx<'js>, err: rquickjs::Error) -> Self {
        match err {
            rquickjs::Error::Exception => {
                let thrown = ctx.catch();
                Self::from_value(ctx, &thrown)
            }
            other => GuestError::Text(other.to_string()),
        }
    }

    /// Reclassify a failure that happened while the heap was exhausted. The
    /// budget interrupt and the bare `null` QuickJS leaves behind when it
    /// cannot even allocate its own error both become out-of-memory.
    pub fn on_exhausted_heap(self) -> Self {
        let exhausted = match &self {
            GuestError::Opaque(text) => text == "null" || text == "undefined",
            GuestError::Structured { name, message, .. } => {
                name == "InternalError" && (message == "interrupted" || message == "out of memory")
            }
            GuestError::Text(_) => false,
        };
        if exhausted {
            GuestError::Text(OUT_OF_MEMORY_MESSAGE.to_string())
        } else {
            self
        }
    }

    /// Final message written into `ExecutionResult::error`.
    pub fn message(&self) -> String {
        let rendered = match self {
            GuestError::Text(text) => text.clone(),
            GuestError::Opaque(json) => json.clone(),
            GuestError::Structured {
                name,
                message,
                stack,
            } => {
                let mut rendered = if message.is_empty() {
                    name.clone()
                } else {
                    format!("{name}: {message}")
                };
                if let Some(stack) = stack {
                    rendered.push('\n');
                    rendered.push_str(stack);
                }
                rendered
            }
        };

        if is_stack_overflow(&rendered) {
            STACK_OVERFLOW_MESSAGE.to_string()
        } else {
            rendered
        }
    }
}

impl fmt::Display for GuestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

fn is_stack_overflow(message: &str) -> bool {
    let lowered = message.to_lowercase();
    STACK_OVERFLOW_SIGNATURES
        .iter()
        .any(|signature| lowered.contains(signature))
}
