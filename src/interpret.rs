// Turning an HTTP response into the line printed for the user.

use crate::error::{GsharerError, Result};
use crate::runtime::{PortableHandler, ScriptRuntime};
use mlua::Value;

/// Longest slice of a failing response body kept in the error.
pub const BODY_EXCERPT_CHARS: usize = 200;

/// How a job's response body becomes its result string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ResponseHandler {
    /// Body decoded as text, unchanged.
    #[default]
    Identity,
    /// Script function captured from the destination descriptor.
    Script(PortableHandler),
}

/// Runs response handlers inside one worker's runtime.
pub struct ResponseInterpreter<'rt> {
    runtime: &'rt ScriptRuntime,
}

impl<'rt> ResponseInterpreter<'rt> {
    pub fn new(runtime: &'rt ScriptRuntime) -> Self {
        Self { runtime }
    }

    /// Check the status, then hand the raw body to the handler.
    ///
    /// Any status of 300 or above fails with [`GsharerError::BadStatus`]
    /// before the handler is loaded or called.
    pub fn interpret(&self, handler: &ResponseHandler, status: u16, body: &[u8]) -> Result<String> {
        if status >= 300 {
            return Err(GsharerError::BadStatus {
                status,
                body: excerpt(body),
            });
        }

        match handler {
            ResponseHandler::Identity => Ok(String::from_utf8_lossy(body).into_owned()),
            ResponseHandler::Script(portable) => self.call_script(portable, body),
        }
    }

    fn call_script(&self, portable: &PortableHandler, body: &[u8]) -> Result<String> {
        let function = portable.rehydrate(self.runtime)?;
        let body = self
            .runtime
            .lua()
            .create_string(body)
            .map_err(|err| GsharerError::HandlerInvocation(err.to_string()))?;
        let returned: Value = function
            .call(body)
            .map_err(|err| GsharerError::HandlerInvocation(err.to_string()))?;

        match returned {
            Value::String(text) => Ok(String::from_utf8_lossy(&text.as_bytes()).into_owned()),
            Value::Integer(n) => Ok(n.to_string()),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(GsharerError::HandlerInvocation(format!(
                "{} returned a {}, expected a string or number",
                portable.origin(),
                other.type_name()
            ))),
        }
    }
}

fn excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    match text.char_indices().nth(BODY_EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.into_owned(),
    }
}
