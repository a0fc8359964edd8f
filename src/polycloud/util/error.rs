/*
 * Copyright (C) 2025 The Polycloud Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::error::Error;
use std::fmt;

/// Infrastructure-level error used by the keyspace and other plumbing.
/// Carries either a bare message or a message wrapping an underlying cause.
#[derive(Debug)]
enum PlumbingError {
    Message(String),
    Context {
        context: String,
        source: Box<dyn Error + Send + Sync>,
    },
}

impl fmt::Display for PlumbingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlumbingError::Message(message) => write!(f, "{}", message),
            PlumbingError::Context { context, source } => write!(f, "{}: {}", context, source),
        }
    }
}

impl Error for PlumbingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PlumbingError::Message(_) => None,
            PlumbingError::Context { source, .. } => Some(source.as_ref()),
        }
    }
}

pub fn new_error(message: impl Into<String>) -> Box<dyn Error + Send + Sync> {
    Box::new(PlumbingError::Message(message.into()))
}

pub fn with_context<E>(error: E, context: impl Into<String>) -> Box<dyn Error + Send + Sync>
where
    E: Into<Box<dyn Error + Send + Sync>>,
{
    Box::new(PlumbingError::Context {
        context: context.into(),
        source: error.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_preserves_source_chain() {
        let inner = new_error("disk full");
        let wrapped = with_context(inner, "failed to persist entry");
        assert_eq!(wrapped.to_string(), "failed to persist entry: disk full");
        assert!(wrapped.source().is_some());
    }

    #[test]
    fn bare_message_has_no_source() {
        let err = new_error("boom");
        assert_eq!(err.to_string(), "boom");
        assert!(err.source().is_none());
    }
}
