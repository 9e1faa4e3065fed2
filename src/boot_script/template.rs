//! Minimal `{{NAME}}` placeholder substitution.

use std::collections::BTreeMap;

use thiserror::Error;

/// Errors raised while rendering a template.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TemplateError {
    /// A placeholder has no value.
    #[error("template `{template}` references unknown placeholder `{name}`")]
    Unresolved {
        /// Template being rendered.
        template: &'static str,
        /// Placeholder name.
        name: String,
    },
    /// A `{{` has no matching `}}`.
    #[error("template `{template}` has an unterminated placeholder")]
    Unterminated {
        /// Template being rendered.
        template: &'static str,
    },
}

/// Named template text.
#[derive(Clone, Copy, Debug)]
pub struct Template {
    name: &'static str,
    text: &'static str,
}

impl Template {
    /// Wraps static template text.
    #[must_use]
    pub const fn new(name: &'static str, text: &'static str) -> Self {
        Self { name, text }
    }

    /// Replaces every `{{NAME}}` with its value in a single pass.
    ///
    /// Substituted values are not scanned again, so they may contain braces.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError`] when a placeholder is unknown or unterminated.
    pub fn render(&self, values: &BTreeMap<&str, String>) -> Result<String, TemplateError> {
        let mut rendered = String::with_capacity(self.text.len());
        let mut rest = self.text;
        while let Some((before, after)) = rest.split_once("{{") {
            rendered.push_str(before);
            let (raw_name, tail) = after.split_once("}}").ok_or(TemplateError::Unterminated {
                template: self.name,
            })?;
            let name = raw_name.trim();
            let value = values.get(name).ok_or_else(|| TemplateError::Unresolved {
                template: self.name,
                name: name.to_owned(),
            })?;
            rendered.push_str(value);
            rest = tail;
        }
        rendered.push_str(rest);
        Ok(rendered)
    }
}
