//! Template rendering for `kind = "template"` file entries.
use std::path::Path;

use handlebars::Handlebars;

use crate::error::FileOpError;

/// Renders a template source against a JSON context.
pub trait TemplateRenderer: Send + Sync {
    /// Render the template at `source`.
    ///
    /// # Errors
    ///
    /// Returns [`FileOpError::Render`] if the source cannot be read or the
    /// template references missing variables.
    fn render(&self, source: &Path, context: &serde_json::Value) -> Result<String, FileOpError>;
}

/// Handlebars renderer in strict mode without HTML escaping.
#[derive(Debug)]
pub struct HandlebarsRenderer {
    handlebars: Handlebars<'static>,
}

impl HandlebarsRenderer {
    /// Create a renderer.
    #[must_use]
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars.register_escape_fn(handlebars::no_escape);
        Self { handlebars }
    }
}

impl Default for HandlebarsRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer for HandlebarsRenderer {
    fn render(&self, source: &Path, context: &serde_json::Value) -> Result<String, FileOpError> {
        let template = std::fs::read_to_string(source).map_err(|e| FileOpError::Render {
            path: source.to_path_buf(),
            message: e.to_string(),
        })?;
        self.handlebars
            .render_template(&template, context)
            .map_err(|e| FileOpError::Render {
                path: source.to_path_buf(),
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template(body: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.hbs");
        std::fs::write(&path, body).unwrap();
        (dir, path)
    }

    #[test]
    fn renders_nested_values() {
        let (_dir, path) = template("[user]\n  name = {{user.name}}\n  os = {{os}}\n");
        let out = HandlebarsRenderer::new()
            .render(&path, &json!({"user": {"name": "Ada"}, "os": "linux"}))
            .unwrap();
        assert_eq!(out, "[user]\n  name = Ada\n  os = linux\n");
    }

    #[test]
    fn does_not_html_escape() {
        let (_dir, path) = template("{{value}}");
        let out = HandlebarsRenderer::new()
            .render(&path, &json!({"value": "<a & b>"}))
            .unwrap();
        assert_eq!(out, "<a & b>");
    }

    #[test]
    fn missing_variable_is_an_error() {
        let (_dir, path) = template("{{nope}}");
        let err = HandlebarsRenderer::new()
            .render(&path, &json!({}))
            .unwrap_err();
        assert!(matches!(err, FileOpError::Render { .. }));
    }

    #[test]
    fn missing_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = HandlebarsRenderer::new()
            .render(&dir.path().join("absent.hbs"), &json!({}))
            .unwrap_err();
        assert!(err.to_string().contains("absent.hbs"));
    }
}
