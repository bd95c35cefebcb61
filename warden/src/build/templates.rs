//! Build descriptors per runtime, rendered with minijinja

use std::path::Path;

use minijinja::{context, Environment};

use crate::errors::WardenError;
use crate::filesys::file::File;
use crate::utils::lower_trim;

/// File the generated entrypoint is written to inside the build context
pub const ENTRYPOINT_FILE: &str = "warden_entrypoint.py";

const PYTHON_DOCKERFILE: &str = include_str!("../../templates/python/Dockerfile.j2");
const PYTHON_ENTRYPOINT: &str = include_str!("../../templates/python/entrypoint.py.j2");

/// A rendered file, relative to the build context root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    pub name: String,
    pub contents: String,
}

/// Embedded runtime templates
pub struct Templates {
    env: Environment<'static>,
}

impl Templates {
    pub fn new() -> Result<Self, WardenError> {
        let mut env = Environment::new();
        env.set_keep_trailing_newline(true);
        env.add_template("python/Dockerfile", PYTHON_DOCKERFILE)
            .map_err(|e| WardenError::TemplateError(format!("python/Dockerfile: {}", e)))?;
        env.add_template("python/entrypoint", PYTHON_ENTRYPOINT)
            .map_err(|e| WardenError::TemplateError(format!("python/entrypoint: {}", e)))?;
        Ok(Self { env })
    }

    /// Canonical runtime name, `None` for unsupported runtimes
    pub fn normalize_runtime(runtime: &str) -> Option<&'static str> {
        match lower_trim(runtime).as_str() {
            "python" | "python3" => Some("python"),
            _ => None,
        }
    }

    /// Split a `module.function` handler
    pub fn handler_parts(handler: &str) -> Result<(&str, &str), WardenError> {
        let handler = handler.trim();
        match handler.rsplit_once('.') {
            Some((module, function)) if !module.is_empty() && !function.is_empty() => {
                Ok((module, function))
            }
            _ => Err(WardenError::ValidationError(format!(
                "handler '{}' must have the form module.function",
                handler
            ))),
        }
    }

    /// Render the build descriptor and entrypoint for `runtime`
    pub fn render(&self, runtime: &str, handler: &str) -> Result<Vec<RenderedFile>, WardenError> {
        let runtime = Self::normalize_runtime(runtime).ok_or_else(|| {
            WardenError::ValidationError(format!("Unknown runtime environment: {}", runtime))
        })?;
        let (module, function) = Self::handler_parts(handler)?;

        let ctx = context! {
            entrypoint => ENTRYPOINT_FILE,
            module => module,
            function => function,
        };
        let render = |name: &str| -> Result<String, WardenError> {
            let template_name = format!("{}/{}", runtime, name);
            self.env
                .get_template(&template_name)
                .and_then(|tmpl| tmpl.render(&ctx))
                .map_err(|e| WardenError::TemplateError(format!("{}: {}", template_name, e)))
        };

        Ok(vec![
            RenderedFile {
                name: "Dockerfile".to_string(),
                contents: render("Dockerfile")?,
            },
            RenderedFile {
                name: ENTRYPOINT_FILE.to_string(),
                contents: render("entrypoint")?,
            },
        ])
    }

    /// Render into `dir`, overwriting files of the same name
    pub async fn write_to(&self, dir: &Path, runtime: &str, handler: &str) -> Result<(), WardenError> {
        for rendered in self.render(runtime, handler)? {
            File::new(dir.join(&rendered.name))
                .write_string(&rendered.contents)
                .await?;
        }
        Ok(())
    }
}
