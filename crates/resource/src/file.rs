//! The built-in `file.content` resource
//!
//! Ensures a file exists with exactly the given content. This is the
//! reference resource implementation; richer resource packs register their
//! own kinds through the registry.

use crate::renderer::Renderer;
use crate::status::{Diff, TaskStatus};
use crate::value::Value;
use crate::{Preparer, Task};
use anyhow::{Context, bail};
use indexmap::IndexMap;
use log::debug;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

/// Declaration-shaped value carrying raw template strings
#[derive(Debug, Clone)]
pub struct FileContentPreparer {
    pub destination: String,
    pub content: String,
}

impl FileContentPreparer {
    pub fn from_args(args: &IndexMap<String, Value>) -> anyhow::Result<Self> {
        let destination = args
            .get("destination")
            .context("file.content requires a destination")?
            .as_str()?;
        let content = match args.get("content") {
            Some(value) => value.as_str()?,
            None => String::new(),
        };
        Ok(Self {
            destination,
            content,
        })
    }
}

impl Preparer for FileContentPreparer {
    fn prepare(&self, r: &Renderer) -> anyhow::Result<Box<dyn Task>> {
        let destination = r.render("destination", &self.destination)?;
        if destination.is_empty() {
            bail!("destination rendered to an empty string");
        }
        let content = r.render("content", &self.content)?;
        Ok(Box::new(FileContent {
            destination: PathBuf::from(destination),
            content,
        }))
    }
}

/// Prepared file-content task with rendered values
#[derive(Debug, Clone)]
pub struct FileContent {
    pub destination: PathBuf,
    pub content: String,
}

impl FileContent {
    /// Current file content; a path that cannot exist yet (missing file,
    /// missing or non-directory parent) reads as empty
    fn current(&self) -> anyhow::Result<String> {
        match fs::read_to_string(&self.destination) {
            Ok(content) => Ok(content),
            Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
                Ok(String::new())
            }
            Err(err) => {
                Err(err).with_context(|| format!("reading {}", self.destination.display()))
            }
        }
    }
}

impl Task for FileContent {
    fn check(&self, _r: &Renderer) -> anyhow::Result<TaskStatus> {
        if self.destination.is_dir() {
            return Ok(TaskStatus::cant_change(format!(
                "{} is a directory",
                self.destination.display()
            )));
        }
        let current = self.current()?;
        Ok(TaskStatus::from_diffs(vec![Diff::new(
            "content",
            current,
            &self.content,
        )]))
    }

    fn apply(&self) -> anyhow::Result<TaskStatus> {
        let current = self.current()?;
        if current == self.content && self.destination.is_file() {
            return Ok(TaskStatus::no_change());
        }

        if let Some(parent) = self.destination.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        debug!("writing {} bytes to {}", self.content.len(), self.destination.display());
        fs::write(&self.destination, &self.content)
            .with_context(|| format!("writing {}", self.destination.display()))?;

        Ok(TaskStatus::no_change()
            .with_diff("content", current, &self.content)
            .with_output(format!(
                "wrote {} bytes to {}",
                self.content.len(),
                self.destination.display()
            )))
    }

    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "destination" => Some(Value::String(self.destination.display().to_string())),
            "content" => Some(Value::String(self.content.clone())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::{Environment, NoLookups, Scope};
    use graph::{CancelToken, NodeId};
    use tempfile::TempDir;

    #[test]
    fn test_check_missing_file_diffs_from_empty() {
        let dir = TempDir::new().unwrap();
        let task = FileContent {
            destination: dir.path().join("x"),
            content: "hi".to_string(),
        };

        let scope = Scope::new();
        let env = Environment::empty();
        let r = Renderer::new(NodeId::root(), &scope, &NoLookups, &env, CancelToken::new());

        let status = task.check(&r).unwrap();
        assert!(status.has_changes());
        assert_eq!(status.diffs, vec![Diff::new("content", "", "hi")]);
    }

    #[test]
    fn test_apply_then_check_converges() {
        let dir = TempDir::new().unwrap();
        let task = FileContent {
            destination: dir.path().join("nested").join("x"),
            content: "hi".to_string(),
        };

        let applied = task.apply().unwrap();
        assert!(applied.output[0].contains("wrote 2 bytes"));
        assert_eq!(fs::read_to_string(task.destination.clone()).unwrap(), "hi");

        let scope = Scope::new();
        let env = Environment::empty();
        let r = Renderer::new(NodeId::root(), &scope, &NoLookups, &env, CancelToken::new());
        assert!(!task.check(&r).unwrap().has_changes());

        // Idempotent: a second apply is a no-op.
        let again = task.apply().unwrap();
        assert!(!again.has_changes());
        assert!(again.output.is_empty());
    }

    #[test]
    fn test_check_directory_destination_cant_change() {
        let dir = TempDir::new().unwrap();
        let task = FileContent {
            destination: dir.path().to_path_buf(),
            content: String::new(),
        };

        let scope = Scope::new();
        let env = Environment::empty();
        let r = Renderer::new(NodeId::root(), &scope, &NoLookups, &env, CancelToken::new());
        let status = task.check(&r).unwrap();
        assert_eq!(status.code, crate::StatusCode::CantChange);
    }

    #[test]
    fn test_preparer_renders_templates() {
        let dir = TempDir::new().unwrap();
        let mut scope = Scope::new();
        scope.define("who", Value::from("world"));
        scope.define("dest", Value::from(dir.path().join("greeting").display().to_string()));
        let env = Environment::empty();
        let r = Renderer::new(NodeId::root(), &scope, &NoLookups, &env, CancelToken::new());

        let mut args = IndexMap::new();
        args.insert("destination".to_string(), Value::from("{{param \"dest\"}}"));
        args.insert("content".to_string(), Value::from("hello {{param \"who\"}}"));
        let preparer = FileContentPreparer::from_args(&args).unwrap();

        let task = preparer.prepare(&r).unwrap();
        assert_eq!(task.field("content"), Some(Value::from("hello world")));
    }

    #[test]
    fn test_preparer_rejects_empty_destination() {
        let scope = Scope::new();
        let env = Environment::empty();
        let r = Renderer::new(NodeId::root(), &scope, &NoLookups, &env, CancelToken::new());

        let mut args = IndexMap::new();
        args.insert("destination".to_string(), Value::from(""));
        let preparer = FileContentPreparer::from_args(&args).unwrap();
        assert!(preparer.prepare(&r).is_err());
    }

    #[test]
    fn test_missing_destination_arg_is_an_error() {
        let args = IndexMap::new();
        assert!(FileContentPreparer::from_args(&args).is_err());
    }
}
