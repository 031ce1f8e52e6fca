//! YAML loader for project definitions
//!
//! A project file maps flow names to lists of step entries. Each entry carries
//! exactly one of `run` (a command line, tokenized here) or `echo` (a message).

use crate::error::{FlowrunError, Result};
use crate::models::*;
use crate::tokenizer::tokenize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name looked up when a project path points at a directory
pub const PROJECT_FILE_NAME: &str = "flowrun.yml";

/// Turn a user-supplied project location into an absolute project file path.
///
/// A directory resolves to `<dir>/flowrun.yml`; relative paths are resolved
/// against the current working directory.
pub fn resolve_project_path<P: AsRef<Path>>(path: P) -> Result<PathBuf> {
    let mut path = path.as_ref().to_path_buf();

    if path.is_dir() {
        path.push(PROJECT_FILE_NAME);
    }

    if path.is_relative() {
        path = std::env::current_dir()?.join(path);
    }

    Ok(path)
}

/// Load a project definition from a YAML file.
///
/// Every flow in the definition runs in the directory containing the file.
///
/// # Errors
///
/// * `FlowrunError::Io` - If the file cannot be read
/// * `FlowrunError::YamlSizeExceeded` - If the file exceeds 1MB
/// * `FlowrunError::YamlParse` - If the YAML is malformed
/// * `FlowrunError::InvalidStep` - If a step has neither or both of `run`/`echo`
/// * `FlowrunError::InvalidRunLine` - If a `run` line has an unterminated quote
///
/// # Example
///
/// ```no_run
/// use flowrun::parser::parse_project_file;
///
/// let definition = parse_project_file("/srv/app/flowrun.yml")?;
/// for name in definition.flows.keys() {
///     println!("{}", name);
/// }
/// # Ok::<(), flowrun::error::FlowrunError>(())
/// ```
pub fn parse_project_file<P: AsRef<Path>>(path: P) -> Result<Definition> {
    let path = resolve_project_path(path)?;
    let content = fs::read_to_string(&path)?;
    parse_project_yaml(&content, path)
}

/// Parse a project definition from YAML content.
///
/// `path` is recorded as the definition's location and its parent directory
/// becomes the working directory of every flow.
///
/// # Example
///
/// ```
/// use flowrun::models::Step;
/// use flowrun::parser::parse_project_yaml;
///
/// let yaml = r#"
/// name: demo
/// flows:
///   greet:
///     - echo: hello
///     - run: ls -la
/// "#;
///
/// let definition = parse_project_yaml(yaml, "/srv/demo/flowrun.yml")?;
/// let flow = definition.flow("greet").unwrap();
/// assert_eq!(flow.directory.to_str(), Some("/srv/demo"));
/// assert_eq!(flow.steps[0], Step::echo("hello"));
/// # Ok::<(), flowrun::error::FlowrunError>(())
/// ```
pub fn parse_project_yaml<P: Into<PathBuf>>(content: &str, path: P) -> Result<Definition> {
    if content.len() > MAX_YAML_SIZE {
        return Err(FlowrunError::YamlSizeExceeded(content.len()));
    }

    let path = path.into();
    let raw: ProjectDef = serde_yaml::from_str(content)?;
    let directory = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let mut flows = BTreeMap::new();
    for (flow_name, step_defs) in raw.flows {
        validate_flow_name(&flow_name)?;

        let steps = step_defs
            .iter()
            .enumerate()
            .map(|(index, def)| build_step(&flow_name, index, def))
            .collect::<Result<Vec<_>>>()?;

        debug!("Loaded flow '{}' with {} steps", flow_name, steps.len());

        flows.insert(
            flow_name.clone(),
            Flow {
                name: flow_name,
                directory: directory.clone(),
                steps,
            },
        );
    }

    Ok(Definition {
        name: raw.name,
        path,
        flows,
    })
}

fn build_step(flow: &str, index: usize, def: &StepDef) -> Result<Step> {
    let run = def.run.as_deref().filter(|s| !s.is_empty());
    let echo = def.echo.as_deref().filter(|s| !s.is_empty());

    match (run, echo) {
        (Some(line), None) => {
            let args = tokenize(line).map_err(|e| FlowrunError::InvalidRunLine {
                flow: flow.to_string(),
                index,
                source: Box::new(e),
            })?;
            // A run step needs at least the program
            if args.is_empty() {
                return Err(FlowrunError::InvalidStep {
                    flow: flow.to_string(),
                    index,
                });
            }
            Ok(Step::Run {
                line: line.to_string(),
                args,
            })
        }
        (None, Some(message)) => Ok(Step::echo(message)),
        _ => Err(FlowrunError::InvalidStep {
            flow: flow.to_string(),
            index,
        }),
    }
}

/// Validate flow name format and length
fn validate_flow_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(FlowrunError::Validation("Flow name cannot be empty".to_string()));
    }

    if name.len() > MAX_FLOW_NAME_LEN {
        return Err(FlowrunError::Validation(format!(
            "Flow name '{}' exceeds {} characters",
            name, MAX_FLOW_NAME_LEN
        )));
    }

    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
    {
        return Err(FlowrunError::Validation(format!(
            "Invalid flow name '{}': only alphanumeric, underscore, dash, dot and colon allowed",
            name
        )));
    }

    Ok(())
}
