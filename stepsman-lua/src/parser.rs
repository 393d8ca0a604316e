//! Script parser
//!
//! Evaluates a Lua script in the sandbox and extracts its title and ordered
//! step definitions. Step bodies, if a script carries any, are never run.

use anyhow::{Context, Result};
use mlua::{Table, Value};
use stepsman_core::domain::script::{ScriptDefinition, ScriptError, ScriptParser, StepDefinition};

use crate::sandbox::create_sandbox;

/// Parse a script definition from Lua source code
///
/// # Errors
/// Returns an error if:
/// - The Lua source is invalid or does not return a table
/// - The `title` field is missing
/// - The `steps` field is missing, empty, or holds a step without a `name`
///
/// # Example
/// ```no_run
/// use stepsman_lua::parser::parse_script;
///
/// let source = r#"
///     return script.define {
///         title = "Upgrade database",
///         steps = {
///             script.step { name = "backup", description = "Take a snapshot" },
///             script.step { name = "migrate" },
///         },
///     }
/// "#;
///
/// let definition = parse_script(source)?;
/// assert_eq!(definition.steps.len(), 2);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn parse_script(source: &str) -> Result<ScriptDefinition> {
    let lua = create_sandbox().context("Failed to create script sandbox")?;

    let script: Table = lua
        .load(source)
        .eval()
        .context("Failed to evaluate script")?;

    let title: String = script
        .get("title")
        .context("Script must have a 'title' field")?;

    let steps = parse_steps(&script)?;

    Ok(ScriptDefinition { title, steps })
}

/// Parse the 'steps' field from the script table
fn parse_steps(script: &Table) -> Result<Vec<StepDefinition>> {
    let steps_table: Table = script
        .get("steps")
        .context("Script must have a 'steps' field")?;

    let mut steps = Vec::new();

    for (index, pair) in steps_table.sequence_values::<Table>().enumerate() {
        let step_table = pair.context("Failed to read step entry")?;

        let name: String = step_table
            .get("name")
            .with_context(|| format!("Step {} must have a 'name' field", index + 1))?;

        let description = match step_table.get::<Value>("description")? {
            Value::Nil => String::new(),
            Value::String(s) => s.to_str()?.to_string(),
            _ => {
                return Err(anyhow::anyhow!(
                    "Step '{}' has a non-string 'description'",
                    name
                ));
            }
        };

        steps.push(StepDefinition { name, description });
    }

    if steps.is_empty() {
        return Err(anyhow::anyhow!("Script must have at least one step"));
    }

    Ok(steps)
}

/// [`ScriptParser`] backed by the Lua sandbox
#[derive(Debug, Clone, Copy, Default)]
pub struct LuaScriptParser;

impl ScriptParser for LuaScriptParser {
    fn parse(&self, source: &str) -> std::result::Result<ScriptDefinition, ScriptError> {
        parse_script(source).map_err(|e| ScriptError::new(format!("{:#}", e)))
    }
}
