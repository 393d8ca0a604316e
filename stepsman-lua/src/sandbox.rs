//! Lua sandbox creation
//!
//! Scripts are evaluated only to read their structure (title and steps), so
//! the sandbox is restricted: no filesystem, network or process access, and no
//! way to load external code.
//!
//! The `script` helper module is always injected so scripts can use
//! `script.define { ... }`, `script.step { ... }` or the fluent builder.

use mlua::{Lua, LuaOptions, Result as LuaResult, StdLib, Table};

/// Create a restricted Lua sandbox
///
/// Only TABLE, STRING and MATH are loaded. IO, OS, PACKAGE and DEBUG are not,
/// and `require`, `dofile` and `loadfile` are removed.
///
/// # Example
/// ```no_run
/// use stepsman_lua::sandbox::create_sandbox;
///
/// let lua = create_sandbox()?;
/// let script: mlua::Table = lua
///     .load(r#"return script.define { title = "Upgrade", steps = {} }"#)
///     .eval()?;
/// let title: String = script.get("title")?;
/// # Ok::<(), mlua::Error>(())
/// ```
pub fn create_sandbox() -> LuaResult<Lua> {
    let lua = Lua::new_with(
        StdLib::TABLE | StdLib::STRING | StdLib::MATH,
        LuaOptions::default(),
    )?;

    lua.globals().set("require", mlua::Nil)?;
    lua.globals().set("dofile", mlua::Nil)?;
    lua.globals().set("loadfile", mlua::Nil)?;

    register_script_module(&lua)?;

    Ok(lua)
}

/// Register the `script` module
///
/// `define` and `step` are passthroughs that make scripts read declaratively.
fn register_script_module(lua: &Lua) -> LuaResult<()> {
    let script = lua.create_table()?;

    let define_fn = lua.create_function(|_, definition: Table| Ok(definition))?;
    script.set("define", define_fn)?;

    let step_fn = lua.create_function(|_, step: Table| Ok(step))?;
    script.set("step", step_fn)?;

    let builder_fn = lua.create_function(|lua, ()| create_script_builder(lua))?;
    script.set("builder", builder_fn)?;

    lua.globals().set("script", script)?;

    Ok(())
}

/// Create a script builder instance with fluent API methods
fn create_script_builder(lua: &Lua) -> LuaResult<Table> {
    let builder = lua.create_table()?;
    let metatable = lua.create_table()?;

    let title_fn = lua.create_function(|_, (builder, title): (Table, String)| {
        builder.set("_title", title)?;
        Ok(builder)
    })?;
    metatable.set("title", title_fn)?;

    // builder:step(name, description?)
    let step_fn = lua.create_function(
        |lua, (builder, name, description): (Table, String, Option<String>)| {
            let steps: Table = match builder.get::<Option<Table>>("_steps")? {
                Some(t) => t,
                None => {
                    let t = lua.create_table()?;
                    builder.set("_steps", t.clone())?;
                    t
                }
            };

            let step = lua.create_table()?;
            step.set("name", name)?;
            if let Some(description) = description {
                step.set("description", description)?;
            }

            let len = steps.raw_len() + 1;
            steps.set(len, step)?;
            Ok(builder)
        },
    )?;
    metatable.set("step", step_fn)?;

    let build_fn = lua.create_function(|lua, builder: Table| {
        let definition = lua.create_table()?;

        if let Some(title) = builder.get::<Option<String>>("_title")? {
            definition.set("title", title)?;
        }
        if let Some(steps) = builder.get::<Option<Table>>("_steps")? {
            definition.set("steps", steps)?;
        }

        Ok(definition)
    })?;
    metatable.set("build", build_fn)?;

    metatable.set("__index", metatable.clone())?;
    builder.set_metatable(Some(metatable))?;

    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_basic_lua() {
        let lua = create_sandbox().unwrap();

        let result: i32 = lua
            .load(
                r#"
                local t = {a = 1, b = 2}
                return t.a + t.b
            "#,
            )
            .eval()
            .unwrap();
        assert_eq!(result, 3);

        let result: String = lua.load(r#"return string.upper("hello")"#).eval().unwrap();
        assert_eq!(result, "HELLO");
    }

    #[test]
    fn test_sandbox_no_io() {
        let lua = create_sandbox().unwrap();

        let has_io: bool = lua.load(r#"return io ~= nil"#).eval().unwrap();
        assert!(!has_io);

        let has_os: bool = lua.load(r#"return os ~= nil"#).eval().unwrap();
        assert!(!has_os);
    }

    #[test]
    fn test_sandbox_no_require() {
        let lua = create_sandbox().unwrap();

        let result: LuaResult<()> = lua.load(r#"require("os")"#).exec();
        assert!(result.is_err());
    }

    #[test]
    fn test_script_define_is_passthrough() {
        let lua = create_sandbox().unwrap();

        let title: String = lua
            .load(
                r#"
            local def = script.define({ title = "Backup" })
            return def.title
        "#,
            )
            .eval()
            .unwrap();
        assert_eq!(title, "Backup");
    }

    #[test]
    fn test_script_builder() {
        let lua = create_sandbox().unwrap();

        let def: Table = lua
            .load(
                r#"
            return script.builder()
                :title("Rotate certificates")
                :step("issue", "Issue new certificates")
                :step("deploy")
                :build()
        "#,
            )
            .eval()
            .unwrap();

        let title: String = def.get("title").unwrap();
        assert_eq!(title, "Rotate certificates");

        let steps: Table = def.get("steps").unwrap();
        assert_eq!(steps.raw_len(), 2);
        let second: Table = steps.get(2).unwrap();
        let name: String = second.get("name").unwrap();
        assert_eq!(name, "deploy");
    }
}
