//! Stepsman Lua scripts
//!
//! Scripts are Lua files that return a table describing a procedure:
//!
//! ```lua
//! return script.define {
//!     title = "Upgrade database",
//!     steps = {
//!         script.step { name = "backup", description = "Take a snapshot" },
//!         script.step { name = "migrate", description = "Run schema migrations" },
//!     },
//! }
//! ```
//!
//! This crate provides the restricted sandbox used to evaluate them and the
//! parser that turns them into a `ScriptDefinition`.

pub mod parser;
pub mod sandbox;

pub use parser::{LuaScriptParser, parse_script};
pub use sandbox::create_sandbox;
