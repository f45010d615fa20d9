use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use mlua::prelude::*;

use super::Declarations;
use super::globals;

/// Create a Lua runtime with the build script globals registered.
///
/// `require` also searches `lua/` next to the script.
pub fn create_runtime(decls: Rc<RefCell<Declarations>>, script_dir: &Path) -> LuaResult<Lua> {
  let lua = Lua::new();
  let package: LuaTable = lua.globals().get("package")?;
  let package_path = package.get::<String>("path")?;
  let lua_dir = script_dir.join("lua");
  package.set(
    "path",
    format!(
      "{dir}/?.lua;{dir}/?/init.lua;{}",
      package_path,
      dir = lua_dir.to_string_lossy()
    ),
  )?;

  globals::register_globals(&lua, decls)?;
  Ok(lua)
}

/// Load and run a script file.
pub fn load_file(lua: &Lua, path: &Path) -> LuaResult<()> {
  let canonical_path = dunce::canonicalize(path)
    .map_err(|e| LuaError::external(format!("cannot canonicalize '{}': {}", path.display(), e)))?;
  let content = std::fs::read_to_string(&canonical_path)
    .map_err(|e| LuaError::external(format!("cannot read '{}': {}", canonical_path.display(), e)))?;

  lua
    .load(&content)
    .set_name(format!("@{}", canonical_path.display()))
    .exec()
}
