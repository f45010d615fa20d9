//! Global functions of the build script.
//!
//! - `package{...}` - declare a tool package
//! - `use(name [, options [, condition]])` - require a package; handles
//!   combine with `+` (add), `&` (and) and `|` (or)
//! - `rule(sources, use [, options [, condition]])` - declare a rule
//! - `argument(name [, default])` - declare a script argument
//! - `arg(name)` - a condition that holds when the argument is true

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use mlua::prelude::*;

use super::Declarations;
use crate::options::{OptionSet, OptionValue};
use crate::package::{FeatureSpec, ToolSpec};
use crate::rule::{RuleId, RuleSource};
use crate::usetree::{Condition, UseId, UseOp};

/// A `use(...)` handle.
pub struct LuaUse {
  pub id: UseId,
  decls: Rc<RefCell<Declarations>>,
}

impl LuaUse {
  fn combine(&self, op: UseOp, other: &LuaUse) -> LuaUse {
    let id = self.decls.borrow_mut().uses.combine(op, self.id, other.id);
    LuaUse {
      id,
      decls: self.decls.clone(),
    }
  }
}

impl LuaUserData for LuaUse {
  fn add_fields<F: LuaUserDataFields<Self>>(fields: &mut F) {
    fields.add_field_method_get("id", |_, this| Ok(this.id.0));
  }

  fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
    methods.add_meta_function(
      LuaMetaMethod::Add,
      |_, (a, b): (LuaUserDataRef<LuaUse>, LuaUserDataRef<LuaUse>)| Ok(a.combine(UseOp::Add, &b)),
    );
    methods.add_meta_function(
      LuaMetaMethod::BAnd,
      |_, (a, b): (LuaUserDataRef<LuaUse>, LuaUserDataRef<LuaUse>)| Ok(a.combine(UseOp::And, &b)),
    );
    methods.add_meta_function(
      LuaMetaMethod::BOr,
      |_, (a, b): (LuaUserDataRef<LuaUse>, LuaUserDataRef<LuaUse>)| Ok(a.combine(UseOp::Or, &b)),
    );
    methods.add_meta_method(LuaMetaMethod::ToString, |_, this, ()| {
      Ok(this.decls.borrow().uses.describe(this.id))
    });
  }
}

/// A `rule(...)` handle, usable as another rule's source.
#[derive(Debug, Clone, Copy)]
pub struct LuaRule {
  pub id: RuleId,
}

impl LuaUserData for LuaRule {
  fn add_fields<F: LuaUserDataFields<Self>>(fields: &mut F) {
    fields.add_field_method_get("id", |_, this| Ok(this.id.0));
  }

  fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
    methods.add_meta_method(LuaMetaMethod::ToString, |_, this, ()| Ok(this.id.to_string()));
  }
}

/// An `arg(...)` condition.
#[derive(Debug, Clone)]
pub struct LuaCondition(pub Condition);

impl LuaUserData for LuaCondition {
  fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
    methods.add_meta_method(LuaMetaMethod::ToString, |_, this, ()| Ok(this.0.to_string()));
  }
}

/// Register every global on the Lua runtime.
pub fn register_globals(lua: &Lua, decls: Rc<RefCell<Declarations>>) -> LuaResult<()> {
  let globals = lua.globals();

  // `package` stays the standard library table; calling it declares a tool.
  let d = decls.clone();
  let package_fn = lua.create_function(move |_, (_, spec): (LuaTable, LuaTable)| {
    let spec = parse_tool_spec(&spec)?;
    let name = spec.name.clone();
    let mut decls = d.borrow_mut();
    if decls.packages.iter().any(|p| p.name == name) {
      return Err(LuaError::external(format!("package '{}' declared more than once", name)));
    }
    decls.packages.push(spec);
    Ok(name)
  })?;
  let std_package: LuaTable = globals.get("package")?;
  let mt = lua.create_table()?;
  mt.set("__call", package_fn)?;
  std_package.set_metatable(Some(mt))?;

  let d = decls.clone();
  let use_fn = lua.create_function(
    move |_, (name, options, condition): (String, Option<LuaTable>, Option<LuaValue>)| {
      let options = match options {
        Some(table) => parse_options(&table)?,
        None => OptionSet::new(),
      };
      let condition = parse_condition(condition)?;
      let id = d.borrow_mut().uses.use_package(name, options, condition);
      Ok(LuaUse { id, decls: d.clone() })
    },
  )?;
  globals.set("use", use_fn)?;

  let d = decls.clone();
  let rule_fn = lua.create_function(
    move |_,
          (sources, root, options, condition): (
      LuaValue,
      LuaUserDataRef<LuaUse>,
      Option<LuaTable>,
      Option<LuaValue>,
    )| {
      let sources = parse_sources(sources)?;
      let options = match options {
        Some(table) => parse_options(&table)?,
        None => OptionSet::new(),
      };
      let condition = parse_condition(condition)?;
      let id = d
        .borrow_mut()
        .rules
        .add(sources, root.id, options, condition)
        .map_err(LuaError::external)?;
      Ok(LuaRule { id })
    },
  )?;
  globals.set("rule", rule_fn)?;

  let d = decls;
  let argument_fn = lua.create_function(move |_, (name, default): (String, Option<LuaValue>)| {
    let default = match default {
      None | Some(LuaValue::Nil) => None,
      Some(LuaValue::Boolean(b)) => Some(if b { "1".to_string() } else { "0".to_string() }),
      Some(LuaValue::Integer(i)) => Some(i.to_string()),
      Some(LuaValue::String(s)) => Some(s.to_str()?.to_string()),
      Some(other) => {
        return Err(LuaError::external(format!(
          "argument '{}': default must be a string, number or boolean, got {}",
          name,
          other.type_name()
        )));
      }
    };
    if let Some(default) = default {
      d.borrow_mut().arguments.declare(name.clone(), default);
    }
    Ok(LuaCondition(Condition::Argument(name)))
  })?;
  globals.set("argument", argument_fn)?;

  let arg_fn = lua.create_function(|_, name: String| Ok(LuaCondition(Condition::Argument(name))))?;
  globals.set("arg", arg_fn)?;

  Ok(())
}

fn parse_tool_spec(table: &LuaTable) -> LuaResult<ToolSpec> {
  let name: String = table
    .get("name")
    .map_err(|_| LuaError::external("package spec requires a 'name' field"))?;

  let mut spec = ToolSpec::new(name);
  spec.binaries = string_list(table.get("binaries")?)?;
  spec.headers = string_list(table.get("headers")?)?;
  spec.libraries = string_list(table.get("libraries")?)?;
  spec.locations = string_list(table.get("locations")?)?
    .into_iter()
    .map(PathBuf::from)
    .collect();
  if let Some(search_path) = table.get::<Option<bool>>("search_path")? {
    spec.search_path = search_path;
  }
  spec.command = table.get("command")?;
  spec.suffix = table.get("suffix")?;
  spec.prefix = table.get("prefix")?;
  spec.target_strip_dirs = table.get::<Option<usize>>("strip_dirs")?.unwrap_or(0);
  spec.single = table.get::<Option<bool>>("single")?.unwrap_or(false);
  spec.target = table.get("target")?;
  spec.flags = string_list(table.get("flags")?)?;
  spec.abi = table.get("abi")?;
  spec.compile = table.get::<Option<bool>>("compile")?.unwrap_or(false);
  spec.version = table.get("version")?;
  spec.version_command = table.get("version_command")?;
  if let Some(features) = table.get::<Option<LuaTable>>("features")? {
    spec.features = features
      .sequence_values::<LuaTable>()
      .map(|feature| parse_feature_spec(&feature?))
      .collect::<LuaResult<_>>()?;
  }
  Ok(spec)
}

fn parse_feature_spec(table: &LuaTable) -> LuaResult<FeatureSpec> {
  let name: String = table
    .get("name")
    .map_err(|_| LuaError::external("feature spec requires a 'name' field"))?;
  Ok(FeatureSpec {
    name,
    binaries: string_list(table.get("binaries")?)?,
    headers: string_list(table.get("headers")?)?,
    libraries: string_list(table.get("libraries")?)?,
  })
}

/// A string or a list of strings.
fn string_list(value: LuaValue) -> LuaResult<Vec<String>> {
  match value {
    LuaValue::Nil => Ok(Vec::new()),
    LuaValue::String(s) => Ok(vec![s.to_str()?.to_string()]),
    LuaValue::Table(t) => t.sequence_values::<String>().collect(),
    other => Err(LuaError::external(format!(
      "expected a string or a list of strings, got {}",
      other.type_name()
    ))),
  }
}

fn parse_options(table: &LuaTable) -> LuaResult<OptionSet> {
  let mut options = OptionSet::new();
  for pair in table.pairs::<String, LuaValue>() {
    let (key, value) = pair?;
    let value = match value {
      LuaValue::Boolean(b) => OptionValue::Bool(b),
      LuaValue::Integer(i) => OptionValue::Str(i.to_string()),
      LuaValue::Number(n) => OptionValue::Str(n.to_string()),
      LuaValue::String(s) => OptionValue::Str(s.to_str()?.to_string()),
      LuaValue::Table(t) => OptionValue::List(t.sequence_values::<String>().collect::<LuaResult<_>>()?),
      other => {
        return Err(LuaError::external(format!(
          "option '{}' has unsupported type {}",
          key,
          other.type_name()
        )));
      }
    };
    options.set(key, value);
  }
  Ok(options)
}

fn parse_condition(value: Option<LuaValue>) -> LuaResult<Condition> {
  match value {
    None | Some(LuaValue::Nil) => Ok(Condition::Always),
    Some(LuaValue::Boolean(b)) => Ok(Condition::Value(b)),
    Some(LuaValue::UserData(ud)) => Ok(ud.borrow::<LuaCondition>()?.0.clone()),
    Some(other) => Err(LuaError::external(format!(
      "condition must be a boolean or arg(...), got {}",
      other.type_name()
    ))),
  }
}

/// A pattern, a rule handle, or a list of either.
fn parse_sources(value: LuaValue) -> LuaResult<Vec<RuleSource>> {
  match value {
    LuaValue::String(s) => Ok(vec![RuleSource::File(s.to_str()?.to_string())]),
    LuaValue::UserData(ud) => Ok(vec![RuleSource::Rule(ud.borrow::<LuaRule>()?.id)]),
    LuaValue::Table(t) => {
      let mut sources = Vec::new();
      for value in t.sequence_values::<LuaValue>() {
        sources.extend(parse_sources(value?)?);
      }
      Ok(sources)
    }
    other => Err(LuaError::external(format!(
      "rule sources must be a pattern, a rule or a list of them, got {}",
      other.type_name()
    ))),
  }
}
