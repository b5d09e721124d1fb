//! The `ngx` table exposed to scripts.
//!
//! Only what a worker-init hook can reasonably use is provided: the log
//! level constants, `ngx.log` and `ngx.get_phase`.  Both functions resolve
//! the active session through the engine's app data and raise a Lua error
//! when none is bound.

use mlua::{AppDataRef, Lua, Value, Variadic};

use crate::lua::ActiveSession;
use crate::session::LogLevel;

/// Log level constants, in `ngx` numbering.
pub const LOG_LEVELS: [(&str, i64); 9] = [
    ("STDERR", 0),
    ("EMERG", 1),
    ("ALERT", 2),
    ("CRIT", 3),
    ("ERR", 4),
    ("WARN", 5),
    ("NOTICE", 6),
    ("INFO", 7),
    ("DEBUG", 8),
];

/// Install the `ngx` global table into `lua`.
pub fn install(lua: &Lua) -> mlua::Result<()> {
    let ngx = lua.create_table()?;
    for (name, level) in LOG_LEVELS {
        ngx.set(name, level)?;
    }

    ngx.set(
        "get_phase",
        lua.create_function(|lua, ()| {
            let session = active_session(lua)?;
            Ok(session.phase.as_str())
        })?,
    )?;

    ngx.set(
        "log",
        lua.create_function(|lua, (level, args): (i64, Variadic<Value>)| {
            let level = LogLevel::from_script_level(level)
                .ok_or_else(|| mlua::Error::runtime(format!("bad log level: {level}")))?;
            let session = active_session(lua)?;

            let mut msg = String::from("[lua] ");
            for arg in args.iter() {
                msg.push_str(&stringify(arg)?);
            }
            session.log.log(level, &msg);
            Ok(())
        })?,
    )?;

    lua.globals().set("ngx", ngx)
}

fn active_session(lua: &Lua) -> mlua::Result<AppDataRef<'_, ActiveSession>> {
    lua.app_data_ref::<ActiveSession>()
        .ok_or_else(|| mlua::Error::runtime("no session found"))
}

fn stringify(value: &Value) -> mlua::Result<String> {
    Ok(match value {
        Value::Nil => "nil".to_owned(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.to_string_lossy().into(),
        other => {
            return Err(mlua::Error::runtime(format!(
                "bad argument to 'log' (string, number, boolean or nil expected, got {})",
                other.type_name()
            )))
        }
    })
}
