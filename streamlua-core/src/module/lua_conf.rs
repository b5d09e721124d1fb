//! Lua module settings (`stream_lua`).
//!
//! Main-level settings carry the script engine and the worker-init hook.
//! Server-level settings carry the cosocket knobs, two of which (the
//! resolver and the socket-error logging flag) are inherited from the
//! top-level block by the worker-init bootstrap.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfError;
use crate::lua::hook::InitWorkerHook;
use crate::lua::ScriptEngine;
use crate::module::{downcast_pair, merge_value, ConfContext, ConfObject, Module, LUA_MODULE};

/// Default cosocket timeout.
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(60);

/// Default resolver timeout.
pub const DEFAULT_RESOLVER_TIMEOUT: Duration = Duration::from_secs(30);

/// Name resolution settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolver {
    /// Name server addresses.
    pub addresses: Vec<String>,
    /// Also look up IPv6 addresses.
    #[serde(default)]
    pub ipv6: bool,
    /// Override of the answer TTL, in seconds.
    #[serde(default)]
    pub valid: Option<u64>,
}

/// Main-level Lua settings.
#[derive(Default)]
pub struct LuaMainConf {
    /// The script engine, present once Lua is configured.
    pub lua: Option<ScriptEngine>,
    /// The worker-init hook, if one is configured.
    pub init_worker: Option<InitWorkerHook>,
}

/// Server-level Lua settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LuaSrvConf {
    /// Resolver used by cosockets.
    pub resolver: Option<Arc<Resolver>>,
    /// Resolver timeout.
    pub resolver_timeout: Option<Duration>,
    /// Log cosocket errors to the error log.
    pub log_socket_errors: Option<bool>,
    /// Cosocket connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Cosocket send timeout.
    pub send_timeout: Option<Duration>,
    /// Cosocket read timeout.
    pub read_timeout: Option<Duration>,
}

/// The `stream_lua` module descriptor.
pub fn module() -> Module {
    Module::stream(LUA_MODULE)
        .with_create_srv_conf(create_srv_conf)
        .with_merge_srv_conf(merge_srv_conf)
}

fn create_srv_conf(cf: &mut ConfContext<'_>) -> Result<ConfObject, ConfError> {
    let conf: ConfObject = cf.temp_pool.alloc(LuaSrvConf::default())?;
    Ok(conf)
}

fn merge_srv_conf(_cf: &mut ConfContext<'_>, prev: &mut dyn Any, cur: &mut dyn Any) -> Result<(), ConfError> {
    let (prev, conf) = downcast_pair::<LuaSrvConf>(LUA_MODULE, prev, cur)?;

    if conf.resolver.is_none() {
        // Empty resolver: lookups fail with "no resolver defined".
        conf.resolver = Some(prev.resolver.clone().unwrap_or_default());
    }
    merge_value(&mut conf.resolver_timeout, &prev.resolver_timeout, DEFAULT_RESOLVER_TIMEOUT);
    merge_value(&mut conf.log_socket_errors, &prev.log_socket_errors, true);
    merge_value(&mut conf.connect_timeout, &prev.connect_timeout, DEFAULT_SOCKET_TIMEOUT);
    merge_value(&mut conf.send_timeout, &prev.send_timeout, DEFAULT_SOCKET_TIMEOUT);
    merge_value(&mut conf.read_timeout, &prev.read_timeout, DEFAULT_SOCKET_TIMEOUT);
    Ok(())
}

/// Copy the settings a freshly derived server config must share with the
/// top-level block.  Unset top-level values leave `conf` alone.
pub fn inherit_settings(top: &LuaSrvConf, conf: &mut LuaSrvConf) {
    if let Some(resolver) = &top.resolver {
        conf.resolver = Some(Arc::clone(resolver));
    }
    if let Some(flag) = top.log_socket_errors {
        conf.log_socket_errors = Some(flag);
    }
    debug!(
        resolver = conf.resolver.is_some(),
        log_socket_errors = ?conf.log_socket_errors,
        "Inherited top-level lua settings"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DuplicateCycle, Pool, WorkerState};
    use crate::module::{ConfFile, ConfSlots, ModuleRegistry};
    use crate::session::log::ErrorLog;

    fn merge(prev: &mut LuaSrvConf, conf: &mut LuaSrvConf) -> Result<(), ConfError> {
        let mut state = WorkerState::new(Pool::new("cycle"), "test.json", ErrorLog::default(), ModuleRegistry::new());
        let mut cycle = DuplicateCycle::build(&mut state).unwrap();
        let mut temp_pool = Pool::new("temp");
        let main_conf = Arc::new(ConfSlots::new(0));
        let mut cf = ConfContext {
            pool: &mut state.pool,
            temp_pool: &mut temp_pool,
            cycle: &mut cycle,
            main_conf: &main_conf,
            conf_file: ConfFile {
                name: "test.json".into(),
                line: 0,
            },
        };
        merge_srv_conf(&mut cf, prev, conf)
    }

    #[test]
    fn test_merge_fills_defaults() {
        let mut conf = LuaSrvConf::default();
        merge(&mut LuaSrvConf::default(), &mut conf).unwrap();
        assert_eq!(conf.resolver.as_deref(), Some(&Resolver::default()));
        assert_eq!(conf.log_socket_errors, Some(true));
        assert_eq!(conf.connect_timeout, Some(DEFAULT_SOCKET_TIMEOUT));
        assert_eq!(conf.resolver_timeout, Some(DEFAULT_RESOLVER_TIMEOUT));
    }

    #[test]
    fn test_merge_prefers_prev_over_default() {
        let mut prev = LuaSrvConf {
            log_socket_errors: Some(false),
            read_timeout: Some(Duration::from_secs(5)),
            ..LuaSrvConf::default()
        };
        let mut conf = LuaSrvConf::default();
        merge(&mut prev, &mut conf).unwrap();
        assert_eq!(conf.log_socket_errors, Some(false));
        assert_eq!(conf.read_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_inherit_is_noop_for_unset_top_level() {
        let mut conf = LuaSrvConf::default();
        merge(&mut LuaSrvConf::default(), &mut conf).unwrap();
        let before = conf.clone();

        inherit_settings(&LuaSrvConf::default(), &mut conf);
        assert_eq!(conf, before);
    }

    #[test]
    fn test_inherit_copies_set_values() {
        let resolver = Arc::new(Resolver {
            addresses: vec!["127.0.0.53".into()],
            ipv6: false,
            valid: Some(30),
        });
        let top = LuaSrvConf {
            resolver: Some(resolver.clone()),
            log_socket_errors: Some(false),
            ..LuaSrvConf::default()
        };
        let mut conf = LuaSrvConf {
            log_socket_errors: Some(true),
            ..LuaSrvConf::default()
        };

        inherit_settings(&top, &mut conf);
        assert!(Arc::ptr_eq(conf.resolver.as_ref().unwrap(), &resolver));
        assert_eq!(conf.log_socket_errors, Some(false));
    }
}
