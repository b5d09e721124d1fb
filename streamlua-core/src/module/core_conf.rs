//! Core stream server settings (`stream_core`).

use std::any::Any;
use std::fmt;
use std::time::Duration;

use crate::error::ConfError;
use crate::module::{downcast_pair, merge_value, ConfContext, ConfObject, Module, CORE_MODULE};
use crate::session::log::ErrorLog;
use crate::session::Session;

/// Handler that takes over a session once it is accepted.
pub type ContentHandler = fn(&mut Session);

/// Default preread buffer size.
pub const DEFAULT_PREREAD_BUFFER_SIZE: usize = 16 * 1024;

/// Default preread timeout.
pub const DEFAULT_PREREAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-server core settings.
#[derive(Clone, Default)]
pub struct CoreSrvConf {
    /// Content handler; a server without one is rejected at merge time.
    pub handler: Option<ContentHandler>,
    /// Error log diagnostics of this server are written to.
    pub error_log: Option<ErrorLog>,
    /// Whether `TCP_NODELAY` is set on accepted sockets.
    pub tcp_nodelay: Option<bool>,
    /// Preread buffer size in bytes.
    pub preread_buffer_size: Option<usize>,
    /// Preread timeout.
    pub preread_timeout: Option<Duration>,
}

impl fmt::Debug for CoreSrvConf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreSrvConf")
            .field("handler", &self.handler.is_some())
            .field("error_log", &self.error_log)
            .field("tcp_nodelay", &self.tcp_nodelay)
            .field("preread_buffer_size", &self.preread_buffer_size)
            .field("preread_timeout", &self.preread_timeout)
            .finish()
    }
}

/// The `stream_core` module descriptor.
pub fn module() -> Module {
    Module::stream(CORE_MODULE)
        .with_create_srv_conf(create_srv_conf)
        .with_merge_srv_conf(merge_srv_conf)
}

fn create_srv_conf(cf: &mut ConfContext<'_>) -> Result<ConfObject, ConfError> {
    let conf: ConfObject = cf.temp_pool.alloc(CoreSrvConf::default())?;
    Ok(conf)
}

fn merge_srv_conf(cf: &mut ConfContext<'_>, prev: &mut dyn Any, cur: &mut dyn Any) -> Result<(), ConfError> {
    let (prev, conf) = downcast_pair::<CoreSrvConf>(CORE_MODULE, prev, cur)?;

    if conf.handler.is_none() {
        conf.handler = prev.handler;
    }
    if conf.handler.is_none() {
        return Err(ConfError::Invalid(format!(
            "no handler for server in {}:{}",
            cf.conf_file.name.display(),
            cf.conf_file.line
        )));
    }

    merge_value(&mut conf.error_log, &prev.error_log, cf.cycle.new_log.clone());
    merge_value(&mut conf.tcp_nodelay, &prev.tcp_nodelay, true);
    merge_value(
        &mut conf.preread_buffer_size,
        &prev.preread_buffer_size,
        DEFAULT_PREREAD_BUFFER_SIZE,
    );
    merge_value(&mut conf.preread_timeout, &prev.preread_timeout, DEFAULT_PREREAD_TIMEOUT);
    Ok(())
}
