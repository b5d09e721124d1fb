//! Module Configuration Replicator
//!
//! Re-creates every stream module's server-level configuration inside a
//! [`ConfContext`] built on the duplicate cycle, then runs each module's
//! merge step against a second, default "previous" object.  The result is a
//! fresh [`ConfSlots`] table that looks exactly like the one a real server
//! block would get, without a single write reaching the live worker state.

use tracing::{debug, warn};

use crate::error::BootstrapError;
use crate::module::core_conf::CoreSrvConf;
use crate::module::{ConfContext, ConfSlots, ModuleRegistry, CORE_MODULE};
use crate::session::Session;

/// Inert content handler installed on the replicated core settings.
///
/// The core merge step insists on a handler; the worker-init session never
/// dispatches through it.
pub fn placeholder_content_handler(session: &mut Session) {
    warn!(connection = session.connection_id(), "Placeholder content handler invoked");
}

/// Build a server configuration slot table for every stream module in
/// `registry`, in registration order.
///
/// `slots` must already be sized for [`ModuleRegistry::max_stream_index`].
pub fn replicate_srv_conf(
    registry: &ModuleRegistry,
    cf: &mut ConfContext<'_>,
    slots: &mut ConfSlots,
) -> Result<(), BootstrapError> {
    let core_index = registry.ctx_index(CORE_MODULE);

    for module in registry.stream_modules() {
        let Some(create) = module.create_srv_conf() else {
            continue;
        };
        let index = module.ctx_index();

        let mut cur = create(cf).map_err(|source| BootstrapError::CreateConf {
            module: module.name().to_owned(),
            source,
        })?;

        if Some(index) == core_index {
            if let Some(core) = cur.downcast_mut::<CoreSrvConf>() {
                core.handler = Some(placeholder_content_handler);
            }
        }

        if let Some(merge) = module.merge_srv_conf() {
            let mut prev = create(cf).map_err(|source| BootstrapError::CreateConf {
                module: module.name().to_owned(),
                source,
            })?;

            merge(cf, prev.as_mut(), cur.as_mut()).map_err(|source| BootstrapError::MergeConf {
                module: module.name().to_owned(),
                source,
            })?;
        }

        debug!(module = %module.name(), index, "Replicated server configuration");
        slots.set(index, cur);
    }

    Ok(())
}
