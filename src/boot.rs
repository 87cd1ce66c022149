//! Boot flow: bring-up, payload check, proxy fallback
//!
//! The orchestrator owns the board identity and the collaborators for the
//! whole run. It returns the next stage's [`BootVector`] with teardown already
//! done; jumping is left to the caller.

use crate::config::ProxyConfig;
use crate::error::{NoHandoffRequested, PlatformError};
use crate::handoff::Teardown;
use crate::platform::{hardware_init, BootVector, DeviceInfo, ImageLoader, Platform};
use crate::proxy::access::{AccessLayer, AccessPolicy, Privileged};
use crate::proxy::dispatch::ProxyContext;
use crate::proxy::framer::Transport;
use crate::proxy::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BootError {
    /// A mandatory subsystem failed to come up
    #[error("hardware init failed: {0}")]
    BringUp(PlatformError),
    /// The proxy session ended without a boot request
    #[error(transparent)]
    NothingToDo(NoHandoffRequested),
}

pub struct Orchestrator<'a> {
    platform: &'a mut dyn Platform,
    mem: &'a mut dyn Privileged,
    loader: &'a mut dyn ImageLoader,
    policy: AccessPolicy,
    config: ProxyConfig,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        platform: &'a mut dyn Platform,
        mem: &'a mut dyn Privileged,
        loader: &'a mut dyn ImageLoader,
        policy: AccessPolicy,
        config: ProxyConfig,
    ) -> Self {
        Orchestrator {
            platform,
            mem,
            loader,
            policy,
            config,
        }
    }

    /// Bring the board up, then boot the appended payload or serve the proxy
    /// on `link` until the host asks for a boot
    pub fn run(self, link: &'a mut dyn Transport) -> Result<BootVector, BootError> {
        let Orchestrator {
            platform,
            mem,
            loader,
            policy,
            config,
        } = self;

        let device = DeviceInfo::probe(&*platform);
        device.log();

        hardware_init(&mut *platform).map_err(BootError::BringUp)?;

        log::info!("Checking for payloads...");
        match loader.load_candidate(&mut *mem) {
            Ok(vector) => {
                log::info!("Valid payload found");
                Teardown::new().run(&mut *platform, &mut *link, vector.restore_logo());
                return Ok(vector);
            }
            Err(e) => log::info!("No valid payload found ({})", e),
        }

        log::info!("Running proxy...");
        let access = AccessLayer::new(mem, policy);
        let ctx = ProxyContext::new(access, platform, loader, device, &config);
        Session::new(link, ctx, &config)
            .run()
            .map_err(BootError::NothingToDo)
    }
}
