//! Ordered teardown before the final jump
//!
//! Steps run strictly in the order of [`Step::ORDER`]. Each one runs at most
//! once per [`Teardown`]; the platform calls underneath are idempotent on
//! their own as well, so a second `Teardown` over the same hardware is
//! harmless.

use crate::platform::Platform;
use crate::proxy::framer::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Exceptions,
    Transport,
    Mmu,
    Display,
}

impl Step {
    pub const ORDER: [Step; 4] = [Step::Exceptions, Step::Transport, Step::Mmu, Step::Display];
}

#[derive(Debug, Default)]
pub struct Teardown {
    done: [bool; 4],
}

impl Teardown {
    pub const fn new() -> Self {
        Teardown { done: [false; 4] }
    }

    pub fn is_complete(&self) -> bool {
        self.done.iter().all(|&d| d)
    }

    /// Relinquish exceptions, transport, MMU and display
    ///
    /// The transport is left running when it is the console the next stage
    /// keeps using.
    pub fn run(&mut self, platform: &mut dyn Platform, link: &mut dyn Transport, restore_logo: bool) {
        for (i, step) in Step::ORDER.iter().enumerate() {
            if self.done[i] {
                continue;
            }
            match step {
                Step::Exceptions => platform.shutdown_exceptions(),
                Step::Transport => {
                    if link.is_console() {
                        if let Err(e) = link.flush() {
                            log::warn!("console flush failed: {}", e);
                        }
                    } else {
                        link.shutdown();
                    }
                }
                Step::Mmu => platform.shutdown_mmu(),
                Step::Display => platform.shutdown_display(restore_logo),
            }
            self.done[i] = true;
            log::debug!("teardown: {:?} done", step);
        }
    }
}
