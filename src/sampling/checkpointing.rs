//! Suspending gradient checkpointing while sampling

use tracing::debug;

/// A model component whose gradient checkpointing can be switched on and off
pub trait CheckpointToggle {
    /// Whether this component can toggle checkpointing at all
    fn supports_checkpointing_toggle(&self) -> bool {
        true
    }

    /// Whether checkpointing is currently enabled
    fn is_gradient_checkpointing(&self) -> bool;

    /// Enable or disable checkpointing
    fn set_gradient_checkpointing(&mut self, enabled: bool);
}

/// Disables checkpointing on a set of components until dropped.
///
/// Only components that had checkpointing enabled when the guard was created
/// are re-enabled, also when generation fails.
pub struct CheckpointingSuspended<'a> {
    modules: Vec<(&'a mut dyn CheckpointToggle, bool)>,
}

impl<'a> CheckpointingSuspended<'a> {
    /// Disable checkpointing on every module that has it enabled
    pub fn new(modules: Vec<&'a mut dyn CheckpointToggle>) -> Self {
        let modules: Vec<_> = modules
            .into_iter()
            .map(|module| {
                let toggled =
                    module.supports_checkpointing_toggle() && module.is_gradient_checkpointing();
                if toggled {
                    module.set_gradient_checkpointing(false);
                }
                (module, toggled)
            })
            .collect();

        debug!(
            "Suspended gradient checkpointing on {} of {} modules",
            modules.iter().filter(|(_, t)| *t).count(),
            modules.len()
        );
        Self { modules }
    }

    /// Number of components that will be re-enabled on drop
    pub fn suspended(&self) -> usize {
        self.modules.iter().filter(|(_, toggled)| *toggled).count()
    }
}

impl Drop for CheckpointingSuspended<'_> {
    fn drop(&mut self) {
        for (module, toggled) in self.modules.iter_mut() {
            if *toggled {
                module.set_gradient_checkpointing(true);
            }
        }
    }
}
