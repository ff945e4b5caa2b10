//! Lifecycle transition table
//!
//! | From     | Action  | Via       | Success  |
//! |----------|---------|-----------|----------|
//! | Disabled | enable  | Starting  | Enabled  |
//! | Failed   | enable  | Starting  | Enabled  |
//! | Stopped  | enable  | Starting  | Enabled  |
//! | Enabled  | disable | Stopping  | Disabled |
//! | Enabled  | reload  | Reloading | Enabled  |
//!
//! Every transition that fails ends in `Failed`.

use pmw_core::{Error, LifecycleState, PluginAction, Result};

/// What the dispatcher has to do for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Already in the requested state; nothing runs
    NoOp,
    Transition {
        via: LifecycleState,
        on_success: LifecycleState,
    },
}

/// Decide how `action` applies to a plugin currently in `from`
pub fn plan(plugin: &str, from: LifecycleState, action: PluginAction) -> Result<Plan> {
    use LifecycleState::*;

    if from.is_transient() {
        return Err(Error::Conflict {
            plugin: plugin.to_string(),
            state: from,
        });
    }

    match (from, action) {
        (Enabled, PluginAction::Enable) => Ok(Plan::NoOp),
        (Disabled | Stopped, PluginAction::Disable) => Ok(Plan::NoOp),
        (Disabled | Failed | Stopped, PluginAction::Enable) => Ok(Plan::Transition {
            via: Starting,
            on_success: Enabled,
        }),
        (Enabled, PluginAction::Disable) => Ok(Plan::Transition {
            via: Stopping,
            on_success: Disabled,
        }),
        (Enabled, PluginAction::Reload) => Ok(Plan::Transition {
            via: Reloading,
            on_success: Enabled,
        }),
        (state, action) => Err(Error::InvalidTransition {
            plugin: plugin.to_string(),
            action,
            state,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleState::*;

    #[test]
    fn test_table_transitions() {
        let cases = [
            (Disabled, PluginAction::Enable, Starting, Enabled),
            (Failed, PluginAction::Enable, Starting, Enabled),
            (Stopped, PluginAction::Enable, Starting, Enabled),
            (Enabled, PluginAction::Disable, Stopping, Disabled),
            (Enabled, PluginAction::Reload, Reloading, Enabled),
        ];

        for (from, action, via, on_success) in cases {
            assert_eq!(
                plan("p", from, action).unwrap(),
                Plan::Transition { via, on_success },
                "{from} + {action}"
            );
        }
    }

    #[test]
    fn test_idempotent_requests() {
        assert_eq!(plan("p", Enabled, PluginAction::Enable).unwrap(), Plan::NoOp);
        assert_eq!(plan("p", Disabled, PluginAction::Disable).unwrap(), Plan::NoOp);
        assert_eq!(plan("p", Stopped, PluginAction::Disable).unwrap(), Plan::NoOp);
    }

    #[test]
    fn test_transient_states_conflict() {
        for from in [Starting, Stopping, Reloading] {
            for action in [PluginAction::Enable, PluginAction::Disable, PluginAction::Reload] {
                assert!(matches!(
                    plan("p", from, action),
                    Err(Error::Conflict { state, .. }) if state == from
                ));
            }
        }
    }

    #[test]
    fn test_invalid_transitions() {
        for (from, action) in [
            (Disabled, PluginAction::Reload),
            (Stopped, PluginAction::Reload),
            (Failed, PluginAction::Reload),
            (Failed, PluginAction::Disable),
        ] {
            assert!(matches!(
                plan("p", from, action),
                Err(Error::InvalidTransition { .. })
            ));
        }
    }

    #[test]
    fn test_every_plan_lands_in_a_stable_state() {
        for from in LifecycleState::ALL {
            for action in [PluginAction::Enable, PluginAction::Disable, PluginAction::Reload] {
                if let Ok(Plan::Transition { via, on_success }) = plan("p", from, action) {
                    assert!(via.is_transient());
                    assert!(!on_success.is_transient());
                }
            }
        }
    }
}
