use tracing::debug;

pub const ELEVATION_REQUIRED: &str =
    "You must run this program as administrator for this feature to work.";

/// Reports whether the current process may mutate device state.
pub trait PrivilegeChecker: Send + Sync {
    fn is_elevated(&self) -> bool;
}

/// Asks the user a yes/no question before a destructive batch.
pub trait Confirmer: Send + Sync {
    fn confirm(&self, message: &str, title: &str) -> bool;
}

/// Privilege fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct StaticPrivilege(pub bool);

impl PrivilegeChecker for StaticPrivilege {
    fn is_elevated(&self) -> bool {
        self.0
    }
}

/// Answers every confirmation the same way.
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub bool);

impl Confirmer for FixedAnswer {
    fn confirm(&self, message: &str, title: &str) -> bool {
        debug!(title, message, answer = self.0, "confirmation answered without prompting");
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyDecision {
    Allow,
    Deny(String),
}

/// Checked at every command invocation; a previous answer is never reused.
pub fn can_mutate_devices(checker: &dyn PrivilegeChecker) -> SafetyDecision {
    if !checker.is_elevated() {
        debug!("device mutation denied: process is not elevated");
        return SafetyDecision::Deny(ELEVATION_REQUIRED.to_string());
    }
    SafetyDecision::Allow
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn denies_without_elevation() {
        assert_eq!(
            can_mutate_devices(&StaticPrivilege(false)),
            SafetyDecision::Deny(ELEVATION_REQUIRED.to_string())
        );
    }

    #[test]
    fn allows_when_elevated() {
        assert_eq!(can_mutate_devices(&StaticPrivilege(true)), SafetyDecision::Allow);
    }

    #[test]
    fn privilege_is_rechecked_on_every_call() {
        struct Toggle(AtomicBool);
        impl PrivilegeChecker for Toggle {
            fn is_elevated(&self) -> bool {
                self.0.load(Ordering::SeqCst)
            }
        }
        let checker = Toggle(AtomicBool::new(true));
        assert_eq!(can_mutate_devices(&checker), SafetyDecision::Allow);
        checker.0.store(false, Ordering::SeqCst);
        assert!(matches!(can_mutate_devices(&checker), SafetyDecision::Deny(_)));
    }
}
