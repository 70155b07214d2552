//! The fixed order of lowering phases

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// One slot of the lowering pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Test-annotation processing
    #[display("test_processor")]
    TestProcessor,
    /// Function inlining
    #[display("inline")]
    Inline,
    /// Enum-class lowering
    #[display("enum_classes")]
    EnumClasses,
    /// Delegation lowering
    #[display("delegation")]
    Delegation,
    /// Default-argument stubs
    #[display("default_arguments")]
    DefaultArguments,
    /// Vararg lowering
    #[display("varargs")]
    Varargs,
    /// Suspend functions to state machines
    #[display("coroutines")]
    Coroutines,
    /// Objective-C interface export
    #[display("objc_export")]
    ObjCExport,
}

impl Phase {
    /// Every phase, in the order the pipeline runs them
    pub const ALL: [Self; 8] = [
        Self::TestProcessor,
        Self::Inline,
        Self::EnumClasses,
        Self::Delegation,
        Self::DefaultArguments,
        Self::Varargs,
        Self::Coroutines,
        Self::ObjCExport,
    ];

    /// One-line description for listings
    pub fn description(self) -> &'static str {
        match self {
            Self::TestProcessor => "Process test annotations",
            Self::Inline => "Function inlining",
            Self::EnumClasses => "Enum classes lowering",
            Self::Delegation => "Delegation lowering",
            Self::DefaultArguments => "Default arguments lowering",
            Self::Varargs => "Vararg lowering",
            Self::Coroutines => "Coroutines lowering",
            Self::ObjCExport => "Objective-C export",
        }
    }

    /// Phases that must have run before this one
    pub fn prerequisites(self) -> &'static [Self] {
        match self {
            Self::Coroutines => &[Self::Inline],
            Self::DefaultArguments => &[Self::EnumClasses],
            Self::Varargs => &[Self::DefaultArguments],
            Self::TestProcessor | Self::Inline | Self::EnumClasses | Self::Delegation | Self::ObjCExport => &[],
        }
    }

    /// Parse the snake_case name used in configuration
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|phase| phase.to_string() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prerequisites_run_earlier() {
        for phase in Phase::ALL {
            for prerequisite in phase.prerequisites() {
                assert!(*prerequisite < phase, "{prerequisite} must precede {phase}");
            }
        }
    }

    #[test]
    fn test_names_round_trip() {
        for phase in Phase::ALL {
            assert_eq!(Phase::from_name(&phase.to_string()), Some(phase));
        }
        assert_eq!(Phase::from_name("ObjCExport"), None);
    }
}
