//! Rulestore schema: typed rule kinds, kind registry and the validation gate.

#![forbid(unsafe_code)]

use serde::{de::DeserializeOwned, Serialize};

pub mod duration;
pub mod kinds;
pub mod limits;
pub mod registry;
pub mod validate;

pub use kinds::{
    AlertRule, AlertRuleSpec, Folder, FolderSpec, IntervalTrigger, PanelRef, RecordingRule, RecordingRuleSpec,
    RelativeTimeRange, RuleQuery,
};
pub use limits::Limits;
pub use registry::{KindDescriptor, KindRegistry};
pub use validate::{validate_name, validate_object, ValidationContext, GENERATED_SUFFIX_LEN, MAX_GENERATE_NAME_LEN};

/// A typed resource the store can serve.
///
/// Implemented by every custom resource in [`kinds`]; a generic client uses it to
/// move between the typed value and the raw document the store works on.
pub trait Kind: kube::Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn descriptor() -> KindDescriptor;
}
