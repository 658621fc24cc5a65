pub mod changes;
pub mod diff;

pub use changes::{AppliedResourceInfo, FieldChange, LinkChanges, ResourceChanges};
pub use diff::{stage_outbound_links, stage_resource_changes, StageResourceChangesInput};
