use serde::Serialize;

use crate::schema::mapping::MappingNode;

// ─── Change Records ─────────────────────────────────────────────────────────

/// Identity of the resource a change set applies to.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AppliedResourceInfo {
    /// `None` until the provider synthesises an id on first deploy.
    pub resource_id: Option<String>,
    pub resource_name: String,
    pub resource_type: String,
    pub instance_id: String,
}

/// A single field-level difference, keyed by a JSON-pointer-like path into
/// the spec tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldChange {
    pub field_path: String,
    pub prev_value: Option<MappingNode>,
    pub new_value: Option<MappingNode>,
    /// The field's schema forces destroy-then-create on change.
    pub must_recreate: bool,
}

/// Changes staged for a single outbound link.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LinkChanges {
    pub link_name: String,
    pub modified_fields: Vec<FieldChange>,
    pub new_fields: Vec<FieldChange>,
}

/// The full staged change set for one resource. Field lists are sorted by
/// path, so identical inputs produce byte-identical output.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResourceChanges {
    pub applied_resource_info: AppliedResourceInfo,
    /// A changed field flagged must-recreate schedules destroy-then-create
    /// instead of an in-place update.
    pub must_recreate: bool,
    pub modified_fields: Vec<FieldChange>,
    pub new_fields: Vec<FieldChange>,
    pub removed_fields: Vec<String>,
    pub unchanged_fields: Vec<String>,
    /// Fields the provider populates after deploy.
    pub computed_fields: Vec<String>,
    /// Paths beyond the traversal depth bound; their changes are only known
    /// at deploy time.
    pub field_changes_known_on_deploy: Vec<String>,
    pub new_outbound_links: Vec<LinkChanges>,
    pub outbound_link_changes: Vec<LinkChanges>,
    pub removed_outbound_links: Vec<String>,
}

impl ResourceChanges {
    /// Whether anything at all would change.
    pub fn is_no_op(&self) -> bool {
        self.modified_fields.is_empty()
            && self.new_fields.is_empty()
            && self.removed_fields.is_empty()
            && self.field_changes_known_on_deploy.is_empty()
            && self.new_outbound_links.is_empty()
            && self.outbound_link_changes.is_empty()
            && self.removed_outbound_links.is_empty()
            && self.applied_resource_info.resource_id.is_some()
    }
}
