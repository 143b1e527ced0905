//! Constants used throughout the form engine core.

/// Intent used when a session does not declare one.
pub const DEFAULT_INTENT: &str = openmrs::WILDCARD_INTENT;

/// Default directory for the packaged form registry when none is configured.
pub const DEFAULT_REGISTRY_DIR: &str = "form-registry";

/// Default directory of named form documents served by the local form source.
pub const DEFAULT_FORMS_DIR: &str = "forms";

/// Extension of form documents on disk.
pub const FORM_FILE_EXTENSION: &str = "json";

/// Order `type` sent for test orders.
pub const TEST_ORDER_TYPE: &str = "testorder";

/// Order `action` for a newly placed order.
pub const ORDER_ACTION_NEW: &str = "NEW";

/// `questionOptions` key holding the care setting of test orders.
pub const ORDER_SETTING_KEY: &str = "orderSettingUuid";

/// Validator type applied to every field.
pub const REQUIRED_VALIDATOR: &str = "form_field";
