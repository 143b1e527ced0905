/// Errors returned by the form engine core.
#[derive(Debug, thiserror::Error)]
pub enum FormError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("package '{0}' not found in form registry")]
    PackageNotFound(String),
    #[error("namespace '{namespace}' not found in package '{package}'")]
    NamespaceNotFound { package: String, namespace: String },
    #[error("Couldn't find form with version: {0}")]
    VersionNotFound(String),
    #[error("no versions available for {package}/{namespace}")]
    NoVersionsAvailable { package: String, namespace: String },

    #[error("form not found: {0}")]
    FormNotFound(String),
    #[error("form source error: {0}")]
    Source(String),
    #[error("form schema error: {0}")]
    Schema(#[from] openmrs::OpenmrsError),
    #[error("cyclic form reference: {0}")]
    CyclicReference(String),
    #[error("form resolution was aborted")]
    Aborted,

    #[error("form has {0} field(s) with validation errors")]
    NotSubmittable(usize),
    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("failed to read form file: {0}")]
    FileRead(std::io::Error),
    #[error("failed to parse form file {path}: {source}", path = path.display())]
    FileParse {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl FormError {
    /// Abort errors are teardown artifacts, not failures to show the user.
    pub fn is_abort(&self) -> bool {
        matches!(self, FormError::Aborted)
    }
}

pub type FormResult<T> = std::result::Result<T, FormError>;
