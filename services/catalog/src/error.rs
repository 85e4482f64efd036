//! Business errors and their rendering.
//!
//! Every failure inside a request ends up as a [`CatalogError`], which carries
//! a stable message id. The HTTP layer renders it through a [`MessageCatalog`]
//! that is built once at startup and handed in explicitly.

use crate::object_locator::ObjectMatchError;
use crate::url_signer::SigningError;
use std::collections::HashMap;
use thiserror::Error;

/// Stable message ids
pub mod codes {
    /// Unexpected system error
    pub const SYSTEM: &str = "E5S001";
    /// Request validation failed
    pub const VALIDATION: &str = "E4V001";
    /// Database or object store access failed
    pub const STORE_ACCESS: &str = "E5D001";
    /// Required master data is missing
    pub const MISSING_DATA: &str = "E4L001";
    /// No location for the requested section
    pub const MISSING_LOCATIONS: &str = "E4L003";
    /// Media could not be resolved or signed
    pub const MEDIA_URL: &str = "E4L004";
    /// Scenario absent or outside the caller's sections
    pub const NOT_FOUND: &str = "E4L005";
}

/// Errors surfaced by catalog operations
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Scenario not found")]
    NotAuthorizedOrNotFound,

    #[error("Required master data missing: {0}")]
    MissingRequiredData(&'static str),

    #[error("No location registered for the section")]
    MissingLocations,

    #[error(transparent)]
    ObjectMatch(#[from] ObjectMatchError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error("Store access failed: {0}")]
    StoreAccess(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CatalogError {
    /// Stable message id of this error
    pub fn code(&self) -> &'static str {
        match self {
            CatalogError::Validation(_) => codes::VALIDATION,
            CatalogError::NotAuthorizedOrNotFound => codes::NOT_FOUND,
            CatalogError::MissingRequiredData(_) => codes::MISSING_DATA,
            CatalogError::MissingLocations => codes::MISSING_LOCATIONS,
            CatalogError::ObjectMatch(_) | CatalogError::Signing(_) => codes::MEDIA_URL,
            CatalogError::StoreAccess(_) => codes::STORE_ACCESS,
            CatalogError::Internal(_) => codes::SYSTEM,
        }
    }

    /// Placeholder values for the catalog template
    pub fn message_args(&self) -> Vec<String> {
        match self {
            CatalogError::Validation(detail) => vec![detail.clone()],
            CatalogError::MissingRequiredData(what) => vec![(*what).to_string()],
            CatalogError::MissingLocations => vec!["location".to_string()],
            CatalogError::ObjectMatch(_) | CatalogError::Signing(_) => vec!["URL".to_string()],
            CatalogError::StoreAccess(detail) => vec![detail.clone()],
            CatalogError::NotAuthorizedOrNotFound | CatalogError::Internal(_) => Vec::new(),
        }
    }
}

impl From<sqlx::Error> for CatalogError {
    fn from(err: sqlx::Error) -> Self {
        CatalogError::StoreAccess(err.to_string())
    }
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Message templates keyed by message id.
///
/// Templates use positional placeholders `{0}`, `{1}`, ... that are replaced
/// by the error's arguments.
#[derive(Debug, Clone)]
pub struct MessageCatalog {
    templates: HashMap<String, String>,
}

impl MessageCatalog {
    pub fn new(templates: HashMap<String, String>) -> Self {
        Self { templates }
    }

    /// Default English catalog
    pub fn english() -> Self {
        let templates = [
            (codes::SYSTEM, "An unexpected error occurred."),
            (codes::VALIDATION, "Input check error: {0}"),
            (codes::STORE_ACCESS, "A database access error occurred."),
            (codes::MISSING_DATA, "No {0} data is registered."),
            (codes::MISSING_LOCATIONS, "No {0} data is registered for the section."),
            (codes::MEDIA_URL, "Failed to create the signed {0}."),
            (
                codes::NOT_FOUND,
                "The scenario does not exist or you are not authorized to view it.",
            ),
        ]
        .into_iter()
        .map(|(id, text)| (id.to_string(), text.to_string()))
        .collect();

        Self { templates }
    }

    /// Resolve a message id and fill its placeholders.
    ///
    /// Unknown ids resolve to the id itself.
    pub fn render(&self, id: &str, args: &[String]) -> String {
        let Some(template) = self.templates.get(id) else {
            return id.to_string();
        };

        args.iter()
            .enumerate()
            .fold(template.clone(), |message, (i, arg)| {
                message.replace(&format!("{{{i}}}"), arg)
            })
    }

    /// Render the message of a catalog error
    pub fn message_for(&self, err: &CatalogError) -> String {
        self.render(err.code(), &err.message_args())
    }
}

impl Default for MessageCatalog {
    fn default() -> Self {
        Self::english()
    }
}
