pub mod analyze;
pub mod email;
pub mod threats;

use serde::Deserialize;

/// Body of the text analysis endpoints.
#[derive(Debug, Deserialize)]
pub struct TextInput {
    pub content: String,
}
