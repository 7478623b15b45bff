use serde::{Deserialize, Serialize};

/// One published post as supplied by the content source.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,

    #[serde(default)]
    pub slug: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub markdown: String,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub author: String,

    #[serde(default)]
    pub date: String,

    #[serde(default)]
    pub modified_date: String,
}
