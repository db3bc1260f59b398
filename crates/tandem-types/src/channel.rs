use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Label of the data channel carrying file transfers.
pub const FILE_CHANNEL_LABEL: &str = "fileTransfer";

/// A single message received from, or sent over, the data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    Text(String),
    Binary(Bytes),
}

impl ChannelMessage {
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Announcement that precedes the binary chunks of one file.
///
/// `{"fileMeta":true,"fileName":"report.pdf","fileSize":200000}`
///
/// Older peers tag it `__fileMeta`; both spellings are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    #[serde(alias = "__fileMeta")]
    pub file_meta: bool,
    pub file_name: String,
    pub file_size: u64,
}

impl FileMeta {
    pub fn new(file_name: impl Into<String>, file_size: u64) -> Self {
        Self {
            file_meta: true,
            file_name: file_name.into(),
            file_size,
        }
    }

    /// Returns `None` for any text message that is not a metadata announcement.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str::<Self>(text).ok().filter(|meta| meta.file_meta)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
