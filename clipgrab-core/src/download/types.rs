use std::path::PathBuf;

use serde::Serialize;

use crate::container::ContainerKind;

#[derive(Debug, Clone, Serialize)]
pub struct DownloadOutcome {
    pub local_path: PathBuf,
    pub byte_size: u64,
    pub declared_content_type: Option<String>,
    /// False when the leading bytes match no known container. The file is kept.
    pub header_signature_match: bool,
    pub detected_container: Option<ContainerKind>,
    pub source_url: String,
    pub variant: String,
    pub attempts: u32,
}

/// What one successful candidate left on disk.
#[derive(Debug, Clone)]
pub(crate) struct StreamedBody {
    pub byte_size: u64,
    pub content_type: Option<String>,
    pub url: String,
}
