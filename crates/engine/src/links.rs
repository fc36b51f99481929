//! Absolute links handed out in e-mails and admin pages.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Links {
    base_url: String,
}

impl Links {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
        }
    }

    fn segment(value: &str) -> String {
        utf8_percent_encode(value, PATH_SEGMENT).to_string()
    }

    /// Link that shows the user's current state.
    pub fn user_link(&self, uid: &str) -> String {
        format!("{}/view/{}", self.base_url, Self::segment(uid))
    }

    /// Link that moves the user to `endpoint`, valid only while `hcsf` is the current state hash.
    pub fn view_link(&self, uid: &str, hcsf: &str, endpoint: &str) -> String {
        format!(
            "{}/view/{}/{}/{}",
            self.base_url,
            Self::segment(uid),
            Self::segment(hcsf),
            Self::segment(endpoint)
        )
    }

    pub fn file_url(&self, file_id: &str) -> String {
        format!("{}/file/{}", self.base_url, Self::segment(file_id))
    }

    pub fn register_link(&self) -> String {
        format!("{}/register", self.base_url)
    }

    pub fn recover_link(&self) -> String {
        format!("{}/recover", self.base_url)
    }

    pub fn recover_link_for(&self, email: &str) -> String {
        format!("{}/recover/{}", self.base_url, Self::segment(email))
    }
}
