use serde::{Deserialize, Serialize};

use crate::{crypto::StateCodec, errors::Result};

/// Application state carried through the identity provider round trip as the OAuth
/// `state` parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateParam {
    #[serde(rename = "RequestedURI")]
    pub requested_uri: String,
}

impl StateParam {
    pub fn new(requested_uri: impl Into<String>) -> Self {
        Self {
            requested_uri: requested_uri.into(),
        }
    }

    pub fn encrypt(&self, codec: &StateCodec) -> Result<String> {
        codec.encrypt_json(self)
    }

    pub fn decrypt(encrypted: &str, codec: &StateCodec) -> Result<Self> {
        codec.decrypt_json(encrypted)
    }

    /// Where to send the user after the callback. Only same-origin paths are honoured;
    /// anything else (empty, absolute URLs, protocol-relative `//host`) becomes `/`.
    pub fn redirect_target(&self) -> &str {
        let uri = self.requested_uri.as_str();
        let local = uri.starts_with('/') && !uri.starts_with("//") && !uri.starts_with("/\\");
        if local { uri } else { "/" }
    }
}
