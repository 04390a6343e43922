//! Represents a single file attachment carried by a note.

use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Descriptor for one uploaded object, minted exactly once by the upload
/// writer and embedded immutably into a note.
///
/// At least one of `key`/`url` must be non-empty for the attachment to be
/// retrievable; a descriptor with neither is permanently unresolvable and is
/// reported as an error at resolution time, never silently hidden.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Attachment {
    /// Original filename, display only.
    pub name: String,

    /// Storage object key — the authoritative locator. Always path-free
    /// (no bucket prefix) for descriptors minted by this service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Previously resolved absolute URL. Only load-bearing for legacy
    /// records that carry no key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// MIME type.
    #[serde(rename = "type", default = "default_content_type")]
    pub content_type: String,

    /// Byte length, best-effort.
    #[serde(default)]
    pub size: i64,
}

pub fn default_content_type() -> String {
    "application/octet-stream".into()
}

impl Attachment {
    /// Derive the storage key to delete when the owning note is removed.
    ///
    /// Preference order: the explicit `key`; else the `url` path minus its
    /// leading slash (and minus a `{bucket}/` prefix, since descriptor keys
    /// are canonically path-free); else the display `name` as a last resort
    /// for very old records. Returns `None` when nothing usable remains.
    pub fn storage_key(&self, bucket: Option<&str>) -> Option<String> {
        if let Some(key) = self.key.as_deref().filter(|k| !k.is_empty()) {
            return Some(key.to_string());
        }

        if let Some(raw) = self.url.as_deref().filter(|u| !u.is_empty()) {
            if let Ok(url) = Url::parse(raw) {
                let mut path = url.path().trim_start_matches('/');
                if let Some(bucket) = bucket {
                    if let Some(stripped) = path.strip_prefix(&format!("{bucket}/")) {
                        path = stripped;
                    }
                }
                if !path.is_empty() {
                    return Some(path.to_string());
                }
            }
        }

        if self.name.is_empty() {
            None
        } else {
            Some(self.name.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(key: Option<&str>, url: Option<&str>, name: &str) -> Attachment {
        Attachment {
            name: name.into(),
            key: key.map(String::from),
            url: url.map(String::from),
            content_type: default_content_type(),
            size: 0,
        }
    }

    #[test]
    fn explicit_key_wins() {
        let a = attachment(
            Some("123_abc_pic.png"),
            Some("https://cdn.example.com/other.png"),
            "pic.png",
        );
        assert_eq!(a.storage_key(Some("notes")).as_deref(), Some("123_abc_pic.png"));
    }

    #[test]
    fn url_path_used_when_key_missing() {
        let a = attachment(None, Some("https://cdn.example.com/123_abc_pic.png"), "pic.png");
        assert_eq!(a.storage_key(None).as_deref(), Some("123_abc_pic.png"));
    }

    #[test]
    fn bucket_prefix_stripped_from_url_path() {
        let a = attachment(
            None,
            Some("https://acct.r2.cloudflarestorage.com/notes/123_abc_pic.png"),
            "pic.png",
        );
        assert_eq!(a.storage_key(Some("notes")).as_deref(), Some("123_abc_pic.png"));
    }

    #[test]
    fn name_fallback_for_unparseable_url() {
        let a = attachment(None, Some("not a url"), "pic.png");
        assert_eq!(a.storage_key(None).as_deref(), Some("pic.png"));
    }

    #[test]
    fn empty_key_treated_as_absent() {
        let a = attachment(Some(""), Some("https://cdn.example.com/real.png"), "pic.png");
        assert_eq!(a.storage_key(None).as_deref(), Some("real.png"));
    }

    #[test]
    fn fully_empty_descriptor_is_unresolvable() {
        let a = attachment(None, None, "");
        assert_eq!(a.storage_key(None), None);
    }

    #[test]
    fn deserializes_legacy_record_with_url_only() {
        let json = r#"{"name":"scan.pdf","url":"https://cdn.example.com/scan.pdf"}"#;
        let a: Attachment = serde_json::from_str(json).unwrap();
        assert_eq!(a.content_type, "application/octet-stream");
        assert_eq!(a.size, 0);
        assert!(a.key.is_none());
    }

    #[test]
    fn serializes_type_field_name() {
        let a = attachment(Some("k"), None, "pic.png");
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["type"], "application/octet-stream");
        assert!(json.get("url").is_none());
    }
}
