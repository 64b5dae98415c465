use chrono::NaiveDate;
use serde::Serialize;
use std::path::PathBuf;
use std::str::FromStr;

/// People & Blogs.
pub const DEFAULT_CATEGORY_ID: &str = "22";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyStatus {
    Private,
    Unlisted,
    Public,
}

impl FromStr for PrivacyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "private" => Ok(PrivacyStatus::Private),
            "unlisted" => Ok(PrivacyStatus::Unlisted),
            "public" => Ok(PrivacyStatus::Public),
            other => Err(format!("unknown privacy status {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub path: PathBuf,
    pub title: String,
    pub description: String,
    pub privacy: PrivacyStatus,
    pub category_id: String,
    pub tags: Vec<String>,
}

impl UploadRequest {
    /// Recording uploaded on `date`: titled `MM/DD/YYYY` and kept private so
    /// it can be reviewed before publishing.
    pub fn for_recording(path: PathBuf, date: NaiveDate) -> Self {
        let title = recording_title(date);
        let description = format!("Auto-uploaded recording: {}", title);
        Self {
            path,
            title,
            description,
            privacy: PrivacyStatus::Private,
            category_id: DEFAULT_CATEGORY_ID.to_string(),
            tags: Vec::new(),
        }
    }

    /// The `snippet,status` resource sent alongside the video bytes.
    pub fn metadata(&self) -> VideoResource<'_> {
        VideoResource {
            snippet: Snippet {
                title: &self.title,
                description: &self.description,
                category_id: &self.category_id,
                tags: &self.tags,
            },
            status: Status {
                privacy_status: self.privacy,
            },
        }
    }
}

pub fn recording_title(date: NaiveDate) -> String {
    date.format("%m/%d/%Y").to_string()
}

#[derive(Debug, Serialize)]
pub struct VideoResource<'a> {
    pub snippet: Snippet<'a>,
    pub status: Status,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snippet<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub category_id: &'a str,
    pub tags: &'a [String],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub privacy_status: PrivacyStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn june_first() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    #[test]
    fn title_and_description_follow_the_date() {
        let request = UploadRequest::for_recording("/videos/a.mkv".into(), june_first());
        assert_eq!(request.title, "06/01/2024");
        assert_eq!(request.description, "Auto-uploaded recording: 06/01/2024");
        assert_eq!(request.privacy, PrivacyStatus::Private);
    }

    #[test]
    fn privacy_parses_case_insensitively() {
        assert_eq!("Unlisted".parse::<PrivacyStatus>(), Ok(PrivacyStatus::Unlisted));
        assert_eq!(" public ".parse::<PrivacyStatus>(), Ok(PrivacyStatus::Public));
        assert!("friends".parse::<PrivacyStatus>().is_err());
    }

    #[test]
    fn metadata_uses_api_field_names() {
        let request = UploadRequest::for_recording("/videos/a.mkv".into(), june_first());
        let value = serde_json::to_value(request.metadata()).unwrap();
        assert_eq!(
            value,
            json!({
                "snippet": {
                    "title": "06/01/2024",
                    "description": "Auto-uploaded recording: 06/01/2024",
                    "categoryId": "22",
                    "tags": []
                },
                "status": { "privacyStatus": "private" }
            })
        );
    }
}
