use serde::{Deserialize, Serialize};

use crate::time::parse_archive_ts;

/// The `data.json` document inside a backup archive. The shape is fixed:
/// decoding goes through serde with no fallback field lookups, so a document
/// missing required fields fails as malformed instead of half-loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub school: SchoolSection,
    /// RFC 3339, millisecond precision.
    pub export_timestamp: String,
    pub settings: SettingsSection,
    #[serde(default)]
    pub students: Vec<StudentEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchoolSection {
    pub name: String,
    pub address: Option<String>,
    pub logo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsSection {
    #[serde(default)]
    pub members: Vec<MemberEntry>,
    #[serde(default)]
    pub rules: Vec<RuleEntry>,
    #[serde(default)]
    pub categories: Vec<CategoryEntry>,
    #[serde(default)]
    pub classrooms: Vec<ClassroomEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberEntry {
    pub username: String,
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEntry {
    pub code: String,
    pub description: String,
    #[serde(default)]
    pub ayats: Vec<AyatRef>,
}

/// Ayats travel by natural key, never by row id: ids are not stable across
/// installations, the pair is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AyatRef {
    pub number: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryEntry {
    pub name: String,
    pub points: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassroomEntry {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentEntry {
    pub name: String,
    pub nis: String,
    pub classroom: Option<String>,
    #[serde(default)]
    pub violations: Vec<ViolationEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationEntry {
    /// RFC 3339; must parse, enforced by [`BackupManifest::validate`].
    pub date: String,
    pub description: String,
    pub points: i64,
    pub pasal: Option<String>,
    pub kategori: Option<String>,
    pub reporter: Option<String>,
    #[serde(default)]
    pub is_remitted: bool,
    pub remission_reason: Option<String>,
    #[serde(default)]
    pub ayats: Vec<AyatRef>,
    #[serde(default)]
    pub photos: Vec<String>,
}

impl ViolationEntry {
    pub fn date_ms(&self) -> Option<i64> {
        parse_archive_ts(&self.date)
    }
}

impl BackupManifest {
    /// Checks the constraints serde cannot express. A date that does not
    /// parse would otherwise silently shift on import and break the
    /// replayability of the archive.
    pub fn validate(&self) -> Result<(), String> {
        if parse_archive_ts(&self.export_timestamp).is_none() {
            return Err(format!(
                "export_timestamp is not RFC 3339: {:?}",
                self.export_timestamp
            ));
        }
        for student in &self.students {
            for violation in &student.violations {
                if violation.date_ms().is_none() {
                    return Err(format!(
                        "violation date is not RFC 3339: {:?} (student nis {})",
                        violation.date, student.nis
                    ));
                }
            }
        }
        Ok(())
    }

    /// Every asset filename the manifest refers to: photos plus the logo.
    pub fn referenced_assets(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        if let Some(logo) = self.school.logo.as_deref() {
            names.push(logo);
        }
        for student in &self.students {
            for violation in &student.violations {
                for photo in &violation.photos {
                    names.push(photo);
                }
            }
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_json() -> serde_json::Value {
        serde_json::json!({
            "school": { "name": "SMP 1", "address": null, "logo": null },
            "export_timestamp": "2026-03-01T08:00:00.000Z",
            "settings": { "members": [], "rules": [], "categories": [], "classrooms": [] },
            "students": []
        })
    }

    #[test]
    fn minimal_manifest_parses_and_validates() {
        let manifest: BackupManifest = serde_json::from_value(minimal_json()).unwrap();
        assert!(manifest.validate().is_ok());
        assert!(manifest.referenced_assets().is_empty());
    }

    #[test]
    fn missing_required_section_is_rejected() {
        let mut doc = minimal_json();
        doc.as_object_mut().unwrap().remove("settings");
        assert!(serde_json::from_value::<BackupManifest>(doc).is_err());

        let mut doc = minimal_json();
        doc["school"].as_object_mut().unwrap().remove("name");
        assert!(serde_json::from_value::<BackupManifest>(doc).is_err());
    }

    #[test]
    fn bad_violation_date_fails_validation() {
        let mut doc = minimal_json();
        doc["students"] = serde_json::json!([{
            "name": "Budi", "nis": "1001", "classroom": null,
            "violations": [{
                "date": "31/12/2025", "description": "Terlambat", "points": 5,
                "pasal": null, "kategori": null, "reporter": null,
                "remission_reason": null
            }]
        }]);
        let manifest: BackupManifest = serde_json::from_value(doc).unwrap();
        let err = manifest.validate().unwrap_err();
        assert!(err.contains("31/12/2025"));
    }

    #[test]
    fn omitted_defaults_fill_in() {
        let mut doc = minimal_json();
        doc["students"] = serde_json::json!([{
            "name": "Sari", "nis": "1002", "classroom": "7A",
            "violations": [{
                "date": "2026-02-01T01:00:00.000Z", "description": "x", "points": 3,
                "pasal": null, "kategori": null, "reporter": null,
                "remission_reason": null
            }]
        }]);
        let manifest: BackupManifest = serde_json::from_value(doc).unwrap();
        let v = &manifest.students[0].violations[0];
        assert!(!v.is_remitted);
        assert!(v.ayats.is_empty());
        assert!(v.photos.is_empty());
    }

    #[test]
    fn referenced_assets_cover_logo_and_photos() {
        let mut doc = minimal_json();
        doc["school"]["logo"] = serde_json::json!("logo_1.png");
        doc["students"] = serde_json::json!([{
            "name": "Sari", "nis": "1002", "classroom": null,
            "violations": [{
                "date": "2026-02-01T01:00:00.000Z", "description": "x", "points": 3,
                "pasal": null, "kategori": null, "reporter": null,
                "remission_reason": null, "photos": ["a.jpg", "b.jpg"]
            }]
        }]);
        let manifest: BackupManifest = serde_json::from_value(doc).unwrap();
        assert_eq!(manifest.referenced_assets(), vec!["logo_1.png", "a.jpg", "b.jpg"]);
    }
}
