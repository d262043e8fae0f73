//! Version-control metadata for a build revision

use serde::{Deserialize, Serialize};

/// Longest changeset description kept after minimization
const MAX_DESCRIPTION_LEN: usize = 255;

/// Repository metadata returned by the revision resolver
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<Branch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changeset: Option<Changeset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push: Option<Push>,
}

impl RepoInfo {
    /// Prunes bulky fields before storage: the changed-file list goes, the
    /// description is truncated.
    pub fn minimize(&mut self) {
        if let Some(changeset) = &mut self.changeset {
            changeset.files = Vec::new();
            if let Some(description) = &mut changeset.description {
                if description.len() > MAX_DESCRIPTION_LEN {
                    // Back off to a char boundary; descriptions are routinely
                    // non-ASCII and a mid-character cut would panic
                    let mut cut = MAX_DESCRIPTION_LEN;
                    while !description.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    description.truncate(cut);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Branch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Changeset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id12: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Push {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimize_drops_files_and_truncates() {
        let mut repo = RepoInfo {
            changeset: Some(Changeset {
                description: Some("x".repeat(1000)),
                files: vec!["a.rs".to_string(), "b.rs".to_string()],
                ..Default::default()
            }),
            ..Default::default()
        };
        repo.minimize();
        let changeset = repo.changeset.unwrap();
        assert!(changeset.files.is_empty());
        assert_eq!(changeset.description.unwrap().len(), MAX_DESCRIPTION_LEN);
    }

    #[test]
    fn test_minimize_truncates_on_char_boundary() {
        let mut repo = RepoInfo {
            changeset: Some(Changeset {
                description: Some(format!("{}é", "a".repeat(MAX_DESCRIPTION_LEN - 1))),
                ..Default::default()
            }),
            ..Default::default()
        };
        repo.minimize();
        let description = repo.changeset.unwrap().description.unwrap();
        assert_eq!(description.len(), MAX_DESCRIPTION_LEN - 1);
        assert!(description.chars().all(|c| c == 'a'));
    }
}
